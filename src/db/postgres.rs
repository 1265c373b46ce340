use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use super::schema::POSTGRES_MIGRATIONS;
use crate::Result;

/// Advisory lock key serializing schema migrations across instances.
const SCHEMA_LOCK_KEY: i64 = 0x6469_7370_6f6d_6c01;

/// Connect to a PostgreSQL server.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to PostgreSQL");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(url)
        .await?;
    Ok(pool)
}

/// Check if a table exists in the current schema.
pub async fn table_exists(pool: &PgPool, table_name: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM information_schema.tables
                       WHERE table_schema = current_schema() AND table_name = $1)",
    )
    .bind(table_name)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Get the current schema version.
pub async fn schema_version(pool: &PgPool) -> Result<i64> {
    if !table_exists(pool, "schema_version").await? {
        return Ok(0);
    }
    let version: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

/// Apply pending migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version     BIGINT PRIMARY KEY,
            applied_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(pool)
    .await?;

    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(&mut *tx)
            .await?;

    if current_version as usize >= POSTGRES_MIGRATIONS.len() {
        debug!("Database is up to date (version {})", current_version);
        return Ok(());
    }

    info!(
        "Migrating database from version {} to {}",
        current_version,
        POSTGRES_MIGRATIONS.len()
    );

    for (i, migration) in POSTGRES_MIGRATIONS
        .iter()
        .enumerate()
        .skip(current_version as usize)
    {
        let version = (i + 1) as i64;
        info!("Applying migration v{}", version);
        sqlx::raw_sql(migration).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES ($1)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    info!(
        "Database migration complete (now at version {})",
        POSTGRES_MIGRATIONS.len()
    );
    Ok(())
}
