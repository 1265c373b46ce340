//! Database connectivity and migration management.
//!
//! [`Database::open`] connects the configured backend, applies the
//! versioned schema, runs the legacy upgrade if needed, and hands out the
//! backend as an `Arc<dyn MailStore>`.

#[cfg(feature = "postgres")]
mod postgres;
mod schema;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use schema::{POSTGRES_MIGRATIONS, SQLITE_MIGRATIONS};

#[cfg(feature = "postgres")]
pub(crate) use postgres::table_exists as postgres_table_exists;
#[cfg(feature = "sqlite")]
pub(crate) use sqlite::table_exists as sqlite_table_exists;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::migrate::MigrationReport;
use crate::store::MailStore;
use crate::{DispomailError, Result};

#[derive(Clone)]
enum Pool {
    #[cfg(feature = "sqlite")]
    Sqlite(sqlx::SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(sqlx::PgPool),
}

/// An opened, migrated database.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
    store: Arc<dyn MailStore>,
    legacy: Option<MigrationReport>,
}

impl Database {
    /// Open the backend selected by `config`.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        match config.backend {
            #[cfg(feature = "sqlite")]
            DatabaseBackend::Sqlite => {
                let pool = sqlite::connect(Path::new(&config.path), config.max_connections).await?;
                Self::from_sqlite(pool).await
            }
            #[cfg(feature = "postgres")]
            DatabaseBackend::Postgres => {
                if config.url.is_empty() {
                    return Err(DispomailError::Config(
                        "database.url is required for postgres".to_string(),
                    ));
                }
                Self::open_postgres(&config.url, config.max_connections).await
            }
            #[allow(unreachable_patterns)]
            other => Err(DispomailError::Config(format!(
                "backend {other:?} is not compiled in"
            ))),
        }
    }

    /// Open a SQLite database file.
    #[cfg(feature = "sqlite")]
    pub async fn open_sqlite(path: impl AsRef<Path>) -> Result<Self> {
        let pool = sqlite::connect(path.as_ref(), 5).await?;
        Self::from_sqlite(pool).await
    }

    /// Open an in-memory database for testing.
    #[cfg(feature = "sqlite")]
    pub async fn open_in_memory() -> Result<Self> {
        let pool = sqlite::connect_in_memory().await?;
        Self::from_sqlite(pool).await
    }

    /// Connect to PostgreSQL.
    #[cfg(feature = "postgres")]
    pub async fn open_postgres(url: &str, max_connections: u32) -> Result<Self> {
        let pool = postgres::connect(url, max_connections).await?;
        postgres::migrate(&pool).await?;
        let legacy = crate::migrate::migrate_postgres(&pool).await?;
        let store = crate::store::PostgresStore::new(pool.clone()).await?;

        Ok(Self {
            store: Arc::new(store),
            pool: Pool::Postgres(pool),
            legacy,
        })
    }

    #[cfg(feature = "sqlite")]
    async fn from_sqlite(pool: sqlx::SqlitePool) -> Result<Self> {
        sqlite::migrate(&pool).await?;
        let legacy = crate::migrate::migrate_sqlite(&pool).await?;
        let store = crate::store::SqliteStore::new(pool.clone()).await?;

        Ok(Self {
            store: Arc::new(store),
            pool: Pool::Sqlite(pool),
            legacy,
        })
    }

    /// The store over this database.
    pub fn store(&self) -> Arc<dyn MailStore> {
        Arc::clone(&self.store)
    }

    /// Report of the legacy upgrade performed while opening, if any.
    pub fn legacy_migration(&self) -> Option<&MigrationReport> {
        self.legacy.as_ref()
    }

    /// Get the current schema version.
    pub async fn schema_version(&self) -> Result<i64> {
        match &self.pool {
            #[cfg(feature = "sqlite")]
            Pool::Sqlite(pool) => sqlite::schema_version(pool).await,
            #[cfg(feature = "postgres")]
            Pool::Postgres(pool) => postgres::schema_version(pool).await,
        }
    }

    /// Check if a table exists.
    pub async fn table_exists(&self, table_name: &str) -> Result<bool> {
        match &self.pool {
            #[cfg(feature = "sqlite")]
            Pool::Sqlite(pool) => sqlite::table_exists(pool, table_name).await,
            #[cfg(feature = "postgres")]
            Pool::Postgres(pool) => postgres::table_exists(pool, table_name).await,
        }
    }

    /// The SQLite pool, when this is a SQLite database.
    #[cfg(feature = "sqlite")]
    pub fn sqlite_pool(&self) -> Option<&sqlx::SqlitePool> {
        match &self.pool {
            Pool::Sqlite(pool) => Some(pool),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        match &self.pool {
            #[cfg(feature = "sqlite")]
            Pool::Sqlite(pool) => pool.close().await,
            #[cfg(feature = "postgres")]
            Pool::Postgres(pool) => pool.close().await,
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

/// Log a one-line summary of what was opened.
pub fn log_opened(db: &Database) {
    match db.legacy_migration() {
        Some(report) => info!(
            "Database ready ({}), legacy upgrade copied {} mails",
            db.store.backend_name(),
            report.mails
        ),
        None => info!("Database ready ({})", db.store.backend_name()),
    }
}
