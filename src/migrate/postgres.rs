use std::collections::HashSet;

use sqlx::PgPool;
use tracing::{info, warn};

use super::{
    plan_mails, LegacyMailRow, MigrationReport, LEGACY_ADDRESS_TABLE, LEGACY_MAIL_SELECT,
    LEGACY_MAIL_TABLE,
};
use crate::db::postgres_table_exists;
use crate::store::normalize_address;
use crate::{DispomailError, Result};

/// Migrate legacy tables in a PostgreSQL database, if there are any.
///
/// Concurrent starts serialize on a transaction-scoped advisory lock; the
/// loser sees the renamed tables and does nothing.
pub async fn migrate_postgres(pool: &PgPool) -> Result<Option<MigrationReport>> {
    if !postgres_table_exists(pool, LEGACY_ADDRESS_TABLE).await? {
        return Ok(None);
    }
    info!("Legacy schema found, migrating");

    match run(pool).await {
        Ok(Some(report)) => {
            info!(
                "Legacy migration done: {} addresses, {} mails ({} seeded), {} orphans skipped",
                report.addresses, report.mails, report.seeded, report.orphans
            );
            Ok(Some(report))
        }
        Ok(None) => Ok(None),
        Err(e) => Err(DispomailError::Migration(e.to_string())),
    }
}

/// Advisory lock key shared by every instance running the migration.
const MIGRATION_LOCK_KEY: i64 = 0x6d61_696c_6d69_6772;

async fn run(pool: &PgPool) -> Result<Option<MigrationReport>> {
    let mut report = MigrationReport::default();
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    // Re-check under the lock.
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM information_schema.tables
                       WHERE table_schema = current_schema() AND table_name = $1)",
    )
    .bind(LEGACY_ADDRESS_TABLE)
    .fetch_one(&mut *tx)
    .await?;
    if !exists {
        return Ok(None);
    }
    let has_mail: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM information_schema.tables
                       WHERE table_schema = current_schema() AND table_name = $1)",
    )
    .bind(LEGACY_MAIL_TABLE)
    .fetch_one(&mut *tx)
    .await?;

    let legacy_addresses: Vec<(Option<String>,)> =
        sqlx::query_as("SELECT CAST(addr AS TEXT) FROM address ORDER BY ctid")
            .fetch_all(&mut *tx)
            .await?;

    for (addr,) in legacy_addresses {
        let addr = normalize_address(addr.as_deref().unwrap_or_default());
        if addr.is_empty() {
            continue;
        }
        let result = sqlx::query("INSERT INTO addresses (addr) VALUES ($1) ON CONFLICT (addr) DO NOTHING")
            .bind(&addr)
            .execute(&mut *tx)
            .await?;
        report.addresses += result.rows_affected();
    }

    if has_mail {
        let known: HashSet<String> = sqlx::query_scalar::<_, String>("SELECT addr FROM addresses")
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();

        let rows = sqlx::query_as::<_, LegacyMailRow>(&format!("{LEGACY_MAIL_SELECT} ORDER BY ctid"))
            .fetch_all(&mut *tx)
            .await?;
        let (planned, orphans) = plan_mails(rows, &known);
        report.orphans = orphans;
        if orphans > 0 {
            warn!("Skipping {} legacy mails without an address", orphans);
        }

        for mail in planned {
            let result = sqlx::query(
                "INSERT INTO mails (id, recipient, sender, sender_name, subject, content, is_read, received, is_deleted)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(&mail.id)
            .bind(&mail.recipient)
            .bind(&mail.sender)
            .bind(&mail.sender_name)
            .bind(&mail.subject)
            .bind(&mail.content)
            .bind(mail.is_read)
            .bind(mail.received)
            .bind(mail.is_deleted)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() > 0 {
                report.mails += 1;
                if mail.seeded {
                    report.seeded += 1;
                }
            }
        }

        sqlx::query("ALTER TABLE mail RENAME TO mail_legacy")
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query("ALTER TABLE address RENAME TO address_legacy")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Some(report))
}
