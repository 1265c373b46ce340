use std::collections::HashSet;

use sqlx::SqlitePool;
use tracing::{info, warn};

use super::{
    plan_mails, LegacyMailRow, MigrationReport, LEGACY_ADDRESS_TABLE, LEGACY_MAIL_SELECT,
    LEGACY_MAIL_TABLE,
};
use crate::db::sqlite_table_exists;
use crate::store::normalize_address;
use crate::{DispomailError, Result};

/// Migrate legacy tables in a SQLite database, if there are any.
///
/// Returns `None` when no legacy address table exists.
pub async fn migrate_sqlite(pool: &SqlitePool) -> Result<Option<MigrationReport>> {
    if !sqlite_table_exists(pool, LEGACY_ADDRESS_TABLE).await? {
        return Ok(None);
    }
    let has_mail = sqlite_table_exists(pool, LEGACY_MAIL_TABLE).await?;
    info!("Legacy schema found, migrating");

    let result = run(pool, has_mail).await;
    match result {
        Ok(report) => {
            info!(
                "Legacy migration done: {} addresses, {} mails ({} seeded), {} orphans skipped",
                report.addresses, report.mails, report.seeded, report.orphans
            );
            Ok(Some(report))
        }
        Err(e) => Err(DispomailError::Migration(e.to_string())),
    }
}

async fn run(pool: &SqlitePool, has_mail: bool) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();
    let mut tx = pool.begin().await?;

    let legacy_addresses: Vec<(Option<String>,)> =
        sqlx::query_as("SELECT CAST(addr AS TEXT) FROM address ORDER BY rowid")
            .fetch_all(&mut *tx)
            .await?;

    for (addr,) in legacy_addresses {
        let addr = normalize_address(addr.as_deref().unwrap_or_default());
        if addr.is_empty() {
            continue;
        }
        let result = sqlx::query("INSERT OR IGNORE INTO addresses (addr) VALUES ($1)")
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

        let rows = sqlx::query_as::<_, LegacyMailRow>(&format!("{LEGACY_MAIL_SELECT} ORDER BY rowid"))
            .fetch_all(&mut *tx)
            .await?;
        let (planned, orphans) = plan_mails(rows, &known);
        report.orphans = orphans;
        if orphans > 0 {
            warn!("Skipping {} legacy mails without an address", orphans);
        }

        for mail in planned {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO mails (id, recipient, sender, sender_name, subject, content, is_read, received, is_deleted)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
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
    Ok(report)
}
