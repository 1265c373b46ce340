//! One-time upgrade from the legacy flat schema.
//!
//! Older deployments kept two loosely typed tables, `address(addr)` and
//! `mail(id, recipient, sender, subject, content, read, received, deleted,
//! sendername)`, with no owner column and no foreign key. When they are
//! present at startup their rows are copied into `addresses` / `mails` in a
//! single transaction and the legacy tables are renamed to `*_legacy`, so a
//! second start finds nothing to do. A failed run rolls back completely and
//! can simply be retried.
//!
//! Legacy ids are not kept. An id whose first 13 characters are decimal
//! digits is read as a millisecond timestamp and seeds the new id, keeping
//! the relative order of such rows. Any other id gets a fresh one.

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::migrate_postgres;
#[cfg(feature = "sqlite")]
pub use sqlite::migrate_sqlite;

use std::collections::HashSet;

use chrono::DateTime;

use crate::store::{normalize_address, MailIdGenerator};

/// Legacy address table name.
pub const LEGACY_ADDRESS_TABLE: &str = "address";
/// Legacy mail table name.
pub const LEGACY_MAIL_TABLE: &str = "mail";

/// Number of leading digits that make a legacy id a timestamp seed.
const SEED_DIGITS: usize = 13;

/// Outcome of a legacy migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Addresses newly inserted.
    pub addresses: u64,
    /// Mails newly inserted.
    pub mails: u64,
    /// Of those, mails whose id was derived from a timestamp seed.
    pub seeded: u64,
    /// Legacy mails dropped because their recipient has no address.
    pub orphans: u64,
}

/// A legacy mail row with every column read as text.
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub(crate) struct LegacyMailRow {
    pub id: Option<String>,
    pub recipient: Option<String>,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub read: Option<String>,
    pub received: Option<String>,
    pub deleted: Option<String>,
    pub sendername: Option<String>,
}

/// A legacy mail converted to the new column set, ready to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MigratedMail {
    pub id: String,
    pub recipient: String,
    pub sender: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub content: String,
    pub is_read: bool,
    pub received: i64,
    pub is_deleted: bool,
    pub seeded: bool,
}

/// Column list for reading the legacy mail table.
pub(crate) const LEGACY_MAIL_SELECT: &str = "SELECT \
    CAST(id AS TEXT) AS id, \
    CAST(recipient AS TEXT) AS recipient, \
    CAST(sender AS TEXT) AS sender, \
    CAST(subject AS TEXT) AS subject, \
    CAST(content AS TEXT) AS content, \
    CAST(read AS TEXT) AS read, \
    CAST(received AS TEXT) AS received, \
    CAST(deleted AS TEXT) AS deleted, \
    CAST(sendername AS TEXT) AS sendername \
    FROM mail";

/// Timestamp seed of a legacy id: its first 13 characters, if they are all
/// ASCII digits.
pub fn timestamp_seed(legacy_id: &str) -> Option<u64> {
    let prefix = legacy_id.get(..SEED_DIGITS)?;
    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok()
}

/// Loose boolean as stored by older versions.
fn parse_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "t" | "true" | "yes")
    )
}

/// Received time in epoch milliseconds; integers, decimals and RFC 3339
/// strings are understood, anything else is 0.
fn parse_received(value: Option<&str>) -> i64 {
    let Some(value) = value.map(str::trim) else {
        return 0;
    };
    if let Ok(ms) = value.parse::<i64>() {
        return ms;
    }
    if let Ok(ms) = value.parse::<f64>() {
        return ms as i64;
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0)
}

/// Convert legacy rows into insertable mails.
///
/// Rows whose recipient is not in `known` are dropped and counted. Seeded
/// rows are assigned ids in ascending seed order (ties broken by legacy
/// id) so that their new ids sort the way the old ones did.
pub(crate) fn plan_mails(
    rows: Vec<LegacyMailRow>,
    known: &HashSet<String>,
) -> (Vec<MigratedMail>, u64) {
    let mut seeded = Vec::new();
    let mut unseeded = Vec::new();
    let mut orphans = 0u64;

    for row in rows {
        let recipient = normalize_address(row.recipient.as_deref().unwrap_or_default());
        if !known.contains(&recipient) {
            orphans += 1;
            continue;
        }
        match row.id.as_deref().and_then(timestamp_seed) {
            Some(seed) => seeded.push((seed, recipient, row)),
            None => unseeded.push((recipient, row)),
        }
    }

    seeded.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.id.cmp(&b.2.id)));

    let seeded_ids = MailIdGenerator::new();
    let fresh_ids = MailIdGenerator::new();
    let mut planned = Vec::with_capacity(seeded.len() + unseeded.len());

    for (seed, recipient, row) in seeded {
        let id = seeded_ids.id_at(seed);
        planned.push(convert(id, recipient, row, Some(seed)));
    }
    for (recipient, row) in unseeded {
        let id = fresh_ids.next_id();
        planned.push(convert(id, recipient, row, None));
    }

    (planned, orphans)
}

fn convert(id: String, recipient: String, row: LegacyMailRow, seed: Option<u64>) -> MigratedMail {
    let mut received = parse_received(row.received.as_deref());
    if received <= 0 {
        received = seed.map(|s| s as i64).unwrap_or(0);
    }

    MigratedMail {
        id,
        recipient,
        sender: row.sender.unwrap_or_default(),
        sender_name: row.sendername.filter(|n| !n.is_empty()),
        subject: row.subject.unwrap_or_default(),
        content: row.content.unwrap_or_default(),
        is_read: parse_flag(row.read.as_deref()),
        received,
        is_deleted: parse_flag(row.deleted.as_deref()),
        seeded: seed.is_some(),
    }
}
