//! Store backed by a PostgreSQL server.
//!
//! Text columns use the "C" collation so that id comparisons and ordering
//! match SQLite's byte-wise ordering.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use super::{
    normalize_address, validate_new_address, Address, AddressRow, Direction, Mail, MailIdGenerator,
    MailPage, MailQuery, MailRow, MailStore, NewMail, UnreadCount, MAIL_COLUMNS,
};
use crate::Result;

/// PostgreSQL implementation of [`MailStore`].
pub struct PostgresStore {
    pool: PgPool,
    ids: MailIdGenerator,
}

impl PostgresStore {
    /// Wrap a pool whose schema is already migrated.
    ///
    /// New mail ids continue after the largest id already stored.
    pub async fn new(pool: PgPool) -> Result<Self> {
        let last_id: Option<String> = sqlx::query_scalar("SELECT MAX(id) FROM mails")
            .fetch_one(&pool)
            .await?;
        Ok(Self {
            ids: MailIdGenerator::after(last_id.as_deref()),
            pool,
        })
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish()
    }
}

#[async_trait]
impl MailStore for PostgresStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn add_address(&self, addr: &str) -> Result<()> {
        let addr = validate_new_address(addr)?;
        sqlx::query("INSERT INTO addresses (addr) VALUES ($1) ON CONFLICT (addr) DO NOTHING")
            .bind(&addr)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_address(&self, addr: &str) -> Result<Option<Address>> {
        let row = sqlx::query_as::<_, AddressRow>("SELECT addr, owner FROM addresses WHERE addr = $1")
            .bind(normalize_address(addr))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Address::from))
    }

    async fn get_addresses(&self, user: Option<&str>) -> Result<Vec<Address>> {
        let rows = sqlx::query_as::<_, AddressRow>(
            "SELECT addr, owner FROM addresses
             WHERE owner IS NULL OR owner = $1
             ORDER BY seq ASC",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Address::from).collect())
    }

    async fn update_address_owner(&self, addr: &str, owner: Option<&str>) -> Result<u64> {
        let result = sqlx::query("UPDATE addresses SET owner = $1 WHERE addr = $2")
            .bind(owner)
            .bind(normalize_address(addr))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_address(&self, addr: &str) -> Result<u64> {
        let addr = normalize_address(addr);
        let mut tx = self.pool.begin().await?;

        let mails = sqlx::query("DELETE FROM mails WHERE recipient = $1")
            .bind(&addr)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM addresses WHERE addr = $1")
            .bind(&addr)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(
            "Deleted address {} and {} mails",
            addr,
            mails.rows_affected()
        );
        Ok(result.rows_affected())
    }

    async fn add_mail(&self, mail: &NewMail) -> Result<Mail> {
        let id = self.ids.next_id();
        let recipient = normalize_address(&mail.recipient);
        let received = mail.received_millis(Utc::now());

        let row = sqlx::query_as::<_, MailRow>(&format!(
            "INSERT INTO mails (id, recipient, sender, sender_name, subject, content, is_read, received, is_deleted)
             VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7, FALSE)
             RETURNING {MAIL_COLUMNS}"
        ))
        .bind(&id)
        .bind(&recipient)
        .bind(&mail.sender)
        .bind(&mail.sender_name)
        .bind(&mail.subject)
        .bind(&mail.content)
        .bind(received)
        .fetch_one(&self.pool)
        .await?;

        Ok(Mail::from(row))
    }

    async fn get_mail(&self, id: &str) -> Result<Option<Mail>> {
        let row = sqlx::query_as::<_, MailRow>(&format!(
            "SELECT {MAIL_COLUMNS} FROM mails WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Mail::from))
    }

    async fn get_mails(&self, query: &MailQuery) -> Result<MailPage> {
        let limit = query.limit()?;
        let direction = query.direction();

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {MAIL_COLUMNS} FROM mails
             JOIN addresses ON addresses.addr = mails.recipient
             WHERE mails.is_deleted = "
        ));
        builder.push_bind(query.deleted);
        builder.push(" AND (addresses.owner IS NULL OR addresses.owner = ");
        builder.push_bind(query.user.clone());
        builder.push(")");

        if let Some(ref recipient) = query.recipient {
            builder.push(" AND mails.recipient = ");
            builder.push_bind(normalize_address(recipient));
        }

        match query.cursor {
            Some(ref cursor) if cursor.direction == Direction::Older => {
                builder.push(" AND mails.id < ");
                builder.push_bind(cursor.id.clone());
            }
            Some(ref cursor) => {
                builder.push(" AND mails.id > ");
                builder.push_bind(cursor.id.clone());
            }
            None => {}
        }

        builder.push(match direction {
            Direction::Older => " ORDER BY mails.id DESC",
            Direction::Newer => " ORDER BY mails.id ASC",
        });
        builder.push(" LIMIT ");
        builder.push_bind(limit);

        let rows = builder
            .build_query_as::<MailRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(MailPage::from_scan(
            rows.into_iter().map(Mail::from).collect(),
            direction,
            query.page_size,
        ))
    }

    async fn get_all_mails(&self, user: Option<&str>) -> Result<Vec<Mail>> {
        let rows = sqlx::query_as::<_, MailRow>(&format!(
            "SELECT {MAIL_COLUMNS} FROM mails
             JOIN addresses ON addresses.addr = mails.recipient
             WHERE addresses.owner IS NULL OR addresses.owner = $1
             ORDER BY mails.id DESC"
        ))
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Mail::from).collect())
    }

    async fn get_unread(&self, user: Option<&str>) -> Result<Vec<UnreadCount>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT mails.recipient, COUNT(*) FROM mails
             JOIN addresses ON addresses.addr = mails.recipient
             WHERE NOT mails.is_read AND NOT mails.is_deleted
               AND (addresses.owner IS NULL OR addresses.owner = $1)
             GROUP BY mails.recipient
             ORDER BY mails.recipient ASC",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(recipient, unread)| UnreadCount { recipient, unread })
            .collect())
    }

    async fn mark_mail_as_read(&self, id: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE mails SET is_read = TRUE WHERE id = $1 AND NOT is_read")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn mark_all_as_read(&self, recipient: &str) -> Result<u64> {
        let result =
            sqlx::query("UPDATE mails SET is_read = TRUE WHERE recipient = $1 AND NOT is_read")
                .bind(normalize_address(recipient))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn soft_delete_mail(&self, id: &str) -> Result<u64> {
        let result =
            sqlx::query("UPDATE mails SET is_deleted = TRUE WHERE id = $1 AND NOT is_deleted")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn delete_mail(&self, id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM mails WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_mails_for_address(&self, recipient: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE mails SET is_deleted = TRUE WHERE recipient = $1 AND NOT is_deleted",
        )
        .bind(normalize_address(recipient))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn empty_deleted_mails(&self, user: Option<&str>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM mails
             WHERE is_deleted
               AND recipient IN (SELECT addr FROM addresses WHERE owner IS NULL OR owner = $1)",
        )
        .bind(user)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn restore_deleted_mails(&self, user: Option<&str>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE mails SET is_deleted = FALSE
             WHERE is_deleted
               AND recipient IN (SELECT addr FROM addresses WHERE owner IS NULL OR owner = $1)",
        )
        .bind(user)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_address_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM addresses")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn get_unread_mails_count(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM mails WHERE NOT is_read AND NOT is_deleted")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
