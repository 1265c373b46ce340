//! Store backed by the embedded SQLite engine.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use super::{
    normalize_address, validate_new_address, Address, AddressRow, Direction, Mail, MailIdGenerator,
    MailPage, MailQuery, MailRow, MailStore, NewMail, UnreadCount, MAIL_COLUMNS,
};
use crate::Result;

/// SQLite implementation of [`MailStore`].
pub struct SqliteStore {
    pool: SqlitePool,
    ids: MailIdGenerator,
}

impl SqliteStore {
    /// Wrap a pool whose schema is already migrated.
    ///
    /// New mail ids continue after the largest id already stored.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let last_id: Option<String> = sqlx::query_scalar("SELECT MAX(id) FROM mails")
            .fetch_one(&pool)
            .await?;
        Ok(Self {
            ids: MailIdGenerator::after(last_id.as_deref()),
            pool,
        })
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

#[async_trait]
impl MailStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn add_address(&self, addr: &str) -> Result<()> {
        let addr = validate_new_address(addr)?;
        let result = sqlx::query("INSERT INTO addresses (addr) VALUES ($1) ON CONFLICT(addr) DO NOTHING")
            .bind(&addr)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            debug!("Address {} already registered", addr);
        }
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
        let addresses = sqlx::query("DELETE FROM addresses WHERE addr = $1")
            .bind(&addr)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(
            "Deleted address {} and {} mails",
            addr,
            mails.rows_affected()
        );
        Ok(addresses.rows_affected())
    }

    async fn add_mail(&self, mail: &NewMail) -> Result<Mail> {
        let id = self.ids.next_id();
        let recipient = normalize_address(&mail.recipient);
        let received = mail.received_millis(Utc::now());

        sqlx::query(
            "INSERT INTO mails (id, recipient, sender, sender_name, subject, content, is_read, received, is_deleted)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&id)
        .bind(&recipient)
        .bind(&mail.sender)
        .bind(&mail.sender_name)
        .bind(&mail.subject)
        .bind(&mail.content)
        .bind(false)
        .bind(received)
        .bind(false)
        .execute(&self.pool)
        .await?;

        Ok(Mail::from(MailRow {
            id,
            recipient,
            sender: mail.sender.clone(),
            sender_name: mail.sender_name.clone(),
            subject: mail.subject.clone(),
            content: mail.content.clone(),
            is_read: false,
            received,
            is_deleted: false,
        }))
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

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
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

        if let Some(ref cursor) = query.cursor {
            builder.push(match cursor.direction {
                Direction::Older => " AND mails.id < ",
                Direction::Newer => " AND mails.id > ",
            });
            builder.push_bind(cursor.id.clone());
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
             WHERE mails.is_read = $1 AND mails.is_deleted = $2
               AND (addresses.owner IS NULL OR addresses.owner = $3)
             GROUP BY mails.recipient
             ORDER BY mails.recipient ASC",
        )
        .bind(false)
        .bind(false)
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(recipient, unread)| UnreadCount { recipient, unread })
            .collect())
    }

    async fn mark_mail_as_read(&self, id: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE mails SET is_read = $1 WHERE id = $2 AND is_read = $3")
            .bind(true)
            .bind(id)
            .bind(false)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn mark_all_as_read(&self, recipient: &str) -> Result<u64> {
        let result =
            sqlx::query("UPDATE mails SET is_read = $1 WHERE recipient = $2 AND is_read = $3")
                .bind(true)
                .bind(normalize_address(recipient))
                .bind(false)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn soft_delete_mail(&self, id: &str) -> Result<u64> {
        let result =
            sqlx::query("UPDATE mails SET is_deleted = $1 WHERE id = $2 AND is_deleted = $3")
                .bind(true)
                .bind(id)
                .bind(false)
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
            "UPDATE mails SET is_deleted = $1 WHERE recipient = $2 AND is_deleted = $3",
        )
        .bind(true)
        .bind(normalize_address(recipient))
        .bind(false)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn empty_deleted_mails(&self, user: Option<&str>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM mails
             WHERE is_deleted = $1
               AND recipient IN (SELECT addr FROM addresses WHERE owner IS NULL OR owner = $2)",
        )
        .bind(true)
        .bind(user)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn restore_deleted_mails(&self, user: Option<&str>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE mails SET is_deleted = $1
             WHERE is_deleted = $2
               AND recipient IN (SELECT addr FROM addresses WHERE owner IS NULL OR owner = $3)",
        )
        .bind(false)
        .bind(true)
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
            sqlx::query_scalar("SELECT COUNT(*) FROM mails WHERE is_read = $1 AND is_deleted = $2")
                .bind(false)
                .bind(false)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
