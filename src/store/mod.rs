//! Address and mail store.
//!
//! [`MailStore`] is the single capability interface over persisted
//! addresses and mail. Two independent implementations exist:
//! [`SqliteStore`] for the embedded single-file engine and
//! [`PostgresStore`] for a client/server deployment. Both must behave
//! identically: same errors, same ordering, same pagination and the same
//! ownership filtering. `tests/store_conformance.rs` runs one suite against
//! both.
//!
//! Every operation is individually atomic. There are no cross-call
//! transactions; callers that check ownership and then mutate must accept
//! last-writer-wins under races.

mod access;
mod id;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;
mod types;

pub use access::{authorize_address, authorize_mail, can_modify_address};
pub use id::{id_timestamp_millis, MailIdGenerator};
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use types::{
    normalize_address, validate_new_address, Address, Cursor, Direction, Mail, MailPage,
    MailQuery, NewMail, UnreadCount, DEFAULT_PAGE_SIZE, DEFAULT_SUBJECT, MAX_PAGE_SIZE,
};
pub(crate) use types::{millis_to_datetime, AddressRow, MailRow, MAIL_COLUMNS};

use async_trait::async_trait;

use crate::Result;

/// Operations over persisted addresses and mail.
///
/// Address arguments are normalized (trimmed, lowercased) by every
/// implementation. `user` arguments apply the visibility predicate
/// `owner IS NULL OR owner = user`; `None` therefore sees public addresses
/// only.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Short backend name ("sqlite" or "postgres").
    fn backend_name(&self) -> &'static str;

    /// Register an unowned address. Registering an existing address is a
    /// no-op and leaves its owner untouched.
    async fn add_address(&self, addr: &str) -> Result<()>;

    /// Look up an address.
    async fn get_address(&self, addr: &str) -> Result<Option<Address>>;

    /// All addresses visible to `user`, in creation order.
    async fn get_addresses(&self, user: Option<&str>) -> Result<Vec<Address>>;

    /// Set or clear the owner. Returns the number of addresses changed.
    async fn update_address_owner(&self, addr: &str, owner: Option<&str>) -> Result<u64>;

    /// Delete an address together with all of its mail, atomically.
    /// Returns the number of addresses removed.
    async fn delete_address(&self, addr: &str) -> Result<u64>;

    /// Store a mail and return it with its assigned id.
    ///
    /// Fails with `ForeignKeyViolation` when the recipient does not exist.
    async fn add_mail(&self, mail: &NewMail) -> Result<Mail>;

    /// Look up a mail by id.
    async fn get_mail(&self, id: &str) -> Result<Option<Mail>>;

    /// One page of mail, newest first.
    async fn get_mails(&self, query: &MailQuery) -> Result<MailPage>;

    /// Every visible mail, newest first. Used for bulk export.
    async fn get_all_mails(&self, user: Option<&str>) -> Result<Vec<Mail>>;

    /// Unread, non-deleted mail counts per visible recipient.
    async fn get_unread(&self, user: Option<&str>) -> Result<Vec<UnreadCount>>;

    /// Mark one mail as read.
    async fn mark_mail_as_read(&self, id: &str) -> Result<u64>;

    /// Mark every mail of a recipient as read.
    async fn mark_all_as_read(&self, recipient: &str) -> Result<u64>;

    /// Move a mail to the deleted folder.
    async fn soft_delete_mail(&self, id: &str) -> Result<u64>;

    /// Permanently delete a mail.
    async fn delete_mail(&self, id: &str) -> Result<u64>;

    /// Move every live mail of a recipient to the deleted folder.
    async fn delete_mails_for_address(&self, recipient: &str) -> Result<u64>;

    /// Permanently delete the deleted folder of every visible address.
    async fn empty_deleted_mails(&self, user: Option<&str>) -> Result<u64>;

    /// Restore the deleted folder of every visible address.
    async fn restore_deleted_mails(&self, user: Option<&str>) -> Result<u64>;

    /// Number of registered addresses.
    async fn get_address_count(&self) -> Result<i64>;

    /// Number of unread, non-deleted mails across all addresses.
    async fn get_unread_mails_count(&self) -> Result<i64>;
}
