//! Entities and query types shared by every store backend.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DispomailError, Result};

/// Default number of mails per page.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: u32 = 500;

/// Subject used when a message carries none.
pub const DEFAULT_SUBJECT: &str = "No Subject";

/// A registered disposable mailbox name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Lowercase mailbox name (local part only).
    pub addr: String,
    /// Owning user; `None` means public.
    pub owner: Option<String>,
}

impl Address {
    /// Visibility predicate: public, or owned by `user`.
    ///
    /// An anonymous caller (`None`) only sees public addresses.
    pub fn is_visible_to(&self, user: Option<&str>) -> bool {
        match (&self.owner, user) {
            (None, _) => true,
            (Some(owner), Some(user)) => owner == user,
            (Some(_), None) => false,
        }
    }

    /// Check if the address has no owner.
    pub fn is_public(&self) -> bool {
        self.owner.is_none()
    }
}

/// A stored mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mail {
    /// Time-ordered identifier; the only ordering key.
    pub id: String,
    /// Address this mail was delivered to.
    pub recipient: String,
    /// Sender address as displayed.
    pub sender: String,
    /// Sender display name, if the From header carried one.
    pub sender_name: Option<String>,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub content: String,
    /// Whether the owner has read the mail.
    pub read: bool,
    /// When the mail was received.
    pub received: DateTime<Utc>,
    /// Soft-delete flag ("deleted" folder).
    pub deleted: bool,
}

/// Mail to be stored. The id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMail {
    /// Recipient address (must already exist).
    pub recipient: String,
    /// Sender address.
    pub sender: String,
    /// Sender display name.
    pub sender_name: Option<String>,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub content: String,
    /// Message date; `None` lets the store use the write time.
    pub received: Option<DateTime<Utc>>,
}

impl NewMail {
    /// Create a new mail for `recipient`.
    pub fn new(
        recipient: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            sender: sender.into(),
            sender_name: None,
            subject: subject.into(),
            content: content.into(),
            received: None,
        }
    }

    /// Set the sender display name.
    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    /// Set the received timestamp.
    pub fn with_received(mut self, received: DateTime<Utc>) -> Self {
        self.received = Some(received);
        self
    }

    /// Received time in epoch milliseconds, falling back to `now` when the
    /// message date is missing or zero.
    pub fn received_millis(&self, now: DateTime<Utc>) -> i64 {
        match self.received.map(|r| r.timestamp_millis()) {
            Some(ms) if ms > 0 => ms,
            _ => now.timestamp_millis(),
        }
    }
}

/// Unread mail count for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    /// Recipient address.
    pub recipient: String,
    /// Number of unread, non-deleted mails.
    pub unread: i64,
}

/// Scan direction encoded in a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Older mail (`id < cursor`, newest first).
    Older,
    /// Newer mail (`id > cursor`, scanned oldest first).
    Newer,
}

impl Direction {
    /// Cursor prefix for this direction.
    pub fn prefix(&self) -> &'static str {
        match self {
            Direction::Older => "lt",
            Direction::Newer => "gt",
        }
    }
}

/// Pagination cursor: a direction plus a boundary mail id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// Scan direction.
    pub direction: Direction,
    /// Boundary mail id (exclusive).
    pub id: String,
}

impl Cursor {
    /// Cursor selecting mail older than `id`.
    pub fn older_than(id: impl Into<String>) -> Self {
        Self {
            direction: Direction::Older,
            id: id.into(),
        }
    }

    /// Cursor selecting mail newer than `id`.
    pub fn newer_than(id: impl Into<String>) -> Self {
        Self {
            direction: Direction::Newer,
            id: id.into(),
        }
    }

    /// Parse a cursor token.
    ///
    /// An empty token means "start from the newest" and yields `None`.
    pub fn parse(token: &str) -> Result<Option<Self>> {
        if token.is_empty() {
            return Ok(None);
        }

        let direction = match token.get(..2) {
            Some("lt") => Direction::Older,
            Some("gt") => Direction::Newer,
            _ => {
                return Err(DispomailError::Validation(format!(
                    "cursor must start with 'lt' or 'gt': {token}"
                )))
            }
        };
        // The prefix is ASCII, so byte 2 is a char boundary.
        let id = &token[2..];
        if id.is_empty() {
            return Err(DispomailError::Validation(format!(
                "cursor has no mail id: {token}"
            )));
        }

        Ok(Some(Self {
            direction,
            id: id.to_string(),
        }))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.direction.prefix(), self.id)
    }
}

/// Parameters for a paginated mail listing.
#[derive(Debug, Clone)]
pub struct MailQuery {
    /// Restrict to one recipient.
    pub recipient: Option<String>,
    /// `true` lists the deleted folder, `false` the inbox.
    pub deleted: bool,
    /// Where to start; `None` starts from the newest mail.
    pub cursor: Option<Cursor>,
    /// Maximum number of mails to return.
    pub page_size: u32,
    /// Caller identity for the ownership predicate.
    pub user: Option<String>,
}

impl MailQuery {
    /// First page of the inbox.
    pub fn inbox() -> Self {
        Self {
            recipient: None,
            deleted: false,
            cursor: None,
            page_size: DEFAULT_PAGE_SIZE,
            user: None,
        }
    }

    /// First page of the deleted folder.
    pub fn deleted() -> Self {
        Self {
            deleted: true,
            ..Self::inbox()
        }
    }

    /// Restrict to a recipient.
    pub fn for_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// Set the caller identity.
    pub fn for_user(mut self, user: Option<impl Into<String>>) -> Self {
        self.user = user.map(Into::into);
        self
    }

    /// Set the page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the cursor.
    pub fn with_cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Set the cursor from a wire token (`"lt<id>"` / `"gt<id>"` / empty).
    pub fn with_cursor_token(self, token: &str) -> Result<Self> {
        let cursor = Cursor::parse(token)?;
        Ok(self.with_cursor(cursor))
    }

    /// Scan direction implied by the cursor.
    pub fn direction(&self) -> Direction {
        self.cursor
            .as_ref()
            .map(|c| c.direction)
            .unwrap_or(Direction::Older)
    }

    /// Row limit after validation.
    pub fn limit(&self) -> Result<i64> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(DispomailError::Validation(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(i64::from(self.page_size))
    }
}

/// One page of mail, always newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailPage {
    /// Mails on this page.
    pub mails: Vec<Mail>,
    /// Cursor for the next (older) page; absent at the end of data.
    pub next_id: Option<String>,
    /// Cursor for newer mail; absent only for an empty page.
    pub previous_id: Option<String>,
}

impl MailPage {
    /// Build a page from rows in scan order.
    ///
    /// `Newer` scans run ascending and are flipped here so callers always
    /// see newest-first order.
    pub fn from_scan(mut rows: Vec<Mail>, direction: Direction, page_size: u32) -> Self {
        if direction == Direction::Newer {
            rows.reverse();
        }

        let next_id = if rows.len() < page_size as usize {
            None
        } else {
            rows.last().map(|m| Cursor::older_than(&m.id).to_string())
        };
        let previous_id = rows
            .first()
            .map(|m| Cursor::newer_than(&m.id).to_string());

        Self {
            mails: rows,
            next_id,
            previous_id,
        }
    }
}

/// Normalize an address for storage and lookup.
pub fn normalize_address(addr: &str) -> String {
    addr.trim().to_lowercase()
}

/// Normalize an address that is about to be created.
pub fn validate_new_address(addr: &str) -> Result<String> {
    let addr = normalize_address(addr);
    if addr.is_empty() {
        return Err(DispomailError::Validation(
            "address must not be empty".to_string(),
        ));
    }
    if addr.contains('@') || addr.chars().any(char::is_whitespace) {
        return Err(DispomailError::Validation(format!(
            "address must be a bare local part: {addr}"
        )));
    }
    Ok(addr)
}

/// Convert stored epoch milliseconds into a timestamp.
pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Database row for a mail, identical column set on every backend.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct MailRow {
    pub id: String,
    pub recipient: String,
    pub sender: String,
    pub sender_name: Option<String>,
    pub subject: String,
    pub content: String,
    pub is_read: bool,
    pub received: i64,
    pub is_deleted: bool,
}

impl From<MailRow> for Mail {
    fn from(row: MailRow) -> Self {
        Mail {
            id: row.id,
            recipient: row.recipient,
            sender: row.sender,
            sender_name: row.sender_name,
            subject: row.subject,
            content: row.content,
            read: row.is_read,
            received: millis_to_datetime(row.received),
            deleted: row.is_deleted,
        }
    }
}

/// Database row for an address.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct AddressRow {
    pub addr: String,
    pub owner: Option<String>,
}

impl From<AddressRow> for Address {
    fn from(row: AddressRow) -> Self {
        Address {
            addr: row.addr,
            owner: row.owner,
        }
    }
}

/// Column list matching [`MailRow`].
pub(crate) const MAIL_COLUMNS: &str =
    "id, recipient, sender, sender_name, subject, content, is_read, received, is_deleted";

#[cfg(test)]
mod tests {
    use super::*;

    fn mail(id: &str) -> Mail {
        Mail {
            id: id.to_string(),
            recipient: "box".to_string(),
            sender: "a@example.org".to_string(),
            sender_name: None,
            subject: "s".to_string(),
            content: String::new(),
            read: false,
            received: DateTime::UNIX_EPOCH,
            deleted: false,
        }
    }

    #[test]
    fn test_visibility_predicate() {
        let public = Address {
            addr: "box".to_string(),
            owner: None,
        };
        let owned = Address {
            addr: "box".to_string(),
            owner: Some("u1".to_string()),
        };

        assert!(public.is_visible_to(None));
        assert!(public.is_visible_to(Some("u1")));
        assert!(owned.is_visible_to(Some("u1")));
        assert!(!owned.is_visible_to(Some("u2")));
        assert!(!owned.is_visible_to(None));
    }

    #[test]
    fn test_cursor_parse() {
        assert_eq!(Cursor::parse("").unwrap(), None);
        assert_eq!(
            Cursor::parse("lt0192").unwrap(),
            Some(Cursor::older_than("0192"))
        );
        assert_eq!(
            Cursor::parse("gtabc").unwrap(),
            Some(Cursor::newer_than("abc"))
        );
    }

    #[test]
    fn test_cursor_parse_rejects_garbage() {
        assert!(matches!(
            Cursor::parse("xx123"),
            Err(DispomailError::Validation(_))
        ));
        assert!(matches!(
            Cursor::parse("lt"),
            Err(DispomailError::Validation(_))
        ));
        assert!(matches!(
            Cursor::parse("g"),
            Err(DispomailError::Validation(_))
        ));
    }

    #[test]
    fn test_cursor_display() {
        assert_eq!(Cursor::older_than("42").to_string(), "lt42");
        assert_eq!(Cursor::newer_than("42").to_string(), "gt42");
    }

    #[test]
    fn test_page_from_older_scan() {
        let page = MailPage::from_scan(vec![mail("3"), mail("2")], Direction::Older, 2);
        assert_eq!(page.mails[0].id, "3");
        assert_eq!(page.next_id.as_deref(), Some("lt2"));
        assert_eq!(page.previous_id.as_deref(), Some("gt3"));
    }

    #[test]
    fn test_page_from_newer_scan_is_reversed() {
        let page = MailPage::from_scan(vec![mail("4"), mail("5")], Direction::Newer, 3);
        let ids: Vec<_> = page.mails.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["5", "4"]);
        // Short page: end of data.
        assert_eq!(page.next_id, None);
        assert_eq!(page.previous_id.as_deref(), Some("gt5"));
    }

    #[test]
    fn test_empty_page() {
        let page = MailPage::from_scan(Vec::new(), Direction::Older, 10);
        assert!(page.mails.is_empty());
        assert_eq!(page.next_id, None);
        assert_eq!(page.previous_id, None);
    }

    #[test]
    fn test_page_serializes_camel_case() {
        let page = MailPage::from_scan(vec![mail("1")], Direction::Older, 1);
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["nextId"], "lt1");
        assert_eq!(json["previousId"], "gt1");
        assert!(json["mails"][0].get("senderName").is_some());
    }

    #[test]
    fn test_query_limit_bounds() {
        assert!(MailQuery::inbox().with_page_size(0).limit().is_err());
        assert!(MailQuery::inbox()
            .with_page_size(MAX_PAGE_SIZE + 1)
            .limit()
            .is_err());
        assert_eq!(MailQuery::inbox().with_page_size(5).limit().unwrap(), 5);
    }

    #[test]
    fn test_query_direction() {
        assert_eq!(MailQuery::inbox().direction(), Direction::Older);
        let q = MailQuery::inbox().with_cursor_token("gt1").unwrap();
        assert_eq!(q.direction(), Direction::Newer);
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("  Hello.World "), "hello.world");
        assert!(validate_new_address("").is_err());
        assert!(validate_new_address("a@b").is_err());
        assert_eq!(validate_new_address("MiXed").unwrap(), "mixed");
    }

    #[test]
    fn test_received_millis_falls_back_to_now() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let mail = NewMail::new("box", "a@b", "s", "c");
        assert_eq!(mail.received_millis(now), 1_700_000_000_000);

        let zero = mail.clone().with_received(DateTime::UNIX_EPOCH);
        assert_eq!(zero.received_millis(now), 1_700_000_000_000);

        let dated = mail.with_received(DateTime::from_timestamp_millis(5_000).unwrap());
        assert_eq!(dated.received_millis(now), 5_000);
    }
}
