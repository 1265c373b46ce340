//! Database schema and migrations.
//!
//! Each backend has its own list; entry `i` is schema version `i + 1`.
//! The two lists must describe the same tables with the same semantics.

/// SQLite migrations.
pub const SQLITE_MIGRATIONS: &[&str] = &[
    // v1: addresses and mails
    r#"
CREATE TABLE addresses (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    addr        TEXT NOT NULL UNIQUE,
    owner       TEXT,                    -- NULL = public
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_addresses_owner ON addresses(owner);

CREATE TABLE mails (
    id          TEXT PRIMARY KEY,        -- UUIDv7, ordering key
    recipient   TEXT NOT NULL REFERENCES addresses(addr) ON DELETE CASCADE,
    sender      TEXT NOT NULL,
    sender_name TEXT,
    subject     TEXT NOT NULL,
    content     TEXT NOT NULL,
    is_read     BOOLEAN NOT NULL DEFAULT 0,
    received    INTEGER NOT NULL,        -- epoch milliseconds
    is_deleted  BOOLEAN NOT NULL DEFAULT 0
);

CREATE INDEX idx_mails_recipient ON mails(recipient, is_deleted, id);
CREATE INDEX idx_mails_deleted ON mails(is_deleted, id);
"#,
];

/// PostgreSQL migrations.
pub const POSTGRES_MIGRATIONS: &[&str] = &[
    // v1: addresses and mails
    r#"
CREATE TABLE addresses (
    seq         BIGSERIAL PRIMARY KEY,
    addr        TEXT COLLATE "C" NOT NULL UNIQUE,
    owner       TEXT COLLATE "C",
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX idx_addresses_owner ON addresses(owner);

CREATE TABLE mails (
    id          TEXT COLLATE "C" PRIMARY KEY,
    recipient   TEXT COLLATE "C" NOT NULL REFERENCES addresses(addr) ON DELETE CASCADE,
    sender      TEXT NOT NULL,
    sender_name TEXT,
    subject     TEXT NOT NULL,
    content     TEXT NOT NULL,
    is_read     BOOLEAN NOT NULL DEFAULT FALSE,
    received    BIGINT NOT NULL,
    is_deleted  BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE INDEX idx_mails_recipient ON mails(recipient, is_deleted, id);
CREATE INDEX idx_mails_deleted ON mails(is_deleted, id);
"#,
];
