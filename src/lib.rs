//! dispomail - Disposable email addresses
//!
//! Receives mail over SMTP for registered throwaway addresses, stores it in
//! SQLite or PostgreSQL, and pushes change notifications to connected
//! browsers over WebSocket.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod intake;
pub mod logging;
pub mod migrate;
pub mod push;
pub mod service;
pub mod smtp;
pub mod store;
pub mod web;

pub use config::Config;
pub use db::Database;
pub use error::{DispomailError, Result};
pub use events::{EventBus, EventSubscriber, MailEvent};
pub use intake::{IntakeOutcome, MailIntake};
pub use migrate::MigrationReport;
pub use push::{PushDispatcher, PushHub, PushMessage};
pub use service::MailboxService;
pub use smtp::SmtpServer;
pub use store::{
    Address, Cursor, Direction, Mail, MailPage, MailQuery, MailStore, NewMail, UnreadCount,
};
pub use web::{PushAuth, PushServer};
