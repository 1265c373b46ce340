//! SMTP intake server.
//!
//! Accepts mail over plain SMTP and hands each message to
//! [`crate::intake::MailIntake`]. No relaying, no AUTH, no TLS.

pub mod command;
pub mod listener;
pub mod session;

pub use command::Command;
pub use listener::{ConnectionPermit, SmtpServer};
pub use session::{reply_for, SmtpSession};
