//! Mail intake: from a raw message to stored mail and `received` events.
//!
//! Every distinct candidate mailbox (union of the `To` header and the SMTP
//! envelope) that names a registered address gets its own copy of the
//! message. Candidates without an address are dropped quietly; a message
//! matching nothing is still accepted so that senders cannot learn which
//! addresses exist.
//!
//! Store failures are reported to the caller only while no copy has been
//! stored. After the first copy is in, a failing candidate is logged and
//! listed in [`IntakeOutcome::failed`] and the message is still accepted, so
//! a sender retrying a transient failure never duplicates stored copies.

mod parse;
mod recipients;

pub use parse::{parse_message, ParsedMessage};
pub use recipients::{candidate_mailboxes, mailbox_name};

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::events::{EventBus, MailEvent};
use crate::store::{MailStore, NewMail};
use crate::{DispomailError, Result};

/// What happened to one inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeOutcome {
    /// Addresses that received a copy.
    pub delivered: Vec<String>,
    /// Candidates with no registered address.
    pub unmatched: Vec<String>,
    /// Candidates whose copy could not be stored after another one was.
    pub failed: Vec<String>,
}

impl IntakeOutcome {
    /// Check if at least one copy was stored.
    pub fn is_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}

/// Writes inbound messages through the store and announces them.
#[derive(Clone)]
pub struct MailIntake {
    store: Arc<dyn MailStore>,
    events: EventBus,
}

impl MailIntake {
    /// Create a new intake over `store`, publishing to `events`.
    pub fn new(store: Arc<dyn MailStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Handle one message received over SMTP.
    ///
    /// `envelope_recipients` are the `RCPT TO` arguments of the session.
    /// Errors: `Parse` for input that is not a message; store errors
    /// (notably `StoreUnavailable`) are propagated for the caller to map
    /// onto a transient failure.
    pub async fn handle_incoming_message(
        &self,
        raw: &[u8],
        envelope_recipients: &[String],
    ) -> Result<IntakeOutcome> {
        let parsed = parse_message(raw).map_err(|e| {
            warn!("Rejecting unparsable message ({} bytes): {}", raw.len(), e);
            e
        })?;

        let candidates = candidate_mailboxes(
            parsed.to.iter().map(String::as_str),
            envelope_recipients.iter().map(String::as_str),
        );

        let mut outcome = IntakeOutcome::default();
        for name in candidates {
            match self.deliver(&parsed, &name).await {
                Ok(true) => outcome.delivered.push(name),
                Ok(false) => outcome.unmatched.push(name),
                Err(e) if outcome.is_delivered() => {
                    warn!("Copy for {} lost after partial delivery: {}", name, e);
                    outcome.failed.push(name);
                }
                Err(e) => return Err(e),
            }
        }

        if !outcome.is_delivered() {
            debug!("Message matched no mailbox, accepting anyway");
        }
        Ok(outcome)
    }

    /// Store one copy for `name` and announce it.
    ///
    /// Returns `false` when `name` is not a registered address.
    async fn deliver(&self, parsed: &ParsedMessage, name: &str) -> Result<bool> {
        if self.store.get_address(name).await?.is_none() {
            debug!("No mailbox for recipient {}", name);
            return Ok(false);
        }

        let mut mail = NewMail::new(
            name,
            parsed.sender.as_str(),
            parsed.subject.as_str(),
            parsed.content.as_str(),
        );
        mail.sender_name = parsed.sender_name.clone();
        mail.received = parsed.date;

        match self.store.add_mail(&mail).await {
            Ok(stored) => {
                info!(
                    "Stored mail {} for {} from {}",
                    stored.id, stored.recipient, stored.sender
                );
                self.events.publish(MailEvent::Received(stored.recipient)).await;
                Ok(true)
            }
            // Address deleted between lookup and insert.
            Err(DispomailError::ForeignKeyViolation(_)) => {
                debug!("Mailbox {} vanished before delivery", name);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
