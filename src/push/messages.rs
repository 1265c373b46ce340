//! Push message wire format.

use serde::{Deserialize, Serialize};

use crate::events::MailEvent;

/// Messages sent from server to push clients.
///
/// Serialized as `{"type": ..., "value": ...}`; owner-scoped notifications
/// carry no value since clients refetch what they display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum PushMessage {
    /// First frame after the connection is accepted.
    Connected,
    /// New mail for the address.
    Received(String),
    /// Mail of the address was read.
    Read(String),
    /// Mail of the address moved to the deleted folder.
    SoftDeleted(String),
    /// Mail of the address was permanently deleted.
    HardDeleted(String),
    /// Deleted folder emptied.
    BinEmptied,
    /// Deleted folder restored.
    BinRestored,
    /// Address list changed by an addition.
    AddressAdded,
    /// Address ownership changed.
    AddressUpdated,
    /// Address list changed by a deletion.
    AddressDeleted,
}

impl PushMessage {
    /// Serialize to JSON text.
    pub fn to_json(&self) -> String {
        // Only strings and unit variants; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<&MailEvent> for PushMessage {
    fn from(event: &MailEvent) -> Self {
        match event {
            MailEvent::Received(addr) => PushMessage::Received(addr.clone()),
            MailEvent::Read(addr) => PushMessage::Read(addr.clone()),
            MailEvent::SoftDeleted(addr) => PushMessage::SoftDeleted(addr.clone()),
            MailEvent::HardDeleted(addr) => PushMessage::HardDeleted(addr.clone()),
            MailEvent::BinEmptied(_) => PushMessage::BinEmptied,
            MailEvent::BinRestored(_) => PushMessage::BinRestored,
            MailEvent::AddressAdded(_) => PushMessage::AddressAdded,
            MailEvent::AddressUpdated(_) => PushMessage::AddressUpdated,
            MailEvent::AddressDeleted(_) => PushMessage::AddressDeleted,
        }
    }
}
