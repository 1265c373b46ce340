//! Real-time notification fan-out.
//!
//! [`PushHub`] holds the live connections, [`PushDispatcher`] turns bus
//! events into [`PushMessage`]s for the right audience. The WebSocket
//! transport lives in [`crate::web`].

mod dispatch;
mod hub;
mod messages;

pub use dispatch::{spawn_sweeper, PushDispatcher};
pub use hub::{
    Audience, ConnectionState, OpenConnection, PendingConnection, PushHub, DEFAULT_QUEUE_CAPACITY,
};
pub use messages::PushMessage;
