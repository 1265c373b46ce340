//! WebSocket transport for push notifications.

pub mod push;

pub use push::{push_ws_handler, PushIdentity, PushState};
