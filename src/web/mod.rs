//! Push server over HTTP.
//!
//! A single WebSocket endpoint delivers [`crate::push::PushMessage`]s to
//! browsers; the REST API that browses mail lives outside this crate and
//! consumes [`crate::service::MailboxService`].

pub mod middleware;
pub mod router;
pub mod server;
pub mod ws;

pub use middleware::{JwtState, PushAuth};
pub use router::create_router;
pub use server::PushServer;
pub use ws::PushState;
