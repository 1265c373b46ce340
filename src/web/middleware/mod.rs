//! Request-level middleware for the push server.

pub mod auth;

pub use auth::{request_token, AuthRejection, JwtClaims, JwtState, PushAuth};
