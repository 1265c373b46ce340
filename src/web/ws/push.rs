//! Push WebSocket handler.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        FromRequestParts, State, WebSocketUpgrade,
    },
    http::request::Parts,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::push::{PendingConnection, PushHub};
use crate::web::middleware::{AuthRejection, PushAuth};

/// State for the push WebSocket handler.
#[derive(Clone)]
pub struct PushState {
    /// Live connection registry.
    pub hub: Arc<PushHub>,
    /// Identity policy.
    pub auth: PushAuth,
}

impl PushState {
    /// Create a new push state.
    pub fn new(hub: Arc<PushHub>, auth: PushAuth) -> Self {
        Self { hub, auth }
    }
}

/// Identity of a push connection request, checked before the upgrade.
#[derive(Debug, Clone)]
pub struct PushIdentity(pub Option<String>);

#[axum::async_trait]
impl FromRequestParts<Arc<PushState>> for PushIdentity {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<PushState>,
    ) -> Result<Self, Self::Rejection> {
        state
            .auth
            .resolve_identity(&parts.headers, parts.uri.query())
            .map(PushIdentity)
            .map_err(|rejection| {
                tracing::debug!("Push connection rejected: {:?}", rejection);
                rejection
            })
    }
}

/// Push WebSocket handler.
///
/// GET /ws (with `Authorization: Bearer <jwt>` or `?token=<jwt>` when
/// auth is enabled)
pub async fn push_ws_handler(
    PushIdentity(identity): PushIdentity,
    State(state): State<Arc<PushState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let pending = PendingConnection::new(identity);
    ws.on_upgrade(move |socket| handle_socket(socket, state, pending))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<PushState>, pending: PendingConnection) {
    let mut connection = state.hub.open(pending).await;
    let id = connection.id();
    tracing::info!(
        "Push connection {} from {}",
        id,
        connection.identity().unwrap_or("anonymous")
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();

    loop {
        tokio::select! {
            outgoing = connection.recv() => {
                match outgoing {
                    Some(message) => {
                        if ws_sender.send(Message::Text(message.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!("Push connection closed by client: {}", id);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_sender.send(Message::Pong(data)).await;
                    }
                    // Clients have nothing to say; ignore anything else.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    state.hub.remove(id).await;
    tracing::debug!("Push connection ended: {}", id);
}
