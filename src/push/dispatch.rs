//! Routing of bus events to push connections.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::hub::{Audience, PushHub};
use super::messages::PushMessage;
use crate::events::{EventScope, EventSubscriber, MailEvent};
use crate::store::MailStore;

/// Decides who hears about each event and hands it to the hub.
#[derive(Clone)]
pub struct PushDispatcher {
    hub: Arc<PushHub>,
    store: Arc<dyn MailStore>,
    auth_enabled: bool,
}

impl PushDispatcher {
    /// Create a new dispatcher.
    pub fn new(hub: Arc<PushHub>, store: Arc<dyn MailStore>, auth_enabled: bool) -> Self {
        Self {
            hub,
            store,
            auth_enabled,
        }
    }

    /// Audience for an event.
    ///
    /// Address-scoped events follow the address's current owner; an address
    /// that no longer exists (or cannot be looked up) reaches nobody.
    pub async fn audience_for(&self, event: &MailEvent) -> Audience {
        if !self.auth_enabled {
            return Audience::All;
        }

        match event.scope() {
            EventScope::Owner(None) => Audience::All,
            EventScope::Owner(Some(owner)) => Audience::Owner(owner.to_string()),
            EventScope::Address(addr) => match self.store.get_address(addr).await {
                Ok(Some(address)) => match address.owner {
                    Some(owner) => Audience::Owner(owner),
                    None => Audience::All,
                },
                Ok(None) => {
                    debug!("Dropping {}: address is gone", event);
                    Audience::Nobody
                }
                Err(e) => {
                    warn!("Dropping {}: owner lookup failed: {}", event, e);
                    Audience::Nobody
                }
            },
        }
    }

    /// Deliver one event. Returns the number of connections reached.
    pub async fn dispatch(&self, event: &MailEvent) -> usize {
        let audience = self.audience_for(event).await;
        let sent = self
            .hub
            .broadcast(&PushMessage::from(event), &audience)
            .await;
        debug!("Pushed {} to {} connections", event, sent);
        sent
    }
}

#[async_trait]
impl EventSubscriber for PushDispatcher {
    async fn handle(&self, event: &MailEvent) {
        self.dispatch(event).await;
    }
}

/// Periodically remove closed connections from `hub`.
pub fn spawn_sweeper(hub: Arc<PushHub>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = hub.sweep().await;
            if removed > 0 {
                debug!("Swept {} closed push connections", removed);
            }
        }
    })
}
