//! In-process domain event bus.
//!
//! Built once at startup and handed to every publisher (intake, the
//! mailbox service) and subscriber (push fan-out). `publish` hands the
//! event to every subscriber registered at that moment and returns only
//! after each of them handled it. There is no queue, persistence or replay.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A change to addresses or mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailEvent {
    /// A mail was stored for the address.
    Received(String),
    /// Mail of the address was marked read.
    Read(String),
    /// Mail of the address was moved to the deleted folder.
    SoftDeleted(String),
    /// Mail of the address was permanently deleted.
    HardDeleted(String),
    /// The deleted folder was emptied for the owner.
    BinEmptied(Option<String>),
    /// The deleted folder was restored for the owner.
    BinRestored(Option<String>),
    /// An address was registered.
    AddressAdded(Option<String>),
    /// An address changed owner.
    AddressUpdated(Option<String>),
    /// An address was deleted.
    AddressDeleted(Option<String>),
}

/// Who an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventScope<'a> {
    /// Scoped to an address; its current owner decides the audience.
    Address(&'a str),
    /// Scoped to an owner directly (`None` = public).
    Owner(Option<&'a str>),
}

impl MailEvent {
    /// Event name as used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            MailEvent::Received(_) => "received",
            MailEvent::Read(_) => "read",
            MailEvent::SoftDeleted(_) => "softDeleted",
            MailEvent::HardDeleted(_) => "hardDeleted",
            MailEvent::BinEmptied(_) => "binEmptied",
            MailEvent::BinRestored(_) => "binRestored",
            MailEvent::AddressAdded(_) => "addressAdded",
            MailEvent::AddressUpdated(_) => "addressUpdated",
            MailEvent::AddressDeleted(_) => "addressDeleted",
        }
    }

    /// Audience selector for this event.
    pub fn scope(&self) -> EventScope<'_> {
        match self {
            MailEvent::Received(addr)
            | MailEvent::Read(addr)
            | MailEvent::SoftDeleted(addr)
            | MailEvent::HardDeleted(addr) => EventScope::Address(addr),
            MailEvent::BinEmptied(owner)
            | MailEvent::BinRestored(owner)
            | MailEvent::AddressAdded(owner)
            | MailEvent::AddressUpdated(owner)
            | MailEvent::AddressDeleted(owner) => EventScope::Owner(owner.as_deref()),
        }
    }
}

impl fmt::Display for MailEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope() {
            EventScope::Address(addr) => write!(f, "{}({})", self.name(), addr),
            EventScope::Owner(Some(owner)) => write!(f, "{}(owner={})", self.name(), owner),
            EventScope::Owner(None) => write!(f, "{}", self.name()),
        }
    }
}

/// Receiver side of the bus.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Handle one published event. Runs before `publish` returns.
    async fn handle(&self, event: &MailEvent);
}

/// Subscriber that forwards events into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    sender: mpsc::UnboundedSender<MailEvent>,
}

#[async_trait]
impl EventSubscriber for ChannelSubscriber {
    async fn handle(&self, event: &MailEvent) {
        // Receiver gone means nobody listens any more.
        let _ = self.sender.send(event.clone());
    }
}

/// Publish/subscribe hub for [`MailEvent`]s.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Arc<dyn EventSubscriber>>>>,
}

impl EventBus {
    /// Create a new bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event to every current subscriber, in registration order.
    ///
    /// Returns once all of them handled it, with the number of subscribers
    /// reached. Publishing with no subscribers is not an error.
    pub async fn publish(&self, event: MailEvent) -> usize {
        tracing::trace!("Publishing {}", event);
        let subscribers: Vec<Arc<dyn EventSubscriber>> = self.read().clone();
        for subscriber in &subscribers {
            subscriber.handle(&event).await;
        }
        subscribers.len()
    }

    /// Register a subscriber for events published from now on.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.write().push(subscriber);
    }

    /// Register a channel and get its receiving end.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<MailEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribe(Arc::new(ChannelSubscriber { sender }));
        receiver
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.read().len()
    }

    // The lock only guards a Vec of Arcs; a poisoned one is still usable.
    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<dyn EventSubscriber>>> {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<dyn EventSubscriber>>> {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
