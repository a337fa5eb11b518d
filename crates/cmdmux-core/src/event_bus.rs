//! Event Bus - Central event distribution system
//!
//! All domain events flow through this bus, decoupling producers (queue,
//! dispatcher, protocol client) from consumers (CLI status line, loggers,
//! tests).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Event Bus                              │
//! │                                                                  │
//! │  Producers:                 Consumers:                           │
//! │  ├─ PriorityCommandQueue    ├─ EventSubscriber (sync, in order)  │
//! │  ├─ Dispatcher              └─ EventReceiver (broadcast, async)  │
//! │  └─ ProtocolClient                                               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Synchronous subscribers run inside `emit`, in registration order, before
//! the event is broadcast. They must not block.
//!
//! # Usage
//!
//! ```ignore
//! let event_bus = EventBus::new();
//! let sender = event_bus.sender();
//!
//! event_bus.register(Arc::new(MyStatusLine::default()));
//! let mut rx = event_bus.subscribe();
//!
//! sender.emit(DomainEvent::CacheInvalidated { key: "s1".into() });
//! while let Some(event) = rx.recv().await { ... }
//! ```

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::DomainEvent;

/// Default channel capacity for the event bus
const DEFAULT_CAPACITY: usize = 256;

/// Synchronous event consumer
///
/// Called on the emitting task; implementations should only record or
/// forward the event.
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &DomainEvent);
}

impl<F> EventSubscriber for F
where
    F: Fn(&DomainEvent) + Send + Sync,
{
    fn on_event(&self, event: &DomainEvent) {
        self(event)
    }
}

type SubscriberList = Arc<RwLock<Vec<Arc<dyn EventSubscriber>>>>;

/// Event Bus - Central hub for domain event distribution
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
    subscribers: SubscriberList,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus with custom broadcast capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Get a sender for emitting events
    ///
    /// The sender can be cloned and shared across threads/tasks.
    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Subscribe to receive events asynchronously
    ///
    /// Each receiver gets all events emitted after subscription.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe())
    }

    /// Register a synchronous subscriber
    ///
    /// Subscribers are invoked in registration order for every event.
    pub fn register(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Get the number of active subscribers (both kinds)
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count() + self.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event Sender - Used by components to emit domain events
///
/// Thread-safe and cheaply cloneable.
#[derive(Clone)]
pub struct EventSender {
    sender: broadcast::Sender<DomainEvent>,
    subscribers: SubscriberList,
}

impl EventSender {
    /// A sender wired to nothing, for components used standalone
    pub fn noop() -> Self {
        EventBus::new().sender()
    }

    /// Emit a domain event
    ///
    /// Returns the number of consumers that received the event.
    /// Returns 0 if there are no subscribers (not an error).
    pub fn emit(&self, event: DomainEvent) -> usize {
        let type_name = event.type_name();

        // Snapshot so a subscriber registering from inside a callback can't deadlock.
        let subscribers: Vec<Arc<dyn EventSubscriber>> = self.subscribers.read().clone();
        for subscriber in &subscribers {
            subscriber.on_event(&event);
        }

        let delivered = match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => 0,
        };
        let total = delivered + subscribers.len();

        debug!(
            event_type = type_name,
            receivers = total,
            "[EventBus] Emitted event"
        );
        total
    }

    /// Check if there are any subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0 || !self.subscribers.read().is_empty()
    }
}

/// Event Receiver - Used by async consumers
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    fn new(receiver: broadcast::Receiver<DomainEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next event (async)
    ///
    /// Returns `None` if the channel is closed.
    /// Handles lag gracefully by logging and continuing.
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        skipped_events = skipped,
                        "[EventBus] Receiver lagged, skipped {} events", skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("[EventBus] Channel closed");
                    return None;
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Option<DomainEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(
                    skipped_events = skipped,
                    "[EventBus] Receiver lagged on try_recv"
                );
                self.receiver.try_recv().ok()
            }
            Err(_) => None,
        }
    }

    /// Drain every event currently buffered
    pub fn drain(&mut self) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

// ============================================================================
// TESTS
// ============================================================================
