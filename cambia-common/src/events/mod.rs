//! Store event system
//!
//! Provides the event definitions emitted by the result store and the
//! EventBus used to observe them.

mod upload_types;

pub use upload_types::{Counters, RowStatus, SessionOutcome};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events describing changes to the result store
///
/// Every event carries the id of the batch it belongs to so that
/// subscribers can drop stale events after a new batch starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StoreEvent {
    /// A new batch replaced the previous row set
    BatchStarted {
        batch_id: Uuid,
        file_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A row changed status
    RowUpdated {
        batch_id: Uuid,
        row: usize,
        filename: String,
        status: RowStatus,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Aggregate counters changed
    CountersChanged {
        batch_id: Uuid,
        counters: Counters,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A reply referenced a fingerprint with no known rows
    ReplyUnresolved {
        batch_id: Uuid,
        fingerprint: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The batch-wide error was set
    SessionFailed {
        batch_id: Uuid,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The transport session for the batch ended
    SessionClosed {
        batch_id: Uuid,
        outcome: SessionOutcome,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl StoreEvent {
    /// Batch the event belongs to
    pub fn batch_id(&self) -> Uuid {
        match self {
            StoreEvent::BatchStarted { batch_id, .. }
            | StoreEvent::RowUpdated { batch_id, .. }
            | StoreEvent::CountersChanged { batch_id, .. }
            | StoreEvent::ReplyUnresolved { batch_id, .. }
            | StoreEvent::SessionFailed { batch_id, .. }
            | StoreEvent::SessionClosed { batch_id, .. } => *batch_id,
        }
    }

    /// Event type name (matches the serde tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            StoreEvent::BatchStarted { .. } => "BatchStarted",
            StoreEvent::RowUpdated { .. } => "RowUpdated",
            StoreEvent::CountersChanged { .. } => "CountersChanged",
            StoreEvent::ReplyUnresolved { .. } => "ReplyUnresolved",
            StoreEvent::SessionFailed { .. } => "SessionFailed",
            StoreEvent::SessionClosed { .. } => "SessionClosed",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Distribution bus for store events
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block the store)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use cambia_common::events::{EventBus, StoreEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(StoreEvent::BatchStarted {
///     batch_id: uuid::Uuid::new_v4(),
///     file_count: 2,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(StoreEvent::BatchStarted { file_count: 2, .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered before the oldest are
    /// dropped for lagging subscribers.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: StoreEvent,
    ) -> Result<usize, broadcast::error::SendError<StoreEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: StoreEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
