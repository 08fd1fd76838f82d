//! Library event types and EventBus
//!
//! Observers (progress displays, future HTTP streams) subscribe to the bus;
//! producers never depend on anyone listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Library event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LibraryEvent {
    /// An item was stored for the first time
    ItemRegistered {
        item_id: String,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// A known item was written again (rescan, move, enrichment)
    ItemUpdated {
        item_id: String,
        path: String,
        timestamp: DateTime<Utc>,
    },

    /// Item handed to the classification station
    ClassificationQueued {
        correlation_id: String,
        item_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Classifier succeeded and the enriched item was persisted
    ClassificationCompleted {
        correlation_id: String,
        item_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Classifier (or the write-back) failed for one item
    ClassificationFailed {
        correlation_id: String,
        item_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`LibraryEvent`]s
///
/// Slow subscribers lag and lose the oldest events rather than stalling
/// producers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LibraryEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use reel_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: LibraryEvent,
    ) -> Result<usize, broadcast::error::SendError<LibraryEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: LibraryEvent) {
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
