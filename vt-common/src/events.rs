//! Event types for the Virtual Tourist event system
//!
//! The UI collaborator never polls the core for progress. It subscribes to the
//! [`EventBus`] and reacts to [`TouristEvent`]s as pins are created, photo
//! batches are sized, individual photos arrive, and batches complete.

use crate::models::{PhotoId, PinId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Virtual Tourist event types
///
/// Within one photo batch the order is fixed: `ExpectedCountChanged` first,
/// then `PhotoAdded`/`PhotoArrived`/`PhotoDiscarded` as they happen, and
/// `BatchCompleted` last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TouristEvent {
    /// A new pin was created and registered
    PinCreated {
        pin_id: PinId,
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
    },

    /// A pin and all of its photos were deleted
    PinDeleted {
        pin_id: PinId,
        timestamp: DateTime<Utc>,
    },

    /// Number of photos the viewed pin should end up with changed
    ///
    /// `pin_id` is `None` when the count was reset because the viewed pin changed.
    ExpectedCountChanged {
        pin_id: Option<PinId>,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A photo placeholder (no image bytes yet) was attached to a pin
    PhotoAdded {
        pin_id: PinId,
        photo_id: PhotoId,
        title: String,
        timestamp: DateTime<Utc>,
    },

    /// Image bytes for a photo were fetched and attached
    PhotoArrived {
        pin_id: PinId,
        photo_id: PhotoId,
        timestamp: DateTime<Utc>,
    },

    /// A photo was removed before its bytes could be attached
    PhotoDiscarded {
        pin_id: PinId,
        photo_id: PhotoId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A photo batch finished
    ///
    /// `reason` is a human-readable explanation when `success` is false.
    BatchCompleted {
        pin_id: PinId,
        success: bool,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// All stored data was wiped and the store recreated empty
    StoreReset { timestamp: DateTime<Utc> },
}

impl TouristEvent {
    /// Pin the event refers to, if any
    pub fn pin_id(&self) -> Option<PinId> {
        match self {
            TouristEvent::PinCreated { pin_id, .. }
            | TouristEvent::PinDeleted { pin_id, .. }
            | TouristEvent::PhotoAdded { pin_id, .. }
            | TouristEvent::PhotoArrived { pin_id, .. }
            | TouristEvent::PhotoDiscarded { pin_id, .. }
            | TouristEvent::BatchCompleted { pin_id, .. } => Some(*pin_id),
            TouristEvent::ExpectedCountChanged { pin_id, .. } => *pin_id,
            TouristEvent::StoreReset { .. } => None,
        }
    }
}

/// Broadcast channel for [`TouristEvent`]s
///
/// Cloning is cheap; every clone publishes into the same channel.
///
/// # Examples
///
/// ```
/// use vt_common::events::{EventBus, TouristEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(TouristEvent::StoreReset {
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(matches!(rx.try_recv(), Ok(TouristEvent::StoreReset { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TouristEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per receiver
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<TouristEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: TouristEvent,
    ) -> Result<usize, broadcast::error::SendError<TouristEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the case where nobody is listening
    pub fn emit_lossy(&self, event: TouristEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
