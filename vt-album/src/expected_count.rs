//! Expected photo count for the viewed pin
//!
//! Shared between the acquisition protocol (which sets it once a page is
//! sized) and the caller (which decrements it on deletions and resets it on
//! navigation). Readers watch it; every change is also broadcast.

use chrono::Utc;
use tokio::sync::watch;
use vt_common::events::{EventBus, TouristEvent};
use vt_common::models::PinId;

#[derive(Clone)]
pub struct ExpectedCount {
    tx: watch::Sender<usize>,
    event_bus: EventBus,
}

impl ExpectedCount {
    pub fn new(event_bus: EventBus) -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx, event_bus }
    }

    pub fn get(&self) -> usize {
        *self.tx.borrow()
    }

    /// Watch for changes
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.tx.subscribe()
    }

    pub fn set(&self, pin: PinId, count: usize) {
        self.tx.send_replace(count);
        self.publish(Some(pin), count);
    }

    /// One fewer photo expected; stays at zero
    pub fn decrement(&self, pin: PinId) -> usize {
        let mut updated = 0;
        self.tx.send_modify(|count| {
            *count = count.saturating_sub(1);
            updated = *count;
        });
        self.publish(Some(pin), updated);
        updated
    }

    pub fn reset(&self) {
        self.tx.send_replace(0);
        self.publish(None, 0);
    }

    fn publish(&self, pin_id: Option<PinId>, count: usize) {
        tracing::debug!(pin_id = ?pin_id, count, "Expected count changed");
        self.event_bus.emit_lossy(TouristEvent::ExpectedCountChanged {
            pin_id,
            count,
            timestamp: Utc::now(),
        });
    }
}
