//! Location registry
//!
//! In-memory list of known pins used to answer "is there already a pin
//! here". Holds Main-tier snapshots; it does no locking of its own.

use vt_common::models::{Coordinate, Pin, PinId};

#[derive(Debug, Default)]
pub struct LocationRegistry {
    pins: Vec<Pin>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from pins already in the store, dropping coordinate duplicates
    pub fn load_from(pins: impl IntoIterator<Item = Pin>) -> Self {
        let mut registry = Self::new();
        for pin in pins {
            registry.register(pin);
        }
        registry
    }

    /// First pin at exactly this coordinate
    pub fn find_pin(&self, latitude: f64, longitude: f64) -> Option<&Pin> {
        let coordinate = Coordinate::new(latitude, longitude);
        self.pins.iter().find(|pin| pin.is_at(coordinate))
    }

    /// Add a pin unless one is already registered at its coordinate
    ///
    /// Returns `true` if the pin was added.
    pub fn register(&mut self, pin: Pin) -> bool {
        if self.find_pin(pin.latitude(), pin.longitude()).is_some() {
            return false;
        }
        tracing::debug!(pin_id = %pin.id(), coordinate = %pin.coordinate(), "Pin registered");
        self.pins.push(pin);
        true
    }

    pub fn unregister(&mut self, id: PinId) -> Option<Pin> {
        let index = self.pins.iter().position(|pin| pin.id() == id)?;
        Some(self.pins.remove(index))
    }

    /// Replace the stored snapshot of a pin already registered
    pub fn refresh(&mut self, pin: Pin) -> bool {
        match self.pins.iter_mut().find(|existing| existing.id() == pin.id()) {
            Some(existing) => {
                *existing = pin;
                true
            }
            None => false,
        }
    }

    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn clear(&mut self) {
        self.pins.clear();
    }
}
