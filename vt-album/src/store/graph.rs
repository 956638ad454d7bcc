//! Object graph and change sets
//!
//! Every tier holds an [`ObjectGraph`]; what travels between tiers is a
//! [`ChangeSet`]. Relationships live on the photo side (`PhotoRecord::pin`)
//! and the graph keeps a pin → photos index so both directions stay in step.

use std::collections::{BTreeMap, BTreeSet};
use vt_common::models::{Photo, PhotoId, PhotoRecord, Pin, PinId, PinRecord, TierKind};

/// Pending inserts, updates and deletions not yet pushed to the parent tier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pins: BTreeMap<PinId, PinRecord>,
    photos: BTreeMap<PhotoId, PhotoRecord>,
    deleted_pins: BTreeSet<PinId>,
    deleted_photos: BTreeSet<PhotoId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
            && self.photos.is_empty()
            && self.deleted_pins.is_empty()
            && self.deleted_photos.is_empty()
    }

    pub fn upsert_pin(&mut self, pin: PinRecord) {
        self.deleted_pins.remove(&pin.id);
        self.pins.insert(pin.id, pin);
    }

    pub fn upsert_photo(&mut self, photo: PhotoRecord) {
        self.deleted_photos.remove(&photo.id);
        self.photos.insert(photo.id, photo);
    }

    pub fn delete_pin(&mut self, id: PinId) {
        self.pins.remove(&id);
        self.deleted_pins.insert(id);
    }

    pub fn delete_photo(&mut self, id: PhotoId) {
        self.photos.remove(&id);
        self.deleted_photos.insert(id);
    }

    /// Fold a newer change set on top of this one
    pub fn merge(&mut self, newer: ChangeSet) {
        for id in newer.deleted_photos {
            self.delete_photo(id);
        }
        for id in newer.deleted_pins {
            self.delete_pin(id);
        }
        for (_, pin) in newer.pins {
            self.upsert_pin(pin);
        }
        for (_, photo) in newer.photos {
            self.upsert_photo(photo);
        }
    }

    /// Split off photo upserts that have no image bytes yet
    ///
    /// Returns `(ready, deferred)`. `deferred` only ever holds photo upserts;
    /// everything else is ready to be written.
    pub fn split_imageless(mut self) -> (ChangeSet, ChangeSet) {
        let mut deferred = ChangeSet::default();
        let imageless: Vec<PhotoId> = self
            .photos
            .values()
            .filter(|photo| !photo.has_image())
            .map(|photo| photo.id)
            .collect();

        for id in imageless {
            if let Some(photo) = self.photos.remove(&id) {
                deferred.photos.insert(id, photo);
            }
        }

        (self, deferred)
    }

    pub fn pin_upserts(&self) -> impl Iterator<Item = &PinRecord> {
        self.pins.values()
    }

    pub fn photo_upserts(&self) -> impl Iterator<Item = &PhotoRecord> {
        self.photos.values()
    }

    pub fn pin_deletions(&self) -> impl Iterator<Item = PinId> + '_ {
        self.deleted_pins.iter().copied()
    }

    pub fn photo_deletions(&self) -> impl Iterator<Item = PhotoId> + '_ {
        self.deleted_photos.iter().copied()
    }

    pub(crate) fn pin_upsert(&self, id: PinId) -> Option<&PinRecord> {
        self.pins.get(&id)
    }

    pub(crate) fn photo_upsert(&self, id: PhotoId) -> Option<&PhotoRecord> {
        self.photos.get(&id)
    }

    pub(crate) fn is_pin_deleted(&self, id: PinId) -> bool {
        self.deleted_pins.contains(&id)
    }

    pub(crate) fn is_photo_deleted(&self, id: PhotoId) -> bool {
        self.deleted_photos.contains(&id)
    }

    /// Number of row-level operations carried
    pub fn len(&self) -> usize {
        self.pins.len() + self.photos.len() + self.deleted_pins.len() + self.deleted_photos.len()
    }
}

/// In-memory state of one tier
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    pins: BTreeMap<PinId, PinRecord>,
    /// Creation order, used for stable listing
    pin_order: Vec<PinId>,
    photos: BTreeMap<PhotoId, PhotoRecord>,
    photo_order: Vec<PhotoId>,
    pin_photos: BTreeMap<PinId, BTreeSet<PhotoId>>,
}

impl ObjectGraph {
    /// Build from rows loaded off disk
    ///
    /// Photos whose pin is missing are dropped.
    pub fn from_records(pins: Vec<PinRecord>, photos: Vec<PhotoRecord>) -> Self {
        let mut graph = ObjectGraph::default();
        for pin in pins {
            graph.put_pin(pin);
        }
        for photo in photos {
            if graph.pins.contains_key(&photo.pin) {
                graph.put_photo(photo);
            } else {
                tracing::warn!(photo_id = %photo.id, pin_id = %photo.pin, "Dropping photo without pin");
            }
        }
        graph
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty() && self.photos.is_empty()
    }

    pub fn pin_count(&self) -> usize {
        self.pins.len()
    }

    pub fn photo_count(&self) -> usize {
        self.photos.len()
    }

    pub fn pin_record(&self, id: PinId) -> Option<&PinRecord> {
        self.pins.get(&id)
    }

    pub fn photo_record(&self, id: PhotoId) -> Option<&PhotoRecord> {
        self.photos.get(&id)
    }

    /// Photo ids owned by a pin
    pub fn photo_ids_of(&self, pin: PinId) -> BTreeSet<PhotoId> {
        self.pin_photos.get(&pin).cloned().unwrap_or_default()
    }

    pub fn pin_ids(&self) -> impl Iterator<Item = PinId> + '_ {
        self.pin_order.iter().copied()
    }

    /// Pin view tagged with `tier`
    pub fn pin(&self, id: PinId, tier: TierKind) -> Option<Pin> {
        self.pins
            .get(&id)
            .map(|record| Pin::from_record(record, self.photo_ids_of(id), tier))
    }

    /// Photo view tagged with `tier`
    pub fn photo(&self, id: PhotoId, tier: TierKind) -> Option<Photo> {
        self.photos
            .get(&id)
            .map(|record| Photo::from_record(record.clone(), tier))
    }

    /// All pins in creation order
    pub fn pins(&self, tier: TierKind) -> Vec<Pin> {
        self.pin_order
            .iter()
            .filter_map(|id| self.pin(*id, tier))
            .collect()
    }

    /// Photos of one pin in creation order
    pub fn photos_of(&self, pin: PinId, tier: TierKind) -> Vec<Photo> {
        let owned = match self.pin_photos.get(&pin) {
            Some(owned) => owned,
            None => return Vec::new(),
        };
        self.photo_order
            .iter()
            .filter(|id| owned.contains(id))
            .filter_map(|id| self.photo(*id, tier))
            .collect()
    }

    /// Apply a change set: upserts first, then deletions
    ///
    /// Deleting a pin also removes every photo it still owns.
    pub fn apply(&mut self, changes: &ChangeSet) {
        for pin in changes.pin_upserts() {
            self.put_pin(pin.clone());
        }
        for photo in changes.photo_upserts() {
            self.put_photo(photo.clone());
        }
        for id in changes.photo_deletions() {
            self.remove_photo(id);
        }
        for id in changes.pin_deletions() {
            self.remove_pin(id);
        }
    }

    fn put_pin(&mut self, pin: PinRecord) {
        if !self.pins.contains_key(&pin.id) {
            self.pin_order.push(pin.id);
        }
        self.pin_photos.entry(pin.id).or_default();
        self.pins.insert(pin.id, pin);
    }

    fn put_photo(&mut self, photo: PhotoRecord) {
        match self.photos.get(&photo.id) {
            Some(existing) if existing.pin != photo.pin => {
                if let Some(owned) = self.pin_photos.get_mut(&existing.pin) {
                    owned.remove(&photo.id);
                }
            }
            Some(_) => {}
            None => self.photo_order.push(photo.id),
        }
        self.pin_photos.entry(photo.pin).or_default().insert(photo.id);
        self.photos.insert(photo.id, photo);
    }

    fn remove_photo(&mut self, id: PhotoId) {
        if let Some(photo) = self.photos.remove(&id) {
            if let Some(owned) = self.pin_photos.get_mut(&photo.pin) {
                owned.remove(&id);
            }
            self.photo_order.retain(|other| *other != id);
        }
    }

    fn remove_pin(&mut self, id: PinId) {
        for photo_id in self.photo_ids_of(id) {
            self.remove_photo(photo_id);
        }
        self.pin_photos.remove(&id);
        if self.pins.remove(&id).is_some() {
            self.pin_order.retain(|other| *other != id);
        }
    }
}
