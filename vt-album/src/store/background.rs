//! Background tier
//!
//! All mutation happens here, one batch at a time, on a dedicated worker
//! thread. A batch sees the Background graph through a [`BackgroundContext`]
//! that records its changes in a batch-local [`ChangeSet`]. Only when the
//! batch returns `Ok` are the changes applied to the Background graph and
//! pushed into the Main tier; a failed batch leaves no trace.

use super::graph::{ChangeSet, ObjectGraph};
use super::main_tier::MainTier;
use crate::error::{StoreError, StoreResult};
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};
use vt_common::models::{
    Coordinate, Photo, PhotoId, PhotoRecord, Pin, PinId, PinRecord, TierKind,
};

const TIER: TierKind = TierKind::Background;

/// Unit of work queued for the worker thread
pub(crate) type Job = Box<dyn FnOnce(&mut BackgroundWorker) + Send + 'static>;

/// Counters proving batches never overlap
#[derive(Debug, Default)]
pub(crate) struct BatchStats {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicU64,
    aborted: AtomicU64,
}

/// Point-in-time copy of the batch counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchStatsSnapshot {
    /// Highest number of batches ever observed executing at once
    pub max_in_flight: usize,
    /// Batches that returned `Ok` and were pushed to the Main tier
    pub completed: u64,
    /// Batches that returned an error or panicked; their changes were discarded
    pub aborted: u64,
}

impl BatchStats {
    pub(crate) fn snapshot(&self) -> BatchStatsSnapshot {
        BatchStatsSnapshot {
            max_in_flight: self.max_in_flight.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            aborted: self.aborted.load(Ordering::SeqCst),
        }
    }

    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { stats: self }
    }
}

struct InFlightGuard<'a> {
    stats: &'a BatchStats,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Exclusive view of the Background tier for the duration of one batch
pub struct BackgroundContext<'a> {
    base: &'a ObjectGraph,
    changes: ChangeSet,
    new_pins: Vec<PinId>,
    new_photos: Vec<PhotoId>,
}

impl<'a> BackgroundContext<'a> {
    fn new(base: &'a ObjectGraph) -> Self {
        Self {
            base,
            changes: ChangeSet::default(),
            new_pins: Vec::new(),
            new_photos: Vec::new(),
        }
    }

    fn into_changes(self) -> ChangeSet {
        self.changes
    }

    fn pin_record(&self, id: PinId) -> Option<&PinRecord> {
        if self.changes.is_pin_deleted(id) {
            return None;
        }
        self.changes
            .pin_upsert(id)
            .or_else(|| self.base.pin_record(id))
    }

    fn photo_record(&self, id: PhotoId) -> Option<&PhotoRecord> {
        if self.changes.is_photo_deleted(id) {
            return None;
        }
        self.changes
            .photo_upsert(id)
            .or_else(|| self.base.photo_record(id))
    }

    fn photo_ids_of(&self, pin: PinId) -> BTreeSet<PhotoId> {
        let mut ids = self.base.photo_ids_of(pin);
        ids.extend(
            self.changes
                .photo_upserts()
                .filter(|photo| photo.pin == pin)
                .map(|photo| photo.id),
        );
        ids.retain(|id| !self.changes.is_photo_deleted(*id));
        ids
    }

    /// Pin by identity, as seen from this tier
    pub fn pin(&self, id: PinId) -> Option<Pin> {
        self.pin_record(id)
            .map(|record| Pin::from_record(record, self.photo_ids_of(id), TIER))
    }

    /// Photo by identity, as seen from this tier
    pub fn photo(&self, id: PhotoId) -> Option<Photo> {
        self.photo_record(id)
            .map(|record| Photo::from_record(record.clone(), TIER))
    }

    /// Pin by identity; absence is an identity resolution failure
    pub fn existing_pin(&self, id: PinId) -> StoreResult<Pin> {
        self.pin(id).ok_or_else(|| StoreError::IdentityResolution {
            entity: "pin",
            id: id.to_string(),
            tier: TIER,
        })
    }

    /// Photo by identity; absence is an identity resolution failure
    pub fn existing_photo(&self, id: PhotoId) -> StoreResult<Photo> {
        self.photo(id).ok_or_else(|| StoreError::IdentityResolution {
            entity: "photo",
            id: id.to_string(),
            tier: TIER,
        })
    }

    /// Re-fetch a pin handle from any tier as a Background handle
    pub fn resolve_pin(&self, pin: &Pin) -> StoreResult<Pin> {
        self.existing_pin(pin.id())
    }

    /// Re-fetch a photo handle from any tier as a Background handle
    pub fn resolve_photo(&self, photo: &Photo) -> StoreResult<Photo> {
        self.existing_photo(photo.id())
    }

    /// All pins in creation order
    pub fn pins(&self) -> Vec<Pin> {
        self.base
            .pin_ids()
            .chain(self.new_pins.iter().copied())
            .filter_map(|id| self.pin(id))
            .collect()
    }

    pub fn pin_at(&self, coordinate: Coordinate) -> Option<Pin> {
        self.pins().into_iter().find(|pin| pin.is_at(coordinate))
    }

    /// Photos owned by `pin`, oldest first
    pub fn photos_of(&self, pin: &Pin) -> StoreResult<Vec<Photo>> {
        expect_tier("pin", pin.tier())?;
        let owned = self.photo_ids_of(pin.id());
        let mut photos: Vec<Photo> = self
            .base
            .photos_of(pin.id(), TIER)
            .into_iter()
            .filter(|photo| owned.contains(&photo.id()))
            .filter_map(|photo| self.photo(photo.id()))
            .collect();
        photos.extend(
            self.new_photos
                .iter()
                .filter(|id| owned.contains(id))
                .filter_map(|id| self.photo(*id)),
        );
        Ok(photos)
    }

    /// Create a pin, or return the one already at this exact coordinate
    pub fn insert_pin(&mut self, coordinate: Coordinate) -> Pin {
        if let Some(existing) = self.pin_at(coordinate) {
            debug!(pin_id = %existing.id(), %coordinate, "Pin already exists at coordinate");
            return existing;
        }

        let record = PinRecord {
            id: PinId::new(),
            coordinate,
        };
        let pin = Pin::from_record(&record, BTreeSet::new(), TIER);
        self.new_pins.push(record.id);
        self.changes.upsert_pin(record);
        pin
    }

    /// Create a photo owned by `pin`; image bytes start out absent
    ///
    /// Sets both sides of the relationship in one step: the returned photo
    /// points at the pin and the pin's photo set contains the photo.
    pub fn insert_photo(&mut self, pin: &Pin, title: impl Into<String>) -> StoreResult<Photo> {
        expect_tier("pin", pin.tier())?;
        let owner = self.existing_pin(pin.id())?;

        let record = PhotoRecord {
            id: PhotoId::new(),
            pin: owner.id(),
            title: title.into(),
            image: None,
        };
        let photo = Photo::from_record(record.clone(), TIER);
        self.new_photos.push(record.id);
        self.changes.upsert_photo(record);
        Ok(photo)
    }

    /// Attach image bytes to a photo
    pub fn set_photo_image(&mut self, photo: &Photo, image: Vec<u8>) -> StoreResult<Photo> {
        expect_tier("photo", photo.tier())?;
        let mut record = self.existing_photo(photo.id())?.record().clone();
        record.image = Some(image);
        let updated = Photo::from_record(record.clone(), TIER);
        self.changes.upsert_photo(record);
        Ok(updated)
    }

    pub fn delete_photo(&mut self, photo: &Photo) -> StoreResult<()> {
        expect_tier("photo", photo.tier())?;
        let existing = self.existing_photo(photo.id())?;
        self.changes.delete_photo(existing.id());
        Ok(())
    }

    /// Delete every photo owned by `pin`, keeping the pin; returns how many went
    pub fn delete_photos_of(&mut self, pin: &Pin) -> StoreResult<usize> {
        expect_tier("pin", pin.tier())?;
        let owner = self.existing_pin(pin.id())?;
        let ids = self.photo_ids_of(owner.id());
        for id in &ids {
            self.changes.delete_photo(*id);
        }
        Ok(ids.len())
    }

    /// Delete a pin and every photo it owns; returns how many photos went
    pub fn delete_pin(&mut self, pin: &Pin) -> StoreResult<usize> {
        let removed = self.delete_photos_of(pin)?;
        self.changes.delete_pin(pin.id());
        Ok(removed)
    }
}

fn expect_tier(entity: &'static str, found: TierKind) -> StoreResult<()> {
    if found == TIER {
        Ok(())
    } else {
        Err(StoreError::ForeignTier {
            entity,
            expected: TIER,
            found,
        })
    }
}

/// State owned by the worker thread
pub(crate) struct BackgroundWorker {
    graph: ObjectGraph,
    main: Arc<RwLock<MainTier>>,
    stats: Arc<BatchStats>,
}

impl BackgroundWorker {
    pub(crate) fn new(graph: ObjectGraph, main: Arc<RwLock<MainTier>>, stats: Arc<BatchStats>) -> Self {
        Self { graph, main, stats }
    }

    /// Run one batch, then save the Background tier into the Main tier
    pub(crate) fn execute<F, R>(&mut self, batch: F) -> StoreResult<R>
    where
        F: FnOnce(&mut BackgroundContext<'_>) -> StoreResult<R>,
    {
        let stats = Arc::clone(&self.stats);
        let (result, changes) = {
            let _guard = stats.enter();
            let mut ctx = BackgroundContext::new(&self.graph);
            let result = batch(&mut ctx);
            (result, ctx.into_changes())
        };

        match result {
            Ok(value) => {
                self.save(changes);
                self.stats.completed.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }
            Err(e) => {
                self.stats.aborted.fetch_add(1, Ordering::SeqCst);
                error!(error = %e, discarded = changes.len(), "Background batch aborted");
                Err(e)
            }
        }
    }

    /// Apply changes locally and push them into the Main tier's pending set
    fn save(&mut self, changes: ChangeSet) {
        if changes.is_empty() {
            return;
        }
        self.graph.apply(&changes);
        let mut main = self.main.write().unwrap_or_else(PoisonError::into_inner);
        main.receive(changes);
    }

    /// Empty this tier and the Main tier together
    pub(crate) fn reset(&mut self) {
        self.graph = ObjectGraph::default();
        let mut main = self.main.write().unwrap_or_else(PoisonError::into_inner);
        main.reset();
    }
}

/// Start the worker thread; it exits when every job sender is dropped
pub(crate) fn spawn_worker(
    mut worker: BackgroundWorker,
    jobs: Receiver<Job>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("vt-background".to_string())
        .spawn(move || {
            info!("Background tier worker started");
            while let Ok(job) = jobs.recv() {
                if panic::catch_unwind(AssertUnwindSafe(|| job(&mut worker))).is_err() {
                    worker.stats.aborted.fetch_add(1, Ordering::SeqCst);
                    error!("Background batch panicked; its changes were discarded");
                }
            }
            info!("Background tier worker stopped");
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> BackgroundWorker {
        BackgroundWorker::new(
            ObjectGraph::default(),
            Arc::new(RwLock::new(MainTier::default())),
            Arc::new(BatchStats::default()),
        )
    }

    #[test]
    fn successful_batch_is_pushed_to_main() {
        let mut worker = worker();
        let pin = worker
            .execute(|ctx| Ok(ctx.insert_pin(Coordinate::new(10.0, 20.0))))
            .unwrap();

        assert_eq!(pin.tier(), TierKind::Background);
        let main = worker.main.read().unwrap();
        assert!(main.graph().pin_record(pin.id()).is_some());
        assert!(main.has_pending());
    }

    #[test]
    fn failed_batch_pushes_nothing() {
        let mut worker = worker();
        let result: StoreResult<()> = worker.execute(|ctx| {
            ctx.insert_pin(Coordinate::new(1.0, 1.0));
            ctx.existing_pin(PinId::new())?;
            Ok(())
        });

        assert!(matches!(result, Err(StoreError::IdentityResolution { .. })));
        assert!(worker.graph.is_empty());
        assert!(!worker.main.read().unwrap().has_pending());
        assert_eq!(worker.stats.snapshot().aborted, 1);
    }

    #[test]
    fn foreign_tier_handles_are_rejected() {
        let mut worker = worker();
        let pin = worker
            .execute(|ctx| Ok(ctx.insert_pin(Coordinate::new(0.0, 0.0))))
            .unwrap();
        let main_pin = worker.main.read().unwrap().graph().pin(pin.id(), TierKind::Main).unwrap();

        let result = worker.execute(move |ctx| ctx.insert_photo(&main_pin, "nope"));
        assert!(matches!(
            result,
            Err(StoreError::ForeignTier {
                expected: TierKind::Background,
                found: TierKind::Main,
                ..
            })
        ));
    }

    #[test]
    fn resolved_handle_can_be_attached() {
        let mut worker = worker();
        let pin = worker
            .execute(|ctx| Ok(ctx.insert_pin(Coordinate::new(0.0, 0.0))))
            .unwrap();
        let main_pin = worker.main.read().unwrap().graph().pin(pin.id(), TierKind::Main).unwrap();

        let photo = worker
            .execute(move |ctx| {
                let resolved = ctx.resolve_pin(&main_pin)?;
                ctx.insert_photo(&resolved, "Lighthouse")
            })
            .unwrap();

        let main = worker.main.read().unwrap();
        let refreshed = main.graph().pin(pin.id(), TierKind::Main).unwrap();
        assert!(refreshed.photos().contains(&photo.id()));
    }

    #[test]
    fn insert_pin_is_idempotent_per_coordinate() {
        let mut worker = worker();
        let (a, b) = worker
            .execute(|ctx| {
                let a = ctx.insert_pin(Coordinate::new(5.0, 5.0));
                let b = ctx.insert_pin(Coordinate::new(5.0, 5.0));
                Ok((a, b))
            })
            .unwrap();
        assert_eq!(a.id(), b.id());

        let c = worker
            .execute(|ctx| Ok(ctx.insert_pin(Coordinate::new(5.0, 5.0))))
            .unwrap();
        assert_eq!(a.id(), c.id());
        assert_eq!(worker.graph.pin_count(), 1);
    }

    #[test]
    fn context_sees_its_own_uncommitted_changes() {
        let mut worker = worker();
        worker
            .execute(|ctx| {
                let pin = ctx.insert_pin(Coordinate::new(2.0, 3.0));
                let photo = ctx.insert_photo(&pin, "first")?;
                ctx.insert_photo(&pin, "second")?;
                assert_eq!(ctx.photos_of(&pin)?.len(), 2);
                assert!(ctx.pin(pin.id()).unwrap().photos().contains(&photo.id()));

                ctx.delete_photo(&photo)?;
                let titles: Vec<String> = ctx
                    .photos_of(&pin)?
                    .iter()
                    .map(|p| p.title().to_string())
                    .collect();
                assert_eq!(titles, vec!["second".to_string()]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn delete_pin_cascades_within_the_batch() {
        let mut worker = worker();
        let pin = worker
            .execute(|ctx| {
                let pin = ctx.insert_pin(Coordinate::new(7.0, 7.0));
                for i in 0..3 {
                    ctx.insert_photo(&pin, format!("photo {}", i))?;
                }
                Ok(pin)
            })
            .unwrap();
        assert_eq!(worker.graph.photo_count(), 3);

        let removed = worker.execute(move |ctx| ctx.delete_pin(&pin)).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(worker.graph.photo_count(), 0);
        assert_eq!(worker.graph.pin_count(), 0);
    }
}
