//! Photo batch acquisition
//!
//! Fetches one page of search results for a pin and turns it into photos:
//!
//! 1. Ask for the page count of a search around the pin, clamp it to the
//!    pages the service can serve and draw one at random
//! 2. Fetch that page and publish how many photos it should yield
//! 3. Create one imageless photo per result in background batches
//! 4. Download image bytes concurrently; attach each on arrival or drop the
//!    photo if its download fails
//!
//! Every run ends with exactly one `BatchCompleted` event.

use crate::error::{AcquisitionError, StoreError};
use crate::expected_count::ExpectedCount;
use crate::flickr::paging::{
    choose_page, clamp_page_count, expected_count_for_page, BoundingBox,
};
use crate::flickr::FlickrClient;
use crate::registry::LocationRegistry;
use crate::store::TieredStore;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use vt_common::events::{EventBus, TouristEvent};
use vt_common::models::{Photo, PhotoId, Pin, PinId, TierKind};

/// Image downloads allowed in flight at once
pub const IMAGE_FETCH_CONCURRENCY: usize = 4;

/// Lifecycle of one acquisition run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    PageCountRequested,
    PageChosen,
    PhotosRequested,
    Populating,
    Done,
    Failed,
}

impl AcquisitionState {
    pub fn can_transition_to(self, next: AcquisitionState) -> bool {
        use AcquisitionState::*;
        matches!(
            (self, next),
            (Idle, PageCountRequested)
                | (PageCountRequested, PageChosen)
                | (PageChosen, PhotosRequested)
                | (PhotosRequested, Populating)
                | (Populating, Done)
                | (Idle, Failed)
                | (PageCountRequested, Failed)
                | (PageChosen, Failed)
                | (PhotosRequested, Failed)
                | (Populating, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AcquisitionState::Done | AcquisitionState::Failed)
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What to do with photos the pin already owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingPhotos {
    Keep,
    /// Delete them before fetching a new page
    Replace,
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionReport {
    pub pin_id: PinId,
    /// States visited, starting with `Idle`
    pub transitions: Vec<AcquisitionState>,
    pub page_count: u32,
    pub page: u32,
    /// Result count the service reported for the whole query
    pub total: u64,
    pub expected: usize,
    /// Photos created from results that carried an image URL
    pub created: usize,
    /// Results without an image URL
    pub skipped: usize,
    pub arrived: usize,
    pub discarded: usize,
    /// Photos deleted up front by [`ExistingPhotos::Replace`]
    pub replaced: usize,
}

impl AcquisitionReport {
    pub fn final_state(&self) -> AcquisitionState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(AcquisitionState::Idle)
    }
}

/// Tracks state for one run
struct Run {
    pin_id: PinId,
    state: AcquisitionState,
    transitions: Vec<AcquisitionState>,
}

impl Run {
    fn new(pin_id: PinId) -> Self {
        Self {
            pin_id,
            state: AcquisitionState::Idle,
            transitions: vec![AcquisitionState::Idle],
        }
    }

    fn advance(&mut self, next: AcquisitionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal acquisition transition {} -> {}",
            self.state,
            next
        );
        debug!(pin_id = %self.pin_id, from = %self.state, to = %next, "Acquisition state");
        self.state = next;
        self.transitions.push(next);
    }
}

/// Clears the in-flight flag when a run ends
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs photo batch acquisitions against the shared store
pub struct PhotoAcquisition {
    store: TieredStore,
    flickr: Arc<FlickrClient>,
    registry: Arc<RwLock<LocationRegistry>>,
    current_pin: Arc<RwLock<Option<Pin>>>,
    expected: ExpectedCount,
    event_bus: EventBus,
    in_flight: AtomicBool,
}

impl PhotoAcquisition {
    pub fn new(
        store: TieredStore,
        flickr: Arc<FlickrClient>,
        registry: Arc<RwLock<LocationRegistry>>,
        current_pin: Arc<RwLock<Option<Pin>>>,
        expected: ExpectedCount,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            flickr,
            registry,
            current_pin,
            expected,
            event_bus,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Fetch a new photo batch for `pin`
    ///
    /// Only one run may be active at a time; a second call while one is in
    /// flight fails with [`AcquisitionError::InFlight`] and emits nothing.
    pub async fn acquire(
        &self,
        pin: &Pin,
        existing: ExistingPhotos,
    ) -> Result<AcquisitionReport, AcquisitionError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(pin_id = %pin.id(), "Photo batch requested while another is in flight");
            return Err(AcquisitionError::InFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let mut run = Run::new(pin.id());
        let result = self.run(&mut run, pin, existing).await;

        let (success, reason) = match &result {
            Ok(report) => {
                info!(
                    pin_id = %pin.id(),
                    page = report.page,
                    expected = report.expected,
                    arrived = report.arrived,
                    discarded = report.discarded,
                    "Photo batch completed"
                );
                (true, None)
            }
            Err(e) => {
                run.advance(AcquisitionState::Failed);
                warn!(pin_id = %pin.id(), error = %e, "Photo batch failed");
                (false, Some(e.user_message()))
            }
        };

        self.event_bus.emit_lossy(TouristEvent::BatchCompleted {
            pin_id: pin.id(),
            success,
            reason,
            timestamp: Utc::now(),
        });

        result
    }

    async fn run(
        &self,
        run: &mut Run,
        pin: &Pin,
        existing: ExistingPhotos,
    ) -> Result<AcquisitionReport, AcquisitionError> {
        let pin_id = pin.id();

        let replaced = match existing {
            ExistingPhotos::Keep => 0,
            ExistingPhotos::Replace => {
                let target = pin.clone();
                self.store
                    .run_background_batch(move |ctx| {
                        let owner = ctx.existing_pin(target.id())?;
                        ctx.delete_photos_of(&owner)
                    })
                    .await?
            }
        };

        let bbox = BoundingBox::around(pin.coordinate());

        run.advance(AcquisitionState::PageCountRequested);
        let first = self.flickr.search(&bbox, None).await?;
        let reported = first.page_count();
        let page_count = reported.and_then(clamp_page_count).ok_or_else(|| {
            AcquisitionError::Pagination(format!("service reported {:?} pages", reported))
        })?;

        let page = {
            let mut rng = rand::thread_rng();
            choose_page(&mut rng, page_count)
        };
        run.advance(AcquisitionState::PageChosen);
        debug!(%pin_id, page, page_count, "Page chosen");

        run.advance(AcquisitionState::PhotosRequested);
        let results = self.flickr.search(&bbox, Some(page)).await?;
        let total = results.total()?;
        let items = results.items()?.to_vec();

        let expected = expected_count_for_page(total, page, page_count);
        if items.len() != expected {
            debug!(%pin_id, expected, returned = items.len(), "Page size differs from expected count");
        }
        self.expected.set(pin_id, expected);

        run.advance(AcquisitionState::Populating);
        let target = self.store.resolve_pin(pin_id, TierKind::Background).await?;
        self.refresh_current_pin(pin_id).await;

        let mut created = Vec::new();
        let mut skipped = 0;
        for item in items {
            let url = match item.url_m {
                Some(url) => url,
                None => {
                    skipped += 1;
                    debug!(%pin_id, title = %item.title, "Result has no image URL; skipped");
                    continue;
                }
            };

            let owner = target.clone();
            let title = item.title;
            let photo = self
                .store
                .run_background_batch(move |ctx| {
                    let owner = ctx.resolve_pin(&owner)?;
                    ctx.insert_photo(&owner, title)
                })
                .await?;

            self.event_bus.emit_lossy(TouristEvent::PhotoAdded {
                pin_id,
                photo_id: photo.id(),
                title: photo.title().to_string(),
                timestamp: Utc::now(),
            });
            created.push((photo, url));
        }

        let created_count = created.len();
        let (arrived, discarded) = self.fetch_images(pin_id, created).await?;

        self.refresh_current_pin(pin_id).await;
        if let Some(snapshot) = self.store.pin(pin_id) {
            let mut registry = self.registry.write().await;
            if !registry.refresh(snapshot.clone()) {
                registry.register(snapshot);
            }
        }

        run.advance(AcquisitionState::Done);
        Ok(AcquisitionReport {
            pin_id,
            transitions: run.transitions.clone(),
            page_count,
            page,
            total,
            expected,
            created: created_count,
            skipped,
            arrived,
            discarded,
            replaced,
        })
    }

    /// Download bytes for every created photo, attaching or discarding each
    async fn fetch_images(
        &self,
        pin_id: PinId,
        created: Vec<(Photo, String)>,
    ) -> Result<(usize, usize), AcquisitionError> {
        let flickr = &self.flickr;
        let downloads = stream::iter(created)
            .map(|(photo, url)| async move {
                let result = flickr.fetch_image(&url).await;
                (photo, result)
            })
            .buffer_unordered(IMAGE_FETCH_CONCURRENCY);
        futures::pin_mut!(downloads);

        let mut arrived = 0;
        let mut discarded = 0;
        while let Some((photo, result)) = downloads.next().await {
            let photo_id = photo.id();
            match result {
                Ok(bytes) => {
                    let attached = self
                        .store
                        .run_background_batch(move |ctx| {
                            let photo = ctx.resolve_photo(&photo)?;
                            ctx.set_photo_image(&photo, bytes)
                        })
                        .await;
                    match attached {
                        Ok(_) => {
                            arrived += 1;
                            self.event_bus.emit_lossy(TouristEvent::PhotoArrived {
                                pin_id,
                                photo_id,
                                timestamp: Utc::now(),
                            });
                        }
                        Err(StoreError::IdentityResolution { .. }) => {
                            discarded += 1;
                            self.emit_discarded(pin_id, photo_id, "photo was removed before its image arrived");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => {
                    warn!(%pin_id, %photo_id, error = %e, "Image download failed");
                    let removed = self
                        .store
                        .run_background_batch(move |ctx| {
                            let photo = ctx.resolve_photo(&photo)?;
                            ctx.delete_photo(&photo)
                        })
                        .await;
                    match removed {
                        Ok(()) | Err(StoreError::IdentityResolution { .. }) => {}
                        Err(e) => return Err(e.into()),
                    }
                    discarded += 1;
                    self.emit_discarded(pin_id, photo_id, "image could not be downloaded");
                }
            }
        }

        Ok((arrived, discarded))
    }

    fn emit_discarded(&self, pin_id: PinId, photo_id: PhotoId, reason: &str) {
        self.event_bus.emit_lossy(TouristEvent::PhotoDiscarded {
            pin_id,
            photo_id,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Point the current pin reference at the latest Main-tier view
    async fn refresh_current_pin(&self, pin_id: PinId) {
        let mut current = self.current_pin.write().await;
        if current.as_ref().map(Pin::id) == Some(pin_id) {
            *current = self.store.pin(pin_id);
        }
    }
}
