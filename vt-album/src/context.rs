//! Application context
//!
//! One [`AppContext`] is built at start-up and owns everything the UI layer
//! talks to: the tiered store, the location registry, the current pin, the
//! expected count and the event bus. It is torn down with
//! [`AppContext::shutdown`], which flushes the store.

use crate::acquisition::{AcquisitionReport, ExistingPhotos, PhotoAcquisition};
use crate::app_state::{AppState, AppStateStore, MapRegion};
use crate::error::TouristResult;
use crate::expected_count::ExpectedCount;
use crate::flickr::FlickrClient;
use crate::registry::LocationRegistry;
use crate::store::TieredStore;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vt_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig};
use vt_common::events::{EventBus, TouristEvent};
use vt_common::logging::init_logging;
use vt_common::models::{Coordinate, Photo, Pin, TierKind};

pub struct AppContext {
    root: PathBuf,
    store: TieredStore,
    registry: Arc<RwLock<LocationRegistry>>,
    current_pin: Arc<RwLock<Option<Pin>>>,
    expected_count: ExpectedCount,
    event_bus: EventBus,
    acquisition: PhotoAcquisition,
    state_store: AppStateStore,
    app_state: RwLock<AppState>,
    autosave: Option<JoinHandle<()>>,
}

impl AppContext {
    /// Start with the root folder resolved from environment, config or default
    pub async fn start(config: &TomlConfig) -> TouristResult<Self> {
        let root = RootFolderResolver::new().with_toml(config).resolve();
        Self::start_in(config, root).await
    }

    /// Start with an explicit root folder
    ///
    /// Installs the log subscriber unless the embedding application already
    /// installed one.
    pub async fn start_in(config: &TomlConfig, root: impl Into<PathBuf>) -> TouristResult<Self> {
        init_logging(&config.logging);
        let initializer = RootFolderInitializer::new(root.into());
        initializer.ensure_directory_exists()?;

        let store = TieredStore::open(initializer.database_path()).await?;
        let registry = LocationRegistry::load_from(store.pins());
        info!(
            root = %initializer.root().display(),
            pins = registry.len(),
            "Virtual Tourist starting"
        );

        let event_bus = EventBus::default();
        let expected_count = ExpectedCount::new(event_bus.clone());
        let flickr = Arc::new(FlickrClient::new(&config.flickr)?);
        let registry = Arc::new(RwLock::new(registry));
        let current_pin = Arc::new(RwLock::new(None));

        let acquisition = PhotoAcquisition::new(
            store.clone(),
            flickr,
            Arc::clone(&registry),
            Arc::clone(&current_pin),
            expected_count.clone(),
            event_bus.clone(),
        );

        let state_store = AppStateStore::new(initializer.state_path());
        let app_state = state_store.load();

        let autosave = config
            .autosave_interval()
            .and_then(|interval| store.save_every(interval));

        Ok(Self {
            root: initializer.root().to_path_buf(),
            store,
            registry,
            current_pin,
            expected_count,
            event_bus,
            acquisition,
            state_store,
            app_state: RwLock::new(app_state),
            autosave,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &TieredStore {
        &self.store
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TouristEvent> {
        self.event_bus.subscribe()
    }

    pub fn expected_count(&self) -> &ExpectedCount {
        &self.expected_count
    }

    pub fn is_acquiring(&self) -> bool {
        self.acquisition.is_in_flight()
    }

    /// Registered pins
    pub async fn pins(&self) -> Vec<Pin> {
        self.registry.read().await.pins().to_vec()
    }

    pub async fn find_pin(&self, latitude: f64, longitude: f64) -> Option<Pin> {
        self.registry.read().await.find_pin(latitude, longitude).cloned()
    }

    /// Pin at exactly `coordinate`, created if none exists yet
    pub async fn drop_pin(&self, coordinate: Coordinate) -> TouristResult<Pin> {
        if let Some(existing) = self
            .find_pin(coordinate.latitude, coordinate.longitude)
            .await
        {
            return Ok(existing);
        }

        let created = self
            .store
            .run_background_batch(move |ctx| Ok(ctx.insert_pin(coordinate)))
            .await?;
        let pin = self.store.resolve_pin(created.id(), TierKind::Main).await?;

        let mut registry = self.registry.write().await;
        if !registry.register(pin.clone()) {
            // Lost a race with another drop at the same coordinate
            if let Some(existing) = registry.find_pin(coordinate.latitude, coordinate.longitude) {
                return Ok(existing.clone());
            }
        }
        drop(registry);

        info!(pin_id = %pin.id(), %coordinate, "Pin dropped");
        self.event_bus.emit_lossy(TouristEvent::PinCreated {
            pin_id: pin.id(),
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            timestamp: Utc::now(),
        });
        Ok(pin)
    }

    /// Make `pin` the viewed pin; the expected count starts over
    pub async fn select_pin(&self, pin: &Pin) -> TouristResult<Pin> {
        let resolved = self.store.resolve_pin(pin.id(), TierKind::Main).await?;
        *self.current_pin.write().await = Some(resolved.clone());
        self.expected_count.reset();
        Ok(resolved)
    }

    pub async fn clear_selection(&self) {
        *self.current_pin.write().await = None;
        self.expected_count.reset();
    }

    pub async fn current_pin(&self) -> Option<Pin> {
        self.current_pin.read().await.clone()
    }

    /// Photos of `pin` as the Main tier sees them
    pub fn photos(&self, pin: &Pin) -> Vec<Photo> {
        self.store.photos_of(pin.id())
    }

    /// Photos of `pin`, fetching a first batch if it has none
    pub async fn load_album(&self, pin: &Pin) -> TouristResult<Vec<Photo>> {
        let photos = self.photos(pin);
        if !photos.is_empty() {
            self.expected_count.set(pin.id(), photos.len());
            return Ok(photos);
        }

        self.acquisition.acquire(pin, ExistingPhotos::Keep).await?;
        Ok(self.photos(pin))
    }

    /// Replace every photo of `pin` with a freshly fetched batch
    pub async fn request_new_album(&self, pin: &Pin) -> TouristResult<AcquisitionReport> {
        Ok(self.acquisition.acquire(pin, ExistingPhotos::Replace).await?)
    }

    /// Delete a pin and its photos; returns how many photos went with it
    pub async fn delete_pin(&self, pin: &Pin) -> TouristResult<usize> {
        let pin_id = pin.id();
        let removed = self
            .store
            .run_background_batch(move |ctx| {
                let target = ctx.existing_pin(pin_id)?;
                ctx.delete_pin(&target)
            })
            .await?;

        self.registry.write().await.unregister(pin_id);
        let was_current = {
            let mut current = self.current_pin.write().await;
            if current.as_ref().map(Pin::id) == Some(pin_id) {
                *current = None;
                true
            } else {
                false
            }
        };
        if was_current {
            self.expected_count.reset();
        }

        info!(%pin_id, photos = removed, "Pin deleted");
        self.event_bus.emit_lossy(TouristEvent::PinDeleted {
            pin_id,
            timestamp: Utc::now(),
        });
        Ok(removed)
    }

    /// Delete one photo
    ///
    /// The expected count drops by one only when the photo belongs to the
    /// viewed pin.
    pub async fn delete_photo(&self, photo: &Photo) -> TouristResult<()> {
        let target = photo.clone();
        self.store
            .run_background_batch(move |ctx| {
                let resolved = ctx.resolve_photo(&target)?;
                ctx.delete_photo(&resolved)
            })
            .await?;

        let pin_id = photo.pin();
        let snapshot = self.store.pin(pin_id);
        if let Some(snapshot) = &snapshot {
            self.registry.write().await.refresh(snapshot.clone());
        }

        let mut current = self.current_pin.write().await;
        if current.as_ref().map(Pin::id) == Some(pin_id) {
            self.expected_count.decrement(pin_id);
            if snapshot.is_some() {
                *current = snapshot;
            }
        }
        Ok(())
    }

    /// Wipe every pin and photo, on disk and in memory
    pub async fn reset_all_data(&self) -> TouristResult<()> {
        self.store.destroy_and_recreate_store().await?;
        self.registry.write().await.clear();
        *self.current_pin.write().await = None;
        self.expected_count.reset();
        self.event_bus.emit_lossy(TouristEvent::StoreReset {
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn app_state(&self) -> AppState {
        self.app_state.read().await.clone()
    }

    pub async fn save_map_region(&self, region: MapRegion) -> TouristResult<()> {
        let mut state = self.app_state.write().await;
        state.map_region = Some(region);
        self.state_store.save(&state)?;
        Ok(())
    }

    /// Persist app state and flush the store
    pub async fn shutdown(mut self) -> TouristResult<()> {
        if let Some(autosave) = self.autosave.take() {
            autosave.abort();
        }

        {
            let mut state = self.app_state.write().await;
            state.is_first_launch = false;
            if let Err(e) = self.state_store.save(&state) {
                warn!("Failed to save app state: {}", e);
            }
        }

        self.store.save();
        self.store.flush().await?;
        info!("Virtual Tourist stopped");
        Ok(())
    }
}
