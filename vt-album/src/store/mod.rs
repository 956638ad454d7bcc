//! Tiered object store
//!
//! Three tiers form a commit pipeline:
//!
//! - **Background**: a dedicated worker thread that runs mutation batches
//!   strictly one at a time. A batch that succeeds is applied locally and
//!   pushed into Main.
//! - **Main**: the graph readers see. [`TieredStore::save`] hands its pending
//!   changes to the persisting tier without touching disk itself.
//! - **Persisting**: a tokio task that owns the SQLite pool and writes each
//!   accepted change set in one transaction.
//!
//! Object views carry the tier they were read from. A handle from one tier
//! is resolved by identity before it is used to build a relationship in
//! another.

mod background;
mod graph;
mod main_tier;
mod persisting;

pub use background::{BackgroundContext, BatchStatsSnapshot};

use crate::error::{StoreError, StoreResult};
use background::{BackgroundWorker, BatchStats, Job};
use main_tier::MainTier;
use persisting::{PersistCommand, PersistStats, PersistingTier};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use vt_common::db::init_database;
use vt_common::models::{Coordinate, Photo, PhotoId, Pin, PinId, TierKind};

/// Handle to the tiered store; cheap to clone
#[derive(Clone)]
pub struct TieredStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    db_path: PathBuf,
    main: Arc<RwLock<MainTier>>,
    jobs: std::sync::mpsc::Sender<Job>,
    persist: mpsc::UnboundedSender<PersistCommand>,
    batch_stats: Arc<BatchStats>,
    persist_stats: Arc<PersistStats>,
}

impl TieredStore {
    /// Open (or create) the store at `db_path` and load it into memory
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(db_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let db_path = db_path.into();
        let pool = init_database(&db_path).await?;
        let graph = persisting::load_graph(&pool).await?;
        info!(
            db = %db_path.display(),
            pins = graph.pin_count(),
            photos = graph.photo_count(),
            "Object store opened"
        );

        let main = Arc::new(RwLock::new(MainTier::new(graph.clone())));
        let batch_stats = Arc::new(BatchStats::default());
        let worker = BackgroundWorker::new(graph, Arc::clone(&main), Arc::clone(&batch_stats));
        let (jobs, job_rx) = std::sync::mpsc::channel();
        background::spawn_worker(worker, job_rx).map_err(vt_common::Error::from)?;

        let persist_stats = Arc::new(PersistStats::default());
        let (persist, persist_rx) = mpsc::unbounded_channel();
        let tier = PersistingTier::new(pool, db_path.clone(), Arc::clone(&persist_stats));
        tokio::spawn(tier.run(persist_rx));

        Ok(Self {
            inner: Arc::new(StoreInner {
                db_path,
                main,
                jobs,
                persist,
                batch_stats,
                persist_stats,
            }),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    fn read_main(&self) -> RwLockReadGuard<'_, MainTier> {
        self.inner.main.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_main(&self) -> RwLockWriteGuard<'_, MainTier> {
        self.inner.main.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a mutation batch on the Background tier
    ///
    /// The batch is submitted immediately, in call order; the returned
    /// future only waits for its result. Batches never overlap. If the batch
    /// returns `Ok`, its changes are saved into the Main tier before the
    /// future resolves; if it returns `Err`, they are discarded.
    pub fn run_background_batch<F, R>(
        &self,
        batch: F,
    ) -> impl Future<Output = StoreResult<R>> + Send + 'static
    where
        F: FnOnce(&mut BackgroundContext<'_>) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |worker: &mut BackgroundWorker| {
            let _ = tx.send(worker.execute(batch));
        });
        if self.inner.jobs.send(job).is_err() {
            error!("Background worker stopped; batch dropped");
        }

        async move {
            rx.await
                .map_err(|_| StoreError::WorkerStopped("background"))?
        }
    }

    /// Hand the Main tier's pending changes to the persisting tier
    ///
    /// Returns `false` without doing anything when nothing is pending. A
    /// write that failed earlier counts as pending and is retried. The
    /// durable write happens asynchronously; use [`TieredStore::flush`] to
    /// wait for it.
    pub fn save(&self) -> bool {
        let changes = {
            let mut main = self.write_main();
            if !main.has_pending() && !self.inner.persist_stats.has_backlog() {
                return false;
            }
            main.take_pending()
        };

        let rows = changes.len();
        if let Err(mpsc::error::SendError(command)) =
            self.inner.persist.send(PersistCommand::Write(changes))
        {
            error!(rows, "Persisting tier stopped; keeping changes in the main tier");
            if let PersistCommand::Write(changes) = command {
                self.write_main().restore_pending(changes);
            }
            return false;
        }

        debug!(rows, "Main tier saved");
        true
    }

    /// Save periodically for as long as the returned task runs
    ///
    /// A zero interval disables autosave and returns `None`.
    pub fn save_every(&self, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }

        let store = self.clone();
        info!(interval_secs = interval.as_secs_f64(), "Autosave started");
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.save();
            }
        }))
    }

    /// Wait until everything handed to the persisting tier is on disk
    ///
    /// Retries previously failed writes. Photos still waiting for image
    /// bytes stay held back and do not make this fail.
    pub async fn flush(&self) -> StoreResult<()> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .persist
            .send(PersistCommand::Flush(tx))
            .map_err(|_| StoreError::WorkerStopped("persisting"))?;
        rx.await
            .map_err(|_| StoreError::WorkerStopped("persisting"))?
    }

    /// Re-fetch a pin by identity in the target tier
    pub async fn resolve_pin(&self, id: PinId, into: TierKind) -> StoreResult<Pin> {
        match into {
            TierKind::Main => self.pin(id).ok_or_else(|| StoreError::IdentityResolution {
                entity: "pin",
                id: id.to_string(),
                tier: TierKind::Main,
            }),
            TierKind::Background => {
                self.run_background_batch(move |ctx| ctx.existing_pin(id))
                    .await
            }
            TierKind::Persisting => Err(StoreError::TierNotAccessible(into)),
        }
    }

    /// Re-fetch a photo by identity in the target tier
    pub async fn resolve_photo(&self, id: PhotoId, into: TierKind) -> StoreResult<Photo> {
        match into {
            TierKind::Main => self.photo(id).ok_or_else(|| StoreError::IdentityResolution {
                entity: "photo",
                id: id.to_string(),
                tier: TierKind::Main,
            }),
            TierKind::Background => {
                self.run_background_batch(move |ctx| ctx.existing_photo(id))
                    .await
            }
            TierKind::Persisting => Err(StoreError::TierNotAccessible(into)),
        }
    }

    /// Pin in the Main tier
    pub fn pin(&self, id: PinId) -> Option<Pin> {
        self.read_main().graph().pin(id, TierKind::Main)
    }

    /// Photo in the Main tier
    pub fn photo(&self, id: PhotoId) -> Option<Photo> {
        self.read_main().graph().photo(id, TierKind::Main)
    }

    /// All Main-tier pins in creation order
    pub fn pins(&self) -> Vec<Pin> {
        self.read_main().graph().pins(TierKind::Main)
    }

    pub fn pin_at(&self, coordinate: Coordinate) -> Option<Pin> {
        self.pins().into_iter().find(|pin| pin.is_at(coordinate))
    }

    /// Main-tier photos of a pin in creation order
    pub fn photos_of(&self, pin: PinId) -> Vec<Photo> {
        self.read_main().graph().photos_of(pin, TierKind::Main)
    }

    pub fn has_pending_changes(&self) -> bool {
        self.read_main().has_pending()
    }

    pub fn batch_stats(&self) -> BatchStatsSnapshot {
        self.inner.batch_stats.snapshot()
    }

    /// Transactions committed to disk since the store was opened
    pub fn durable_write_count(&self) -> u64 {
        self.inner.persist_stats.durable_writes()
    }

    pub fn failed_write_count(&self) -> u64 {
        self.inner.persist_stats.failed_writes()
    }

    /// Wipe every tier and replace the database with an empty one
    ///
    /// Handles taken before the call resolve to nothing afterwards.
    pub async fn destroy_and_recreate_store(&self) -> StoreResult<()> {
        warn!(db = %self.inner.db_path.display(), "Destroying all stored data");

        // Reset runs as a batch so it cannot interleave with one
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |worker: &mut BackgroundWorker| {
            worker.reset();
            let _ = tx.send(());
        });
        self.inner
            .jobs
            .send(job)
            .map_err(|_| StoreError::WorkerStopped("background"))?;
        rx.await
            .map_err(|_| StoreError::WorkerStopped("background"))?;

        let (tx, rx) = oneshot::channel();
        self.inner
            .persist
            .send(PersistCommand::Recreate(tx))
            .map_err(|_| StoreError::WorkerStopped("persisting"))?;
        rx.await
            .map_err(|_| StoreError::WorkerStopped("persisting"))?
    }
}
