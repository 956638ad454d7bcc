//! Persisting tier
//!
//! The only owner of the database pool. Runs as a tokio task fed by the Main
//! tier's saves and writes each accepted change set in a single transaction.
//! Photos without image bytes are held back until their bytes arrive.

use super::graph::{ChangeSet, ObjectGraph};
use crate::error::{StoreError, StoreResult};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use vt_common::db::{self, photos, pins};

/// Messages accepted by the persisting task
#[derive(Debug)]
pub(crate) enum PersistCommand {
    /// Changes committed by the Main tier
    Write(ChangeSet),
    /// Retry anything outstanding and report the outcome
    Flush(oneshot::Sender<StoreResult<()>>),
    /// Close the pool, delete the files, open a fresh empty store
    Recreate(oneshot::Sender<StoreResult<()>>),
}

/// Durable write counters
#[derive(Debug, Default)]
pub(crate) struct PersistStats {
    durable_writes: AtomicU64,
    failed_writes: AtomicU64,
    /// Set while a failed write is waiting to be retried
    backlog: AtomicBool,
}

impl PersistStats {
    pub(crate) fn durable_writes(&self) -> u64 {
        self.durable_writes.load(Ordering::SeqCst)
    }

    pub(crate) fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::SeqCst)
    }

    pub(crate) fn has_backlog(&self) -> bool {
        self.backlog.load(Ordering::SeqCst)
    }
}

/// Read the full object graph off disk
pub(crate) async fn load_graph(pool: &SqlitePool) -> StoreResult<ObjectGraph> {
    let pin_rows = pins::load_all_pins(pool).await?;
    let photo_rows = photos::load_all_photos(pool).await?;
    Ok(ObjectGraph::from_records(pin_rows, photo_rows))
}

pub(crate) struct PersistingTier {
    pool: SqlitePool,
    db_path: PathBuf,
    pending: ChangeSet,
    stats: Arc<PersistStats>,
}

impl PersistingTier {
    pub(crate) fn new(pool: SqlitePool, db_path: PathBuf, stats: Arc<PersistStats>) -> Self {
        Self {
            pool,
            db_path,
            pending: ChangeSet::default(),
            stats,
        }
    }

    /// Serve commands until every sender is dropped
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<PersistCommand>) {
        info!(db = %self.db_path.display(), "Persisting tier started");

        while let Some(command) = commands.recv().await {
            match command {
                PersistCommand::Write(changes) => {
                    self.pending.merge(changes);
                    // Failure keeps the changes for the next attempt
                    let _ = self.write_pending().await;
                }
                PersistCommand::Flush(reply) => {
                    let result = self.write_pending().await;
                    let _ = reply.send(result);
                }
                PersistCommand::Recreate(reply) => {
                    let result = self.recreate().await;
                    let _ = reply.send(result);
                }
            }
        }

        if !self.pending.is_empty() {
            let _ = self.write_pending().await;
        }
        self.pool.close().await;
        info!("Persisting tier stopped");
    }

    async fn write_pending(&mut self) -> StoreResult<()> {
        let (ready, deferred) = std::mem::take(&mut self.pending).split_imageless();
        if ready.is_empty() {
            self.pending = deferred;
            return Ok(());
        }

        match write_changes(&self.pool, &ready).await {
            Ok(()) => {
                let writes = self.stats.durable_writes.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(
                    rows = ready.len(),
                    deferred = deferred.len(),
                    writes,
                    "Changes written to disk"
                );
                self.pending = deferred;
                self.stats.backlog.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.stats.failed_writes.fetch_add(1, Ordering::SeqCst);
                self.stats.backlog.store(true, Ordering::SeqCst);
                warn!(error = %e, rows = ready.len(), "Durable write failed; will retry on next save");
                let mut retained = ready;
                retained.merge(deferred);
                self.pending = retained;
                Err(e)
            }
        }
    }

    async fn recreate(&mut self) -> StoreResult<()> {
        warn!(db = %self.db_path.display(), "Recreating object store");
        self.pending = ChangeSet::default();
        self.stats.backlog.store(false, Ordering::SeqCst);
        self.pool.close().await;
        db::remove_database_files(&self.db_path)?;

        match db::init_database(&self.db_path).await {
            Ok(pool) => {
                self.pool = pool;
                info!("Object store recreated");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to recreate object store");
                Err(StoreError::from(e))
            }
        }
    }
}

/// Write one change set atomically
///
/// Parents before children on insert, children before parents on delete.
async fn write_changes(pool: &SqlitePool, changes: &ChangeSet) -> StoreResult<()> {
    let mut tx = pool.begin().await?;

    // Deletions first: a pin deleted and re-created at the same coordinate
    // would otherwise trip the unique coordinate index.
    for id in changes.photo_deletions() {
        photos::delete_photo(&mut *tx, id).await?;
    }
    for id in changes.pin_deletions() {
        pins::delete_pin(&mut *tx, id).await?;
    }
    for pin in changes.pin_upserts() {
        pins::upsert_pin(&mut *tx, pin).await?;
    }
    for photo in changes.photo_upserts() {
        photos::upsert_photo(&mut *tx, photo).await?;
    }

    tx.commit().await?;
    Ok(())
}
