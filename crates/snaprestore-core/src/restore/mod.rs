//! Parallel restore of a snapshot into a destination directory
//!
//! A `Restorer` walks the snapshot's trees on a single scheduler thread and
//! hands every selected non-directory entry to a bounded pool of workers.
//! Directory metadata is applied in post-order, once everything below a
//! directory has been written, so child writes cannot disturb a parent's
//! restored timestamps.

mod node;
mod pool;
mod scheduler;
mod task;

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use uuid::Uuid;

use crate::error::RestoreError;
use crate::handler::{AbortOnError, ErrorHandler};
use crate::materialize::{FsMaterializer, NodeMaterializer};
use crate::repo::Repository;
use crate::select::{SelectAll, SelectPolicy};
use crate::snapshot::Snapshot;
use crate::verify::{self, VerifyReport};

use node::NodeRestorer;
use scheduler::Scheduler;

pub(crate) use scheduler::snapshot_path;

/// Upper bound on the worker pool size
pub const MAX_WORKERS: usize = 512;

/// Pool size used when available parallelism cannot be determined
const FALLBACK_WORKERS: usize = 4;

/// Receives progress updates from the scheduler thread
pub type ProgressCallback = dyn Fn(RestoreProgress) + Send + Sync;

/// Restore configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreConfig {
    /// Number of worker threads materializing entries
    pub workers: usize,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(FALLBACK_WORKERS);
        Self {
            workers: workers.min(MAX_WORKERS),
        }
    }
}

impl RestoreConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self { workers }
    }

    pub fn validate(&self) -> Result<(), RestoreError> {
        if self.workers == 0 {
            return Err(RestoreError::InvalidConfig(
                "at least one worker is required".to_string(),
            ));
        }
        if self.workers > MAX_WORKERS {
            return Err(RestoreError::InvalidConfig(format!(
                "{} workers requested, at most {} allowed",
                self.workers, MAX_WORKERS
            )));
        }
        Ok(())
    }
}

/// Cooperative cancellation flag shared between a caller and a running restore
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Snapshot of restore progress, emitted after every completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreProgress {
    pub nodes_restored: u64,
    pub dirs_restored: u64,
    pub bytes_restored: u64,
    pub errors_handled: u64,
    pub in_flight: usize,
    pub pending_nodes: usize,
    pub pending_dirs: usize,
}

/// Counters accumulated by one restore run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreStats {
    /// Entries materialized by workers (files, symlinks, non-descended directories)
    pub nodes_restored: u64,
    /// Selected directories whose metadata was applied on completion
    pub dirs_restored: u64,
    pub bytes_restored: u64,
    /// Errors downgraded by the error handler
    pub errors_handled: u64,
    /// Directory tasks created, including the root
    pub dirs_discovered: usize,
}

/// Result of a successful restore run
#[derive(Debug, Clone, Serialize)]
pub struct RestoreSummary {
    pub run_id: Uuid,
    pub target: PathBuf,
    pub workers: usize,
    #[serde(flatten)]
    pub stats: RestoreStats,
    pub duration_ms: u64,
}

/// Restores one snapshot from a repository
pub struct Restorer {
    repo: Arc<dyn Repository>,
    snapshot: Snapshot,
    config: RestoreConfig,
    select: Arc<dyn SelectPolicy>,
    error_handler: Arc<dyn ErrorHandler>,
    materializer: Arc<dyn NodeMaterializer>,
    progress_callback: Option<Box<ProgressCallback>>,
}

impl Restorer {
    pub fn new(repo: Arc<dyn Repository>, snapshot: Snapshot, config: RestoreConfig) -> Self {
        Self {
            repo,
            snapshot,
            config,
            select: Arc::new(SelectAll),
            error_handler: Arc::new(AbortOnError),
            materializer: Arc::new(FsMaterializer),
            progress_callback: None,
        }
    }

    pub fn with_select_policy<P>(mut self, policy: P) -> Self
    where
        P: SelectPolicy + 'static,
    {
        self.select = Arc::new(policy);
        self
    }

    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    pub fn with_materializer(mut self, materializer: Arc<dyn NodeMaterializer>) -> Self {
        self.materializer = materializer;
        self
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(RestoreProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
    }

    /// Restore the selected part of the snapshot below `dst`
    pub fn restore_to(
        &self,
        cancel: &CancellationToken,
        dst: &Path,
    ) -> Result<RestoreSummary, RestoreError> {
        self.config.validate()?;
        fs::create_dir_all(dst).map_err(|source| RestoreError::Destination {
            path: dst.to_path_buf(),
            source,
        })?;

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        tracing::info!(
            "Restore {}: tree {} into {} with {} workers",
            run_id,
            self.snapshot.tree.short(),
            dst.display(),
            self.config.workers
        );

        let restorer = Arc::new(NodeRestorer::new(
            dst,
            Arc::clone(&self.repo),
            Arc::clone(&self.materializer),
            Arc::clone(&self.error_handler),
            cancel.clone(),
        ));
        let scheduler = Scheduler::new(
            self.repo.as_ref(),
            self.select.as_ref(),
            self.error_handler.as_ref(),
            restorer,
            cancel.clone(),
            self.config.workers,
            self.progress_callback.as_deref(),
        );

        let stats = match scheduler.run(self.snapshot.tree) {
            Ok(stats) => stats,
            Err(err) => {
                tracing::info!("Restore {} stopped: {}", run_id, err);
                return Err(err);
            }
        };

        let summary = RestoreSummary {
            run_id,
            target: dst.to_path_buf(),
            workers: self.config.workers,
            stats,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            "Restore {} finished: {} entries, {} directories, {} bytes, {} errors handled in {} ms",
            run_id,
            summary.stats.nodes_restored,
            summary.stats.dirs_restored,
            summary.stats.bytes_restored,
            summary.stats.errors_handled,
            summary.duration_ms
        );
        Ok(summary)
    }

    /// Compare the selected regular files below `dst` with the snapshot
    pub fn verify_files(
        &self,
        cancel: &CancellationToken,
        dst: &Path,
    ) -> Result<VerifyReport, RestoreError> {
        verify::verify_files(
            self.repo.as_ref(),
            self.snapshot.tree,
            self.select.as_ref(),
            cancel,
            dst,
        )
    }
}
