//! Materializing one node task
//!
//! Shared by the scheduler (directory entries, directory metadata) and by
//! every worker (file nodes).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::task::{DirTask, NodeTask};
use super::CancellationToken;
use crate::error::{MaterializeError, RestoreError};
use crate::handler::ErrorHandler;
use crate::hardlink::HardlinkIndex;
use crate::materialize::NodeMaterializer;
use crate::repo::Repository;
use crate::snapshot::{Node, NodeType};

/// Final outcome of a node task that did not abort the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Entry created; `bytes` of file content written
    Restored { bytes: u64 },
    /// Creation failed and the error handler downgraded it
    Handled,
}

/// Everything a worker needs to restore a node
pub struct NodeRestorer {
    dst: PathBuf,
    repo: Arc<dyn Repository>,
    materializer: Arc<dyn NodeMaterializer>,
    handler: Arc<dyn ErrorHandler>,
    hardlinks: HardlinkIndex,
    cancel: CancellationToken,
}

impl NodeRestorer {
    pub fn new(
        dst: &Path,
        repo: Arc<dyn Repository>,
        materializer: Arc<dyn NodeMaterializer>,
        handler: Arc<dyn ErrorHandler>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dst: dst.to_path_buf(),
            repo,
            materializer,
            handler,
            hardlinks: HardlinkIndex::new(),
            cancel,
        }
    }

    /// Absolute destination for a destination-relative path
    pub fn dest_path(&self, rel: &Path) -> PathBuf {
        self.dst.join(rel)
    }

    /// Create the entry, recovering once from a missing parent directory
    fn materialize(&self, dest: &Path, node: &Node) -> Result<(), MaterializeError> {
        let blobs = self.repo.as_blob_source();
        match self.materializer.create_at(dest, node, blobs, &self.hardlinks) {
            Err(err) if err.is_missing_parent() => {
                tracing::debug!("Creating intermediate directories for {}", dest.display());
                self.materializer.create_parent_dirs(dest)?;
                self.materializer.create_at(dest, node, blobs, &self.hardlinks)
            }
            result => result,
        }
    }

    /// Worker entry point. `Err` is fatal for the run; downgraded
    /// failures come back as `NodeOutcome::Handled`.
    pub fn restore_node(&self, task: &NodeTask) -> Result<NodeOutcome, RestoreError> {
        if self.cancel.is_cancelled() {
            return Err(RestoreError::Cancelled);
        }

        let dest = self.dest_path(&task.rel_path());
        tracing::debug!("Restoring {} {}", task.node.node_type, dest.display());

        let result = self.materialize(&dest, &task.node).and_then(|()| {
            // a directory restored without descending has no children to wait for
            if task.node.is_dir() {
                self.materializer.restore_metadata(&dest, &task.node)
            } else {
                Ok(())
            }
        });

        match result {
            Ok(()) => {
                let bytes = match task.node.node_type {
                    NodeType::File => task.node.size,
                    _ => 0,
                };
                Ok(NodeOutcome::Restored { bytes })
            }
            Err(source) => {
                tracing::debug!("Restoring {} failed: {}", dest.display(), source);
                let err = RestoreError::Materialize {
                    path: dest.clone(),
                    source,
                };
                self.handler.handle(&dest, Some(&task.node), err)?;
                Ok(NodeOutcome::Handled)
            }
        }
    }

    /// Create a selected directory's own entry before its children are
    /// queued. Failures here abort the run without consulting the handler.
    pub fn create_dir_entry(&self, task: &NodeTask) -> Result<(), RestoreError> {
        debug_assert!(task.sync_dir_entry);
        let dest = self.dest_path(&task.rel_path());
        tracing::debug!("Creating directory {}", dest.display());
        self.materialize(&dest, &task.node)
            .map_err(|source| RestoreError::Materialize { path: dest, source })
    }

    /// Apply a completed directory's metadata, if its entry was restored
    pub fn restore_dir_metadata(&self, dir: &DirTask) -> Result<bool, RestoreError> {
        let Some(node) = &dir.node else {
            return Ok(false);
        };
        let dest = self.dest_path(&dir.dir);
        tracing::debug!("Restoring metadata of {}", dest.display());
        self.materializer
            .restore_metadata(&dest, node)
            .map_err(|source| RestoreError::Metadata { path: dest, source })?;
        Ok(true)
    }
}
