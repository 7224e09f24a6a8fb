//! Single-threaded dispatch loop
//!
//! The scheduler owns the task graph and both pending lists. Node tasks
//! are preferred over directory tasks so files drain before more of the
//! tree is discovered; both lists are LIFO, giving a depth-first walk.
//! Directory expansion happens inline on the scheduler thread but is only
//! started while a worker is idle, which bounds memory by the pool size.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::node::{NodeOutcome, NodeRestorer};
use super::pool::{Completion, WorkerPool};
use super::task::{DirId, DirTask, NodeTask, Task, TaskGraph};
use super::{CancellationToken, ProgressCallback, RestoreProgress, RestoreStats};
use crate::error::RestoreError;
use crate::handler::ErrorHandler;
use crate::repo::Repository;
use crate::select::SelectPolicy;
use crate::snapshot::ContentId;

/// Absolute path of a destination-relative path inside the snapshot
pub(crate) fn snapshot_path(rel: &Path) -> PathBuf {
    Path::new("/").join(rel)
}

pub struct Scheduler<'a> {
    repo: &'a dyn Repository,
    select: &'a dyn SelectPolicy,
    handler: &'a dyn ErrorHandler,
    restorer: Arc<NodeRestorer>,
    cancel: CancellationToken,
    progress: Option<&'a ProgressCallback>,
    graph: TaskGraph,
    pending_nodes: Vec<NodeTask>,
    pending_dirs: Vec<DirId>,
    workers: usize,
    available: usize,
    stats: RestoreStats,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        repo: &'a dyn Repository,
        select: &'a dyn SelectPolicy,
        handler: &'a dyn ErrorHandler,
        restorer: Arc<NodeRestorer>,
        cancel: CancellationToken,
        workers: usize,
        progress: Option<&'a ProgressCallback>,
    ) -> Self {
        Self {
            repo,
            select,
            handler,
            restorer,
            cancel,
            progress,
            graph: TaskGraph::new(),
            pending_nodes: Vec::new(),
            pending_dirs: Vec::new(),
            workers,
            available: workers,
            stats: RestoreStats::default(),
        }
    }

    /// Restore everything below the tree `root`
    pub fn run(mut self, root: ContentId) -> Result<RestoreStats, RestoreError> {
        let root = self.graph.add_dir(None, PathBuf::new(), root, None);
        self.pending_dirs.push(root);

        let pool = WorkerPool::start(self.workers, Arc::clone(&self.restorer))?;
        let result = self.dispatch_loop(&pool);

        let in_flight = self.workers - self.available;
        if let Err(err) = &result {
            tracing::debug!(
                "Stopping restore ({}); waiting for {} in-flight tasks",
                err,
                in_flight
            );
        }
        let shutdown = pool.shutdown(in_flight);

        result?;
        shutdown?;
        self.stats.dirs_discovered = self.graph.len();
        Ok(self.stats)
    }

    fn dispatch_loop(&mut self, pool: &WorkerPool) -> Result<(), RestoreError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(RestoreError::Cancelled);
            }

            if self.available > 0 {
                if let Some(task) = self.pending_nodes.pop() {
                    pool.dispatch(task)?;
                    self.available -= 1;
                    continue;
                }
                if let Some(dir) = self.pending_dirs.pop() {
                    self.expand(dir)?;
                    continue;
                }
                if self.available == self.workers {
                    return Ok(());
                }
            }

            let completion = pool.recv()?;
            self.available += 1;
            self.complete(completion)?;
        }
    }

    /// Load a directory's tree and queue its selected children
    fn expand(&mut self, id: DirId) -> Result<(), RestoreError> {
        self.graph.begin_expand(id)?;
        let (tree_id, dir) = {
            let task = self.graph.get(id);
            (task.tree, task.dir.clone())
        };

        let tree = self
            .repo
            .load_tree(&tree_id)
            .map_err(|source| RestoreError::TreeLoad {
                path: snapshot_path(&dir),
                tree: tree_id,
                source,
            })?;
        tracing::debug!(
            "Expanding {} ({} entries)",
            snapshot_path(&dir).display(),
            tree.len()
        );

        let mut seen = HashSet::with_capacity(tree.len());
        for node in tree.nodes {
            let rejected = if !node.has_valid_name() {
                Some(RestoreError::InvalidNodeName {
                    dir: snapshot_path(&dir),
                    name: node.name.clone(),
                })
            } else if !seen.insert(node.name.clone()) {
                Some(RestoreError::DuplicateNodeName {
                    dir: snapshot_path(&dir),
                    name: node.name.clone(),
                })
            } else {
                None
            };
            if let Some(err) = rejected {
                self.handler
                    .handle(&self.restorer.dest_path(&dir), Some(&node), err)?;
                self.stats.errors_handled += 1;
                continue;
            }

            let rel = dir.join(&node.name);
            let selection =
                self.select
                    .select(&snapshot_path(&rel), &self.restorer.dest_path(&rel), &node);

            if node.is_dir() && selection.descend {
                let subtree = node.subtree.ok_or_else(|| RestoreError::DirWithoutSubtree {
                    path: snapshot_path(&rel),
                })?;
                let entry = selection.selected.then(|| node.clone());
                let child = self.graph.add_dir(Some(id), rel, subtree, entry);
                self.pending_dirs.push(child);

                if selection.selected {
                    self.restorer
                        .create_dir_entry(&NodeTask::dir_entry(node, &dir))?;
                }
                continue;
            }

            if selection.selected {
                self.graph.add_file(id);
                self.pending_nodes.push(NodeTask::new(node, &dir, id));
            }
        }

        let restorer = &self.restorer;
        let stats = &mut self.stats;
        let completed = self
            .graph
            .finish_expand(id, |dir| complete_dir(restorer, stats, dir))?;
        if completed > 0 {
            self.emit_progress();
        }
        Ok(())
    }

    /// Account for a finished node task
    fn complete(&mut self, completion: Completion) -> Result<(), RestoreError> {
        let Completion {
            worker,
            task,
            outcome,
        } = completion;

        match outcome? {
            NodeOutcome::Restored { bytes } => {
                self.stats.nodes_restored += 1;
                self.stats.bytes_restored += bytes;
            }
            NodeOutcome::Handled => self.stats.errors_handled += 1,
        }
        tracing::trace!(
            "Worker {} finished {}",
            worker,
            task.rel_path().display()
        );

        let restorer = &self.restorer;
        let stats = &mut self.stats;
        self.graph
            .child_done(&Task::Node(task), |dir| complete_dir(restorer, stats, dir))?;
        self.emit_progress();
        Ok(())
    }

    fn emit_progress(&self) {
        if let Some(callback) = self.progress {
            callback(RestoreProgress {
                nodes_restored: self.stats.nodes_restored,
                dirs_restored: self.stats.dirs_restored,
                bytes_restored: self.stats.bytes_restored,
                errors_handled: self.stats.errors_handled,
                in_flight: self.workers - self.available,
                pending_nodes: self.pending_nodes.len(),
                pending_dirs: self.pending_dirs.len(),
            });
        }
    }
}

fn complete_dir(
    restorer: &NodeRestorer,
    stats: &mut RestoreStats,
    dir: &DirTask,
) -> Result<(), RestoreError> {
    if restorer.restore_dir_metadata(dir)? {
        stats.dirs_restored += 1;
    }
    Ok(())
}
