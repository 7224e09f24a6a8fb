//! Task graph for a restore run
//!
//! Directory tasks live in an arena owned by the scheduler and refer to
//! their parent by index. Each keeps two independent counters: file-node
//! children still being materialized, and subdirectory tasks not yet
//! complete. A directory completes exactly once, when it has been expanded
//! and both counters are zero; completion then releases one subdirectory
//! slot on its parent, which may complete in turn.
//!
//! Only the scheduler thread touches the graph.

use std::path::{Path, PathBuf};

use crate::error::RestoreError;
use crate::snapshot::{ContentId, Node};

/// Index of a directory task in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirId(usize);

/// Lifecycle of a directory task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirState {
    /// Queued, tree not loaded yet
    Discovered,
    /// Children being enumerated
    Expanding,
    /// Waiting for outstanding children
    Awaiting,
    /// Metadata restored, counted on parent
    Complete,
}

/// One directory level to discover
#[derive(Debug)]
pub struct DirTask {
    pub tree: ContentId,
    /// Path relative to the destination root ("" for the root)
    pub dir: PathBuf,
    /// The directory's own entry, present when it was selected for restore
    pub node: Option<Node>,
    pub parent: Option<DirId>,
    pending_files: usize,
    pending_dirs: usize,
    state: DirState,
}

#[cfg(test)]
impl DirTask {
    pub fn state(&self) -> DirState {
        self.state
    }

    pub fn pending_files(&self) -> usize {
        self.pending_files
    }

    pub fn pending_dirs(&self) -> usize {
        self.pending_dirs
    }
}

/// One entry to materialize
#[derive(Debug, Clone)]
pub struct NodeTask {
    pub node: Node,
    /// Directory containing the entry, relative to the destination root
    pub dir: PathBuf,
    /// Owning directory task; `None` for synchronous directory entries
    pub parent: Option<DirId>,
    /// Directory entry created inline during discovery
    pub sync_dir_entry: bool,
}

impl NodeTask {
    pub fn new(node: Node, dir: &Path, parent: DirId) -> Self {
        Self {
            node,
            dir: dir.to_path_buf(),
            parent: Some(parent),
            sync_dir_entry: false,
        }
    }

    /// Directory entry that must exist before its children are queued
    pub fn dir_entry(node: Node, dir: &Path) -> Self {
        Self {
            node,
            dir: dir.to_path_buf(),
            parent: None,
            sync_dir_entry: true,
        }
    }

    /// Destination-relative path of the entry
    pub fn rel_path(&self) -> PathBuf {
        self.dir.join(&self.node.name)
    }
}

/// A unit of work, by kind
#[derive(Debug)]
pub enum Task {
    Directory(DirId),
    Node(NodeTask),
}

/// Arena of directory tasks
#[derive(Debug, Default)]
pub struct TaskGraph {
    dirs: Vec<DirTask>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn get(&self, id: DirId) -> &DirTask {
        &self.dirs[id.0]
    }

    /// Add a directory task; registers it on its parent
    pub fn add_dir(
        &mut self,
        parent: Option<DirId>,
        dir: PathBuf,
        tree: ContentId,
        node: Option<Node>,
    ) -> DirId {
        let id = DirId(self.dirs.len());
        self.dirs.push(DirTask {
            tree,
            dir,
            node,
            parent,
            pending_files: 0,
            pending_dirs: 0,
            state: DirState::Discovered,
        });
        if let Some(parent) = parent {
            self.dirs[parent.0].pending_dirs += 1;
        }
        id
    }

    /// Register one outstanding file-node child on `parent`
    pub fn add_file(&mut self, parent: DirId) {
        self.dirs[parent.0].pending_files += 1;
    }

    pub fn begin_expand(&mut self, id: DirId) -> Result<(), RestoreError> {
        self.transition(id, DirState::Discovered, DirState::Expanding)
    }

    /// Close expansion; completes the directory at once if nothing is outstanding
    pub fn finish_expand<F>(&mut self, id: DirId, on_complete: F) -> Result<usize, RestoreError>
    where
        F: FnMut(&DirTask) -> Result<(), RestoreError>,
    {
        self.transition(id, DirState::Expanding, DirState::Awaiting)?;
        self.settle(id, on_complete)
    }

    /// Record that `child` finished and bubble completion upwards.
    /// Returns the number of directories completed.
    pub fn child_done<F>(&mut self, child: &Task, on_complete: F) -> Result<usize, RestoreError>
    where
        F: FnMut(&DirTask) -> Result<(), RestoreError>,
    {
        let parent = match child {
            Task::Node(task) => task.parent,
            Task::Directory(id) => self.dirs[id.0].parent,
        };
        let Some(parent) = parent else {
            return Ok(0);
        };
        self.release(parent, child)?;
        self.settle(parent, on_complete)
    }

    fn transition(&mut self, id: DirId, from: DirState, to: DirState) -> Result<(), RestoreError> {
        let task = &mut self.dirs[id.0];
        if task.state != from {
            return Err(RestoreError::TaskGraph(format!(
                "directory {} is {:?}, expected {:?}",
                task.dir.display(),
                task.state,
                from
            )));
        }
        task.state = to;
        Ok(())
    }

    fn release(&mut self, parent: DirId, child: &Task) -> Result<(), RestoreError> {
        let task = &mut self.dirs[parent.0];
        let (counter, what) = match child {
            Task::Node(_) => (&mut task.pending_files, "file"),
            Task::Directory(_) => (&mut task.pending_dirs, "subdirectory"),
        };
        match counter.checked_sub(1) {
            Some(remaining) => {
                *counter = remaining;
                Ok(())
            }
            None => Err(RestoreError::TaskGraph(format!(
                "{} counter of {} would go negative",
                what,
                self.dirs[parent.0].dir.display()
            ))),
        }
    }

    fn settle<F>(&mut self, start: DirId, mut on_complete: F) -> Result<usize, RestoreError>
    where
        F: FnMut(&DirTask) -> Result<(), RestoreError>,
    {
        let mut completed = 0;
        let mut current = start;
        loop {
            let task = &mut self.dirs[current.0];
            if task.state != DirState::Awaiting || task.pending_files > 0 || task.pending_dirs > 0 {
                return Ok(completed);
            }

            task.state = DirState::Complete;
            on_complete(&self.dirs[current.0])?;
            completed += 1;

            let Some(parent) = self.dirs[current.0].parent else {
                return Ok(completed);
            };
            self.release(parent, &Task::Directory(current))?;
            current = parent;
        }
    }
}
