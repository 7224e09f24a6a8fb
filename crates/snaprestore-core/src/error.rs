//! Error types for snaprestore
//!
//! Three layers, each with its own enum:
//! - `RepoError`: loading or storing objects in a repository
//! - `MaterializeError`: creating a single entry on the local filesystem
//! - `RestoreError`: what a restore run reports to its caller
//!
//! The scheduler is the only place that decides whether a `RestoreError`
//! aborts the run; everything below it just classifies.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::snapshot::{ContentId, NodeType};

/// Repository access errors
#[derive(Error, Debug)]
pub enum RepoError {
    /// Object is not present in the repository
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// Stored bytes do not hash to the object's ID
    #[error("{kind} {id} is corrupt: {reason}")]
    Corrupt {
        kind: &'static str,
        id: String,
        reason: String,
    },

    /// Snapshot ID prefix matched more than one snapshot
    #[error("snapshot prefix '{prefix}' is ambiguous ({matches} matches)")]
    AmbiguousId { prefix: String, matches: usize },

    /// Snapshot ID prefix is not usable
    #[error("invalid snapshot id '{0}'")]
    InvalidId(String),

    /// Repository directory missing or not initialized
    #[error("no repository at {0}")]
    NotARepository(PathBuf),

    /// Repository already exists at the target
    #[error("repository already initialized at {0}")]
    AlreadyExists(PathBuf),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding errors for trees and snapshots
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Errors while creating one filesystem entry
#[derive(Error, Debug)]
pub enum MaterializeError {
    /// An ancestor directory of the destination does not exist yet
    #[error("parent directory of {path} does not exist")]
    MissingParent {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Any other filesystem failure
    #[error("failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Content blob could not be loaded
    #[error("failed to load content for {path}: {source}")]
    Content {
        path: PathBuf,
        #[source]
        source: RepoError,
    },

    /// Written length differs from the node's recorded size
    #[error("size mismatch for {path}: expected {expected} bytes, wrote {written}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        written: u64,
    },

    /// Node carries inconsistent data (e.g. symlink without target)
    #[error("invalid node at {path}: {reason}")]
    InvalidNode { path: PathBuf, reason: String },

    /// Node type this materializer cannot create
    #[error("cannot restore {node_type} node at {path}")]
    Unsupported { path: PathBuf, node_type: NodeType },
}

impl MaterializeError {
    /// Whether a create-parents-and-retry cycle may fix this error
    pub fn is_missing_parent(&self) -> bool {
        matches!(self, MaterializeError::MissingParent { .. })
    }

    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        MaterializeError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Errors returned by a restore run
#[derive(Error, Debug)]
pub enum RestoreError {
    /// Loading a directory's tree failed (always fatal)
    #[error("failed to load tree {tree} for {path}: {source}")]
    TreeLoad {
        path: PathBuf,
        tree: ContentId,
        #[source]
        source: RepoError,
    },

    /// Directory node without a subtree reference
    #[error("directory {path} has no subtree")]
    DirWithoutSubtree { path: PathBuf },

    /// Tree entry with a name that would escape its directory
    #[error("invalid entry name {name:?} in {dir}")]
    InvalidNodeName { dir: PathBuf, name: String },

    /// A second tree entry with a name already seen in the same directory
    #[error("duplicate entry name {name:?} in {dir}")]
    DuplicateNodeName { dir: PathBuf, name: String },

    /// Entry creation failed after the missing-parent retry
    #[error("failed to restore {path}: {source}")]
    Materialize {
        path: PathBuf,
        #[source]
        source: MaterializeError,
    },

    /// Applying a directory's mode/timestamps after completion failed
    #[error("failed to restore metadata of {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: MaterializeError,
    },

    /// Verification could not read the restored data
    #[error("failed to verify {path}: {source}")]
    Verify {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Cancellation token was triggered
    #[error("restore cancelled")]
    Cancelled,

    /// Invalid restore configuration
    #[error("invalid restore configuration: {0}")]
    InvalidConfig(String),

    /// An include/exclude pattern did not compile
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A worker thread could not be started
    #[error("failed to start worker {id}: {source}")]
    WorkerSpawn {
        id: usize,
        #[source]
        source: io::Error,
    },

    /// A worker panicked while materializing
    #[error("worker {id} panicked: {message}")]
    WorkerPanicked { id: usize, message: String },

    /// Dispatch or completion channel closed while work was outstanding
    #[error("worker channel closed unexpectedly")]
    ChannelClosed,

    /// Completion counters became inconsistent
    #[error("task graph inconsistency: {0}")]
    TaskGraph(String),

    /// Creating the destination root failed
    #[error("failed to prepare destination {path}: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RestoreError {
    /// Whether this error came from a cancelled run
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RestoreError::Cancelled)
    }
}
