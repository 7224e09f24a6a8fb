//! Parallel restore of content-addressed snapshots
//!
//! A snapshot is a tree of `Tree` objects whose leaves reference content
//! blobs by SHA-256 id. `Restorer` materializes a selected part of such a
//! snapshot into a local directory using a bounded worker pool, restoring
//! directory timestamps only after everything below them is written.

pub mod error;
pub mod handler;
pub mod hardlink;
pub mod materialize;
pub mod repo;
pub mod restore;
pub mod select;
pub mod snapshot;
pub mod verify;

pub use error::{MaterializeError, RepoError, RestoreError};
pub use handler::{AbortOnError, CollectWarnings, ErrorHandler, RestoreWarning};
pub use hardlink::{HardlinkIndex, LinkClaim};
pub use materialize::{FsMaterializer, NodeMaterializer};
pub use repo::{BlobSource, LocalRepository, MemoryRepository, Repository, TreeSource};
pub use restore::{
    CancellationToken, RestoreConfig, RestoreProgress, RestoreStats, RestoreSummary, Restorer,
    MAX_WORKERS,
};
pub use select::{PathFilter, Pattern, SelectAll, SelectPolicy, Selection};
pub use snapshot::{ContentId, Node, NodeType, Snapshot, Tree};
pub use verify::{VerifyIssue, VerifyReport};
