//! Repository access: where trees and blobs come from
//!
//! The restore scheduler only needs two capabilities, loading a tree by ID
//! and loading a content blob by ID. Backends implement both.

mod local;
mod memory;

pub use local::LocalRepository;
pub use memory::MemoryRepository;

use crate::error::RepoError;
use crate::snapshot::{ContentId, Tree};

/// Loads directory trees by content ID
pub trait TreeSource: Send + Sync {
    fn load_tree(&self, id: &ContentId) -> Result<Tree, RepoError>;
}

/// Loads file content blobs by content ID
pub trait BlobSource: Send + Sync {
    fn load_blob(&self, id: &ContentId) -> Result<Vec<u8>, RepoError>;
}

/// A backend that serves both trees and blobs
pub trait Repository: TreeSource + BlobSource {
    /// Upcast for APIs that only need blob access
    fn as_blob_source(&self) -> &dyn BlobSource;
}

impl<T: TreeSource + BlobSource> Repository for T {
    fn as_blob_source(&self) -> &dyn BlobSource {
        self
    }
}

/// Check that `data` hashes to `id`
pub(crate) fn verify_content(kind: &'static str, id: &ContentId, data: &[u8]) -> Result<(), RepoError> {
    let actual = ContentId::of(data);
    if actual != *id {
        return Err(RepoError::Corrupt {
            kind,
            id: id.to_hex(),
            reason: format!("content hashes to {}", actual.short()),
        });
    }
    Ok(())
}
