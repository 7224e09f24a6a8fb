//! In-process repository, mostly for tests and embedding

use std::collections::HashMap;
use std::sync::RwLock;

use super::{verify_content, BlobSource, TreeSource};
use crate::error::RepoError;
use crate::snapshot::{ContentId, Tree};

/// Map-backed repository holding encoded trees and raw blobs
#[derive(Default)]
pub struct MemoryRepository {
    trees: RwLock<HashMap<ContentId, Vec<u8>>>,
    blobs: RwLock<HashMap<ContentId, Vec<u8>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a blob and return its ID
    pub fn add_blob(&self, data: &[u8]) -> ContentId {
        let id = ContentId::of(data);
        self.blobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, data.to_vec());
        id
    }

    /// Store a tree and return its ID
    pub fn add_tree(&self, tree: &Tree) -> Result<ContentId, RepoError> {
        let encoded = tree.encode()?;
        let id = ContentId::of(&encoded);
        self.trees
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, encoded);
        Ok(id)
    }

    pub fn tree_count(&self) -> usize {
        self.trees.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl TreeSource for MemoryRepository {
    fn load_tree(&self, id: &ContentId) -> Result<Tree, RepoError> {
        let trees = self.trees.read().unwrap_or_else(|e| e.into_inner());
        let encoded = trees.get(id).ok_or_else(|| RepoError::NotFound {
            kind: "tree",
            id: id.to_hex(),
        })?;
        Ok(serde_json::from_slice(encoded)?)
    }
}

impl BlobSource for MemoryRepository {
    fn load_blob(&self, id: &ContentId) -> Result<Vec<u8>, RepoError> {
        let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
        let data = blobs.get(id).ok_or_else(|| RepoError::NotFound {
            kind: "blob",
            id: id.to_hex(),
        })?;
        verify_content("blob", id, data)?;
        Ok(data.clone())
    }
}
