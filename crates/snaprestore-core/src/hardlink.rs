//! Per-restore index of hard link groups
//!
//! Entries that shared an inode at backup time are restored once and linked
//! afterwards. Workers race for the same identity, so the first claimant
//! becomes the owner and the others wait until the owner has published the
//! path it wrote (or given up).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};

type Identity = (u64, u64);

#[derive(Debug)]
enum LinkState {
    /// Owner is still writing the content
    Pending,
    /// Content is complete at this path
    Ready(PathBuf),
}

/// Maps (device, inode) to the first materialized path of that identity
#[derive(Debug, Default)]
pub struct HardlinkIndex {
    entries: Mutex<HashMap<Identity, LinkState>>,
    published: Condvar,
}

/// Result of claiming an identity
#[derive(Debug)]
pub enum LinkClaim<'a> {
    /// Caller must materialize the content, then call `publish`
    Owner(OwnerGuard<'a>),
    /// Content already exists; link to this path
    LinkTo(PathBuf),
}

/// Ownership of one identity; released on drop unless published
#[derive(Debug)]
pub struct OwnerGuard<'a> {
    index: &'a HardlinkIndex,
    key: Identity,
    published: bool,
}

impl OwnerGuard<'_> {
    /// Mark the content at `path` as complete and wake waiters
    pub fn publish(mut self, path: &Path) {
        self.published = true;
        let mut entries = self.index.lock();
        entries.insert(self.key, LinkState::Ready(path.to_path_buf()));
        drop(entries);
        self.index.published.notify_all();
    }
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        let mut entries = self.index.lock();
        if matches!(entries.get(&self.key), Some(LinkState::Pending)) {
            entries.remove(&self.key);
        }
        drop(entries);
        self.index.published.notify_all();
    }
}

impl HardlinkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Identity, LinkState>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim an identity, waiting while another owner is writing it
    pub fn claim(&self, device: u64, inode: u64) -> LinkClaim<'_> {
        let key = (device, inode);
        let mut entries = self.lock();
        loop {
            match entries.get(&key) {
                Some(LinkState::Ready(path)) => return LinkClaim::LinkTo(path.clone()),
                Some(LinkState::Pending) => {
                    entries = self
                        .published
                        .wait(entries)
                        .unwrap_or_else(|e| e.into_inner());
                }
                None => {
                    entries.insert(key, LinkState::Pending);
                    return LinkClaim::Owner(OwnerGuard {
                        index: self,
                        key,
                        published: false,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
impl HardlinkIndex {
    /// Published path for an identity, if any
    fn get(&self, device: u64, inode: u64) -> Option<PathBuf> {
        match self.lock().get(&(device, inode)) {
            Some(LinkState::Ready(path)) => Some(path.clone()),
            _ => None,
        }
    }

    /// Number of published identities
    fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|s| matches!(s, LinkState::Ready(_)))
            .count()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
