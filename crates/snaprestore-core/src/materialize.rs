//! Creating filesystem entries from snapshot nodes

use std::fs::{self, File, FileTimes, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::SystemTime;

use crate::error::MaterializeError;
use crate::hardlink::{HardlinkIndex, LinkClaim};
use crate::repo::BlobSource;
use crate::snapshot::{Node, NodeType};

/// Creates one filesystem entry per node
///
/// Implementations are shared by all workers of a restore run.
pub trait NodeMaterializer: Send + Sync {
    /// Create the entry for `node` at `dest`, including its content and, for
    /// non-directories, its metadata
    fn create_at(
        &self,
        dest: &Path,
        node: &Node,
        blobs: &dyn BlobSource,
        hardlinks: &HardlinkIndex,
    ) -> Result<(), MaterializeError>;

    /// Apply mode and timestamps once the entry's content is final
    fn restore_metadata(&self, dest: &Path, node: &Node) -> Result<(), MaterializeError>;

    /// Create every missing ancestor of `dest`
    fn create_parent_dirs(&self, dest: &Path) -> Result<(), MaterializeError> {
        let Some(parent) = dest.parent() else {
            return Ok(());
        };
        match fs::create_dir_all(parent) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(MaterializeError::io("create parents of", dest, e)),
        }
    }
}

/// Materializer writing to the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsMaterializer;

/// Map a create failure, singling out a missing parent directory
fn create_error(op: &'static str, path: &Path, err: io::Error) -> MaterializeError {
    if err.kind() == io::ErrorKind::NotFound {
        MaterializeError::MissingParent {
            path: path.to_path_buf(),
            source: err,
        }
    } else {
        MaterializeError::io(op, path, err)
    }
}

fn file_times(node: &Node) -> FileTimes {
    FileTimes::new()
        .set_accessed(SystemTime::from(node.atime))
        .set_modified(SystemTime::from(node.mtime))
}

/// Remove whatever sits at `path` so it can be replaced
fn remove_existing(path: &Path) -> Result<(), MaterializeError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Err(MaterializeError::InvalidNode {
            path: path.to_path_buf(),
            reason: "a directory already exists at this path".to_string(),
        }),
        Ok(_) => fs::remove_file(path).map_err(|e| MaterializeError::io("remove", path, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MaterializeError::io("inspect", path, e)),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), MaterializeError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
        .map_err(|e| MaterializeError::io("chmod", path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), MaterializeError> {
    Ok(())
}

impl FsMaterializer {
    pub fn new() -> Self {
        Self
    }

    fn create_dir(&self, dest: &Path) -> Result<(), MaterializeError> {
        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            // owner-writable until metadata is restored, so children can be created
            builder.mode(0o700);
        }
        match builder.create(dest) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(create_error("create directory", dest, e)),
        }

        // never descend through a symlink left at the destination
        let meta = fs::symlink_metadata(dest).map_err(|e| MaterializeError::io("inspect", dest, e))?;
        if meta.file_type().is_dir() {
            // an earlier restore may have left it read-only
            return set_mode(dest, 0o700);
        }
        tracing::debug!("Replacing non-directory at {}", dest.display());
        fs::remove_file(dest).map_err(|e| MaterializeError::io("remove", dest, e))?;
        builder
            .create(dest)
            .map_err(|e| create_error("create directory", dest, e))
    }

    fn create_file(&self, dest: &Path, node: &Node, blobs: &dyn BlobSource) -> Result<(), MaterializeError> {
        remove_existing_symlink(dest)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(dest)
            .map_err(|e| create_error("create", dest, e))?;

        let mut written = 0u64;
        for blob_id in &node.content {
            let data = blobs
                .load_blob(blob_id)
                .map_err(|source| MaterializeError::Content {
                    path: dest.to_path_buf(),
                    source,
                })?;
            file.write_all(&data)
                .map_err(|e| MaterializeError::io("write", dest, e))?;
            written += data.len() as u64;
        }

        if written != node.size {
            return Err(MaterializeError::SizeMismatch {
                path: dest.to_path_buf(),
                expected: node.size,
                written,
            });
        }

        file.flush().map_err(|e| MaterializeError::io("flush", dest, e))?;
        file.set_times(file_times(node))
            .map_err(|e| MaterializeError::io("set times of", dest, e))?;
        drop(file);
        set_mode(dest, node.mode)
    }

    fn create_hardlinked_file(
        &self,
        dest: &Path,
        node: &Node,
        blobs: &dyn BlobSource,
        hardlinks: &HardlinkIndex,
    ) -> Result<(), MaterializeError> {
        match hardlinks.claim(node.device_id, node.inode) {
            LinkClaim::LinkTo(existing) => {
                remove_existing(dest)?;
                tracing::debug!("Linking {} -> {}", dest.display(), existing.display());
                fs::hard_link(&existing, dest).map_err(|e| create_error("link", dest, e))
            }
            LinkClaim::Owner(guard) => {
                self.create_file(dest, node, blobs)?;
                guard.publish(dest);
                Ok(())
            }
        }
    }

    #[cfg(unix)]
    fn create_symlink(&self, dest: &Path, node: &Node) -> Result<(), MaterializeError> {
        let target = node
            .link_target
            .as_deref()
            .ok_or_else(|| MaterializeError::InvalidNode {
                path: dest.to_path_buf(),
                reason: "symlink without target".to_string(),
            })?;
        remove_existing(dest)?;
        std::os::unix::fs::symlink(target, dest).map_err(|e| create_error("symlink", dest, e))
    }

    #[cfg(not(unix))]
    fn create_symlink(&self, dest: &Path, node: &Node) -> Result<(), MaterializeError> {
        Err(MaterializeError::Unsupported {
            path: dest.to_path_buf(),
            node_type: node.node_type,
        })
    }
}

/// A stale symlink at a file destination would redirect the write
fn remove_existing_symlink(path: &Path) -> Result<(), MaterializeError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(path).map_err(|e| MaterializeError::io("remove", path, e))
        }
        _ => Ok(()),
    }
}

impl NodeMaterializer for FsMaterializer {
    fn create_at(
        &self,
        dest: &Path,
        node: &Node,
        blobs: &dyn BlobSource,
        hardlinks: &HardlinkIndex,
    ) -> Result<(), MaterializeError> {
        match node.node_type {
            NodeType::Dir => self.create_dir(dest),
            NodeType::File if node.is_hardlinked() => {
                self.create_hardlinked_file(dest, node, blobs, hardlinks)
            }
            NodeType::File => self.create_file(dest, node, blobs),
            NodeType::Symlink => self.create_symlink(dest, node),
            NodeType::Socket => {
                tracing::debug!("Skipping socket {}", dest.display());
                Ok(())
            }
            NodeType::Dev | NodeType::CharDev | NodeType::Fifo => Err(MaterializeError::Unsupported {
                path: dest.to_path_buf(),
                node_type: node.node_type,
            }),
        }
    }

    fn restore_metadata(&self, dest: &Path, node: &Node) -> Result<(), MaterializeError> {
        // symlink times would follow the link; leave them as created
        if node.node_type == NodeType::Symlink {
            return Ok(());
        }

        // open before chmod; the restored mode may deny reading
        let handle = File::open(dest).map_err(|e| MaterializeError::io("open", dest, e))?;
        handle
            .set_times(file_times(node))
            .map_err(|e| MaterializeError::io("set times of", dest, e))?;
        drop(handle);
        set_mode(dest, node.mode)
    }
}
