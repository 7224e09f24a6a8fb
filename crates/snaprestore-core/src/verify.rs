//! Post-restore verification of regular files
//!
//! Walks the snapshot with the restore's selection policy and compares every
//! selected regular file on disk against its content blobs. The walk is
//! sequential; the file comparisons run on the rayon pool.

use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::error::RestoreError;
use crate::repo::Repository;
use crate::restore::{snapshot_path, CancellationToken};
use crate::select::SelectPolicy;
use crate::snapshot::{ContentId, Node, NodeType};

/// A file whose restored content differs from the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyIssue {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub files_checked: u64,
    pub bytes_checked: u64,
    pub issues: Vec<VerifyIssue>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Collect (destination path, node) for every selected regular file
fn collect_files(
    repo: &dyn Repository,
    root: ContentId,
    select: &dyn SelectPolicy,
    cancel: &CancellationToken,
    dst: &Path,
) -> Result<Vec<(PathBuf, Node)>, RestoreError> {
    let mut files = Vec::new();
    let mut stack = vec![(PathBuf::new(), root)];

    while let Some((dir, tree_id)) = stack.pop() {
        if cancel.is_cancelled() {
            return Err(RestoreError::Cancelled);
        }
        let tree = repo
            .load_tree(&tree_id)
            .map_err(|source| RestoreError::TreeLoad {
                path: snapshot_path(&dir),
                tree: tree_id,
                source,
            })?;

        for node in tree.nodes {
            // restore skipped these too
            if !node.has_valid_name() {
                continue;
            }
            let rel = dir.join(&node.name);
            let dest = dst.join(&rel);
            let selection = select.select(&snapshot_path(&rel), &dest, &node);

            match node.node_type {
                NodeType::Dir if selection.descend => {
                    if let Some(subtree) = node.subtree {
                        stack.push((rel, subtree));
                    }
                }
                NodeType::File if selection.selected => files.push((dest, node)),
                _ => {}
            }
        }
    }
    Ok(files)
}

/// Compare one file with its blobs; `Ok(Err(reason))` is a mismatch
fn check_file(repo: &dyn Repository, path: &Path, node: &Node) -> Result<Result<u64, String>, RestoreError> {
    let io_err = |source: io::Error| RestoreError::Verify {
        path: path.to_path_buf(),
        source,
    };

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Err("missing".to_string())),
        Err(e) => return Err(io_err(e)),
    };
    let len = file.metadata().map_err(io_err)?.len();
    if len != node.size {
        return Ok(Err(format!("size is {} bytes, expected {}", len, node.size)));
    }

    let mut offset = 0u64;
    let mut buf = Vec::new();
    for blob_id in &node.content {
        let expected = match repo.load_blob(blob_id) {
            Ok(data) => data,
            Err(e) => return Ok(Err(format!("cannot load blob {}: {}", blob_id.short(), e))),
        };
        buf.resize(expected.len(), 0);
        file.read_exact(&mut buf).map_err(io_err)?;
        if buf != expected {
            return Ok(Err(format!(
                "content differs in blob {} at offset {}",
                blob_id.short(),
                offset
            )));
        }
        offset += expected.len() as u64;
    }
    Ok(Ok(offset))
}

pub(crate) fn verify_files(
    repo: &dyn Repository,
    root: ContentId,
    select: &dyn SelectPolicy,
    cancel: &CancellationToken,
    dst: &Path,
) -> Result<VerifyReport, RestoreError> {
    let files = collect_files(repo, root, select, cancel, dst)?;
    tracing::info!("Verifying {} files below {}", files.len(), dst.display());

    let results: Vec<(PathBuf, Result<u64, String>)> = files
        .par_iter()
        .map(|(path, node)| {
            if cancel.is_cancelled() {
                return Err(RestoreError::Cancelled);
            }
            check_file(repo, path, node).map(|r| (path.clone(), r))
        })
        .collect::<Result<_, _>>()?;

    let mut report = VerifyReport::default();
    for (path, result) in results {
        report.files_checked += 1;
        match result {
            Ok(bytes) => report.bytes_checked += bytes,
            Err(reason) => {
                tracing::warn!("Verification failed for {}: {}", path.display(), reason);
                report.issues.push(VerifyIssue { path, reason });
            }
        }
    }

    tracing::info!(
        "Verified {} files ({} bytes), {} issues",
        report.files_checked,
        report.bytes_checked,
        report.issues.len()
    );
    Ok(report)
}
