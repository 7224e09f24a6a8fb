//! Pluggable handling of per-entry restore errors
//!
//! `Ok(())` from a handler downgrades the error and the restore continues;
//! `Err` makes it fatal for the whole run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::RestoreError;
use crate::snapshot::Node;

/// Decides whether a per-entry error aborts the restore
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, path: &Path, node: Option<&Node>, err: RestoreError) -> Result<(), RestoreError>;
}

impl<F> ErrorHandler for F
where
    F: Fn(&Path, Option<&Node>, RestoreError) -> Result<(), RestoreError> + Send + Sync,
{
    fn handle(&self, path: &Path, node: Option<&Node>, err: RestoreError) -> Result<(), RestoreError> {
        self(path, node, err)
    }
}

/// Every error is fatal
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortOnError;

impl ErrorHandler for AbortOnError {
    fn handle(&self, _path: &Path, _node: Option<&Node>, err: RestoreError) -> Result<(), RestoreError> {
        Err(err)
    }
}

/// A downgraded error kept for the final report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreWarning {
    pub path: PathBuf,
    pub message: String,
}

/// Downgrades every error to a warning and keeps going
#[derive(Debug, Default)]
pub struct CollectWarnings {
    warnings: Mutex<Vec<RestoreWarning>>,
}

impl CollectWarnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> Vec<RestoreWarning> {
        self.warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self) -> usize {
        self.warnings.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl ErrorHandler for CollectWarnings {
    fn handle(&self, path: &Path, _node: Option<&Node>, err: RestoreError) -> Result<(), RestoreError> {
        // a cancelled run must still stop
        if err.is_cancelled() {
            return Err(err);
        }

        tracing::warn!("Ignoring error for {}: {}", path.display(), err);
        self.warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RestoreWarning {
                path: path.to_path_buf(),
                message: err.to_string(),
            });
        Ok(())
    }
}
