//! Directory-backed repository
//!
//! Layout:
//! ```text
//! <root>/
//!   config.json
//!   snapshots/<id>.json
//!   trees/<id>.json
//!   blobs/<id>
//! ```
//! Object files are named by the SHA-256 of their bytes and re-verified on
//! every load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::{verify_content, BlobSource, TreeSource};
use crate::error::RepoError;
use crate::snapshot::{ContentId, Snapshot, Tree};

const CONFIG_FILE: &str = "config.json";
const REPO_VERSION: u32 = 1;

/// Shortest snapshot ID prefix accepted by `load_snapshot`
pub const MIN_ID_PREFIX: usize = 4;

#[derive(Debug, Serialize, Deserialize)]
struct RepoConfig {
    version: u32,
    created: DateTime<Utc>,
}

/// Repository stored in a local directory
#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    /// Create a new, empty repository at `root`
    pub fn init(root: impl AsRef<Path>) -> Result<Self, RepoError> {
        let root = root.as_ref().to_path_buf();
        if root.join(CONFIG_FILE).exists() {
            return Err(RepoError::AlreadyExists(root));
        }

        for dir in ["snapshots", "trees", "blobs"] {
            fs::create_dir_all(root.join(dir))?;
        }

        let repo = Self { root };
        let config = RepoConfig {
            version: REPO_VERSION,
            created: Utc::now(),
        };
        repo.write_atomic(&repo.root.join(CONFIG_FILE), &serde_json::to_vec_pretty(&config)?)?;

        tracing::info!("Initialized repository at {}", repo.root.display());
        Ok(repo)
    }

    /// Open an existing repository
    pub fn open(root: impl AsRef<Path>) -> Result<Self, RepoError> {
        let root = root.as_ref().to_path_buf();
        let config_path = root.join(CONFIG_FILE);
        let raw = match fs::read(&config_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RepoError::NotARepository(root))
            }
            Err(e) => return Err(e.into()),
        };

        let config: RepoConfig = serde_json::from_slice(&raw)?;
        if config.version != REPO_VERSION {
            return Err(RepoError::Corrupt {
                kind: "config",
                id: config_path.display().to_string(),
                reason: format!("unsupported repository version {}", config.version),
            });
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, kind: &str, id: &ContentId) -> PathBuf {
        match kind {
            "blob" => self.root.join("blobs").join(id.to_hex()),
            "tree" => self.root.join("trees").join(format!("{}.json", id.to_hex())),
            _ => self.root.join("snapshots").join(format!("{}.json", id.to_hex())),
        }
    }

    /// Write through a temp file so readers never see partial objects
    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), RepoError> {
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn store(&self, kind: &'static str, data: &[u8]) -> Result<ContentId, RepoError> {
        let id = ContentId::of(data);
        let path = self.object_path(kind, &id);
        if !path.exists() {
            self.write_atomic(&path, data)?;
            tracing::debug!("Stored {} {} ({} bytes)", kind, id.short(), data.len());
        }
        Ok(id)
    }

    fn load(&self, kind: &'static str, id: &ContentId) -> Result<Vec<u8>, RepoError> {
        let data = match fs::read(self.object_path(kind, id)) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RepoError::NotFound {
                    kind,
                    id: id.to_hex(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        verify_content(kind, id, &data)?;
        Ok(data)
    }

    pub fn save_blob(&self, data: &[u8]) -> Result<ContentId, RepoError> {
        self.store("blob", data)
    }

    pub fn save_tree(&self, tree: &Tree) -> Result<ContentId, RepoError> {
        self.store("tree", &tree.encode()?)
    }

    pub fn save_snapshot(&self, snapshot: &Snapshot) -> Result<ContentId, RepoError> {
        self.store("snapshot", &snapshot.encode()?)
    }

    /// Load a snapshot by full ID or unique prefix
    pub fn load_snapshot(&self, id_or_prefix: &str) -> Result<(ContentId, Snapshot), RepoError> {
        let prefix = id_or_prefix.to_ascii_lowercase();
        if prefix.len() < MIN_ID_PREFIX || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RepoError::InvalidId(id_or_prefix.to_string()));
        }

        let mut matches: Vec<ContentId> = self
            .snapshot_ids()?
            .into_iter()
            .filter(|id| id.to_hex().starts_with(&prefix))
            .collect();

        match matches.len() {
            0 => Err(RepoError::NotFound {
                kind: "snapshot",
                id: id_or_prefix.to_string(),
            }),
            1 => {
                let id = matches.remove(0);
                let raw = self.load("snapshot", &id)?;
                Ok((id, serde_json::from_slice(&raw)?))
            }
            n => Err(RepoError::AmbiguousId {
                prefix: id_or_prefix.to_string(),
                matches: n,
            }),
        }
    }

    /// All snapshots, newest first
    pub fn list_snapshots(&self) -> Result<Vec<(ContentId, Snapshot)>, RepoError> {
        let mut snapshots = Vec::new();
        for id in self.snapshot_ids()? {
            let raw = self.load("snapshot", &id)?;
            snapshots.push((id, serde_json::from_slice::<Snapshot>(&raw)?));
        }
        snapshots.sort_by(|a, b| b.1.time.cmp(&a.1.time));
        Ok(snapshots)
    }

    fn snapshot_ids(&self) -> Result<Vec<ContentId>, RepoError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join("snapshots"))? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Some(id) = ContentId::from_hex(stem) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

impl TreeSource for LocalRepository {
    fn load_tree(&self, id: &ContentId) -> Result<Tree, RepoError> {
        let raw = self.load("tree", id)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

impl BlobSource for LocalRepository {
    fn load_blob(&self, id: &ContentId) -> Result<Vec<u8>, RepoError> {
        self.load("blob", id)
    }
}
