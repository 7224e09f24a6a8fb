use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ContentId;

/// Type of a snapshot entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Dir,
    Symlink,
    Dev,
    CharDev,
    Fifo,
    Socket,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::File => write!(f, "file"),
            NodeType::Dir => write!(f, "dir"),
            NodeType::Symlink => write!(f, "symlink"),
            NodeType::Dev => write!(f, "block device"),
            NodeType::CharDev => write!(f, "char device"),
            NodeType::Fifo => write!(f, "fifo"),
            NodeType::Socket => write!(f, "socket"),
        }
    }
}

/// One entry of a tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Unix permission bits
    pub mode: u32,
    pub mtime: DateTime<Utc>,
    pub atime: DateTime<Utc>,
    #[serde(default)]
    pub size: u64,
    /// Hard link count at backup time
    #[serde(default = "default_links")]
    pub links: u64,
    #[serde(default)]
    pub inode: u64,
    #[serde(default)]
    pub device_id: u64,
    /// Content blobs in file order (regular files only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ContentId>,
    /// Child tree (directories only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtree: Option<ContentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

fn default_links() -> u64 {
    1
}

impl Node {
    fn bare(name: &str, node_type: NodeType, mode: u32, mtime: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            node_type,
            mode,
            mtime,
            atime: mtime,
            size: 0,
            links: 1,
            inode: 0,
            device_id: 0,
            content: Vec::new(),
            subtree: None,
            link_target: None,
        }
    }

    /// Regular file node backed by `content` blobs totalling `size` bytes
    pub fn file(name: &str, mode: u32, mtime: DateTime<Utc>, size: u64, content: Vec<ContentId>) -> Self {
        Self {
            size,
            content,
            ..Self::bare(name, NodeType::File, mode, mtime)
        }
    }

    /// Directory node pointing at its child tree
    pub fn dir(name: &str, mode: u32, mtime: DateTime<Utc>, subtree: ContentId) -> Self {
        Self {
            subtree: Some(subtree),
            ..Self::bare(name, NodeType::Dir, mode, mtime)
        }
    }

    pub fn symlink(name: &str, target: &str, mtime: DateTime<Utc>) -> Self {
        Self {
            link_target: Some(target.to_string()),
            ..Self::bare(name, NodeType::Symlink, 0o777, mtime)
        }
    }

    /// Node of a type without content (fifo, socket, devices)
    pub fn special(name: &str, node_type: NodeType, mode: u32, mtime: DateTime<Utc>) -> Self {
        Self::bare(name, node_type, mode, mtime)
    }

    /// Record hard link identity
    pub fn with_link_identity(mut self, device_id: u64, inode: u64, links: u64) -> Self {
        self.device_id = device_id;
        self.inode = inode;
        self.links = links;
        self
    }

    pub fn is_dir(&self) -> bool {
        self.node_type == NodeType::Dir
    }

    /// Non-directory entry sharing its inode with other entries
    pub fn is_hardlinked(&self) -> bool {
        !self.is_dir() && self.links > 1
    }

    /// A name that stays inside its directory when joined
    pub fn has_valid_name(&self) -> bool {
        !self.name.is_empty()
            && self.name != "."
            && self.name != ".."
            && !self.name.contains('/')
            && !self.name.contains(std::path::MAIN_SEPARATOR)
            && !self.name.contains('\0')
    }
}
