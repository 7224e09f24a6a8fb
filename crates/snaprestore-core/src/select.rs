//! Selection policies: which snapshot entries get restored
//!
//! A policy answers two questions per entry: is the entry itself restored,
//! and may anything below it be restored. Directories answering no to the
//! second question are never loaded.

use regex::Regex;
use std::path::{Component, Path};

use crate::error::RestoreError;
use crate::snapshot::Node;

/// Outcome of a selection query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// The entry itself is restored
    pub selected: bool,
    /// Descendants of the entry may be restored
    pub descend: bool,
}

impl Selection {
    pub const ALL: Selection = Selection {
        selected: true,
        descend: true,
    };

    pub const NONE: Selection = Selection {
        selected: false,
        descend: false,
    };
}

/// Decides per entry whether it is restored
pub trait SelectPolicy: Send + Sync {
    /// `snapshot_path` is the entry's absolute path inside the snapshot,
    /// `dest_path` where it would land on disk
    fn select(&self, snapshot_path: &Path, dest_path: &Path, node: &Node) -> Selection;
}

impl<F> SelectPolicy for F
where
    F: Fn(&Path, &Path, &Node) -> Selection + Send + Sync,
{
    fn select(&self, snapshot_path: &Path, dest_path: &Path, node: &Node) -> Selection {
        self(snapshot_path, dest_path, node)
    }
}

/// Restore everything
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectAll;

impl SelectPolicy for SelectAll {
    fn select(&self, _snapshot_path: &Path, _dest_path: &Path, _node: &Node) -> Selection {
        Selection::ALL
    }
}

/// Glob pattern over snapshot paths
///
/// `*` and `?` match within one path component, `**` matches any number of
/// components. A leading `/` anchors the pattern at the snapshot root;
/// otherwise it may match at any depth. Matching a directory matches
/// everything below it.
#[derive(Debug, Clone)]
pub struct Pattern {
    /// Matches a path or anything below it
    full: Regex,
    /// Matches the paths the pattern could still match below
    below: Regex,
}

impl Pattern {
    pub fn new(raw: &str) -> Result<Self, RestoreError> {
        let anchored = raw.starts_with('/');
        let mut parts: Vec<&str> = raw
            .split('/')
            .filter(|p| !p.is_empty() && *p != ".")
            .collect();
        if !anchored && parts.first() != Some(&"**") {
            parts.insert(0, "**");
        }

        let mut full = String::from("^");
        for part in &parts {
            full.push_str(&component_regex(part));
        }
        full.push_str("(?:/.*)?$");

        // nested optional groups accept every leading run of components
        let mut below = String::from("^");
        let mut open = 0;
        for part in &parts {
            if *part == "**" {
                below.push_str("(?:/.*)?");
                break;
            }
            below.push_str("(?:");
            below.push_str(&component_regex(part));
            open += 1;
        }
        below.push_str(&")?".repeat(open));
        below.push('$');

        let compile = |re: &str| {
            Regex::new(re).map_err(|e| RestoreError::InvalidPattern {
                pattern: raw.to_string(),
                reason: e.to_string(),
            })
        };
        Ok(Self {
            full: compile(full.as_str())?,
            below: compile(below.as_str())?,
        })
    }

    /// True when the pattern matches `path` or one of its ancestors
    pub fn matches(&self, path: &Path) -> bool {
        self.full.is_match(&normalize(path))
    }

    /// True when the pattern could match something below `path`
    pub fn may_match_below(&self, path: &Path) -> bool {
        self.below.is_match(&normalize(path))
    }
}

/// `/a/b` form of a path, without `.`/`..` or a trailing slash
fn normalize(path: &Path) -> String {
    let mut out = String::new();
    for comp in path.components() {
        if let Component::Normal(name) = comp {
            out.push('/');
            out.push_str(&name.to_string_lossy());
        }
    }
    out
}

/// Regex for one pattern component, including its leading `/`
fn component_regex(part: &str) -> String {
    if part == "**" {
        return "(?:/[^/]+)*".to_string();
    }
    let mut re = String::from("/");
    let mut literal = [0u8; 4];
    for c in part.chars() {
        match c {
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            _ => re.push_str(&regex::escape(c.encode_utf8(&mut literal))),
        }
    }
    re
}

/// Include/exclude filter over snapshot paths
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl PathFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, pattern: &str) -> Result<Self, RestoreError> {
        self.includes.push(Pattern::new(pattern)?);
        Ok(self)
    }

    pub fn exclude(mut self, pattern: &str) -> Result<Self, RestoreError> {
        self.excludes.push(Pattern::new(pattern)?);
        Ok(self)
    }
}

impl SelectPolicy for PathFilter {
    fn select(&self, snapshot_path: &Path, _dest_path: &Path, _node: &Node) -> Selection {
        if self.excludes.iter().any(|p| p.matches(snapshot_path)) {
            return Selection::NONE;
        }
        if self.includes.is_empty() {
            return Selection::ALL;
        }

        let selected = self.includes.iter().any(|p| p.matches(snapshot_path));
        let descend = selected || self.includes.iter().any(|p| p.may_match_below(snapshot_path));
        Selection { selected, descend }
    }
}
