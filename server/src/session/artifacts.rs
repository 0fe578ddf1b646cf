//! On-disk naming of session artifacts.
//!
//! Every artifact of session `n` lives in one directory and is named from a
//! fixed prefix:
//!
//! - `btree_n`: marker; contents are the creation time, mtime is the last touch
//! - `btree_n.l.blk`: leaf blocks (presence means the tree is built)
//! - `btree_n.n.blk`: internal-node blocks
//! - `btree_n.input`: staged raw upload
//! - `btree_n.staging.l.blk`, `btree_n.staging.n.blk`: engine output before commit
//! - `btree_n.staging.prev.n.blk`: previous node blocks while a commit is in flight

use std::path::{Path, PathBuf};

use super::SessionId;

/// File name prefix shared by all session artifacts.
pub const ARTIFACT_PREFIX: &str = "btree_";

const LEAF_SUFFIX: &str = ".l.blk";
const NODE_SUFFIX: &str = ".n.blk";
const INPUT_SUFFIX: &str = ".input";
const STAGING_SUFFIX: &str = ".staging";
const PREVIOUS_SUFFIX: &str = ".prev";

/// Resolves artifact paths for session ids.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    directory: PathBuf,
}

impl ArtifactLayout {
    #[must_use]
    pub const fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path prefix the engine derives its block files from.
    #[must_use]
    pub fn prefix(&self, id: SessionId) -> PathBuf {
        self.directory.join(format!("{ARTIFACT_PREFIX}{id}"))
    }

    /// The marker artifact reserving the id.
    #[must_use]
    pub fn marker(&self, id: SessionId) -> PathBuf {
        self.prefix(id)
    }

    #[must_use]
    pub fn leaf_blocks(&self, id: SessionId) -> PathBuf {
        with_suffix(&self.prefix(id), LEAF_SUFFIX)
    }

    #[must_use]
    pub fn node_blocks(&self, id: SessionId) -> PathBuf {
        with_suffix(&self.prefix(id), NODE_SUFFIX)
    }

    #[must_use]
    pub fn raw_input(&self, id: SessionId) -> PathBuf {
        with_suffix(&self.prefix(id), INPUT_SUFFIX)
    }

    /// Prefix handed to the engine so its writes land outside the live files.
    #[must_use]
    pub fn staging_prefix(&self, id: SessionId) -> PathBuf {
        with_suffix(&self.prefix(id), STAGING_SUFFIX)
    }

    #[must_use]
    pub fn staged_leaf_blocks(&self, id: SessionId) -> PathBuf {
        with_suffix(&self.staging_prefix(id), LEAF_SUFFIX)
    }

    #[must_use]
    pub fn staged_node_blocks(&self, id: SessionId) -> PathBuf {
        with_suffix(&self.staging_prefix(id), NODE_SUFFIX)
    }

    /// Live node blocks set aside until the staged leaf blocks are in place.
    #[must_use]
    pub fn previous_node_blocks(&self, id: SessionId) -> PathBuf {
        with_suffix(
            &with_suffix(&self.staging_prefix(id), PREVIOUS_SUFFIX),
            NODE_SUFFIX,
        )
    }

    /// Every artifact path except the marker.
    #[must_use]
    pub fn data_artifacts(&self, id: SessionId) -> [PathBuf; 6] {
        [
            self.leaf_blocks(id),
            self.node_blocks(id),
            self.raw_input(id),
            self.staged_leaf_blocks(id),
            self.staged_node_blocks(id),
            self.previous_node_blocks(id),
        ]
    }

    /// Extract the session id from an artifact file name.
    ///
    /// Returns `None` for files that are not session artifacts.
    #[must_use]
    pub fn session_of(file_name: &str) -> Option<SessionId> {
        let rest = file_name.strip_prefix(ARTIFACT_PREFIX)?;
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (digits, suffix) = rest.split_at(digits_end);
        if !(suffix.is_empty() || suffix.starts_with('.')) {
            return None;
        }
        digits.parse().ok()
    }
}

/// Append a suffix to a path without treating it as an extension.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(suffix);
    PathBuf::from(raw)
}
