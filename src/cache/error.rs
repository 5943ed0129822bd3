//! Error types for the artifact cache.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised while storing or retrieving cached bodies.
///
/// A missing or expired entry is not an error; [`super::ArtifactCache::take`]
/// returns `Ok(None)` for it.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem failure (create, write, rename, read).
    #[error("cache IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The stored record could not be encoded or decoded.
    #[error("cache entry {id} could not be serialized: {source}")]
    Serialization {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// The stored record decoded but its body is unusable.
    #[error("cache entry {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },
}

// No From impls: every variant needs the path or id that failed.
impl CacheError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn serialization(id: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            id: id.into(),
            source,
        }
    }

    pub fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
