//! Ephemeral artifact cache for response bodies too large to inline.
//!
//! Entries are JSON files named `probe_cache_<id>.json` in one directory.
//! Ids are 128-bit random hex strings. Every write sweeps entries older than
//! the TTL, and [`ArtifactCache::take`] deletes the entry it returns, so each
//! body can be downloaded once.
//!
//! A take first renames the file to a private claim name, so two concurrent
//! takes of the same id cannot both succeed.

mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, instrument, warn};

pub use error::CacheError;

use crate::clock::Clock;
use crate::probe::ResponseHeaders;

/// Default entry lifetime (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

const FILE_PREFIX: &str = "probe_cache_";
const FILE_SUFFIX: &str = ".json";
const STAGING_SUFFIX: &str = ".tmp";
const CLAIM_SUFFIX: &str = ".claim";

/// A cached body and the metadata needed to serve it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: String,
    pub body: Vec<u8>,
    pub headers: ResponseHeaders,
    pub suggested_filename: String,
    pub original_url: String,
    /// Unix seconds at creation.
    pub created_at: u64,
}

impl CacheEntry {
    /// Content type recorded with the entry, defaulting to `application/octet-stream`.
    #[must_use]
    pub fn content_type(&self) -> &str {
        self.headers
            .get("content-type")
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or("application/octet-stream")
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    body: String,
    headers: ResponseHeaders,
    suggested_filename: String,
    original_url: String,
    created_at: u64,
}

/// File-backed, read-once store with a fixed TTL.
#[derive(Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("dir", &self.dir)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ArtifactCache {
    /// Creates a cache rooted at `dir` with the default TTL.
    ///
    /// The directory is created lazily on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            ttl: DEFAULT_TTL,
            clock,
        }
    }

    /// Overrides the entry lifetime.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{id}{FILE_SUFFIX}"))
    }

    /// Stores a full body and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the directory or file cannot be written.
    #[instrument(skip(self, body, headers), fields(bytes = body.len()))]
    pub async fn put(
        &self,
        body: &[u8],
        headers: &ResponseHeaders,
        suggested_filename: &str,
        original_url: &str,
    ) -> Result<String, CacheError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CacheError::io(&self.dir, e))?;

        let id = new_id();
        let stored = StoredEntry {
            body: BASE64.encode(body),
            headers: headers.clone(),
            suggested_filename: suggested_filename.to_string(),
            original_url: original_url.to_string(),
            created_at: self.clock.unix_secs(),
        };
        let encoded =
            serde_json::to_vec(&stored).map_err(|e| CacheError::serialization(id.clone(), e))?;

        let staging = self.dir.join(format!(".{FILE_PREFIX}{id}{STAGING_SUFFIX}"));
        let path = self.path_for(&id);
        fs::write(&staging, encoded)
            .await
            .map_err(|e| CacheError::io(&staging, e))?;
        fs::rename(&staging, &path)
            .await
            .map_err(|e| CacheError::io(&path, e))?;
        debug!(id = %id, "Cached response body");

        if let Err(e) = self.sweep().await {
            warn!(error = %e, "Cache sweep failed");
        }
        Ok(id)
    }

    /// Removes and returns the entry for `id`.
    ///
    /// The id is reduced to lowercase hex before lookup. Unknown, already
    /// taken and expired ids yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the entry exists but cannot be read or decoded.
    #[instrument(skip(self))]
    pub async fn take(&self, id: &str) -> Result<Option<CacheEntry>, CacheError> {
        let id = sanitize_id(id);
        if id.is_empty() {
            return Ok(None);
        }

        let path = self.path_for(&id);
        let claim = self
            .dir
            .join(format!(".{FILE_PREFIX}{id}.{:08x}{CLAIM_SUFFIX}", rand::random::<u32>()));
        match fs::rename(&path, &claim).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        }

        let raw = match fs::read(&claim).await {
            Ok(raw) => raw,
            // A sweep may remove an expired claim before it is read.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                let _ = fs::remove_file(&claim).await;
                return Err(CacheError::io(&claim, e));
            }
        };
        if let Err(e) = fs::remove_file(&claim).await {
            warn!(path = %claim.display(), error = %e, "Failed to remove claimed cache file");
        }

        let stored: StoredEntry =
            serde_json::from_slice(&raw).map_err(|e| CacheError::serialization(id.clone(), e))?;
        if self.clock.unix_secs().saturating_sub(stored.created_at) > self.ttl.as_secs() {
            debug!(id = %id, "Cache entry expired before retrieval");
            return Ok(None);
        }
        let body = BASE64
            .decode(stored.body.as_bytes())
            .map_err(|e| CacheError::corrupt(id.clone(), e.to_string()))?;

        Ok(Some(CacheEntry {
            id,
            body,
            headers: stored.headers,
            suggested_filename: stored.suggested_filename,
            original_url: stored.original_url,
            created_at: stored.created_at,
        }))
    }

    /// Deletes entries whose file is older than the TTL, along with staging
    /// and claim files left behind by interrupted writes and takes. Returns
    /// the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the directory cannot be listed.
    pub async fn sweep(&self) -> Result<usize, CacheError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::io(&self.dir, e)),
        };

        let now = self.clock.now();
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.dir, e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !is_cache_file(&name) {
                continue;
            }
            let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age > self.ttl {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove expired cache entry"),
                }
            }
        }
        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
        }
        Ok(removed)
    }
}

/// Entry files plus the hidden `.tmp` staging and `.claim` files.
fn is_cache_file(name: &str) -> bool {
    if let Some(hidden) = name.strip_prefix('.') {
        return hidden.starts_with(FILE_PREFIX)
            && (hidden.ends_with(STAGING_SUFFIX) || hidden.ends_with(CLAIM_SUFFIX));
    }
    name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX)
}

fn new_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| c.to_ascii_lowercase())
        .filter(char::is_ascii_hexdigit)
        .collect()
}
