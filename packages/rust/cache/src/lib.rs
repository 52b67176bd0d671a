//! Two-tier resolution cache.
//!
//! The [`ResolutionCache`] holds resolved details for the lifetime of one
//! build. An optional JSON file seeds it once before any resolution
//! ([`ResolutionCache::ensure_loaded`]) and receives the whole in-memory tier
//! once after resolution ([`ResolutionCache::flush`]), only when something new
//! was stored.
//!
//! **Failure rules:** a missing file is an empty cache. Any other read, parse,
//! or write failure is logged as a warning and otherwise ignored; the cache
//! never fails a build.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use linkenrich_shared::{Identity, LinkEnrichError, ResolvedDetail, Result};

/// Identity → detail store with an optional persisted tier.
pub struct ResolutionCache {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<Identity, ResolvedDetail>>,
    loaded: OnceCell<()>,
    dirty: AtomicBool,
    flush_lock: Mutex<()>,
}

impl ResolutionCache {
    /// A cache persisted at `path`. Nothing is read until [`ensure_loaded`](Self::ensure_loaded).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_path(Some(path.into()))
    }

    /// A cache with no persisted tier.
    pub fn in_memory() -> Self {
        Self::with_path(None)
    }

    pub fn with_path(path: Option<PathBuf>) -> Self {
        Self {
            path,
            entries: RwLock::new(HashMap::new()),
            loaded: OnceCell::new(),
            dirty: AtomicBool::new(false),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the persisted tier into memory, once.
    ///
    /// Concurrent callers wait on the same load; later calls return immediately.
    /// Entries already stored in memory win over entries from the file.
    pub async fn ensure_loaded(&self) {
        self.loaded
            .get_or_init(|| async {
                let Some(path) = &self.path else {
                    return;
                };
                match read_cache_file(path).await {
                    Ok(seed) => {
                        let count = seed.len();
                        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
                        for (identity, detail) in seed {
                            entries.entry(identity).or_insert(detail);
                        }
                        info!(path = %path.display(), entries = count, "loaded link cache");
                    }
                    Err(e) if e.is_not_found() => {
                        debug!(path = %path.display(), "no link cache yet");
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "ignoring unreadable link cache");
                    }
                }
            })
            .await;
    }

    /// Cached detail for `identity`. Never performs I/O.
    pub fn lookup(&self, identity: &Identity) -> Option<ResolvedDetail> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    /// Insert into the memory tier and mark the persisted tier dirty.
    pub fn store(&self, identity: Identity, detail: ResolvedDetail) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity, detail);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether something was stored since the last successful flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write the memory tier to disk if anything was stored since the last flush.
    ///
    /// Returns `true` if the file was written.
    pub async fn flush(&self) -> bool {
        let Some(path) = &self.path else {
            return false;
        };
        let _guard = self.flush_lock.lock().await;
        if !self.dirty.swap(false, Ordering::AcqRel) {
            debug!("link cache unchanged, skipping flush");
            return false;
        }

        match self.write_snapshot(path).await {
            Ok(count) => {
                info!(path = %path.display(), entries = count, "flushed link cache");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to write link cache");
                self.dirty.store(true, Ordering::Release);
                false
            }
        }
    }

    async fn write_snapshot(&self, path: &Path) -> Result<usize> {
        let content = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            let sorted: BTreeMap<String, &ResolvedDetail> =
                entries.iter().map(|(k, v)| (k.key(), v)).collect();
            let json = serde_json::to_string_pretty(&sorted)
                .map_err(|e| LinkEnrichError::parse(format!("serialize link cache: {e}")))?;
            (json, sorted.len())
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LinkEnrichError::io(parent, e))?;
        }

        // Write-then-rename so a crash mid-write never leaves a truncated cache.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content.0)
            .await
            .map_err(|e| LinkEnrichError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| LinkEnrichError::io(path, e))?;

        Ok(content.1)
    }
}

/// Read and parse a persisted cache file. Unparseable keys, and entries whose
/// detail shape does not match their key, are skipped.
async fn read_cache_file(path: &Path) -> Result<HashMap<Identity, ResolvedDetail>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| LinkEnrichError::io(path, e))?;

    let parsed: BTreeMap<String, ResolvedDetail> = serde_json::from_str(&raw)
        .map_err(|e| LinkEnrichError::parse(format!("{}: {e}", path.display())))?;

    let mut out = HashMap::with_capacity(parsed.len());
    for (key, detail) in parsed {
        match Identity::from_key(&key) {
            Some(identity) if detail.fits(&identity) => {
                out.insert(identity, detail);
            }
            Some(_) => debug!(%key, "skipping cache entry with mismatched detail"),
            None => debug!(%key, "skipping unrecognized cache key"),
        }
    }
    Ok(out)
}
