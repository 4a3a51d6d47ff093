//! Content-addressed cache of analysis results and translations.
//!
//! The cache is the only authority on whether a file changed: an entry is usable only when its
//! stored digest equals the digest of the file's current bytes. When the backing store cannot be
//! reached every file is treated as changed, so the worst outcome of an outage is extra work.

mod backend;

pub use backend::{DirStore, MemoryStore, RedisStore, StoreBackend, StoreError};

use chrono::{DateTime, Utc};
use modernize_core::ContentDigest;
use python_analyzer::AnalysisRecord;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One file per entry under the state directory.
    #[default]
    Dir,
    Redis,
    Memory,
    /// Caching disabled: every file is converted on every run.
    None,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendKind,
    pub redis_url: String,
    pub key_prefix: String,
    /// Expiry for Redis entries; 0 keeps them forever.
    pub ttl_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            backend: BackendKind::Dir,
            redis_url: "redis://127.0.0.1:6379".into(),
            key_prefix: "modernize:".into(),
            ttl_secs: 0,
            connect_timeout_secs: 5,
        }
    }
}

impl Config {
    pub const FIELDS: &[&str] = &[
        "backend",
        "redis_url",
        "key_prefix",
        "ttl_secs",
        "connect_timeout_secs",
    ];

    /// Returns a mock config for testing.
    pub fn mock() -> Config {
        Config {
            backend: BackendKind::Memory,
            ..Config::default()
        }
    }

    pub fn validate(&self) {
        if self.backend == BackendKind::Redis && !self.redis_url.starts_with("redis://") {
            warn!(
                "tools.structural_cache.redis_url `{}` does not look like a redis:// URL",
                self.redis_url
            );
        }
        if self.backend == BackendKind::None {
            info!("Structural caching is disabled; every file will be converted");
        }
    }
}

/// Translation output plus what produced it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CachedTranslation {
    pub output: String,
    pub metadata: TranslationMetadata,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TranslationMetadata {
    pub module: String,
    pub go_file: String,
    /// Name of the inference service that produced the output.
    pub service: String,
    pub attempts: u32,
    pub translated_at: DateTime<Utc>,
}

/// What is persisted per source path.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CacheEntry {
    pub digest: ContentDigest,
    pub analysis: Option<AnalysisRecord>,
    pub translation: Option<CachedTranslation>,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    fn empty(digest: &ContentDigest) -> CacheEntry {
        CacheEntry {
            digest: digest.clone(),
            analysis: None,
            translation: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CacheStats {
    pub backend: String,
    pub available: bool,
    /// None when the backend could not be asked.
    pub entries: Option<usize>,
    pub hits: u64,
    pub misses: u64,
}

pub struct StructuralCache {
    backend: Option<Box<dyn StoreBackend>>,
    unavailable_reason: Option<String>,
    force: bool,
    ttl: Option<Duration>,
    warned: AtomicBool,
    warnings: Mutex<Vec<String>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

fn entry_key(path: &Path) -> String {
    format!("entry:{}", path.display())
}

impl StructuralCache {
    pub fn new(backend: Box<dyn StoreBackend>) -> StructuralCache {
        StructuralCache::with_backend(Some(backend), None)
    }

    /// A cache with no reachable store. Every file reads as stale.
    pub fn unavailable(reason: impl Into<String>) -> StructuralCache {
        StructuralCache::with_backend(None, Some(reason.into()))
    }

    fn with_backend(
        backend: Option<Box<dyn StoreBackend>>,
        unavailable_reason: Option<String>,
    ) -> StructuralCache {
        StructuralCache {
            backend,
            unavailable_reason,
            force: false,
            ttl: None,
            warned: AtomicBool::new(false),
            warnings: Mutex::new(Vec::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Opens the configured backend. Failing to reach it is not fatal.
    pub fn open(config: &Config, state_dir: &Path) -> StructuralCache {
        let backend: Result<Box<dyn StoreBackend>, StoreError> = match config.backend {
            BackendKind::Dir => DirStore::open(state_dir.join("cache"))
                .map(|s| Box::new(s) as Box<dyn StoreBackend>),
            BackendKind::Redis => RedisStore::connect(
                &config.redis_url,
                &config.key_prefix,
                Duration::from_secs(config.connect_timeout_secs),
            )
            .map(|s| Box::new(s) as Box<dyn StoreBackend>),
            BackendKind::Memory => Ok(Box::new(MemoryStore::new())),
            BackendKind::None => Err(StoreError::Unavailable("caching disabled".into())),
        };
        let cache = match backend {
            Ok(backend) => {
                info!("Structural cache backend: {}", backend.name());
                StructuralCache::new(backend)
            }
            Err(e) => StructuralCache::unavailable(e.to_string()),
        };
        match config.ttl_secs {
            0 => cache,
            secs => cache.with_ttl(Duration::from_secs(secs)),
        }
    }

    /// When set, every staleness check reports stale. Stored entries are left in place until
    /// fresh results overwrite them.
    pub fn with_force(mut self, force: bool) -> StructuralCache {
        self.force = force;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> StructuralCache {
        self.ttl = Some(ttl);
        self
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// Returns true if `content` differs from what was cached for `path`, or nothing usable is
    /// cached.
    pub fn is_stale(&self, path: &Path, content: &[u8]) -> bool {
        if self.force {
            return true;
        }
        let digest = ContentDigest::of(content);
        match self.load(path) {
            Some(entry) => entry.digest != digest,
            None => true,
        }
    }

    /// The cached analysis for `path`, if it was computed from content with `digest`.
    pub fn get_analysis(&self, path: &Path, digest: &ContentDigest) -> Option<AnalysisRecord> {
        self.load(path)
            .filter(|entry| entry.digest == *digest)
            .and_then(|entry| entry.analysis)
    }

    pub fn put_analysis(&self, path: &Path, digest: &ContentDigest, record: &AnalysisRecord) {
        self.update(path, digest, |entry| entry.analysis = Some(record.clone()));
    }

    /// The cached translation for `path`, if it was produced from content with `digest`. Counts
    /// as a cache hit or miss.
    pub fn get_translation(
        &self,
        path: &Path,
        digest: &ContentDigest,
    ) -> Option<CachedTranslation> {
        let translation = if self.force {
            None
        } else {
            self.load(path)
                .filter(|entry| entry.digest == *digest)
                .and_then(|entry| entry.translation)
        };
        match translation {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        translation
    }

    pub fn put_translation(
        &self,
        path: &Path,
        digest: &ContentDigest,
        output: &str,
        metadata: TranslationMetadata,
    ) {
        self.update(path, digest, |entry| {
            entry.translation = Some(CachedTranslation {
                output: output.to_string(),
                metadata,
            })
        });
    }

    /// Forgets everything cached for `path`.
    pub fn clear_file(&self, path: &Path) {
        if let Some(backend) = self.backend() {
            let key = entry_key(path);
            if let Err(e) = backend.delete(&key) {
                self.report_failure(&e);
            }
        }
    }

    /// Forgets everything. Returns the number of entries removed.
    pub fn clear_all(&self) -> usize {
        let Some(backend) = self.backend() else {
            return 0;
        };
        backend.clear().unwrap_or_else(|e| {
            self.report_failure(&e);
            0
        })
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            backend: self
                .backend
                .as_ref()
                .map_or("unavailable", |b| b.name())
                .to_string(),
            available: self.is_available(),
            entries: self.backend().and_then(|b| b.len().ok()),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Run-level warnings, at most one per kind of failure.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = self.warnings.lock().map(|w| w.clone()).unwrap_or_default();
        if let Some(ref reason) = self.unavailable_reason {
            warnings.insert(0, format!("structural cache unavailable ({reason}); converting every file"));
        }
        warnings
    }

    fn backend(&self) -> Option<&dyn StoreBackend> {
        self.backend.as_deref()
    }

    fn load(&self, path: &Path) -> Option<CacheEntry> {
        let backend = self.backend()?;
        let key = entry_key(path);
        let bytes = match backend.get(&key) {
            Ok(bytes) => bytes?,
            Err(e) => {
                self.report_failure(&e);
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(
                    "{}",
                    StoreError::Corrupt {
                        key,
                        reason: e.to_string()
                    }
                );
                None
            }
        }
    }

    /// Applies `change` to the entry for `path`. An entry recorded for a different digest is
    /// discarded first.
    fn update(&self, path: &Path, digest: &ContentDigest, change: impl FnOnce(&mut CacheEntry)) {
        let Some(backend) = self.backend() else {
            return;
        };
        let mut entry = match self.load(path) {
            Some(entry) if entry.digest == *digest => entry,
            Some(_) => {
                debug!("Replacing outdated cache entry for {}", path.display());
                CacheEntry::empty(digest)
            }
            None => CacheEntry::empty(digest),
        };
        change(&mut entry);
        entry.updated_at = Utc::now();
        let result = serde_json::to_vec(&entry)
            .map_err(|e| StoreError::Corrupt {
                key: entry_key(path),
                reason: e.to_string(),
            })
            .and_then(|bytes| backend.set(&entry_key(path), &bytes, self.ttl));
        if let Err(e) = result {
            self.report_failure(&e);
        }
    }

    /// Logs a store failure once per run; later failures are only logged at debug level.
    fn report_failure(&self, error: &StoreError) {
        if self.warned.swap(true, Ordering::SeqCst) {
            debug!("Structural cache error: {error}");
            return;
        }
        let message = format!("structural cache store failed ({error}); treating files as changed");
        warn!("{message}");
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(message);
        }
    }
}
