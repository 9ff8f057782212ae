use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Suffix for on-disk cache entry files.
const CACHE_FILE_SUFFIX: &str = ".cache.json";

/// One cached table with its envelope, the same shape memory-side and on
/// disk: `{key, timestamp, rows}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub rows: Vec<Vec<String>>,
}

impl CacheEntry {
    fn new(key: String, rows: Vec<Vec<String>>) -> Self {
        Self {
            key,
            timestamp: Utc::now(),
            rows,
        }
    }

    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.timestamp)
    }
}

/// Result of a TTL-checked lookup.
#[derive(Debug)]
pub enum CacheLookup {
    Fresh(CacheEntry),
    /// The entry was past its ttl and has been evicted from both tiers; the
    /// payload is surfaced one last time so the read path can serve it with
    /// an explicit stale marker during an outage.
    Expired(CacheEntry),
    Miss,
}

/// TTL in-memory cache with a disk tier, shielding readers from upstream and
/// store outages.
///
/// `get` never returns a payload older than the ttl; `set` and `invalidate`
/// keep both tiers consistent per key. All disk entries are loaded eagerly at
/// startup, with freshness re-checked against the ttl on first `get`.
pub struct SmartCache {
    cache_dir: PathBuf,
    ttl: Duration,
    entries: HashMap<String, CacheEntry>,
}

impl SmartCache {
    pub fn new(cache_dir: PathBuf, ttl_seconds: i64) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache dir {}", cache_dir.display()))?;
        let mut cache = Self {
            cache_dir,
            ttl: Duration::seconds(ttl_seconds),
            entries: HashMap::new(),
        };
        cache.load_from_disk();
        Ok(cache)
    }

    fn cache_path(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.cache_dir.join(format!("{}{}", safe, CACHE_FILE_SUFFIX))
    }

    /// Load every disk entry into memory. Unreadable files are deleted on
    /// the spot rather than left to fail every future lookup.
    fn load_from_disk(&mut self) {
        let dir = match std::fs::read_dir(&self.cache_dir) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "could not scan cache directory");
                return;
            }
        };

        let mut loaded = 0;
        for entry in dir.flatten() {
            let path = entry.path();
            let is_cache_file = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(CACHE_FILE_SUFFIX))
                .unwrap_or(false);
            if !is_cache_file {
                continue;
            }
            match Self::read_entry_file(&path) {
                Ok(entry) => {
                    self.entries.insert(entry.key.clone(), entry);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "deleting unreadable cache file");
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        if loaded > 0 {
            info!(loaded, "loaded cache entries from disk");
        }
    }

    fn read_entry_file(path: &std::path::Path) -> Result<CacheEntry> {
        let contents = std::fs::read_to_string(path)?;
        let entry: CacheEntry = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache file {}", path.display()))?;
        Ok(entry)
    }

    /// TTL-checked lookup: memory first, disk on miss. An expired entry is
    /// evicted from both tiers and reported as [`CacheLookup::Expired`].
    pub fn lookup(&mut self, key: &str) -> CacheLookup {
        if let Some(entry) = self.entries.get(key) {
            if entry.age() < self.ttl {
                return CacheLookup::Fresh(entry.clone());
            }
            let entry = entry.clone();
            debug!(key, age_minutes = entry.age().num_minutes(), "cache entry expired");
            self.invalidate(key);
            return CacheLookup::Expired(entry);
        }

        // Disk fallback, for entries written by an earlier process run.
        let path = self.cache_path(key);
        if !path.exists() {
            return CacheLookup::Miss;
        }
        match Self::read_entry_file(&path) {
            Ok(entry) => {
                if entry.age() < self.ttl {
                    self.entries.insert(key.to_string(), entry.clone());
                    CacheLookup::Fresh(entry)
                } else {
                    debug!(key, "disk cache entry expired");
                    let _ = std::fs::remove_file(&path);
                    CacheLookup::Expired(entry)
                }
            }
            Err(e) => {
                // Corruption counts as a miss; the bad file goes away.
                warn!(key, error = %e, "deleting corrupt cache file");
                let _ = std::fs::remove_file(&path);
                CacheLookup::Miss
            }
        }
    }

    /// Fresh payload for a key, or None on miss/expiry.
    pub fn get(&mut self, key: &str) -> Option<CacheEntry> {
        match self.lookup(key) {
            CacheLookup::Fresh(entry) => Some(entry),
            _ => None,
        }
    }

    /// Store a payload in both tiers.
    pub fn set(&mut self, key: &str, rows: Vec<Vec<String>>) {
        let entry = CacheEntry::new(key.to_string(), rows);

        let path = self.cache_path(key);
        match serde_json::to_string(&entry) {
            Ok(contents) => {
                if let Err(e) = std::fs::write(&path, contents) {
                    warn!(key, error = %e, "failed to persist cache entry to disk");
                }
            }
            Err(e) => warn!(key, error = %e, "failed to serialize cache entry"),
        }

        self.entries.insert(key.to_string(), entry);
    }

    /// Remove one key from both tiers.
    pub fn invalidate(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            debug!(key, "cache invalidated");
        }
        let path = self.cache_path(key);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(key, error = %e, "could not delete disk cache file");
            }
        }
    }

    /// Clear everything from both tiers.
    pub fn invalidate_all(&mut self) {
        self.entries.clear();
        if let Ok(dir) = std::fs::read_dir(&self.cache_dir) {
            for entry in dir.flatten() {
                let path = entry.path();
                let is_cache_file = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(CACHE_FILE_SUFFIX))
                    .unwrap_or(false);
                if is_cache_file {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        info!("cache cleared completely");
    }

    pub fn cache_dir(&self) -> &std::path::Path {
        &self.cache_dir
    }

    /// Entry count and per-key ages, for diagnostics.
    pub fn stats(&self) -> CacheStats {
        let mut ages = HashMap::new();
        for (key, entry) in &self.entries {
            ages.insert(key.clone(), entry.age().num_minutes());
        }
        CacheStats {
            total_entries: self.entries.len(),
            age_minutes: ages,
            ttl_minutes: self.ttl.num_minutes(),
        }
    }
}

#[derive(Debug)]
pub struct CacheStats {
    pub total_entries: usize,
    pub age_minutes: HashMap<String, i64>,
    pub ttl_minutes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<Vec<String>> {
        vec![vec!["1".to_string(), "Alice".to_string(), "5000".to_string()]]
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = SmartCache::new(dir.path().to_path_buf(), 1800).unwrap();

        cache.set("Club A", rows());
        let entry = cache.get("Club A").unwrap();
        assert_eq!(entry.rows, rows());
        assert!(entry.age() < Duration::seconds(1800));

        // Disk tier was written alongside memory.
        assert!(cache.cache_path("Club A").exists());
    }

    #[test]
    fn test_expired_entry_evicted_from_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = SmartCache::new(dir.path().to_path_buf(), 1800).unwrap();
        cache.set("Club A", rows());

        // Simulate time past the ttl.
        cache
            .entries
            .get_mut("Club A")
            .unwrap()
            .timestamp = Utc::now() - Duration::seconds(3600);

        match cache.lookup("Club A") {
            CacheLookup::Expired(entry) => assert_eq!(entry.rows, rows()),
            other => panic!("expected Expired, got {other:?}"),
        }
        // Evicted: next get misses and the disk file is gone.
        assert!(cache.get("Club A").is_none());
        assert!(!cache.cache_path("Club A").exists());
    }

    #[test]
    fn test_startup_loads_disk_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = SmartCache::new(dir.path().to_path_buf(), 1800).unwrap();
            cache.set("Club A", rows());
        }

        let mut reborn = SmartCache::new(dir.path().to_path_buf(), 1800).unwrap();
        assert_eq!(reborn.get("Club A").unwrap().rows, rows());
    }

    #[test]
    fn test_stale_disk_entry_is_miss_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        let old = CacheEntry {
            key: "Club A".to_string(),
            timestamp: Utc::now() - Duration::seconds(7200),
            rows: rows(),
        };
        let path = dir.path().join("Club A.cache.json");
        std::fs::write(&path, serde_json::to_string(&old).unwrap()).unwrap();

        let mut cache = SmartCache::new(dir.path().to_path_buf(), 1800).unwrap();
        // Loaded eagerly, but the ttl check on first get rejects it.
        assert!(cache.get("Club A").is_none());
    }

    #[test]
    fn test_corrupt_disk_entry_deleted_and_missed() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = SmartCache::new(dir.path().to_path_buf(), 1800).unwrap();

        let path = cache.cache_path("Club A");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(cache.lookup("Club A"), CacheLookup::Miss));
        assert!(!path.exists());
    }

    #[test]
    fn test_invalidate_single_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = SmartCache::new(dir.path().to_path_buf(), 1800).unwrap();
        cache.set("Club A", rows());
        cache.set("Club B", rows());

        cache.invalidate("Club A");
        assert!(cache.get("Club A").is_none());
        assert!(cache.get("Club B").is_some());
    }

    #[test]
    fn test_invalidate_all() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = SmartCache::new(dir.path().to_path_buf(), 1800).unwrap();
        cache.set("Club A", rows());
        cache.set("Club B", rows());

        cache.invalidate_all();
        assert_eq!(cache.stats().total_entries, 0);
        assert!(cache.get("Club A").is_none());
        assert!(cache.get("Club B").is_none());
    }

    #[test]
    fn test_keys_with_separators_are_file_safe() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = SmartCache::new(dir.path().to_path_buf(), 1800).unwrap();
        cache.set("clubs/east wing", rows());
        assert!(cache.get("clubs/east wing").is_some());
        assert!(cache.cache_path("clubs/east wing").exists());
    }
}
