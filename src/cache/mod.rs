//! Repository cache: parsed package lists keyed by repository (bulk indexes)
//! or by repository plus resolved URL (API responses).
//!
//! Entries are immutable once stored; a refresh replaces the `Arc` under the
//! write lock, so readers always see a complete entry. Expired entries stay
//! readable for stale fallback until [`RepositoryCache::cleanup_expired`].

mod store;

pub use store::CacheStore;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::types::Package;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache entry encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub repository: String,
    /// Resolved request URL for API responses; `None` for a full index.
    #[serde(default)]
    pub item: Option<String>,
}

impl CacheKey {
    pub fn bulk(repository: &str) -> Self {
        Self {
            repository: repository.to_string(),
            item: None,
        }
    }

    pub fn api(repository: &str, url: &str) -> Self {
        Self {
            repository: repository.to_string(),
            item: Some(url.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub packages: Vec<Package>,
    pub fetched_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl CacheEntry {
    pub fn new(key: CacheKey, packages: Vec<Package>, ttl: Duration) -> Self {
        Self {
            key,
            packages,
            fetched_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Valid iff `now - fetched_at < ttl`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.fetched_at).to_std() {
            Ok(age) => age < self.ttl(),
            // fetched_at in the future (clock skew)
            Err(_) => self.ttl_secs > 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

/// Outcome of [`RepositoryCache::load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub valid: usize,
    pub expired: usize,
    pub packages: usize,
}

pub struct RepositoryCache {
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
    store: Option<CacheStore>,
    /// Held across a memory update and its disk write so the store applies
    /// changes in the same order as the map.
    persist: Mutex<()>,
}

impl RepositoryCache {
    /// Memory-only cache.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store: None,
            persist: Mutex::new(()),
        }
    }

    /// Cache persisted under `dir`.
    pub fn persistent(dir: PathBuf) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store: Some(CacheStore::new(dir)),
            persist: Mutex::new(()),
        }
    }

    /// Entry for `key`, valid or not.
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.entries.read().await.get(key).cloned()
    }

    /// Store a package list. The in-memory entry is replaced even when
    /// persisting it fails.
    pub async fn put(
        &self,
        key: CacheKey,
        packages: Vec<Package>,
        ttl: Duration,
    ) -> Result<Arc<CacheEntry>, CacheError> {
        let entry = Arc::new(CacheEntry::new(key, packages, ttl));
        self.insert(entry.clone()).await?;
        Ok(entry)
    }

    /// Store a prepared entry under its own key. Same semantics as
    /// [`put`](Self::put).
    pub async fn insert(&self, entry: Arc<CacheEntry>) -> Result<(), CacheError> {
        let _persist = self.persist.lock().await;
        self.entries.write().await.insert(entry.key.clone(), entry.clone());

        if let Some(store) = &self.store {
            store.write(&entry).await?;
        }
        Ok(())
    }

    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let _persist = self.persist.lock().await;
        let removed = self.entries.write().await.remove(key).is_some();
        if let Some(store) = &self.store {
            store.delete(key).await?;
        }
        Ok(removed)
    }

    /// Drop every entry (bulk and API) of one repository.
    pub async fn invalidate_repository(&self, repository: &str) -> Result<usize, CacheError> {
        let _persist = self.persist.lock().await;
        let removed = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|k, _| k.repository != repository);
            before - entries.len()
        };
        if let Some(store) = &self.store {
            store.delete_repository(repository).await?;
        }
        debug!(repository, removed, "invalidated repository cache");
        Ok(removed)
    }

    pub fn is_valid(&self, entry: &CacheEntry) -> bool {
        entry.is_valid()
    }

    /// Remove expired entries; returns how many were removed.
    pub async fn cleanup_expired(&self) -> Result<usize, CacheError> {
        let _persist = self.persist.lock().await;
        let now = Utc::now();
        let expired: Vec<CacheKey> = {
            let mut entries = self.entries.write().await;
            let keys: Vec<CacheKey> = entries
                .iter()
                .filter(|(_, e)| !e.is_valid_at(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };

        if let Some(store) = &self.store {
            for key in &expired {
                store.delete(key).await?;
            }
        }
        info!(removed = expired.len(), "removed expired cache entries");
        Ok(expired.len())
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        let _persist = self.persist.lock().await;
        self.entries.write().await.clear();
        if let Some(store) = &self.store {
            store.clear().await?;
        }
        Ok(())
    }

    /// Populate memory from disk. Files that fail to decode are skipped;
    /// entries already in memory win over their on-disk copy.
    pub async fn load(&self) -> Result<LoadReport, CacheError> {
        let Some(store) = &self.store else {
            return Ok(LoadReport::default());
        };

        let (disk, skipped) = store.read_all().await?;
        let mut entries = self.entries.write().await;
        let mut loaded = 0;
        for entry in disk {
            if !entries.contains_key(&entry.key) {
                entries.insert(entry.key.clone(), Arc::new(entry));
                loaded += 1;
            }
        }

        info!(loaded, skipped, dir = %store.root().display(), "loaded persistent cache");
        Ok(LoadReport { loaded, skipped })
    }

    pub async fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let entries = self.entries.read().await;
        let valid = entries.values().filter(|e| e.is_valid_at(now)).count();
        CacheStats {
            entries: entries.len(),
            valid,
            expired: entries.len() - valid,
            packages: entries.values().map(|e| e.packages.len()).sum(),
        }
    }
}

impl Default for RepositoryCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::types::Package;

    pub fn package(name: &str, version: &str, repository: &str) -> Package {
        Package {
            name: name.to_string(),
            version: version.to_string(),
            description: None,
            homepage: None,
            license: None,
            maintainer: None,
            size_bytes: None,
            category: None,
            architecture: None,
            checksum: None,
            repository: repository.to_string(),
        }
    }
}
