//! On-disk persistence for cache entries.
//!
//! One JSON file per entry:
//! ```text
//! {cache_dir}/bulk/{repository}.json
//! {cache_dir}/api/{repository}/{sha256(item)}.json
//! ```
//!
//! Repository names are escaped so that distinct names never share a path:
//! lowercase ASCII letters, digits, `-` and `_` are kept and every other
//! byte becomes `%XX`.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::warn;

use super::{CacheEntry, CacheError, CacheKey};

const BULK_DIR: &str = "bulk";
const API_DIR: &str = "api";

#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the entry for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        let repository = escape(&key.repository);
        match &key.item {
            None => self.root.join(BULK_DIR).join(format!("{}.json", repository)),
            Some(item) => {
                let hash = hex::encode(Sha256::digest(item.as_bytes()));
                self.root.join(API_DIR).join(repository).join(format!("{}.json", hash))
            }
        }
    }

    /// Write an entry via a temp file in the same directory, then rename it
    /// into place.
    pub async fn write(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let path = self.path_for(&entry.key);
        let json = serde_json::to_vec(entry)?;

        tokio::task::spawn_blocking(move || write_atomic(&path, &json))
            .await
            .map_err(|e| CacheError::Io(std::io::Error::other(e)))?
    }

    pub async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every file belonging to `repository`.
    pub async fn delete_repository(&self, repository: &str) -> Result<(), CacheError> {
        self.delete(&CacheKey::bulk(repository)).await?;
        let dir = self.root.join(API_DIR).join(escape(repository));
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        for dir in [BULK_DIR, API_DIR] {
            match tokio::fs::remove_dir_all(self.root.join(dir)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Read every entry file. Unreadable or undecodable files are logged
    /// and counted, never fatal.
    pub async fn read_all(&self) -> Result<(Vec<CacheEntry>, usize), CacheError> {
        let mut files = Vec::new();
        collect_json_files(&self.root.join(BULK_DIR), &mut files).await?;

        let api_root = self.root.join(API_DIR);
        if let Ok(mut repos) = tokio::fs::read_dir(&api_root).await {
            while let Some(entry) = repos.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    collect_json_files(&entry.path(), &mut files).await?;
                }
            }
        }

        let mut entries = Vec::with_capacity(files.len());
        let mut skipped = 0;
        for path in files {
            let decoded = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<CacheEntry>(&bytes).map_err(CacheError::from),
                Err(e) => Err(e.into()),
            };
            match decoded {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(path = %path.display(), "skipping unreadable cache file: {}", e);
                    skipped += 1;
                }
            }
        }
        Ok((entries, skipped))
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CacheError::Io(e.error))?;
    Ok(())
}

async fn collect_json_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), CacheError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            files.push(path);
        }
    }
    Ok(())
}

/// Injective; the empty name maps to a lone `%`.
fn escape(name: &str) -> String {
    if name.is_empty() {
        return "%".to_string();
    }
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_paths() {
        let store = CacheStore::new(PathBuf::from("/cache"));
        assert_eq!(
            store.path_for(&CacheKey::bulk("apt-ubuntu-jammy")),
            PathBuf::from("/cache/bulk/apt-ubuntu-jammy.json")
        );

        let api = store.path_for(&CacheKey::api("pypi", "https://pypi.org/pypi/requests/json"));
        assert!(api.starts_with("/cache/api/pypi"));
        assert_eq!(api.file_stem().unwrap().len(), 64);

        assert_eq!(escape("zypper-opensuse-leap-15.6"), "zypper-opensuse-leap-15%2E6");
        assert_eq!(escape("../etc/passwd"), "%2E%2E%2Fetc%2Fpasswd");
        assert_eq!(escape(""), "%");
        assert_ne!(escape("a/b"), escape("a_b"));
        assert_ne!(escape("A"), escape("a"));
        assert_ne!(escape("%41"), escape("A"));
        assert_ne!(
            store.path_for(&CacheKey::bulk("a/b")),
            store.path_for(&CacheKey::bulk("a_b"))
        );
    }

    #[tokio::test]
    async fn test_dot_names_stay_inside_their_own_directory() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path().to_path_buf());

        let bulk = CacheEntry::new(CacheKey::bulk("apt-ubuntu-jammy"), Vec::new(), Duration::from_secs(60));
        let api = CacheEntry::new(CacheKey::api("npm", "https://registry.npmjs.org/left-pad"), Vec::new(), Duration::from_secs(60));
        store.write(&bulk).await.unwrap();
        store.write(&api).await.unwrap();

        for name in ["..", ".", ""] {
            store.delete_repository(name).await.unwrap();
        }

        let (mut entries, skipped) = store.read_all().await.unwrap();
        entries.sort_by(|a, b| a.key.repository.cmp(&b.key.repository));
        let keys: Vec<_> = entries.into_iter().map(|e| e.key).collect();
        assert_eq!(keys, [bulk.key, api.key]);
        assert_eq!(skipped, 0);
        let escaped = store.path_for(&CacheKey::api("..", "x"));
        assert_eq!(escaped.parent(), Some(dir.path().join("api/%2E%2E").as_path()));
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path().to_path_buf());

        let bulk = CacheEntry::new(CacheKey::bulk("alpine"), Vec::new(), Duration::from_secs(60));
        let api = CacheEntry::new(CacheKey::api("npm", "https://registry.npmjs.org/x"), Vec::new(), Duration::from_secs(60));
        store.write(&bulk).await.unwrap();
        store.write(&api).await.unwrap();

        let (entries, skipped) = store.read_all().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(skipped, 0);

        store.delete_repository("npm").await.unwrap();
        let (entries, _) = store.read_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, CacheKey::bulk("alpine"));

        store.clear().await.unwrap();
        assert!(store.read_all().await.unwrap().0.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_skipped() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path().to_path_buf());

        let good = CacheEntry::new(CacheKey::bulk("good"), Vec::new(), Duration::from_secs(60));
        store.write(&good).await.unwrap();
        tokio::fs::write(dir.path().join("bulk/bad.json"), b"{ truncated").await.unwrap();

        let (entries, skipped) = store.read_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("never-created"));
        let (entries, skipped) = store.read_all().await.unwrap();
        assert!(entries.is_empty());
        assert_eq!(skipped, 0);
        store.delete(&CacheKey::bulk("x")).await.unwrap();
    }
}
