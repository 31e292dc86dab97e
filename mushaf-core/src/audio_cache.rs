//! Content-addressed on-disk cache of recitation audio.
//!
//! Files are named after the SHA-256 of their source URL, so the same URL
//! always maps to the same file. The directory holds at most `max_files`
//! files; the oldest by modification time go first.

use crate::error::{CoreError, Result};
use crate::fetch::AudioFetcher;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};
use url::Url;

const LOG_TARGET: &str = "mushaf::audio_cache";

const DEFAULT_EXTENSION: &str = "mp3";
const PARTIAL_SUFFIX: &str = "part";

static PARTIAL_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct AudioCache {
    dir: PathBuf,
    max_files: usize,
    fetcher: Arc<dyn AudioFetcher>,
}

impl AudioCache {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, max_files: usize, fetcher: Arc<dyn AudioFetcher>) -> Self {
        Self {
            dir: dir.into(),
            max_files: max_files.max(1),
            fetcher,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file name for a URL: SHA-256 hex digest plus the URL's extension
    #[must_use]
    pub fn cache_key(url: &str) -> String {
        let digest = Sha256::digest(url.as_bytes());
        format!("{digest:x}.{}", url_extension(url))
    }

    fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(Self::cache_key(url))
    }

    /// Download target unique to this call, renamed into place when complete
    fn partial_path(&self, url: &str) -> PathBuf {
        let n = PARTIAL_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "{}.{}-{n}.{PARTIAL_SUFFIX}",
            Self::cache_key(url),
            std::process::id()
        ))
    }

    /// Path of the cached copy of `url`, if one exists
    pub async fn cached_path(&self, url: &str) -> Option<PathBuf> {
        let path = self.path_for(url);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Some(path),
            _ => None,
        }
    }

    /// Return the cached file for `url`, downloading it on a miss
    ///
    /// # Errors
    ///
    /// Returns `AudioFetchFailed` if the download fails, or an IO error if the
    /// file cannot be written.
    pub async fn download_and_cache(&self, url: &str) -> Result<PathBuf> {
        if let Some(path) = self.cached_path(url).await {
            return Ok(path);
        }

        let bytes = self.fetcher.fetch(url).await.map_err(|e| match e {
            CoreError::AudioFetchFailed { .. } => e,
            other => CoreError::AudioFetchFailed {
                url: url.to_string(),
                reason: other.to_string(),
            },
        })?;

        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(url);
        let partial = self.partial_path(url);
        if let Err(e) = persist(&partial, &path, &bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        info!(
            target: LOG_TARGET,
            "Cached {} ({} bytes, via {})",
            url,
            bytes.len(),
            self.fetcher.name()
        );

        if let Err(e) = self.evict(&path).await {
            warn!(target: LOG_TARGET, "Audio cache eviction failed: {}", e);
        }

        Ok(path)
    }

    /// Delete the oldest files until at most `max_files` remain, sparing `keep`
    async fn evict(&self, keep: &Path) -> Result<usize> {
        let mut files = self.cached_files().await?;
        if files.len() <= self.max_files {
            return Ok(0);
        }

        files.sort();
        let excess = files.len() - self.max_files;
        let mut removed = 0;
        for (_, path) in files.into_iter().filter(|(_, p)| p != keep).take(excess) {
            tokio::fs::remove_file(&path).await?;
            debug!(target: LOG_TARGET, "Evicted {:?}", path);
            removed += 1;
        }
        Ok(removed)
    }

    /// Completed cache files with their modification times
    async fn cached_files(&self) -> Result<Vec<(SystemTime, PathBuf)>> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == PARTIAL_SUFFIX) {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_file() {
                files.push((meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), path));
            }
        }
        Ok(files)
    }

    /// Number of completed files in the cache
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be read.
    pub async fn cached_file_count(&self) -> Result<usize> {
        Ok(self.cached_files().await?.len())
    }

    /// Delete every cached file
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read or a file cannot be removed.
    pub async fn clear(&self) -> Result<usize> {
        let files = self.cached_files().await?;
        let count = files.len();
        for (_, path) in files {
            tokio::fs::remove_file(&path).await?;
        }
        info!(target: LOG_TARGET, "Cleared {} cached audio files", count);
        Ok(count)
    }
}

async fn persist(partial: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(partial, bytes).await?;
    tokio::fs::rename(partial, path).await
}

/// Lowercase file extension of the URL path, or `mp3`
fn url_extension(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            let name = u.path_segments()?.next_back()?.to_string();
            let (_, ext) = name.rsplit_once('.')?;
            (!ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
                .then(|| ext.to_ascii_lowercase())
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Fetcher serving fixed bytes, or failing every request
    pub(crate) struct StaticFetcher {
        pub(crate) fail: bool,
        pub(crate) calls: AtomicUsize,
    }

    impl StaticFetcher {
        pub(crate) fn ok() -> Arc<Self> {
            Arc::new(Self {
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AudioFetcher for StaticFetcher {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CoreError::AudioFetchFailed {
                    url: url.to_string(),
                    reason: "offline".to_string(),
                });
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    fn set_mtime(path: &Path, secs: u64) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn test_cache_key_is_stable_and_keeps_extension() {
        let a = AudioCache::cache_key("https://example.org/a/001001.mp3");
        let b = AudioCache::cache_key("https://example.org/a/001001.mp3");
        let c = AudioCache::cache_key("https://example.org/a/001002.mp3");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.ends_with(".mp3"));
        assert_eq!(a.len(), 64 + 4);
    }

    #[test]
    fn test_url_extension() {
        assert_eq!(url_extension("https://x.org/a/b.OGG"), "ogg");
        assert_eq!(url_extension("https://x.org/a/b"), "mp3");
        assert_eq!(url_extension("https://x.org/a/b.mp3?token=1"), "mp3");
        assert_eq!(url_extension("not a url"), "mp3");
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher::ok();
        let cache = AudioCache::new(dir.path(), 10, fetcher.clone());
        let url = "https://example.org/001001.mp3";

        assert!(cache.cached_path(url).await.is_none());
        let path = cache.download_and_cache(url).await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), url.as_bytes());
        assert_eq!(cache.cached_path(url).await, Some(path.clone()));

        // Second call is served from disk
        assert_eq!(cache.download_and_cache(url).await.unwrap(), path);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_download_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(dir.path(), 10, StaticFetcher::failing());
        let result = cache.download_and_cache("https://example.org/x.mp3").await;
        assert!(matches!(result, Err(CoreError::AudioFetchFailed { .. })));
        assert_eq!(cache.cached_file_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_evicts_oldest_beyond_bound() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(dir.path(), 3, StaticFetcher::ok());

        let mut paths = Vec::new();
        for (i, secs) in [(1, 100), (2, 300), (3, 200)] {
            let path = cache
                .download_and_cache(&format!("https://example.org/{i}.mp3"))
                .await
                .unwrap();
            set_mtime(&path, secs);
            paths.push(path);
        }

        let newest = cache.download_and_cache("https://example.org/4.mp3").await.unwrap();

        assert_eq!(cache.cached_file_count().await.unwrap(), 3);
        assert!(!paths[0].exists());
        assert!(paths[1].exists());
        assert!(paths[2].exists());
        assert!(newest.exists());
    }

    fn partial_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == PARTIAL_SUFFIX)
            })
            .count()
    }

    #[tokio::test]
    async fn test_concurrent_downloads_of_same_url() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(dir.path(), 10, StaticFetcher::ok());
        let url = "https://example.org/002255.mp3";

        let (a, b) = tokio::join!(cache.download_and_cache(url), cache.download_and_cache(url));

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(cache.cached_file_count().await.unwrap(), 1);
        assert_eq!(partial_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_failed_rename_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(dir.path(), 10, StaticFetcher::ok());
        let url = "https://example.org/003001.mp3";

        // A directory squatting on the target path makes the rename fail
        std::fs::create_dir(dir.path().join(AudioCache::cache_key(url))).unwrap();

        assert!(cache.download_and_cache(url).await.is_err());
        assert_eq!(partial_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(dir.path(), 10, StaticFetcher::ok());
        cache.download_and_cache("https://example.org/1.mp3").await.unwrap();
        cache.download_and_cache("https://example.org/2.mp3").await.unwrap();
        assert_eq!(cache.clear().await.unwrap(), 2);
        assert_eq!(cache.cached_file_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_directory_counts_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AudioCache::new(dir.path().join("nope"), 10, StaticFetcher::ok());
        assert_eq!(cache.cached_file_count().await.unwrap(), 0);
    }
}
