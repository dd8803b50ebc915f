//! URL-keyed image cache with TTL expiry
//!
//! Decoded images live in a concurrent in-memory map backed by one file
//! per image on disk. Filenames derive from the SHA-256 hash of the
//! source URL plus its sanitized basename. Entries expire 24 hours after
//! they were written; expiry evicts both layers. Failures are cached in
//! memory only, so a restart (or expiry) retries them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use image::DynamicImage;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Fixed entry lifetime, both in memory and on disk
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest basename fragment kept in a cache filename
const MAX_BASENAME_LEN: usize = 48;

/// Errors from cache maintenance operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache directory not available")]
    NoCacheDir,
}

/// One fetched image's outcome.
#[derive(Debug, Clone)]
pub struct CachedImage {
    pub source_url: String,
    /// Decoded bitmap, present only when loaded with no error
    pub image: Option<Arc<DynamicImage>>,
    /// Human-readable failure reason, mutually exclusive with `image`
    pub error: Option<String>,
    /// False while a fetch is still pending; terminal once true
    pub loaded: bool,
    pub cached_at: SystemTime,
}

impl CachedImage {
    /// Loaded and Failed are both terminal; either counts as fresh
    /// within the TTL window.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        if !self.loaded {
            return false;
        }
        match self.cached_at.elapsed() {
            Ok(age) => age <= ttl,
            // Clock moved backwards; keep the entry
            Err(_) => true,
        }
    }
}

/// Shared image cache: concurrent memory map plus one file per image.
pub struct ImageCache {
    entries: DashMap<String, CachedImage>,
    dir: PathBuf,
    ttl: Duration,
}

impl ImageCache {
    /// Cache rooted at the platform cache directory.
    pub fn new() -> Result<Self, CacheError> {
        let dir = default_cache_dir().ok_or(CacheError::NoCacheDir)?;
        Ok(Self::with_dir(dir))
    }

    /// Cache rooted at an explicit directory.
    pub fn with_dir(dir: PathBuf) -> Self {
        Self {
            entries: DashMap::new(),
            dir,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Look up a URL, enforcing the TTL on both layers.
    ///
    /// A fresh memory hit clones the entry (the decoded bitmap is
    /// shared, so repeated calls return bit-identical pixels). An
    /// expired entry is evicted from memory and disk. On a memory miss,
    /// a disk file younger than the TTL is decoded straight into the
    /// memory map; stale or unreadable files are deleted.
    pub fn get_cached(&self, url: &str) -> Option<CachedImage> {
        if let Some(entry) = self.entries.get(url) {
            if entry.is_fresh(self.ttl) {
                return Some(entry.clone());
            }
            drop(entry);
            self.evict(url);
            return None;
        }
        self.load_from_disk(url)
    }

    /// Record a decoded image and write its bytes to disk.
    ///
    /// Disk write failures are logged and non-fatal; the memory entry
    /// still serves the current session.
    pub fn store_success(&self, url: &str, image: DynamicImage, bytes: &[u8]) -> CachedImage {
        let entry = CachedImage {
            source_url: url.to_string(),
            image: Some(Arc::new(image)),
            error: None,
            loaded: true,
            cached_at: SystemTime::now(),
        };
        self.entries.insert(url.to_string(), entry.clone());
        if let Err(err) = self.write_disk(url, bytes) {
            warn!(url, error = %err, "failed to write image cache file");
        }
        entry
    }

    /// Record a terminal failure. Memory-only: the reason is worth
    /// showing for a day, not persisting.
    pub fn store_failure(&self, url: &str, reason: impl Into<String>) -> CachedImage {
        let entry = CachedImage {
            source_url: url.to_string(),
            image: None,
            error: Some(reason.into()),
            loaded: true,
            cached_at: SystemTime::now(),
        };
        self.entries.insert(url.to_string(), entry.clone());
        entry
    }

    /// Wipe the memory map and the entire backing directory.
    /// An absent directory is not an error.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Total bytes on disk, for the settings UI.
    pub fn disk_usage(&self) -> u64 {
        let mut size = 0u64;
        sum_dir(&self.dir, &mut size);
        size
    }

    fn evict(&self, url: &str) {
        self.entries.remove(url);
        let path = self.image_path(url);
        if path.exists() {
            if let Err(err) = std::fs::remove_file(&path) {
                warn!(url, error = %err, "failed to remove expired cache file");
            }
        }
        debug!(url, "evicted expired cache entry");
    }

    fn load_from_disk(&self, url: &str) -> Option<CachedImage> {
        let path = self.image_path(url);
        let meta = std::fs::metadata(&path).ok()?;
        let modified = meta.modified().ok()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        if age > self.ttl {
            if let Err(err) = std::fs::remove_file(&path) {
                warn!(url, error = %err, "failed to remove stale cache file");
            }
            return None;
        }

        let bytes = std::fs::read(&path).ok()?;
        match image::load_from_memory(&bytes) {
            Ok(decoded) => {
                // Anchor expiry to the original write, not this read
                let entry = CachedImage {
                    source_url: url.to_string(),
                    image: Some(Arc::new(decoded)),
                    error: None,
                    loaded: true,
                    cached_at: modified,
                };
                self.entries.insert(url.to_string(), entry.clone());
                debug!(url, "disk cache hit");
                Some(entry)
            }
            Err(err) => {
                warn!(url, error = %err, "cache file undecodable, removing");
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    fn write_disk(&self, url: &str, bytes: &[u8]) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.image_path(url), bytes)?;
        Ok(())
    }

    fn image_path(&self, url: &str) -> PathBuf {
        self.dir.join(cache_file_name(url))
    }
}

/// Deterministic cache filename: first 16 bytes of the URL's SHA-256 as
/// hex, plus the URL's path basename stripped to filesystem-safe
/// characters.
pub fn cache_file_name(url: &str) -> String {
    let hash = Sha256::digest(url.as_bytes());
    let hash = hex::encode(&hash[..16]);
    match sanitized_basename(url) {
        Some(name) => format!("{hash}_{name}"),
        None => hash,
    }
}

fn sanitized_basename(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let base = path.rsplit('/').next()?;
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .take(MAX_BASENAME_LEN)
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|base| base.join("traymark").join("images"))
}

/// Recursively sums file sizes.
fn sum_dir(dir: &Path, size: &mut u64) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            sum_dir(&path, size);
        } else if let Ok(meta) = entry.metadata() {
            *size += meta.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(1, 1, image::Rgba([255, 0, 0, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .unwrap();
        bytes
    }

    fn decoded_png() -> DynamicImage {
        image::load_from_memory(&png_bytes()).unwrap()
    }

    fn test_cache() -> (tempfile::TempDir, ImageCache) {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ImageCache::with_dir(tmp.path().join("images"));
        (tmp, cache)
    }

    #[test]
    fn store_and_get_within_ttl() {
        let (_tmp, cache) = test_cache();
        let url = "https://example.com/pic.png";

        cache.store_success(url, decoded_png(), &png_bytes());
        let entry = cache.get_cached(url).expect("entry should be fresh");

        assert!(entry.loaded);
        assert!(entry.error.is_none());
        assert!(entry.image.is_some());
        assert_eq!(entry.source_url, url);
    }

    #[test]
    fn get_cached_is_idempotent_and_shares_pixels() {
        let (_tmp, cache) = test_cache();
        let url = "https://example.com/pic.png";
        cache.store_success(url, decoded_png(), &png_bytes());

        let first = cache.get_cached(url).unwrap();
        let second = cache.get_cached(url).unwrap();
        let a = first.image.unwrap();
        let b = second.image.unwrap();
        assert!(Arc::ptr_eq(&a, &b), "clones must share the decoded bitmap");
    }

    #[test]
    fn unknown_url_is_none() {
        let (_tmp, cache) = test_cache();
        assert!(cache.get_cached("https://example.com/never.png").is_none());
    }

    #[test]
    fn expired_entry_evicts_memory_and_disk() {
        let (_tmp, cache) = test_cache();
        let cache = cache.with_ttl(Duration::ZERO);
        let url = "https://example.com/pic.png";

        cache.store_success(url, decoded_png(), &png_bytes());
        let path = cache.image_path(url);
        assert!(path.exists());

        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get_cached(url).is_none());
        assert!(!path.exists(), "expired disk file must be deleted");
        assert!(cache.entries.get(url).is_none());
    }

    #[test]
    fn disk_hit_survives_new_instance() {
        let (_tmp, cache) = test_cache();
        let url = "https://example.com/pic.png";
        cache.store_success(url, decoded_png(), &png_bytes());

        let fresh = ImageCache::with_dir(cache.dir.clone());
        let entry = fresh.get_cached(url).expect("disk hit should populate");
        assert!(entry.image.is_some());
        assert!(
            fresh.entries.get(url).is_some(),
            "disk hit must populate the memory map"
        );
    }

    #[test]
    fn stale_disk_file_is_deleted() {
        let (_tmp, cache) = test_cache();
        let url = "https://example.com/pic.png";
        cache.store_success(url, decoded_png(), &png_bytes());

        std::thread::sleep(Duration::from_millis(20));
        let strict = ImageCache::with_dir(cache.dir.clone()).with_ttl(Duration::ZERO);
        assert!(strict.get_cached(url).is_none());
        assert!(!strict.image_path(url).exists());
    }

    #[test]
    fn corrupt_disk_file_is_deleted() {
        let (_tmp, cache) = test_cache();
        let url = "https://example.com/pic.png";
        std::fs::create_dir_all(&cache.dir).unwrap();
        std::fs::write(cache.image_path(url), b"not an image").unwrap();

        assert!(cache.get_cached(url).is_none());
        assert!(!cache.image_path(url).exists());
    }

    #[test]
    fn failure_is_memory_only() {
        let (_tmp, cache) = test_cache();
        let url = "https://example.com/broken.png";

        cache.store_failure(url, "HTTP 404 Not Found");
        let entry = cache.get_cached(url).unwrap();
        assert!(entry.loaded);
        assert!(entry.image.is_none());
        assert_eq!(entry.error.as_deref(), Some("HTTP 404 Not Found"));
        assert!(!cache.image_path(url).exists());
    }

    #[test]
    fn clear_tolerates_missing_dir() {
        let (_tmp, cache) = test_cache();
        assert!(cache.clear().is_ok());
        assert!(cache.clear().is_ok());
    }

    #[test]
    fn clear_wipes_both_layers() {
        let (_tmp, cache) = test_cache();
        let url = "https://example.com/pic.png";
        cache.store_success(url, decoded_png(), &png_bytes());
        assert!(cache.disk_usage() > 0);

        cache.clear().unwrap();
        assert!(cache.get_cached(url).is_none());
        assert_eq!(cache.disk_usage(), 0);
    }

    #[test]
    fn file_name_is_stable_and_sanitized() {
        let url = "https://example.com/dir/img name(1).png?size=4#frag";
        let name = cache_file_name(url);
        assert_eq!(name, cache_file_name(url));
        assert!(name.contains("imgname1.png"));
        assert!(name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')));
    }

    #[test]
    fn file_names_differ_per_url() {
        let a = cache_file_name("https://example.com/a.png");
        let b = cache_file_name("https://example.com/b.png");
        assert_ne!(a, b);
    }
}
