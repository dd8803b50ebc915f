//! Concurrent image prefetch
//!
//! Fans out one fetch task per URL with bounded concurrency and lands
//! every URL in a terminal cache state. Concurrent requests for the same
//! URL coalesce into a single network call; no individual failure aborts
//! a batch. Progress is reported over a channel after each completion.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::cache::{CachedImage, ImageCache};

/// Default per-request timeout
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default fetch parallelism per batch
const DEFAULT_MAX_CONCURRENT: usize = 6;

/// Tuning knobs for the prefetch pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Timeout covering the whole request, body included
    pub request_timeout: Duration,
    /// Maximum in-flight fetches per batch
    pub max_concurrent: usize,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

impl PreloadConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }
}

/// Progress snapshot sent after each individual completion.
///
/// `completed` only ever grows; the final event has
/// `completed == total` and an exact `succeeded` count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadProgress {
    pub completed: usize,
    pub succeeded: usize,
    pub total: usize,
}

/// Fetches, decodes, and caches images ahead of rendering.
pub struct Preloader {
    client: reqwest::Client,
    cache: Arc<ImageCache>,
    config: PreloadConfig,
    /// Per-URL fetch gates; concurrent callers for one URL serialize
    /// here and all but the first resolve from cache
    in_flight: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Preloader {
    pub fn new(cache: Arc<ImageCache>) -> Self {
        Self::with_config(cache, PreloadConfig::default())
    }

    pub fn with_config(cache: Arc<ImageCache>, config: PreloadConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache,
            config,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Replace the HTTP client, keeping cache and gates.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Fetch every URL not already cached and fresh. Returns the number
    /// of URLs whose terminal state holds a decoded image.
    pub async fn preload(&self, urls: &[String]) -> usize {
        let (tx, _rx) = mpsc::unbounded_channel();
        self.preload_with_progress(urls, tx).await
    }

    /// Like [`preload`](Self::preload), emitting a [`PreloadProgress`]
    /// after each completion. A dropped receiver is fine; fetches run to
    /// completion and the cache still fills.
    pub async fn preload_with_progress(
        &self,
        urls: &[String],
        progress_tx: mpsc::UnboundedSender<PreloadProgress>,
    ) -> usize {
        let total = urls.len();
        if total == 0 {
            return 0;
        }

        info!(
            count = total,
            concurrency = self.config.max_concurrent,
            "preloading images"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<bool>();

        let mut handles = Vec::with_capacity(total);
        for url in urls {
            let semaphore = semaphore.clone();
            let client = self.client.clone();
            let cache = self.cache.clone();
            let in_flight = self.in_flight.clone();
            let request_timeout = self.config.request_timeout;
            let url = url.clone();
            let done_tx = done_tx.clone();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let entry = fetch_one(&client, &cache, &in_flight, &url, request_timeout).await;
                let _ = done_tx.send(entry.image.is_some());
            });
            handles.push(handle);
        }
        drop(done_tx);

        // Single consumer keeps the completed count strictly increasing
        let mut completed = 0;
        let mut succeeded = 0;
        while let Some(success) = done_rx.recv().await {
            completed += 1;
            if success {
                succeeded += 1;
            }
            // Receiver may be gone (view disposed); sends become no-ops
            let _ = progress_tx.send(PreloadProgress {
                completed,
                succeeded,
                total,
            });
        }

        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "image fetch task panicked");
            }
        }

        info!(succeeded, total, "preload finished");
        succeeded
    }
}

/// Resolve one URL to a terminal cache state.
///
/// The per-URL gate guarantees a single network call even when callers
/// race: late arrivals block on the gate, then resolve from the cache
/// entry the winner stored.
async fn fetch_one(
    client: &reqwest::Client,
    cache: &ImageCache,
    in_flight: &DashMap<String, Arc<Mutex<()>>>,
    url: &str,
    request_timeout: Duration,
) -> CachedImage {
    if let Some(entry) = cache.get_cached(url) {
        debug!(url, "image already cached");
        return entry;
    }

    // Clone the gate out of the map entry before any await
    let gate = in_flight
        .entry(url.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone();
    let _guard = gate.lock().await;

    // A coalesced caller may have landed the entry while we waited
    if let Some(entry) = cache.get_cached(url) {
        debug!(url, "image cached while waiting on fetch gate");
        return entry;
    }

    let entry = match fetch_and_decode(client, url, request_timeout).await {
        Ok((image, bytes)) => {
            debug!(url, bytes = bytes.len(), "image fetched");
            cache.store_success(url, image, &bytes)
        }
        Err(reason) => {
            warn!(url, reason = %reason, "image fetch failed");
            cache.store_failure(url, reason)
        }
    };
    in_flight.remove(url);
    entry
}

/// Fetch the bytes and decode them, mapping every failure mode to a
/// short reason string suitable for a broken-image placeholder.
async fn fetch_and_decode(
    client: &reqwest::Client,
    url: &str,
    request_timeout: Duration,
) -> Result<(DynamicImage, Vec<u8>), String> {
    let response = match client.get(url).timeout(request_timeout).send().await {
        Ok(response) => response,
        Err(err) => return Err(transport_reason(&err)),
    };

    let status = response.status();
    if !status.is_success() {
        return Err(format!(
            "HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        ));
    }

    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => return Err(transport_reason(&err)),
    };

    match image::load_from_memory(&bytes) {
        Ok(image) => Ok((image, bytes.to_vec())),
        Err(_) => Err("decode error".to_string()),
    }
}

fn transport_reason(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "timeout".to_string()
    } else {
        "network error".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(1, 1, image::Rgba([0, 128, 255, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .unwrap();
        bytes
    }

    fn test_preloader(config: PreloadConfig) -> (tempfile::TempDir, Arc<ImageCache>, Preloader) {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(ImageCache::with_dir(tmp.path().join("images")));
        let preloader = Preloader::with_config(cache.clone(), config);
        (tmp, cache, preloader)
    }

    /// Serves `body` with `status` until aborted, counting requests.
    async fn mock_server(
        status_line: &'static str,
        body: Vec<u8>,
    ) -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_server = hits.clone();

        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                hits_in_server.fetch_add(1, Ordering::SeqCst);
                let mut buf = vec![0u8; 4096];
                let _ = stream.read(&mut buf).await;

                let mut response = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                )
                .into_bytes();
                response.extend_from_slice(&body);
                let _ = stream.write_all(&response).await;
                let _ = stream.shutdown().await;
            }
        });

        (url, hits, handle)
    }

    /// Accepts connections but never answers.
    async fn mock_server_hang() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");

        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                held.push(stream);
            }
        });

        (url, handle)
    }

    /// An address nothing listens on.
    async fn dead_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{port}/gone.png")
    }

    #[tokio::test]
    async fn test_batch_survives_one_failure() {
        let (ok_url, _hits, ok_server) = mock_server("200 OK", png_bytes()).await;
        let (err_url, _err_hits, err_server) = mock_server("404 Not Found", b"nope".to_vec()).await;
        let (_tmp, cache, preloader) = test_preloader(PreloadConfig::default());

        let urls = vec![
            format!("{ok_url}/a.png"),
            format!("{ok_url}/b.png"),
            format!("{err_url}/c.png"),
        ];
        let succeeded = preloader.preload(&urls).await;
        assert_eq!(succeeded, 2);

        let broken = cache.get_cached(&urls[2]).unwrap();
        assert!(broken.loaded);
        assert!(broken.image.is_none());
        assert_eq!(broken.error.as_deref(), Some("HTTP 404 Not Found"));

        for url in &urls[..2] {
            assert!(cache.get_cached(url).unwrap().image.is_some());
        }

        ok_server.abort();
        err_server.abort();
    }

    #[tokio::test]
    async fn test_duplicate_url_fetched_once() {
        let (base, hits, server) = mock_server("200 OK", png_bytes()).await;
        let (_tmp, cache, preloader) = test_preloader(PreloadConfig::default());

        let url = format!("{base}/same.png");
        let urls = vec![url.clone(), url.clone(), url.clone()];
        let succeeded = preloader.preload(&urls).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(succeeded, 3);
        assert!(cache.get_cached(&url).unwrap().image.is_some());

        server.abort();
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_network_with_injected_client() {
        let (base, hits, server) = mock_server("200 OK", png_bytes()).await;
        let client = reqwest::Client::builder()
            .user_agent("traymark-test")
            .build()
            .unwrap();
        let _tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(ImageCache::with_dir(_tmp.path().join("images")));
        let preloader = Preloader::new(cache).with_client(client);

        let urls = vec![format!("{base}/pic.png")];
        assert_eq!(preloader.preload(&urls).await, 1);
        assert_eq!(preloader.preload(&urls).await, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        server.abort();
    }

    #[tokio::test]
    async fn test_timeout_reason() {
        let (base, server) = mock_server_hang().await;
        let config = PreloadConfig::default().with_request_timeout(Duration::from_millis(200));
        let (_tmp, cache, preloader) = test_preloader(config);

        let url = format!("{base}/slow.png");
        let succeeded = preloader.preload(&[url.clone()]).await;
        assert_eq!(succeeded, 0);
        assert_eq!(
            cache.get_cached(&url).unwrap().error.as_deref(),
            Some("timeout")
        );

        server.abort();
    }

    #[tokio::test]
    async fn test_network_error_reason() {
        let url = dead_url().await;
        let (_tmp, cache, preloader) = test_preloader(PreloadConfig::default());

        let succeeded = preloader.preload(&[url.clone()]).await;
        assert_eq!(succeeded, 0);
        assert_eq!(
            cache.get_cached(&url).unwrap().error.as_deref(),
            Some("network error")
        );
    }

    #[tokio::test]
    async fn test_decode_error_reason() {
        let (base, _hits, server) = mock_server("200 OK", b"this is not an image".to_vec()).await;
        let (_tmp, cache, preloader) = test_preloader(PreloadConfig::default());

        let url = format!("{base}/fake.png");
        let succeeded = preloader.preload(&[url.clone()]).await;
        assert_eq!(succeeded, 0);
        assert_eq!(
            cache.get_cached(&url).unwrap().error.as_deref(),
            Some("decode error")
        );

        server.abort();
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_complete() {
        let (base, _hits, server) = mock_server("200 OK", png_bytes()).await;
        let (_tmp, _cache, preloader) = test_preloader(PreloadConfig::default());

        let urls = vec![
            format!("{base}/a.png"),
            format!("{base}/b.png"),
            format!("{base}/c.png"),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let succeeded = preloader.preload_with_progress(&urls, tx).await;
        assert_eq!(succeeded, 3);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.completed, i + 1);
            assert_eq!(event.total, 3);
            assert!(event.succeeded <= event.completed);
        }
        let last = events.last().unwrap();
        assert_eq!(last.completed, 3);
        assert_eq!(last.succeeded, 3);

        server.abort();
    }

    #[tokio::test]
    async fn test_dropped_progress_receiver_is_harmless() {
        let (base, _hits, server) = mock_server("200 OK", png_bytes()).await;
        let (_tmp, cache, preloader) = test_preloader(PreloadConfig::default());

        let url = format!("{base}/pic.png");
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let succeeded = preloader.preload_with_progress(&[url.clone()], tx).await;
        assert_eq!(succeeded, 1);
        assert!(cache.get_cached(&url).unwrap().image.is_some());

        server.abort();
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let (_tmp, _cache, preloader) = test_preloader(PreloadConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(preloader.preload_with_progress(&[], tx).await, 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_concurrency_floor_of_one() {
        let (base, _hits, server) = mock_server("200 OK", png_bytes()).await;
        let config = PreloadConfig::default().with_max_concurrent(0);
        let (_tmp, _cache, preloader) = test_preloader(config);

        let urls = vec![format!("{base}/a.png"), format!("{base}/b.png")];
        assert_eq!(preloader.preload(&urls).await, 2);

        server.abort();
    }

    #[test]
    fn test_config_defaults() {
        let config = PreloadConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.max_concurrent, 6);
    }

    #[test]
    fn test_config_roundtrips_through_serde() {
        let config = PreloadConfig::default().with_max_concurrent(2);
        let json = serde_json::to_string(&config).unwrap();
        let back: PreloadConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_concurrent, 2);
        assert_eq!(back.request_timeout, config.request_timeout);
    }
}
