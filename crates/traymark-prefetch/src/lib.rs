//! Image prefetching and caching for Traymark content
//!
//! Extracts image URLs from parsed content, fetches and decodes them
//! concurrently with bounded parallelism, and keeps every outcome in a
//! URL-keyed memory + disk cache with 24-hour expiry. Consumers render
//! straight from the cache; a failed image keeps its reason string and
//! source URL so the UI can draw a placeholder.

pub mod cache;
pub mod extract;
pub mod pipeline;

pub use cache::{cache_file_name, CacheError, CachedImage, ImageCache, DEFAULT_TTL};
pub use extract::{extract_image_urls, RenderRequest};
pub use pipeline::{PreloadConfig, PreloadProgress, Preloader};
