//! Image URL extraction from parsed content

use std::collections::HashSet;

use tracing::debug;
use traymark_content::{parse_content, InlineNode};
use url::Url;

/// One view refresh's worth of content and the images it references.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub contents: Vec<String>,
    pub image_urls: Vec<String>,
}

impl RenderRequest {
    pub fn new(contents: Vec<String>) -> Self {
        let image_urls = extract_image_urls(&contents);
        Self {
            contents,
            image_urls,
        }
    }
}

/// Collect the distinct fetchable image URLs referenced by a batch of
/// raw content strings, in first-seen order.
///
/// Both source syntaxes land here because parsing already normalized
/// `<img>` tags and `![alt](url)` markdown into the same node type.
/// Code blocks never contribute URLs.
pub fn extract_image_urls(contents: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for raw in contents {
        for node in parse_content(raw) {
            node.visit_inline(&mut |inline| {
                if let InlineNode::ImageRef { url, .. } = inline {
                    if is_fetchable(url) && seen.insert(url.clone()) {
                        urls.push(url.clone());
                    }
                }
            });
        }
    }
    debug!(count = urls.len(), "extracted image urls");
    urls
}

/// Only absolute http/https URLs are fetchable; relative paths and
/// other schemes are silently excluded.
fn is_fetchable(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}
