//! HTTPS client for fetching published revocation lists.
//!
//! A CRL source is a directory listing (an HTML index) whose links point at
//! the individual `.crl` files. The fetcher lists a source, resolves each
//! revocation-list link against it, and downloads the files.

use std::time::Duration;

use reqwest::{Client, ClientBuilder, Url};
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};

use crate::error::RvError;

/// HTTPS client for revocation list sources.
pub struct CrlFetcher {
    client: Client,
}

impl CrlFetcher {
    /// Create a new fetcher.
    pub fn new(timeout: Duration) -> Result<Self, RvError> {
        let connect_timeout = Duration::from_secs(3).min(timeout);

        let client = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .pool_idle_timeout(Duration::from_secs(5))
            .user_agent(format!("fdo-rv/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RvError::HttpsError {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    /// List the revocation-list links published at `source`.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn list(&self, source: &Url) -> Result<Vec<Url>, RvError> {
        let body = self.get(source).await?;
        let html = String::from_utf8_lossy(&body);
        let links = extract_crl_links(&html, source);

        info!(count = links.len(), "HTTPS: CRL listing received");
        Ok(links)
    }

    /// Download one file.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn download(&self, url: &Url) -> Result<Vec<u8>, RvError> {
        let body = self.get(url).await?;
        debug!(bytes = body.len(), "HTTPS: CRL downloaded");
        Ok(body)
    }

    async fn get(&self, url: &Url) -> Result<Vec<u8>, RvError> {
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "HTTPS request failed");
            RvError::HttpsError {
                message: format!("Request to {} failed: {}", url, e),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "HTTPS: Non-success status");
            return Err(RvError::HttpsError {
                message: format!("HTTP {} from {}", status, url),
            });
        }

        let bytes = response.bytes().await.map_err(|e| RvError::HttpsError {
            message: format!("Failed to read body from {}: {}", url, e),
        })?;

        Ok(bytes.to_vec())
    }
}

/// Extract every anchor `href` in `html` that names a revocation list,
/// resolved against `base`.
///
/// A link qualifies when its href contains `.crl` (case-insensitive).
/// Hrefs that do not resolve to a URL are skipped. Duplicates are dropped,
/// keeping first occurrence order.
pub fn extract_crl_links(html: &str, base: &Url) -> Vec<Url> {
    let Ok(anchors) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let mut links: Vec<Url> = Vec::new();

    for href in document
        .select(&anchors)
        .filter_map(|anchor| anchor.value().attr("href"))
    {
        let href = href.trim();
        if !href.to_ascii_lowercase().contains(".crl") {
            continue;
        }
        match base.join(href) {
            Ok(url) if !links.contains(&url) => links.push(url),
            Ok(_) => {},
            Err(e) => debug!(href = %href, error = %e, "Skipping unresolvable link"),
        }
    }

    links
}

/// Final path segment of a URL, usable as a local file name.
///
/// Returns `None` for URLs without a path, with a trailing slash, or whose
/// last segment is a relative path component.
pub fn file_name(url: &Url) -> Option<String> {
    let name = url.path_segments()?.next_back()?;
    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        return None;
    }
    Some(name.to_string())
}
