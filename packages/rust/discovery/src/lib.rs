//! Component index discovery.
//!
//! Before scraping the whole catalog, espforge reads the documentation site's
//! component index page and lists the component pages it links to. Each page is
//! then handed to the extractor as a separate scrape job.

mod parser;

use espforge_shared::{EspforgeError, Result};
use reqwest::Client;
use tracing::{info, instrument};
use url::Url;

pub use parser::ComponentLink;

/// Maximum number of redirects to follow when fetching the index.
const MAX_REDIRECTS: usize = 3;

/// Default timeout in seconds for fetching the index.
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Maximum response size we consider valid (10 MB).
const MAX_RESPONSE_SIZE: u64 = 10 * 1024 * 1024;

/// User-Agent string for discovery requests.
const USER_AGENT: &str = concat!("espforge/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Discovery options
// ---------------------------------------------------------------------------

/// Configuration for the discovery process.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Timeout for HTTP requests in seconds.
    pub timeout_secs: u64,
    /// Keep at most this many links (in index order).
    pub max_components: Option<usize>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_components: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Fetch the component index at `index_url` and list the component pages it links to.
#[instrument(skip_all, fields(url = %index_url))]
pub async fn discover_components(
    index_url: &Url,
    opts: &DiscoveryOptions,
) -> Result<Vec<ComponentLink>> {
    let client = build_client(opts)?;
    let html = fetch_index(&client, index_url).await?;

    let mut links = parser::parse_component_index(&html, index_url);
    let found = links.len();
    if let Some(max) = opts.max_components {
        links.truncate(max);
    }

    info!(found, kept = links.len(), "component index discovered");
    Ok(links)
}

/// Parse an already-fetched index page.
pub fn parse_index(html: &str, index_url: &Url) -> Vec<ComponentLink> {
    parser::parse_component_index(html, index_url)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a reqwest client with appropriate settings.
fn build_client(opts: &DiscoveryOptions) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(std::time::Duration::from_secs(opts.timeout_secs))
        .build()
        .map_err(|e| EspforgeError::Network(format!("failed to build HTTP client: {e}")))
}

/// Fetch the index page body.
async fn fetch_index(client: &Client, url: &Url) -> Result<String> {
    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| EspforgeError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(EspforgeError::Network(format!("{url}: HTTP {status}")));
    }

    if let Some(len) = response.content_length() {
        if len > MAX_RESPONSE_SIZE {
            return Err(EspforgeError::validation(format!(
                "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
            )));
        }
    }

    response
        .text()
        .await
        .map_err(|e| EspforgeError::Network(format!("{url}: failed to read body: {e}")))
}
