//! Component page extraction: fetching, strategy pipeline, raw records.
//!
//! This crate provides:
//! - [`Extractor`]: fetches one documentation page and produces a [`RawComponent`]
//! - [`strategies`]: the ordered extraction strategies (config lists, tables, ...)
//! - [`Fetcher`]: HTTP with retries, per-host rate limiting and cancellation
//!
//! Extraction has no persistence side effects.

mod error;
mod fetch;
mod fields;
mod page;
pub mod strategies;

use scraper::Html;
use tracing::{debug, info, instrument};
use url::Url;

use espforge_shared::{RawComponent, Result, ScrapeConfig};

pub use error::ExtractError;
pub use fetch::{CancelToken, Fetcher, HostRateLimiter};
pub use page::component_segments;
pub use strategies::{ExtractionStrategy, NO_STRATEGY, StrategyPipeline, StrategyResult};

/// Result of a successful extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractOutcome {
    /// Content differs from the previous checksum (or there was none).
    Extracted(RawComponent),
    /// Content checksum equals the caller's previous checksum.
    Unchanged { checksum: String },
}

/// Fetches component pages and runs the extraction pipeline over them.
pub struct Extractor {
    fetcher: Fetcher,
    pipeline: StrategyPipeline,
}

impl Extractor {
    /// Create an extractor with the built-in strategy pipeline.
    pub fn new(config: &ScrapeConfig) -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(config)?,
            pipeline: StrategyPipeline::new(),
        })
    }

    /// Allow fetching localhost/private IPs (mock servers, local mirrors).
    pub fn allow_localhost(mut self, allow: bool) -> Self {
        self.fetcher = self.fetcher.allow_localhost(allow);
        self
    }

    /// Fetch `locator` and extract its raw component record.
    ///
    /// Returns [`ExtractOutcome::Unchanged`] when the extracted content hashes
    /// to `previous_checksum`.
    #[instrument(skip_all, fields(locator = %locator))]
    pub async fn extract(
        &self,
        locator: &str,
        previous_checksum: Option<&str>,
        cancel: &CancelToken,
    ) -> std::result::Result<ExtractOutcome, ExtractError> {
        let url = self.fetcher.check_locator(locator)?;
        let body = self.fetcher.fetch(&url, cancel).await?;
        let raw = parse_page(&body, &url, &self.pipeline)?;

        let checksum = raw.checksum();
        if previous_checksum == Some(checksum.as_str()) {
            debug!(%checksum, "content unchanged");
            return Ok(ExtractOutcome::Unchanged { checksum });
        }

        info!(
            name = %raw.name,
            category = %raw.category,
            variables = raw.variables.len(),
            strategy = %raw.strategy,
            "page extracted"
        );
        Ok(ExtractOutcome::Extracted(raw))
    }
}

/// Parse an already-fetched page into a raw component record.
pub fn parse_page(
    html: &str,
    url: &Url,
    pipeline: &StrategyPipeline,
) -> std::result::Result<RawComponent, ExtractError> {
    let doc = Html::parse_document(html);

    let name = page::extract_name(&doc);
    let description = page::extract_description(&doc);
    let (variables, strategy) = pipeline.run(&doc);

    if name.is_none() && description.is_none() && variables.is_empty() {
        return Err(ExtractError::ParseEmpty {
            url: url.to_string(),
        });
    }

    Ok(RawComponent {
        source_url: url.to_string(),
        name: name.unwrap_or_default(),
        category: page::extract_category(url),
        description: description.unwrap_or_default(),
        platforms: page::extract_platforms(&doc),
        variables,
        strategy: strategy.to_string(),
    })
}
