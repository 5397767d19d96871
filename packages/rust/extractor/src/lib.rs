//! Release-note extraction strategies.
//!
//! This crate provides:
//! - [`Extractor`]: the single capability every strategy implements
//! - [`QueryExtractor`]: parameterized query against the public BigQuery dataset
//! - [`ScrapeExtractor`]: heuristic scrape of the rendered release-notes page
//! - [`PageSource`]: where the scrape strategy gets its HTML from

pub mod page;
pub mod query;
pub mod scrape;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use relnotes_shared::{Note, RelnotesError, Result, Watermark};

pub use page::{HttpPageSource, PageSource};
pub use query::QueryExtractor;
pub use scrape::{ScrapeExtractor, scrape_html, scrape_notes};

/// User-Agent string for outbound requests.
pub const USER_AGENT: &str = concat!("relnotes/", env!("CARGO_PKG_VERSION"));

/// Finds release notes newer than a watermark.
///
/// Errors returned here are fatal for the run: strategies do not retry.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Notes strictly newer than `watermark`, in source order.
    async fn extract(&self, watermark: Watermark) -> Result<Vec<Note>>;

    /// Watermark baked into the strategy at construction, if any.
    fn default_watermark(&self) -> Option<Watermark> {
        None
    }

    /// Human-readable strategy name for tracing.
    fn name(&self) -> &str;
}

/// Build a reqwest client with the shared user agent and a request timeout.
pub(crate) fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RelnotesError::Network(format!("failed to build HTTP client: {e}")))
}
