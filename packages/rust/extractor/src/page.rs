//! Page retrieval for the scrape strategy.
//!
//! Rendering is someone else's job: a [`PageSource`] only has to hand back
//! the final HTML. [`HttpPageSource`] covers pages that render server-side.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use relnotes_shared::{RelnotesError, Result};

use crate::build_client;

/// Produces the HTML of a page.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// Fetches pages with a plain HTTP GET.
pub struct HttpPageSource {
    client: Client,
}

impl HttpPageSource {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
        })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, url: &Url) -> Result<String> {
        debug!(%url, "fetching page");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| RelnotesError::Extraction(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelnotesError::Extraction(format!("{url}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| RelnotesError::Extraction(format!("{url}: body read failed: {e}")))
    }
}
