//! Heuristic scrape of the vendor release-notes page.
//!
//! The page groups notes into dated sections:
//!
//! ```html
//! <section class="releases">
//!   <section>
//!     <h2 data-text="February 19, 2025">February 19, 2025</h2>
//!     <div>
//!       <span class="release-note-product-title">Cloud Run</span>
//!       <h3>Direct VPC egress</h3>
//!       <div class="release-feature">...</div>
//!     </div>
//!   </section>
//! </section>
//! ```
//!
//! Every lookup past the section level is optional and falls back to a fixed
//! text, so a layout change degrades the output instead of failing the run.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

use relnotes_shared::{
    Note, NoteType, RelnotesError, Result, ScrapeConfig, Watermark, parse_release_date,
};

use crate::Extractor;
use crate::page::{HttpPageSource, PageSource};

/// Fallback text for an element that is missing or empty.
const UNKNOWN: &str = "Unknown";

/// Content used when a note has neither a feature nor a changed block.
const NO_CONTENT: &str = "No Content";

const SECTION_SELECTOR: &str = "section.releases > section";
const DATE_HEADING_SELECTOR: &str = "h2";
const PRODUCT_TITLE_SELECTOR: &str = ".release-note-product-title";
const VARIANT_SELECTOR: &str = "div.release-feature, div.release-changed";
const SUB_TITLE_SELECTOR: &str = "h3";

const FEATURE_CLASS: &str = "release-feature";
const CHANGED_CLASS: &str = "release-changed";

// ---------------------------------------------------------------------------
// ScrapeExtractor
// ---------------------------------------------------------------------------

/// Scrapes notes from a rendered release-notes page.
pub struct ScrapeExtractor {
    url: Url,
    watermark: Watermark,
    source: Arc<dyn PageSource>,
}

impl ScrapeExtractor {
    pub fn new(url: Url, watermark: Watermark, source: Arc<dyn PageSource>) -> Self {
        Self {
            url,
            watermark,
            source,
        }
    }

    /// Build from `[scrape]` config with a plain HTTP page source.
    pub fn from_config(config: &ScrapeConfig) -> Result<Self> {
        let url = Url::parse(&config.url)
            .map_err(|e| RelnotesError::config(format!("invalid scrape url '{}': {e}", config.url)))?;
        let watermark = Watermark::parse(&config.watermark).map_err(|_| {
            RelnotesError::config(format!("invalid scrape watermark '{}'", config.watermark))
        })?;
        let source = HttpPageSource::new(config.timeout_secs)?;
        Ok(Self::new(url, watermark, Arc::new(source)))
    }
}

#[async_trait]
impl Extractor for ScrapeExtractor {
    #[instrument(skip_all, fields(url = %self.url, watermark = %watermark))]
    async fn extract(&self, watermark: Watermark) -> Result<Vec<Note>> {
        let body = self.source.fetch(&self.url).await?;
        let notes = scrape_html(&body, watermark);
        info!(notes = notes.len(), "scrape completed");
        Ok(notes)
    }

    fn default_watermark(&self) -> Option<Watermark> {
        Some(self.watermark)
    }

    fn name(&self) -> &str {
        "scrape"
    }
}

// ---------------------------------------------------------------------------
// Pure extraction
// ---------------------------------------------------------------------------

/// Parse `html` and extract notes newer than `watermark`.
pub fn scrape_html(html: &str, watermark: Watermark) -> Vec<Note> {
    let doc = Html::parse_document(html);
    scrape_notes(&doc, watermark)
}

/// Extract notes newer than `watermark` from an already parsed document.
///
/// Sections are not assumed to be globally sorted, so every section is
/// visited; a section whose date is missing, unparseable, or not after the
/// watermark contributes nothing.
pub fn scrape_notes(doc: &Html, watermark: Watermark) -> Vec<Note> {
    let sections = selector(SECTION_SELECTOR);
    let titles = selector(PRODUCT_TITLE_SELECTOR);

    let mut seen = HashSet::new();
    let mut notes = Vec::new();

    for section in doc.select(&sections) {
        let release_label = release_label(section);
        let Some(release_at) = parse_release_date(&release_label) else {
            debug!(label = %release_label, "skipping section with unparseable date");
            continue;
        };
        if !watermark.admits(release_at) {
            debug!(%release_at, %watermark, "skipping section at or before watermark");
            continue;
        }

        for title in section.select(&titles) {
            let block = enclosing_block(title, section);
            let (note_type, content) = classify(block, section);
            let sub_title = first_text(block, SUB_TITLE_SELECTOR).unwrap_or_default();

            let resource_name = text_or_unknown(Some(title));
            let note = Note::new(release_at, resource_name, note_type, sub_title, content);
            if seen.insert(note.dedup_key()) {
                notes.push(note);
            }
        }
    }

    notes
}

/// Release date text of a section: `h2[data-text]`, else the heading's text.
fn release_label(section: ElementRef<'_>) -> String {
    let heading = section.select(&selector(DATE_HEADING_SELECTOR)).next();
    heading
        .and_then(|h| h.value().attr("data-text"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| text_or_unknown(heading))
}

/// Nearest `div` at or above `el`, without leaving `section`.
fn enclosing_block<'a>(el: ElementRef<'a>, section: ElementRef<'a>) -> ElementRef<'a> {
    std::iter::once(el)
        .chain(el.ancestors().filter_map(ElementRef::wrap))
        .take_while(|candidate| candidate.id() != section.id())
        .find(|candidate| candidate.value().name() == "div")
        .unwrap_or(section)
}

/// Type and body of a note, from its block or, failing that, its section.
fn classify(block: ElementRef<'_>, section: ElementRef<'_>) -> (NoteType, String) {
    let variants = selector(VARIANT_SELECTOR);
    let found = Some(block)
        .filter(|b| variant_of(*b).is_some())
        .or_else(|| block.select(&variants).next())
        .or_else(|| section.select(&variants).next());

    match found {
        Some(el) => (
            variant_of(el).unwrap_or_default(),
            text_or_unknown(Some(el)),
        ),
        None => (NoteType::Unknown, NO_CONTENT.to_string()),
    }
}

fn variant_of(el: ElementRef<'_>) -> Option<NoteType> {
    let value = el.value();
    if value.name() != "div" {
        return None;
    }
    let has_class = |class: &str| value.classes().any(|c| c.eq_ignore_ascii_case(class));
    if has_class(FEATURE_CLASS) {
        Some(NoteType::Feature)
    } else if has_class(CHANGED_CLASS) {
        Some(NoteType::Changed)
    } else {
        None
    }
}

/// Trimmed text of the first match under `root`, if any.
fn first_text(root: ElementRef<'_>, css: &'static str) -> Option<String> {
    root.select(&selector(css)).next().map(|el| text_or_unknown(Some(el)))
}

fn text_or_unknown(el: Option<ElementRef<'_>>) -> String {
    el.map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("static selector must parse")
}
