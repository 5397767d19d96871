//! End-to-end run: watermark → extract → translate (concurrently) → notify.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Days, FixedOffset, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use relnotes_extractor::{Extractor, QueryExtractor, ScrapeExtractor};
use relnotes_shared::{
    AppConfig, Note, RelnotesError, Result, RetryPolicy, SourceKind, Watermark,
};

use crate::notifier::{DeliveryOutcome, Notifier, Notify};
use crate::translator::{CALL_FAILED, TIMED_OUT, Translate, Translator};

/// Knobs for one [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Used when neither the caller nor the extractor supplies a watermark.
    pub default_watermark: Option<Watermark>,
    /// Days subtracted from today for the computed watermark.
    pub lookback_days: u32,
    /// Offset from UTC, in hours, that defines "today".
    pub utc_offset_hours: i32,
    /// Maximum translations in flight.
    pub concurrency: usize,
    /// Budget for one note's translation, retries included.
    pub translate_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            default_watermark: None,
            lookback_days: 4,
            utc_offset_hours: 9,
            concurrency: 8,
            translate_timeout: Duration::from_secs(120),
        }
    }
}

impl PipelineOptions {
    /// Read options from config. A configured watermark must parse.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let default_watermark = config
            .defaults
            .watermark
            .as_deref()
            .map(Watermark::parse)
            .transpose()
            .map_err(|e| RelnotesError::config(format!("[defaults] watermark: {e}")))?;

        Ok(Self {
            default_watermark,
            lookback_days: config.defaults.lookback_days,
            utc_offset_hours: config.defaults.utc_offset_hours,
            concurrency: config.translator.concurrency,
            translate_timeout: Duration::from_secs(config.translator.timeout_secs),
        })
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub watermark: Watermark,
    /// Enriched notes, in extraction order.
    pub notes: Vec<Note>,
    pub delivery: DeliveryOutcome,
    pub elapsed_ms: u64,
}

/// Wires one extractor, translator and notifier together.
pub struct Pipeline {
    extractor: Arc<dyn Extractor>,
    translator: Arc<dyn Translate>,
    notifier: Arc<dyn Notify>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        translator: Arc<dyn Translate>,
        notifier: Arc<dyn Notify>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            extractor,
            translator,
            notifier,
            options,
        }
    }

    /// Build the production pipeline for `source`, resolving secrets from env.
    pub fn from_config(config: &AppConfig, source: SourceKind) -> Result<Self> {
        let policy = RetryPolicy::from(&config.retry);
        Ok(Self::new(
            build_extractor(config, source)?,
            Arc::new(Translator::from_config(&config.translator, policy.clone())?),
            Arc::new(Notifier::from_config(&config.notifier, policy)?),
            PipelineOptions::from_config(config)?,
        ))
    }

    /// Pick the watermark for a run.
    ///
    /// Explicit argument, then the extractor's own, then the configured
    /// default, then `today - lookback_days` in the configured offset.
    pub fn resolve_watermark(
        &self,
        explicit: Option<Watermark>,
        now: DateTime<Utc>,
    ) -> Result<Watermark> {
        if let Some(w) = explicit {
            return Ok(w);
        }
        if let Some(w) = self.extractor.default_watermark() {
            return Ok(w);
        }
        if let Some(w) = self.options.default_watermark {
            return Ok(w);
        }
        computed_watermark(now, self.options.utc_offset_hours, self.options.lookback_days)
    }

    /// Run once. Extraction faults abort before anything is sent.
    pub async fn run(&self, explicit: Option<Watermark>) -> Result<RunReport> {
        let run_id = Uuid::now_v7();
        let span = info_span!("pipeline_run", %run_id, extractor = self.extractor.name());
        self.run_inner(run_id, explicit).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, explicit: Option<Watermark>) -> Result<RunReport> {
        let start = Instant::now();
        let watermark = self.resolve_watermark(explicit, Utc::now())?;
        info!(%watermark, "starting run");

        let notes = self.extractor.extract(watermark).await.inspect_err(|e| {
            error!(error = %e, "extraction failed, nothing will be sent");
        })?;
        info!(count = notes.len(), "extracted notes");

        let notes = translate_all(
            Arc::clone(&self.translator),
            notes,
            self.options.concurrency,
            self.options.translate_timeout,
        )
        .await;

        let delivery = self.notifier.notify(&watermark.label(), &notes).await;

        let elapsed = start.elapsed();
        info!(
            count = notes.len(),
            %delivery,
            elapsed_ms = elapsed.as_millis() as u64,
            "run complete"
        );

        Ok(RunReport {
            run_id,
            watermark,
            notes,
            delivery,
            elapsed_ms: elapsed.as_millis() as u64,
        })
    }
}

/// Construct the extractor for a strategy.
pub fn build_extractor(config: &AppConfig, source: SourceKind) -> Result<Arc<dyn Extractor>> {
    Ok(match source {
        SourceKind::Query => Arc::new(QueryExtractor::from_config(&config.query)?),
        SourceKind::Scrape => Arc::new(ScrapeExtractor::from_config(&config.scrape)?),
    })
}

/// `today - lookback_days`, where "today" is the calendar date at `utc_offset_hours`.
pub fn computed_watermark(
    now: DateTime<Utc>,
    utc_offset_hours: i32,
    lookback_days: u32,
) -> Result<Watermark> {
    let offset = utc_offset_hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| {
            RelnotesError::config(format!("utc_offset_hours out of range: {utc_offset_hours}"))
        })?;
    let today = now.with_timezone(&offset).date_naive();
    today
        .checked_sub_days(Days::new(u64::from(lookback_days)))
        .map(Watermark)
        .ok_or_else(|| RelnotesError::config(format!("lookback_days too large: {lookback_days}")))
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Translate every note concurrently; output order equals input order.
///
/// At most `concurrency` calls run at once. Each call gets `timeout`;
/// overruns yield [`TIMED_OUT`]. Dropping the returned future aborts
/// every outstanding task.
pub async fn translate_all(
    translator: Arc<dyn Translate>,
    notes: Vec<Note>,
    concurrency: usize,
    timeout: Duration,
) -> Vec<Note> {
    if notes.is_empty() {
        return notes;
    }

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, note) in notes.iter().enumerate() {
        let translator = Arc::clone(&translator);
        let semaphore = Arc::clone(&semaphore);
        let description = note.content.clone();

        tasks.spawn(async move {
            let _permit = semaphore.acquire().await.ok();
            let text = match tokio::time::timeout(timeout, translator.translate(&description)).await
            {
                Ok(text) => text,
                Err(_) => {
                    warn!(index, timeout_secs = timeout.as_secs(), "translation timed out");
                    TIMED_OUT.to_string()
                }
            };
            (index, text)
        });
    }

    let mut translated: Vec<Option<String>> = vec![None; notes.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, text)) => {
                debug!(index, "translation finished");
                translated[index] = Some(text);
            }
            Err(e) => error!(error = %e, "translation task panicked"),
        }
    }

    notes
        .into_iter()
        .zip(translated)
        .map(|(note, text)| note.with_translation(text.unwrap_or_else(|| CALL_FAILED.into())))
        .collect()
}
