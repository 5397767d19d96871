//! Core pipeline orchestration for relnotes.
//!
//! This crate ties an extraction strategy, the translator, and the Slack
//! notifier into one run (see [`pipeline::Pipeline`]).

pub mod notifier;
pub mod pipeline;
pub mod translator;

pub use notifier::{DeliveryOutcome, Notifier, Notify, format_message};
pub use pipeline::{
    Pipeline, PipelineOptions, RunReport, build_extractor, computed_watermark, translate_all,
};
pub use translator::{
    CALL_FAILED, INVALID_INPUT, MAX_RETRIES_REACHED, NO_RESPONSE, TIMED_OUT, Translate,
    Translator,
};
