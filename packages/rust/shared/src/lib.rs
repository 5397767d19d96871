//! Shared types, error model, configuration, and retry policy for relnotes.
//!
//! This crate is the foundation depended on by all other relnotes crates.
//! It provides:
//! - [`RelnotesError`]: the unified error type
//! - Domain types ([`Note`], [`NoteType`], [`Watermark`])
//! - Configuration ([`AppConfig`] and its sections, config loading)
//! - [`retry_with_backoff`]: the bounded retry used for outbound calls

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DateFilter, DefaultsConfig, NotifierConfig, QueryConfig, RetryConfig,
    ScrapeConfig, ServerConfig, SourceKind, TranslatorConfig, WATERMARK_ENV,
    apply_env_overrides, config_dir, config_file_path, init_config, load_config,
    load_config_from, resolve_secret,
};
pub use error::{RelnotesError, Result};
pub use retry::{
    CallError, MAX_ATTEMPTS, MAX_BACKOFF, RetryError, RetryPolicy, TRANSIENT_STATUSES,
    is_transient, retry_with_backoff,
};
pub use types::{DedupKey, Note, NoteType, Watermark, parse_release_date};
