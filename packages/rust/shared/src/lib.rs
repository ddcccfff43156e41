//! Shared types, error model, configuration and retry policy for LeadScout.
//!
//! This crate is the foundation depended on by all other LeadScout crates.
//! It provides:
//! - [`LeadScoutError`]: the unified error type
//! - Domain types ([`ListingRecord`], [`ValidationJudgment`], [`ValidatedListing`], [`ProgressEvent`])
//! - Configuration ([`AppConfig`], config loading)
//! - [`RetryPolicy`] and [`retry_with_backoff`]

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, ExclusionConfig, ProgressConfig, RetryConfig, ScraperConfig,
    SinkBackendKind, SinkConfig, ValidatorConfig, config_dir, config_file_path, expand_home,
    load_config_from, require_env, save_config_to, validator_api_key,
};
pub use error::{LeadScoutError, Result};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use types::{
    ListingRecord, ProgressEvent, RawListing, RunId, RunRecord, RunStatus, RunTotals,
    ValidatedListing, ValidationJudgment,
};
