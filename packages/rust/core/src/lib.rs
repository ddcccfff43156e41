//! Core pipeline orchestration and domain logic for LeadScout.
//!
//! This crate ties together listing discovery, keyword exclusion, batch
//! validation and the deduplicating sink into one run per request.

pub mod claude;
pub mod filter;
pub mod pipeline;
pub mod validation;

pub use claude::{ClaudeClient, ReasoningService, strip_code_fence};
pub use filter::ExclusionFilter;
pub use pipeline::{
    EventIter, EventSender, LeadSink, Orchestrator, ProgressReporter, RunReport, RunRequest,
};
pub use validation::BatchValidator;
