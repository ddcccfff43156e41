//! Batched validation of listings against the reasoning service.
//!
//! Records go out in fixed-size chunks. Each chunk is retried on transient
//! failures and fails open once retries are exhausted, so validation never
//! drops a record and never aborts the run.

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use leadscout_shared::{
    AppConfig, LeadScoutError, ListingRecord, Result, RetryPolicy, ValidatedListing,
    ValidationJudgment, retry_with_backoff, validator_api_key,
};

use crate::claude::{ClaudeClient, ReasoningService, strip_code_fence};

pub const NOT_CONFIGURED_REASON: &str = "not configured";
pub const NO_JUDGMENT_REASON: &str = "no judgment returned";

/// One judgment as the service returns it. Every field is optional.
#[derive(Debug, Deserialize)]
struct RawJudgment {
    #[serde(default)]
    index: Option<i64>,
    #[serde(default)]
    is_official_site: Option<bool>,
    #[serde(default)]
    is_major_chain: Option<bool>,
    #[serde(default)]
    normalized_name: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl RawJudgment {
    fn into_judgment(self, original_name: &str) -> ValidationJudgment {
        ValidationJudgment {
            is_official_site: self.is_official_site,
            is_major_chain: self.is_major_chain.unwrap_or(false),
            normalized_name: self
                .normalized_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| original_name.to_string()),
            reason: self.reason.filter(|r| !r.is_empty()),
        }
    }
}

/// Build the judgment prompt for one chunk. Indexes are chunk-relative.
pub fn build_prompt(chunk: &[ListingRecord], criteria: &str) -> String {
    let listings: Vec<serde_json::Value> = chunk
        .iter()
        .enumerate()
        .map(|(index, r)| {
            json!({
                "index": index,
                "name": r.name,
                "url": r.url.as_deref().unwrap_or(""),
                "address": r.address.as_deref().unwrap_or(""),
            })
        })
        .collect();
    let listings = serde_json::to_string_pretty(&listings).unwrap_or_else(|_| "[]".into());

    format!(
        "Review the following business listings.\n\n\
         {listings}\n\n\
         For each listing, judge:\n\
         1. is_official_site: true if the URL is the business's own official site; \
         false for portals, booking services, review or comparison sites; \
         null if the URL is empty.\n\
         2. is_major_chain: true if the business is a large chain that advertises \
         heavily through affiliate and comparison sites; false for independent \
         or small multi-branch businesses.\n\
         3. normalized_name: the business name with branch or location suffixes \
         removed, for duplicate detection.\n\
         4. reason: a short explanation.\n\n\
         Identify the business from the URL's domain, not only from the listed name.\n\
         {criteria}\n\n\
         Answer with a JSON array only, without a code block:\n\
         [{{\"index\": 0, \"is_official_site\": true, \"is_major_chain\": false, \
         \"normalized_name\": \"...\", \"reason\": \"...\"}}]"
    )
}

/// Parse a response into one optional judgment per chunk position.
///
/// The first judgment for an index wins. Indexes outside the chunk are ignored.
pub fn parse_judgments(
    response: &str,
    chunk: &[ListingRecord],
) -> Result<Vec<Option<ValidationJudgment>>> {
    let raw: Vec<RawJudgment> = serde_json::from_str(strip_code_fence(response))
        .map_err(|e| LeadScoutError::parse(format!("judgment array: {e}")))?;

    let mut judgments: Vec<Option<ValidationJudgment>> = vec![None; chunk.len()];
    for item in raw {
        let index = item.index.unwrap_or(0);
        let Some(position) = usize::try_from(index).ok().filter(|i| *i < chunk.len()) else {
            debug!(index, chunk_len = chunk.len(), "judgment index out of range");
            continue;
        };
        if judgments[position].is_none() {
            judgments[position] = Some(item.into_judgment(&chunk[position].name));
        }
    }
    Ok(judgments)
}

// ---------------------------------------------------------------------------
// BatchValidator
// ---------------------------------------------------------------------------

pub struct BatchValidator {
    service: Option<Box<dyn ReasoningService>>,
    batch_size: usize,
    criteria: String,
    retry: RetryPolicy,
}

impl BatchValidator {
    pub fn new(
        service: Option<Box<dyn ReasoningService>>,
        batch_size: usize,
        criteria: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            service,
            batch_size: batch_size.max(1),
            criteria: criteria.into(),
            retry,
        }
    }

    /// Build from config, with a Claude client when the API key env var is set.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let service: Option<Box<dyn ReasoningService>> = match validator_api_key(config) {
            Some(key) => Some(Box::new(ClaudeClient::new(&key, &config.validator)?)),
            None => {
                warn!(
                    env = %config.validator.api_key_env,
                    "reasoning service not configured, listings will pass unjudged"
                );
                None
            }
        };
        Ok(Self::new(
            service,
            config.validator.batch_size,
            config.validator.criteria.clone(),
            RetryPolicy::from(&config.retry),
        ))
    }

    pub fn is_configured(&self) -> bool {
        self.service.is_some()
    }

    /// Judge every record. The output has one entry per input record, in order.
    #[instrument(skip_all, fields(records = records.len(), batch_size = self.batch_size))]
    pub async fn validate_batch(&self, records: &[ListingRecord]) -> Vec<ValidatedListing> {
        let Some(service) = self.service.as_deref() else {
            return records
                .iter()
                .cloned()
                .map(|r| ValidatedListing::fail_open(r, NOT_CONFIGURED_REASON))
                .collect();
        };

        let total_batches = records.len().div_ceil(self.batch_size);
        let mut out = Vec::with_capacity(records.len());

        for (batch, chunk) in records.chunks(self.batch_size).enumerate() {
            let batch = batch + 1;
            debug!(batch, total_batches, size = chunk.len(), "validating batch");

            let prompt = build_prompt(chunk, &self.criteria);
            let result = retry_with_backoff(&self.retry, LeadScoutError::is_transient, |attempt| {
                let prompt = &prompt;
                async move {
                    debug!(batch, attempt, "sending batch");
                    let response = service.complete(prompt).await?;
                    parse_judgments(&response, chunk)
                }
            })
            .await;

            match result {
                Ok(judgments) => {
                    for (record, judgment) in chunk.iter().zip(judgments) {
                        out.push(match judgment {
                            Some(j) => ValidatedListing::new(record.clone(), j),
                            None => ValidatedListing::fail_open(record.clone(), NO_JUDGMENT_REASON),
                        });
                    }
                }
                Err(e) => {
                    error!(batch, error = %e, "batch validation failed, passing records unjudged");
                    let reason = format!("API error: {e}");
                    out.extend(
                        chunk
                            .iter()
                            .cloned()
                            .map(|r| ValidatedListing::fail_open(r, reason.clone())),
                    );
                }
            }
        }

        let valid = out.iter().filter(|v| v.is_valid).count();
        info!(total = out.len(), valid, "validation complete");
        out
    }
}
