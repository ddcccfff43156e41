//! Deduplicating append.
//!
//! Reads the whole table, finds the last recognized data row, and writes
//! new rows as one block directly after it. URL is the only dedup key.

use std::collections::HashSet;

use tracing::{debug, info, instrument};

use leadscout_shared::{
    LeadScoutError, Result, RetryPolicy, SinkConfig, ValidatedListing, retry_with_backoff,
};

use crate::table::{TableBackend, TableInfo};

/// Column positions of the fields the sink reads and writes.
#[derive(Debug, Clone)]
pub struct RowLayout {
    pub header: Vec<String>,
    pub initial_status: String,
}

impl RowLayout {
    pub const SEQ: usize = 0;
    pub const NAME: usize = 1;
    pub const URL: usize = 2;
    pub const AREA: usize = 5;
    pub const PHONE: usize = 6;
    pub const RATING: usize = 7;
    pub const REVIEWS: usize = 8;
    pub const STATUS: usize = 9;

    /// Minimum row width needed to hold every written field.
    const MIN_WIDTH: usize = Self::STATUS + 1;

    pub fn width(&self) -> usize {
        self.header.len().max(Self::MIN_WIDTH)
    }

    /// Render one new data row.
    pub fn render(&self, seq: usize, listing: &ValidatedListing) -> Vec<String> {
        let record = &listing.record;
        let mut row = vec![String::new(); self.width()];
        row[Self::SEQ] = seq.to_string();
        row[Self::NAME] = record.name.clone();
        row[Self::URL] = record.url.clone().unwrap_or_default();
        row[Self::AREA] = record.area.clone().unwrap_or_default();
        row[Self::PHONE] = record.phone.clone().unwrap_or_default();
        row[Self::RATING] = record.rating.map(|r| r.to_string()).unwrap_or_default();
        row[Self::REVIEWS] = record.review_count.map(|n| n.to_string()).unwrap_or_default();
        row[Self::STATUS] = self.initial_status.clone();
        row
    }
}

impl From<&SinkConfig> for RowLayout {
    fn from(config: &SinkConfig) -> Self {
        Self {
            header: config.output_columns.clone(),
            initial_status: config.initial_status.clone(),
        }
    }
}

fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(|c| c.trim()).unwrap_or("")
}

/// A data row has a name plus either a URL or a sequence number.
pub fn is_data_row(row: &[String]) -> bool {
    !cell(row, RowLayout::NAME).is_empty()
        && (!cell(row, RowLayout::URL).is_empty() || !cell(row, RowLayout::SEQ).is_empty())
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// The block an append would write.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendPlan {
    /// Physical row (1-based) where the block starts.
    pub start_row: usize,
    /// Recognized data rows already present.
    pub existing: usize,
    pub rows: Vec<Vec<String>>,
    /// Incoming records skipped for having no URL.
    pub skipped_no_url: usize,
    /// Incoming records skipped as duplicates.
    pub skipped_duplicate: usize,
}

/// Compute where and what to write for `incoming` given the table's current rows.
///
/// `rows[0]` is the header. Rows that are not data rows are skipped without
/// ending the scan; the block starts right after the last data row, so
/// malformed trailing rows get overwritten rather than left as holes.
pub fn plan_append(
    rows: &[Vec<String>],
    incoming: &[ValidatedListing],
    layout: &RowLayout,
) -> AppendPlan {
    let mut last_data_row = 1;
    let mut existing = 0;
    let mut seen: HashSet<String> = HashSet::new();

    for (i, row) in rows.iter().enumerate().skip(1) {
        if !is_data_row(row) {
            continue;
        }
        existing += 1;
        last_data_row = i + 1;
        let url = cell(row, RowLayout::URL);
        if !url.is_empty() {
            seen.insert(url.to_string());
        }
    }

    let mut plan = AppendPlan {
        start_row: last_data_row + 1,
        existing,
        rows: Vec::new(),
        skipped_no_url: 0,
        skipped_duplicate: 0,
    };

    for listing in incoming {
        let Some(url) = listing.record.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
        else {
            plan.skipped_no_url += 1;
            continue;
        };
        if !seen.insert(url.to_string()) {
            debug!(url, "duplicate url");
            plan.skipped_duplicate += 1;
            continue;
        }
        let seq = existing + plan.rows.len() + 1;
        plan.rows.push(layout.render(seq, listing));
    }

    plan
}

// ---------------------------------------------------------------------------
// DedupSink
// ---------------------------------------------------------------------------

/// Appends validated listings to a table, skipping known URLs.
pub struct DedupSink<B: TableBackend> {
    backend: B,
    layout: RowLayout,
    retry: RetryPolicy,
}

impl<B: TableBackend> DedupSink<B> {
    pub fn new(backend: B, layout: RowLayout, retry: RetryPolicy) -> Self {
        Self {
            backend,
            layout,
            retry,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Append `records`, returning how many rows were written.
    ///
    /// The whole read-plan-write sequence is retried on transient backend
    /// errors. Configuration errors surface immediately.
    #[instrument(skip_all, fields(incoming = records.len()))]
    pub async fn append(&self, records: &[ValidatedListing]) -> Result<usize> {
        retry_with_backoff(&self.retry, LeadScoutError::is_transient, |attempt| {
            self.append_once(records, attempt)
        })
        .await
    }

    async fn append_once(&self, records: &[ValidatedListing], attempt: u32) -> Result<usize> {
        self.backend.ensure_table(&self.layout.header).await?;
        let rows = self.backend.read_rows().await?;
        let plan = plan_append(&rows, records, &self.layout);

        debug!(
            attempt,
            existing = plan.existing,
            start_row = plan.start_row,
            staged = plan.rows.len(),
            skipped_no_url = plan.skipped_no_url,
            skipped_duplicate = plan.skipped_duplicate,
            "append planned"
        );
        if plan.rows.is_empty() {
            return Ok(0);
        }

        self.backend.write_rows(plan.start_row, &plan.rows).await?;
        info!(written = plan.rows.len(), start_row = plan.start_row, "rows appended");
        Ok(plan.rows.len())
    }

    /// Recognized data rows currently in the table.
    pub async fn count(&self) -> Result<usize> {
        let rows = self.backend.read_rows().await?;
        Ok(rows.iter().skip(1).filter(|r| is_data_row(r)).count())
    }

    pub async fn describe(&self) -> Result<TableInfo> {
        self.backend.describe().await
    }
}
