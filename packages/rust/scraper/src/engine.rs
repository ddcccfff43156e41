//! Listing discovery engine.
//!
//! Drives one session through a search: navigate, classify the result page,
//! paginate the feed, and extract one record per listing handle through the
//! panel synchronization protocol.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use leadscout_shared::{LeadScoutError, ListingRecord, Result, ScraperConfig};

use crate::activation::ActivationChain;
use crate::fields;
use crate::panel::{self, PanelTiming};
use crate::session::SessionManager;
use crate::surface::{
    CONSENT_BUTTON_TEXT, LISTING_HANDLE, MapPage, PAGE_HEADING, RESULTS_FEED, RESULTS_LABEL,
    search_url,
};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Runtime search settings, derived from `[scraper]`.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub navigation_timeout: Duration,
    /// Wait after navigation; the surface keeps rendering asynchronously.
    pub settle: Duration,
    pub consent_wait: Duration,
    pub scroll_pause: Duration,
    /// Ceiling on scroll rounds regardless of progress.
    pub max_scroll_attempts: u32,
    /// Consecutive unchanged counts that end pagination.
    pub stable_scroll_limit: u32,
    pub disambiguation_terms: Vec<String>,
    pub disambiguation_suffix: String,
    pub panel: PanelTiming,
}

impl From<&ScraperConfig> for SearchSettings {
    fn from(config: &ScraperConfig) -> Self {
        Self {
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
            settle: Duration::from_millis(config.settle_ms),
            consent_wait: Duration::from_secs(1),
            scroll_pause: Duration::from_millis(config.scroll_pause_ms),
            max_scroll_attempts: config.max_scroll_attempts,
            stable_scroll_limit: config.stable_scroll_limit,
            disambiguation_terms: config.disambiguation_terms.clone(),
            disambiguation_suffix: config.disambiguation_suffix.clone(),
            panel: PanelTiming::from(config),
        }
    }
}

impl SearchSettings {
    /// Whether `query` already names a business category.
    pub fn is_disambiguated(&self, query: &str) -> bool {
        self.disambiguation_terms
            .iter()
            .any(|term| query.contains(term.as_str()))
    }
}

/// What the surface rendered for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageKind {
    /// A single listing's detail panel opened directly; carries its heading.
    Single(String),
    Multi,
}

// ---------------------------------------------------------------------------
// Page-level steps
// ---------------------------------------------------------------------------

/// Navigate to the search for `query` and let the surface settle.
async fn open<P: MapPage>(page: &P, settings: &SearchSettings, query: &str) -> Result<()> {
    let url = search_url(query);
    debug!(%url, "navigating");

    match tokio::time::timeout(settings.navigation_timeout, page.goto(&url)).await {
        Ok(Ok(())) => {}
        Ok(Err(LeadScoutError::Discovery(msg))) => {
            return Err(LeadScoutError::Discovery(format!("navigation failed: {msg}")));
        }
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            return Err(LeadScoutError::Discovery(format!(
                "navigation timed out after {:?}",
                settings.navigation_timeout
            )));
        }
    }
    tokio::time::sleep(settings.settle).await;

    match page.click_button_with_text(CONSENT_BUTTON_TEXT).await {
        Ok(true) => {
            debug!("accepted consent dialog");
            tokio::time::sleep(settings.consent_wait).await;
        }
        Ok(false) => {}
        Err(e) => debug!(error = %e, "consent dialog check failed"),
    }
    Ok(())
}

/// Single-result when there is no feed and the heading is a real name.
pub async fn classify<P: MapPage>(page: &P) -> Result<PageKind> {
    let has_feed = page.exists(RESULTS_FEED).await?;
    let heading = page.text_of(PAGE_HEADING).await?.unwrap_or_default();
    debug!(has_feed, %heading, "classified page");

    if !has_feed && !heading.is_empty() && heading != RESULTS_LABEL {
        Ok(PageKind::Single(heading))
    } else {
        Ok(PageKind::Multi)
    }
}

/// Scroll the feed until `max_results` handles render or the count stops growing.
/// Returns the final handle count.
pub async fn paginate<P: MapPage>(
    page: &P,
    settings: &SearchSettings,
    max_results: usize,
) -> Result<usize> {
    if !page.exists(RESULTS_FEED).await? {
        warn!("results feed not found, skipping pagination");
        return Ok(page.handles(LISTING_HANDLE).await?.len());
    }

    let mut prev_count = 0;
    let mut unchanged = 0;
    for attempt in 1..=settings.max_scroll_attempts {
        let count = page.handles(LISTING_HANDLE).await?.len();
        if count >= max_results {
            debug!(count, attempt, "reached max results");
            return Ok(count);
        }
        if count == prev_count {
            unchanged += 1;
            if unchanged >= settings.stable_scroll_limit {
                debug!(count, attempt, "feed stopped growing");
                return Ok(count);
            }
        } else {
            unchanged = 0;
        }
        prev_count = count;

        page.scroll_to_bottom(RESULTS_FEED).await?;
        tokio::time::sleep(settings.scroll_pause).await;
    }

    let count = page.handles(LISTING_HANDLE).await?.len();
    debug!(count, "scroll attempt ceiling reached");
    Ok(count)
}

/// Run one search on an open page.
///
/// Navigation failure aborts the whole search, except on the category
/// retry, where the first page is kept. Per-listing failures are logged and
/// skipped.
#[instrument(skip_all, fields(query = %query, max_results))]
pub async fn search_on<P: MapPage>(
    page: &P,
    chain: &ActivationChain<P>,
    settings: &SearchSettings,
    query: &str,
    max_results: usize,
) -> Result<Vec<ListingRecord>> {
    open(page, settings, query).await?;
    let mut kind = classify(page).await?;

    if matches!(kind, PageKind::Single(_)) && !settings.is_disambiguated(query) {
        let retry_query = format!("{query} {}", settings.disambiguation_suffix);
        info!(%retry_query, "single result, retrying with category suffix");
        match open(page, settings, &retry_query).await {
            Ok(()) => kind = classify(page).await?,
            // Keep the first page's single result.
            Err(e) => warn!(%retry_query, error = %e, "category retry failed"),
        }
    }

    match kind {
        PageKind::Single(name) => {
            info!(%name, "extracting single result");
            let html = page.snapshot().await?;
            Ok(fields::build_record(&name, &html).into_iter().collect())
        }
        PageKind::Multi => {
            paginate(page, settings, max_results).await?;
            let handles = page.handles(LISTING_HANDLE).await?;
            info!(found = handles.len(), "results loaded");

            let mut records = Vec::new();
            for (index, handle) in handles.iter().take(max_results).enumerate() {
                match extract_handle(page, chain, settings, handle).await {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => debug!(index, "listing skipped"),
                    Err(e) => warn!(index, error = %e, "listing extraction failed"),
                }
            }
            info!(extracted = records.len(), "search complete");
            Ok(records)
        }
    }
}

async fn extract_handle<P: MapPage>(
    page: &P,
    chain: &ActivationChain<P>,
    settings: &SearchSettings,
    handle: &P::Handle,
) -> Result<Option<ListingRecord>> {
    let name = page
        .handle_label(handle)
        .await?
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    let Some(name) = name else {
        return Ok(None);
    };
    panel::extract_one(page, chain, handle, &name, &settings.panel)
        .await
        .map_err(|e| LeadScoutError::Extraction(format!("{name}: {e}")))
}

// ---------------------------------------------------------------------------
// DiscoveryEngine
// ---------------------------------------------------------------------------

/// Runs searches, each in its own session.
pub struct DiscoveryEngine<M: SessionManager> {
    manager: M,
    settings: SearchSettings,
    chain: ActivationChain<M::Session>,
}

impl<M: SessionManager> DiscoveryEngine<M> {
    pub fn new(manager: M, settings: SearchSettings) -> Self {
        Self {
            manager,
            settings,
            chain: ActivationChain::new(),
        }
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// Search for `query`, returning at most `max_results` records.
    ///
    /// The session is released whether or not the search succeeded.
    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<ListingRecord>> {
        let started = std::time::Instant::now();
        let session = self.manager.acquire().await?;
        let result = search_on(&session, &self.chain, &self.settings, query, max_results).await;
        self.manager.release(session).await;

        match &result {
            Ok(records) => info!(query, count = records.len(), elapsed = ?started.elapsed(), "search finished"),
            Err(e) => warn!(query, error = %e, elapsed = ?started.elapsed(), "search failed"),
        }
        result
    }
}
