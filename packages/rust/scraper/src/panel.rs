//! Panel synchronization.
//!
//! The surface renders every listing into one shared detail panel. After
//! activating a handle the panel is only trusted once its title positively
//! matches the listing that was clicked; otherwise fields from the previous
//! listing would be attributed to this one.

use std::time::Duration;

use tracing::{debug, info, warn};

use leadscout_shared::{ListingRecord, Result, ScraperConfig};

use crate::activation::{ActivationChain, ActivationStrategy, ScriptClick};
use crate::fields;
use crate::surface::{MapPage, PANEL_TITLE};

/// Polls used after the script-click retry.
const RECHECK_POLLS: u32 = 3;

/// Waits used while synchronizing the panel.
#[derive(Debug, Clone)]
pub struct PanelTiming {
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    /// Wait after the script-click retry before re-polling.
    pub recheck_wait: Duration,
    /// Extra wait when extracting from an unconfirmed (still empty) panel.
    pub slow_panel_wait: Duration,
    /// Wait between synchronization and reading fields.
    pub settle: Duration,
}

impl From<&ScraperConfig> for PanelTiming {
    fn from(config: &ScraperConfig) -> Self {
        Self {
            poll_attempts: config.panel_poll_attempts,
            poll_interval: Duration::from_millis(config.panel_poll_interval_ms),
            recheck_wait: Duration::from_secs(1),
            slow_panel_wait: Duration::from_millis(500),
            settle: Duration::from_millis(300),
        }
    }
}

impl PanelTiming {
    /// No waiting at all.
    pub fn instant(poll_attempts: u32) -> Self {
        Self {
            poll_attempts,
            poll_interval: Duration::ZERO,
            recheck_wait: Duration::ZERO,
            slow_panel_wait: Duration::ZERO,
            settle: Duration::ZERO,
        }
    }
}

/// Outcome of waiting for the panel to reflect a clicked listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelSync {
    /// Title matches the clicked listing.
    Confirmed,
    /// Title never appeared; extraction proceeds on a best-effort basis.
    Unconfirmed,
    /// Title shows a different listing.
    Mismatch(String),
}

/// Fuzzy identity check between the panel title and a listing's label.
///
/// Matches on exact equality, equality after removing ASCII and ideographic
/// spaces and lowercasing, or containment either way. A shared leading run
/// alone is not enough: branches of one chain differ only in their tail.
pub fn names_match(panel_title: &str, known_name: &str) -> bool {
    if panel_title.is_empty() || known_name.is_empty() {
        return false;
    }
    if panel_title == known_name {
        return true;
    }

    let a = normalize(panel_title);
    let b = normalize(known_name);
    a == b || a.contains(&b) || b.contains(&a)
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| *c != ' ' && *c != '\u{3000}')
        .collect::<String>()
        .to_lowercase()
}

async fn panel_title<P: MapPage>(page: &P) -> Result<String> {
    Ok(page.text_of(PANEL_TITLE).await?.unwrap_or_default())
}

async fn poll_for_match<P: MapPage>(
    page: &P,
    known_name: &str,
    baseline: &str,
    attempts: u32,
    interval: Duration,
) -> Result<bool> {
    for attempt in 1..=attempts {
        let title = panel_title(page).await?;
        if names_match(&title, known_name) {
            debug!(attempt, %title, "panel confirmed");
            return Ok(true);
        }
        if !title.is_empty() && title != baseline {
            debug!(attempt, %baseline, %title, "panel title changed");
        }
        tokio::time::sleep(interval).await;
    }
    Ok(false)
}

/// Wait until the shared panel shows `known_name`.
pub async fn synchronize<P: MapPage>(
    page: &P,
    handle: &P::Handle,
    known_name: &str,
    baseline: &str,
    timing: &PanelTiming,
) -> Result<PanelSync> {
    if poll_for_match(page, known_name, baseline, timing.poll_attempts, timing.poll_interval).await? {
        return Ok(PanelSync::Confirmed);
    }

    let title = panel_title(page).await?;
    warn!(expected = known_name, %title, "panel did not update in time");

    if title.is_empty() {
        info!("panel empty, retrying activation via script click");
        if let Err(e) = ScriptClick.activate(page, handle).await {
            debug!(error = %e, "script click retry failed");
        }
        tokio::time::sleep(timing.recheck_wait).await;
        if poll_for_match(page, known_name, baseline, RECHECK_POLLS, timing.poll_interval).await? {
            return Ok(PanelSync::Confirmed);
        }
    }

    let title = panel_title(page).await?;
    if title.is_empty() {
        Ok(PanelSync::Unconfirmed)
    } else if names_match(&title, known_name) {
        Ok(PanelSync::Confirmed)
    } else {
        Ok(PanelSync::Mismatch(title))
    }
}

/// Activate `handle`, synchronize the panel, and read one record.
///
/// Returns `Ok(None)` when no activation strategy works or the panel shows a
/// different listing. `Err` means the page itself failed.
pub async fn extract_one<P: MapPage>(
    page: &P,
    chain: &ActivationChain<P>,
    handle: &P::Handle,
    known_name: &str,
    timing: &PanelTiming,
) -> Result<Option<ListingRecord>> {
    let baseline = panel_title(page).await?;

    let Some(strategy) = chain.activate(page, handle).await else {
        warn!(name = known_name, "every activation strategy failed, skipping listing");
        return Ok(None);
    };
    debug!(name = known_name, strategy, "listing activated");

    match synchronize(page, handle, known_name, &baseline, timing).await? {
        PanelSync::Confirmed => {}
        PanelSync::Unconfirmed => {
            info!(name = known_name, "panel unconfirmed, extracting anyway");
            tokio::time::sleep(timing.slow_panel_wait).await;
        }
        PanelSync::Mismatch(title) => {
            warn!(expected = known_name, %title, "panel shows another listing, skipping");
            return Ok(None);
        }
    }

    tokio::time::sleep(timing.settle).await;
    let html = page.snapshot().await?;
    Ok(fields::build_record(known_name, &html))
}
