//! Escalating listing activation.
//!
//! Each strategy is one way of clicking a listing handle. The chain tries
//! them in priority order and stops at the first that does not error.

use async_trait::async_trait;
use tracing::debug;

use leadscout_shared::Result;

use crate::surface::MapPage;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One interchangeable way to activate a listing handle.
#[async_trait]
pub trait ActivationStrategy<P: MapPage>: Send + Sync {
    async fn activate(&self, page: &P, handle: &P::Handle) -> Result<()>;

    /// Human-readable strategy name for tracing.
    fn name(&self) -> &'static str;
}

/// Scroll into view, then a normal click.
pub struct ScrollThenClick;

/// Click bypassing actionability checks.
pub struct ForcedClick;

/// `element.click()` from script.
pub struct ScriptClick;

/// Synthetic `MouseEvent` dispatch.
pub struct DispatchedClick;

/// Mouse click at the bounding-box center.
pub struct CenterClick;

#[async_trait]
impl<P: MapPage> ActivationStrategy<P> for ScrollThenClick {
    async fn activate(&self, page: &P, handle: &P::Handle) -> Result<()> {
        page.scroll_into_view_and_click(handle).await
    }

    fn name(&self) -> &'static str {
        "scroll-then-click"
    }
}

#[async_trait]
impl<P: MapPage> ActivationStrategy<P> for ForcedClick {
    async fn activate(&self, page: &P, handle: &P::Handle) -> Result<()> {
        page.force_click(handle).await
    }

    fn name(&self) -> &'static str {
        "forced-click"
    }
}

#[async_trait]
impl<P: MapPage> ActivationStrategy<P> for ScriptClick {
    async fn activate(&self, page: &P, handle: &P::Handle) -> Result<()> {
        page.script_click(handle).await
    }

    fn name(&self) -> &'static str {
        "script-click"
    }
}

#[async_trait]
impl<P: MapPage> ActivationStrategy<P> for DispatchedClick {
    async fn activate(&self, page: &P, handle: &P::Handle) -> Result<()> {
        page.dispatch_click(handle).await
    }

    fn name(&self) -> &'static str {
        "dispatched-click"
    }
}

#[async_trait]
impl<P: MapPage> ActivationStrategy<P> for CenterClick {
    async fn activate(&self, page: &P, handle: &P::Handle) -> Result<()> {
        page.click_at_center(handle).await
    }

    fn name(&self) -> &'static str {
        "center-click"
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Holds activation strategies in priority order.
pub struct ActivationChain<P: MapPage> {
    strategies: Vec<Box<dyn ActivationStrategy<P>>>,
}

impl<P: MapPage> ActivationChain<P> {
    /// The built-in escalation: gentlest interaction first, raw coordinates last.
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(ScrollThenClick),
                Box::new(ForcedClick),
                Box::new(ScriptClick),
                Box::new(DispatchedClick),
                Box::new(CenterClick),
            ],
        }
    }

    /// Try each strategy in turn. Returns the name of the one that worked,
    /// or `None` when every strategy failed.
    pub async fn activate(&self, page: &P, handle: &P::Handle) -> Option<&'static str> {
        for strategy in &self.strategies {
            match strategy.activate(page, handle).await {
                Ok(()) => return Some(strategy.name()),
                Err(e) => debug!(strategy = strategy.name(), error = %e, "activation failed"),
            }
        }
        None
    }
}

impl<P: MapPage> Default for ActivationChain<P> {
    fn default() -> Self {
        Self::new()
    }
}
