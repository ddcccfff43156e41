//! Map-surface discovery: sessions, pagination, panel synchronization and
//! field extraction.
//!
//! This crate provides:
//! - [`MapPage`]: the DOM operations the protocol needs, with a Chromium implementation
//! - [`ActivationChain`]: escalating click strategies for listing handles
//! - [`DiscoveryEngine`]: one search per session, generic over [`SessionManager`]
//! - [`ScrapePool`]: dedicated worker threads bounding concurrent sessions

pub mod activation;
pub mod chromium;
pub mod engine;
pub mod fields;
pub mod panel;
pub mod pool;
pub mod session;
pub mod surface;

#[cfg(test)]
mod testing;

use async_trait::async_trait;

use leadscout_shared::{ListingRecord, Result};

pub use activation::{
    ActivationChain, ActivationStrategy, CenterClick, DispatchedClick, ForcedClick, ScriptClick,
    ScrollThenClick,
};
pub use chromium::{ChromiumSession, ChromiumSessions};
pub use engine::{DiscoveryEngine, PageKind, SearchSettings};
pub use panel::{PanelSync, PanelTiming, names_match};
pub use pool::ScrapePool;
pub use session::SessionManager;
pub use surface::{MapPage, search_url};

/// Anything that can turn a query into listing records.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<ListingRecord>>;
}

#[async_trait]
impl<M: SessionManager> ListingSource for DiscoveryEngine<M> {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<ListingRecord>> {
        DiscoveryEngine::search(self, query, max_results).await
    }
}
