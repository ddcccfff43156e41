//! Rendering session lifecycle.
//!
//! A session is one isolated browsing context. Nothing above this module
//! knows how it is launched or torn down.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use leadscout_shared::Result;

use crate::surface::MapPage;

/// Starts and stops rendering sessions.
#[async_trait]
pub trait SessionManager: Send + Sync {
    type Session: MapPage + 'static;

    /// Launch an isolated context with fixed locale, viewport and user agent.
    /// Failure is fatal to the current search only.
    async fn acquire(&self) -> Result<Self::Session>;

    /// Tear the session down. Never fails and never hangs the caller.
    async fn release(&self, session: Self::Session);
}

/// Run one teardown step under `limit`.
///
/// A timeout or error is logged and reported as `false`; the caller moves on
/// to the next step either way.
pub async fn bounded_step<F>(step: &'static str, limit: Duration, fut: F) -> bool
where
    F: Future<Output = Result<()>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(())) => {
            debug!(step, "teardown step completed");
            true
        }
        Ok(Err(e)) => {
            warn!(step, error = %e, "teardown step failed");
            false
        }
        Err(_) => {
            warn!(step, ?limit, "teardown step timed out");
            false
        }
    }
}
