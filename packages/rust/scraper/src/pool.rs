//! Dedicated scrape workers.
//!
//! Browser interaction runs on a small fixed set of OS threads, each with its
//! own single-threaded runtime, so DOM work never interleaves with the
//! caller's tasks. The pool size bounds concurrent sessions system-wide.

use std::sync::Arc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info};

use leadscout_shared::{LeadScoutError, ListingRecord, Result};

use crate::ListingSource;
use crate::engine::DiscoveryEngine;
use crate::session::SessionManager;

struct SearchJob {
    query: String,
    max_results: usize,
    reply: oneshot::Sender<Result<Vec<ListingRecord>>>,
}

/// Fixed-size pool of scrape worker threads.
pub struct ScrapePool {
    sender: Option<mpsc::UnboundedSender<SearchJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl ScrapePool {
    /// Spawn `size` workers (at least one) sharing `engine`.
    pub fn new<M>(engine: Arc<DiscoveryEngine<M>>, size: usize) -> Result<Self>
    where
        M: SessionManager + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel::<SearchJob>();
        let receiver = Arc::new(Mutex::new(receiver));
        let size = size.max(1);

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let engine = engine.clone();
            let receiver = receiver.clone();
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| LeadScoutError::io("scrape worker runtime", e))?;

            let handle = std::thread::Builder::new()
                .name(format!("leadscout-scrape-{id}"))
                .spawn(move || {
                    runtime.block_on(async move {
                        loop {
                            let job = { receiver.lock().await.recv().await };
                            let Some(job) = job else { break };
                            debug!(worker = id, query = %job.query, "search picked up");
                            let result = engine.search(&job.query, job.max_results).await;
                            if job.reply.send(result).is_err() {
                                debug!(worker = id, "search caller went away");
                            }
                        }
                    });
                    debug!(worker = id, "scrape worker stopped");
                })
                .map_err(|e| LeadScoutError::io("scrape worker thread", e))?;
            workers.push(handle);
        }

        info!(size, "scrape pool started");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a search and wait for a worker to finish it.
    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<ListingRecord>> {
        let (reply, rx) = oneshot::channel();
        let job = SearchJob {
            query: query.to_string(),
            max_results,
            reply,
        };
        self.sender
            .as_ref()
            .ok_or_else(|| LeadScoutError::Discovery("scrape pool is shut down".into()))?
            .send(job)
            .map_err(|_| LeadScoutError::Discovery("scrape pool is shut down".into()))?;

        rx.await
            .map_err(|_| LeadScoutError::Discovery("scrape worker exited mid-search".into()))?
    }

    /// Stop accepting work and wait for in-flight searches to finish.
    pub fn shutdown(mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("scrape worker panicked");
            }
        }
    }
}

impl Drop for ScrapePool {
    fn drop(&mut self) {
        // Closing the queue lets idle workers exit on their own.
        self.sender.take();
    }
}

#[async_trait]
impl ListingSource for ScrapePool {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<ListingRecord>> {
        ScrapePool::search(self, query, max_results).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::engine::SearchSettings;
    use crate::panel::PanelTiming;
    use crate::testing::{FakeListing, FakeScreen, FakeScript, FakeSessions};

    fn engine() -> Arc<DiscoveryEngine<FakeSessions>> {
        let script = FakeScript::new().fallback(FakeScreen::multi(vec![
            FakeListing::new("Alpha Clinic").website("https://alpha.example.jp"),
            FakeListing::new("Beta Clinic").website("https://beta.example.jp"),
        ]));
        let settings = SearchSettings {
            navigation_timeout: Duration::from_secs(5),
            settle: Duration::ZERO,
            consent_wait: Duration::ZERO,
            scroll_pause: Duration::ZERO,
            max_scroll_attempts: 3,
            stable_scroll_limit: 3,
            disambiguation_terms: Vec::new(),
            disambiguation_suffix: String::new(),
            panel: PanelTiming::instant(3),
        };
        Arc::new(DiscoveryEngine::new(FakeSessions::new(script), settings))
    }

    #[tokio::test]
    async fn searches_run_on_pool_workers() {
        let engine = engine();
        let pool = ScrapePool::new(engine.clone(), 2).expect("pool");
        assert_eq!(pool.size(), 2);

        let results = futures::future::join_all(
            ["a", "b", "c", "d"].map(|q| pool.search(q, 10)),
        )
        .await;
        for result in results {
            assert_eq!(result.expect("search").len(), 2);
        }
        assert_eq!(engine.manager().acquired.load(Ordering::SeqCst), 4);
        assert_eq!(engine.manager().released.load(Ordering::SeqCst), 4);
        pool.shutdown();
    }

    #[tokio::test]
    async fn zero_size_still_gets_one_worker() {
        let pool = ScrapePool::new(engine(), 0).expect("pool");
        assert_eq!(pool.size(), 1);
        assert!(pool.search("a", 1).await.is_ok());
    }
}
