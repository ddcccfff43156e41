//! Region orchestration: search → exclude → validate → append, one region at a time.
//!
//! A failing region is reported as a `log` event and skipped; the run keeps
//! going and always finishes with a `complete` event carrying the totals.
//! Only a setup failure ends a run with an `error` event.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use leadscout_scraper::ListingSource;
use leadscout_shared::{
    LeadScoutError, ProgressEvent, Result, RunId, RunRecord, RunStatus, RunTotals,
    ValidatedListing,
};
use leadscout_storage::{DedupSink, Storage, TableBackend};

use crate::filter::ExclusionFilter;
use crate::validation::BatchValidator;

pub type EventSender = mpsc::UnboundedSender<ProgressEvent>;

// ---------------------------------------------------------------------------
// Collaborator seams
// ---------------------------------------------------------------------------

/// Where validated listings are persisted.
#[async_trait]
pub trait LeadSink: Send + Sync {
    /// Append `records`, returning how many were new.
    async fn append(&self, records: &[ValidatedListing]) -> Result<usize>;
}

#[async_trait]
impl<B: TableBackend> LeadSink for DedupSink<B> {
    async fn append(&self, records: &[ValidatedListing]) -> Result<usize> {
        DedupSink::append(self, records).await
    }
}

#[async_trait]
impl<T: LeadSink + ?Sized> LeadSink for Arc<T> {
    async fn append(&self, records: &[ValidatedListing]) -> Result<usize> {
        (**self).append(records).await
    }
}

/// Callback surface for run progress.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Blocking iterator over a run's events. Ends after the terminal event.
///
/// Must not be driven from inside an async task.
pub struct EventIter {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    finished: bool,
}

impl EventIter {
    pub fn new(rx: mpsc::UnboundedReceiver<ProgressEvent>) -> Self {
        Self {
            rx,
            finished: false,
        }
    }
}

impl Iterator for EventIter {
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }
        let event = self.rx.blocking_recv()?;
        if event.is_terminal() {
            self.finished = true;
        }
        Some(event)
    }
}

// ---------------------------------------------------------------------------
// Run request / report
// ---------------------------------------------------------------------------

/// What the operator asked for.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub regions: Vec<String>,
    pub suffix: String,
    pub max_results: usize,
    /// Run everything except the sink step.
    pub dry_run: bool,
}

impl RunRequest {
    /// Trimmed regions with blanks dropped.
    pub fn regions(&self) -> Vec<String> {
        self.regions
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn query_for(&self, region: &str) -> String {
        let suffix = self.suffix.trim();
        if suffix.is_empty() {
            region.to_string()
        } else {
            format!("{region} {suffix}")
        }
    }
}

/// Outcome of a run that got past setup.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub id: RunId,
    pub status: RunStatus,
    pub totals: RunTotals,
    pub records: Vec<ValidatedListing>,
}

fn emit(tx: &EventSender, event: ProgressEvent) {
    if tx.send(event).is_err() {
        debug!("progress receiver dropped");
    }
}

fn log(tx: &EventSender, message: impl Into<String>) {
    emit(tx, ProgressEvent::log(message));
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<S: ListingSource> {
    source: S,
    filter: ExclusionFilter,
    validator: BatchValidator,
    sink: Option<Box<dyn LeadSink>>,
    history: Option<Arc<Storage>>,
    heartbeat: Duration,
}

impl<S: ListingSource> Orchestrator<S> {
    pub fn new(source: S, filter: ExclusionFilter, validator: BatchValidator) -> Self {
        Self {
            source,
            filter,
            validator,
            sink: None,
            history: None,
            heartbeat: Duration::from_secs(15),
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn LeadSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Record each run in the local run history.
    pub fn with_history(mut self, storage: Arc<Storage>) -> Self {
        self.history = Some(storage);
        self
    }

    pub fn with_heartbeat(mut self, every: Duration) -> Self {
        self.heartbeat = every.max(Duration::from_secs(1));
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Execute a run, sending progress to `tx`.
    ///
    /// Returns an error only when setup fails; an `error` event is emitted too.
    #[instrument(skip_all, fields(regions = request.regions.len(), dry_run = request.dry_run))]
    pub async fn run(
        &self,
        request: &RunRequest,
        tx: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let regions = request.regions();
        if regions.is_empty() {
            let err = LeadScoutError::config("no regions given");
            emit(tx, ProgressEvent::Error {
                message: err.to_string(),
            });
            return Err(err);
        }
        if !request.dry_run && self.sink.is_none() {
            let err = LeadScoutError::config("no sink configured");
            emit(tx, ProgressEvent::Error {
                message: err.to_string(),
            });
            return Err(err);
        }

        let id = RunId::new();
        self.record_start(&id, &regions, request).await;
        info!(run = %id, regions = regions.len(), "run started");

        let mut totals = RunTotals::default();
        let mut records = Vec::new();
        let mut status = RunStatus::Completed;

        for (i, region) in regions.iter().enumerate() {
            if cancel.is_cancelled() {
                log(tx, "Run cancelled");
                status = RunStatus::Cancelled;
                break;
            }
            debug!(region = %region, position = i + 1, "region started");
            self.run_region(region, request, tx, &mut totals, &mut records)
                .await;
        }

        log(
            tx,
            format!(
                "Done: {} found, {} excluded, {} valid, {} new",
                totals.total_found, totals.total_excluded, totals.total_valid, totals.total_new
            ),
        );
        emit(tx, ProgressEvent::Complete {
            totals,
            records: records.clone(),
        });
        self.record_finish(&id, status, &totals).await;
        info!(run = %id, status = status.as_str(), ?totals, "run finished");

        Ok(RunReport {
            id,
            status,
            totals,
            records,
        })
    }

    async fn run_region(
        &self,
        region: &str,
        request: &RunRequest,
        tx: &EventSender,
        totals: &mut RunTotals,
        collected: &mut Vec<ValidatedListing>,
    ) {
        let query = request.query_for(region);
        log(tx, format!("Searching \"{query}\"..."));

        let found = self
            .await_with_heartbeat(tx, "Searching", self.source.search(&query, request.max_results))
            .await;
        let found = match found {
            Ok(found) => found,
            Err(e) => {
                warn!(region, query = %query, error = %e, "region search failed");
                log(tx, format!("Search failed for \"{query}\": {e}"));
                return;
            }
        };
        totals.total_found += found.len();
        log(tx, format!("{} listings found", found.len()));

        let (kept, excluded) = self.filter.apply(found);
        totals.total_excluded += excluded;
        if excluded > 0 {
            log(tx, format!("Excluded by keyword: {excluded}"));
        }
        if kept.is_empty() {
            return;
        }

        log(tx, format!("Validating {} listings...", kept.len()));
        let validated = self
            .await_with_heartbeat(tx, "Validating", self.validator.validate_batch(&kept))
            .await;
        let valid: Vec<ValidatedListing> = validated.into_iter().filter(|v| v.is_valid).collect();
        totals.total_valid += valid.len();
        log(tx, format!("Valid listings: {}", valid.len()));
        if valid.is_empty() {
            return;
        }
        collected.extend(valid.iter().cloned());

        if request.dry_run {
            return;
        }
        let Some(sink) = self.sink.as_deref() else {
            return;
        };
        log(tx, "Writing to sink...");
        match self.await_with_heartbeat(tx, "Writing", sink.append(&valid)).await {
            Ok(written) => {
                totals.total_new += written;
                log(tx, format!("New rows: {written} (duplicates skipped)"));
            }
            Err(e) => {
                warn!(region, error = %e, "sink append failed");
                log(tx, format!("Sink write failed: {e}"));
            }
        }
    }

    /// Await `fut`, emitting a `log` event every heartbeat period while it runs.
    async fn await_with_heartbeat<F: Future>(&self, tx: &EventSender, step: &str, fut: F) -> F::Output {
        let started = Instant::now();
        let mut ticker = tokio::time::interval_at(started + self.heartbeat, self.heartbeat);
        tokio::pin!(fut);
        loop {
            tokio::select! {
                out = &mut fut => return out,
                _ = ticker.tick() => {
                    log(tx, format!("{step}... {}s elapsed", started.elapsed().as_secs()));
                }
            }
        }
    }

    /// Run on the current tokio runtime and stream events over a channel.
    pub async fn run_reporting(
        &self,
        request: &RunRequest,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = async move {
            let report = self.run(request, &tx, cancel).await;
            drop(tx);
            report
        };
        let drain = async {
            while let Some(event) = rx.recv().await {
                reporter.report(&event);
            }
        };
        let (report, ()) = tokio::join!(run, drain);
        report
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    async fn record_start(&self, id: &RunId, regions: &[String], request: &RunRequest) {
        let Some(history) = &self.history else { return };
        let run = RunRecord {
            id: id.clone(),
            regions: regions.to_vec(),
            suffix: request.suffix.clone(),
            dry_run: request.dry_run,
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            totals: RunTotals::default(),
        };
        if let Err(e) = history.insert_run(&run).await {
            warn!(error = %e, "failed to record run start");
        }
    }

    async fn record_finish(&self, id: &RunId, status: RunStatus, totals: &RunTotals) {
        let Some(history) = &self.history else { return };
        if let Err(e) = history.finish_run(id, status, totals).await {
            warn!(error = %e, "failed to record run finish");
        }
    }
}

impl<S: ListingSource + 'static> Orchestrator<S> {
    /// Start a run as a task on the current runtime.
    ///
    /// The returned iterator blocks, so consume it from a plain thread.
    pub fn spawn_run(
        self: Arc<Self>,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> (EventIter, tokio::task::JoinHandle<Result<RunReport>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move { self.run(&request, &tx, &cancel).await });
        (EventIter::new(rx), handle)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use leadscout_shared::{ListingRecord, RetryPolicy, SinkConfig};
    use leadscout_storage::{DeferredTable, MemoryTable, RowLayout};

    use super::*;
    use crate::claude::ReasoningService;

    struct FakeSource {
        results: HashMap<String, Result<Vec<ListingRecord>>>,
        queries: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                results: HashMap::new(),
                queries: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn query(mut self, query: &str, names: &[&str]) -> Self {
            let records = names
                .iter()
                .map(|name| {
                    let mut r = ListingRecord::named(*name);
                    r.url = Some(format!(
                        "https://{}.example",
                        name.to_lowercase().replace(' ', "-")
                    ));
                    r
                })
                .collect();
            self.results.insert(query.into(), Ok(records));
            self
        }

        fn failing(mut self, query: &str) -> Self {
            self.results.insert(
                query.into(),
                Err(LeadScoutError::Discovery("navigation timed out".into())),
            );
            self
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ListingSource for FakeSource {
        async fn search(&self, query: &str, _max_results: usize) -> Result<Vec<ListingRecord>> {
            self.queries.lock().unwrap().push(query.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.results.get(query) {
                Some(Ok(records)) => Ok(records.clone()),
                Some(Err(e)) => Err(LeadScoutError::Discovery(e.to_string())),
                None => Ok(Vec::new()),
            }
        }
    }

    /// Judges every listing as an official, independent site.
    struct ApproveAll;

    #[async_trait]
    impl ReasoningService for ApproveAll {
        async fn complete(&self, prompt: &str) -> Result<String> {
            let count = prompt.matches("\"index\":").count().saturating_sub(1);
            let judgments: Vec<serde_json::Value> = (0..count)
                .map(|i| {
                    serde_json::json!({
                        "index": i,
                        "is_official_site": true,
                        "is_major_chain": false,
                    })
                })
                .collect();
            Ok(serde_json::to_string(&judgments).unwrap())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl LeadSink for BrokenSink {
        async fn append(&self, _records: &[ValidatedListing]) -> Result<usize> {
            Err(LeadScoutError::config("GOOGLE_SHEETS_ID is not set"))
        }
    }

    fn validator() -> BatchValidator {
        BatchValidator::new(Some(Box::new(ApproveAll)), 10, "", RetryPolicy::immediate(1))
    }

    fn memory_sink() -> Arc<DedupSink<MemoryTable>> {
        Arc::new(DedupSink::new(
            MemoryTable::new(),
            RowLayout::from(&SinkConfig::default()),
            RetryPolicy::immediate(1),
        ))
    }

    fn request(regions: &[&str]) -> RunRequest {
        RunRequest {
            regions: regions.iter().map(|r| r.to_string()).collect(),
            suffix: "X".into(),
            max_results: 50,
            dry_run: false,
        }
    }

    async fn collect(
        orchestrator: &Orchestrator<FakeSource>,
        request: &RunRequest,
    ) -> (Result<RunReport>, Vec<ProgressEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = orchestrator
            .run(request, &tx, &CancellationToken::new())
            .await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        (report, events)
    }

    fn messages(events: &[ProgressEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Log { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn two_region_scenario_totals_and_rows() {
        let source = FakeSource::new()
            .query("A X", &["Alpha Clinic", "Big Chain Clinic", "Beta Clinic"])
            .query("B X", &[]);
        let sink = memory_sink();
        let orchestrator = Orchestrator::new(source, ExclusionFilter::new(["chain"]), validator())
            .with_sink(Box::new(sink.clone()));

        let (report, events) = collect(&orchestrator, &request(&["A", "B"])).await;
        let report = report.expect("run");

        let expected = RunTotals {
            total_found: 3,
            total_excluded: 1,
            total_valid: 2,
            total_new: 2,
        };
        assert_eq!(report.totals, expected);
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(orchestrator.source().queries(), vec!["A X", "B X"]);

        let rows = sink.backend().snapshot();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][RowLayout::SEQ], "1");
        assert_eq!(rows[1][RowLayout::NAME], "Alpha Clinic");
        assert_eq!(rows[2][RowLayout::SEQ], "2");
        assert_eq!(rows[2][RowLayout::NAME], "Beta Clinic");

        match events.last() {
            Some(ProgressEvent::Complete { totals, records }) => {
                assert_eq!(*totals, expected);
                assert_eq!(records.len(), 2);
            }
            other => panic!("expected complete event, got {other:?}"),
        }
        assert!(events[..events.len() - 1].iter().all(|e| !e.is_terminal()));
    }

    #[tokio::test]
    async fn failed_region_does_not_abort_run() {
        let source = FakeSource::new().failing("A X").query("B X", &["Gamma Clinic"]);
        let sink = memory_sink();
        let orchestrator = Orchestrator::new(source, ExclusionFilter::default(), validator())
            .with_sink(Box::new(sink.clone()));

        let (report, events) = collect(&orchestrator, &request(&["A", "B"])).await;
        let report = report.expect("run");
        assert_eq!(report.totals.total_found, 1);
        assert_eq!(report.totals.total_new, 1);
        assert!(
            messages(&events)
                .iter()
                .any(|m| m.contains("Search failed") && m.contains("navigation timed out"))
        );
        assert!(matches!(events.last(), Some(ProgressEvent::Complete { .. })));
    }

    #[tokio::test]
    async fn every_region_failing_still_completes_with_zero_totals() {
        let source = FakeSource::new().failing("A X").failing("B X");
        let orchestrator = Orchestrator::new(source, ExclusionFilter::default(), validator())
            .with_sink(Box::new(memory_sink()));

        let (report, events) = collect(&orchestrator, &request(&["A", "B"])).await;
        assert_eq!(report.expect("run").totals, RunTotals::default());
        assert!(matches!(events.last(), Some(ProgressEvent::Complete { .. })));
    }

    #[tokio::test]
    async fn sink_failure_counts_valid_but_not_new() {
        let source = FakeSource::new().query("A X", &["Alpha Clinic", "Beta Clinic"]);
        let orchestrator = Orchestrator::new(source, ExclusionFilter::default(), validator())
            .with_sink(Box::new(BrokenSink));

        let (report, events) = collect(&orchestrator, &request(&["A"])).await;
        let totals = report.expect("run").totals;
        assert_eq!(totals.total_valid, 2);
        assert_eq!(totals.total_new, 0);
        assert!(messages(&events).iter().any(|m| m.contains("Sink write failed")));
    }

    #[tokio::test]
    async fn unconfigured_sink_backend_is_reported_per_region() {
        let source = FakeSource::new()
            .query("A X", &["Alpha Clinic"])
            .query("B X", &["Beta Clinic"]);
        let sink = DedupSink::new(
            DeferredTable::new(|| Err(LeadScoutError::config("GOOGLE_SHEETS_ID is not set"))),
            RowLayout::from(&SinkConfig::default()),
            RetryPolicy::immediate(3),
        );
        let orchestrator = Orchestrator::new(source, ExclusionFilter::default(), validator())
            .with_sink(Box::new(sink));

        let (report, events) = collect(&orchestrator, &request(&["A", "B"])).await;
        let totals = report.expect("run").totals;
        assert_eq!(totals.total_valid, 2);
        assert_eq!(totals.total_new, 0);
        let failures = messages(&events)
            .into_iter()
            .filter(|m| m.contains("GOOGLE_SHEETS_ID"))
            .count();
        assert_eq!(failures, 2);
        assert!(matches!(events.last(), Some(ProgressEvent::Complete { .. })));
    }

    #[tokio::test]
    async fn dry_run_skips_the_sink() {
        let source = FakeSource::new().query("A X", &["Alpha Clinic"]);
        let sink = memory_sink();
        let orchestrator = Orchestrator::new(source, ExclusionFilter::default(), validator())
            .with_sink(Box::new(sink.clone()));

        let mut req = request(&["A"]);
        req.dry_run = true;
        let (report, _) = collect(&orchestrator, &req).await;
        let report = report.expect("run");
        assert_eq!(report.totals.total_valid, 1);
        assert_eq!(report.totals.total_new, 0);
        assert_eq!(report.records.len(), 1);
        assert!(sink.backend().snapshot().is_empty());
    }

    #[tokio::test]
    async fn blank_regions_are_a_setup_error() {
        let orchestrator =
            Orchestrator::new(FakeSource::new(), ExclusionFilter::default(), validator())
                .with_sink(Box::new(memory_sink()));

        let (report, events) = collect(&orchestrator, &request(&["  ", ""])).await;
        assert!(matches!(report, Err(LeadScoutError::Config { .. })));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ProgressEvent::Error { .. }));
        assert!(orchestrator.source().queries().is_empty());
    }

    #[tokio::test]
    async fn regions_are_trimmed() {
        let orchestrator =
            Orchestrator::new(FakeSource::new(), ExclusionFilter::default(), validator())
                .with_sink(Box::new(memory_sink()));
        let (report, _) = collect(&orchestrator, &request(&[" 渋谷区 ", "", "港区"])).await;
        assert!(report.is_ok());
        assert_eq!(orchestrator.source().queries(), vec!["渋谷区 X", "港区 X"]);
    }

    #[tokio::test]
    async fn cancellation_is_checked_between_regions() {
        let orchestrator =
            Orchestrator::new(FakeSource::new(), ExclusionFilter::default(), validator())
                .with_sink(Box::new(memory_sink()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = orchestrator
            .run(&request(&["A", "B"]), &tx, &cancel)
            .await
            .expect("run");
        drop(tx);

        assert_eq!(report.status, RunStatus::Cancelled);
        assert!(orchestrator.source().queries().is_empty());
        let mut last = None;
        while let Some(e) = rx.recv().await {
            last = Some(e);
        }
        assert!(matches!(last, Some(ProgressEvent::Complete { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_fires_during_long_steps() {
        let source = FakeSource::new()
            .query("A X", &["Alpha Clinic"])
            .slow(Duration::from_secs(40));
        let orchestrator = Orchestrator::new(source, ExclusionFilter::default(), validator())
            .with_sink(Box::new(memory_sink()))
            .with_heartbeat(Duration::from_secs(15));

        let (_, events) = collect(&orchestrator, &request(&["A"])).await;
        let beats: Vec<String> = messages(&events)
            .into_iter()
            .filter(|m| m.starts_with("Searching...") && m.contains("elapsed"))
            .collect();
        assert_eq!(beats, vec!["Searching... 15s elapsed", "Searching... 30s elapsed"]);
    }

    #[tokio::test]
    async fn reporter_sees_every_event() {
        struct Recorder(Mutex<Vec<ProgressEvent>>);
        impl ProgressReporter for Recorder {
            fn report(&self, event: &ProgressEvent) {
                self.0.lock().unwrap().push(event.clone());
            }
        }

        let source = FakeSource::new().query("A X", &["Alpha Clinic"]);
        let orchestrator = Orchestrator::new(source, ExclusionFilter::default(), validator())
            .with_sink(Box::new(memory_sink()));
        let recorder = Recorder(Mutex::new(Vec::new()));
        orchestrator
            .run_reporting(&request(&["A"]), &recorder, &CancellationToken::new())
            .await
            .expect("run");

        let events = recorder.0.lock().unwrap();
        assert!(matches!(events.first(), Some(ProgressEvent::Log { .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::Complete { .. })));
    }

    #[test]
    fn event_iter_blocks_until_complete() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let guard = runtime.enter();

        let source = FakeSource::new().query("A X", &["Alpha Clinic"]);
        let orchestrator = Arc::new(
            Orchestrator::new(source, ExclusionFilter::default(), validator())
                .with_sink(Box::new(memory_sink())),
        );
        let (events, handle) = orchestrator.spawn_run(request(&["A"]), CancellationToken::new());
        drop(guard);

        let events: Vec<ProgressEvent> = events.collect();
        assert!(matches!(events.last(), Some(ProgressEvent::Complete { .. })));
        let report = runtime.block_on(handle).unwrap().expect("run");
        assert_eq!(report.totals.total_new, 1);
    }

    #[tokio::test]
    async fn runs_are_recorded_in_history() {
        let path = std::env::temp_dir().join(format!("ls_test_{}.db", RunId::new()));
        let storage = Arc::new(Storage::open(&path).await.expect("open"));
        let source = FakeSource::new().query("A X", &["Alpha Clinic"]);
        let orchestrator = Orchestrator::new(source, ExclusionFilter::default(), validator())
            .with_sink(Box::new(memory_sink()))
            .with_history(storage.clone());

        let (report, _) = collect(&orchestrator, &request(&["A"])).await;
        let report = report.expect("run");

        let runs = storage.list_runs(5).await.expect("list");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, report.id);
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert_eq!(runs[0].totals.total_new, 1);
        assert_eq!(runs[0].suffix, "X");
    }
}
