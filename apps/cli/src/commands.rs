//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use leadscout_core::{
    BatchValidator, ExclusionFilter, LeadSink, Orchestrator, ProgressReporter, RunRequest,
};
use leadscout_scraper::{ChromiumSessions, DiscoveryEngine, ScrapePool, SearchSettings};
use leadscout_shared::{
    AppConfig, ProgressEvent, RetryPolicy, SinkBackendKind, config_file_path, expand_home,
    load_config_from, save_config_to,
};
use leadscout_storage::{
    DedupSink, DeferredTable, GoogleSheetsTable, LocalTable, RowLayout, Storage, TableBackend,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// LeadScout: collect deduplicated business leads from map searches.
#[derive(Parser)]
#[command(
    name = "leadscout",
    version,
    about = "Collect, validate and deduplicate business leads from map searches.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.leadscout/leadscout.toml).
    #[arg(long, env = "LEADSCOUT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Progress event output format for `run`.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum EventFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Search each region, validate the listings and append new ones.
    Run {
        /// Region to search (repeatable).
        #[arg(short, long = "region", required = true)]
        regions: Vec<String>,

        /// Appended to every region to build the query.
        #[arg(short, long)]
        suffix: Option<String>,

        /// Maximum listings per query.
        #[arg(long)]
        max_results: Option<usize>,

        /// Search and validate without writing to the sink.
        #[arg(long)]
        dry_run: bool,

        /// Progress output: text or json (one event per line).
        #[arg(long, default_value = "text")]
        events: EventFormat,
    },

    /// Lead table checks.
    Sink {
        #[command(subcommand)]
        action: SinkAction,
    },

    /// Manage exclusion keywords.
    Keywords {
        #[command(subcommand)]
        action: KeywordsAction,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show recent runs.
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub(crate) enum SinkAction {
    /// Connect to the lead table and report what was found.
    Test,
    /// Count recognized lead rows.
    Count,
}

#[derive(Subcommand)]
pub(crate) enum KeywordsAction {
    List,
    Add { keyword: String },
    Remove { keyword: String },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "leadscout=info",
        1 => "leadscout=debug",
        _ => "leadscout=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Resolved config plus where it came from.
struct Context {
    config: AppConfig,
    path: PathBuf,
}

impl Context {
    fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(p) => p,
            None => config_file_path()?,
        };
        let config = if path.exists() {
            load_config_from(&path)?
        } else {
            AppConfig::default()
        };
        Ok(Self { config, path })
    }
}

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let ctx = Context::load(cli.config)?;
    match cli.command {
        Command::Run {
            regions,
            suffix,
            max_results,
            dry_run,
            events,
        } => {
            let request = RunRequest {
                regions,
                suffix: suffix.unwrap_or_else(|| ctx.config.defaults.search_suffix.clone()),
                max_results: max_results.unwrap_or(ctx.config.defaults.max_results_per_query),
                dry_run,
            };
            cmd_run(&ctx, request, events).await
        }
        Command::Sink { action } => match action {
            SinkAction::Test => cmd_sink_test(&ctx).await,
            SinkAction::Count => cmd_sink_count(&ctx).await,
        },
        Command::Keywords { action } => match action {
            KeywordsAction::List => cmd_keywords_list(&ctx),
            KeywordsAction::Add { keyword } => cmd_keywords_add(ctx, &keyword),
            KeywordsAction::Remove { keyword } => cmd_keywords_remove(ctx, &keyword),
        },
        Command::Config { action } => match action {
            ConfigAction::Init { force } => cmd_config_init(&ctx.path, force),
            ConfigAction::Show => cmd_config_show(&ctx),
        },
        Command::History { limit } => cmd_history(&ctx, limit).await,
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

async fn open_local_storage(config: &AppConfig) -> Result<(Arc<Storage>, PathBuf)> {
    let path = expand_home(&config.sink.local_db_path)?;
    let storage = Storage::open(&path).await?;
    Ok((Arc::new(storage), path))
}

async fn table_backend(
    config: &AppConfig,
    local: Option<(Arc<Storage>, PathBuf)>,
) -> Result<Box<dyn TableBackend>> {
    match config.sink.backend {
        SinkBackendKind::Local => {
            let (storage, path) = match local {
                Some(local) => local,
                None => open_local_storage(config).await?,
            };
            Ok(Box::new(LocalTable::new(
                storage,
                &config.sink.sheet_name,
                path.display().to_string(),
            )))
        }
        SinkBackendKind::GoogleSheets => {
            // Missing credentials are reported by the first append, not here.
            let sink = config.sink.clone();
            Ok(Box::new(DeferredTable::new(move || {
                Ok(Box::new(GoogleSheetsTable::from_config(&sink)?) as Box<dyn TableBackend>)
            })))
        }
    }
}

fn dedup_sink(config: &AppConfig, backend: Box<dyn TableBackend>) -> DedupSink<Box<dyn TableBackend>> {
    DedupSink::new(
        backend,
        RowLayout::from(&config.sink),
        RetryPolicy::from(&config.retry),
    )
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(ctx: &Context, request: RunRequest, events: EventFormat) -> Result<()> {
    let config = &ctx.config;

    let local = match open_local_storage(config).await {
        Ok(local) => Some(local),
        Err(e) => {
            warn!(error = %e, "local database unavailable, run history disabled");
            None
        }
    };
    let history = local.as_ref().map(|(storage, _)| storage.clone());

    let sink: Option<Box<dyn LeadSink>> = if request.dry_run {
        None
    } else {
        let backend = table_backend(config, local).await?;
        Some(Box::new(dedup_sink(config, backend)))
    };

    let engine = Arc::new(DiscoveryEngine::new(
        ChromiumSessions::new(config.scraper.clone()),
        SearchSettings::from(&config.scraper),
    ));
    let pool = ScrapePool::new(engine, config.scraper.pool_size)?;

    let mut orchestrator = Orchestrator::new(
        pool,
        ExclusionFilter::new(config.exclusion.keywords.iter().cloned()),
        BatchValidator::from_config(config)?,
    )
    .with_heartbeat(std::time::Duration::from_secs(config.progress.heartbeat_secs));
    if let Some(sink) = sink {
        orchestrator = orchestrator.with_sink(sink);
    }
    if let Some(history) = history {
        orchestrator = orchestrator.with_history(history);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current region...");
            on_signal.cancel();
        }
    });

    info!(
        regions = request.regions.len(),
        suffix = %request.suffix,
        dry_run = request.dry_run,
        "starting run"
    );

    let reporter: Box<dyn ProgressReporter> = match events {
        EventFormat::Text => Box::new(CliProgress::new()),
        EventFormat::Json => Box::new(JsonEvents),
    };
    let report = orchestrator
        .run_reporting(&request, reporter.as_ref(), &cancel)
        .await?;

    if matches!(events, EventFormat::Text) {
        let t = report.totals;
        println!();
        println!("  Run {} ({})", report.id, report.status.as_str());
        println!("  Found:    {}", t.total_found);
        println!("  Excluded: {}", t.total_excluded);
        println!("  Valid:    {}", t.total_valid);
        if request.dry_run {
            println!("  New:      - (dry run)");
            for listing in &report.records {
                println!(
                    "    {}  {}",
                    listing.record.name,
                    listing.record.url.as_deref().unwrap_or("-")
                );
            }
        } else {
            println!("  New:      {}", t.total_new);
        }
        println!();
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Progress reporters
// ---------------------------------------------------------------------------

/// Prints log events above an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn report(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Log { message } => {
                self.spinner.println(format!("  {message}"));
                self.spinner.set_message(message.clone());
            }
            ProgressEvent::Complete { .. } => self.spinner.finish_and_clear(),
            ProgressEvent::Error { message } => {
                self.spinner.abandon_with_message(format!("error: {message}"));
            }
        }
    }
}

/// Prints each event as one JSON object per line.
struct JsonEvents;

impl ProgressReporter for JsonEvents {
    fn report(&self, event: &ProgressEvent) {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "failed to serialize progress event"),
        }
    }
}

// ---------------------------------------------------------------------------
// sink
// ---------------------------------------------------------------------------

async fn cmd_sink_test(ctx: &Context) -> Result<()> {
    let backend = table_backend(&ctx.config, None).await?;
    let sink = dedup_sink(&ctx.config, backend);
    match sink.describe().await {
        Ok(info) => {
            println!("  Connected");
            println!("  Title: {}", info.title);
            println!("  Sheet: {}", info.sheet_name);
            println!("  Rows:  {}", info.row_count);
            Ok(())
        }
        Err(e) => {
            let kind = if e.is_transient() { "transient" } else { "permanent" };
            Err(eyre!("sink connection failed ({kind}): {e}"))
        }
    }
}

async fn cmd_sink_count(ctx: &Context) -> Result<()> {
    let backend = table_backend(&ctx.config, None).await?;
    let count = dedup_sink(&ctx.config, backend).count().await?;
    println!("{count}");
    Ok(())
}

// ---------------------------------------------------------------------------
// keywords
// ---------------------------------------------------------------------------

fn cmd_keywords_list(ctx: &Context) -> Result<()> {
    if ctx.config.exclusion.keywords.is_empty() {
        println!("No exclusion keywords configured.");
    }
    for keyword in &ctx.config.exclusion.keywords {
        println!("{keyword}");
    }
    Ok(())
}

fn cmd_keywords_add(mut ctx: Context, keyword: &str) -> Result<()> {
    let mut filter = ExclusionFilter::new(ctx.config.exclusion.keywords.iter().cloned());
    if !filter.add_keyword(keyword) {
        println!("Keyword already present or blank: {keyword:?}");
        return Ok(());
    }
    ctx.config.exclusion.keywords = filter.keywords().to_vec();
    save_config_to(&ctx.config, &ctx.path)?;
    info!(keyword, "exclusion keyword added");
    println!("Added {:?} ({} keywords)", keyword.trim(), filter.keywords().len());
    Ok(())
}

fn cmd_keywords_remove(mut ctx: Context, keyword: &str) -> Result<()> {
    let mut filter = ExclusionFilter::new(ctx.config.exclusion.keywords.iter().cloned());
    if !filter.remove_keyword(keyword) {
        return Err(eyre!("keyword not found: {keyword:?}"));
    }
    ctx.config.exclusion.keywords = filter.keywords().to_vec();
    save_config_to(&ctx.config, &ctx.path)?;
    info!(keyword, "exclusion keyword removed");
    println!("Removed {:?} ({} keywords)", keyword.trim(), filter.keywords().len());
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(eyre!(
            "config already exists at {} (use --force to overwrite)",
            path.display()
        ));
    }
    save_config_to(&AppConfig::default(), path)?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(ctx: &Context) -> Result<()> {
    let toml_str = toml::to_string_pretty(&ctx.config)?;
    println!("# {}", ctx.path.display());
    println!("{toml_str}");

    let c = &ctx.config;
    for var in [
        &c.validator.api_key_env,
        &c.sink.spreadsheet_id_env,
        &c.sink.credentials_env,
    ] {
        let state = if std::env::var(var).is_ok_and(|v| !v.trim().is_empty()) {
            "set"
        } else {
            "not set"
        };
        println!("# {var}: {state}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// history
// ---------------------------------------------------------------------------

async fn cmd_history(ctx: &Context, limit: usize) -> Result<()> {
    let path = expand_home(&ctx.config.sink.local_db_path)?;
    let storage = Storage::open_readonly(&path).await?;
    let runs = storage.list_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    for run in runs {
        let t = run.totals;
        println!(
            "{}  {:<9}  {}{}  found={} excluded={} valid={} new={}  [{}] {}",
            run.started_at.format("%Y-%m-%d %H:%M"),
            run.status.as_str(),
            run.id,
            if run.dry_run { " (dry run)" } else { "" },
            t.total_found,
            t.total_excluded,
            t.total_valid,
            t.total_new,
            run.regions.join(", "),
            run.suffix,
        );
    }
    Ok(())
}
