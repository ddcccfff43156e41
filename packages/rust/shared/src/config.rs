//! Application configuration for LeadScout.
//!
//! User config lives at `~/.leadscout/leadscout.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets never live in the file; it names the env vars that carry them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LeadScoutError, Result};
use crate::retry::RetryPolicy;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "leadscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".leadscout";

// ---------------------------------------------------------------------------
// Config structs (matching leadscout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub scraper: ScraperConfig,

    #[serde(default)]
    pub validator: ValidatorConfig,

    #[serde(default)]
    pub sink: SinkConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub exclusion: ExclusionConfig,

    #[serde(default)]
    pub progress: ProgressConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Label shown in logs and run history.
    #[serde(default = "default_project_name")]
    pub project_name: String,

    /// Appended to every region to build the search query.
    #[serde(default = "default_search_suffix")]
    pub search_suffix: String,

    #[serde(default = "default_max_results")]
    pub max_results_per_query: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            search_suffix: default_search_suffix(),
            max_results_per_query: default_max_results(),
        }
    }
}

fn default_project_name() -> String {
    "leadscout".into()
}
fn default_search_suffix() -> String {
    "AGA".into()
}
fn default_max_results() -> usize {
    50
}

/// `[scraper]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_locale")]
    pub locale: String,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Path to a Chrome/Chromium binary. Autodetected when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<String>,

    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,

    /// Wait after navigation before reading the page.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default = "default_scroll_pause_ms")]
    pub scroll_pause_ms: u64,

    #[serde(default = "default_max_scroll_attempts")]
    pub max_scroll_attempts: u32,

    /// Consecutive unchanged handle counts that end pagination.
    #[serde(default = "default_stable_scroll_limit")]
    pub stable_scroll_limit: u32,

    #[serde(default = "default_panel_poll_attempts")]
    pub panel_poll_attempts: u32,

    #[serde(default = "default_panel_poll_interval_ms")]
    pub panel_poll_interval_ms: u64,

    /// Category words; a query containing one is never re-issued.
    #[serde(default = "default_disambiguation_terms")]
    pub disambiguation_terms: Vec<String>,

    #[serde(default = "default_disambiguation_suffix")]
    pub disambiguation_suffix: String,

    /// Maximum concurrent browser sessions.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Per-step bound on session teardown.
    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout_secs: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            headless: true,
            locale: default_locale(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            user_agent: default_user_agent(),
            chrome_path: None,
            navigation_timeout_secs: default_navigation_timeout(),
            settle_ms: default_settle_ms(),
            scroll_pause_ms: default_scroll_pause_ms(),
            max_scroll_attempts: default_max_scroll_attempts(),
            stable_scroll_limit: default_stable_scroll_limit(),
            panel_poll_attempts: default_panel_poll_attempts(),
            panel_poll_interval_ms: default_panel_poll_interval_ms(),
            disambiguation_terms: default_disambiguation_terms(),
            disambiguation_suffix: default_disambiguation_suffix(),
            pool_size: default_pool_size(),
            cleanup_timeout_secs: default_cleanup_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_locale() -> String {
    "ja-JP".into()
}
fn default_viewport_width() -> u32 {
    1280
}
fn default_viewport_height() -> u32 {
    720
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
        .into()
}
fn default_navigation_timeout() -> u64 {
    60
}
fn default_settle_ms() -> u64 {
    3000
}
fn default_scroll_pause_ms() -> u64 {
    1000
}
fn default_max_scroll_attempts() -> u32 {
    30
}
fn default_stable_scroll_limit() -> u32 {
    3
}
fn default_panel_poll_attempts() -> u32 {
    15
}
fn default_panel_poll_interval_ms() -> u64 {
    200
}
fn default_disambiguation_terms() -> Vec<String> {
    vec!["クリニック".into(), "病院".into(), "医院".into()]
}
fn default_disambiguation_suffix() -> String {
    "クリニック".into()
}
fn default_pool_size() -> usize {
    2
}
fn default_cleanup_timeout() -> u64 {
    5
}

/// `[validator]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_anthropic_url")]
    pub base_url: String,

    /// Domain guidance appended to the judgment prompt.
    #[serde(default = "default_criteria")]
    pub criteria: String,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_model(),
            batch_size: default_batch_size(),
            max_tokens: default_max_tokens(),
            base_url: default_anthropic_url(),
            criteria: default_criteria(),
        }
    }
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_batch_size() -> usize {
    10
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_anthropic_url() -> String {
    "https://api.anthropic.com/v1".into()
}
fn default_criteria() -> String {
    "A major chain is a brand operating many branches nationwide. \
     An official site is the clinic's own domain, not a portal, directory, \
     booking service or social media page."
        .into()
}

/// Which table backend the sink writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SinkBackendKind {
    #[default]
    Local,
    GoogleSheets,
}

/// `[sink]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub backend: SinkBackendKind,

    /// Worksheet name (Sheets) or logical table name (local).
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,

    /// Local database file. `~` expands to the home directory.
    #[serde(default = "default_local_db_path")]
    pub local_db_path: String,

    #[serde(default = "default_spreadsheet_id_env")]
    pub spreadsheet_id_env: String,

    /// Env var holding the service-account key: a JSON document or a path to one.
    #[serde(default = "default_credentials_env")]
    pub credentials_env: String,

    #[serde(default = "default_sheets_url")]
    pub sheets_base_url: String,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Header row written when the table is created.
    #[serde(default = "default_output_columns")]
    pub output_columns: Vec<String>,

    /// Status cell value for freshly appended rows.
    #[serde(default = "default_initial_status")]
    pub initial_status: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            backend: SinkBackendKind::default(),
            sheet_name: default_sheet_name(),
            local_db_path: default_local_db_path(),
            spreadsheet_id_env: default_spreadsheet_id_env(),
            credentials_env: default_credentials_env(),
            sheets_base_url: default_sheets_url(),
            token_url: default_token_url(),
            output_columns: default_output_columns(),
            initial_status: default_initial_status(),
        }
    }
}

fn default_sheet_name() -> String {
    "leads".into()
}
fn default_local_db_path() -> String {
    "~/.leadscout/leadscout.db".into()
}
fn default_spreadsheet_id_env() -> String {
    "GOOGLE_SHEETS_ID".into()
}
fn default_credentials_env() -> String {
    "GOOGLE_SHEETS_CREDENTIALS".into()
}
fn default_sheets_url() -> String {
    "https://sheets.googleapis.com/v4".into()
}
fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".into()
}
fn default_output_columns() -> Vec<String> {
    [
        "No.",
        "Name",
        "Website",
        "Contact",
        "News/Blog",
        "Area",
        "Phone",
        "Rating",
        "Reviews",
        "Status",
        "First Contact",
        "Follow-up 1",
        "Follow-up 2",
        "Agreed",
        "Published",
        "Link Checked",
        "Notes",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_initial_status() -> String {
    "未送信".into()
}

/// `[retry]` section. Shared by validation and sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2000
}
fn default_max_delay_ms() -> u64 {
    10_000
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// `[exclusion]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExclusionConfig {
    /// Listings whose name contains one of these (case-insensitive) are dropped.
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// `[progress]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

fn default_heartbeat_secs() -> u64 {
    15
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.leadscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| LeadScoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.leadscout/leadscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LeadScoutError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| LeadScoutError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Write `config` to `path`, creating parent directories as needed.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| LeadScoutError::io(dir, e))?;
    }
    let content =
        toml::to_string_pretty(config).map_err(|e| LeadScoutError::config(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| LeadScoutError::io(path, e))
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| LeadScoutError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Read a required env var, failing with a config error naming it.
pub fn require_env(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(LeadScoutError::config(format!("{var_name} is not set"))),
    }
}

/// The reasoning service API key, if configured.
pub fn validator_api_key(config: &AppConfig) -> Option<String> {
    require_env(&config.validator.api_key_env).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("search_suffix"));
        assert!(toml_str.contains("ANTHROPIC_API_KEY"));
        assert!(toml_str.contains("backend = \"local\""));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.validator.batch_size, 10);
        assert_eq!(parsed.scraper.panel_poll_attempts, 15);
        assert_eq!(parsed.sink.output_columns.len(), 17);
        assert_eq!(parsed.sink.initial_status, "未送信");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[sink]
backend = "google-sheets"
sheet_name = "clinics"

[exclusion]
keywords = ["美容", "Dental"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.sink.backend, SinkBackendKind::GoogleSheets);
        assert_eq!(config.sink.sheet_name, "clinics");
        assert_eq!(config.sink.spreadsheet_id_env, "GOOGLE_SHEETS_ID");
        assert_eq!(config.exclusion.keywords.len(), 2);
        assert_eq!(config.defaults.search_suffix, "AGA");
    }

    #[test]
    fn retry_policy_from_config() {
        let policy = RetryPolicy::from(&RetryConfig::default());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn save_and_reload() {
        let path = std::env::temp_dir()
            .join(format!("leadscout-cfg-{}", uuid::Uuid::now_v7()))
            .join("leadscout.toml");
        let mut config = AppConfig::default();
        config.exclusion.keywords.push("歯科".into());
        save_config_to(&config, &path).expect("save");

        let loaded = load_config_from(&path).expect("load");
        assert_eq!(loaded.exclusion.keywords, vec!["歯科".to_string()]);
        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[test]
    fn missing_env_is_config_error() {
        let err = require_env("LS_TEST_NONEXISTENT_VAR_12345").unwrap_err();
        assert_eq!(
            err.to_string(),
            "config error: LS_TEST_NONEXISTENT_VAR_12345 is not set"
        );
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(
            expand_home("/var/lib/leads.db").expect("expand"),
            PathBuf::from("/var/lib/leads.db")
        );
    }
}
