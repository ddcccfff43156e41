//! Google Sheets worksheet as a table backend.
//!
//! Talks to the Sheets v4 REST API with a service-account token obtained
//! through the OAuth2 JWT bearer grant. Tokens are cached until shortly
//! before they expire.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use url::Url;

use leadscout_shared::{LeadScoutError, Result, SinkConfig, expand_home, require_env};

use crate::table::{TableBackend, TableInfo};

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const NEW_SHEET_ROWS: usize = 1000;
const NEW_SHEET_COLUMNS: usize = 20;

fn sheets_err(message: String, transient: bool) -> LeadScoutError {
    LeadScoutError::Sink { message, transient }
}

fn network_err(e: reqwest::Error) -> LeadScoutError {
    LeadScoutError::Network(e.to_string())
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// The fields of a service-account key file the token exchange needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

/// How requests to the Sheets API are authorized.
#[derive(Debug, Clone)]
pub enum GoogleCredentials {
    ServiceAccount(ServiceAccountKey),
    /// A ready-made access token, used as-is.
    BearerToken(String),
}

impl GoogleCredentials {
    /// Parse credentials given either as inline service-account JSON or as a
    /// path to a JSON key file.
    pub fn from_source(source: &str) -> Result<Self> {
        let source = source.trim();
        let json = if source.starts_with('{') {
            source.to_string()
        } else {
            let path = expand_home(source)?;
            read_key_file(&path)?
        };
        let key: ServiceAccountKey = serde_json::from_str(&json).map_err(|e| {
            LeadScoutError::config(format!("invalid service account credentials: {e}"))
        })?;
        Ok(Self::ServiceAccount(key))
    }
}

fn read_key_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| LeadScoutError::io(path, e))
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    TOKEN_LIFETIME_SECS as u64
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

// ---------------------------------------------------------------------------
// API payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpreadsheetMeta {
    properties: SpreadsheetProperties,
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
    #[serde(default)]
    grid_properties: GridProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GridProperties {
    #[serde(default)]
    row_count: usize,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Spreadsheet column letters for a 1-based column number: 1 is `A`, 27 is `AA`.
fn column_letters(mut n: usize) -> String {
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Quote a worksheet name for use in A1 notation.
fn quote_sheet(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

// ---------------------------------------------------------------------------
// GoogleSheetsTable
// ---------------------------------------------------------------------------

/// One worksheet of a Google spreadsheet.
pub struct GoogleSheetsTable {
    http: Client,
    base_url: String,
    token_url: String,
    spreadsheet_id: String,
    sheet: String,
    credentials: GoogleCredentials,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleSheetsTable {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        sheet: impl Into<String>,
        credentials: GoogleCredentials,
    ) -> Self {
        let defaults = SinkConfig::default();
        Self {
            http: Client::new(),
            base_url: defaults.sheets_base_url,
            token_url: defaults.token_url,
            spreadsheet_id: spreadsheet_id.into(),
            sheet: sheet.into(),
            credentials,
            token: Mutex::new(None),
        }
    }

    /// Build from the `[sink]` section, reading the spreadsheet id and the
    /// credentials from the environment variables it names.
    pub fn from_config(config: &SinkConfig) -> Result<Self> {
        let spreadsheet_id = require_env(&config.spreadsheet_id_env)?;
        let credentials = GoogleCredentials::from_source(&require_env(&config.credentials_env)?)?;
        Ok(Self::new(spreadsheet_id, &config.sheet_name, credentials)
            .with_base_url(&config.sheets_base_url)
            .with_token_url(&config.token_url))
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_token_url(mut self, url: &str) -> Self {
        self.token_url = url.to_string();
        self
    }

    // -----------------------------------------------------------------------
    // Auth
    // -----------------------------------------------------------------------

    async fn access_token(&self) -> Result<String> {
        let key = match &self.credentials {
            GoogleCredentials::BearerToken(token) => return Ok(token.clone()),
            GoogleCredentials::ServiceAccount(key) => key,
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let token_url = key.token_uri.as_deref().unwrap_or(&self.token_url);
        let assertion = sign_assertion(key, token_url)?;
        debug!(client = %key.client_email, "requesting sheets access token");

        let resp = self
            .http
            .post(token_url)
            .form(&[("grant_type", JWT_GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(network_err)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LeadScoutError::from_status(status.as_u16(), &body, sheets_err));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| LeadScoutError::parse(format!("token response: {e}")))?;

        let lifetime = Duration::from_secs(token.expires_in);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        });
        Ok(token.access_token)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let token = self.access_token().await?;
        let resp = request.bearer_auth(token).send().await.map_err(network_err)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(LeadScoutError::from_status(status.as_u16(), &body, sheets_err))
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    fn spreadsheet_url(&self) -> String {
        format!("{}/spreadsheets/{}", self.base_url, self.spreadsheet_id)
    }

    fn values_url(&self, range: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/values", self.spreadsheet_url()))
            .map_err(|e| LeadScoutError::config(format!("invalid sheets url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| LeadScoutError::config("sheets url cannot be a base"))?
            .push(range);
        Ok(url)
    }

    async fn metadata(&self) -> Result<SpreadsheetMeta> {
        let request = self.http.get(self.spreadsheet_url()).query(&[(
            "fields",
            "properties.title,sheets.properties(sheetId,title,gridProperties.rowCount)",
        )]);
        let resp = self.send(request).await?;
        resp.json()
            .await
            .map_err(|e| LeadScoutError::parse(format!("spreadsheet metadata: {e}")))
    }

    fn find_sheet<'a>(&self, meta: &'a SpreadsheetMeta) -> Option<&'a SheetProperties> {
        meta.sheets
            .iter()
            .map(|s| &s.properties)
            .find(|p| p.title == self.sheet)
    }

    async fn batch_update(&self, requests: serde_json::Value) -> Result<()> {
        let request = self
            .http
            .post(format!("{}:batchUpdate", self.spreadsheet_url()))
            .json(&json!({ "requests": requests }));
        self.send(request).await?;
        Ok(())
    }

    /// Grow the grid so that `last_row` exists.
    async fn ensure_rows(&self, last_row: usize) -> Result<()> {
        let meta = self.metadata().await?;
        let sheet = self.find_sheet(&meta).ok_or_else(|| {
            LeadScoutError::sink_fatal(format!("worksheet {} not found", self.sheet))
        })?;
        let current = sheet.grid_properties.row_count;
        if last_row <= current {
            return Ok(());
        }
        info!(from = current, to = last_row, "growing worksheet");
        self.batch_update(json!([{
            "appendDimension": {
                "sheetId": sheet.sheet_id,
                "dimension": "ROWS",
                "length": last_row - current,
            }
        }]))
        .await
    }
}

fn sign_assertion(key: &ServiceAccountKey, audience: &str) -> Result<String> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        iss: &key.client_email,
        scope: SHEETS_SCOPE,
        aud: audience,
        iat: now,
        exp: now + TOKEN_LIFETIME_SECS,
    };
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| LeadScoutError::config(format!("invalid service account private key: {e}")))?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
        .map_err(|e| LeadScoutError::config(format!("failed to sign token request: {e}")))
}

#[async_trait]
impl TableBackend for GoogleSheetsTable {
    #[instrument(skip_all, fields(sheet = %self.sheet))]
    async fn ensure_table(&self, header: &[String]) -> Result<()> {
        let meta = self.metadata().await?;
        if self.find_sheet(&meta).is_none() {
            info!("adding worksheet");
            self.batch_update(json!([{
                "addSheet": {
                    "properties": {
                        "title": self.sheet,
                        "gridProperties": {
                            "rowCount": NEW_SHEET_ROWS,
                            "columnCount": NEW_SHEET_COLUMNS,
                        }
                    }
                }
            }]))
            .await?;
        }

        if self.read_rows().await?.is_empty() {
            self.write_rows(1, &[header.to_vec()]).await?;
        }
        Ok(())
    }

    async fn read_rows(&self) -> Result<Vec<Vec<String>>> {
        let url = self.values_url(&quote_sheet(&self.sheet))?;
        let resp = self.send(self.http.get(url)).await?;
        let range: ValueRange = resp
            .json()
            .await
            .map_err(|e| LeadScoutError::parse(format!("sheet values: {e}")))?;
        Ok(range.values)
    }

    #[instrument(skip_all, fields(sheet = %self.sheet, start_row, rows = rows.len()))]
    async fn write_rows(&self, start_row: usize, rows: &[Vec<String>]) -> Result<()> {
        if start_row == 0 {
            return Err(LeadScoutError::sink_fatal("row indexes start at 1"));
        }
        if rows.is_empty() {
            return Ok(());
        }
        let last_row = start_row + rows.len() - 1;
        let width = rows.iter().map(Vec::len).max().unwrap_or(1).max(1);
        self.ensure_rows(last_row).await?;

        let range = format!(
            "{}!A{start_row}:{}{last_row}",
            quote_sheet(&self.sheet),
            column_letters(width)
        );
        let url = self.values_url(&range)?;
        let request = self
            .http
            .put(url)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&json!({
                "range": range,
                "majorDimension": "ROWS",
                "values": rows,
            }));
        self.send(request).await?;
        debug!(%range, "values written");
        Ok(())
    }

    async fn describe(&self) -> Result<TableInfo> {
        let meta = self.metadata().await?;
        let row_count = if self.find_sheet(&meta).is_some() {
            self.read_rows().await?.len()
        } else {
            0
        };
        Ok(TableInfo {
            title: meta.properties.title,
            sheet_name: self.sheet.clone(),
            row_count,
        })
    }
}
