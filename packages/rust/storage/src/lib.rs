//! libSQL storage and the deduplicating lead sink.
//!
//! The [`Storage`] struct wraps a local libSQL database holding the local
//! lead table and run history. The [`DedupSink`] appends validated listings
//! to any [`TableBackend`]: the local table or a Google Sheets worksheet.
//!
//! **Access rules:**
//! - `leadscout run`: read-write (sole writer) via [`Storage::open`]
//! - `leadscout history`: read-only via [`Storage::open_readonly`]

mod migrations;

pub mod local;
pub mod sheets;
pub mod sink;
pub mod table;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};

use leadscout_shared::{LeadScoutError, Result, RunId, RunRecord, RunStatus, RunTotals};

pub use local::LocalTable;
pub use sheets::{GoogleCredentials, GoogleSheetsTable};
pub use sink::{AppendPlan, DedupSink, RowLayout, plan_append};
pub use table::{DeferredTable, MemoryTable, TableBackend, TableInfo};

fn storage_err(e: impl std::fmt::Display) -> LeadScoutError {
    LeadScoutError::Storage(e.to_string())
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LeadScoutError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for reading only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LeadScoutError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    LeadScoutError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(LeadScoutError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sheet rows
    // -----------------------------------------------------------------------

    /// All rows of `sheet` in physical order. Missing row indexes come back
    /// as empty rows so that positions match the sheet.
    pub async fn read_sheet_rows(&self, sheet: &str) -> Result<Vec<Vec<String>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT row_index, cells_json FROM sheet_rows WHERE sheet = ?1 ORDER BY row_index",
                params![sheet],
            )
            .await
            .map_err(storage_err)?;

        let mut out: Vec<Vec<String>> = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let index = row.get::<i64>(0).map_err(storage_err)?;
            let cells_json = row.get::<String>(1).map_err(storage_err)?;
            let cells: Vec<String> = serde_json::from_str(&cells_json)
                .map_err(|e| LeadScoutError::parse(format!("row {index} of {sheet}: {e}")))?;

            let position = usize::try_from(index.max(1) - 1).unwrap_or(0);
            if out.len() < position {
                out.resize(position, Vec::new());
            }
            out.push(cells);
        }
        Ok(out)
    }

    /// Write `rows` starting at physical row `start_row` (1-based) in one transaction.
    pub async fn write_sheet_rows(
        &self,
        sheet: &str,
        start_row: usize,
        rows: &[Vec<String>],
    ) -> Result<()> {
        self.check_writable()?;
        if start_row == 0 {
            return Err(LeadScoutError::sink_fatal("row indexes start at 1"));
        }
        let now = Utc::now().to_rfc3339();

        let tx = self.conn.transaction().await.map_err(storage_err)?;
        for (offset, cells) in rows.iter().enumerate() {
            let index = (start_row + offset) as i64;
            let cells_json = serde_json::to_string(cells).map_err(storage_err)?;
            tx.execute(
                "INSERT INTO sheet_rows (sheet, row_index, cells_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(sheet, row_index) DO UPDATE SET
                    cells_json = excluded.cells_json,
                    updated_at = excluded.updated_at",
                params![sheet, index, cells_json.as_str(), now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    /// Number of stored physical rows for `sheet`, header included.
    pub async fn sheet_row_count(&self, sheet: &str) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COALESCE(MAX(row_index), 0) FROM sheet_rows WHERE sheet = ?1",
                params![sheet],
            )
            .await
            .map_err(storage_err)?;
        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)?.max(0) as usize),
            None => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Record the start of a run.
    pub async fn insert_run(&self, run: &RunRecord) -> Result<()> {
        self.check_writable()?;
        let regions_json = serde_json::to_string(&run.regions).map_err(storage_err)?;
        let totals_json = serde_json::to_string(&run.totals).map_err(storage_err)?;
        let id = run.id.to_string();
        let started_at = run.started_at.to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO runs (id, regions_json, suffix, dry_run, started_at, status, totals_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.as_str(),
                    regions_json.as_str(),
                    run.suffix.as_str(),
                    i64::from(run.dry_run),
                    started_at.as_str(),
                    run.status.as_str(),
                    totals_json.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Mark a run finished with its final status and totals.
    pub async fn finish_run(&self, id: &RunId, status: RunStatus, totals: &RunTotals) -> Result<()> {
        self.check_writable()?;
        let totals_json = serde_json::to_string(totals).map_err(storage_err)?;
        let now = Utc::now().to_rfc3339();
        let id = id.to_string();
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, status = ?2, totals_json = ?3 WHERE id = ?4",
                params![now.as_str(), status.as_str(), totals_json.as_str(), id.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, regions_json, suffix, dry_run, started_at, finished_at, status, totals_json
                 FROM runs ORDER BY started_at DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(storage_err)?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let id = row.get::<String>(0).map_err(storage_err)?;
            let regions_json = row.get::<String>(1).map_err(storage_err)?;
            let started_at = row.get::<String>(4).map_err(storage_err)?;
            let finished_at = row.get::<Option<String>>(5).map_err(storage_err)?;
            let totals_json = row.get::<String>(7).map_err(storage_err)?;

            runs.push(RunRecord {
                id: id
                    .parse()
                    .map_err(|e| LeadScoutError::parse(format!("run id {id}: {e}")))?,
                regions: serde_json::from_str(&regions_json)
                    .map_err(|e| LeadScoutError::parse(e.to_string()))?,
                suffix: row.get::<String>(2).map_err(storage_err)?,
                dry_run: row.get::<i64>(3).map_err(storage_err)? != 0,
                started_at: parse_timestamp(&started_at)?,
                finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
                status: RunStatus::parse(&row.get::<String>(6).map_err(storage_err)?),
                totals: serde_json::from_str(&totals_json)
                    .map_err(|e| LeadScoutError::parse(e.to_string()))?,
            });
        }
        Ok(runs)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LeadScoutError::parse(format!("timestamp {s}: {e}")))
}
