//! Row-oriented table backends the sink writes through.
//!
//! Rows are addressed by physical position, 1-based, with row 1 holding the
//! header. Cells are plain strings.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::OnceCell;

use leadscout_shared::{LeadScoutError, Result};

/// What a connection check reports about a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    /// Spreadsheet title or database path.
    pub title: String,
    pub sheet_name: String,
    /// Physical rows, header included.
    pub row_count: usize,
}

/// A tabular store with a fixed header row.
#[async_trait]
pub trait TableBackend: Send + Sync {
    /// Create the table if missing and write `header` into an empty table.
    async fn ensure_table(&self, header: &[String]) -> Result<()>;

    /// Every physical row, header first. Gaps come back as empty rows.
    async fn read_rows(&self) -> Result<Vec<Vec<String>>>;

    /// Write a contiguous block starting at physical row `start_row`.
    async fn write_rows(&self, start_row: usize, rows: &[Vec<String>]) -> Result<()>;

    async fn describe(&self) -> Result<TableInfo>;
}

#[async_trait]
impl<T: TableBackend + ?Sized> TableBackend for Box<T> {
    async fn ensure_table(&self, header: &[String]) -> Result<()> {
        (**self).ensure_table(header).await
    }

    async fn read_rows(&self) -> Result<Vec<Vec<String>>> {
        (**self).read_rows().await
    }

    async fn write_rows(&self, start_row: usize, rows: &[Vec<String>]) -> Result<()> {
        (**self).write_rows(start_row, rows).await
    }

    async fn describe(&self) -> Result<TableInfo> {
        (**self).describe().await
    }
}

// ---------------------------------------------------------------------------
// DeferredTable
// ---------------------------------------------------------------------------

type Connect = Box<dyn Fn() -> Result<Box<dyn TableBackend>> + Send + Sync>;

/// A backend built on first use.
///
/// Setup errors such as missing credentials surface from the table
/// operation that needed the backend, so a run can report them per append.
/// A failed setup is attempted again on the next operation.
pub struct DeferredTable {
    connect: Connect,
    inner: OnceCell<Box<dyn TableBackend>>,
}

impl DeferredTable {
    pub fn new(
        connect: impl Fn() -> Result<Box<dyn TableBackend>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            connect: Box::new(connect),
            inner: OnceCell::new(),
        }
    }

    async fn inner(&self) -> Result<&dyn TableBackend> {
        let backend = self
            .inner
            .get_or_try_init(|| async { (self.connect)() })
            .await?;
        Ok(&**backend)
    }
}

#[async_trait]
impl TableBackend for DeferredTable {
    async fn ensure_table(&self, header: &[String]) -> Result<()> {
        self.inner().await?.ensure_table(header).await
    }

    async fn read_rows(&self) -> Result<Vec<Vec<String>>> {
        self.inner().await?.read_rows().await
    }

    async fn write_rows(&self, start_row: usize, rows: &[Vec<String>]) -> Result<()> {
        self.inner().await?.write_rows(start_row, rows).await
    }

    async fn describe(&self) -> Result<TableInfo> {
        self.inner().await?.describe().await
    }
}

// ---------------------------------------------------------------------------
// MemoryTable
// ---------------------------------------------------------------------------

/// A table held in memory. Can be told to fail its writes.
#[derive(Debug, Default)]
pub struct MemoryTable {
    rows: Mutex<Vec<Vec<String>>>,
    failing_writes: AtomicUsize,
    rejecting_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the given physical rows.
    pub fn with_rows(rows: Vec<Vec<String>>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    /// The next `n` writes fail with a transient sink error.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Every later write fails with a sink error that retrying will not fix.
    pub fn reject_writes(&self) {
        self.rejecting_writes.store(true, Ordering::SeqCst);
    }

    /// Write attempts so far, failed ones included.
    pub fn write_attempts(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<Vec<String>> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<String>>> {
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TableBackend for MemoryTable {
    async fn ensure_table(&self, header: &[String]) -> Result<()> {
        let mut rows = self.lock();
        if rows.is_empty() {
            rows.push(header.to_vec());
        }
        Ok(())
    }

    async fn read_rows(&self) -> Result<Vec<Vec<String>>> {
        Ok(self.lock().clone())
    }

    async fn write_rows(&self, start_row: usize, new_rows: &[Vec<String>]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_writes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_writes.store(failing - 1, Ordering::SeqCst);
            return Err(LeadScoutError::sink("backend temporarily unavailable"));
        }
        if self.rejecting_writes.load(Ordering::SeqCst) {
            return Err(LeadScoutError::sink_fatal("sheet is protected"));
        }
        if start_row == 0 {
            return Err(LeadScoutError::sink_fatal("row indexes start at 1"));
        }

        let mut rows = self.lock();
        let end = start_row - 1 + new_rows.len();
        if rows.len() < end {
            rows.resize(end, Vec::new());
        }
        for (offset, row) in new_rows.iter().enumerate() {
            rows[start_row - 1 + offset] = row.clone();
        }
        Ok(())
    }

    async fn describe(&self) -> Result<TableInfo> {
        Ok(TableInfo {
            title: "memory".into(),
            sheet_name: "memory".into(),
            row_count: self.lock().len(),
        })
    }
}
