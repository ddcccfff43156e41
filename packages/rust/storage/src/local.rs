//! Lead table kept in the local libSQL database.

use std::sync::Arc;

use async_trait::async_trait;

use leadscout_shared::Result;

use crate::Storage;
use crate::table::{TableBackend, TableInfo};

/// One named sheet inside [`Storage`].
pub struct LocalTable {
    storage: Arc<Storage>,
    sheet: String,
    title: String,
}

impl LocalTable {
    /// `title` is reported by [`TableBackend::describe`], usually the database path.
    pub fn new(storage: Arc<Storage>, sheet: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            storage,
            sheet: sheet.into(),
            title: title.into(),
        }
    }
}

#[async_trait]
impl TableBackend for LocalTable {
    async fn ensure_table(&self, header: &[String]) -> Result<()> {
        if self.storage.sheet_row_count(&self.sheet).await? == 0 {
            tracing::info!(sheet = %self.sheet, "writing header to empty local table");
            self.storage
                .write_sheet_rows(&self.sheet, 1, &[header.to_vec()])
                .await?;
        }
        Ok(())
    }

    async fn read_rows(&self) -> Result<Vec<Vec<String>>> {
        self.storage.read_sheet_rows(&self.sheet).await
    }

    async fn write_rows(&self, start_row: usize, rows: &[Vec<String>]) -> Result<()> {
        self.storage.write_sheet_rows(&self.sheet, start_row, rows).await
    }

    async fn describe(&self) -> Result<TableInfo> {
        Ok(TableInfo {
            title: self.title.clone(),
            sheet_name: self.sheet.clone(),
            row_count: self.storage.sheet_row_count(&self.sheet).await?,
        })
    }
}
