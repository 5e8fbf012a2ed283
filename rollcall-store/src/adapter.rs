//! Cache-through access to one workbook of the backing table service.
//!
//! Reads are served from the [`Cache`] for up to the table TTL. Every write
//! invalidates the table's entry as its last step, whether the write
//! succeeded or not: after a failure the service's true state is unknown, so
//! the next reader must go to the service.
//!
//! Rows are addressed by zero-based physical index here (header is row 0);
//! the translation to the service's one-based A1 notation happens only in
//! [`CellRange`].

use std::sync::Arc;
use std::time::Duration;

use rollcall_core::{BackendError, StoreError, Table, TableId, TableMeta};
use tracing::{debug, warn};

use crate::addressing::CellRange;
use crate::backend::TableService;
use crate::cache::{Cache, Cached};

#[derive(Clone)]
pub struct TableAdapter {
    service: Arc<dyn TableService>,
    cache: Arc<Cache>,
    workbook: String,
    ttl: Duration,
}

impl std::fmt::Debug for TableAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableAdapter")
            .field("workbook", &self.workbook)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Map a service failure to the caller-facing taxonomy.
pub(crate) fn lift(err: BackendError) -> StoreError {
    match err {
        BackendError::NoSuchTable(title) => StoreError::not_found(format!("table '{title}'")),
        BackendError::NoSuchTableId(_) => StoreError::not_found("sub-table"),
        other => StoreError::Backing(other),
    }
}

impl TableAdapter {
    pub fn new(
        service: Arc<dyn TableService>,
        cache: Arc<Cache>,
        workbook: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            service,
            cache,
            workbook: workbook.into(),
            ttl,
        }
    }

    pub fn workbook(&self) -> &str {
        &self.workbook
    }

    /// Cache key of a table's contents.
    pub fn table_key(&self, title: &str) -> String {
        format!("table:{}:{}", self.workbook, title)
    }

    fn meta_key(&self) -> String {
        format!("tables:{}", self.workbook)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Table contents, from the cache when fresh enough.
    pub async fn read(&self, title: &str) -> Result<Arc<Table>, StoreError> {
        let key = self.table_key(title);
        if let Some(table) = self.cache.get_table(&key) {
            return Ok(table);
        }
        debug!(workbook = %self.workbook, table = %title, "cache miss");
        let rows = self.service.read(title).await.map_err(lift)?;
        let table = Arc::new(Table::from_rows(rows));
        self.cache.set(key, Cached::Table(Arc::clone(&table)), self.ttl);
        Ok(table)
    }

    /// Invalidate, then read from the service.
    pub async fn read_fresh(&self, title: &str) -> Result<Arc<Table>, StoreError> {
        self.invalidate(title);
        self.read(title).await
    }

    /// Read a dynamically created table addressed by its stable id.
    pub async fn read_by_id(&self, id: TableId) -> Result<(String, Arc<Table>), StoreError> {
        let title = self.require_title(id).await?;
        let table = self.read(&title).await?;
        Ok((title, table))
    }

    /// [`TableAdapter::read_by_id`] bypassing the cache.
    pub async fn read_fresh_by_id(&self, id: TableId) -> Result<(String, Arc<Table>), StoreError> {
        let title = self.require_title(id).await?;
        let table = self.read_fresh(&title).await?;
        Ok((title, table))
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    pub async fn tables(&self) -> Result<Vec<TableMeta>, StoreError> {
        let key = self.meta_key();
        if let Some(value) = self.cache.get_json(&key) {
            if let Ok(metas) = serde_json::from_value::<Vec<TableMeta>>(value) {
                return Ok(metas);
            }
        }
        let metas = self.service.list_tables().await.map_err(lift)?;
        match serde_json::to_value(&metas) {
            Ok(value) => self.cache.set(key, Cached::Json(value), self.ttl),
            Err(e) => warn!(error = %e, "table metadata not cached"),
        }
        Ok(metas)
    }

    pub async fn has_table(&self, title: &str) -> Result<bool, StoreError> {
        Ok(self.tables().await?.iter().any(|m| m.title == title))
    }

    pub async fn table_id(&self, title: &str) -> Result<TableId, StoreError> {
        self.tables()
            .await?
            .into_iter()
            .find(|m| m.title == title)
            .map(|m| m.id)
            .ok_or_else(|| StoreError::not_found(format!("table '{title}'")))
    }

    /// Current title of the table with this id, if it still exists.
    pub async fn resolve_table_by_id(&self, id: TableId) -> Result<Option<String>, StoreError> {
        Ok(self
            .tables()
            .await?
            .into_iter()
            .find(|m| m.id == id)
            .map(|m| m.title))
    }

    async fn require_title(&self, id: TableId) -> Result<String, StoreError> {
        self.resolve_table_by_id(id)
            .await?
            .ok_or_else(|| StoreError::not_found("sub-table"))
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Overwrite the rectangle anchored at (`row`, `col`).
    pub async fn write_range(
        &self,
        title: &str,
        row: usize,
        col: usize,
        rows: Vec<Vec<String>>,
    ) -> Result<(), StoreError> {
        let range = CellRange::new(title, row, col).to_a1();
        let result = self.service.write_range(&range, rows).await;
        self.invalidate(title);
        result.map_err(lift)
    }

    pub async fn write_cell(
        &self,
        title: &str,
        row: usize,
        col: usize,
        value: impl Into<String>,
    ) -> Result<(), StoreError> {
        self.write_range(title, row, col, vec![vec![value.into()]]).await
    }

    pub async fn append(&self, title: &str, rows: Vec<Vec<String>>) -> Result<(), StoreError> {
        let result = self.service.append(title, rows).await;
        self.invalidate(title);
        result.map_err(lift)
    }

    /// Delete physical rows by index. Indices are deduplicated and removed
    /// highest first, contiguous runs in one call, so earlier deletions never
    /// shift a row still waiting to be deleted.
    pub async fn delete_rows(&self, title: &str, indices: &[usize]) -> Result<(), StoreError> {
        if indices.is_empty() {
            self.invalidate(title);
            return Ok(());
        }
        let id = match self.table_id(title).await {
            Ok(id) => id,
            Err(e) => {
                self.invalidate(title);
                return Err(e);
            }
        };
        let mut result = Ok(());
        for (start, end) in descending_runs(indices) {
            if let Err(e) = self.service.delete_rows(id, start, end).await {
                result = Err(lift(e));
                break;
            }
        }
        self.invalidate(title);
        result
    }

    /// Clear the table and write `rows` from `A1`.
    pub async fn replace_all(&self, title: &str, rows: Vec<Vec<String>>) -> Result<(), StoreError> {
        let mut result = self.service.clear(title).await;
        if result.is_ok() && !rows.is_empty() {
            result = self
                .service
                .write_range(&CellRange::origin(title).to_a1(), rows)
                .await;
        }
        self.invalidate(title);
        result.map_err(lift)
    }

    /// Create a table with a header row. Returns its stable id.
    pub async fn create_table(&self, title: &str, header: &[&str]) -> Result<TableId, StoreError> {
        let created = self.service.add_table(title).await;
        self.cache.delete(&self.meta_key());
        let id = created.map_err(lift)?;
        let header = header.iter().map(|h| h.to_string()).collect();
        self.write_range(title, 0, 0, vec![header]).await?;
        Ok(id)
    }

    pub async fn drop_table(&self, id: TableId) -> Result<(), StoreError> {
        let title = self.resolve_table_by_id(id).await?;
        let result = self.service.delete_table(id).await;
        self.cache.delete(&self.meta_key());
        if let Some(title) = title {
            self.invalidate(&title);
        }
        result.map_err(lift)
    }

    pub fn invalidate(&self, title: &str) {
        self.cache.delete(&self.table_key(title));
    }
}

/// Group indices into `[start, end)` runs, highest run first.
fn descending_runs(indices: &[usize]) -> Vec<(usize, usize)> {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.dedup();

    let mut runs: Vec<(usize, usize)> = Vec::new();
    for index in sorted {
        match runs.last_mut() {
            Some((start, _)) if *start == index + 1 => *start = index,
            _ => runs.push((index, index + 1)),
        }
    }
    runs
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
