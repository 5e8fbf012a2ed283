//! Seams to the external collaborators: the backing table service and the
//! blob store.
//!
//! Both are async traits so the adapter can be driven by a remote client in
//! production and by the in-memory implementations here in tests and in the
//! daemon's standalone mode.
//!
//! The in-memory table service mimics the remote one where it matters to
//! callers: stable numeric ids assigned at creation, ragged reads (trailing
//! empty cells and rows trimmed), one-based A1 addressing on writes, and
//! index-shifting structural row deletes. It also supports fault injection
//! and counts reads per table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::Engine as _;
use dashmap::DashMap;
use parking_lot::Mutex;
use rollcall_core::{BackendError, TableId, TableMeta};

use crate::addressing::CellRange;

// ---------------------------------------------------------------------------
// 1. Traits
// ---------------------------------------------------------------------------

/// Bulk operations the data-access layer needs from the backing table service.
#[async_trait]
pub trait TableService: Send + Sync {
    /// Title ↔ id metadata for every table in the workbook.
    async fn list_tables(&self) -> Result<Vec<TableMeta>, BackendError>;

    /// All cells of `title`. Short rows imply trailing empty cells.
    async fn read(&self, title: &str) -> Result<Vec<Vec<String>>, BackendError>;

    /// Overwrite the rectangle anchored at `range` (A1 notation) with `rows`.
    async fn write_range(&self, range: &str, rows: Vec<Vec<String>>) -> Result<(), BackendError>;

    /// Insert `rows` after the current last row of `title`.
    async fn append(&self, title: &str, rows: Vec<Vec<String>>) -> Result<(), BackendError>;

    /// Erase every cell of `title`, keeping the table itself.
    async fn clear(&self, title: &str) -> Result<(), BackendError>;

    /// Remove physical rows `start..end` (zero-based, header is row 0),
    /// shifting later rows up.
    async fn delete_rows(&self, id: TableId, start: usize, end: usize)
        -> Result<(), BackendError>;

    async fn add_table(&self, title: &str) -> Result<TableId, BackendError>;

    async fn delete_table(&self, id: TableId) -> Result<(), BackendError>;
}

/// Large-content store. Objects are addressed by bucket + name and exposed
/// through a public URL.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` and return the object's public URL.
    async fn upload(
        &self,
        bucket: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError>;

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, BackendError>;

    async fn delete(&self, bucket: &str, name: &str) -> Result<(), BackendError>;

    /// Whether `url` points into this store (as opposed to inline content).
    fn owns(&self, url: &str) -> bool;
}

// ---------------------------------------------------------------------------
// 2. In-memory table service
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct MemTable {
    id: TableId,
    title: String,
    rows: Vec<Vec<String>>,
}

#[derive(Debug)]
struct Workbook {
    tables: Vec<MemTable>,
    next_id: i64,
}

impl Workbook {
    fn by_title(&mut self, title: &str) -> Result<&mut MemTable, BackendError> {
        self.tables
            .iter_mut()
            .find(|t| t.title == title)
            .ok_or_else(|| BackendError::NoSuchTable(title.to_string()))
    }

    fn by_id(&mut self, id: TableId) -> Result<&mut MemTable, BackendError> {
        self.tables
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(BackendError::NoSuchTableId(id.0))
    }
}

/// Process-local workbook implementing [`TableService`].
#[derive(Debug)]
pub struct MemoryTableService {
    book: Mutex<Workbook>,
    fail_writes: AtomicUsize,
    fail_reads: AtomicUsize,
    reads: Mutex<HashMap<String, usize>>,
    writes: AtomicUsize,
}

impl Default for MemoryTableService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTableService {
    pub fn new() -> Self {
        Self {
            book: Mutex::new(Workbook {
                tables: Vec::new(),
                next_id: 1_000,
            }),
            fail_writes: AtomicUsize::new(0),
            fail_reads: AtomicUsize::new(0),
            reads: Mutex::new(HashMap::new()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Create (or replace the contents of) `title` with `rows`.
    pub fn seed(&self, title: &str, rows: Vec<Vec<String>>) -> TableId {
        let mut book = self.book.lock();
        if let Ok(table) = book.by_title(title) {
            table.rows = rows;
            return table.id;
        }
        let id = TableId(book.next_id);
        book.next_id += 1;
        book.tables.push(MemTable {
            id,
            title: title.to_string(),
            rows,
        });
        id
    }

    /// Current contents of `title` as the service would return them.
    pub fn snapshot(&self, title: &str) -> Option<Vec<Vec<String>>> {
        let mut book = self.book.lock();
        book.by_title(title).ok().map(|t| trimmed(&t.rows))
    }

    pub fn titles(&self) -> Vec<String> {
        self.book.lock().tables.iter().map(|t| t.title.clone()).collect()
    }

    /// Make the next `n` mutating calls fail with [`BackendError::Unavailable`].
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` reads fail with [`BackendError::Unavailable`].
    pub fn fail_next_reads(&self, n: usize) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    /// How many times `title` has been read from the service.
    pub fn read_count(&self, title: &str) -> usize {
        self.reads.lock().get(title).copied().unwrap_or(0)
    }

    /// Mutating calls accepted so far, across all tables.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn take_fault(counter: &AtomicUsize) -> Result<(), BackendError> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(BackendError::Unavailable("injected fault".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_write(&self) -> Result<(), BackendError> {
        Self::take_fault(&self.fail_writes)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Drop trailing empty cells of each row and trailing empty rows.
fn trimmed(rows: &[Vec<String>]) -> Vec<Vec<String>> {
    let mut out: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            let keep = r.iter().rposition(|c| !c.is_empty()).map_or(0, |i| i + 1);
            r[..keep].to_vec()
        })
        .collect();
    while out.last().is_some_and(|r| r.is_empty()) {
        out.pop();
    }
    out
}

#[async_trait]
impl TableService for MemoryTableService {
    async fn list_tables(&self) -> Result<Vec<TableMeta>, BackendError> {
        Self::take_fault(&self.fail_reads)?;
        Ok(self
            .book
            .lock()
            .tables
            .iter()
            .map(|t| TableMeta {
                id: t.id,
                title: t.title.clone(),
            })
            .collect())
    }

    async fn read(&self, title: &str) -> Result<Vec<Vec<String>>, BackendError> {
        Self::take_fault(&self.fail_reads)?;
        *self.reads.lock().entry(title.to_string()).or_default() += 1;
        let mut book = self.book.lock();
        Ok(trimmed(&book.by_title(title)?.rows))
    }

    async fn write_range(&self, range: &str, rows: Vec<Vec<String>>) -> Result<(), BackendError> {
        self.check_write()?;
        let anchor = CellRange::parse(range)
            .ok_or_else(|| BackendError::Rejected(format!("malformed range {range}")))?;
        let mut book = self.book.lock();
        let table = book.by_title(&anchor.title)?;
        for (dr, values) in rows.into_iter().enumerate() {
            let r = anchor.row + dr;
            if table.rows.len() <= r {
                table.rows.resize_with(r + 1, Vec::new);
            }
            let row = &mut table.rows[r];
            for (dc, value) in values.into_iter().enumerate() {
                let c = anchor.col + dc;
                if row.len() <= c {
                    row.resize(c + 1, String::new());
                }
                row[c] = value;
            }
        }
        Ok(())
    }

    async fn append(&self, title: &str, rows: Vec<Vec<String>>) -> Result<(), BackendError> {
        self.check_write()?;
        let mut book = self.book.lock();
        let table = book.by_title(title)?;
        let mut current = trimmed(&table.rows);
        current.extend(rows);
        table.rows = current;
        Ok(())
    }

    async fn clear(&self, title: &str) -> Result<(), BackendError> {
        self.check_write()?;
        let mut book = self.book.lock();
        book.by_title(title)?.rows.clear();
        Ok(())
    }

    async fn delete_rows(
        &self,
        id: TableId,
        start: usize,
        end: usize,
    ) -> Result<(), BackendError> {
        self.check_write()?;
        let mut book = self.book.lock();
        let table = book.by_id(id)?;
        if start >= end || end > table.rows.len() {
            return Err(BackendError::Rejected("row range out of bounds".to_string()));
        }
        table.rows.drain(start..end);
        Ok(())
    }

    async fn add_table(&self, title: &str) -> Result<TableId, BackendError> {
        self.check_write()?;
        let mut book = self.book.lock();
        if book.tables.iter().any(|t| t.title == title) {
            return Err(BackendError::DuplicateTable(title.to_string()));
        }
        let id = TableId(book.next_id);
        book.next_id += 1;
        book.tables.push(MemTable {
            id,
            title: title.to_string(),
            rows: Vec::new(),
        });
        Ok(id)
    }

    async fn delete_table(&self, id: TableId) -> Result<(), BackendError> {
        self.check_write()?;
        let mut book = self.book.lock();
        let before = book.tables.len();
        book.tables.retain(|t| t.id != id);
        if book.tables.len() == before {
            return Err(BackendError::NoSuchTableId(id.0));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 3. In-memory blob store
// ---------------------------------------------------------------------------

/// Process-local [`BlobStore`]. URLs take the form `<base>/<bucket>/<name>`.
#[derive(Debug)]
pub struct MemoryBlobStore {
    base_url: String,
    objects: DashMap<String, (Vec<u8>, String)>,
    fail_uploads: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            objects: DashMap::new(),
            fail_uploads: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_uploads(&self, n: usize) {
        self.fail_uploads.store(n, Ordering::SeqCst);
    }

    pub fn contains(&self, bucket: &str, name: &str) -> bool {
        self.objects.contains_key(&format!("{bucket}/{name}"))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        let path = url.split('?').next()?;
        let rest = path.strip_prefix(&self.base_url)?.strip_prefix('/')?;
        Some(rest.to_string())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        bucket: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError> {
        MemoryTableService::take_fault(&self.fail_uploads)?;
        self.objects
            .insert(format!("{bucket}/{name}"), (bytes, content_type.to_string()));
        Ok(format!("{}/{bucket}/{name}", self.base_url))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, BackendError> {
        let key = self
            .key_for_url(url)
            .ok_or_else(|| BackendError::NoSuchBlob(url.to_string()))?;
        self.objects
            .get(&key)
            .map(|o| o.0.clone())
            .ok_or(BackendError::NoSuchBlob(key))
    }

    async fn delete(&self, bucket: &str, name: &str) -> Result<(), BackendError> {
        let key = format!("{bucket}/{name}");
        self.objects
            .remove(&key)
            .map(|_| ())
            .ok_or(BackendError::NoSuchBlob(key))
    }

    fn owns(&self, url: &str) -> bool {
        url.starts_with(&self.base_url)
    }
}

// ---------------------------------------------------------------------------
// 4. Blob helpers
// ---------------------------------------------------------------------------

/// Object name from a blob URL: last path segment, query string dropped.
pub fn object_name(url: &str) -> Option<&str> {
    let path = url.split('?').next()?;
    let name = path.rsplit('/').next()?;
    (!name.is_empty()).then_some(name)
}

/// A decoded `data:<mime>;base64,<payload>` upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUrl {
    /// `None` when the prefix is missing or the payload is not valid base64.
    pub fn parse(raw: &str) -> Option<DataUrl> {
        let rest = raw.strip_prefix("data:")?;
        let (mime, payload) = rest.split_once(";base64,")?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .ok()?;
        Some(DataUrl {
            mime: mime.to_string(),
            bytes,
        })
    }

    /// File extension for the MIME type, `.bin` when unknown.
    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            "image/jpeg" => ".jpg",
            "image/png" => ".png",
            "image/gif" => ".gif",
            "image/heic" => ".heic",
            "image/heif" => ".heif",
            "image/webp" => ".webp",
            "application/pdf" => ".pdf",
            _ => ".bin",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
