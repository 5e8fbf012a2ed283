//! Full-snapshot roster reconciliation.
//!
//! A client submits the roster it wants (desired snapshot) plus the entries
//! it explicitly removed. Against the authoritative table this becomes:
//!
//! - removal key present in the table → row deleted (removal beats desire)
//! - desired key present in the table → identity/name/position cells rewritten
//! - desired key absent from the table → row appended
//! - any other row → untouched, byte for byte
//!
//! Nothing is ever deleted by omission. [`apply_snapshot`] is the pure part;
//! [`reconcile_roster`] runs it inside the `roster` section against a fresh
//! read and writes the result back in one bulk replace.

use std::collections::{HashMap, HashSet};

use rollcall_core::{normalize_key, ReconcileReport, RosterChanges, StoreError, Table};
use serde_json::json;
use tracing::info;

use crate::context::Context;
use crate::hub::EventKind;
use crate::roster::{ROSTER_LOCK, ROSTER_TABLE};

/// Positions of the roster's key columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterColumns {
    pub email: usize,
    pub name: usize,
    pub position: usize,
}

impl RosterColumns {
    /// Resolve from the header, falling back to the historical layout
    /// (email, name, position in the fifth to seventh columns).
    pub fn resolve(table: &Table) -> Self {
        Self {
            email: table.column("Email").unwrap_or(4),
            name: table.column("Name").unwrap_or(5),
            position: table.column("Position").unwrap_or(6),
        }
    }

    fn max(&self) -> usize {
        self.email.max(self.name).max(self.position)
    }
}

/// Result of applying changes to an in-memory snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotOutcome {
    pub report: ReconcileReport,
    /// Normalized keys of rows that were deleted.
    pub removed_keys: Vec<String>,
}

#[derive(Debug, Clone)]
struct DesiredRow {
    email: String,
    name: String,
    position: String,
}

/// Apply `changes` to `rows` (header at index 0) in place.
pub fn apply_snapshot(
    rows: &mut Vec<Vec<String>>,
    cols: RosterColumns,
    changes: &RosterChanges,
) -> SnapshotOutcome {
    let remove_set: HashSet<String> = changes
        .removals
        .iter()
        .map(|e| normalize_key(&e.email))
        .filter(|k| !k.is_empty())
        .collect();

    // Keyed by normalized email; first occurrence fixes the order, last wins.
    let mut order: Vec<String> = Vec::new();
    let mut desired: HashMap<String, DesiredRow> = HashMap::new();
    for entry in &changes.desired {
        let key = normalize_key(&entry.email);
        if key.is_empty() {
            continue;
        }
        let row = DesiredRow {
            email: entry.email.trim().to_string(),
            name: non_blank(&entry.name, "Unknown"),
            position: non_blank(&entry.position, "None"),
        };
        if desired.insert(key.clone(), row).is_none() {
            order.push(key);
        }
    }

    let mut outcome = SnapshotOutcome::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut doomed: Vec<usize> = Vec::new();

    for (i, row) in rows.iter_mut().enumerate().skip(1) {
        let key = normalize_key(row.get(cols.email).map(String::as_str).unwrap_or(""));
        if key.is_empty() {
            continue;
        }
        seen.insert(key.clone());

        if remove_set.contains(&key) {
            doomed.push(i);
            outcome.removed_keys.push(key);
            continue;
        }
        if let Some(want) = desired.get(&key) {
            if set_cells(row, cols, want) {
                outcome.report.update_count += 1;
            }
        }
    }

    outcome.report.remove_count = doomed.len();
    remove_descending(rows, &doomed);

    let width = rows
        .first()
        .map(Vec::len)
        .unwrap_or(0)
        .max(cols.max() + 1);
    for key in order {
        if seen.contains(&key) || remove_set.contains(&key) {
            continue;
        }
        if let Some(want) = desired.get(&key) {
            let mut row = vec![String::new(); width];
            set_cells(&mut row, cols, want);
            rows.push(row);
            outcome.report.add_count += 1;
        }
    }
    outcome
}

/// Remove `indices` from `rows`, highest index first, so each removal leaves
/// the positions of the remaining targets intact.
pub fn remove_descending<T>(rows: &mut Vec<T>, indices: &[usize]) {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.dedup();
    for index in sorted {
        if index < rows.len() {
            rows.remove(index);
        }
    }
}

fn non_blank(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Write the three key cells; `true` when any of them changed.
fn set_cells(row: &mut Vec<String>, cols: RosterColumns, want: &DesiredRow) -> bool {
    if row.len() <= cols.max() {
        row.resize(cols.max() + 1, String::new());
    }
    let mut changed = false;
    for (col, value) in [
        (cols.email, &want.email),
        (cols.name, &want.name),
        (cols.position, &want.position),
    ] {
        if row[col] != *value {
            row[col] = value.clone();
            changed = true;
        }
    }
    changed
}

/// Reconcile the roster table against `changes`.
///
/// On a backing-service failure the error is returned as is, the table's
/// cache entry stays invalidated, and nothing is published. The service may
/// hold a partial write at that point.
pub async fn reconcile_roster(
    ctx: &Context,
    changes: RosterChanges,
) -> Result<ReconcileReport, StoreError> {
    let inner = ctx.clone();
    let outcome = ctx
        .locks
        .with_lock(ROSTER_LOCK, move || async move {
            let table = inner.main.read_fresh(ROSTER_TABLE).await?;
            if table.is_empty() {
                return Err(StoreError::Conflict(
                    "the roster table has no header row".to_string(),
                ));
            }
            let cols = RosterColumns::resolve(&table);
            let mut rows = table.rows().to_vec();
            let outcome = apply_snapshot(&mut rows, cols, &changes);

            if outcome.report.total() > 0 {
                inner.main.replace_all(ROSTER_TABLE, rows).await?;
            } else {
                inner.main.invalidate(ROSTER_TABLE);
            }
            for key in &outcome.removed_keys {
                inner.cache.delete(&crate::roster::identity_key(key));
            }
            Ok(outcome)
        })
        .await?;

    let report = outcome.report;
    info!(
        table = ROSTER_TABLE,
        updated = report.update_count,
        removed = report.remove_count,
        added = report.add_count,
        "roster reconciled"
    );
    if report.total() > 0 {
        ctx.notify(
            EventKind::RosterUpdate,
            json!({
                "table": ROSTER_TABLE,
                "updateCount": report.update_count,
                "removeCount": report.remove_count,
                "addCount": report.add_count,
            }),
        );
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
