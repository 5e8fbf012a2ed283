//! Domain types for rollcall.
//!
//! A [`Table`] is the raw 2D cell grid the backing service returns: row 0 is
//! the header, later rows may be ragged. Callers address cells by column
//! name through [`Table::column`] and [`Record`]; positional indices stay an
//! implementation detail of the table adapter.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable numeric id the backing service assigns to a table at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub i64);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for TableId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identifier of a ranked-choice poll (a UUID string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PollId(pub String);

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for PollId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for PollId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Title ↔ id pair from the backing service's metadata listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub id: TableId,
    pub title: String,
}

/// Case-insensitive, trimmed form of a natural key.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Split a comma-separated position string ("Alpha, Pledge") into its parts.
pub fn split_positions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .collect()
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// A table snapshot: header row followed by data rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    /// Header cells, or an empty slice for an empty table.
    pub fn header(&self) -> &[String] {
        self.rows.first().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of physical rows, header included.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Widest row in the table (header included).
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Zero-based position of the column whose header matches `name`
    /// (trimmed, case-insensitive).
    pub fn column(&self, name: &str) -> Option<usize> {
        let needle = normalize_key(name);
        self.header().iter().position(|h| normalize_key(h) == needle)
    }

    /// Cell at (`row`, `col`); short rows read as trailing empty cells.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn row(&self, row: usize) -> Option<&[String]> {
        self.rows.get(row).map(Vec::as_slice)
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.rows
    }

    /// Data rows (header skipped) as name-addressable records.
    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        (1..self.rows.len()).map(move |index| Record { table: self, index })
    }

    /// First data row whose cell in `col` matches `needle` (trimmed,
    /// case-insensitive). Returns the physical row index.
    pub fn find_row(&self, col: usize, needle: &str) -> Option<usize> {
        let needle = normalize_key(needle);
        if needle.is_empty() {
            return None;
        }
        (1..self.rows.len()).find(|&i| normalize_key(self.cell(i, col)) == needle)
    }

    /// Like [`Table::find_row`] but with exact string comparison.
    pub fn find_row_exact(&self, col: usize, needle: &str) -> Option<usize> {
        (1..self.rows.len()).find(|&i| self.cell(i, col) == needle)
    }
}

/// A data row viewed through the table header.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    table: &'a Table,
    index: usize,
}

impl<'a> Record<'a> {
    /// Cell under the header `name`; empty when the column or cell is absent.
    pub fn get(&self, name: &str) -> &'a str {
        match self.table.column(name) {
            Some(col) => self.table.cell(self.index, col),
            None => "",
        }
    }

    /// Cell at a known column position.
    pub fn at(&self, col: usize) -> &'a str {
        self.table.cell(self.index, col)
    }

    /// Physical row index inside the snapshot this record came from.
    pub fn index(&self) -> usize {
        self.index
    }
}

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

/// One member of the roster, keyed by email.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RosterEntry {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub position: String,
}

impl RosterEntry {
    pub fn new(email: &str, name: &str, position: &str) -> Self {
        Self {
            email: email.to_owned(),
            name: name.to_owned(),
            position: position.to_owned(),
        }
    }
}

/// An authenticated member acting on the store, as resolved from the roster.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Caller {
    pub email: String,
    pub name: String,
    pub positions: Vec<String>,
}

impl Caller {
    pub fn from_entry(entry: &RosterEntry) -> Self {
        Self {
            email: entry.email.clone(),
            name: entry.name.clone(),
            positions: split_positions(&entry.position),
        }
    }

    pub fn holds(&self, position: &str) -> bool {
        self.positions.iter().any(|p| p == position)
    }

    pub fn holds_any(&self, positions: &[&str]) -> bool {
        positions.iter().any(|p| self.holds(p))
    }

    pub fn is_pledge(&self) -> bool {
        self.positions
            .iter()
            .any(|p| p.to_lowercase().contains("pledge"))
    }
}

/// Client-submitted roster state: full desired snapshot plus explicit removals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterChanges {
    #[serde(default, alias = "updatedRoster")]
    pub desired: Vec<RosterEntry>,
    #[serde(default, alias = "removedBrothers")]
    pub removals: Vec<RosterEntry>,
}

/// Outcome counts of a reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub update_count: usize,
    pub remove_count: usize,
    pub add_count: usize,
}

impl ReconcileReport {
    pub fn total(&self) -> usize {
        self.update_count + self.remove_count + self.add_count
    }

    /// Human-readable summary, e.g. "1 updated, 2 added" or "No changes".
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.update_count > 0 {
            parts.push(format!("{} updated", self.update_count));
        }
        if self.remove_count > 0 {
            parts.push(format!("{} removed", self.remove_count));
        }
        if self.add_count > 0 {
            parts.push(format!("{} added", self.add_count));
        }
        if parts.is_empty() {
            "No changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

// ---------------------------------------------------------------------------
// Polls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Active,
    Closed,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Active => "active",
            PollStatus::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "active" => Some(PollStatus::Active),
            "closed" => Some(PollStatus::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ranked-choice poll. `votes` maps voter display name to their ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub options: Vec<String>,
    pub votes: std::collections::BTreeMap<String, Vec<String>>,
    pub creator: String,
    pub created_at: String,
    pub status: PollStatus,
    pub threshold: f64,
    pub is_anonymous: bool,
}

// ---------------------------------------------------------------------------
// Rush
// ---------------------------------------------------------------------------

/// A recruiting event and the two sub-tables that hold its data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RushEvent {
    pub id: String,
    pub name: String,
    pub date: String,
    pub description: String,
    pub timestamp_ms: Option<i64>,
    pub recruits_tab_id: Option<TableId>,
    pub comments_tab_id: Option<TableId>,
    pub is_locked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recruit {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub instagram: String,
    pub tier: String,
    pub photo_url: String,
    pub primary_contacts: Vec<String>,
    pub likes: Vec<String>,
    pub dislikes: Vec<String>,
    pub met: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub comment_id: String,
    pub recruit_id: String,
    pub author: String,
    pub text: String,
    pub timestamp_ms: Option<i64>,
}

/// Which JSON-array column of a recruit a toggle targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    Like,
    Dislike,
    Met,
}

impl VoteKind {
    pub fn column(&self) -> &'static str {
        match self {
            VoteKind::Like => "Likes",
            VoteKind::Dislike => "Dislikes",
            VoteKind::Met => "Met",
        }
    }

    /// Likes and dislikes exclude each other; `Met` stands alone.
    pub fn opposite(&self) -> Option<VoteKind> {
        match self {
            VoteKind::Like => Some(VoteKind::Dislike),
            VoteKind::Dislike => Some(VoteKind::Like),
            VoteKind::Met => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RushStats {
    pub total_recruits: usize,
    pub bids: usize,
    pub flushes: usize,
    pub yield_rate: f64,
}

/// Administrator switches for the rush pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RushSettings {
    pub global_disable_add_recruits: bool,
    pub global_disable_commenting: bool,
}

// ---------------------------------------------------------------------------
// Buttons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AccessType {
    #[default]
    All,
    #[serde(rename = "Specific Bros")]
    SpecificMembers,
    #[serde(rename = "Specific Officers")]
    SpecificOfficers,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::All => "All",
            AccessType::SpecificMembers => "Specific Bros",
            AccessType::SpecificOfficers => "Specific Officers",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "All" => Some(AccessType::All),
            "Specific Bros" => Some(AccessType::SpecificMembers),
            "Specific Officers" => Some(AccessType::SpecificOfficers),
            _ => None,
        }
    }
}

/// A custom UI button as stored in the Buttons table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Button {
    pub button_id: String,
    pub button_name: String,
    pub description: String,
    pub icon: String,
    pub color: String,
    pub access_type: AccessType,
    pub access_list: Vec<String>,
    /// Inline content, or a blob-store URL when the content was offloaded.
    pub content: String,
    pub created_by: String,
    pub owner_position: String,
    pub exclude_pledges: bool,
    pub last_modified: String,
}

/// Caller-supplied fields for creating or updating a button.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonDraft {
    #[serde(default)]
    pub button_id: Option<String>,
    pub button_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub access_type: AccessType,
    #[serde(default)]
    pub access_list: Vec<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub owner_position: String,
    #[serde(default)]
    pub exclude_pledges: Option<bool>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
