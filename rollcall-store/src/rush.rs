//! Rush events (rush workbook, table `Rush Index`).
//!
//! Each event owns two sub-tables, `Recruits - <name>` and
//! `Comments - <name>`, created together with its index row. After creation
//! they are addressed only by the numeric ids stored in the index, so renaming
//! an event never breaks the link. Recruit and comment operations live in
//! [`crate::recruits`].

use chrono::Utc;
use rollcall_core::{Caller, RushEvent, RushSettings, RushStats, StoreError, Table, TableId};
use tracing::{info, warn};

use crate::backend::object_name;
use crate::cache::Cached;
use crate::cells::{format_bool, parse_bool, parse_epoch_ms};
use crate::context::Context;
use crate::recruits::{list_recruits, COMMENT_HEADER, RECRUIT_HEADER};

pub const RUSH_INDEX: &str = "Rush Index";
pub const INDEX_LOCK: &str = "rush:index";
pub const SETTINGS_KEY: &str = "rush:settings";

/// Only the rush chair may lock or unlock an event.
pub const RUSH_CHAIR: &str = "Rho";

pub const INDEX_HEADER: [&str; 8] = [
    "ID",
    "Name",
    "Date",
    "Description",
    "TimestampMs",
    "RecruitsTabId",
    "CommentsTabId",
    "Locked",
];

const COL_ID: usize = 0;
const COL_NAME: usize = 1;
const COL_DESCRIPTION: usize = 3;
const COL_LOCKED: usize = 7;

/// Fields a caller supplies when creating or renaming an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

fn tab_id(raw: &str) -> Option<TableId> {
    raw.trim().parse::<i64>().ok().map(TableId)
}

fn parse_event(table: &Table, index: usize) -> RushEvent {
    let cell = |c: usize| table.cell(index, c);
    RushEvent {
        id: cell(COL_ID).trim().to_string(),
        name: cell(COL_NAME).to_string(),
        date: cell(2).to_string(),
        description: cell(COL_DESCRIPTION).to_string(),
        timestamp_ms: parse_epoch_ms(cell(4)),
        recruits_tab_id: tab_id(cell(5)),
        comments_tab_id: tab_id(cell(6)),
        is_locked: parse_bool(cell(COL_LOCKED)).unwrap_or(false),
    }
}

pub async fn ensure_index(ctx: &Context) -> Result<(), StoreError> {
    if !ctx.rush.has_table(RUSH_INDEX).await? {
        ctx.rush.create_table(RUSH_INDEX, &INDEX_HEADER).await?;
        info!(table = RUSH_INDEX, "rush index created");
    }
    Ok(())
}

/// Events in index order.
pub async fn list_events(ctx: &Context) -> Result<Vec<RushEvent>, StoreError> {
    if !ctx.rush.has_table(RUSH_INDEX).await? {
        return Ok(Vec::new());
    }
    let table = ctx.rush.read(RUSH_INDEX).await?;
    Ok((1..table.len())
        .filter(|&i| !table.cell(i, COL_ID).trim().is_empty())
        .map(|i| parse_event(&table, i))
        .collect())
}

pub async fn get_event(ctx: &Context, id: &str) -> Result<RushEvent, StoreError> {
    let id = id.trim();
    list_events(ctx)
        .await?
        .into_iter()
        .find(|e| e.id == id)
        .ok_or_else(|| StoreError::not_found("rush event"))
}

/// Create an event with its sub-tables, or rename / re-describe an existing
/// one. Only name and description of an existing event ever change.
pub async fn save_event(ctx: &Context, draft: EventDraft) -> Result<RushEvent, StoreError> {
    let name = draft.name.trim().to_string();
    if name.is_empty() {
        return Err(StoreError::Validation("an event needs a name".to_string()));
    }
    let inner = ctx.clone();
    let event = ctx
        .locks
        .with_lock(INDEX_LOCK, move || async move {
            ensure_index(&inner).await?;
            let table = inner.rush.read_fresh(RUSH_INDEX).await?;
            let existing = draft
                .id
                .as_deref()
                .and_then(|id| table.find_row_exact(COL_ID, id.trim()));

            match existing {
                Some(index) => {
                    inner.rush.write_cell(RUSH_INDEX, index, COL_NAME, name).await?;
                    inner
                        .rush
                        .write_cell(RUSH_INDEX, index, COL_DESCRIPTION, draft.description)
                        .await?;
                    let table = inner.rush.read_fresh(RUSH_INDEX).await?;
                    Ok(parse_event(&table, index))
                }
                None => {
                    let id = draft
                        .id
                        .map(|id| id.trim().to_string())
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                    create_event(&inner, id, name, draft.description).await
                }
            }
        })
        .await?;
    ctx.notify_changed(RUSH_INDEX);
    Ok(event)
}

async fn create_event(
    ctx: &Context,
    id: String,
    name: String,
    description: String,
) -> Result<RushEvent, StoreError> {
    let recruits_title = format!("Recruits - {name}");
    let comments_title = format!("Comments - {name}");
    for title in [&recruits_title, &comments_title] {
        if ctx.rush.has_table(title).await? {
            return Err(StoreError::Conflict(format!(
                "an event named '{name}' already has a '{title}' table"
            )));
        }
    }

    let recruits_tab = ctx.rush.create_table(&recruits_title, &RECRUIT_HEADER).await?;
    let comments_tab = match ctx.rush.create_table(&comments_title, &COMMENT_HEADER).await {
        Ok(tab) => tab,
        Err(e) => {
            if let Err(cleanup) = ctx.rush.drop_table(recruits_tab).await {
                warn!(table = %recruits_title, error = %cleanup, "orphaned recruits table");
            }
            return Err(e);
        }
    };

    let now = Utc::now();
    let event = RushEvent {
        id,
        name,
        date: now.format("%m/%d/%Y").to_string(),
        description,
        timestamp_ms: Some(now.timestamp_millis()),
        recruits_tab_id: Some(recruits_tab),
        comments_tab_id: Some(comments_tab),
        is_locked: false,
    };
    let row = vec![
        event.id.clone(),
        event.name.clone(),
        event.date.clone(),
        event.description.clone(),
        now.timestamp_millis().to_string(),
        recruits_tab.to_string(),
        comments_tab.to_string(),
        format_bool(false),
    ];
    ctx.rush.append(RUSH_INDEX, vec![row]).await?;
    info!(event = %event.id, recruits = %recruits_tab, comments = %comments_tab, "rush event created");
    Ok(event)
}

/// Flip the event's lock. Returns the new state.
pub async fn toggle_lock(ctx: &Context, caller: &Caller, id: &str) -> Result<bool, StoreError> {
    if !caller.holds(RUSH_CHAIR) {
        return Err(StoreError::Forbidden(
            "only the Rho can lock or unlock rush events".to_string(),
        ));
    }
    let inner = ctx.clone();
    let id = id.trim().to_string();
    let locked = ctx
        .locks
        .with_lock(INDEX_LOCK, move || async move {
            if !inner.rush.has_table(RUSH_INDEX).await? {
                return Err(StoreError::not_found("rush event"));
            }
            let table = inner.rush.read_fresh(RUSH_INDEX).await?;
            let index = table
                .find_row_exact(COL_ID, &id)
                .ok_or_else(|| StoreError::not_found("rush event"))?;
            let locked = !parse_bool(table.cell(index, COL_LOCKED)).unwrap_or(false);
            inner
                .rush
                .write_cell(RUSH_INDEX, index, COL_LOCKED, format_bool(locked))
                .await?;
            Ok(locked)
        })
        .await?;
    ctx.notify_changed(RUSH_INDEX);
    Ok(locked)
}

/// Delete an event, its sub-tables and its recruits' photos.
///
/// Photo deletion is best effort and happens before the index section is
/// entered. A sub-table that is already gone is not an error.
pub async fn delete_event(ctx: &Context, id: &str) -> Result<(), StoreError> {
    let event = get_event(ctx, id).await?;

    if let Some(tab) = event.recruits_tab_id {
        match list_recruits(ctx, tab).await {
            Ok(recruits) => {
                for recruit in recruits.iter().filter(|r| !r.photo_url.is_empty()) {
                    delete_photo(ctx, &recruit.photo_url).await;
                }
            }
            Err(e) => warn!(event = %event.id, error = %e, "photos not cleaned up"),
        }
    }

    let inner = ctx.clone();
    ctx.locks
        .with_lock(INDEX_LOCK, move || async move {
            for tab in [event.recruits_tab_id, event.comments_tab_id].into_iter().flatten() {
                match inner.rush.drop_table(tab).await {
                    Ok(()) | Err(StoreError::NotFound { .. }) => {}
                    Err(e) => warn!(event = %event.id, error = %e, "sub-table not dropped"),
                }
                inner.ids.reset(&crate::recruits::id_resource(tab));
            }
            let table = inner.rush.read_fresh(RUSH_INDEX).await?;
            if let Some(index) = table.find_row_exact(COL_ID, &event.id) {
                inner.rush.delete_rows(RUSH_INDEX, &[index]).await?;
            }
            Ok(())
        })
        .await?;
    info!(event = %id.trim(), "rush event deleted");
    ctx.notify_changed(RUSH_INDEX);
    Ok(())
}

/// Remove a rush photo from the blob store, logging instead of failing.
pub(crate) async fn delete_photo(ctx: &Context, url: &str) {
    if !ctx.blobs.owns(url) {
        return;
    }
    let Some(name) = object_name(url) else {
        return;
    };
    if let Err(e) = ctx
        .blobs
        .delete(&ctx.config.blob.rush_images_bucket, name)
        .await
    {
        warn!(object = %name, error = %e, "photo not deleted");
    }
}

/// Recruit counts for an event. Bids are tier `4`, flushes tier `flushed`;
/// the yield is bids over total as a percentage with one decimal.
pub async fn event_statistics(ctx: &Context, id: &str) -> Result<RushStats, StoreError> {
    let event = get_event(ctx, id).await?;
    let Some(tab) = event.recruits_tab_id else {
        return Ok(RushStats::default());
    };
    let recruits = match list_recruits(ctx, tab).await {
        Ok(r) => r,
        Err(StoreError::NotFound { .. }) => return Ok(RushStats::default()),
        Err(e) => return Err(e),
    };
    let total = recruits.len();
    let bids = recruits.iter().filter(|r| r.tier.trim() == "4").count();
    let flushes = recruits
        .iter()
        .filter(|r| r.tier.trim().eq_ignore_ascii_case("flushed"))
        .count();
    let yield_rate = if total == 0 {
        0.0
    } else {
        ((bids as f64 / total as f64) * 1000.0).round() / 10.0
    };
    Ok(RushStats {
        total_recruits: total,
        bids,
        flushes,
        yield_rate,
    })
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Current administrator switches. Held in the cache without expiry, so
/// they reset with the process or a full flush.
pub fn settings(ctx: &Context) -> RushSettings {
    ctx.cache
        .get_json(SETTINGS_KEY)
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

pub fn set_settings(ctx: &Context, settings: &RushSettings) -> Result<(), StoreError> {
    let value =
        serde_json::to_value(settings).map_err(|e| StoreError::Validation(e.to_string()))?;
    ctx.cache
        .set(SETTINGS_KEY, Cached::Json(value), std::time::Duration::ZERO);
    info!(
        disable_add = settings.global_disable_add_recruits,
        disable_comments = settings.global_disable_commenting,
        "rush settings changed"
    );
    ctx.notify_changed(RUSH_INDEX);
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
