//! Custom UI buttons (main workbook, table `Buttons`).
//!
//! Two row layouts coexist. Current rows have twelve columns:
//!
//! | 0  | 1    | 2           | 3    | 4     | 5      | 6    | 7       | 8         | 9        | 10             | 11           |
//! |----|------|-------------|------|-------|--------|------|---------|-----------|----------|----------------|--------------|
//! | ID | Name | Description | Icon | Color | Access | List | Content | CreatedBy | OwnerPos | ExcludePledges | LastModified |
//!
//! Legacy rows have eight (id, name, access, list, content, created by,
//! owner position, last modified) and are recognized by an access type in
//! the third column instead of the sixth. Updates always write the current
//! layout.
//!
//! Markup longer than `blob.inline_content_limit` is stored in the blob
//! store as `button_<id>.html` and the row holds its URL. An update uploads
//! under a fresh `button_<id>_<rev>.html` so the stored object only changes
//! once the row points at it.

use chrono::Utc;
use rollcall_core::{AccessType, Button, ButtonDraft, Caller, StoreError, Table};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::object_name;
use crate::cache::Cached;
use crate::cells::{format_bool, format_list, parse_bool, parse_list};
use crate::context::Context;

pub const BUTTON_TABLE: &str = "Buttons";
pub const BUTTON_LOCK: &str = "buttons";
pub const BUTTONS_KEY: &str = "buttons";
pub const DEFAULT_COLOR: &str = "#ffd700";

pub const BUTTON_HEADER: [&str; 12] = [
    "ButtonID",
    "ButtonName",
    "Description",
    "Icon",
    "Color",
    "AccessType",
    "AccessList",
    "Content",
    "CreatedBy",
    "OwnerPosition",
    "ExcludePledges",
    "LastModified",
];

/// A button as shown to a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub color: String,
    pub content: String,
    pub is_html: bool,
}

/// One personalized button per item, named from a `{{name}}` template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkButtons {
    pub button_name_template: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub access_type: AccessType,
    #[serde(default)]
    pub owner_position: String,
    pub items: Vec<BulkItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BulkItem {
    pub name: String,
    #[serde(default)]
    pub content: String,
}

// ---------------------------------------------------------------------------
// Row layout
// ---------------------------------------------------------------------------

fn names_access(cell: &str) -> bool {
    let cell = cell.trim();
    cell == "All" || cell.contains("Specific")
}

fn is_legacy(table: &Table, index: usize) -> bool {
    !names_access(table.cell(index, 5)) && names_access(table.cell(index, 2))
}

fn content_col(table: &Table, index: usize) -> usize {
    if is_legacy(table, index) {
        4
    } else {
        7
    }
}

fn non_blank(raw: &str, fallback: &str) -> String {
    match raw.trim() {
        "" => fallback.to_string(),
        v => v.to_string(),
    }
}

fn parse_row(table: &Table, index: usize) -> Button {
    let cell = |c: usize| table.cell(index, c);
    if is_legacy(table, index) {
        Button {
            button_id: cell(0).trim().to_string(),
            button_name: cell(1).to_string(),
            description: String::new(),
            icon: String::new(),
            color: DEFAULT_COLOR.to_string(),
            access_type: AccessType::parse(cell(2)).unwrap_or_default(),
            access_list: parse_list(cell(3)),
            content: cell(4).to_string(),
            created_by: cell(5).to_string(),
            owner_position: cell(6).to_string(),
            exclude_pledges: false,
            last_modified: cell(7).to_string(),
        }
    } else {
        Button {
            button_id: cell(0).trim().to_string(),
            button_name: cell(1).to_string(),
            description: cell(2).to_string(),
            icon: cell(3).to_string(),
            color: non_blank(cell(4), DEFAULT_COLOR),
            access_type: AccessType::parse(cell(5)).unwrap_or_default(),
            access_list: parse_list(cell(6)),
            content: cell(7).to_string(),
            created_by: cell(8).to_string(),
            owner_position: cell(9).to_string(),
            exclude_pledges: parse_bool(cell(10)).unwrap_or(false),
            last_modified: cell(11).to_string(),
        }
    }
}

fn to_row(button: &Button) -> Vec<String> {
    vec![
        button.button_id.clone(),
        button.button_name.clone(),
        button.description.clone(),
        button.icon.clone(),
        button.color.clone(),
        button.access_type.as_str().to_string(),
        format_list(&button.access_list),
        button.content.clone(),
        button.created_by.clone(),
        button.owner_position.clone(),
        format_bool(button.exclude_pledges),
        button.last_modified.clone(),
    ]
}

fn short_uuid() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    uuid[..8].to_string()
}

fn new_button_id() -> String {
    format!("btn_{}", short_uuid())
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Every button, cached under `buttons` for the buttons TTL.
pub async fn list_buttons(ctx: &Context) -> Result<Vec<Button>, StoreError> {
    if let Some(value) = ctx.cache.get_json(BUTTONS_KEY) {
        if let Ok(buttons) = serde_json::from_value(value) {
            return Ok(buttons);
        }
    }
    if !ctx.main.has_table(BUTTON_TABLE).await? {
        return Ok(Vec::new());
    }
    let table = ctx.main.read(BUTTON_TABLE).await?;
    let buttons: Vec<Button> = (1..table.len())
        .filter(|&i| !table.cell(i, 0).trim().is_empty())
        .map(|i| parse_row(&table, i))
        .collect();
    match serde_json::to_value(&buttons) {
        Ok(value) => ctx.cache.set(BUTTONS_KEY, Cached::Json(value), ctx.config.buttons_ttl()),
        Err(e) => warn!(error = %e, "buttons not cached"),
    }
    Ok(buttons)
}

fn manages(ctx: &Context, caller: &Caller, button: &Button) -> bool {
    ctx.config.dev_mode
        || button.created_by.trim().eq_ignore_ascii_case(caller.email.trim())
        || (!button.owner_position.is_empty() && caller.holds(&button.owner_position))
}

/// Buttons the caller created or whose owner position they hold.
pub async fn buttons_for_manager(ctx: &Context, caller: &Caller) -> Result<Vec<Button>, StoreError> {
    Ok(list_buttons(ctx)
        .await?
        .into_iter()
        .filter(|b| manages(ctx, caller, b))
        .collect())
}

fn can_see(ctx: &Context, caller: &Caller, button: &Button) -> bool {
    if ctx.config.dev_mode {
        return true;
    }
    if button.exclude_pledges && caller.is_pledge() {
        return false;
    }
    match button.access_type {
        AccessType::All => true,
        AccessType::SpecificMembers => button
            .access_list
            .iter()
            .any(|name| name.trim().eq_ignore_ascii_case(caller.name.trim())),
        AccessType::SpecificOfficers => button.access_list.iter().any(|p| caller.holds(p)),
    }
}

/// Buttons the caller may see, with offloaded content fetched back.
pub async fn visible_buttons(ctx: &Context, caller: &Caller) -> Result<Vec<ButtonView>, StoreError> {
    let mut views = Vec::new();
    for button in list_buttons(ctx).await? {
        if !can_see(ctx, caller, &button) {
            continue;
        }
        let content = if ctx.blobs.owns(&button.content) {
            match ctx.blobs.fetch(&button.content).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!(button = %button.button_id, error = %e, "button content unavailable");
                    String::new()
                }
            }
        } else {
            button.content
        };
        views.push(ButtonView {
            id: button.button_id,
            name: button.button_name,
            description: button.description,
            icon: button.icon,
            color: non_blank(&button.color, DEFAULT_COLOR),
            is_html: content.contains('<'),
            content,
        });
    }
    Ok(views)
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

async fn ensure_table(ctx: &Context) -> Result<(), StoreError> {
    if !ctx.main.has_table(BUTTON_TABLE).await? {
        ctx.main.create_table(BUTTON_TABLE, &BUTTON_HEADER).await?;
        info!(table = BUTTON_TABLE, "button table created");
    }
    Ok(())
}

/// Upload `content` when it is markup past the inline limit; otherwise
/// return it unchanged.
async fn store_content(
    ctx: &Context,
    button_id: &str,
    revision: Option<&str>,
    content: String,
) -> Result<String, StoreError> {
    if !(content.contains('<') && content.len() > ctx.config.blob.inline_content_limit) {
        return Ok(content);
    }
    let name = match revision {
        Some(rev) => format!("button_{button_id}_{rev}.html"),
        None => format!("button_{button_id}.html"),
    };
    let url = ctx
        .blobs
        .upload(
            &ctx.config.blob.button_html_bucket,
            &name,
            content.into_bytes(),
            "text/html",
        )
        .await?;
    debug!(button = %button_id, object = %name, "button content offloaded");
    Ok(url)
}

async fn drop_content(ctx: &Context, content: &str) {
    if !ctx.blobs.owns(content) {
        return;
    }
    let Some(name) = object_name(content) else {
        return;
    };
    if let Err(e) = ctx
        .blobs
        .delete(&ctx.config.blob.button_html_bucket, name)
        .await
    {
        warn!(object = %name, error = %e, "button content not deleted");
    }
}

fn changed(ctx: &Context) {
    ctx.cache.delete(BUTTONS_KEY);
    ctx.notify_changed(BUTTON_TABLE);
}

fn validate(name: &str) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::Validation("a button needs a name".to_string()));
    }
    Ok(())
}

pub async fn create_button(
    ctx: &Context,
    caller: &Caller,
    draft: ButtonDraft,
) -> Result<String, StoreError> {
    validate(&draft.button_name)?;
    let button_id = new_button_id();
    let content = store_content(ctx, &button_id, None, draft.content).await?;
    let button = Button {
        button_id: button_id.clone(),
        button_name: draft.button_name.trim().to_string(),
        description: draft.description,
        icon: draft.icon,
        color: non_blank(draft.color.as_deref().unwrap_or_default(), DEFAULT_COLOR),
        access_type: draft.access_type,
        access_list: draft.access_list,
        content,
        created_by: caller.email.clone(),
        owner_position: draft.owner_position,
        exclude_pledges: draft.exclude_pledges.unwrap_or(false),
        last_modified: Utc::now().to_rfc3339(),
    };

    let inner = ctx.clone();
    let row = to_row(&button);
    let written = ctx
        .locks
        .with_lock(BUTTON_LOCK, move || async move {
            ensure_table(&inner).await?;
            inner.main.append(BUTTON_TABLE, vec![row]).await
        })
        .await;
    if let Err(e) = written {
        drop_content(ctx, &button.content).await;
        ctx.cache.delete(BUTTONS_KEY);
        return Err(e);
    }
    info!(button = %button_id, "button created");
    changed(ctx);
    Ok(button_id)
}

/// Create one button per item. Returns how many were written.
pub async fn create_bulk_buttons(
    ctx: &Context,
    caller: &Caller,
    bulk: BulkButtons,
) -> Result<usize, StoreError> {
    validate(&bulk.button_name_template)?;
    let now = Utc::now().to_rfc3339();
    let mut rows = Vec::with_capacity(bulk.items.len());
    let mut uploaded: Vec<String> = Vec::new();
    for item in bulk.items {
        let button_id = new_button_id();
        let content = match store_content(ctx, &button_id, None, item.content).await {
            Ok(content) => content,
            Err(e) => {
                for url in &uploaded {
                    drop_content(ctx, url).await;
                }
                return Err(e);
            }
        };
        if ctx.blobs.owns(&content) {
            uploaded.push(content.clone());
        }
        let button = Button {
            button_id,
            button_name: bulk.button_name_template.replacen("{{name}}", &item.name, 1),
            description: bulk.description.clone(),
            icon: bulk.icon.clone(),
            color: non_blank(bulk.color.as_deref().unwrap_or_default(), DEFAULT_COLOR),
            access_type: bulk.access_type.clone(),
            access_list: vec![item.name],
            content,
            created_by: caller.email.clone(),
            owner_position: bulk.owner_position.clone(),
            exclude_pledges: false,
            last_modified: now.clone(),
        };
        rows.push(to_row(&button));
    }
    let count = rows.len();
    if count == 0 {
        return Ok(0);
    }

    let inner = ctx.clone();
    let written = ctx
        .locks
        .with_lock(BUTTON_LOCK, move || async move {
            ensure_table(&inner).await?;
            inner.main.append(BUTTON_TABLE, rows).await
        })
        .await;
    if let Err(e) = written {
        for url in &uploaded {
            drop_content(ctx, url).await;
        }
        ctx.cache.delete(BUTTONS_KEY);
        return Err(e);
    }
    info!(count, "buttons created");
    changed(ctx);
    Ok(count)
}

/// Rewrite a button in the current layout. The creator is kept; the owner
/// position and pledge exclusion keep their stored values when the draft
/// leaves them out.
pub async fn update_button(
    ctx: &Context,
    caller: &Caller,
    draft: ButtonDraft,
) -> Result<(), StoreError> {
    validate(&draft.button_name)?;
    let button_id = draft
        .button_id
        .clone()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| StoreError::Validation("a button id is required".to_string()))?;

    let content = store_content(ctx, &button_id, Some(&short_uuid()), draft.content).await?;
    let uploaded = ctx.blobs.owns(&content).then(|| content.clone());

    let inner = ctx.clone();
    let caller = caller.clone();
    let written = ctx
        .locks
        .with_lock(BUTTON_LOCK, move || async move {
            let not_found = || StoreError::not_found(format!("button {button_id}"));
            if !inner.main.has_table(BUTTON_TABLE).await? {
                return Err(not_found());
            }
            let table = inner.main.read_fresh(BUTTON_TABLE).await?;
            let index = table.find_row_exact(0, &button_id).ok_or_else(not_found)?;
            let current = parse_row(&table, index);
            if !manages(&inner, &caller, &current) {
                return Err(StoreError::Forbidden(
                    "only the creator or owner position can edit this button".to_string(),
                ));
            }

            let old_content = table.cell(index, content_col(&table, index)).to_string();
            let updated = Button {
                button_id: button_id.clone(),
                button_name: draft.button_name.trim().to_string(),
                description: draft.description,
                icon: draft.icon,
                color: non_blank(draft.color.as_deref().unwrap_or_default(), DEFAULT_COLOR),
                access_type: draft.access_type,
                access_list: draft.access_list,
                content,
                created_by: non_blank(&current.created_by, &caller.email),
                owner_position: non_blank(&draft.owner_position, &current.owner_position),
                exclude_pledges: draft.exclude_pledges.unwrap_or(current.exclude_pledges),
                last_modified: Utc::now().to_rfc3339(),
            };
            inner
                .main
                .write_range(BUTTON_TABLE, index, 0, vec![to_row(&updated)])
                .await?;
            Ok((old_content != updated.content).then_some(old_content))
        })
        .await;

    ctx.cache.delete(BUTTONS_KEY);
    let stale = match written {
        Ok(stale) => stale,
        Err(e) => {
            if let Some(url) = &uploaded {
                drop_content(ctx, url).await;
            }
            return Err(e);
        }
    };
    if let Some(old) = stale {
        drop_content(ctx, &old).await;
    }
    changed(ctx);
    Ok(())
}

pub async fn delete_button(ctx: &Context, caller: &Caller, button_id: &str) -> Result<(), StoreError> {
    let button_id = button_id.trim().to_string();
    let inner = ctx.clone();
    let caller = caller.clone();
    let result = ctx
        .locks
        .with_lock(BUTTON_LOCK, move || async move {
            let not_found = || StoreError::not_found(format!("button {button_id}"));
            if !inner.main.has_table(BUTTON_TABLE).await? {
                return Err(not_found());
            }
            let table = inner.main.read_fresh(BUTTON_TABLE).await?;
            let index = table.find_row_exact(0, &button_id).ok_or_else(not_found)?;
            let current = parse_row(&table, index);
            if !manages(&inner, &caller, &current) {
                return Err(StoreError::Forbidden(
                    "only the creator or owner position can delete this button".to_string(),
                ));
            }
            inner.main.delete_rows(BUTTON_TABLE, &[index]).await?;
            Ok(current.content)
        })
        .await;

    ctx.cache.delete(BUTTONS_KEY);
    let content = result?;
    drop_content(ctx, &content).await;
    changed(ctx);
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
