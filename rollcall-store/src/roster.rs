//! Membership roster (main workbook, table `Sigma`).

use rollcall_core::{normalize_key, Caller, ReconcileReport, RosterChanges, RosterEntry, StoreError};

use crate::cache::Cached;
use crate::context::Context;
use crate::reconcile::{reconcile_roster, RosterColumns};

pub const ROSTER_TABLE: &str = "Sigma";
pub const ROSTER_LOCK: &str = "roster";

/// Positions allowed to edit the roster.
pub const ROSTER_MANAGERS: [&str; 4] = ["Alpha", "Beta", "Sigma", "Chi"];

pub const OFFICER_POSITIONS: [&str; 22] = [
    "Alpha",
    "Beta",
    "Sigma",
    "Chi",
    "Iota",
    "Tau",
    "Gamma",
    "Rho",
    "Theta",
    "Associate Tau",
    "Associate Gamma",
    "Associate Iota",
    "Associate Rho",
    "Pi",
    "Delta",
    "Associate Delta",
    "Psi",
    "Upsilon",
    "Gamma's Theta",
    "Phi",
    "Omicron",
    "Mu",
];

/// Cache key of the positive membership flag for a normalized email.
pub fn identity_key(normalized_email: &str) -> String {
    format!("identity:{normalized_email}")
}

/// Every roster row with an email. Blank names read as "Unknown", blank
/// positions as "None".
pub async fn list_roster(ctx: &Context) -> Result<Vec<RosterEntry>, StoreError> {
    let table = ctx.main.read(ROSTER_TABLE).await?;
    let cols = RosterColumns::resolve(&table);
    Ok(table
        .records()
        .filter_map(|r| {
            let email = r.at(cols.email).trim();
            if email.is_empty() {
                return None;
            }
            Some(RosterEntry {
                email: email.to_string(),
                name: or_default(r.at(cols.name), "Unknown"),
                position: or_default(r.at(cols.position), "None"),
            })
        })
        .collect())
}

fn or_default(raw: &str, fallback: &str) -> String {
    match raw.trim() {
        "" => fallback.to_string(),
        v => v.to_string(),
    }
}

/// De-duplicated member names in roster order.
pub async fn member_names(ctx: &Context) -> Result<Vec<String>, StoreError> {
    let mut names: Vec<String> = Vec::new();
    for entry in list_roster(ctx).await? {
        if entry.name != "Unknown" && !names.contains(&entry.name) {
            names.push(entry.name);
        }
    }
    Ok(names)
}

pub async fn find_member(ctx: &Context, email: &str) -> Result<Option<RosterEntry>, StoreError> {
    let key = normalize_key(email);
    if key.is_empty() {
        return Ok(None);
    }
    Ok(list_roster(ctx)
        .await?
        .into_iter()
        .find(|e| normalize_key(&e.email) == key))
}

pub async fn display_name(ctx: &Context, email: &str) -> Result<Option<String>, StoreError> {
    Ok(find_member(ctx, email).await?.map(|e| e.name))
}

/// Whether `email` is on the roster. Positive answers are cached for the
/// identity TTL; removals through the reconciler drop the cached flag.
pub async fn is_member(ctx: &Context, email: &str) -> Result<bool, StoreError> {
    let key = normalize_key(email);
    if key.is_empty() {
        return Ok(false);
    }
    let cache_key = identity_key(&key);
    if ctx.cache.get_flag(&cache_key) == Some(true) {
        return Ok(true);
    }
    let found = find_member(ctx, email).await?.is_some();
    if found {
        ctx.cache.set(cache_key, Cached::Flag(true), ctx.config.identity_ttl());
    }
    Ok(found)
}

/// Resolve the acting member. In dev mode an unknown email acts as an
/// administrator holding every officer position.
pub async fn caller(ctx: &Context, email: &str) -> Result<Caller, StoreError> {
    if let Some(entry) = find_member(ctx, email).await? {
        return Ok(Caller::from_entry(&entry));
    }
    if ctx.config.dev_mode {
        return Ok(Caller {
            email: email.trim().to_string(),
            name: "Admin".to_string(),
            positions: OFFICER_POSITIONS.iter().map(|p| p.to_string()).collect(),
        });
    }
    Err(StoreError::Forbidden(format!(
        "{} is not on the roster",
        email.trim()
    )))
}

pub fn can_manage_roster(caller: &Caller) -> bool {
    caller.holds_any(&ROSTER_MANAGERS)
}

/// Apply a client's roster edits. Only roster managers may call this.
pub async fn save_roster_changes(
    ctx: &Context,
    caller: &Caller,
    changes: RosterChanges,
) -> Result<ReconcileReport, StoreError> {
    if !can_manage_roster(caller) {
        return Err(StoreError::Forbidden(
            "only Alpha, Beta, Sigma or Chi can edit the roster".to_string(),
        ));
    }
    reconcile_roster(ctx, changes).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
