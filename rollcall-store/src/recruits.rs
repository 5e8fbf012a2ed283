//! Recruit and comment sub-tables of a rush event.
//!
//! Both are addressed by the numeric table id recorded in the rush index.
//! Recruit writes serialize on `recruits:<id>`, comment writes on
//! `comments:<id>`; new recruit ids come from the [`crate::allocator`] under
//! its own section, so allocation inside a recruit section cannot deadlock.

use chrono::Utc;
use rollcall_core::{Comment, Recruit, StoreError, Table, TableId, VoteKind};
use tracing::info;

use crate::backend::DataUrl;
use crate::cells::{format_list, parse_csv, parse_epoch_ms, parse_list};
use crate::adapter::TableAdapter;
use crate::context::Context;
use crate::rush::{delete_photo, settings};

pub const RECRUIT_HEADER: [&str; 11] = [
    "ID",
    "Name",
    "Email",
    "Phone",
    "Instagram",
    "Tier",
    "PhotoURL",
    "PrimaryContacts",
    "Likes",
    "Dislikes",
    "Met",
];

pub const COMMENT_HEADER: [&str; 5] = ["CommentID", "RecruitID", "Author", "Text", "TimestampMs"];

/// Allocator resource and lock name of a recruit sub-table.
pub fn id_resource(tab: TableId) -> String {
    format!("recruits:{tab}")
}

fn comments_lock(tab: TableId) -> String {
    format!("comments:{tab}")
}

/// Header lookup with the creation-time layout as fallback.
fn col(table: &Table, header: &[&str], name: &str) -> usize {
    table
        .column(name)
        .or_else(|| header.iter().position(|h| *h == name))
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Recruits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct RecruitCols {
    id: usize,
    name: usize,
    email: usize,
    phone: usize,
    instagram: usize,
    tier: usize,
    photo: usize,
    contacts: usize,
    likes: usize,
    dislikes: usize,
    met: usize,
}

impl RecruitCols {
    fn resolve(table: &Table) -> Self {
        let at = |name: &str| col(table, &RECRUIT_HEADER, name);
        Self {
            id: at("ID"),
            name: at("Name"),
            email: at("Email"),
            phone: at("Phone"),
            instagram: at("Instagram"),
            tier: at("Tier"),
            photo: at("PhotoURL"),
            contacts: at("PrimaryContacts"),
            likes: at("Likes"),
            dislikes: at("Dislikes"),
            met: at("Met"),
        }
    }

    fn vote(&self, kind: VoteKind) -> usize {
        match kind {
            VoteKind::Like => self.likes,
            VoteKind::Dislike => self.dislikes,
            VoteKind::Met => self.met,
        }
    }

    fn width(&self, table: &Table) -> usize {
        [
            self.id,
            self.name,
            self.email,
            self.phone,
            self.instagram,
            self.tier,
            self.photo,
            self.contacts,
            self.likes,
            self.dislikes,
            self.met,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
        .max(table.header().len().saturating_sub(1))
            + 1
    }
}

fn parse_recruit(table: &Table, cols: RecruitCols, index: usize) -> Option<Recruit> {
    let cell = |c: usize| table.cell(index, c);
    let id = cell(cols.id).trim().parse().ok()?;
    Some(Recruit {
        id,
        name: cell(cols.name).to_string(),
        email: cell(cols.email).to_string(),
        phone: cell(cols.phone).to_string(),
        instagram: cell(cols.instagram).to_string(),
        tier: cell(cols.tier).trim().to_string(),
        photo_url: cell(cols.photo).to_string(),
        primary_contacts: parse_csv(cell(cols.contacts)),
        likes: parse_list(cell(cols.likes)),
        dislikes: parse_list(cell(cols.dislikes)),
        met: parse_list(cell(cols.met)),
    })
}

fn find_recruit(table: &Table, cols: RecruitCols, id: u64) -> Result<usize, StoreError> {
    table
        .find_row_exact(cols.id, &id.to_string())
        .ok_or_else(|| StoreError::not_found(format!("recruit {id}")))
}

/// Recruits with a numeric id, in table order.
pub async fn list_recruits(ctx: &Context, tab: TableId) -> Result<Vec<Recruit>, StoreError> {
    let (_, table) = ctx.rush.read_by_id(tab).await?;
    let cols = RecruitCols::resolve(&table);
    Ok((1..table.len())
        .filter_map(|i| parse_recruit(&table, cols, i))
        .collect())
}

/// A recruit as submitted by a member. `id` is `None` for a new recruit;
/// `photo` is a `data:` URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecruitDraft {
    pub id: Option<u64>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub instagram: String,
    pub primary_contacts: Vec<String>,
    pub photo: Option<String>,
    pub added_by: Option<String>,
}

/// Add or update a recruit. Returns its id.
///
/// The photo is uploaded before the section is entered; if the section then
/// fails, the upload is removed again.
pub async fn save_recruit(
    ctx: &Context,
    tab: TableId,
    draft: RecruitDraft,
) -> Result<u64, StoreError> {
    if draft.name.trim().is_empty() {
        return Err(StoreError::Validation("a recruit needs a name".to_string()));
    }
    if draft.id.is_none() && settings(ctx).global_disable_add_recruits {
        return Err(StoreError::Conflict(
            "adding recruits is currently disabled by an administrator".to_string(),
        ));
    }
    let photo = match draft.photo.as_deref().filter(|p| !p.trim().is_empty()) {
        None => None,
        Some(raw) => Some(
            DataUrl::parse(raw)
                .ok_or_else(|| StoreError::Validation("photo is not a base64 data URL".into()))?,
        ),
    };

    let photo_url = match photo {
        None => None,
        Some(photo) => {
            let object = format!(
                "user-upload_{}_{}{}",
                Utc::now().timestamp_millis(),
                object_safe(&draft.name),
                photo.extension()
            );
            let url = ctx
                .blobs
                .upload(
                    &ctx.config.blob.rush_images_bucket,
                    &object,
                    photo.bytes,
                    &photo.mime,
                )
                .await?;
            Some(url)
        }
    };

    let inner = ctx.clone();
    let uploaded = photo_url.clone();
    let result = ctx
        .locks
        .with_lock(&id_resource(tab), move || async move {
            let (title, table) = inner.rush.read_fresh_by_id(tab).await?;
            let cols = RecruitCols::resolve(&table);
            let contacts = draft.primary_contacts.join(",");

            match draft.id {
                Some(id) => {
                    let index = find_recruit(&table, cols, id)?;
                    let mut row = table.row(index).map(<[String]>::to_vec).unwrap_or_default();
                    row.resize(cols.width(&table).max(row.len()), String::new());
                    let previous = row[cols.photo].clone();
                    row[cols.name] = draft.name.trim().to_string();
                    row[cols.email] = draft.email;
                    row[cols.phone] = draft.phone;
                    row[cols.instagram] = draft.instagram;
                    row[cols.contacts] = contacts;
                    let replaced = match uploaded {
                        Some(url) => {
                            row[cols.photo] = url;
                            Some(previous).filter(|p| !p.is_empty())
                        }
                        None => None,
                    };
                    inner.rush.write_range(&title, index, 0, vec![row]).await?;
                    Ok((id, title, replaced))
                }
                None => {
                    let id = inner
                        .ids
                        .next_id(&id_resource(tab), &inner.rush, &title, "ID")
                        .await?;
                    let mut row = vec![String::new(); cols.width(&table)];
                    row[cols.id] = id.to_string();
                    row[cols.name] = draft.name.trim().to_string();
                    row[cols.email] = draft.email;
                    row[cols.phone] = draft.phone;
                    row[cols.instagram] = draft.instagram;
                    row[cols.tier] = "0".to_string();
                    row[cols.photo] = uploaded.unwrap_or_default();
                    row[cols.contacts] = contacts;
                    row[cols.likes] = "[]".to_string();
                    row[cols.dislikes] = "[]".to_string();
                    let met: Vec<String> = draft
                        .added_by
                        .map(|a| a.trim().to_string())
                        .filter(|a| !a.is_empty())
                        .into_iter()
                        .collect();
                    row[cols.met] = format_list(&met);
                    inner.rush.append(&title, vec![row]).await?;
                    Ok((id, title, None))
                }
            }
        })
        .await;

    match result {
        Ok((id, title, replaced)) => {
            if let Some(old) = replaced {
                delete_photo(ctx, &old).await;
            }
            info!(recruit = id, "recruit saved");
            ctx.notify_changed(&title);
            Ok(id)
        }
        Err(e) => {
            if let Some(url) = photo_url {
                delete_photo(ctx, &url).await;
            }
            Err(e)
        }
    }
}

pub async fn update_tier(
    ctx: &Context,
    tab: TableId,
    recruit_id: u64,
    tier: &str,
) -> Result<(), StoreError> {
    let tier = tier.trim().to_string();
    if tier.is_empty() {
        return Err(StoreError::Validation("tier cannot be blank".to_string()));
    }
    let inner = ctx.clone();
    let title = ctx
        .locks
        .with_lock(&id_resource(tab), move || async move {
            let (title, table) = inner.rush.read_fresh_by_id(tab).await?;
            let cols = RecruitCols::resolve(&table);
            let index = find_recruit(&table, cols, recruit_id)?;
            inner.rush.write_cell(&title, index, cols.tier, tier).await?;
            Ok(title)
        })
        .await?;
    ctx.notify_changed(&title);
    Ok(())
}

/// Write several cells of one row as a single range. Cells between the
/// touched columns are rewritten with their current values.
async fn write_cells(
    adapter: &TableAdapter,
    title: &str,
    table: &Table,
    index: usize,
    updates: Vec<(usize, String)>,
) -> Result<(), StoreError> {
    let (Some(first), Some(last)) = (
        updates.iter().map(|(c, _)| *c).min(),
        updates.iter().map(|(c, _)| *c).max(),
    ) else {
        return Ok(());
    };
    let mut span: Vec<String> = (first..=last).map(|c| table.cell(index, c).to_string()).collect();
    for (col, value) in updates {
        span[col - first] = value;
    }
    adapter.write_range(title, index, first, vec![span]).await
}

/// Object names end up in URL paths; `/` and `?` would break them apart.
fn object_safe(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '/' | '?' | '#' | '\\' => '_',
            c => c,
        })
        .collect()
}

/// Add `user` to the recruit's `kind` list, or remove them if already there.
/// A like clears the same user's dislike and vice versa. Returns whether the
/// user is now in the list.
pub async fn toggle_vote(
    ctx: &Context,
    tab: TableId,
    recruit_id: u64,
    kind: VoteKind,
    user: &str,
) -> Result<bool, StoreError> {
    let user = user.trim().to_string();
    if user.is_empty() {
        return Err(StoreError::Validation("a vote needs a member name".to_string()));
    }
    let inner = ctx.clone();
    let (title, present) = ctx
        .locks
        .with_lock(&id_resource(tab), move || async move {
            let (title, table) = inner.rush.read_fresh_by_id(tab).await?;
            let cols = RecruitCols::resolve(&table);
            let index = find_recruit(&table, cols, recruit_id)?;

            let target = cols.vote(kind);
            let mut list = parse_list(table.cell(index, target));
            let present = match list.iter().position(|u| *u == user) {
                Some(at) => {
                    list.remove(at);
                    false
                }
                None => {
                    list.push(user.clone());
                    true
                }
            };
            let mut updates = vec![(target, format_list(&list))];

            if let Some(opposite) = kind.opposite() {
                let other = cols.vote(opposite);
                let mut list = parse_list(table.cell(index, other));
                let before = list.len();
                list.retain(|u| *u != user);
                if list.len() != before {
                    updates.push((other, format_list(&list)));
                }
            }
            write_cells(&inner.rush, &title, &table, index, updates).await?;
            Ok((title, present))
        })
        .await?;
    ctx.notify_changed(&title);
    Ok(present)
}

/// Delete a recruit. Its photo is removed first, best effort.
pub async fn delete_recruit(ctx: &Context, tab: TableId, recruit_id: u64) -> Result<(), StoreError> {
    let recruits = list_recruits(ctx, tab).await?;
    if let Some(recruit) = recruits.iter().find(|r| r.id == recruit_id) {
        if !recruit.photo_url.is_empty() {
            delete_photo(ctx, &recruit.photo_url).await;
        }
    }

    let inner = ctx.clone();
    let title = ctx
        .locks
        .with_lock(&id_resource(tab), move || async move {
            let (title, table) = inner.rush.read_fresh_by_id(tab).await?;
            let cols = RecruitCols::resolve(&table);
            let index = find_recruit(&table, cols, recruit_id)?;
            inner.rush.delete_rows(&title, &[index]).await?;
            Ok(title)
        })
        .await?;
    info!(recruit = recruit_id, "recruit deleted");
    ctx.notify_changed(&title);
    Ok(())
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct CommentCols {
    id: usize,
    recruit: usize,
    author: usize,
    text: usize,
    timestamp: usize,
}

impl CommentCols {
    fn resolve(table: &Table) -> Self {
        let at = |name: &str| col(table, &COMMENT_HEADER, name);
        Self {
            id: at("CommentID"),
            recruit: at("RecruitID"),
            author: at("Author"),
            text: at("Text"),
            timestamp: table
                .column("TimestampMs")
                .or_else(|| table.column("Timestamp"))
                .unwrap_or(COMMENT_HEADER.len() - 1),
        }
    }

    fn width(&self, table: &Table) -> usize {
        let max = self.id.max(self.recruit).max(self.author).max(self.text).max(self.timestamp);
        table.header().len().max(max + 1)
    }
}

fn find_comment(table: &Table, cols: CommentCols, recruit_id: u64, author: &str) -> Option<usize> {
    let recruit_id = recruit_id.to_string();
    (1..table.len()).find(|&i| {
        table.cell(i, cols.recruit).trim() == recruit_id && table.cell(i, cols.author) == author
    })
}

pub async fn list_comments(ctx: &Context, tab: TableId) -> Result<Vec<Comment>, StoreError> {
    let (_, table) = ctx.rush.read_by_id(tab).await?;
    let cols = CommentCols::resolve(&table);
    Ok(table
        .records()
        .filter(|r| !r.at(cols.recruit).trim().is_empty())
        .map(|r| Comment {
            comment_id: r.at(cols.id).to_string(),
            recruit_id: r.at(cols.recruit).trim().to_string(),
            author: r.at(cols.author).to_string(),
            text: r.at(cols.text).to_string(),
            timestamp_ms: parse_epoch_ms(r.at(cols.timestamp)),
        })
        .collect())
}

/// Write `author`'s comment on a recruit. Each author has at most one
/// comment per recruit; a second call replaces its text and timestamp.
pub async fn upsert_comment(
    ctx: &Context,
    tab: TableId,
    recruit_id: u64,
    author: &str,
    text: &str,
) -> Result<(), StoreError> {
    if settings(ctx).global_disable_commenting {
        return Err(StoreError::Conflict(
            "commenting is currently disabled by an administrator".to_string(),
        ));
    }
    let author = author.trim().to_string();
    if author.is_empty() || text.trim().is_empty() {
        return Err(StoreError::Validation(
            "a comment needs an author and text".to_string(),
        ));
    }
    let text = text.to_string();
    let now = Utc::now().timestamp_millis().to_string();

    let inner = ctx.clone();
    let title = ctx
        .locks
        .with_lock(&comments_lock(tab), move || async move {
            let (title, table) = inner.rush.read_fresh_by_id(tab).await?;
            let cols = CommentCols::resolve(&table);
            match find_comment(&table, cols, recruit_id, &author) {
                Some(index) => {
                    let updates = vec![(cols.text, text), (cols.timestamp, now)];
                    write_cells(&inner.rush, &title, &table, index, updates).await?;
                }
                None => {
                    let mut row = vec![String::new(); cols.width(&table)];
                    row[cols.id] = uuid::Uuid::new_v4().to_string();
                    row[cols.recruit] = recruit_id.to_string();
                    row[cols.author] = author;
                    row[cols.text] = text;
                    row[cols.timestamp] = now;
                    inner.rush.append(&title, vec![row]).await?;
                }
            }
            Ok(title)
        })
        .await?;
    ctx.notify_changed(&title);
    Ok(())
}

pub async fn delete_comment(
    ctx: &Context,
    tab: TableId,
    recruit_id: u64,
    author: &str,
) -> Result<(), StoreError> {
    let author = author.trim().to_string();
    let inner = ctx.clone();
    let title = ctx
        .locks
        .with_lock(&comments_lock(tab), move || async move {
            let (title, table) = inner.rush.read_fresh_by_id(tab).await?;
            let cols = CommentCols::resolve(&table);
            let index = find_comment(&table, cols, recruit_id, &author)
                .ok_or_else(|| StoreError::not_found("comment"))?;
            inner.rush.delete_rows(&title, &[index]).await?;
            Ok(title)
        })
        .await?;
    ctx.notify_changed(&title);
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rollcall_core::{Config, RushSettings};

    use super::*;
    use crate::context::MemoryBackends;
    use crate::rush::{save_event, set_settings, EventDraft};

    async fn event(ctx: &Context) -> (TableId, TableId) {
        let event = save_event(
            ctx,
            EventDraft {
                id: None,
                name: "Fall".into(),
                description: String::new(),
            },
        )
        .await
        .unwrap();
        (event.recruits_tab_id.unwrap(), event.comments_tab_id.unwrap())
    }

    fn named(name: &str) -> RecruitDraft {
        RecruitDraft {
            name: name.into(),
            ..RecruitDraft::default()
        }
    }

    fn setup() -> (Context, MemoryBackends) {
        Context::in_memory(Config::default())
    }

    #[tokio::test]
    async fn new_recruits_get_defaults_and_the_adder_as_met() {
        let (ctx, _) = setup();
        let (tab, _) = event(&ctx).await;
        let id = save_recruit(
            &ctx,
            tab,
            RecruitDraft {
                added_by: Some("Ann".into()),
                primary_contacts: vec!["Ann".into(), "Bo".into()],
                ..named("Sam")
            },
        )
        .await
        .unwrap();
        assert_eq!(id, 1);

        let recruit = &list_recruits(&ctx, tab).await.unwrap()[0];
        assert_eq!(recruit.tier, "0");
        assert_eq!(recruit.met, vec!["Ann"]);
        assert!(recruit.likes.is_empty());
        assert_eq!(recruit.primary_contacts, vec!["Ann", "Bo"]);
    }

    #[tokio::test]
    async fn updates_touch_profile_fields_only() {
        let (ctx, _) = setup();
        let (tab, _) = event(&ctx).await;
        let id = save_recruit(&ctx, tab, named("Sam")).await.unwrap();
        update_tier(&ctx, tab, id, "3").await.unwrap();

        save_recruit(
            &ctx,
            tab,
            RecruitDraft {
                id: Some(id),
                email: "sam@x.org".into(),
                ..named("Samuel")
            },
        )
        .await
        .unwrap();
        let recruit = &list_recruits(&ctx, tab).await.unwrap()[0];
        assert_eq!(recruit.name, "Samuel");
        assert_eq!(recruit.email, "sam@x.org");
        assert_eq!(recruit.tier, "3");

        let err = save_recruit(&ctx, tab, RecruitDraft { id: Some(99), ..named("X") })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn likes_and_dislikes_exclude_each_other() {
        let (ctx, _) = setup();
        let (tab, _) = event(&ctx).await;
        let id = save_recruit(&ctx, tab, named("Sam")).await.unwrap();

        assert!(toggle_vote(&ctx, tab, id, VoteKind::Like, "Ann").await.unwrap());
        assert!(toggle_vote(&ctx, tab, id, VoteKind::Dislike, "Ann").await.unwrap());
        let recruit = &list_recruits(&ctx, tab).await.unwrap()[0];
        assert!(recruit.likes.is_empty());
        assert_eq!(recruit.dislikes, vec!["Ann"]);

        assert!(!toggle_vote(&ctx, tab, id, VoteKind::Dislike, "Ann").await.unwrap());
        assert!(toggle_vote(&ctx, tab, id, VoteKind::Met, "Ann").await.unwrap());
        let recruit = &list_recruits(&ctx, tab).await.unwrap()[0];
        assert!(recruit.dislikes.is_empty());
        assert_eq!(recruit.met, vec!["Ann"]);
    }

    #[tokio::test]
    async fn disabled_adds_conflict_but_updates_pass() {
        let (ctx, _) = setup();
        let (tab, _) = event(&ctx).await;
        let id = save_recruit(&ctx, tab, named("Sam")).await.unwrap();
        set_settings(
            &ctx,
            &RushSettings {
                global_disable_add_recruits: true,
                ..RushSettings::default()
            },
        )
        .unwrap();

        let err = save_recruit(&ctx, tab, named("New")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        save_recruit(&ctx, tab, RecruitDraft { id: Some(id), ..named("Sam") })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_write_removes_the_uploaded_photo() {
        let (ctx, backends) = setup();
        let (tab, _) = event(&ctx).await;
        backends.rush.fail_next_writes(1);
        let err = save_recruit(
            &ctx,
            tab,
            RecruitDraft {
                photo: Some("data:image/jpeg;base64,aGVsbG8=".into()),
                ..named("Sam")
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::Backing(_)));
        assert!(backends.blobs.is_empty());
    }

    #[tokio::test]
    async fn delete_recruit_removes_row_and_photo() {
        let (ctx, backends) = setup();
        let (tab, _) = event(&ctx).await;
        let keep = save_recruit(&ctx, tab, named("Keep")).await.unwrap();
        let gone = save_recruit(
            &ctx,
            tab,
            RecruitDraft {
                photo: Some("data:image/png;base64,aGVsbG8=".into()),
                ..named("Gone")
            },
        )
        .await
        .unwrap();

        delete_recruit(&ctx, tab, gone).await.unwrap();
        let ids: Vec<u64> = list_recruits(&ctx, tab).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![keep]);
        assert!(backends.blobs.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_get_distinct_ids() {
        let (ctx, _) = setup();
        let (tab, _) = event(&ctx).await;
        let mut handles = Vec::new();
        for i in 0..10 {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                save_recruit(&ctx, tab, named(&format!("R{i}"))).await.unwrap()
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=10).collect::<Vec<u64>>());
        assert_eq!(list_recruits(&ctx, tab).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn one_comment_per_author_per_recruit() {
        let (ctx, _) = setup();
        let (_, comments) = event(&ctx).await;

        upsert_comment(&ctx, comments, 1, "Ann", "first").await.unwrap();
        upsert_comment(&ctx, comments, 1, "Ann", "second").await.unwrap();
        upsert_comment(&ctx, comments, 1, "Bo", "hi").await.unwrap();
        upsert_comment(&ctx, comments, 2, "Ann", "other").await.unwrap();

        let all = list_comments(&ctx, comments).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].text, "second");
        assert!(all[0].timestamp_ms.is_some());

        delete_comment(&ctx, comments, 1, "Ann").await.unwrap();
        assert_eq!(list_comments(&ctx, comments).await.unwrap().len(), 2);
        let err = delete_comment(&ctx, comments, 1, "Ann").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn commenting_can_be_disabled() {
        let (ctx, _) = setup();
        let (_, comments) = event(&ctx).await;
        set_settings(
            &ctx,
            &RushSettings {
                global_disable_commenting: true,
                ..RushSettings::default()
            },
        )
        .unwrap();
        let err = upsert_comment(&ctx, comments, 1, "Ann", "x").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn switching_a_vote_is_one_write() {
        let (ctx, backends) = setup();
        let (tab, _) = event(&ctx).await;
        let id = save_recruit(&ctx, tab, named("Sam")).await.unwrap();
        toggle_vote(&ctx, tab, id, VoteKind::Like, "Ann").await.unwrap();

        backends.rush.fail_next_writes(1);
        assert!(toggle_vote(&ctx, tab, id, VoteKind::Dislike, "Ann").await.is_err());
        let recruit = &list_recruits(&ctx, tab).await.unwrap()[0];
        assert_eq!(recruit.likes, vec!["Ann"]);
        assert!(recruit.dislikes.is_empty());

        let before = backends.rush.write_count();
        toggle_vote(&ctx, tab, id, VoteKind::Dislike, "Ann").await.unwrap();
        assert_eq!(backends.rush.write_count(), before + 1);
        let recruit = &list_recruits(&ctx, tab).await.unwrap()[0];
        assert!(recruit.likes.is_empty());
        assert_eq!(recruit.dislikes, vec!["Ann"]);
    }

    #[tokio::test]
    async fn photo_names_with_url_characters_stay_deletable() {
        let (ctx, backends) = setup();
        let (tab, _) = event(&ctx).await;
        let id = save_recruit(
            &ctx,
            tab,
            RecruitDraft {
                photo: Some("data:image/png;base64,aGVsbG8=".into()),
                ..named("Jo/Ann?x#1")
            },
        )
        .await
        .unwrap();
        let url = list_recruits(&ctx, tab).await.unwrap()[0].photo_url.clone();
        let name = crate::backend::object_name(&url).unwrap();
        assert!(name.contains("Jo_Ann_x_1"));
        assert!(backends.blobs.contains(&ctx.config.blob.rush_images_bucket, name));

        delete_recruit(&ctx, tab, id).await.unwrap();
        assert!(backends.blobs.is_empty());
    }
}
