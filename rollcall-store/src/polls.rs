//! Ranked-choice polls (main workbook, table `RankedChoicePolls`).
//!
//! Every mutation runs in the `polls` section against a fresh read and
//! publishes `refresh` afterwards. Votes are keyed by the voter's display
//! name, so a second vote from the same member replaces the first.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rollcall_core::{Caller, Poll, PollId, PollStatus, StoreError, Table};
use tracing::{info, warn};

use crate::cells::{format_bool, parse_bool};
use crate::context::Context;

pub const POLL_TABLE: &str = "RankedChoicePolls";
pub const POLL_LOCK: &str = "polls";

pub const POLL_HEADER: [&str; 9] = [
    "Poll ID",
    "Question",
    "Options (JSON)",
    "Votes (JSON)",
    "Creator",
    "Created At",
    "Status",
    "Threshold",
    "Anonymous",
];

const DEFAULT_THRESHOLD: f64 = 0.5;

/// Column positions, by header name with the canonical order as fallback.
#[derive(Debug, Clone, Copy)]
struct Cols {
    id: usize,
    question: usize,
    options: usize,
    votes: usize,
    creator: usize,
    created_at: usize,
    status: usize,
    threshold: usize,
    anonymous: usize,
}

impl Cols {
    fn resolve(table: &Table) -> Self {
        let at = |i: usize| table.column(POLL_HEADER[i]).unwrap_or(i);
        Self {
            id: at(0),
            question: at(1),
            options: at(2),
            votes: at(3),
            creator: at(4),
            created_at: at(5),
            status: at(6),
            threshold: at(7),
            anonymous: at(8),
        }
    }
}

fn parse_row(table: &Table, cols: Cols, index: usize) -> Poll {
    let cell = |c: usize| table.cell(index, c);
    let options = serde_json::from_str(cell(cols.options)).unwrap_or_else(|e| {
        warn!(poll = %cell(cols.id), error = %e, "malformed poll options");
        Vec::new()
    });
    let votes: BTreeMap<String, Vec<String>> =
        serde_json::from_str(cell(cols.votes)).unwrap_or_default();
    Poll {
        id: PollId::from(cell(cols.id)),
        question: cell(cols.question).to_string(),
        options,
        votes,
        creator: cell(cols.creator).to_string(),
        created_at: cell(cols.created_at).to_string(),
        status: PollStatus::parse(cell(cols.status)).unwrap_or(PollStatus::Closed),
        threshold: cell(cols.threshold).trim().parse().unwrap_or(DEFAULT_THRESHOLD),
        is_anonymous: parse_bool(cell(cols.anonymous)).unwrap_or(true),
    }
}

fn created_at(poll: &Poll) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&poll.created_at)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Create the poll table with its header if it does not exist yet.
pub async fn ensure_table(ctx: &Context) -> Result<(), StoreError> {
    if !ctx.main.has_table(POLL_TABLE).await? {
        ctx.main.create_table(POLL_TABLE, &POLL_HEADER).await?;
        info!(table = POLL_TABLE, "poll table created");
    }
    Ok(())
}

/// All polls, active ones first, each group newest first.
pub async fn list_polls(ctx: &Context) -> Result<Vec<Poll>, StoreError> {
    if !ctx.main.has_table(POLL_TABLE).await? {
        return Ok(Vec::new());
    }
    let table = ctx.main.read(POLL_TABLE).await?;
    let cols = Cols::resolve(&table);
    let mut polls: Vec<Poll> = (1..table.len())
        .filter(|&i| !table.cell(i, cols.id).trim().is_empty())
        .map(|i| parse_row(&table, cols, i))
        .collect();
    polls.sort_by(|a, b| {
        let a_active = a.status == PollStatus::Active;
        let b_active = b.status == PollStatus::Active;
        b_active
            .cmp(&a_active)
            .then_with(|| created_at(b).cmp(&created_at(a)))
    });
    Ok(polls)
}

pub async fn get_poll(ctx: &Context, id: &PollId) -> Result<Poll, StoreError> {
    list_polls(ctx)
        .await?
        .into_iter()
        .find(|p| &p.id == id)
        .ok_or_else(|| StoreError::not_found(format!("poll {id}")))
}

pub async fn create_poll(
    ctx: &Context,
    caller: &Caller,
    question: &str,
    options: Vec<String>,
    threshold: Option<f64>,
    anonymous: Option<bool>,
) -> Result<PollId, StoreError> {
    let question = question.trim().to_string();
    if question.is_empty() {
        return Err(StoreError::Validation("a poll needs a question".to_string()));
    }
    let options: Vec<String> = options
        .into_iter()
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();
    if options.len() < 2 {
        return Err(StoreError::Validation(
            "a poll needs at least two options".to_string(),
        ));
    }
    let threshold = threshold.unwrap_or(DEFAULT_THRESHOLD);
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(StoreError::Validation(
            "threshold must be in (0, 1]".to_string(),
        ));
    }
    let options_json = serde_json::to_string(&options)
        .map_err(|e| StoreError::Validation(e.to_string()))?;

    let id = PollId(uuid::Uuid::new_v4().to_string());
    let row = vec![
        id.0.clone(),
        question,
        options_json,
        "{}".to_string(),
        creator_name(caller),
        Utc::now().to_rfc3339(),
        PollStatus::Active.to_string(),
        threshold.to_string(),
        format_bool(anonymous.unwrap_or(true)),
    ];

    let inner = ctx.clone();
    ctx.locks
        .with_lock(POLL_LOCK, move || async move {
            ensure_table(&inner).await?;
            inner.main.append(POLL_TABLE, vec![row]).await
        })
        .await?;
    info!(poll = %id, "poll created");
    ctx.notify_changed(POLL_TABLE);
    Ok(id)
}

/// What a locked poll mutation needs to decide and write.
enum Edit {
    Vote { voter: String, ranking: Vec<String> },
    Close,
    Reset { caller: String },
    Delete { caller: String },
}

async fn mutate(ctx: &Context, id: &PollId, edit: Edit) -> Result<(), StoreError> {
    let inner = ctx.clone();
    let id = id.clone();
    let dev_mode = ctx.config.dev_mode;
    ctx.locks
        .with_lock(POLL_LOCK, move || async move {
            if !inner.main.has_table(POLL_TABLE).await? {
                return Err(StoreError::not_found(format!("poll {id}")));
            }
            let table = inner.main.read_fresh(POLL_TABLE).await?;
            let cols = Cols::resolve(&table);
            let index = table
                .find_row_exact(cols.id, &id.0)
                .ok_or_else(|| StoreError::not_found(format!("poll {id}")))?;
            let poll = parse_row(&table, cols, index);

            match edit {
                Edit::Vote { voter, ranking } => {
                    if poll.status != PollStatus::Active {
                        return Err(StoreError::Conflict("this poll is closed".to_string()));
                    }
                    if let Some(bad) = ranking.iter().find(|r| !poll.options.contains(r)) {
                        return Err(StoreError::Conflict(format!(
                            "'{bad}' is not an option of this poll"
                        )));
                    }
                    let mut votes = poll.votes;
                    votes.insert(voter, ranking);
                    let json = serde_json::to_string(&votes)
                        .map_err(|e| StoreError::Validation(e.to_string()))?;
                    inner.main.write_cell(POLL_TABLE, index, cols.votes, json).await
                }
                Edit::Close => {
                    inner
                        .main
                        .write_cell(POLL_TABLE, index, cols.status, PollStatus::Closed.as_str())
                        .await
                }
                Edit::Reset { caller } => {
                    if poll.status != PollStatus::Active {
                        return Err(StoreError::Conflict(
                            "only active polls can be reset".to_string(),
                        ));
                    }
                    if !dev_mode && poll.creator != caller {
                        return Err(StoreError::Forbidden(
                            "only the poll creator can reset votes".to_string(),
                        ));
                    }
                    inner.main.write_cell(POLL_TABLE, index, cols.votes, "{}").await
                }
                Edit::Delete { caller } => {
                    if poll.status != PollStatus::Closed {
                        return Err(StoreError::Conflict(
                            "only closed polls can be deleted".to_string(),
                        ));
                    }
                    if !dev_mode && poll.creator != caller {
                        return Err(StoreError::Forbidden(
                            "only the poll creator can delete this poll".to_string(),
                        ));
                    }
                    inner.main.delete_rows(POLL_TABLE, &[index]).await
                }
            }
        })
        .await?;
    ctx.notify_changed(POLL_TABLE);
    Ok(())
}

fn creator_name(caller: &Caller) -> String {
    if caller.name.is_empty() {
        "Admin".to_string()
    } else {
        caller.name.clone()
    }
}

fn member_name(caller: &Caller) -> String {
    if caller.name.is_empty() {
        caller.email.clone()
    } else {
        caller.name.clone()
    }
}

/// Record (or replace) the caller's ranking.
pub async fn submit_vote(
    ctx: &Context,
    caller: &Caller,
    id: &PollId,
    ranking: Vec<String>,
) -> Result<(), StoreError> {
    if ranking.is_empty() {
        return Err(StoreError::Validation("a ranking cannot be empty".to_string()));
    }
    let mut seen = std::collections::HashSet::new();
    if !ranking.iter().all(|r| seen.insert(r)) {
        return Err(StoreError::Validation(
            "a ranking cannot list an option twice".to_string(),
        ));
    }
    mutate(
        ctx,
        id,
        Edit::Vote {
            voter: member_name(caller),
            ranking,
        },
    )
    .await
}

pub async fn close_poll(ctx: &Context, id: &PollId) -> Result<(), StoreError> {
    mutate(ctx, id, Edit::Close).await
}

/// Clear all votes of an active poll. Creator only, outside dev mode.
pub async fn reset_votes(ctx: &Context, caller: &Caller, id: &PollId) -> Result<(), StoreError> {
    mutate(
        ctx,
        id,
        Edit::Reset {
            caller: member_name(caller),
        },
    )
    .await
}

/// Delete a closed poll. Creator only, outside dev mode.
pub async fn delete_poll(ctx: &Context, caller: &Caller, id: &PollId) -> Result<(), StoreError> {
    mutate(
        ctx,
        id,
        Edit::Delete {
            caller: member_name(caller),
        },
    )
    .await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rollcall_core::Config;

    use super::*;
    use crate::context::MemoryBackends;

    fn member(name: &str) -> Caller {
        Caller {
            email: format!("{}@x.org", name.to_lowercase()),
            name: name.to_string(),
            positions: vec![],
        }
    }

    fn ctx() -> (Context, MemoryBackends) {
        Context::in_memory(Config::default())
    }

    fn opts() -> Vec<String> {
        vec!["Red".into(), "Blue".into(), "Green".into()]
    }

    #[tokio::test]
    async fn create_makes_the_table_and_lists_the_poll() {
        let (ctx, backends) = ctx();
        assert!(list_polls(&ctx).await.unwrap().is_empty());

        let id = create_poll(&ctx, &member("Ann"), "Color?", opts(), None, None)
            .await
            .unwrap();
        let header = &backends.main.snapshot(POLL_TABLE).unwrap()[0];
        assert_eq!(header[2], "Options (JSON)");

        let poll = get_poll(&ctx, &id).await.unwrap();
        assert_eq!(poll.creator, "Ann");
        assert_eq!(poll.status, PollStatus::Active);
        assert_eq!(poll.threshold, 0.5);
        assert!(poll.is_anonymous);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_any_io() {
        let (ctx, backends) = ctx();
        let err = create_poll(&ctx, &member("Ann"), " ", opts(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        let err = create_poll(&ctx, &member("Ann"), "Q", vec!["only".into()], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(backends.main.titles().is_empty());
    }

    #[tokio::test]
    async fn votes_replace_per_voter_and_closed_polls_conflict() {
        let (ctx, _) = ctx();
        let ann = member("Ann");
        let id = create_poll(&ctx, &ann, "Color?", opts(), None, Some(false))
            .await
            .unwrap();

        submit_vote(&ctx, &ann, &id, vec!["Red".into()]).await.unwrap();
        submit_vote(&ctx, &ann, &id, vec!["Blue".into(), "Red".into()])
            .await
            .unwrap();
        submit_vote(&ctx, &member("Bo"), &id, vec!["Green".into()])
            .await
            .unwrap();
        let poll = get_poll(&ctx, &id).await.unwrap();
        assert_eq!(poll.votes.len(), 2);
        assert_eq!(poll.votes["Ann"], vec!["Blue", "Red"]);

        let err = submit_vote(&ctx, &ann, &id, vec!["Purple".into()]).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        close_poll(&ctx, &id).await.unwrap();
        let err = submit_vote(&ctx, &ann, &id, vec!["Red".into()]).await.unwrap_err();
        assert_eq!(err.to_string(), "this poll is closed");
    }

    #[tokio::test]
    async fn delete_requires_closed_and_creator() {
        let (ctx, _) = ctx();
        let ann = member("Ann");
        let id = create_poll(&ctx, &ann, "Q", opts(), None, None).await.unwrap();

        let err = delete_poll(&ctx, &ann, &id).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        close_poll(&ctx, &id).await.unwrap();
        let err = delete_poll(&ctx, &member("Bo"), &id).await.unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));

        delete_poll(&ctx, &ann, &id).await.unwrap();
        assert!(matches!(
            get_poll(&ctx, &id).await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn reset_requires_active_and_creator_unless_dev_mode() {
        let config = Config {
            dev_mode: true,
            ..Config::default()
        };
        let (ctx, _) = Context::in_memory(config);
        let ann = member("Ann");
        let id = create_poll(&ctx, &ann, "Q", opts(), None, None).await.unwrap();
        submit_vote(&ctx, &ann, &id, vec!["Red".into()]).await.unwrap();

        reset_votes(&ctx, &member("Bo"), &id).await.unwrap();
        assert!(get_poll(&ctx, &id).await.unwrap().votes.is_empty());

        close_poll(&ctx, &id).await.unwrap();
        let err = reset_votes(&ctx, &ann, &id).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn listing_puts_active_first_then_newest() {
        let (ctx, backends) = ctx();
        let mut rows = vec![POLL_HEADER.iter().map(|h| h.to_string()).collect::<Vec<_>>()];
        for (id, created, status) in [
            ("old-active", "2024-01-01T00:00:00Z", "active"),
            ("new-closed", "2024-03-01T00:00:00Z", "closed"),
            ("new-active", "2024-02-01T00:00:00Z", "active"),
        ] {
            rows.push(vec![
                id.into(),
                "Q".into(),
                "[]".into(),
                "{}".into(),
                "Ann".into(),
                created.into(),
                status.into(),
            ]);
        }
        backends.main.seed(POLL_TABLE, rows);

        let ids: Vec<String> = list_polls(&ctx)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id.0)
            .collect();
        assert_eq!(ids, vec!["new-active", "old-active", "new-closed"]);
    }

    #[tokio::test]
    async fn mutations_publish_refresh() {
        let (ctx, _) = ctx();
        let mut sub = ctx.hub.subscribe("Watcher").unwrap();
        while sub.try_recv().is_some() {}

        create_poll(&ctx, &member("Ann"), "Q", opts(), None, None)
            .await
            .unwrap();
        let event = sub.try_recv().unwrap();
        assert_eq!(event.kind, crate::hub::EventKind::Refresh);
        assert_eq!(event.payload["table"], POLL_TABLE);
    }

    #[tokio::test]
    async fn nameless_caller_is_matched_by_email() {
        let (ctx, backends) = ctx();
        let header = POLL_HEADER.iter().map(|h| h.to_string()).collect::<Vec<_>>();
        let row = |id: &str, creator: &str| -> Vec<String> {
            vec![
                id.into(),
                "Q".into(),
                "[]".into(),
                "{}".into(),
                creator.into(),
                "2024-01-01T00:00:00Z".into(),
                "closed".into(),
            ]
        };
        backends.main.seed(
            POLL_TABLE,
            vec![header, row("by-email", "u@x.org"), row("by-admin", "Admin")],
        );
        let nameless = Caller {
            email: "u@x.org".into(),
            name: String::new(),
            positions: vec![],
        };

        let err = delete_poll(&ctx, &nameless, &PollId("by-admin".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));
        delete_poll(&ctx, &nameless, &PollId("by-email".into()))
            .await
            .unwrap();
        assert_eq!(list_polls(&ctx).await.unwrap().len(), 1);
    }
}
