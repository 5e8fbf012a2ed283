//! Rollcall core library: domain types, configuration, errors.
//!
//! - [`types`]: table snapshots, records, and the domain structs built from them
//! - [`error`]: [`StoreError`], [`BackendError`], [`ConfigError`]
//! - [`config`]: [`Config`] load / defaults / environment overrides

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{BackendError, ConfigError, StoreError};
pub use types::{
    normalize_key, split_positions, AccessType, Button, ButtonDraft, Caller, Comment, Poll, PollId, PollStatus,
    ReconcileReport, Record, Recruit, RosterChanges, RosterEntry, RushEvent, RushSettings,
    RushStats, Table, TableId, TableMeta, VoteKind,
};
