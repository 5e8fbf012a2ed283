//! # rollcall-store
//!
//! Coordinated data access over a slow, shared, externally-owned table
//! service.
//!
//! Build a [`Context`] once (or [`Context::in_memory`] in tests) and pass it
//! to the record operations in [`roster`], [`polls`], [`rush`], [`recruits`]
//! and [`buttons`]. Every mutation runs inside a named critical section from
//! the [`LockRegistry`], re-reads the authoritative table, writes through the
//! [`TableAdapter`] (which invalidates the [`Cache`]) and publishes a change
//! event on the [`NotificationHub`].

pub mod adapter;
pub mod addressing;
pub mod allocator;
pub mod backend;
pub mod buttons;
pub mod cache;
pub mod cells;
pub mod context;
pub mod hub;
pub mod locks;
pub mod polls;
pub mod reconcile;
pub mod recruits;
pub mod roster;
pub mod rush;

pub use adapter::TableAdapter;
pub use addressing::{column_index, column_letter, CellRange};
pub use allocator::IdAllocator;
pub use backend::{BlobStore, DataUrl, MemoryBlobStore, MemoryTableService, TableService};
pub use cache::{Cache, Cached};
pub use context::{Context, MemoryBackends};
pub use hub::{
    ConnectionId, ConnectionState, EventKind, NotificationHub, PublishReport, ServerEvent,
    Subscription,
};
pub use locks::LockRegistry;
pub use reconcile::{apply_snapshot, reconcile_roster, RosterColumns, SnapshotOutcome};
pub use rollcall_core::StoreError;
