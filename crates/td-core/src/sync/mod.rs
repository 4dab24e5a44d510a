//! Multi-client replication through a central sync server.
//!
//! Local writes reach the server by pushing action-log entries past a cursor;
//! remote writes arrive by pulling server events and merging them field by
//! field with last-writer-wins clocks. A client far behind can bootstrap from
//! a full database snapshot.

pub mod apply;
pub mod auto;
pub mod engine;
pub mod merge;
pub mod transport;
pub mod wire;

pub use apply::{ApplyOptions, ApplyOutcome, apply_remote};
pub use auto::{Debouncer, Periodic, should_pull_on_start};
pub use engine::{
    BootstrapReport, LocalSyncStatus, PullReport, PushReport, SyncConfig, SyncEngine, SyncReport,
    SyncStatus, conflicts, local_status, resolve_conflicts,
};
pub use transport::{MemoryServer, SyncTransport, TransportError};
pub use wire::{
    PullResponse, PushRequest, PushResponse, RemoteEvent, ServerStatus, SnapshotPayload,
    SyncEvent, UpdateDiff,
};
