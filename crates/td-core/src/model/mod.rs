//! Entity types persisted by the store.

pub mod action;
pub mod activity;
pub mod issue;
pub mod links;
pub mod planning;

pub use action::{ActionEntry, ActionType, EntityRecord, EntityType};
pub use activity::{Comment, GitSnapshot, Handoff, Log, LogType};
pub use issue::{Issue, IssuePatch, IssueType, ParseEnumError, Priority, Status};
pub use links::{Dependency, FileRole, IssueFile};
pub use planning::{Board, BoardPosition, LogFanout, Note, WorkSession, WorkSessionIssue};
