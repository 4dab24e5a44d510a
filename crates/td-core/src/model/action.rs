//! Action log model: the tagged entity payload shared by mutations, undo and
//! sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

use super::activity::{Comment, GitSnapshot, Handoff, Log};
use super::issue::{Issue, ParseEnumError};
use super::links::{Dependency, IssueFile};
use super::planning::{Board, BoardPosition, Note, WorkSession, WorkSessionIssue};

/// Every entity kind that can appear in the action log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Issue,
    Log,
    Handoff,
    Comment,
    IssueFile,
    Dependency,
    GitSnapshot,
    WorkSession,
    WorkSessionIssue,
    Board,
    BoardPosition,
    Note,
}

impl EntityType {
    pub const ALL: [Self; 12] = [
        Self::Issue,
        Self::Log,
        Self::Handoff,
        Self::Comment,
        Self::IssueFile,
        Self::Dependency,
        Self::GitSnapshot,
        Self::WorkSession,
        Self::WorkSessionIssue,
        Self::Board,
        Self::BoardPosition,
        Self::Note,
    ];

    /// Canonical wire and action-log name (the plural table name).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Issue => "issues",
            Self::Log => "logs",
            Self::Handoff => "handoffs",
            Self::Comment => "comments",
            Self::IssueFile => "issue_files",
            Self::Dependency => "issue_dependencies",
            Self::GitSnapshot => "git_snapshots",
            Self::WorkSession => "work_sessions",
            Self::WorkSessionIssue => "work_session_issues",
            Self::Board => "boards",
            Self::BoardPosition => "board_issue_positions",
            Self::Note => "notes",
        }
    }

    /// Short singular label used in error messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::Log => "log",
            Self::Handoff => "handoff",
            Self::Comment => "comment",
            Self::IssueFile => "file link",
            Self::Dependency => "dependency",
            Self::GitSnapshot => "git snapshot",
            Self::WorkSession => "work session",
            Self::WorkSessionIssue => "work session issue",
            Self::Board => "board",
            Self::BoardPosition => "board position",
            Self::Note => "note",
        }
    }

    /// Whether deleting this entity keeps a tombstone row (`deleted_at`).
    #[must_use]
    pub const fn soft_deletes(self) -> bool {
        matches!(
            self,
            Self::Issue | Self::Comment | Self::Board | Self::BoardPosition | Self::Note
        )
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ParseEnumError;

    /// Accepts canonical plural names and the legacy singular spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "issues" | "issue" => Ok(Self::Issue),
            "logs" | "log" => Ok(Self::Log),
            "handoffs" | "handoff" => Ok(Self::Handoff),
            "comments" | "comment" => Ok(Self::Comment),
            "issue_files" | "issue_file" | "files" | "file" => Ok(Self::IssueFile),
            "issue_dependencies" | "issue_dependency" | "dependencies" | "dependency" | "deps"
            | "dep" => Ok(Self::Dependency),
            "git_snapshots" | "git_snapshot" => Ok(Self::GitSnapshot),
            "work_sessions" | "work_session" => Ok(Self::WorkSession),
            "work_session_issues" | "work_session_issue" => Ok(Self::WorkSessionIssue),
            "boards" | "board" => Ok(Self::Board),
            "board_issue_positions" | "board_issue_position" | "board_positions"
            | "board_position" => Ok(Self::BoardPosition),
            "notes" | "note" => Ok(Self::Note),
            _ => Err(ParseEnumError {
                expected: "entity type",
                got: s.to_string(),
            }),
        }
    }
}

/// What an action-log row did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Update,
    Delete,
    Restore,
    Start,
    Review,
    Approve,
    Reject,
    Block,
    Unblock,
    Close,
    Reopen,
}

impl ActionType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::Start => "start",
            Self::Review => "review",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Block => "block",
            Self::Unblock => "unblock",
            Self::Close => "close",
            Self::Reopen => "reopen",
        }
    }

    /// Workflow verbs change `status`; they travel as updates on the wire.
    #[must_use]
    pub const fn is_transition(self) -> bool {
        matches!(
            self,
            Self::Start
                | Self::Review
                | Self::Approve
                | Self::Reject
                | Self::Block
                | Self::Unblock
                | Self::Close
                | Self::Reopen
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" | "soft_delete" => Ok(Self::Delete),
            "restore" => Ok(Self::Restore),
            "start" => Ok(Self::Start),
            "review" => Ok(Self::Review),
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            "block" => Ok(Self::Block),
            "unblock" => Ok(Self::Unblock),
            "close" => Ok(Self::Close),
            "reopen" => Ok(Self::Reopen),
            _ => Err(ParseEnumError {
                expected: "action type",
                got: s.to_string(),
            }),
        }
    }
}

/// Full state of one entity, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRecord {
    Issue(Issue),
    Log(Log),
    Handoff(Handoff),
    Comment(Comment),
    IssueFile(IssueFile),
    Dependency(Dependency),
    GitSnapshot(GitSnapshot),
    WorkSession(WorkSession),
    WorkSessionIssue(WorkSessionIssue),
    Board(Board),
    BoardPosition(BoardPosition),
    Note(Note),
}

impl EntityRecord {
    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::Issue(_) => EntityType::Issue,
            Self::Log(_) => EntityType::Log,
            Self::Handoff(_) => EntityType::Handoff,
            Self::Comment(_) => EntityType::Comment,
            Self::IssueFile(_) => EntityType::IssueFile,
            Self::Dependency(_) => EntityType::Dependency,
            Self::GitSnapshot(_) => EntityType::GitSnapshot,
            Self::WorkSession(_) => EntityType::WorkSession,
            Self::WorkSessionIssue(_) => EntityType::WorkSessionIssue,
            Self::Board(_) => EntityType::Board,
            Self::BoardPosition(_) => EntityType::BoardPosition,
            Self::Note(_) => EntityType::Note,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Issue(e) => &e.id,
            Self::Log(e) => &e.id,
            Self::Handoff(e) => &e.id,
            Self::Comment(e) => &e.id,
            Self::IssueFile(e) => &e.id,
            Self::Dependency(e) => &e.id,
            Self::GitSnapshot(e) => &e.id,
            Self::WorkSession(e) => &e.id,
            Self::WorkSessionIssue(e) => &e.id,
            Self::Board(e) => &e.id,
            Self::BoardPosition(e) => &e.id,
            Self::Note(e) => &e.id,
        }
    }

    /// Serialize the inner entity (without the tag).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        match self {
            Self::Issue(e) => serde_json::to_value(e),
            Self::Log(e) => serde_json::to_value(e),
            Self::Handoff(e) => serde_json::to_value(e),
            Self::Comment(e) => serde_json::to_value(e),
            Self::IssueFile(e) => serde_json::to_value(e),
            Self::Dependency(e) => serde_json::to_value(e),
            Self::GitSnapshot(e) => serde_json::to_value(e),
            Self::WorkSession(e) => serde_json::to_value(e),
            Self::WorkSessionIssue(e) => serde_json::to_value(e),
            Self::Board(e) => serde_json::to_value(e),
            Self::BoardPosition(e) => serde_json::to_value(e),
            Self::Note(e) => serde_json::to_value(e),
        }
    }

    /// Decode an untagged entity JSON value for the given kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not match the entity schema.
    pub fn from_json(entity_type: EntityType, value: Value) -> serde_json::Result<Self> {
        Ok(match entity_type {
            EntityType::Issue => Self::Issue(serde_json::from_value(value)?),
            EntityType::Log => Self::Log(serde_json::from_value(value)?),
            EntityType::Handoff => Self::Handoff(serde_json::from_value(value)?),
            EntityType::Comment => Self::Comment(serde_json::from_value(value)?),
            EntityType::IssueFile => Self::IssueFile(serde_json::from_value(value)?),
            EntityType::Dependency => Self::Dependency(serde_json::from_value(value)?),
            EntityType::GitSnapshot => Self::GitSnapshot(serde_json::from_value(value)?),
            EntityType::WorkSession => Self::WorkSession(serde_json::from_value(value)?),
            EntityType::WorkSessionIssue => {
                Self::WorkSessionIssue(serde_json::from_value(value)?)
            }
            EntityType::Board => Self::Board(serde_json::from_value(value)?),
            EntityType::BoardPosition => Self::BoardPosition(serde_json::from_value(value)?),
            EntityType::Note => Self::Note(serde_json::from_value(value)?),
        })
    }

    /// Issue this record hangs off, if any. Used for session history and
    /// webhook fan-out.
    #[must_use]
    pub fn issue_id(&self) -> Option<&str> {
        match self {
            Self::Issue(e) => Some(&e.id),
            Self::Log(e) => Some(&e.issue_id),
            Self::Handoff(e) => Some(&e.issue_id),
            Self::Comment(e) => Some(&e.issue_id),
            Self::IssueFile(e) => Some(&e.issue_id),
            Self::Dependency(e) => Some(&e.blocked_id),
            Self::GitSnapshot(e) => e.issue_id.as_deref(),
            Self::WorkSessionIssue(e) => Some(&e.issue_id),
            Self::BoardPosition(e) => Some(&e.issue_id),
            Self::WorkSession(_) | Self::Board(_) | Self::Note(_) => None,
        }
    }
}

/// One append-only action-log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEntry {
    pub id: i64,
    pub session_id: String,
    pub action_type: ActionType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub previous_data: Option<Value>,
    pub new_data: Option<Value>,
    pub timestamp: DateTime<Utc>,
    /// Set on inverse entries written by undo.
    pub undo_of: Option<i64>,
}

impl ActionEntry {
    /// Decode `previous_data` into a typed record.
    ///
    /// # Errors
    ///
    /// Returns an error when the stored JSON no longer matches the schema.
    pub fn previous_record(&self) -> serde_json::Result<Option<EntityRecord>> {
        self.previous_data
            .clone()
            .map(|v| EntityRecord::from_json(self.entity_type, v))
            .transpose()
    }

    /// Decode `new_data` into a typed record.
    ///
    /// # Errors
    ///
    /// Returns an error when the stored JSON no longer matches the schema.
    pub fn new_record(&self) -> serde_json::Result<Option<EntityRecord>> {
        self.new_data
            .clone()
            .map(|v| EntityRecord::from_json(self.entity_type, v))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_accepts_singular_and_plural() {
        for et in EntityType::ALL {
            assert_eq!(et.as_str().parse::<EntityType>().unwrap(), et);
        }
        assert_eq!("issue".parse::<EntityType>().unwrap(), EntityType::Issue);
        assert_eq!("Handoff".parse::<EntityType>().unwrap(), EntityType::Handoff);
        assert_eq!(
            "board_position".parse::<EntityType>().unwrap(),
            EntityType::BoardPosition
        );
        assert!("widgets".parse::<EntityType>().is_err());
    }

    #[test]
    fn soft_delete_maps_to_delete() {
        assert_eq!("soft_delete".parse::<ActionType>().unwrap(), ActionType::Delete);
    }

    #[test]
    fn record_json_round_trip_preserves_kind() {
        let issue = Issue::new("td-a1b2c3", "Fix login", Utc::now());
        let record = EntityRecord::Issue(issue.clone());
        let json = record.to_json().unwrap();
        let back = EntityRecord::from_json(EntityType::Issue, json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.id(), "td-a1b2c3");
        assert_eq!(back.issue_id(), Some("td-a1b2c3"));
    }

    #[test]
    fn transitions_are_flagged() {
        assert!(ActionType::Approve.is_transition());
        assert!(!ActionType::Update.is_transition());
        assert!(!ActionType::Create.is_transition());
    }
}
