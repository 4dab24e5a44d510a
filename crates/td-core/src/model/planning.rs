//! Grouping entities: work sessions, boards and notes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::issue::ParseEnumError;
use super::links::edge_id;

/// Where a log written through a work session is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFanout {
    /// Copy to every tagged issue that is not closed.
    #[default]
    Tagged,
    /// Only the focused issue.
    Focused,
    /// Work-session logs are not copied to issues.
    Off,
}

impl LogFanout {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tagged => "tagged",
            Self::Focused => "focused",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for LogFanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFanout {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tagged" | "all" => Ok(Self::Tagged),
            "focused" | "focus" => Ok(Self::Focused),
            "off" | "none" => Ok(Self::Off),
            _ => Err(ParseEnumError {
                expected: "log fanout",
                got: s.to_string(),
            }),
        }
    }
}

/// A container for issues an agent tackles together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSession {
    pub id: String,
    pub name: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub log_fanout: LogFanout,
}

/// Membership of an issue in a work session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSessionIssue {
    pub id: String,
    pub work_session_id: String,
    pub issue_id: String,
    pub tagged_at: DateTime<Utc>,
}

impl WorkSessionIssue {
    #[must_use]
    pub fn new(work_session_id: &str, issue_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: edge_id("wi-", work_session_id, issue_id),
            work_session_id: work_session_id.to_string(),
            issue_id: issue_id.to_string(),
            tagged_at: now,
        }
    }
}

/// A named TDQ query with optional manual ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub id: String,
    pub name: String,
    pub query: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Sparse manual position of an issue on a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardPosition {
    pub id: String,
    pub board_id: String,
    pub issue_id: String,
    pub position: i64,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl BoardPosition {
    #[must_use]
    pub fn new(board_id: &str, issue_id: &str, position: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: edge_id("bp-", board_id, issue_id),
            board_id: board_id.to_string(),
            issue_id: issue_id.to_string(),
            position,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Project-level free-form note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}
