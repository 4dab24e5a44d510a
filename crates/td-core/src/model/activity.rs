//! Append-only activity attached to issues: logs, handoffs, comments and the
//! git snapshots they reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::issue::ParseEnumError;

/// Kind of progress log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    #[default]
    Progress,
    Blocker,
    Decision,
    Hypothesis,
    Tried,
    Result,
}

impl LogType {
    pub const ALL: [Self; 6] = [
        Self::Progress,
        Self::Blocker,
        Self::Decision,
        Self::Hypothesis,
        Self::Tried,
        Self::Result,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Blocker => "blocker",
            Self::Decision => "decision",
            Self::Hypothesis => "hypothesis",
            Self::Tried => "tried",
            Self::Result => "result",
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "progress" | "note" => Ok(Self::Progress),
            "blocker" | "blocked" => Ok(Self::Blocker),
            "decision" => Ok(Self::Decision),
            "hypothesis" => Ok(Self::Hypothesis),
            "tried" | "attempt" => Ok(Self::Tried),
            "result" => Ok(Self::Result),
            _ => Err(ParseEnumError {
                expected: "log type",
                got: s.to_string(),
            }),
        }
    }
}

/// A progress entry. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub id: String,
    pub issue_id: String,
    pub session_id: String,
    #[serde(default)]
    pub work_session_id: Option<String>,
    #[serde(rename = "type", default)]
    pub log_type: LogType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Structured state captured before a session stops or submits for review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handoff {
    pub id: String,
    pub issue_id: String,
    pub session_id: String,
    #[serde(default)]
    pub done: Vec<String>,
    #[serde(default)]
    pub remaining: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub uncertain: Vec<String>,
    #[serde(default)]
    pub git_snapshot_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Handoff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
            && self.remaining.is_empty()
            && self.decisions.is_empty()
            && self.uncertain.is_empty()
    }
}

/// Free-form discussion attached to an issue. Soft-deletable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub issue_id: String,
    pub session_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Repository state captured at `start` and `handoff`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSnapshot {
    pub id: String,
    #[serde(default)]
    pub issue_id: Option<String>,
    pub commit_sha: String,
    pub branch: String,
    #[serde(default)]
    pub dirty_files: u32,
    #[serde(default)]
    pub untracked_files: u32,
    pub captured_at: DateTime<Utc>,
}

impl GitSnapshot {
    #[must_use]
    pub fn short_sha(&self) -> &str {
        self.commit_sha.get(..7).unwrap_or(&self.commit_sha)
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty_files > 0 || self.untracked_files > 0
    }
}
