//! Relationships between issues and the outside world: linked files and
//! blocking dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::issue::ParseEnumError;

/// Why a file is linked to an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    #[default]
    Implementation,
    Test,
    Reference,
    Config,
}

impl FileRole {
    pub const ALL: [Self; 4] = [
        Self::Implementation,
        Self::Test,
        Self::Reference,
        Self::Config,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Implementation => "implementation",
            Self::Test => "test",
            Self::Reference => "reference",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "implementation" | "impl" | "src" => Ok(Self::Implementation),
            "test" | "tests" => Ok(Self::Test),
            "reference" | "ref" | "docs" => Ok(Self::Reference),
            "config" | "cfg" => Ok(Self::Config),
            _ => Err(ParseEnumError {
                expected: "file role",
                got: s.to_string(),
            }),
        }
    }
}

/// Deterministic id for an edge-like entity, so the same relation gets the
/// same id on every device.
#[must_use]
pub fn edge_id(prefix: &str, left: &str, right: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left.as_bytes());
    hasher.update(b"\0");
    hasher.update(right.as_bytes());
    let hex = hasher.finalize().to_hex();
    format!("{prefix}{}", &hex[..10])
}

/// A file linked to an issue. Unique per `(issue_id, file_path)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueFile {
    pub id: String,
    pub issue_id: String,
    pub file_path: String,
    #[serde(default)]
    pub role: FileRole,
    #[serde(default)]
    pub sha_at_link: String,
    pub linked_at: DateTime<Utc>,
}

impl IssueFile {
    #[must_use]
    pub fn new(
        issue_id: &str,
        file_path: &str,
        role: FileRole,
        sha_at_link: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: edge_id("if-", issue_id, file_path),
            issue_id: issue_id.to_string(),
            file_path: file_path.to_string(),
            role,
            sha_at_link,
            linked_at: now,
        }
    }
}

/// Directed blocking edge: `blocked_id` waits on `blocker_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: String,
    pub blocked_id: String,
    pub blocker_id: String,
    pub created_at: DateTime<Utc>,
}

impl Dependency {
    #[must_use]
    pub fn new(blocked_id: &str, blocker_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: edge_id("dp-", blocked_id, blocker_id),
            blocked_id: blocked_id.to_string(),
            blocker_id: blocker_id.to_string(),
            created_at: now,
        }
    }
}
