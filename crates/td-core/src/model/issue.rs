use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The five issue kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IssueType {
    Bug,
    Feature,
    #[default]
    Task,
    Epic,
    Chore,
}

impl IssueType {
    pub const ALL: [Self; 5] = [Self::Bug, Self::Feature, Self::Task, Self::Epic, Self::Chore];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Task => "task",
            Self::Epic => "epic",
            Self::Chore => "chore",
        }
    }
}

/// Workflow status. Only the workflow engine may move an issue between these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Open,
    InProgress,
    Blocked,
    InReview,
    Closed,
}

impl Status {
    pub const ALL: [Self; 5] = [
        Self::Open,
        Self::InProgress,
        Self::Blocked,
        Self::InReview,
        Self::Closed,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::InReview => "in_review",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Priority from P0 (drop everything) to P4 (someday).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum Priority {
    P0,
    P1,
    #[default]
    P2,
    P3,
    P4,
}

impl Priority {
    pub const ALL: [Self; 5] = [Self::P0, Self::P1, Self::P2, Self::P3, Self::P4];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
            Self::P4 => "P4",
        }
    }
}

/// Allowed story-point values. Zero means "unestimated".
pub const VALID_POINTS: [u8; 8] = [0, 1, 2, 3, 5, 8, 13, 21];

#[must_use]
pub fn is_valid_points(points: u8) -> bool {
    VALID_POINTS.contains(&points)
}

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

fn normalize(input: &str) -> String {
    input.trim().to_ascii_lowercase().replace([' ', '-'], "_")
}

impl FromStr for IssueType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "bug" | "defect" => Ok(Self::Bug),
            "feature" | "feat" | "story" | "enhancement" => Ok(Self::Feature),
            "task" => Ok(Self::Task),
            "epic" => Ok(Self::Epic),
            "chore" | "maintenance" => Ok(Self::Chore),
            _ => Err(ParseEnumError {
                expected: "type",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for Status {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "open" | "todo" | "new" => Ok(Self::Open),
            "in_progress" | "inprogress" | "wip" | "doing" | "started" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "in_review" | "inreview" | "review" | "reviewing" => Ok(Self::InReview),
            "closed" | "done" | "resolved" | "complete" | "completed" => Ok(Self::Closed),
            _ => Err(ParseEnumError {
                expected: "status",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "p0" | "0" | "critical" | "urgent" | "highest" => Ok(Self::P0),
            "p1" | "1" | "high" => Ok(Self::P1),
            "p2" | "2" | "medium" | "normal" => Ok(Self::P2),
            "p3" | "3" | "low" => Ok(Self::P3),
            "p4" | "4" | "lowest" | "trivial" | "someday" => Ok(Self::P4),
            _ => Err(ParseEnumError {
                expected: "priority",
                got: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalise labels: trim, lowercase, drop empties, de-duplicate, sort.
#[must_use]
pub fn normalize_labels<I, S>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = labels
        .into_iter()
        .flat_map(|raw| {
            raw.as_ref()
                .split(',')
                .map(|l| l.trim().to_ascii_lowercase())
                .collect::<Vec<_>>()
        })
        .filter(|l| !l.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// A tracked unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance: String,
    #[serde(rename = "type", default)]
    pub issue_type: IssueType,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub points: u8,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub creator_session: Option<String>,
    #[serde(default)]
    pub implementer_session: Option<String>,
    #[serde(default)]
    pub reviewer_session: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub minor: bool,
    #[serde(default)]
    pub sprint: String,
    #[serde(default)]
    pub created_branch: String,
    #[serde(default)]
    pub defer_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
}

impl Issue {
    /// A fresh `open` issue stamped at `now`.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            acceptance: String::new(),
            issue_type: IssueType::Task,
            status: Status::Open,
            priority: Priority::P2,
            points: 0,
            labels: Vec::new(),
            parent_id: None,
            creator_session: None,
            implementer_session: None,
            reviewer_session: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            deleted_at: None,
            minor: false,
            sprint: String::new(),
            created_branch: String::new(),
            defer_at: None,
            due_at: None,
        }
    }

    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Fields settable through `update`. `None` means "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub acceptance: Option<String>,
    pub issue_type: Option<IssueType>,
    pub priority: Option<Priority>,
    pub points: Option<u8>,
    pub labels: Option<Vec<String>>,
    pub add_labels: Vec<String>,
    pub remove_labels: Vec<String>,
    /// `Some(None)` clears the parent.
    pub parent_id: Option<Option<String>>,
    pub minor: Option<bool>,
    pub sprint: Option<String>,
    pub defer_at: Option<Option<DateTime<Utc>>>,
    pub due_at: Option<Option<DateTime<Utc>>>,
}

impl IssuePatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_case_insensitively_and_synonyms() {
        assert_eq!("OPEN".parse::<Status>().unwrap(), Status::Open);
        assert_eq!("in-review".parse::<Status>().unwrap(), Status::InReview);
        assert_eq!("In Progress".parse::<Status>().unwrap(), Status::InProgress);
        assert_eq!("done".parse::<Status>().unwrap(), Status::Closed);
        assert!("paused".parse::<Status>().is_err());
    }

    #[test]
    fn priority_synonyms_map_to_canonical() {
        assert_eq!("critical".parse::<Priority>().unwrap(), Priority::P0);
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::P1);
        assert_eq!("p1".parse::<Priority>().unwrap(), Priority::P1);
        assert_eq!("4".parse::<Priority>().unwrap(), Priority::P4);
        assert!(Priority::P0 < Priority::P3);
    }

    #[test]
    fn type_parses_aliases() {
        assert_eq!("Story".parse::<IssueType>().unwrap(), IssueType::Feature);
        assert_eq!("EPIC".parse::<IssueType>().unwrap(), IssueType::Epic);
    }

    #[test]
    fn labels_normalize_to_sorted_unique_set() {
        let labels = normalize_labels(["Backend, api", "api", " ", "UI"]);
        assert_eq!(labels, vec!["api", "backend", "ui"]);
    }

    #[test]
    fn fibonacci_points_only() {
        assert!(is_valid_points(0));
        assert!(is_valid_points(13));
        assert!(!is_valid_points(4));
        assert!(!is_valid_points(34));
    }

    #[test]
    fn issue_json_uses_type_key() {
        let issue = Issue::new("td-abc123", "x", Utc::now());
        let value = serde_json::to_value(&issue).unwrap();
        assert_eq!(value["type"], "task");
        assert_eq!(value["status"], "open");
        assert_eq!(value["priority"], "P2");
    }
}
