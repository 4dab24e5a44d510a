//! Knowledge-silo analysis over linked files.

use crate::db::{Store, links};
use crate::error::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Bucket a critical-silo ratio.
    #[must_use]
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 0.5 {
            Self::Critical
        } else if ratio >= 0.3 {
            Self::High
        } else if ratio >= 0.1 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSilo {
    pub path: String,
    pub authors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiloReport {
    /// Files with at least one implementer.
    pub total_files: usize,
    /// Files with exactly one implementer.
    pub critical: Vec<FileSilo>,
    pub critical_ratio: f64,
    pub severity: Severity,
}

/// Build the report from `(path, implementer)` pairs. Links whose issue has
/// no implementer do not count as authorship.
#[must_use]
pub fn analyze<I>(links: I) -> SiloReport
where
    I: IntoIterator<Item = (String, Option<String>)>,
{
    let mut authors: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (path, session) in links {
        let entry = authors.entry(path).or_default();
        if let Some(session) = session {
            entry.insert(session);
        }
    }
    authors.retain(|_, set| !set.is_empty());

    let critical: Vec<FileSilo> = authors
        .iter()
        .filter(|(_, set)| set.len() == 1)
        .map(|(path, set)| FileSilo {
            path: path.clone(),
            authors: set.iter().cloned().collect(),
        })
        .collect();
    let total_files = authors.len();
    #[allow(clippy::cast_precision_loss)]
    let critical_ratio = if total_files == 0 {
        0.0
    } else {
        critical.len() as f64 / total_files as f64
    };
    SiloReport {
        total_files,
        critical,
        critical_ratio,
        severity: Severity::from_ratio(critical_ratio),
    }
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn silo_report(store: &Store) -> Result<SiloReport> {
    let rows = store.read(links::file_authors)?;
    Ok(analyze(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(path: &str, who: Option<&str>) -> (String, Option<String>) {
        (path.to_string(), who.map(str::to_string))
    }

    #[test]
    fn single_author_file_is_critical() {
        let report = analyze([link("src/a.rs", Some("s1"))]);
        assert_eq!(report.total_files, 1);
        assert_eq!(report.critical.len(), 1);
        assert_eq!(report.severity, Severity::Critical);
    }

    #[test]
    fn ratio_thresholds() {
        assert_eq!(Severity::from_ratio(0.3), Severity::High);
        assert_eq!(Severity::from_ratio(0.5), Severity::Critical);
        assert_eq!(Severity::from_ratio(0.1), Severity::Medium);
        assert_eq!(Severity::from_ratio(0.09), Severity::Low);
    }

    #[test]
    fn shared_files_dilute_the_ratio() {
        let mut rows = vec![
            link("a.rs", Some("s1")),
            link("a.rs", Some("s1")),
            link("unowned.rs", None),
        ];
        for i in 0..9 {
            let path = format!("shared{i}.rs");
            rows.push(link(&path, Some("s1")));
            rows.push(link(&path, Some("s2")));
        }
        let report = analyze(rows);
        assert_eq!(report.total_files, 10);
        assert_eq!(report.critical.len(), 1);
        assert_eq!(report.critical[0].path, "a.rs");
        assert!((report.critical_ratio - 0.1).abs() < f64::EPSILON);
        assert_eq!(report.severity, Severity::Medium);
    }

    #[test]
    fn empty_store_is_low() {
        let store = Store::open_in_memory().unwrap();
        let report = silo_report(&store).unwrap();
        assert_eq!(report.total_files, 0);
        assert_eq!(report.severity, Severity::Low);
    }
}
