pub mod auth;
pub mod board;
pub mod comment;
pub mod completions;
pub mod context;
pub mod create;
pub mod delete;
pub mod dep;
pub mod feature;
pub mod focus;
pub mod handoff;
pub mod init;
pub mod link;
pub mod list;
pub mod log;
pub mod monitor;
pub mod note;
pub mod query;
pub mod session;
pub mod show;
pub mod silos;
pub mod sync;
pub mod undo;
pub mod update;
pub mod workflow;
pub mod ws;

use crate::app::App;
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt::Display;
use std::io::{self, Write};
use std::str::FromStr;
use td_core::TdError;
use td_core::model::Issue;

/// Parse a user-supplied enum value, reporting `invalid_input` on failure.
pub fn parse_value<T>(raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>()
        .map_err(|err| TdError::invalid(err.to_string()).into())
}

/// Parse an optional enum value.
pub fn parse_opt<T>(raw: Option<&str>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    raw.map(parse_value).transpose()
}

/// Accepts RFC 3339 timestamps and `YYYY-MM-DD` (midnight UTC).
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| {
            TdError::invalid(format!("invalid date '{raw}': expected YYYY-MM-DD or RFC 3339"))
                .into()
        })
}

/// Split comma-separated values and flatten repeated flags.
pub fn split_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Explicit id, else the focused issue.
pub fn target_issue(app: &App, explicit: Option<&str>) -> Result<String> {
    match explicit {
        Some(raw) => App::issue_id(raw),
        None => app
            .project
            .focus
            .clone()
            .ok_or_else(|| {
                TdError::invalid(
                    "no issue given and nothing focused; pass an id or run `td focus <id>`",
                )
                .into()
            }),
    }
}

/// One compact issue line: `td-a1b2c3  P1  in_progress  task  Title [labels]`.
pub fn write_issue_row(w: &mut dyn Write, issue: &Issue) -> io::Result<()> {
    write!(
        w,
        "{:<10} {} {:<11} {:<7} {}",
        issue.id,
        issue.priority.as_str(),
        issue.status.as_str(),
        issue.issue_type.as_str(),
        issue.title
    )?;
    if !issue.labels.is_empty() {
        write!(w, " [{}]", issue.labels.join(","))?;
    }
    writeln!(w)
}

pub fn write_issue_rows(w: &mut dyn Write, issues: &[Issue]) -> io::Result<()> {
    if issues.is_empty() {
        return writeln!(w, "(no issues)");
    }
    for issue in issues {
        write_issue_row(w, issue)?;
    }
    Ok(())
}

pub fn write_issue_table(w: &mut dyn Write, heading: &str, issues: &[Issue]) -> io::Result<()> {
    crate::output::pretty_section(w, &format!("{heading} ({})", issues.len()))?;
    write_issue_rows(w, issues)
}
