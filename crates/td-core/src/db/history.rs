//! Per-issue session history: which sessions touched an issue and how.

use crate::error::Result;
use crate::time;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;

/// History actions that count as taking part in the implementation.
pub const IMPLEMENTATION_ACTIONS: [&str; 5] = ["start", "log", "handoff", "review", "unblock"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub issue_id: String,
    pub session_id: String,
    pub action: String,
    pub at: DateTime<Utc>,
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn record(
    conn: &Connection,
    issue_id: &str,
    session_id: &str,
    action: &str,
    at: &DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO issue_session_history (issue_id, session_id, action, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![issue_id, session_id, action, time::to_db(at)],
    )?;
    Ok(())
}

/// Oldest first.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn for_issue(conn: &Connection, issue_id: &str) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT issue_id, session_id, action, created_at FROM issue_session_history
         WHERE issue_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([issue_id], |row| {
        Ok(HistoryEntry {
            issue_id: row.get("issue_id")?,
            session_id: row.get("session_id")?,
            action: row.get("action")?,
            at: time::column(row, "created_at")?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Whether `session_id` took part in implementing `issue_id` according to
/// the history table.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn was_involved(conn: &Connection, issue_id: &str, session_id: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM issue_session_history
             WHERE issue_id = ?1 AND session_id = ?2
               AND action IN ('start', 'log', 'handoff', 'review', 'unblock'))",
        params![issue_id, session_id],
        |row| row.get(0),
    )?)
}

/// Issue ids `session_id` has implementation history on.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn involved_issue_ids(
    conn: &Connection,
    session_id: &str,
) -> Result<std::collections::HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT issue_id FROM issue_session_history
         WHERE session_id = ?1
           AND action IN ('start', 'log', 'handoff', 'review', 'unblock')",
    )?;
    let rows = stmt.query_map([session_id], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}
