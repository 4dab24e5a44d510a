//! Logs, handoffs, comments and git snapshots.

use crate::error::Result;
use crate::model::{Comment, GitSnapshot, Handoff, Log, LogType};
use crate::time;
use rusqlite::{Connection, OptionalExtension, Row, params};

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<Log> {
    let kind: String = row.get("type")?;
    Ok(Log {
        id: row.get("id")?,
        issue_id: row.get("issue_id")?,
        session_id: row.get("session_id")?,
        work_session_id: row.get("work_session_id")?,
        log_type: kind.parse().unwrap_or(LogType::Progress),
        message: row.get("message")?,
        timestamp: time::column(row, "timestamp")?,
    })
}

const LOG_COLUMNS: &str = "id, issue_id, session_id, work_session_id, type, message, timestamp";

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn upsert_log(conn: &Connection, log: &Log) -> Result<()> {
    conn.execute(
        "INSERT INTO logs (id, issue_id, session_id, work_session_id, type, message, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
             issue_id = excluded.issue_id,
             session_id = excluded.session_id,
             work_session_id = excluded.work_session_id,
             type = excluded.type,
             message = excluded.message,
             timestamp = excluded.timestamp",
        params![
            log.id,
            log.issue_id,
            log.session_id,
            log.work_session_id,
            log.log_type.as_str(),
            log.message,
            time::to_db(&log.timestamp),
        ],
    )?;
    Ok(())
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn find_log(conn: &Connection, id: &str) -> Result<Option<Log>> {
    let sql = format!("SELECT {LOG_COLUMNS} FROM logs WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], log_from_row).optional()?)
}

/// Logs for an issue, oldest first. `limit` keeps the most recent entries.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn logs_for_issue(conn: &Connection, issue_id: &str, limit: Option<usize>) -> Result<Vec<Log>> {
    let sql = format!(
        "SELECT * FROM (SELECT {LOG_COLUMNS} FROM logs WHERE issue_id = ?1
             ORDER BY timestamp DESC, id DESC LIMIT ?2)
         ORDER BY timestamp ASC, id ASC"
    );
    let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![issue_id, limit], log_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Most recent logs across all issues, newest first.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn recent_logs(conn: &Connection, limit: usize) -> Result<Vec<Log>> {
    let sql = format!("SELECT {LOG_COLUMNS} FROM logs ORDER BY timestamp DESC, id DESC LIMIT ?1");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([i64::try_from(limit).unwrap_or(i64::MAX)], log_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn delete_log(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM logs WHERE id = ?1", [id])?;
    Ok(())
}

fn string_list(row: &Row<'_>, name: &str) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(name)?;
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

fn list_to_db(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn handoff_from_row(row: &Row<'_>) -> rusqlite::Result<Handoff> {
    Ok(Handoff {
        id: row.get("id")?,
        issue_id: row.get("issue_id")?,
        session_id: row.get("session_id")?,
        done: string_list(row, "done")?,
        remaining: string_list(row, "remaining")?,
        decisions: string_list(row, "decisions")?,
        uncertain: string_list(row, "uncertain")?,
        git_snapshot_id: row.get("git_snapshot_id")?,
        timestamp: time::column(row, "timestamp")?,
    })
}

const HANDOFF_COLUMNS: &str =
    "id, issue_id, session_id, done, remaining, decisions, uncertain, git_snapshot_id, timestamp";

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn upsert_handoff(conn: &Connection, handoff: &Handoff) -> Result<()> {
    conn.execute(
        "INSERT INTO handoffs (id, issue_id, session_id, done, remaining, decisions, uncertain,
             git_snapshot_id, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
             issue_id = excluded.issue_id,
             session_id = excluded.session_id,
             done = excluded.done,
             remaining = excluded.remaining,
             decisions = excluded.decisions,
             uncertain = excluded.uncertain,
             git_snapshot_id = excluded.git_snapshot_id,
             timestamp = excluded.timestamp",
        params![
            handoff.id,
            handoff.issue_id,
            handoff.session_id,
            list_to_db(&handoff.done),
            list_to_db(&handoff.remaining),
            list_to_db(&handoff.decisions),
            list_to_db(&handoff.uncertain),
            handoff.git_snapshot_id,
            time::to_db(&handoff.timestamp),
        ],
    )?;
    Ok(())
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn find_handoff(conn: &Connection, id: &str) -> Result<Option<Handoff>> {
    let sql = format!("SELECT {HANDOFF_COLUMNS} FROM handoffs WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], handoff_from_row).optional()?)
}

/// All handoffs for an issue, oldest first.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn handoffs_for_issue(conn: &Connection, issue_id: &str) -> Result<Vec<Handoff>> {
    let sql = format!(
        "SELECT {HANDOFF_COLUMNS} FROM handoffs WHERE issue_id = ?1 ORDER BY timestamp ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([issue_id], handoff_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn latest_handoff(conn: &Connection, issue_id: &str) -> Result<Option<Handoff>> {
    let sql = format!(
        "SELECT {HANDOFF_COLUMNS} FROM handoffs WHERE issue_id = ?1
         ORDER BY timestamp DESC, id DESC LIMIT 1"
    );
    Ok(conn.query_row(&sql, [issue_id], handoff_from_row).optional()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn has_handoff(conn: &Connection, issue_id: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM handoffs WHERE issue_id = ?1)",
        [issue_id],
        |row| row.get(0),
    )?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn delete_handoff(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM handoffs WHERE id = ?1", [id])?;
    Ok(())
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get("id")?,
        issue_id: row.get("issue_id")?,
        session_id: row.get("session_id")?,
        text: row.get("text")?,
        created_at: time::column(row, "created_at")?,
        deleted_at: time::opt_column(row, "deleted_at")?,
    })
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn upsert_comment(conn: &Connection, comment: &Comment) -> Result<()> {
    conn.execute(
        "INSERT INTO comments (id, issue_id, session_id, text, created_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             issue_id = excluded.issue_id,
             session_id = excluded.session_id,
             text = excluded.text,
             created_at = excluded.created_at,
             deleted_at = excluded.deleted_at",
        params![
            comment.id,
            comment.issue_id,
            comment.session_id,
            comment.text,
            time::to_db(&comment.created_at),
            time::opt_to_db(comment.deleted_at.as_ref()),
        ],
    )?;
    Ok(())
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn find_comment(conn: &Connection, id: &str) -> Result<Option<Comment>> {
    Ok(conn
        .query_row(
            "SELECT id, issue_id, session_id, text, created_at, deleted_at
             FROM comments WHERE id = ?1",
            [id],
            comment_from_row,
        )
        .optional()?)
}

/// Live comments on an issue, oldest first.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn comments_for_issue(conn: &Connection, issue_id: &str) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT id, issue_id, session_id, text, created_at, deleted_at FROM comments
         WHERE issue_id = ?1 AND deleted_at IS NULL ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt.query_map([issue_id], comment_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn delete_comment(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM comments WHERE id = ?1", [id])?;
    Ok(())
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<GitSnapshot> {
    Ok(GitSnapshot {
        id: row.get("id")?,
        issue_id: row.get("issue_id")?,
        commit_sha: row.get("commit_sha")?,
        branch: row.get("branch")?,
        dirty_files: row.get("dirty_files")?,
        untracked_files: row.get("untracked_files")?,
        captured_at: time::column(row, "captured_at")?,
    })
}

const SNAPSHOT_COLUMNS: &str =
    "id, issue_id, commit_sha, branch, dirty_files, untracked_files, captured_at";

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn upsert_snapshot(conn: &Connection, snap: &GitSnapshot) -> Result<()> {
    conn.execute(
        "INSERT INTO git_snapshots (id, issue_id, commit_sha, branch, dirty_files,
             untracked_files, captured_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
             issue_id = excluded.issue_id,
             commit_sha = excluded.commit_sha,
             branch = excluded.branch,
             dirty_files = excluded.dirty_files,
             untracked_files = excluded.untracked_files,
             captured_at = excluded.captured_at",
        params![
            snap.id,
            snap.issue_id,
            snap.commit_sha,
            snap.branch,
            snap.dirty_files,
            snap.untracked_files,
            time::to_db(&snap.captured_at),
        ],
    )?;
    Ok(())
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn find_snapshot(conn: &Connection, id: &str) -> Result<Option<GitSnapshot>> {
    let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM git_snapshots WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], snapshot_from_row).optional()?)
}

/// Most recent snapshot captured for an issue.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn latest_snapshot(conn: &Connection, issue_id: &str) -> Result<Option<GitSnapshot>> {
    let sql = format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM git_snapshots WHERE issue_id = ?1
         ORDER BY captured_at DESC LIMIT 1"
    );
    Ok(conn.query_row(&sql, [issue_id], snapshot_from_row).optional()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn delete_snapshot(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM git_snapshots WHERE id = ?1", [id])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use chrono::{Duration, Utc};

    fn log(id: &str, offset: i64, message: &str) -> Log {
        Log {
            id: id.into(),
            issue_id: "td-aaaaaa".into(),
            session_id: "ses_a".into(),
            work_session_id: None,
            log_type: LogType::Progress,
            message: message.into(),
            timestamp: Utc::now() + Duration::seconds(offset),
        }
    }

    #[test]
    fn logs_limit_keeps_most_recent_in_order() {
        let store = Store::open_in_memory().expect("store");
        store
            .write(|tx| {
                upsert_log(tx, &log("lg-1", 0, "first"))?;
                upsert_log(tx, &log("lg-2", 1, "second"))?;
                upsert_log(tx, &log("lg-3", 2, "third"))?;
                Ok(())
            })
            .expect("seed");
        let logs = store
            .read(|c| logs_for_issue(c, "td-aaaaaa", Some(2)))
            .expect("logs");
        let messages: Vec<_> = logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["second", "third"]);
        assert_eq!(store.read(|c| recent_logs(c, 1)).expect("recent")[0].id, "lg-3");
    }

    #[test]
    fn handoff_lists_round_trip() {
        let store = Store::open_in_memory().expect("store");
        let handoff = Handoff {
            id: "ho-1".into(),
            issue_id: "td-aaaaaa".into(),
            session_id: "ses_a".into(),
            done: vec!["parser".into()],
            remaining: vec!["docs".into(), "tests".into()],
            decisions: vec![],
            uncertain: vec!["naming".into()],
            git_snapshot_id: None,
            timestamp: Utc::now(),
        };
        store.write(|tx| upsert_handoff(tx, &handoff)).expect("insert");
        assert!(store.read(|c| has_handoff(c, "td-aaaaaa")).expect("has"));
        let latest = store
            .read(|c| latest_handoff(c, "td-aaaaaa"))
            .expect("latest")
            .expect("some");
        assert_eq!(latest.remaining, vec!["docs", "tests"]);
        assert_eq!(latest.uncertain, vec!["naming"]);
    }

    #[test]
    fn deleted_comments_are_hidden() {
        let store = Store::open_in_memory().expect("store");
        let mut c = Comment {
            id: "cm-1".into(),
            issue_id: "td-aaaaaa".into(),
            session_id: "ses_a".into(),
            text: "hi".into(),
            created_at: Utc::now(),
            deleted_at: None,
        };
        store.write(|tx| upsert_comment(tx, &c)).expect("insert");
        assert_eq!(store.read(|x| comments_for_issue(x, "td-aaaaaa")).expect("list").len(), 1);
        c.deleted_at = Some(Utc::now());
        store.write(|tx| upsert_comment(tx, &c)).expect("update");
        assert!(store.read(|x| comments_for_issue(x, "td-aaaaaa")).expect("list").is_empty());
        assert!(store.read(|x| find_comment(x, "cm-1")).expect("find").is_some());
    }
}
