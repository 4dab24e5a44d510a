//! Linked files and blocking dependencies.

use crate::error::Result;
use crate::model::{Dependency, FileRole, IssueFile};
use crate::time;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::{HashMap, HashSet, VecDeque};

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<IssueFile> {
    let role: String = row.get("role")?;
    Ok(IssueFile {
        id: row.get("id")?,
        issue_id: row.get("issue_id")?,
        file_path: row.get("file_path")?,
        role: role.parse().unwrap_or(FileRole::Implementation),
        sha_at_link: row.get("sha_at_link")?,
        linked_at: time::column(row, "linked_at")?,
    })
}

const FILE_COLUMNS: &str = "id, issue_id, file_path, role, sha_at_link, linked_at";

/// Insert or update a link. The `(issue_id, file_path)` pair stays unique.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn upsert_file(conn: &Connection, file: &IssueFile) -> Result<()> {
    conn.execute(
        "INSERT INTO issue_files (id, issue_id, file_path, role, sha_at_link, linked_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             role = excluded.role,
             sha_at_link = excluded.sha_at_link,
             linked_at = excluded.linked_at",
        params![
            file.id,
            file.issue_id,
            file.file_path,
            file.role.as_str(),
            file.sha_at_link,
            time::to_db(&file.linked_at),
        ],
    )?;
    Ok(())
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn find_file(conn: &Connection, id: &str) -> Result<Option<IssueFile>> {
    let sql = format!("SELECT {FILE_COLUMNS} FROM issue_files WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], file_from_row).optional()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn find_file_link(conn: &Connection, issue_id: &str, path: &str) -> Result<Option<IssueFile>> {
    let sql =
        format!("SELECT {FILE_COLUMNS} FROM issue_files WHERE issue_id = ?1 AND file_path = ?2");
    Ok(conn
        .query_row(&sql, params![issue_id, path], file_from_row)
        .optional()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn files_for_issue(conn: &Connection, issue_id: &str) -> Result<Vec<IssueFile>> {
    let sql =
        format!("SELECT {FILE_COLUMNS} FROM issue_files WHERE issue_id = ?1 ORDER BY file_path");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([issue_id], file_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Every link across live issues, with the issue's implementer session.
/// Feeds silo analytics.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn file_authors(conn: &Connection) -> Result<Vec<(String, Option<String>)>> {
    let mut stmt = conn.prepare(
        "SELECT f.file_path, i.implementer_session
         FROM issue_files f JOIN issues i ON i.id = f.issue_id
         WHERE i.deleted_at IS NULL
         ORDER BY f.file_path",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn delete_file(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM issue_files WHERE id = ?1", [id])?;
    Ok(())
}

fn dep_from_row(row: &Row<'_>) -> rusqlite::Result<Dependency> {
    Ok(Dependency {
        id: row.get("id")?,
        blocked_id: row.get("blocked_id")?,
        blocker_id: row.get("blocker_id")?,
        created_at: time::column(row, "created_at")?,
    })
}

const DEP_COLUMNS: &str = "id, blocked_id, blocker_id, created_at";

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn upsert_dependency(conn: &Connection, dep: &Dependency) -> Result<()> {
    conn.execute(
        "INSERT INTO issue_dependencies (id, blocked_id, blocker_id, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET created_at = excluded.created_at",
        params![
            dep.id,
            dep.blocked_id,
            dep.blocker_id,
            time::to_db(&dep.created_at)
        ],
    )?;
    Ok(())
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn find_dependency(conn: &Connection, id: &str) -> Result<Option<Dependency>> {
    let sql = format!("SELECT {DEP_COLUMNS} FROM issue_dependencies WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], dep_from_row).optional()?)
}

/// Edges where `issue_id` is the blocked side.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn blockers_of(conn: &Connection, issue_id: &str) -> Result<Vec<Dependency>> {
    let sql = format!(
        "SELECT {DEP_COLUMNS} FROM issue_dependencies WHERE blocked_id = ?1 ORDER BY blocker_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([issue_id], dep_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Edges where `issue_id` is the blocker.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn dependents_of(conn: &Connection, issue_id: &str) -> Result<Vec<Dependency>> {
    let sql = format!(
        "SELECT {DEP_COLUMNS} FROM issue_dependencies WHERE blocker_id = ?1 ORDER BY blocked_id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([issue_id], dep_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Blockers of `issue_id` that are live and not closed.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn open_blocker_ids(conn: &Connection, issue_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT d.blocker_id FROM issue_dependencies d
         JOIN issues b ON b.id = d.blocker_id
         WHERE d.blocked_id = ?1 AND b.status <> 'closed' AND b.deleted_at IS NULL
         ORDER BY d.blocker_id",
    )?;
    let rows = stmt.query_map([issue_id], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Ids of every issue with at least one open blocker. Prefetch for TDQ.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn issues_with_open_blockers(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT d.blocked_id FROM issue_dependencies d
         JOIN issues b ON b.id = d.blocker_id
         WHERE b.status <> 'closed' AND b.deleted_at IS NULL",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<HashSet<_>>>()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn delete_dependency(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM issue_dependencies WHERE id = ?1", [id])?;
    Ok(())
}

/// Whether adding `blocked -> blocker` closes a cycle: true when `blocked` is
/// already reachable from `blocker` by following blocker edges.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn would_create_dependency_cycle(
    conn: &Connection,
    blocked: &str,
    blocker: &str,
) -> Result<bool> {
    if blocked == blocker {
        return Ok(true);
    }
    let mut stmt = conn.prepare("SELECT blocked_id, blocker_id FROM issue_dependencies")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        let (from, to) = row?;
        adjacency.entry(from).or_default().push(to);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([blocker]);
    while let Some(node) = queue.pop_front() {
        if node == blocked {
            return Ok(true);
        }
        if !seen.insert(node) {
            continue;
        }
        if let Some(next) = adjacency.get(node) {
            queue.extend(next.iter().map(String::as_str));
        }
    }
    Ok(false)
}
