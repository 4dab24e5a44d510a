//! Work sessions, boards, board positions and notes.

use crate::error::Result;
use crate::model::{Board, BoardPosition, LogFanout, Note, WorkSession, WorkSessionIssue};
use crate::time;
use rusqlite::{Connection, OptionalExtension, Row, params};

fn work_session_from_row(row: &Row<'_>) -> rusqlite::Result<WorkSession> {
    let fanout: String = row.get("log_fanout")?;
    Ok(WorkSession {
        id: row.get("id")?,
        name: row.get("name")?,
        session_id: row.get("session_id")?,
        started_at: time::column(row, "started_at")?,
        ended_at: time::opt_column(row, "ended_at")?,
        active: row.get("active")?,
        log_fanout: fanout.parse().unwrap_or(LogFanout::Tagged),
    })
}

const WS_COLUMNS: &str = "id, name, session_id, started_at, ended_at, active, log_fanout";

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn upsert_work_session(conn: &Connection, ws: &WorkSession) -> Result<()> {
    conn.execute(
        "INSERT INTO work_sessions (id, name, session_id, started_at, ended_at, active, log_fanout)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             session_id = excluded.session_id,
             started_at = excluded.started_at,
             ended_at = excluded.ended_at,
             active = excluded.active,
             log_fanout = excluded.log_fanout",
        params![
            ws.id,
            ws.name,
            ws.session_id,
            time::to_db(&ws.started_at),
            time::opt_to_db(ws.ended_at.as_ref()),
            ws.active,
            ws.log_fanout.as_str(),
        ],
    )?;
    Ok(())
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn find_work_session(conn: &Connection, id: &str) -> Result<Option<WorkSession>> {
    let sql = format!("SELECT {WS_COLUMNS} FROM work_sessions WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], work_session_from_row).optional()?)
}

/// The project's active work session, if any.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn active_work_session(conn: &Connection) -> Result<Option<WorkSession>> {
    let sql = format!(
        "SELECT {WS_COLUMNS} FROM work_sessions WHERE active = 1 ORDER BY started_at DESC LIMIT 1"
    );
    Ok(conn.query_row(&sql, [], work_session_from_row).optional()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn list_work_sessions(conn: &Connection) -> Result<Vec<WorkSession>> {
    let sql = format!("SELECT {WS_COLUMNS} FROM work_sessions ORDER BY started_at DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], work_session_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn delete_work_session(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM work_sessions WHERE id = ?1", [id])?;
    Ok(())
}

fn ws_issue_from_row(row: &Row<'_>) -> rusqlite::Result<WorkSessionIssue> {
    Ok(WorkSessionIssue {
        id: row.get("id")?,
        work_session_id: row.get("work_session_id")?,
        issue_id: row.get("issue_id")?,
        tagged_at: time::column(row, "tagged_at")?,
    })
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn upsert_ws_issue(conn: &Connection, tag: &WorkSessionIssue) -> Result<()> {
    conn.execute(
        "INSERT INTO work_session_issues (id, work_session_id, issue_id, tagged_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET tagged_at = excluded.tagged_at",
        params![
            tag.id,
            tag.work_session_id,
            tag.issue_id,
            time::to_db(&tag.tagged_at)
        ],
    )?;
    Ok(())
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn find_ws_issue(conn: &Connection, id: &str) -> Result<Option<WorkSessionIssue>> {
    Ok(conn
        .query_row(
            "SELECT id, work_session_id, issue_id, tagged_at FROM work_session_issues WHERE id = ?1",
            [id],
            ws_issue_from_row,
        )
        .optional()?)
}

/// Issue ids tagged to a work session, in tagging order.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn tagged_issue_ids(conn: &Connection, work_session_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT issue_id FROM work_session_issues WHERE work_session_id = ?1
         ORDER BY tagged_at ASC, issue_id ASC",
    )?;
    let rows = stmt.query_map([work_session_id], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn delete_ws_issue(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM work_session_issues WHERE id = ?1", [id])?;
    Ok(())
}

fn board_from_row(row: &Row<'_>) -> rusqlite::Result<Board> {
    Ok(Board {
        id: row.get("id")?,
        name: row.get("name")?,
        query: row.get("query")?,
        description: row.get("description")?,
        created_at: time::column(row, "created_at")?,
        updated_at: time::column(row, "updated_at")?,
        deleted_at: time::opt_column(row, "deleted_at")?,
    })
}

const BOARD_COLUMNS: &str = "id, name, query, description, created_at, updated_at, deleted_at";

/// # Errors
///
/// Returns `database_error` on SQLite failure, including a live name clash.
pub fn upsert_board(conn: &Connection, board: &Board) -> Result<()> {
    conn.execute(
        "INSERT INTO boards (id, name, query, description, created_at, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             query = excluded.query,
             description = excluded.description,
             created_at = excluded.created_at,
             updated_at = excluded.updated_at,
             deleted_at = excluded.deleted_at",
        params![
            board.id,
            board.name,
            board.query,
            board.description,
            time::to_db(&board.created_at),
            time::to_db(&board.updated_at),
            time::opt_to_db(board.deleted_at.as_ref()),
        ],
    )?;
    Ok(())
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn find_board(conn: &Connection, id: &str) -> Result<Option<Board>> {
    let sql = format!("SELECT {BOARD_COLUMNS} FROM boards WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], board_from_row).optional()?)
}

/// Resolve a live board by id or by name (case-insensitive).
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn find_live_board(conn: &Connection, key: &str) -> Result<Option<Board>> {
    let sql = format!(
        "SELECT {BOARD_COLUMNS} FROM boards
         WHERE deleted_at IS NULL AND (id = ?1 OR lower(name) = lower(?1))
         ORDER BY id = ?1 DESC LIMIT 1"
    );
    Ok(conn.query_row(&sql, [key], board_from_row).optional()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn list_boards(conn: &Connection) -> Result<Vec<Board>> {
    let sql = format!("SELECT {BOARD_COLUMNS} FROM boards WHERE deleted_at IS NULL ORDER BY name");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], board_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn delete_board(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM boards WHERE id = ?1", [id])?;
    Ok(())
}

fn position_from_row(row: &Row<'_>) -> rusqlite::Result<BoardPosition> {
    Ok(BoardPosition {
        id: row.get("id")?,
        board_id: row.get("board_id")?,
        issue_id: row.get("issue_id")?,
        position: row.get("position")?,
        updated_at: time::column(row, "updated_at")?,
        deleted_at: time::opt_column(row, "deleted_at")?,
    })
}

const POSITION_COLUMNS: &str = "id, board_id, issue_id, position, updated_at, deleted_at";

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn upsert_position(conn: &Connection, pos: &BoardPosition) -> Result<()> {
    conn.execute(
        "INSERT INTO board_issue_positions (id, board_id, issue_id, position, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
             position = excluded.position,
             updated_at = excluded.updated_at,
             deleted_at = excluded.deleted_at",
        params![
            pos.id,
            pos.board_id,
            pos.issue_id,
            pos.position,
            time::to_db(&pos.updated_at),
            time::opt_to_db(pos.deleted_at.as_ref()),
        ],
    )?;
    Ok(())
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn find_position(conn: &Connection, id: &str) -> Result<Option<BoardPosition>> {
    let sql = format!("SELECT {POSITION_COLUMNS} FROM board_issue_positions WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], position_from_row).optional()?)
}

/// Live positions on a board, ascending.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn positions_for_board(conn: &Connection, board_id: &str) -> Result<Vec<BoardPosition>> {
    let sql = format!(
        "SELECT {POSITION_COLUMNS} FROM board_issue_positions
         WHERE board_id = ?1 AND deleted_at IS NULL ORDER BY position ASC, issue_id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([board_id], position_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn delete_position(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM board_issue_positions WHERE id = ?1", [id])?;
    Ok(())
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get("id")?,
        title: row.get("title")?,
        content: row.get("content")?,
        pinned: row.get("pinned")?,
        archived: row.get("archived")?,
        created_at: time::column(row, "created_at")?,
        updated_at: time::column(row, "updated_at")?,
        deleted_at: time::opt_column(row, "deleted_at")?,
    })
}

const NOTE_COLUMNS: &str = "id, title, content, pinned, archived, created_at, updated_at, deleted_at";

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn upsert_note(conn: &Connection, note: &Note) -> Result<()> {
    conn.execute(
        "INSERT INTO notes (id, title, content, pinned, archived, created_at, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
             title = excluded.title,
             content = excluded.content,
             pinned = excluded.pinned,
             archived = excluded.archived,
             created_at = excluded.created_at,
             updated_at = excluded.updated_at,
             deleted_at = excluded.deleted_at",
        params![
            note.id,
            note.title,
            note.content,
            note.pinned,
            note.archived,
            time::to_db(&note.created_at),
            time::to_db(&note.updated_at),
            time::opt_to_db(note.deleted_at.as_ref()),
        ],
    )?;
    Ok(())
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn find_note(conn: &Connection, id: &str) -> Result<Option<Note>> {
    let sql = format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], note_from_row).optional()?)
}

/// Live notes, pinned first, then most recently updated.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn list_notes(conn: &Connection, include_archived: bool) -> Result<Vec<Note>> {
    let sql = format!(
        "SELECT {NOTE_COLUMNS} FROM notes WHERE deleted_at IS NULL AND (?1 OR archived = 0)
         ORDER BY pinned DESC, updated_at DESC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([include_archived], note_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn delete_note(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM notes WHERE id = ?1", [id])?;
    Ok(())
}
