//! Append-only action log.

use crate::error::{Result, TdError, not_found_on_empty};
use crate::model::{ActionEntry, ActionType, EntityType};
use crate::time;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use serde_json::Value;

/// A row about to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    pub session_id: String,
    pub action_type: ActionType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub previous_data: Option<Value>,
    pub new_data: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub undo_of: Option<i64>,
    /// Id of the first row written by the same mutation; `None` starts a
    /// new batch headed by this row.
    pub batch_id: Option<i64>,
}

const COLUMNS: &str = "id, session_id, action_type, entity_type, entity_id, previous_data, \
     new_data, timestamp, undo_of";

fn json_column(row: &Row<'_>, name: &str) -> rusqlite::Result<Option<Value>> {
    let raw: Option<String> = row.get(name)?;
    raw.map(|text| {
        serde_json::from_str(&text).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
    })
    .transpose()
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<ActionEntry> {
    let action: String = row.get("action_type")?;
    let entity: String = row.get("entity_type")?;
    let conversion = |err: crate::model::ParseEnumError| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
    };
    Ok(ActionEntry {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        action_type: action.parse().map_err(conversion)?,
        entity_type: entity.parse().map_err(conversion)?,
        entity_id: row.get("entity_id")?,
        previous_data: json_column(row, "previous_data")?,
        new_data: json_column(row, "new_data")?,
        timestamp: time::column(row, "timestamp")?,
        undo_of: row.get("undo_of")?,
    })
}

/// Append one row and return its id. A row without a `batch_id` heads its
/// own batch.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn append(conn: &Connection, action: &NewAction) -> Result<i64> {
    let previous = action
        .previous_data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let new = action.new_data.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO action_log (session_id, action_type, entity_type, entity_id,
             previous_data, new_data, timestamp, undo_of, batch_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            action.session_id,
            action.action_type.as_str(),
            action.entity_type.as_str(),
            action.entity_id,
            previous,
            new,
            time::to_db(&action.timestamp),
            action.undo_of,
            action.batch_id,
        ],
    )?;
    let id = conn.last_insert_rowid();
    if action.batch_id.is_none() {
        conn.execute("UPDATE action_log SET batch_id = id WHERE id = ?1", [id])?;
    }
    Ok(id)
}

/// # Errors
///
/// Returns `not_found` for an unknown id.
pub fn get(conn: &Connection, id: i64) -> Result<ActionEntry> {
    let sql = format!("SELECT {COLUMNS} FROM action_log WHERE id = ?1");
    not_found_on_empty(
        conn.query_row(&sql, [id], from_row),
        "action",
        &id.to_string(),
    )
}

/// Every live row of the session's `batches` most recent mutations, newest
/// row first. Undo entries and rows already undone are skipped; a batch is
/// the set of rows one mutation wrote.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn undoable(conn: &Connection, session_id: &str, batches: usize) -> Result<Vec<ActionEntry>> {
    let sql = format!(
        "WITH live AS (
             SELECT a.id, COALESCE(a.batch_id, a.id) AS batch FROM action_log a
             WHERE a.session_id = ?1
               AND a.undo_of IS NULL
               AND NOT EXISTS (SELECT 1 FROM action_log u WHERE u.undo_of = a.id)
         ),
         picked AS (
             SELECT DISTINCT batch FROM live ORDER BY batch DESC LIMIT ?2
         )
         SELECT {COLUMNS} FROM action_log
         WHERE id IN (SELECT id FROM live WHERE batch IN (SELECT batch FROM picked))
         ORDER BY id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![session_id, i64::try_from(batches).unwrap_or(i64::MAX)],
        from_row,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Rows with `id > after`, ascending, at most `limit`.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn after(conn: &Connection, after: i64, limit: usize) -> Result<Vec<ActionEntry>> {
    let sql = format!("SELECT {COLUMNS} FROM action_log WHERE id > ?1 ORDER BY id ASC LIMIT ?2");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![after, i64::try_from(limit).unwrap_or(i64::MAX)],
        from_row,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Most recent rows, newest first, optionally for one session.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn recent(
    conn: &Connection,
    session_id: Option<&str>,
    limit: usize,
) -> Result<Vec<ActionEntry>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM action_log WHERE (?1 IS NULL OR session_id = ?1)
         ORDER BY id DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![session_id, i64::try_from(limit).unwrap_or(i64::MAX)],
        from_row,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Issue ids that have at least one `action` row. Prefetch for TDQ.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn issues_with_action(
    conn: &Connection,
    action: ActionType,
) -> Result<std::collections::HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT a.entity_id FROM action_log a
         WHERE a.entity_type = 'issues' AND a.action_type = ?1 AND a.undo_of IS NULL
           AND NOT EXISTS (SELECT 1 FROM action_log u WHERE u.undo_of = a.id)",
    )?;
    let rows = stmt.query_map([action.as_str()], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Highest action id, 0 when empty.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn max_id(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COALESCE(MAX(id), 0) FROM action_log", [], |row| row.get(0))?)
}

/// Decode a stored payload into the entity schema, surfacing corruption as
/// an execution error naming the row.
///
/// # Errors
///
/// Returns an execution error when the payload no longer decodes.
pub fn decode_payloads(
    entry: &ActionEntry,
) -> Result<(Option<crate::model::EntityRecord>, Option<crate::model::EntityRecord>)> {
    let previous = entry
        .previous_record()
        .map_err(|err| TdError::Execution(format!("action {} previous_data: {err}", entry.id)))?;
    let new = entry
        .new_record()
        .map_err(|err| TdError::Execution(format!("action {} new_data: {err}", entry.id)))?;
    Ok((previous, new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use serde_json::json;

    fn action(session: &str, undo_of: Option<i64>) -> NewAction {
        NewAction {
            session_id: session.into(),
            action_type: ActionType::Update,
            entity_type: EntityType::Issue,
            entity_id: "td-aaaaaa".into(),
            previous_data: Some(json!({"title": "a"})),
            new_data: Some(json!({"title": "b"})),
            timestamp: time::now(),
            undo_of,
            batch_id: None,
        }
    }

    #[test]
    fn undoable_skips_undo_rows_and_undone_originals() {
        let store = Store::open_in_memory().expect("store");
        store
            .write(|tx| {
                let first = append(tx, &action("ses_a", None))?;
                let _second = append(tx, &action("ses_a", None))?;
                let _other = append(tx, &action("ses_b", None))?;
                let third = append(tx, &action("ses_a", None))?;
                append(tx, &action("ses_a", Some(third)))?;
                assert_eq!(first, 1);
                Ok(())
            })
            .expect("seed");

        let rows = store.read(|c| undoable(c, "ses_a", 10)).expect("undoable");
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn undoable_returns_whole_batches() {
        let store = Store::open_in_memory().expect("store");
        store
            .write(|tx| {
                let head = append(tx, &action("ses_a", None))?;
                append(tx, &NewAction { batch_id: Some(head), ..action("ses_a", None) })?;
                let next = append(tx, &action("ses_a", None))?;
                append(tx, &NewAction { batch_id: Some(next), ..action("ses_a", None) })?;
                append(tx, &NewAction { batch_id: Some(next), ..action("ses_a", None) })?;
                Ok(())
            })
            .expect("seed");

        let newest = store.read(|c| undoable(c, "ses_a", 1)).expect("undoable");
        assert_eq!(newest.iter().map(|r| r.id).collect::<Vec<_>>(), vec![5, 4, 3]);
        let both = store.read(|c| undoable(c, "ses_a", 2)).expect("undoable");
        assert_eq!(both.iter().map(|r| r.id).collect::<Vec<_>>(), vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn after_returns_ascending_tail() {
        let store = Store::open_in_memory().expect("store");
        store
            .write(|tx| {
                for _ in 0..5 {
                    append(tx, &action("ses_a", None))?;
                }
                Ok(())
            })
            .expect("seed");
        let rows = store.read(|c| after(c, 2, 2)).expect("after");
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(store.read(max_id).expect("max"), 5);
        assert_eq!(rows[0].new_data, Some(json!({"title": "b"})));
    }
}
