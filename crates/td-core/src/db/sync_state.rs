//! Replication bookkeeping: cursors, history, conflicts, field clocks,
//! applied-event idempotency and the pending backfill buffer.

use crate::error::Result;
use crate::model::EntityType;
use crate::time;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

pub const KEY_PULL_CURSOR: &str = "last_pulled_server_seq";
pub const KEY_PUSH_CURSOR: &str = "last_pushed_action_id";
pub const KEY_LAST_PULL_AT: &str = "last_pull_at";
pub const KEY_LAST_PUSH_AT: &str = "last_push_at";
pub const KEY_DEVICE_ID: &str = "device_id";

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM sync_state WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Integer cursor, 0 when unset or unparsable.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn get_i64(conn: &Connection, key: &str) -> Result<i64> {
    Ok(get(conn, key)?.and_then(|v| v.parse().ok()).unwrap_or(0))
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn set_i64(conn: &Connection, key: &str, value: i64) -> Result<()> {
    set(conn, key, &value.to_string())
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn get_time(conn: &Connection, key: &str) -> Result<Option<DateTime<Utc>>> {
    Ok(get(conn, key)?.as_deref().and_then(time::parse))
}

/// Direction of a replicated event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Push,
    Pull,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncHistoryEntry {
    pub direction: Direction,
    pub action_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub server_seq: Option<i64>,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn record_history(conn: &Connection, entry: &SyncHistoryEntry) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_history (direction, action_type, entity_type, entity_id, server_seq,
             device_id, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.direction.as_str(),
            entry.action_type,
            entry.entity_type,
            entry.entity_id,
            entry.server_seq,
            entry.device_id,
            time::to_db(&entry.timestamp),
        ],
    )?;
    Ok(())
}

/// Keep only the newest `keep` history rows. Returns the number pruned.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn prune_history(conn: &Connection, keep: usize) -> Result<usize> {
    let pruned = conn.execute(
        "DELETE FROM sync_history WHERE id NOT IN
             (SELECT id FROM sync_history ORDER BY id DESC LIMIT ?1)",
        [i64::try_from(keep).unwrap_or(i64::MAX)],
    )?;
    Ok(pruned)
}

/// Newest first.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn recent_history(conn: &Connection, limit: usize) -> Result<Vec<SyncHistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT direction, action_type, entity_type, entity_id, server_seq, device_id, timestamp
         FROM sync_history ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
        let direction: String = row.get(0)?;
        Ok(SyncHistoryEntry {
            direction: if direction == "push" {
                Direction::Push
            } else {
                Direction::Pull
            },
            action_type: row.get(1)?,
            entity_type: row.get(2)?,
            entity_id: row.get(3)?,
            server_seq: row.get(4)?,
            device_id: row.get(5)?,
            timestamp: time::column(row, "timestamp")?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// A remote field value that lost the merge, or a skipped event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictRecord {
    pub id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub field: String,
    pub local_value: Option<String>,
    pub remote_value: Option<String>,
    pub remote_device: String,
    pub server_seq: Option<i64>,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Conflict to record; `id` and `resolved_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConflict<'a> {
    pub entity_type: EntityType,
    pub entity_id: &'a str,
    pub field: &'a str,
    pub local_value: Option<String>,
    pub remote_value: Option<String>,
    pub remote_device: &'a str,
    pub server_seq: Option<i64>,
    pub reason: &'a str,
    pub recorded_at: DateTime<Utc>,
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn record_conflict(conn: &Connection, conflict: &NewConflict<'_>) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_conflicts (entity_type, entity_id, field, local_value, remote_value,
             remote_device, server_seq, reason, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            conflict.entity_type.as_str(),
            conflict.entity_id,
            conflict.field,
            conflict.local_value,
            conflict.remote_value,
            conflict.remote_device,
            conflict.server_seq,
            conflict.reason,
            time::to_db(&conflict.recorded_at),
        ],
    )?;
    Ok(())
}

/// Newest first. Resolved records are included only when `include_resolved`.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn list_conflicts(
    conn: &Connection,
    include_resolved: bool,
    limit: usize,
) -> Result<Vec<ConflictRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, entity_type, entity_id, field, local_value, remote_value, remote_device,
                server_seq, reason, recorded_at, resolved_at
         FROM sync_conflicts WHERE (?1 OR resolved_at IS NULL)
         ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(
        params![include_resolved, i64::try_from(limit).unwrap_or(i64::MAX)],
        |row| {
            Ok(ConflictRecord {
                id: row.get("id")?,
                entity_type: row.get("entity_type")?,
                entity_id: row.get("entity_id")?,
                field: row.get("field")?,
                local_value: row.get("local_value")?,
                remote_value: row.get("remote_value")?,
                remote_device: row.get("remote_device")?,
                server_seq: row.get("server_seq")?,
                reason: row.get("reason")?,
                recorded_at: time::column(row, "recorded_at")?,
                resolved_at: time::opt_column(row, "resolved_at")?,
            })
        },
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Mark every open conflict resolved. Returns the count.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn resolve_conflicts(conn: &Connection, at: &DateTime<Utc>) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE sync_conflicts SET resolved_at = ?1 WHERE resolved_at IS NULL",
        [time::to_db(at)],
    )?)
}

/// Latest write stamp for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldClock {
    pub ts: DateTime<Utc>,
    pub device_id: String,
}

impl FieldClock {
    /// Total order: timestamp, then device id.
    #[must_use]
    pub fn beats(&self, other: &Self) -> bool {
        (self.ts, self.device_id.as_str()) > (other.ts, other.device_id.as_str())
    }
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn field_clock(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
    field: &str,
) -> Result<Option<FieldClock>> {
    let row = conn
        .query_row(
            "SELECT ts, device_id FROM sync_field_clocks
             WHERE entity_type = ?1 AND entity_id = ?2 AND field = ?3",
            params![entity_type.as_str(), entity_id, field],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;
    Ok(row.and_then(|(ts, device_id)| time::parse(&ts).map(|ts| FieldClock { ts, device_id })))
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn set_field_clock(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
    field: &str,
    clock: &FieldClock,
) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_field_clocks (entity_type, entity_id, field, ts, device_id)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(entity_type, entity_id, field) DO UPDATE SET
             ts = excluded.ts, device_id = excluded.device_id",
        params![
            entity_type.as_str(),
            entity_id,
            field,
            time::to_db(&clock.ts),
            clock.device_id
        ],
    )?;
    Ok(())
}

/// Whether an event from `(device_id, client_action_id)` was already applied.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn is_applied(conn: &Connection, device_id: &str, client_action_id: i64) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sync_applied WHERE device_id = ?1 AND client_action_id = ?2)",
        params![device_id, client_action_id],
        |row| row.get(0),
    )?)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn mark_applied(
    conn: &Connection,
    device_id: &str,
    client_action_id: i64,
    server_seq: i64,
    at: &DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO sync_applied (device_id, client_action_id, server_seq, applied_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![device_id, client_action_id, server_seq, time::to_db(at)],
    )?;
    Ok(())
}

/// A pulled update whose entity does not exist locally yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent {
    pub server_seq: i64,
    pub device_id: String,
    pub client_action_id: i64,
    pub action_type: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub payload: Option<serde_json::Value>,
    pub client_timestamp: DateTime<Utc>,
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn buffer_pending(conn: &Connection, event: &PendingEvent, at: &DateTime<Utc>) -> Result<()> {
    let payload = event.payload.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT OR IGNORE INTO sync_pending (server_seq, device_id, client_action_id, action_type,
             entity_type, entity_id, payload, client_timestamp, received_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.server_seq,
            event.device_id,
            event.client_action_id,
            event.action_type,
            event.entity_type.as_str(),
            event.entity_id,
            payload,
            time::to_db(&event.client_timestamp),
            time::to_db(at),
        ],
    )?;
    Ok(())
}

/// Remove and return buffered events for one entity, in server order.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn take_pending(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<Vec<PendingEvent>> {
    let mut stmt = conn.prepare(
        "SELECT server_seq, device_id, client_action_id, action_type, entity_type, entity_id,
                payload, client_timestamp
         FROM sync_pending WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY server_seq ASC",
    )?;
    let rows = stmt.query_map(params![entity_type.as_str(), entity_id], |row| {
        let payload: Option<String> = row.get(6)?;
        Ok(PendingEvent {
            server_seq: row.get(0)?,
            device_id: row.get(1)?,
            client_action_id: row.get(2)?,
            action_type: row.get(3)?,
            entity_type,
            entity_id: row.get(5)?,
            payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
            client_timestamp: time::column(row, "client_timestamp")?,
        })
    })?;
    let events = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);
    conn.execute(
        "DELETE FROM sync_pending WHERE entity_type = ?1 AND entity_id = ?2",
        params![entity_type.as_str(), entity_id],
    )?;
    Ok(events)
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn pending_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM sync_pending", [], |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use chrono::Duration;

    #[test]
    fn cursors_default_to_zero() {
        let store = Store::open_in_memory().expect("store");
        assert_eq!(store.read(|c| get_i64(c, KEY_PULL_CURSOR)).expect("get"), 0);
        store.write(|tx| set_i64(tx, KEY_PULL_CURSOR, 42)).expect("set");
        assert_eq!(store.read(|c| get_i64(c, KEY_PULL_CURSOR)).expect("get"), 42);
    }

    #[test]
    fn field_clock_orders_by_time_then_device() {
        let t = time::now();
        let a = FieldClock {
            ts: t,
            device_id: "aaaa".into(),
        };
        let b = FieldClock {
            ts: t,
            device_id: "bbbb".into(),
        };
        let later = FieldClock {
            ts: t + Duration::seconds(1),
            device_id: "0000".into(),
        };
        assert!(b.beats(&a));
        assert!(!a.beats(&b));
        assert!(later.beats(&b));
        assert!(!a.beats(&a));
    }

    #[test]
    fn history_prunes_to_tail() {
        let store = Store::open_in_memory().expect("store");
        store
            .write(|tx| {
                for i in 0..10 {
                    record_history(
                        tx,
                        &SyncHistoryEntry {
                            direction: Direction::Push,
                            action_type: "create".into(),
                            entity_type: "issues".into(),
                            entity_id: format!("td-{i:06}"),
                            server_seq: Some(i),
                            device_id: "dev".into(),
                            timestamp: time::now(),
                        },
                    )?;
                }
                Ok(())
            })
            .expect("seed");
        assert_eq!(store.write(|tx| prune_history(tx, 3)).expect("prune"), 7);
        let rows = store.read(|c| recent_history(c, 10)).expect("recent");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].server_seq, Some(9));
    }

    #[test]
    fn pending_events_are_taken_once() {
        let store = Store::open_in_memory().expect("store");
        let event = PendingEvent {
            server_seq: 7,
            device_id: "dev".into(),
            client_action_id: 3,
            action_type: "update".into(),
            entity_type: EntityType::Issue,
            entity_id: "td-aaaaaa".into(),
            payload: Some(serde_json::json!({"title": "x"})),
            client_timestamp: time::now(),
        };
        store
            .write(|tx| buffer_pending(tx, &event, &time::now()))
            .expect("buffer");
        assert_eq!(store.read(pending_count).expect("count"), 1);
        let taken = store
            .write(|tx| take_pending(tx, EntityType::Issue, "td-aaaaaa"))
            .expect("take");
        assert_eq!(taken, vec![event]);
        assert_eq!(store.read(pending_count).expect("count"), 0);
    }
}
