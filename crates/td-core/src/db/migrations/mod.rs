//! Versioned schema migrations for the issue store.

use super::schema;
use rusqlite::{Connection, types::Type};

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 5;

const MIGRATIONS: &[(u32, &str)] = &[
    (1, schema::MIGRATION_V1_SQL),
    (2, schema::MIGRATION_V2_SQL),
    (3, schema::MIGRATION_V3_SQL),
    (4, schema::MIGRATION_V4_SQL),
    (5, schema::MIGRATION_V5_SQL),
];

/// Read `PRAGMA user_version` and convert it to a Rust `u32`.
///
/// # Errors
///
/// Returns an error if querying SQLite fails or the version value cannot be
/// represented as `u32`.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Apply all pending migrations in ascending order, one transaction each.
///
/// A failing migration rolls back completely and leaves `user_version` at the
/// last successful step.
///
/// # Errors
///
/// Returns an error if any migration fails.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let mut current = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", i64::from(*version))?;
        tx.commit()?;
        tracing::debug!(version, "applied schema migration");
        current = *version;
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::{LATEST_SCHEMA_VERSION, MIGRATIONS, current_schema_version, migrate};
    use crate::db::schema;
    use rusqlite::{Connection, params};

    fn sqlite_object_exists(
        conn: &Connection,
        object_type: &str,
        object_name: &str,
    ) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = ?1 AND name = ?2
            )",
            params![object_type, object_name],
            |row| row.get(0),
        )
    }

    #[test]
    fn migrate_empty_db_to_latest() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;

        let applied = migrate(&mut conn)?;
        assert_eq!(applied, LATEST_SCHEMA_VERSION);
        assert_eq!(current_schema_version(&conn)?, LATEST_SCHEMA_VERSION);

        for table in [
            "issues",
            "logs",
            "handoffs",
            "comments",
            "issue_files",
            "issue_dependencies",
            "git_snapshots",
            "work_sessions",
            "work_session_issues",
            "issue_session_history",
            "action_log",
            "boards",
            "board_issue_positions",
            "notes",
            "sync_state",
            "sync_history",
            "sync_conflicts",
            "sync_field_clocks",
            "sync_applied",
            "sync_pending",
        ] {
            assert!(
                sqlite_object_exists(&conn, "table", table)?,
                "missing table {table}"
            );
        }

        for index in schema::REQUIRED_INDEXES {
            assert!(
                sqlite_object_exists(&conn, "index", index)?,
                "missing expected index {index}"
            );
        }

        Ok(())
    }

    #[test]
    fn migrate_is_idempotent() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);
        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);
        Ok(())
    }

    #[test]
    fn v2_rewrites_integer_ids_and_action_log() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::MIGRATION_V1_SQL)?;
        conn.pragma_update(None, "user_version", 1_i64)?;

        conn.execute(
            "INSERT INTO logs (id, issue_id, session_id, type, message, timestamp)
             VALUES (26, 'td-aaaaaa', 'ses_a', 'progress', 'hi', '2024-01-01T00:00:00.000000Z')",
            [],
        )?;
        conn.execute(
            "INSERT INTO comments (id, issue_id, session_id, text, created_at)
             VALUES (3, 'td-aaaaaa', 'ses_a', 'looks good', '2024-01-01T00:00:00.000000Z')",
            [],
        )?;
        conn.execute(
            "INSERT INTO action_log (session_id, action_type, entity_type, entity_id, new_data, timestamp)
             VALUES ('ses_a', 'create', 'logs', '26', '{\"id\":26,\"message\":\"hi\"}',
                     '2024-01-01T00:00:00.000000Z')",
            [],
        )?;

        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);

        let log_id: String = conn.query_row("SELECT id FROM logs", [], |row| row.get(0))?;
        assert_eq!(log_id, "lg-0000001a");
        let comment_id: String =
            conn.query_row("SELECT id FROM comments", [], |row| row.get(0))?;
        assert_eq!(comment_id, "cm-00000003");

        let (entity_id, new_data): (String, String) = conn.query_row(
            "SELECT entity_id, new_data FROM action_log",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(entity_id, "lg-0000001a");
        let json: serde_json::Value = serde_json::from_str(&new_data).expect("json");
        assert_eq!(json["id"], "lg-0000001a");
        Ok(())
    }

    #[test]
    fn failed_migration_leaves_database_unchanged() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::MIGRATION_V1_SQL)?;
        conn.pragma_update(None, "user_version", 1_i64)?;
        // A stray table with the temp name makes v2 fail half way.
        conn.execute_batch("CREATE TABLE comments_v2 (x INTEGER);")?;
        conn.execute(
            "INSERT INTO logs (id, issue_id, session_id, message, timestamp)
             VALUES (1, 'td-aaaaaa', 'ses_a', 'm', '2024-01-01T00:00:00.000000Z')",
            [],
        )?;

        assert!(migrate(&mut conn).is_err());
        assert_eq!(current_schema_version(&conn)?, 1);
        let id_type: String =
            conn.query_row("SELECT typeof(id) FROM logs", [], |row| row.get(0))?;
        assert_eq!(id_type, "integer");
        Ok(())
    }

    #[test]
    fn migration_versions_are_strictly_increasing() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
    }
}
