//! Kind-generic access to entity rows.
//!
//! The mutation layer, undo and sync apply all speak [`EntityRecord`]; this
//! module dispatches to the per-table functions.

use super::{activity, issues, links, planning};
use crate::error::Result;
use crate::model::{EntityRecord, EntityType};
use rusqlite::Connection;

/// Load the current row for `(entity_type, id)`, soft-deleted rows included.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn load(conn: &Connection, entity_type: EntityType, id: &str) -> Result<Option<EntityRecord>> {
    Ok(match entity_type {
        EntityType::Issue => issues::find(conn, id)?.map(EntityRecord::Issue),
        EntityType::Log => activity::find_log(conn, id)?.map(EntityRecord::Log),
        EntityType::Handoff => activity::find_handoff(conn, id)?.map(EntityRecord::Handoff),
        EntityType::Comment => activity::find_comment(conn, id)?.map(EntityRecord::Comment),
        EntityType::IssueFile => links::find_file(conn, id)?.map(EntityRecord::IssueFile),
        EntityType::Dependency => {
            links::find_dependency(conn, id)?.map(EntityRecord::Dependency)
        }
        EntityType::GitSnapshot => {
            activity::find_snapshot(conn, id)?.map(EntityRecord::GitSnapshot)
        }
        EntityType::WorkSession => {
            planning::find_work_session(conn, id)?.map(EntityRecord::WorkSession)
        }
        EntityType::WorkSessionIssue => {
            planning::find_ws_issue(conn, id)?.map(EntityRecord::WorkSessionIssue)
        }
        EntityType::Board => planning::find_board(conn, id)?.map(EntityRecord::Board),
        EntityType::BoardPosition => {
            planning::find_position(conn, id)?.map(EntityRecord::BoardPosition)
        }
        EntityType::Note => planning::find_note(conn, id)?.map(EntityRecord::Note),
    })
}

/// Write the full row for `record`, inserting or replacing.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn put(conn: &Connection, record: &EntityRecord) -> Result<()> {
    match record {
        EntityRecord::Issue(e) => issues::upsert(conn, e),
        EntityRecord::Log(e) => activity::upsert_log(conn, e),
        EntityRecord::Handoff(e) => activity::upsert_handoff(conn, e),
        EntityRecord::Comment(e) => activity::upsert_comment(conn, e),
        EntityRecord::IssueFile(e) => links::upsert_file(conn, e),
        EntityRecord::Dependency(e) => links::upsert_dependency(conn, e),
        EntityRecord::GitSnapshot(e) => activity::upsert_snapshot(conn, e),
        EntityRecord::WorkSession(e) => planning::upsert_work_session(conn, e),
        EntityRecord::WorkSessionIssue(e) => planning::upsert_ws_issue(conn, e),
        EntityRecord::Board(e) => planning::upsert_board(conn, e),
        EntityRecord::BoardPosition(e) => planning::upsert_position(conn, e),
        EntityRecord::Note(e) => planning::upsert_note(conn, e),
    }
}

/// Remove the row outright.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn remove(conn: &Connection, entity_type: EntityType, id: &str) -> Result<()> {
    match entity_type {
        EntityType::Issue => issues::hard_delete(conn, id),
        EntityType::Log => activity::delete_log(conn, id),
        EntityType::Handoff => activity::delete_handoff(conn, id),
        EntityType::Comment => activity::delete_comment(conn, id),
        EntityType::IssueFile => links::delete_file(conn, id),
        EntityType::Dependency => links::delete_dependency(conn, id),
        EntityType::GitSnapshot => activity::delete_snapshot(conn, id),
        EntityType::WorkSession => planning::delete_work_session(conn, id),
        EntityType::WorkSessionIssue => planning::delete_ws_issue(conn, id),
        EntityType::Board => planning::delete_board(conn, id),
        EntityType::BoardPosition => planning::delete_position(conn, id),
        EntityType::Note => planning::delete_note(conn, id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::model::{Dependency, Issue};
    use chrono::Utc;

    #[test]
    fn put_load_remove_dispatch_by_kind() {
        let store = Store::open_in_memory().expect("store");
        let now = Utc::now();
        let issue = EntityRecord::Issue(Issue::new("td-aaaaaa", "x", now));
        let dep = EntityRecord::Dependency(Dependency::new("td-aaaaaa", "td-bbbbbb", now));
        store
            .write(|tx| {
                put(tx, &issue)?;
                put(tx, &dep)?;
                Ok(())
            })
            .expect("put");

        let loaded = store
            .read(|c| load(c, EntityType::Dependency, dep.id()))
            .expect("load")
            .expect("present");
        assert_eq!(loaded.entity_type(), EntityType::Dependency);

        store
            .write(|tx| remove(tx, EntityType::Issue, "td-aaaaaa"))
            .expect("remove");
        assert!(store
            .read(|c| load(c, EntityType::Issue, "td-aaaaaa"))
            .expect("load")
            .is_none());
    }
}
