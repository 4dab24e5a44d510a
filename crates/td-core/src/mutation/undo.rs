//! Undo by inverse entries.
//!
//! Undo never edits or removes action-log rows. For each reverted entry it
//! writes a new mutation that restores the entity's previous state and points
//! back at the original through `undo_of`:
//!
//! | Original | Inverse |
//! |---|---|
//! | create (soft-deleting kind) | delete: tombstone the row |
//! | create (log, handoff, link, dependency, ...) | delete: remove the row |
//! | hard delete | create: re-insert the previous row |
//! | delete (soft) | restore |
//! | restore | delete |
//! | update / workflow verb | update: write the previous row |

use super::{Applied, Batch, Mutation, MutationContext, run};
use crate::db::{Store, action_log, records};
use crate::error::{Result, TdError};
use crate::model::{ActionEntry, ActionType, EntityRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One reverted entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Undone {
    pub original_id: i64,
    pub inverse_id: i64,
    pub action_type: ActionType,
    pub entity_type: String,
    pub entity_id: String,
}

fn tombstone(record: EntityRecord, now: DateTime<Utc>) -> EntityRecord {
    match record {
        EntityRecord::Issue(mut e) => {
            e.deleted_at = Some(now);
            e.updated_at = now;
            EntityRecord::Issue(e)
        }
        EntityRecord::Comment(mut e) => {
            e.deleted_at = Some(now);
            EntityRecord::Comment(e)
        }
        EntityRecord::Board(mut e) => {
            e.deleted_at = Some(now);
            e.updated_at = now;
            EntityRecord::Board(e)
        }
        EntityRecord::BoardPosition(mut e) => {
            e.deleted_at = Some(now);
            e.updated_at = now;
            EntityRecord::BoardPosition(e)
        }
        EntityRecord::Note(mut e) => {
            e.deleted_at = Some(now);
            e.updated_at = now;
            EntityRecord::Note(e)
        }
        other => other,
    }
}

/// Build the inverse of `entry` against the entity's current row.
fn inverse(batch: &Batch<'_>, entry: &ActionEntry) -> Result<Mutation> {
    let (previous, _) = action_log::decode_payloads(entry)?;
    let current = records::load(batch.conn(), entry.entity_type, &entry.entity_id)?;

    let (action_type, new) = match previous {
        None if entry.entity_type.soft_deletes() => {
            let Some(current) = current.clone() else {
                return Err(TdError::Conflict(format!(
                    "cannot undo action {}: {} {} no longer exists",
                    entry.id, entry.entity_type, entry.entity_id
                )));
            };
            (ActionType::Delete, Some(tombstone(current, batch.now())))
        }
        None => (ActionType::Delete, None),
        Some(previous) => {
            let action = match entry.action_type {
                ActionType::Delete if current.is_none() => ActionType::Create,
                ActionType::Delete => ActionType::Restore,
                ActionType::Restore => ActionType::Delete,
                _ => ActionType::Update,
            };
            (action, Some(previous))
        }
    };

    Ok(Mutation {
        action_type,
        entity_type: entry.entity_type,
        entity_id: entry.entity_id.clone(),
        previous: current,
        new,
        undo_of: Some(entry.id),
    })
}

/// Revert the session's `count` most recent mutations, newest first. Every
/// action-log row a mutation wrote (cascades, auto-unblocks, git snapshots)
/// is reverted with it.
///
/// # Errors
///
/// `not_found` when the session has nothing to undo, `conflict` when an
/// entity needed for the inverse is gone, and storage errors.
pub fn undo(store: &Store, ctx: &MutationContext, count: usize) -> Result<Applied<Vec<Undone>>> {
    let count = count.max(1);
    run(store, ctx, |batch| {
        let entries = action_log::undoable(batch.conn(), &ctx.session_id, count)?;
        if entries.is_empty() {
            return Err(TdError::not_found("undoable action", ctx.session_id.clone()));
        }
        let mut undone = Vec::with_capacity(entries.len());
        for entry in &entries {
            let mutation = inverse(batch, entry)?;
            if mutation.new.is_none() && mutation.previous.is_none() {
                // Row already gone: record the undo without touching storage.
                tracing::debug!(action_id = entry.id, "undo target already removed");
            }
            let applied = batch.apply(mutation)?;
            undone.push(Undone {
                original_id: entry.id,
                inverse_id: applied.id,
                action_type: entry.action_type,
                entity_type: entry.entity_type.to_string(),
                entity_id: entry.entity_id.clone(),
            });
        }
        Ok(undone)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{activity, issues};
    use crate::error::ErrorCode;
    use crate::ids;
    use crate::model::{GitSnapshot, IssuePatch, LogType, Status};
    use crate::mutation::activity::{HandoffInput, add_dependency, add_handoff, add_log};
    use crate::mutation::issues::{
        NewIssue, TransitionOptions, Verb, create, delete, transition, update,
    };

    fn snapshot() -> GitSnapshot {
        GitSnapshot {
            id: ids::new_child_id(ids::SNAPSHOT_PREFIX),
            issue_id: None,
            commit_sha: "0123456789abcdef".into(),
            branch: "main".into(),
            dirty_files: 1,
            untracked_files: 0,
            captured_at: crate::time::now(),
        }
    }

    fn setup() -> (Store, MutationContext) {
        (Store::open_in_memory().unwrap(), MutationContext::new("ses_a"))
    }

    #[test]
    fn undo_update_restores_previous_state() {
        let (store, ctx) = setup();
        let issue = create(&store, &ctx, NewIssue::titled("before")).unwrap().value;
        let patch = IssuePatch {
            title: Some("after".into()),
            ..IssuePatch::default()
        };
        update(&store, &ctx, &issue.id, patch).unwrap();

        let undone = undo(&store, &ctx, 1).unwrap().value;
        assert_eq!(undone.len(), 1);
        assert_eq!(undone[0].action_type, ActionType::Update);
        let current = store.read(|c| issues::get(c, &issue.id)).unwrap();
        assert_eq!(current, issue);

        let inverse = store.read(|c| action_log::get(c, undone[0].inverse_id)).unwrap();
        assert_eq!(inverse.undo_of, Some(undone[0].original_id));
        let original = store.read(|c| action_log::get(c, undone[0].original_id)).unwrap();
        assert_eq!(original.undo_of, None);
    }

    #[test]
    fn undo_create_soft_deletes_and_undo_delete_restores() {
        let (store, ctx) = setup();
        let issue = create(&store, &ctx, NewIssue::titled("x")).unwrap().value;
        delete(&store, &ctx, &issue.id).unwrap();
        undo(&store, &ctx, 1).unwrap();
        assert!(store.read(|c| issues::get(c, &issue.id)).is_ok());

        // Next undo reaches the create: the issue is tombstoned.
        undo(&store, &ctx, 1).unwrap();
        let gone = store.read(|c| issues::get_any(c, &issue.id)).unwrap();
        assert!(gone.is_deleted());
        assert_eq!(undo(&store, &ctx, 1).unwrap_err().code(), ErrorCode::NotFound);
    }

    #[test]
    fn undo_last_n_reverts_transitions_and_logs() {
        let (store, ctx) = setup();
        let issue = create(&store, &ctx, NewIssue::titled("x")).unwrap().value;
        transition(&store, &ctx, &issue.id, Verb::Start, TransitionOptions::default()).unwrap();
        add_log(&store, &ctx, &issue.id, LogType::Progress, "step").unwrap();

        let undone = undo(&store, &ctx, 2).unwrap().value;
        assert_eq!(undone.len(), 2);
        assert!(store.read(|c| activity::logs_for_issue(c, &issue.id, None)).unwrap().is_empty());
        let current = store.read(|c| issues::get(c, &issue.id)).unwrap();
        assert_eq!(current.status, Status::Open);
    }

    #[test]
    fn undo_is_scoped_to_session() {
        let (store, ctx) = setup();
        create(&store, &ctx, NewIssue::titled("x")).unwrap();
        let other = MutationContext::new("ses_b");
        assert_eq!(undo(&store, &other, 1).unwrap_err().code(), ErrorCode::NotFound);
    }

    #[test]
    fn undo_start_with_snapshot_reopens_issue() {
        let (store, ctx) = setup();
        let issue = create(&store, &ctx, NewIssue::titled("x")).unwrap().value;
        let options = TransitionOptions {
            force: false,
            git_snapshot: Some(snapshot()),
        };
        let started = transition(&store, &ctx, &issue.id, Verb::Start, options).unwrap();
        assert_eq!(started.actions.len(), 2);

        let undone = undo(&store, &ctx, 1).unwrap().value;
        assert_eq!(undone.len(), 2);
        let current = store.read(|c| issues::get(c, &issue.id)).unwrap();
        assert_eq!(current.status, Status::Open);
        assert!(store.read(|c| activity::latest_snapshot(c, &issue.id)).unwrap().is_none());

        // The create is the next mutation back.
        let undone = undo(&store, &ctx, 1).unwrap().value;
        assert_eq!(undone[0].action_type, ActionType::Create);
    }

    #[test]
    fn undo_close_reblocks_auto_unblocked_dependent() {
        let (store, ctx) = setup();
        let blocker = create(&store, &ctx, NewIssue::titled("blocker")).unwrap().value;
        let blocked = create(&store, &ctx, NewIssue::titled("blocked")).unwrap().value;
        add_dependency(&store, &ctx, &blocked.id, &blocker.id).unwrap();
        transition(&store, &ctx, &blocked.id, Verb::Block, TransitionOptions::default()).unwrap();
        let closed =
            transition(&store, &ctx, &blocker.id, Verb::Close, TransitionOptions::default())
                .unwrap();
        assert_eq!(closed.value.unblocked, vec![blocked.id.clone()]);

        undo(&store, &ctx, 1).unwrap();
        let status = |id: &str| store.read(|c| issues::get(c, id)).unwrap().status;
        assert_eq!(status(&blocker.id), Status::Open);
        assert_eq!(status(&blocked.id), Status::Blocked);
    }

    #[test]
    fn undo_handoff_removes_its_snapshot_too() {
        let (store, ctx) = setup();
        let issue = create(&store, &ctx, NewIssue::titled("x")).unwrap().value;
        let input = HandoffInput {
            done: vec!["lexer".into()],
            ..HandoffInput::default()
        };
        add_handoff(&store, &ctx, &issue.id, input, Some(snapshot())).unwrap();

        let undone = undo(&store, &ctx, 1).unwrap().value;
        assert_eq!(undone.len(), 2);
        assert!(store.read(|c| activity::latest_handoff(c, &issue.id)).unwrap().is_none());
        assert!(store.read(|c| activity::latest_snapshot(c, &issue.id)).unwrap().is_none());
    }
}
