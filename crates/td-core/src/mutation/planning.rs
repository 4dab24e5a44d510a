//! Work sessions, boards and notes.

use super::activity::add_log_in;
use super::{Applied, Mutation, MutationContext, run};
use crate::db::{Store, issues, planning};
use crate::error::{Result, TdError};
use crate::ids;
use crate::model::{
    ActionType, Board, BoardPosition, EntityRecord, Log, LogFanout, LogType, Note, Status,
    WorkSession, WorkSessionIssue,
};

// ---------------------------------------------------------------------------
// Work sessions
// ---------------------------------------------------------------------------

/// Start a work session. Only one may be active per project.
///
/// # Errors
///
/// `conflict` when a session is already active, `invalid_input` for an empty
/// name.
pub fn start_work_session(
    store: &Store,
    ctx: &MutationContext,
    name: &str,
    log_fanout: LogFanout,
) -> Result<Applied<WorkSession>> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TdError::invalid("work session name must not be empty"));
    }
    run(store, ctx, |batch| {
        if let Some(active) = planning::active_work_session(batch.conn())? {
            return Err(TdError::Conflict(format!(
                "work session '{}' ({}) is already active; end it first",
                active.name, active.id
            )));
        }
        let ws = WorkSession {
            id: ids::new_child_id(ids::WORK_SESSION_PREFIX),
            name: name.to_string(),
            session_id: batch.ctx().session_id.clone(),
            started_at: batch.now(),
            ended_at: None,
            active: true,
            log_fanout,
        };
        batch.apply(Mutation::create(EntityRecord::WorkSession(ws.clone())))?;
        Ok(ws)
    })
}

fn require_active(conn: &rusqlite::Connection) -> Result<WorkSession> {
    planning::active_work_session(conn)?
        .ok_or_else(|| TdError::not_found("work session", "active"))
}

/// # Errors
///
/// `not_found` when no work session is active.
pub fn end_work_session(store: &Store, ctx: &MutationContext) -> Result<Applied<WorkSession>> {
    run(store, ctx, |batch| {
        let before = require_active(batch.conn())?;
        let mut after = before.clone();
        after.active = false;
        after.ended_at = Some(batch.now());
        batch.apply(Mutation::change(
            ActionType::Update,
            EntityRecord::WorkSession(before),
            EntityRecord::WorkSession(after.clone()),
        ))?;
        Ok(after)
    })
}

/// Tag issues to the active work session. Already-tagged issues are skipped.
///
/// # Errors
///
/// `not_found` when no session is active or an issue is missing.
pub fn tag_issues(
    store: &Store,
    ctx: &MutationContext,
    issue_ids: &[String],
) -> Result<Applied<Vec<String>>> {
    run(store, ctx, |batch| {
        let ws = require_active(batch.conn())?;
        let mut tagged = Vec::new();
        for issue_id in issue_ids {
            issues::get(batch.conn(), issue_id)?;
            let tag = WorkSessionIssue::new(&ws.id, issue_id, batch.now());
            if planning::find_ws_issue(batch.conn(), &tag.id)?.is_some() {
                continue;
            }
            batch.apply(Mutation::create(EntityRecord::WorkSessionIssue(tag)))?;
            tagged.push(issue_id.clone());
        }
        Ok(tagged)
    })
}

/// # Errors
///
/// `not_found` when no session is active.
pub fn untag_issues(
    store: &Store,
    ctx: &MutationContext,
    issue_ids: &[String],
) -> Result<Applied<Vec<String>>> {
    run(store, ctx, |batch| {
        let ws = require_active(batch.conn())?;
        let mut untagged = Vec::new();
        for issue_id in issue_ids {
            let id = crate::model::links::edge_id("wi-", &ws.id, issue_id);
            if let Some(tag) = planning::find_ws_issue(batch.conn(), &id)? {
                batch.apply(Mutation::remove(EntityRecord::WorkSessionIssue(tag)))?;
                untagged.push(issue_id.clone());
            }
        }
        Ok(untagged)
    })
}

/// Write one log through the active work session, fanned out by its rule:
/// `tagged` copies it to every tagged issue that is not closed, `focused`
/// writes it to the focused issue only.
///
/// # Errors
///
/// `not_found` without an active session, `invalid_input` when fan-out is
/// off or there is no target.
pub fn log_to_work_session(
    store: &Store,
    ctx: &MutationContext,
    log_type: LogType,
    message: &str,
    focused: Option<&str>,
) -> Result<Applied<Vec<Log>>> {
    run(store, ctx, |batch| {
        let ws = require_active(batch.conn())?;
        let targets: Vec<String> = match ws.log_fanout {
            LogFanout::Off => {
                return Err(TdError::invalid(format!(
                    "log fan-out is off for work session '{}'",
                    ws.name
                )));
            }
            LogFanout::Focused => focused.map(str::to_string).into_iter().collect(),
            LogFanout::Tagged => {
                let mut open = Vec::new();
                for id in planning::tagged_issue_ids(batch.conn(), &ws.id)? {
                    let live = issues::find(batch.conn(), &id)?
                        .is_some_and(|i| !i.is_deleted() && i.status != Status::Closed);
                    if live {
                        open.push(id);
                    }
                }
                open
            }
        };
        if targets.is_empty() {
            return Err(TdError::invalid(format!(
                "work session '{}' has no open issues to log to",
                ws.name
            )));
        }
        targets
            .iter()
            .map(|id| add_log_in(batch, id, log_type, message, Some(&ws.id)))
            .collect()
    })
}

// ---------------------------------------------------------------------------
// Boards
// ---------------------------------------------------------------------------

fn require_board(conn: &rusqlite::Connection, key: &str) -> Result<Board> {
    planning::find_live_board(conn, key)?.ok_or_else(|| TdError::not_found("board", key))
}

fn check_board_name(
    conn: &rusqlite::Connection,
    name: &str,
    own_id: Option<&str>,
) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TdError::invalid("board name must not be empty"));
    }
    if let Some(existing) = planning::find_live_board(conn, name)? {
        if Some(existing.id.as_str()) != own_id && existing.name.eq_ignore_ascii_case(name) {
            return Err(TdError::Conflict(format!("board '{name}' already exists")));
        }
    }
    Ok(name.to_string())
}

/// # Errors
///
/// `conflict` for a duplicate name, `parse_error` / `validation_error` for a
/// bad query.
pub fn create_board(
    store: &Store,
    ctx: &MutationContext,
    name: &str,
    query: &str,
    description: &str,
) -> Result<Applied<Board>> {
    crate::tdq::compile(query)?;
    run(store, ctx, |batch| {
        let name = check_board_name(batch.conn(), name, None)?;
        let now = batch.now();
        let board = Board {
            id: ids::new_child_id(ids::BOARD_PREFIX),
            name,
            query: query.trim().to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        batch.apply(Mutation::create(EntityRecord::Board(board.clone())))?;
        Ok(board)
    })
}

/// Fields settable on a board.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardPatch {
    pub name: Option<String>,
    pub query: Option<String>,
    pub description: Option<String>,
}

/// # Errors
///
/// `not_found`, `conflict`, or query errors as for [`create_board`].
pub fn edit_board(
    store: &Store,
    ctx: &MutationContext,
    key: &str,
    patch: BoardPatch,
) -> Result<Applied<Board>> {
    if let Some(query) = &patch.query {
        crate::tdq::compile(query)?;
    }
    run(store, ctx, |batch| {
        let before = require_board(batch.conn(), key)?;
        let mut after = before.clone();
        if let Some(name) = &patch.name {
            after.name = check_board_name(batch.conn(), name, Some(&before.id))?;
        }
        if let Some(query) = patch.query {
            after.query = query.trim().to_string();
        }
        if let Some(description) = patch.description {
            after.description = description;
        }
        if after == before {
            return Ok(before);
        }
        after.updated_at = batch.now();
        batch.apply(Mutation::change(
            ActionType::Update,
            EntityRecord::Board(before),
            EntityRecord::Board(after.clone()),
        ))?;
        Ok(after)
    })
}

/// Soft-delete a board and every live position on it.
///
/// # Errors
///
/// `not_found` for an unknown board.
pub fn delete_board(store: &Store, ctx: &MutationContext, key: &str) -> Result<Applied<Board>> {
    run(store, ctx, |batch| {
        let before = require_board(batch.conn(), key)?;
        let now = batch.now();
        for position in planning::positions_for_board(batch.conn(), &before.id)? {
            let mut gone = position.clone();
            gone.deleted_at = Some(now);
            gone.updated_at = now;
            batch.apply(Mutation::change(
                ActionType::Delete,
                EntityRecord::BoardPosition(position),
                EntityRecord::BoardPosition(gone),
            ))?;
        }
        let mut after = before.clone();
        after.deleted_at = Some(now);
        after.updated_at = now;
        batch.apply(Mutation::change(
            ActionType::Delete,
            EntityRecord::Board(before),
            EntityRecord::Board(after.clone()),
        ))?;
        Ok(after)
    })
}

/// Pin `issue_id` at `position` on a board. A previously removed position row
/// is revived.
///
/// # Errors
///
/// `not_found` for an unknown board or issue, `invalid_input` for a negative
/// position.
pub fn position_issue(
    store: &Store,
    ctx: &MutationContext,
    board_key: &str,
    issue_id: &str,
    position: i64,
) -> Result<Applied<BoardPosition>> {
    if position < 0 {
        return Err(TdError::invalid("board position must not be negative"));
    }
    run(store, ctx, |batch| {
        let board = require_board(batch.conn(), board_key)?;
        issues::get(batch.conn(), issue_id)?;
        let fresh = BoardPosition::new(&board.id, issue_id, position, batch.now());
        match planning::find_position(batch.conn(), &fresh.id)? {
            Some(existing) => {
                if existing.deleted_at.is_none() && existing.position == position {
                    return Ok(existing);
                }
                let action = if existing.deleted_at.is_some() {
                    ActionType::Restore
                } else {
                    ActionType::Update
                };
                batch.apply(Mutation::change(
                    action,
                    EntityRecord::BoardPosition(existing),
                    EntityRecord::BoardPosition(fresh.clone()),
                ))?;
            }
            None => {
                batch.apply(Mutation::create(EntityRecord::BoardPosition(fresh.clone())))?;
            }
        }
        Ok(fresh)
    })
}

/// # Errors
///
/// `not_found` when the issue has no live position on the board.
pub fn unposition_issue(
    store: &Store,
    ctx: &MutationContext,
    board_key: &str,
    issue_id: &str,
) -> Result<Applied<BoardPosition>> {
    run(store, ctx, |batch| {
        let board = require_board(batch.conn(), board_key)?;
        let id = crate::model::links::edge_id("bp-", &board.id, issue_id);
        let before = planning::find_position(batch.conn(), &id)?
            .filter(|p| p.deleted_at.is_none())
            .ok_or_else(|| {
                TdError::not_found("board position", format!("{}:{issue_id}", board.name))
            })?;
        let mut after = before.clone();
        let now = batch.now();
        after.deleted_at = Some(now);
        after.updated_at = now;
        batch.apply(Mutation::change(
            ActionType::Delete,
            EntityRecord::BoardPosition(before),
            EntityRecord::BoardPosition(after.clone()),
        ))?;
        Ok(after)
    })
}

// ---------------------------------------------------------------------------
// Notes
// ---------------------------------------------------------------------------

/// # Errors
///
/// `invalid_input` for an empty title.
pub fn add_note(
    store: &Store,
    ctx: &MutationContext,
    title: &str,
    content: &str,
) -> Result<Applied<Note>> {
    let title = title.trim();
    if title.is_empty() {
        return Err(TdError::invalid("note title must not be empty"));
    }
    run(store, ctx, |batch| {
        let now = batch.now();
        let note = Note {
            id: ids::new_child_id(ids::NOTE_PREFIX),
            title: title.to_string(),
            content: content.to_string(),
            pinned: false,
            archived: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        batch.apply(Mutation::create(EntityRecord::Note(note.clone())))?;
        Ok(note)
    })
}

/// Changes applicable to a note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub pinned: Option<bool>,
    pub archived: Option<bool>,
    pub deleted: bool,
}

/// # Errors
///
/// `not_found` for an unknown or deleted note.
pub fn edit_note(
    store: &Store,
    ctx: &MutationContext,
    id: &str,
    patch: NotePatch,
) -> Result<Applied<Note>> {
    run(store, ctx, |batch| {
        let before = planning::find_note(batch.conn(), id)?
            .filter(|n| n.deleted_at.is_none())
            .ok_or_else(|| TdError::not_found("note", id))?;
        let mut after = before.clone();
        if let Some(title) = &patch.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(TdError::invalid("note title must not be empty"));
            }
            after.title = title.to_string();
        }
        if let Some(content) = patch.content {
            after.content = content;
        }
        if let Some(pinned) = patch.pinned {
            after.pinned = pinned;
        }
        if let Some(archived) = patch.archived {
            after.archived = archived;
        }
        let now = batch.now();
        if patch.deleted {
            after.deleted_at = Some(now);
        }
        if after == before {
            return Ok(before);
        }
        after.updated_at = now;
        let action = if patch.deleted {
            ActionType::Delete
        } else {
            ActionType::Update
        };
        batch.apply(Mutation::change(
            action,
            EntityRecord::Note(before),
            EntityRecord::Note(after.clone()),
        ))?;
        Ok(after)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::mutation::issues::{NewIssue, TransitionOptions, Verb, create, transition};

    fn setup() -> (Store, MutationContext) {
        (Store::open_in_memory().unwrap(), MutationContext::new("ses_a"))
    }

    #[test]
    fn one_active_work_session() {
        let (store, ctx) = setup();
        start_work_session(&store, &ctx, "sprint", LogFanout::Tagged).unwrap();
        let err = start_work_session(&store, &ctx, "again", LogFanout::Tagged).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);
        end_work_session(&store, &ctx).unwrap();
        assert!(end_work_session(&store, &ctx).is_err());
        start_work_session(&store, &ctx, "again", LogFanout::Tagged).unwrap();
    }

    #[test]
    fn work_session_log_fans_out_to_open_tagged_issues() {
        let (store, ctx) = setup();
        let a = create(&store, &ctx, NewIssue::titled("a")).unwrap().value.id;
        let b = create(&store, &ctx, NewIssue::titled("b")).unwrap().value.id;
        let c = create(&store, &ctx, NewIssue::titled("c")).unwrap().value.id;
        transition(&store, &ctx, &c, Verb::Close, TransitionOptions::default()).unwrap();

        start_work_session(&store, &ctx, "ws", LogFanout::Tagged).unwrap();
        let tagged = tag_issues(&store, &ctx, &[a.clone(), b.clone(), c.clone()]).unwrap();
        assert_eq!(tagged.value.len(), 3);
        assert!(tag_issues(&store, &ctx, &[a.clone()]).unwrap().value.is_empty());

        let logs = log_to_work_session(&store, &ctx, LogType::Progress, "progress", None)
            .unwrap()
            .value;
        let mut targets: Vec<_> = logs.iter().map(|l| l.issue_id.clone()).collect();
        targets.sort();
        let mut expected = vec![a.clone(), b];
        expected.sort();
        assert_eq!(targets, expected);
        assert!(logs.iter().all(|l| l.work_session_id.is_some()));

        untag_issues(&store, &ctx, &[a]).unwrap();
    }

    #[test]
    fn board_lifecycle_with_positions() {
        let (store, ctx) = setup();
        let issue = create(&store, &ctx, NewIssue::titled("a")).unwrap().value.id;
        let board = create_board(&store, &ctx, "Now", "status = open", "").unwrap().value;
        assert_eq!(
            create_board(&store, &ctx, "now", "", "").unwrap_err().code(),
            ErrorCode::Conflict
        );
        assert_eq!(
            create_board(&store, &ctx, "bad", "status = nope", "").unwrap_err().code(),
            ErrorCode::ValidationError
        );

        position_issue(&store, &ctx, "Now", &issue, 3).unwrap();
        let positions = store.read(|c| planning::positions_for_board(c, &board.id)).unwrap();
        assert_eq!(positions.len(), 1);

        unposition_issue(&store, &ctx, &board.id, &issue).unwrap();
        position_issue(&store, &ctx, "Now", &issue, 1).unwrap();

        let applied = delete_board(&store, &ctx, "now").unwrap();
        assert_eq!(applied.actions.len(), 2);
        assert!(store.read(|c| planning::positions_for_board(c, &board.id)).unwrap().is_empty());
        assert!(store.read(|c| planning::find_live_board(c, "Now")).unwrap().is_none());
    }

    #[test]
    fn notes_pin_archive_delete() {
        let (store, ctx) = setup();
        let note = add_note(&store, &ctx, "Ideas", "cache the plan").unwrap().value;
        let pinned = edit_note(
            &store,
            &ctx,
            &note.id,
            NotePatch {
                pinned: Some(true),
                ..NotePatch::default()
            },
        )
        .unwrap()
        .value;
        assert!(pinned.pinned);
        edit_note(
            &store,
            &ctx,
            &note.id,
            NotePatch {
                archived: Some(true),
                ..NotePatch::default()
            },
        )
        .unwrap();
        assert!(store.read(|c| planning::list_notes(c, false)).unwrap().is_empty());
        assert_eq!(store.read(|c| planning::list_notes(c, true)).unwrap().len(), 1);
        edit_note(
            &store,
            &ctx,
            &note.id,
            NotePatch {
                deleted: true,
                ..NotePatch::default()
            },
        )
        .unwrap();
        assert!(store.read(|c| planning::list_notes(c, true)).unwrap().is_empty());
    }
}
