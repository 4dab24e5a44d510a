//! Logs, handoffs, comments, dependencies and file links.

use super::{Applied, Batch, Mutation, MutationContext, run};
use crate::db::{Store, activity, history, issues, links};
use crate::error::{Result, TdError};
use crate::ids;
use crate::model::{
    ActionType, Comment, Dependency, EntityRecord, FileRole, GitSnapshot, Handoff, IssueFile, Log,
    LogType,
};

/// Append a log entry inside an existing batch.
///
/// # Errors
///
/// `not_found` for a missing issue, `invalid_input` for an empty message.
pub fn add_log_in(
    batch: &mut Batch<'_>,
    issue_id: &str,
    log_type: LogType,
    message: &str,
    work_session_id: Option<&str>,
) -> Result<Log> {
    let message = message.trim();
    if message.is_empty() {
        return Err(TdError::invalid("log message must not be empty"));
    }
    issues::get(batch.conn(), issue_id)?;
    let now = batch.now();
    let session = batch.ctx().session_id.clone();
    let log = Log {
        id: ids::new_child_id(ids::LOG_PREFIX),
        issue_id: issue_id.to_string(),
        session_id: session.clone(),
        work_session_id: work_session_id.map(str::to_string),
        log_type,
        message: message.to_string(),
        timestamp: now,
    };
    batch.apply(Mutation::create(EntityRecord::Log(log.clone())))?;
    history::record(batch.conn(), issue_id, &session, "log", &now)?;
    Ok(log)
}

/// # Errors
///
/// See [`add_log_in`].
pub fn add_log(
    store: &Store,
    ctx: &MutationContext,
    issue_id: &str,
    log_type: LogType,
    message: &str,
) -> Result<Applied<Log>> {
    run(store, ctx, |batch| add_log_in(batch, issue_id, log_type, message, None))
}

/// Body of a handoff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandoffInput {
    pub done: Vec<String>,
    pub remaining: Vec<String>,
    pub decisions: Vec<String>,
    pub uncertain: Vec<String>,
}

fn clean(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Record a handoff. Earlier handoffs are kept.
///
/// # Errors
///
/// `not_found` for a missing issue, `invalid_input` when every list is empty.
pub fn add_handoff(
    store: &Store,
    ctx: &MutationContext,
    issue_id: &str,
    input: HandoffInput,
    git_snapshot: Option<GitSnapshot>,
) -> Result<Applied<Handoff>> {
    run(store, ctx, |batch| {
        issues::get(batch.conn(), issue_id)?;
        let now = batch.now();
        let session = batch.ctx().session_id.clone();
        let snapshot_id = match git_snapshot {
            Some(mut snapshot) => {
                snapshot.issue_id = Some(issue_id.to_string());
                let id = snapshot.id.clone();
                batch.apply(Mutation::create(EntityRecord::GitSnapshot(snapshot)))?;
                Some(id)
            }
            None => None,
        };
        let handoff = Handoff {
            id: ids::new_child_id(ids::HANDOFF_PREFIX),
            issue_id: issue_id.to_string(),
            session_id: session.clone(),
            done: clean(input.done),
            remaining: clean(input.remaining),
            decisions: clean(input.decisions),
            uncertain: clean(input.uncertain),
            git_snapshot_id: snapshot_id,
            timestamp: now,
        };
        if handoff.is_empty() {
            return Err(TdError::invalid(
                "handoff needs at least one done, remaining, decision or uncertain item",
            ));
        }
        batch.apply(Mutation::create(EntityRecord::Handoff(handoff.clone())))?;
        history::record(batch.conn(), issue_id, &session, "handoff", &now)?;
        Ok(handoff)
    })
}

/// # Errors
///
/// `not_found` for a missing issue, `invalid_input` for empty text.
pub fn add_comment(
    store: &Store,
    ctx: &MutationContext,
    issue_id: &str,
    text: &str,
) -> Result<Applied<Comment>> {
    let text = text.trim();
    if text.is_empty() {
        return Err(TdError::invalid("comment must not be empty"));
    }
    run(store, ctx, |batch| {
        issues::get(batch.conn(), issue_id)?;
        let comment = Comment {
            id: ids::new_child_id(ids::COMMENT_PREFIX),
            issue_id: issue_id.to_string(),
            session_id: batch.ctx().session_id.clone(),
            text: text.to_string(),
            created_at: batch.now(),
            deleted_at: None,
        };
        batch.apply(Mutation::create(EntityRecord::Comment(comment.clone())))?;
        Ok(comment)
    })
}

/// Soft-delete a comment.
///
/// # Errors
///
/// `not_found` for an unknown or already deleted comment.
pub fn delete_comment(
    store: &Store,
    ctx: &MutationContext,
    comment_id: &str,
) -> Result<Applied<Comment>> {
    run(store, ctx, |batch| {
        let before = activity::find_comment(batch.conn(), comment_id)?
            .filter(|c| c.deleted_at.is_none())
            .ok_or_else(|| TdError::not_found("comment", comment_id))?;
        let mut after = before.clone();
        after.deleted_at = Some(batch.now());
        batch.apply(Mutation::change(
            ActionType::Delete,
            EntityRecord::Comment(before),
            EntityRecord::Comment(after.clone()),
        ))?;
        Ok(after)
    })
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// Make `blocked_id` wait on `blocker_id`.
///
/// # Errors
///
/// `invalid_input` for self-dependencies and cycles, `conflict` when the edge
/// exists, `not_found` for unknown issues.
pub fn add_dependency(
    store: &Store,
    ctx: &MutationContext,
    blocked_id: &str,
    blocker_id: &str,
) -> Result<Applied<Dependency>> {
    if blocked_id == blocker_id {
        return Err(TdError::invalid("an issue cannot depend on itself"));
    }
    run(store, ctx, |batch| {
        issues::get(batch.conn(), blocked_id)?;
        issues::get(batch.conn(), blocker_id)?;
        let dep = Dependency::new(blocked_id, blocker_id, batch.now());
        if links::find_dependency(batch.conn(), &dep.id)?.is_some() {
            return Err(TdError::Conflict(format!(
                "{blocked_id} already depends on {blocker_id}"
            )));
        }
        if links::would_create_dependency_cycle(batch.conn(), blocked_id, blocker_id)? {
            return Err(TdError::invalid(format!(
                "{blocked_id} -> {blocker_id} would create a dependency cycle"
            )));
        }
        batch.apply(Mutation::create(EntityRecord::Dependency(dep.clone())))?;
        Ok(dep)
    })
}

/// # Errors
///
/// `not_found` when the edge does not exist.
pub fn remove_dependency(
    store: &Store,
    ctx: &MutationContext,
    blocked_id: &str,
    blocker_id: &str,
) -> Result<Applied<Dependency>> {
    run(store, ctx, |batch| {
        let id = crate::model::links::edge_id("dp-", blocked_id, blocker_id);
        let dep = links::find_dependency(batch.conn(), &id)?.ok_or_else(|| {
            TdError::not_found("dependency", format!("{blocked_id} -> {blocker_id}"))
        })?;
        batch.apply(Mutation::remove(EntityRecord::Dependency(dep.clone())))?;
        Ok(dep)
    })
}

// ---------------------------------------------------------------------------
// File links
// ---------------------------------------------------------------------------

/// Link a file, or update the role and sha of an existing link.
///
/// # Errors
///
/// `not_found` for a missing issue, `invalid_input` for an empty path.
pub fn link_file(
    store: &Store,
    ctx: &MutationContext,
    issue_id: &str,
    path: &str,
    role: FileRole,
    sha_at_link: String,
) -> Result<Applied<IssueFile>> {
    let path = path.trim();
    if path.is_empty() {
        return Err(TdError::invalid("file path must not be empty"));
    }
    run(store, ctx, |batch| {
        issues::get(batch.conn(), issue_id)?;
        let link = IssueFile::new(issue_id, path, role, sha_at_link, batch.now());
        match links::find_file_link(batch.conn(), issue_id, path)? {
            Some(existing) => {
                let mut updated = link;
                updated.id = existing.id.clone();
                if updated.role == existing.role && updated.sha_at_link == existing.sha_at_link {
                    return Ok(existing);
                }
                batch.apply(Mutation::change(
                    ActionType::Update,
                    EntityRecord::IssueFile(existing),
                    EntityRecord::IssueFile(updated.clone()),
                ))?;
                Ok(updated)
            }
            None => {
                batch.apply(Mutation::create(EntityRecord::IssueFile(link.clone())))?;
                Ok(link)
            }
        }
    })
}

/// # Errors
///
/// `not_found` when the file is not linked.
pub fn unlink_file(
    store: &Store,
    ctx: &MutationContext,
    issue_id: &str,
    path: &str,
) -> Result<Applied<IssueFile>> {
    run(store, ctx, |batch| {
        let link = links::find_file_link(batch.conn(), issue_id, path.trim())?
            .ok_or_else(|| TdError::not_found("file link", format!("{issue_id}:{path}")))?;
        batch.apply(Mutation::remove(EntityRecord::IssueFile(link.clone())))?;
        Ok(link)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::mutation::issues::{NewIssue, create};

    fn setup() -> (Store, MutationContext, String, String) {
        let store = Store::open_in_memory().unwrap();
        let ctx = MutationContext::new("ses_a");
        let a = create(&store, &ctx, NewIssue::titled("a")).unwrap().value.id;
        let b = create(&store, &ctx, NewIssue::titled("b")).unwrap().value.id;
        (store, ctx, a, b)
    }

    #[test]
    fn log_records_history_and_rejects_empty() {
        let (store, ctx, a, _) = setup();
        add_log(&store, &ctx, &a, LogType::Decision, "use sqlite").unwrap();
        assert!(add_log(&store, &ctx, &a, LogType::Progress, "  ").is_err());
        let logs = store.read(|c| activity::logs_for_issue(c, &a, None)).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].log_type, LogType::Decision);
        assert!(store.read(|c| history::was_involved(c, &a, "ses_a")).unwrap());
    }

    #[test]
    fn handoffs_accumulate() {
        let (store, ctx, a, _) = setup();
        let first = HandoffInput {
            done: vec!["parser".into()],
            ..HandoffInput::default()
        };
        let second = HandoffInput {
            remaining: vec!["evaluator".into(), " ".into()],
            ..HandoffInput::default()
        };
        add_handoff(&store, &ctx, &a, first, None).unwrap();
        let latest = add_handoff(&store, &ctx, &a, second, None).unwrap().value;
        assert_eq!(latest.remaining, vec!["evaluator"]);
        assert_eq!(store.read(|c| activity::handoffs_for_issue(c, &a)).unwrap().len(), 2);
        let err = add_handoff(&store, &ctx, &a, HandoffInput::default(), None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[test]
    fn comments_soft_delete() {
        let (store, ctx, a, _) = setup();
        let comment = add_comment(&store, &ctx, &a, "looks good").unwrap().value;
        delete_comment(&store, &ctx, &comment.id).unwrap();
        assert!(store.read(|c| activity::comments_for_issue(c, &a)).unwrap().is_empty());
        assert!(delete_comment(&store, &ctx, &comment.id).is_err());
    }

    #[test]
    fn dependency_rules() {
        let (store, ctx, a, b) = setup();
        add_dependency(&store, &ctx, &a, &b).unwrap();
        assert_eq!(
            add_dependency(&store, &ctx, &a, &b).unwrap_err().code(),
            ErrorCode::Conflict
        );
        assert_eq!(
            add_dependency(&store, &ctx, &b, &a).unwrap_err().code(),
            ErrorCode::InvalidInput
        );
        assert!(add_dependency(&store, &ctx, &a, &a).is_err());
        remove_dependency(&store, &ctx, &a, &b).unwrap();
        assert!(store.read(|c| links::blockers_of(c, &a)).unwrap().is_empty());
    }

    #[test]
    fn relinking_updates_role() {
        let (store, ctx, a, _) = setup();
        let role = FileRole::Implementation;
        let first = link_file(&store, &ctx, &a, "src/lib.rs", role, String::new())
            .unwrap()
            .value;
        let second = link_file(&store, &ctx, &a, "src/lib.rs", FileRole::Test, String::new())
            .unwrap()
            .value;
        assert_eq!(first.id, second.id);
        let files = store.read(|c| links::files_for_issue(c, &a)).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].role, FileRole::Test);
        unlink_file(&store, &ctx, &a, "src/lib.rs").unwrap();
        assert!(store.read(|c| links::files_for_issue(c, &a)).unwrap().is_empty());
    }
}
