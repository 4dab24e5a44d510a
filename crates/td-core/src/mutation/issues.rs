//! Issue lifecycle: create, edit, soft delete, restore and workflow verbs.

use super::{Applied, Batch, Mutation, MutationContext, run};
use crate::db::{Store, activity, history, issues, links};
use crate::error::{Result, TdError};
use crate::ids;
use crate::model::{
    ActionType, EntityRecord, GitSnapshot, Issue, IssuePatch, IssueType, Priority, Status,
    issue::{is_valid_points, normalize_labels},
};
use crate::workflow::{GuardFacts, TransitionRequest};
use chrono::{DateTime, Utc};
use std::fmt;

/// Input for [`create`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub acceptance: String,
    pub issue_type: IssueType,
    pub priority: Priority,
    pub points: u8,
    pub labels: Vec<String>,
    pub parent_id: Option<String>,
    pub minor: bool,
    pub sprint: String,
    pub created_branch: String,
    pub defer_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
}

impl NewIssue {
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(TdError::invalid("title must not be empty"));
    }
    Ok(title.to_string())
}

fn validate_points(points: u8) -> Result<()> {
    if is_valid_points(points) {
        Ok(())
    } else {
        Err(TdError::invalid(format!(
            "invalid points {points}: expected one of 0, 1, 2, 3, 5, 8, 13, 21"
        )))
    }
}

fn fresh_issue_id(batch: &Batch<'_>) -> Result<String> {
    for _ in 0..ids::MAX_ID_ATTEMPTS {
        let candidate = ids::new_issue_id();
        if !issues::id_taken(batch.conn(), &candidate)? {
            return Ok(candidate);
        }
        tracing::debug!(%candidate, "issue id collision, retrying");
    }
    Err(TdError::Conflict(format!(
        "could not allocate a unique issue id after {} attempts",
        ids::MAX_ID_ATTEMPTS
    )))
}

/// Create an issue inside an existing batch.
///
/// # Errors
///
/// `invalid_input` for an empty title, bad points or a missing parent.
pub fn create_in(batch: &mut Batch<'_>, input: NewIssue) -> Result<Issue> {
    let title = validate_title(&input.title)?;
    validate_points(input.points)?;
    if let Some(parent) = &input.parent_id {
        issues::get(batch.conn(), parent)
            .map_err(|_| TdError::invalid(format!("parent issue {parent} does not exist")))?;
    }
    let now = batch.now();
    let mut issue = Issue::new(fresh_issue_id(batch)?, title, now);
    issue.description = input.description;
    issue.acceptance = input.acceptance;
    issue.issue_type = input.issue_type;
    issue.priority = input.priority;
    issue.points = input.points;
    issue.labels = normalize_labels(&input.labels);
    issue.parent_id = input.parent_id;
    issue.creator_session = Some(batch.ctx().session_id.clone());
    issue.minor = input.minor;
    issue.sprint = input.sprint;
    issue.created_branch = input.created_branch;
    issue.defer_at = input.defer_at;
    issue.due_at = input.due_at;
    batch.apply(Mutation::create(EntityRecord::Issue(issue.clone())))?;
    Ok(issue)
}

/// # Errors
///
/// See [`create_in`].
pub fn create(store: &Store, ctx: &MutationContext, input: NewIssue) -> Result<Applied<Issue>> {
    run(store, ctx, |batch| create_in(batch, input))
}

fn apply_patch(batch: &Batch<'_>, issue: &mut Issue, patch: IssuePatch) -> Result<()> {
    if let Some(title) = patch.title {
        issue.title = validate_title(&title)?;
    }
    if let Some(description) = patch.description {
        issue.description = description;
    }
    if let Some(acceptance) = patch.acceptance {
        issue.acceptance = acceptance;
    }
    if let Some(kind) = patch.issue_type {
        issue.issue_type = kind;
    }
    if let Some(priority) = patch.priority {
        issue.priority = priority;
    }
    if let Some(points) = patch.points {
        validate_points(points)?;
        issue.points = points;
    }
    if let Some(labels) = patch.labels {
        issue.labels = normalize_labels(&labels);
    }
    if !patch.add_labels.is_empty() || !patch.remove_labels.is_empty() {
        let remove = normalize_labels(&patch.remove_labels);
        let mut labels: Vec<String> = issue
            .labels
            .iter()
            .filter(|l| !remove.contains(*l))
            .cloned()
            .collect();
        labels.extend(patch.add_labels);
        issue.labels = normalize_labels(&labels);
    }
    if let Some(parent) = patch.parent_id {
        if let Some(parent_id) = &parent {
            if parent_id == &issue.id {
                return Err(TdError::invalid("an issue cannot be its own parent"));
            }
            issues::get(batch.conn(), parent_id)
                .map_err(|_| TdError::invalid(format!("parent issue {parent_id} does not exist")))?;
            if issues::would_create_parent_cycle(batch.conn(), &issue.id, parent_id)? {
                return Err(TdError::invalid(format!(
                    "setting parent of {} to {parent_id} would create a cycle",
                    issue.id
                )));
            }
        }
        issue.parent_id = parent;
    }
    if let Some(minor) = patch.minor {
        issue.minor = minor;
    }
    if let Some(sprint) = patch.sprint {
        issue.sprint = sprint;
    }
    if let Some(defer_at) = patch.defer_at {
        issue.defer_at = defer_at;
    }
    if let Some(due_at) = patch.due_at {
        issue.due_at = due_at;
    }
    Ok(())
}

/// Edit fields on a live issue. Status is not editable here.
///
/// # Errors
///
/// `not_found` for an unknown id, `invalid_input` for an empty patch or an
/// invalid field value.
pub fn update(
    store: &Store,
    ctx: &MutationContext,
    id: &str,
    patch: IssuePatch,
) -> Result<Applied<Issue>> {
    if patch.is_empty() {
        return Err(TdError::invalid("nothing to update"));
    }
    run(store, ctx, |batch| {
        let before = issues::get(batch.conn(), id)?;
        let mut after = before.clone();
        apply_patch(batch, &mut after, patch)?;
        if after == before {
            return Ok(before);
        }
        after.updated_at = batch.now();
        batch.apply(Mutation::change(
            ActionType::Update,
            EntityRecord::Issue(before),
            EntityRecord::Issue(after.clone()),
        ))?;
        Ok(after)
    })
}

/// Soft-delete a live issue.
///
/// # Errors
///
/// `not_found` when the issue does not exist or is already deleted.
pub fn delete(store: &Store, ctx: &MutationContext, id: &str) -> Result<Applied<Issue>> {
    run(store, ctx, |batch| {
        let before = issues::get(batch.conn(), id)?;
        let mut after = before.clone();
        let now = batch.now();
        after.deleted_at = Some(now);
        after.updated_at = now;
        batch.apply(Mutation::change(
            ActionType::Delete,
            EntityRecord::Issue(before),
            EntityRecord::Issue(after.clone()),
        ))?;
        Ok(after)
    })
}

/// Bring back a soft-deleted issue.
///
/// # Errors
///
/// `not_found` for an unknown id, `invalid_input` when it is not deleted.
pub fn restore(store: &Store, ctx: &MutationContext, id: &str) -> Result<Applied<Issue>> {
    run(store, ctx, |batch| {
        let before = issues::get_any(batch.conn(), id)?;
        if !before.is_deleted() {
            return Err(TdError::invalid(format!("{id} is not deleted")));
        }
        let mut after = before.clone();
        after.deleted_at = None;
        after.updated_at = batch.now();
        batch.apply(Mutation::change(
            ActionType::Restore,
            EntityRecord::Issue(before),
            EntityRecord::Issue(after.clone()),
        ))?;
        Ok(after)
    })
}

// ---------------------------------------------------------------------------
// Workflow verbs
// ---------------------------------------------------------------------------

/// A workflow command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Start,
    Review,
    Approve,
    Reject,
    Block,
    Unblock,
    Close,
    Reopen,
}

impl Verb {
    #[must_use]
    pub const fn target(self) -> Status {
        match self {
            Self::Start | Self::Reject => Status::InProgress,
            Self::Review => Status::InReview,
            Self::Approve | Self::Close => Status::Closed,
            Self::Block => Status::Blocked,
            Self::Unblock | Self::Reopen => Status::Open,
        }
    }

    #[must_use]
    pub const fn action(self) -> ActionType {
        match self {
            Self::Start => ActionType::Start,
            Self::Review => ActionType::Review,
            Self::Approve => ActionType::Approve,
            Self::Reject => ActionType::Reject,
            Self::Block => ActionType::Block,
            Self::Unblock => ActionType::Unblock,
            Self::Close => ActionType::Close,
            Self::Reopen => ActionType::Reopen,
        }
    }

    /// Statuses the verb may start from, beyond what the graph allows.
    const fn required_source(self) -> Option<Status> {
        match self {
            Self::Approve | Self::Reject => Some(Status::InReview),
            Self::Unblock => Some(Status::Blocked),
            Self::Reopen => Some(Status::Closed),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.action().as_str()
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for [`transition`].
#[derive(Debug, Clone, Default)]
pub struct TransitionOptions {
    /// Bypass the blocked guard.
    pub force: bool,
    /// Captured working-tree state, recorded alongside `start`.
    pub git_snapshot: Option<GitSnapshot>,
}

/// Outcome of one verb, including issues moved by cascades.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub issue: Issue,
    /// Descendants moved along with an epic.
    pub cascaded: Vec<String>,
    /// Dependents released from `blocked` because their last blocker closed.
    pub unblocked: Vec<String>,
}

/// Store-derived facts the guards consult for `issue` and `session_id`.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure, or an execution error when the
/// descendant walk hits a cycle.
pub fn gather_facts(
    conn: &rusqlite::Connection,
    issue: &Issue,
    session_id: &str,
) -> Result<GuardFacts> {
    let open_descendants = if issue.issue_type == IssueType::Epic {
        let mut open = Vec::new();
        for id in issues::descendant_ids(conn, &issue.id)? {
            let open_child = issues::find(conn, &id)?
                .is_some_and(|child| !child.is_deleted() && child.status != Status::Closed);
            if open_child {
                open.push(id);
            }
        }
        open
    } else {
        Vec::new()
    };
    Ok(GuardFacts {
        has_handoff: activity::has_handoff(conn, &issue.id)?,
        session_involved: history::was_involved(conn, &issue.id, session_id)?,
        open_descendants,
        open_blockers: links::open_blocker_ids(conn, &issue.id)?,
    })
}

/// Validate and write one status change, without cascades.
fn step(
    batch: &mut Batch<'_>,
    before: Issue,
    verb: Verb,
    force: bool,
    record_history: bool,
) -> Result<Issue> {
    let to = verb.target();
    let ctx = batch.ctx();
    let facts = gather_facts(batch.conn(), &before, &ctx.session_id)?;
    let request = TransitionRequest {
        issue: &before,
        to,
        session_id: &ctx.session_id,
        force,
        admin: ctx.admin,
        facts: &facts,
    };
    let validation = ctx.engine().validate(&request)?;
    batch.extend_warnings(validation.warnings);

    let now = batch.now();
    let mut after = before.clone();
    after.status = to;
    after.updated_at = now;
    match verb {
        Verb::Start => after.implementer_session = Some(ctx.session_id.clone()),
        Verb::Review => {
            if after.implementer_session.is_none() {
                after.implementer_session = Some(ctx.session_id.clone());
            }
        }
        Verb::Approve => {
            after.reviewer_session = Some(ctx.session_id.clone());
            after.closed_at = Some(now);
        }
        Verb::Close => after.closed_at = Some(now),
        Verb::Reopen => {
            after.closed_at = None;
            after.reviewer_session = None;
        }
        Verb::Reject | Verb::Block | Verb::Unblock => {}
    }
    batch.apply(Mutation::change(
        verb.action(),
        EntityRecord::Issue(before),
        EntityRecord::Issue(after.clone()),
    ))?;
    if record_history {
        history::record(batch.conn(), &after.id, &ctx.session_id, verb.as_str(), &now)?;
    }
    Ok(after)
}

/// Move non-closed descendants of an epic along with it. Descendants that
/// fail their own guards stay put and produce a warning.
fn cascade(batch: &mut Batch<'_>, epic: &Issue, verb: Verb) -> Result<Vec<String>> {
    let to = verb.target();
    let mut moved = Vec::new();
    // Deepest first so nested epics see their own children settled.
    let mut ids = issues::descendant_ids(batch.conn(), &epic.id)?;
    ids.reverse();
    for id in ids {
        let Some(child) = issues::find(batch.conn(), &id)? else {
            continue;
        };
        if child.is_deleted() || child.status == Status::Closed || child.status == to {
            continue;
        }
        let child_verb = match verb {
            Verb::Approve if child.status != Status::InReview => Verb::Close,
            other => other,
        };
        if !batch.ctx().engine().is_allowed(child.status, to) {
            continue;
        }
        match step(batch, child, child_verb, false, false) {
            Ok(_) => moved.push(id),
            Err(err) => {
                tracing::debug!(child = %id, error = %err, "cascade skipped descendant");
                batch.warn(format!("{id} not moved with {}: {err}", epic.id));
            }
        }
    }
    Ok(moved)
}

/// Release blocked dependents of `closed_id` that have no open blockers left.
fn auto_unblock(batch: &mut Batch<'_>, closed_id: &str) -> Result<Vec<String>> {
    let mut released = Vec::new();
    for dep in links::dependents_of(batch.conn(), closed_id)? {
        let Some(dependent) = issues::find(batch.conn(), &dep.blocked_id)? else {
            continue;
        };
        if dependent.is_deleted() || dependent.status != Status::Blocked {
            continue;
        }
        if !links::open_blocker_ids(batch.conn(), &dependent.id)?.is_empty() {
            continue;
        }
        let id = dependent.id.clone();
        step(batch, dependent, Verb::Unblock, false, false)?;
        tracing::debug!(issue = %id, blocker = %closed_id, "auto-unblocked");
        released.push(id);
    }
    Ok(released)
}

/// Run a verb on `id` inside an existing batch.
///
/// # Errors
///
/// `not_found` for unknown or deleted issues, `invalid_input` for a
/// same-status or unknown transition, and the guard errors of
/// [`crate::workflow::WorkflowEngine::validate`].
pub fn transition_in(
    batch: &mut Batch<'_>,
    id: &str,
    verb: Verb,
    options: TransitionOptions,
) -> Result<TransitionOutcome> {
    let before = issues::get(batch.conn(), id)?;
    let to = verb.target();
    if before.status == to {
        return Err(TdError::invalid(format!("{id} is already {to}")));
    }
    if let Some(required) = verb.required_source() {
        if before.status != required {
            return Err(TdError::invalid(format!(
                "cannot {verb} {id}: status is {}, expected {required}",
                before.status
            )));
        }
    }

    let is_epic = before.issue_type == IssueType::Epic;
    let cascaded = if is_epic && matches!(verb, Verb::Approve | Verb::Close | Verb::Review) {
        cascade(batch, &before, verb)?
    } else {
        Vec::new()
    };

    let issue = step(batch, before, verb, options.force, true)?;

    if let Some(mut snapshot) = options.git_snapshot {
        snapshot.issue_id = Some(issue.id.clone());
        batch.apply(Mutation::create(EntityRecord::GitSnapshot(snapshot)))?;
    }

    let mut unblocked = Vec::new();
    if to == Status::Closed {
        for closed in cascaded.iter().map(String::as_str).chain([issue.id.as_str()]) {
            unblocked.extend(auto_unblock(batch, closed)?);
        }
    }

    Ok(TransitionOutcome {
        issue,
        cascaded,
        unblocked,
    })
}

/// Run a workflow verb.
///
/// # Errors
///
/// See [`transition_in`].
pub fn transition(
    store: &Store,
    ctx: &MutationContext,
    id: &str,
    verb: Verb,
    options: TransitionOptions,
) -> Result<Applied<TransitionOutcome>> {
    run(store, ctx, |batch| transition_in(batch, id, verb, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::mutation::activity::{self as act, HandoffInput};
    use crate::workflow::WorkflowMode;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn ctx(session: &str) -> MutationContext {
        MutationContext::new(session)
    }

    fn handoff(store: &Store, ctx: &MutationContext, id: &str) {
        act::add_handoff(
            store,
            ctx,
            id,
            HandoffInput {
                done: vec!["wired it".into()],
                ..HandoffInput::default()
            },
            None,
        )
        .unwrap();
    }

    #[test]
    fn create_assigns_id_and_creator() {
        let store = store();
        let a = ctx("ses_a");
        let mut input = NewIssue::titled("  Fix login  ");
        input.labels = vec!["Backend, api".into()];
        let issue = create(&store, &a, input).unwrap().value;
        assert!(issue.id.starts_with("td-"));
        assert_eq!(issue.title, "Fix login");
        assert_eq!(issue.labels, vec!["api", "backend"]);
        assert_eq!(issue.creator_session.as_deref(), Some("ses_a"));
        assert_eq!(issue.status, Status::Open);
    }

    #[test]
    fn update_adds_and_removes_normalized_labels() {
        let store = store();
        let a = ctx("ses_a");
        let mut input = NewIssue::titled("labels");
        input.labels = vec!["api".into(), "backend".into()];
        let issue = create(&store, &a, input).unwrap().value;
        let patch = IssuePatch {
            add_labels: vec![" Urgent ".into(), "api".into()],
            remove_labels: vec!["BACKEND".into()],
            ..IssuePatch::default()
        };
        let updated = update(&store, &a, &issue.id, patch).unwrap().value;
        assert_eq!(updated.labels, vec!["api", "urgent"]);
    }

    #[test]
    fn create_rejects_bad_input() {
        let store = store();
        let a = ctx("ses_a");
        assert_eq!(
            create(&store, &a, NewIssue::titled(" ")).unwrap_err().code(),
            ErrorCode::InvalidInput
        );
        let mut input = NewIssue::titled("x");
        input.points = 4;
        assert!(create(&store, &a, input).is_err());
        let mut input = NewIssue::titled("x");
        input.parent_id = Some("td-nope00".into());
        assert!(create(&store, &a, input).is_err());
    }

    #[test]
    fn update_rejects_parent_cycles() {
        let store = store();
        let a = ctx("ses_a");
        let parent = create(&store, &a, NewIssue::titled("parent")).unwrap().value;
        let mut input = NewIssue::titled("child");
        input.parent_id = Some(parent.id.clone());
        let child = create(&store, &a, input).unwrap().value;

        let patch = IssuePatch {
            parent_id: Some(Some(child.id.clone())),
            ..IssuePatch::default()
        };
        let err = update(&store, &a, &parent.id, patch).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[test]
    fn delete_hides_and_restore_returns() {
        let store = store();
        let a = ctx("ses_a");
        let issue = create(&store, &a, NewIssue::titled("x")).unwrap().value;
        delete(&store, &a, &issue.id).unwrap();
        assert!(store.read(|c| issues::get(c, &issue.id)).is_err());
        let listed = store.read(|c| issues::list(c, &issues::IssueFilter::default()));
        assert!(listed.unwrap().is_empty());
        restore(&store, &a, &issue.id).unwrap();
        assert!(store.read(|c| issues::get(c, &issue.id)).is_ok());
    }

    #[test]
    fn self_approval_is_blocked_and_other_session_approves() {
        let store = store();
        let a = ctx("A");
        let b = ctx("B");
        let issue = create(&store, &a, NewIssue::titled("x")).unwrap().value;
        transition(&store, &a, &issue.id, Verb::Start, TransitionOptions::default()).unwrap();
        handoff(&store, &a, &issue.id);
        transition(&store, &a, &issue.id, Verb::Review, TransitionOptions::default()).unwrap();

        let err = transition(&store, &a, &issue.id, Verb::Approve, TransitionOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CannotSelfApprove);

        let done = transition(&store, &b, &issue.id, Verb::Approve, TransitionOptions::default())
            .unwrap()
            .value
            .issue;
        assert_eq!(done.status, Status::Closed);
        assert_eq!(done.reviewer_session.as_deref(), Some("B"));
        assert!(done.closed_at.is_some());
    }

    #[test]
    fn review_without_handoff_is_rejected_and_status_kept() {
        let store = store();
        let a = ctx("A");
        let issue = create(&store, &a, NewIssue::titled("x")).unwrap().value;
        transition(&store, &a, &issue.id, Verb::Start, TransitionOptions::default()).unwrap();
        let err = transition(&store, &a, &issue.id, Verb::Review, TransitionOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::HandoffRequired);
        let current = store.read(|c| issues::get(c, &issue.id)).unwrap();
        assert_eq!(current.status, Status::InProgress);
    }

    #[test]
    fn same_status_is_invalid() {
        let store = store();
        let a = ctx("A");
        let issue = create(&store, &a, NewIssue::titled("x")).unwrap().value;
        let err = transition(&store, &a, &issue.id, Verb::Unblock, TransitionOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        transition(&store, &a, &issue.id, Verb::Start, TransitionOptions::default()).unwrap();
        let err = transition(&store, &a, &issue.id, Verb::Start, TransitionOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[test]
    fn epic_close_cascades_to_descendants() {
        let store = store();
        let a = ctx("A");
        let mut epic_input = NewIssue::titled("epic");
        epic_input.issue_type = IssueType::Epic;
        let epic = create(&store, &a, epic_input).unwrap().value;
        let mut child_input = NewIssue::titled("child");
        child_input.parent_id = Some(epic.id.clone());
        let child = create(&store, &a, child_input).unwrap().value;

        let outcome = transition(&store, &a, &epic.id, Verb::Close, TransitionOptions::default())
            .unwrap()
            .value;
        assert_eq!(outcome.cascaded, vec![child.id.clone()]);
        let child = store.read(|c| issues::get(c, &child.id)).unwrap();
        assert_eq!(child.status, Status::Closed);
    }

    #[test]
    fn epic_guard_blocks_when_descendant_cannot_close() {
        let store = store();
        let a = ctx("A");
        let b = ctx("B");
        let mut epic_input = NewIssue::titled("epic");
        epic_input.issue_type = IssueType::Epic;
        let epic = create(&store, &a, epic_input).unwrap().value;
        let mut child_input = NewIssue::titled("child");
        child_input.parent_id = Some(epic.id.clone());
        let child = create(&store, &a, child_input).unwrap().value;

        // The child is in review by B's own work, so B cannot approve it.
        transition(&store, &b, &child.id, Verb::Start, TransitionOptions::default()).unwrap();
        handoff(&store, &b, &child.id);
        transition(&store, &b, &child.id, Verb::Review, TransitionOptions::default()).unwrap();
        transition(&store, &a, &epic.id, Verb::Start, TransitionOptions::default()).unwrap();
        handoff(&store, &a, &epic.id);
        transition(&store, &a, &epic.id, Verb::Review, TransitionOptions::default()).unwrap();

        let err = transition(&store, &b, &epic.id, Verb::Approve, TransitionOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert!(err.to_string().contains("EpicChildrenGuard"));
        let child = store.read(|c| issues::get(c, &child.id)).unwrap();
        assert_eq!(child.status, Status::InReview);
    }

    #[test]
    fn closing_last_blocker_unblocks_dependent() {
        let store = store();
        let a = ctx("A");
        let blocker = create(&store, &a, NewIssue::titled("blocker")).unwrap().value;
        let blocked = create(&store, &a, NewIssue::titled("blocked")).unwrap().value;
        act::add_dependency(&store, &a, &blocked.id, &blocker.id).unwrap();
        transition(&store, &a, &blocked.id, Verb::Block, TransitionOptions::default()).unwrap();

        let outcome = transition(&store, &a, &blocker.id, Verb::Close, TransitionOptions::default())
            .unwrap();
        assert_eq!(outcome.value.unblocked, vec![blocked.id.clone()]);
        assert!(outcome.actions.iter().any(|e| e.action_type == ActionType::Unblock));
        let now = store.read(|c| issues::get(c, &blocked.id)).unwrap();
        assert_eq!(now.status, Status::Open);
    }

    #[test]
    fn advisory_mode_allows_with_warning() {
        let store = store();
        let a = ctx("A").with_mode(WorkflowMode::Advisory);
        let issue = create(&store, &a, NewIssue::titled("x")).unwrap().value;
        transition(&store, &a, &issue.id, Verb::Start, TransitionOptions::default()).unwrap();
        let applied = transition(&store, &a, &issue.id, Verb::Review, TransitionOptions::default())
            .unwrap();
        assert_eq!(applied.value.issue.status, Status::InReview);
        assert_eq!(applied.warnings.len(), 1);
    }

    #[test]
    fn start_records_snapshot_and_history() {
        let store = store();
        let a = ctx("A");
        let issue = create(&store, &a, NewIssue::titled("x")).unwrap().value;
        let snapshot = GitSnapshot {
            id: ids::new_child_id(ids::SNAPSHOT_PREFIX),
            issue_id: None,
            commit_sha: "0123456789abcdef".into(),
            branch: "main".into(),
            dirty_files: 2,
            untracked_files: 0,
            captured_at: crate::time::now(),
        };
        transition(
            &store,
            &a,
            &issue.id,
            Verb::Start,
            TransitionOptions {
                force: false,
                git_snapshot: Some(snapshot),
            },
        )
        .unwrap();
        let snap = store.read(|c| activity::latest_snapshot(c, &issue.id)).unwrap().unwrap();
        assert_eq!(snap.branch, "main");
        assert!(store.read(|c| history::was_involved(c, &issue.id, "A")).unwrap());
    }
}
