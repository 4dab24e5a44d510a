//! In-memory evaluation of lowered predicates.
//!
//! Used for conjuncts without a SQL form and for matching a single issue
//! (board membership, autosync filters). Comparison rules mirror the SQL
//! renderer in [`super::plan`]: free text compares ASCII case-insensitively,
//! enums compare exactly, and date literals are half-open ranges.

use super::ast::CompareOp;
use super::dates::DateRange;
use super::fields::{FieldKind, FieldRef, Related, Scope};
use super::plan::{Node, Operand, Predicate, Test};
use crate::db::{action_log, activity, issues, links};
use crate::error::{Result, TdError};
use crate::model::{ActionType, Comment, Handoff, Issue, IssueFile, IssueType, Log, Status};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// A field value read off an entity.
#[derive(Debug, Clone)]
enum Cell<'a> {
    Text(Cow<'a, str>),
    Number(i64),
    Bool(bool),
    Date(Option<DateTime<Utc>>),
    Labels(&'a [String]),
}

fn opt_text(value: Option<&String>) -> Cell<'_> {
    Cell::Text(Cow::Borrowed(value.map_or("", String::as_str)))
}

fn issue_cell<'a>(issue: &'a Issue, name: &str) -> Option<Cell<'a>> {
    let text = |s: &'a str| Cell::Text(Cow::Borrowed(s));
    Some(match name {
        "id" => text(&issue.id),
        "title" => text(&issue.title),
        "description" => text(&issue.description),
        "acceptance" => text(&issue.acceptance),
        "type" => text(issue.issue_type.as_str()),
        "status" => text(issue.status.as_str()),
        "priority" => text(issue.priority.as_str()),
        "points" => Cell::Number(i64::from(issue.points)),
        "labels" => Cell::Labels(&issue.labels),
        "parent" => opt_text(issue.parent_id.as_ref()),
        "creator" => opt_text(issue.creator_session.as_ref()),
        "implementer" => opt_text(issue.implementer_session.as_ref()),
        "reviewer" => opt_text(issue.reviewer_session.as_ref()),
        "created" => Cell::Date(Some(issue.created_at)),
        "updated" => Cell::Date(Some(issue.updated_at)),
        "closed" => Cell::Date(issue.closed_at),
        "due" => Cell::Date(issue.due_at),
        "defer" => Cell::Date(issue.defer_at),
        "sprint" => text(&issue.sprint),
        "branch" => text(&issue.created_branch),
        "minor" => Cell::Bool(issue.minor),
        _ => return None,
    })
}

fn log_cell<'a>(log: &'a Log, name: &str) -> Option<Cell<'a>> {
    Some(match name {
        "message" => Cell::Text(Cow::Borrowed(&log.message)),
        "type" => Cell::Text(Cow::Borrowed(log.log_type.as_str())),
        "session" => Cell::Text(Cow::Borrowed(&log.session_id)),
        "created" => Cell::Date(Some(log.timestamp)),
        _ => return None,
    })
}

fn comment_cell<'a>(comment: &'a Comment, name: &str) -> Option<Cell<'a>> {
    Some(match name {
        "text" => Cell::Text(Cow::Borrowed(&comment.text)),
        "session" => Cell::Text(Cow::Borrowed(&comment.session_id)),
        "created" => Cell::Date(Some(comment.created_at)),
        _ => return None,
    })
}

fn handoff_cell<'a>(handoff: &'a Handoff, name: &str) -> Option<Cell<'a>> {
    let joined = |items: &[String]| Cell::Text(Cow::Owned(items.join("\n")));
    Some(match name {
        "done" => joined(&handoff.done),
        "remaining" => joined(&handoff.remaining),
        "decisions" => joined(&handoff.decisions),
        "uncertain" => joined(&handoff.uncertain),
        "session" => Cell::Text(Cow::Borrowed(&handoff.session_id)),
        "created" => Cell::Date(Some(handoff.timestamp)),
        _ => return None,
    })
}

fn file_cell<'a>(file: &'a IssueFile, name: &str) -> Option<Cell<'a>> {
    Some(match name {
        "path" => Cell::Text(Cow::Borrowed(&file.file_path)),
        "role" => Cell::Text(Cow::Borrowed(file.role.as_str())),
        _ => return None,
    })
}

const fn positive(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Ne => CompareOp::Eq,
        CompareOp::NotContains => CompareOp::Contains,
        other => other,
    }
}

fn is_empty(cell: &Cell<'_>) -> bool {
    match cell {
        Cell::Text(s) => s.is_empty(),
        Cell::Number(n) => *n == 0,
        Cell::Bool(b) => !b,
        Cell::Date(d) => d.is_none(),
        Cell::Labels(labels) => labels.is_empty(),
    }
}

fn equals(cell: &Cell<'_>, kind: FieldKind, operand: &Operand) -> bool {
    match (cell, operand) {
        (_, Operand::Empty) => is_empty(cell),
        (_, Operand::List(items)) => items.iter().any(|item| equals(cell, kind, item)),
        (Cell::Text(s), Operand::Text(v)) if kind.is_enum() => s.as_ref() == v,
        (Cell::Text(s), Operand::Text(v)) => s.eq_ignore_ascii_case(v),
        (Cell::Labels(labels), Operand::Text(v)) => {
            labels.iter().any(|l| l.eq_ignore_ascii_case(v))
        }
        (Cell::Number(n), Operand::Number(v)) => n == v,
        (Cell::Bool(b), Operand::Bool(v)) => b == v,
        (Cell::Date(Some(ts)), Operand::Range(range)) => range.contains(ts),
        _ => false,
    }
}

fn contains(cell: &Cell<'_>, operand: &Operand) -> bool {
    let Operand::Text(needle) = operand else {
        return false;
    };
    let needle = needle.to_ascii_lowercase();
    match cell {
        Cell::Text(s) => s.to_ascii_lowercase().contains(&needle),
        Cell::Labels(labels) => labels.join(",").to_ascii_lowercase().contains(&needle),
        _ => false,
    }
}

fn ordered(op: CompareOp, ord: Ordering) -> bool {
    match op {
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Le => ord != Ordering::Greater,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::Ge => ord != Ordering::Less,
        _ => false,
    }
}

fn date_order(op: CompareOp, ts: &DateTime<Utc>, range: &DateRange) -> bool {
    match op {
        CompareOp::Lt => *ts < range.start,
        CompareOp::Le => *ts < range.end,
        CompareOp::Gt => *ts >= range.end,
        CompareOp::Ge => *ts >= range.start,
        _ => false,
    }
}

fn compare(cell: &Cell<'_>, op: CompareOp, operand: &Operand) -> bool {
    match (cell, operand) {
        (Cell::Text(s), Operand::Text(v)) => ordered(op, s.as_ref().cmp(v.as_str())),
        (Cell::Number(n), Operand::Number(v)) => ordered(op, n.cmp(v)),
        (Cell::Date(Some(ts)), Operand::Range(range)) => date_order(op, ts, range),
        _ => false,
    }
}

/// Positive form of `test` against one cell; negation is applied by callers.
fn passes(cell: &Cell<'_>, kind: FieldKind, test: &Test) -> bool {
    match positive(test.op) {
        CompareOp::Eq => equals(cell, kind, &test.operand),
        CompareOp::Contains => contains(cell, &test.operand),
        op => compare(cell, op, &test.operand),
    }
}

/// Per-query cache of related rows and prefetched sets.
pub struct Lookups<'c> {
    conn: &'c Connection,
    logs: HashMap<String, Vec<Log>>,
    comments: HashMap<String, Vec<Comment>>,
    handoffs: HashMap<String, Vec<Handoff>>,
    files: HashMap<String, Vec<IssueFile>>,
    epics: HashMap<String, Option<Issue>>,
    children: HashMap<String, bool>,
    blockers: HashMap<String, HashSet<String>>,
    dependents: HashMap<String, HashSet<String>>,
    descendants: HashMap<String, HashSet<String>>,
    rework: Option<HashSet<String>>,
    open_deps: Option<HashSet<String>>,
}

impl<'c> Lookups<'c> {
    #[must_use]
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            logs: HashMap::new(),
            comments: HashMap::new(),
            handoffs: HashMap::new(),
            files: HashMap::new(),
            epics: HashMap::new(),
            children: HashMap::new(),
            blockers: HashMap::new(),
            dependents: HashMap::new(),
            descendants: HashMap::new(),
            rework: None,
            open_deps: None,
        }
    }

    fn logs(&mut self, id: &str) -> Result<&[Log]> {
        if !self.logs.contains_key(id) {
            let rows = activity::logs_for_issue(self.conn, id, None)?;
            self.logs.insert(id.to_string(), rows);
        }
        Ok(self.logs.get(id).map_or(&[], Vec::as_slice))
    }

    fn comments(&mut self, id: &str) -> Result<&[Comment]> {
        if !self.comments.contains_key(id) {
            let rows = activity::comments_for_issue(self.conn, id)?;
            self.comments.insert(id.to_string(), rows);
        }
        Ok(self.comments.get(id).map_or(&[], Vec::as_slice))
    }

    fn handoffs(&mut self, id: &str) -> Result<&[Handoff]> {
        if !self.handoffs.contains_key(id) {
            let rows = activity::handoffs_for_issue(self.conn, id)?;
            self.handoffs.insert(id.to_string(), rows);
        }
        Ok(self.handoffs.get(id).map_or(&[], Vec::as_slice))
    }

    fn files(&mut self, id: &str) -> Result<&[IssueFile]> {
        if !self.files.contains_key(id) {
            let rows = links::files_for_issue(self.conn, id)?;
            self.files.insert(id.to_string(), rows);
        }
        Ok(self.files.get(id).map_or(&[], Vec::as_slice))
    }

    fn has_children(&mut self, id: &str) -> Result<bool> {
        if let Some(known) = self.children.get(id) {
            return Ok(*known);
        }
        let any = !issues::children(self.conn, id)?.is_empty();
        self.children.insert(id.to_string(), any);
        Ok(any)
    }

    /// Nearest ancestor of type epic, walking at most `MAX_TREE_DEPTH` links.
    fn epic(&mut self, issue: &Issue) -> Result<Option<&Issue>> {
        if !self.epics.contains_key(&issue.id) {
            let mut found = None;
            let mut seen = HashSet::from([issue.id.clone()]);
            let mut next = issue.parent_id.clone();
            for _ in 0..issues::MAX_TREE_DEPTH {
                let Some(parent_id) = next.take() else { break };
                if !seen.insert(parent_id.clone()) {
                    break;
                }
                let Some(parent) = issues::find(self.conn, &parent_id)? else {
                    break;
                };
                if parent.issue_type == IssueType::Epic {
                    found = Some(parent);
                    break;
                }
                next = parent.parent_id;
            }
            self.epics.insert(issue.id.clone(), found);
        }
        Ok(self.epics.get(&issue.id).and_then(Option::as_ref))
    }

    fn blockers_of(&mut self, id: &str) -> Result<&HashSet<String>> {
        if !self.blockers.contains_key(id) {
            let set = links::blockers_of(self.conn, id)?
                .into_iter()
                .map(|d| d.blocker_id)
                .collect();
            self.blockers.insert(id.to_string(), set);
        }
        Ok(&self.blockers[id])
    }

    fn dependents_of(&mut self, id: &str) -> Result<&HashSet<String>> {
        if !self.dependents.contains_key(id) {
            let set = links::dependents_of(self.conn, id)?
                .into_iter()
                .map(|d| d.blocked_id)
                .collect();
            self.dependents.insert(id.to_string(), set);
        }
        Ok(&self.dependents[id])
    }

    fn descendants_of(&mut self, root: &str) -> Result<&HashSet<String>> {
        if !self.descendants.contains_key(root) {
            let set = issues::descendant_ids(self.conn, root)?.into_iter().collect();
            self.descendants.insert(root.to_string(), set);
        }
        Ok(&self.descendants[root])
    }

    fn rework(&mut self) -> Result<&HashSet<String>> {
        if self.rework.is_none() {
            self.rework = Some(action_log::issues_with_action(self.conn, ActionType::Reject)?);
        }
        Ok(self.rework.get_or_insert_with(HashSet::new))
    }

    fn open_deps(&mut self) -> Result<&HashSet<String>> {
        if self.open_deps.is_none() {
            self.open_deps = Some(links::issues_with_open_blockers(self.conn)?);
        }
        Ok(self.open_deps.get_or_insert_with(HashSet::new))
    }
}

/// Evaluate `node` against `issue`.
///
/// # Errors
///
/// Returns `database_error` when a lookup fails and an execution error for
/// parent cycles met by `descendant_of`.
pub fn matches(node: &Node, issue: &Issue, lookups: &mut Lookups<'_>) -> Result<bool> {
    Ok(match node {
        Node::And(l, r) => matches(l, issue, lookups)? && matches(r, issue, lookups)?,
        Node::Or(l, r) => matches(l, issue, lookups)? || matches(r, issue, lookups)?,
        Node::Not(inner) => !matches(inner, issue, lookups)?,
        Node::Leaf(predicate) => predicate_matches(predicate, issue, lookups)?,
    })
}

fn any_related<T>(
    rows: &[T],
    field: FieldRef,
    test: &Test,
    cell: for<'a> fn(&'a T, &str) -> Option<Cell<'a>>,
) -> bool {
    rows.iter().any(|row| {
        cell(row, field.def.name).is_some_and(|c| passes(&c, field.kind(), test))
    })
}

fn field_matches(
    field: FieldRef,
    test: &Test,
    issue: &Issue,
    lookups: &mut Lookups<'_>,
) -> Result<bool> {
    let hit = match field.scope {
        Scope::Issue => issue_cell(issue, field.def.name)
            .is_some_and(|c| passes(&c, field.kind(), test)),
        Scope::Log => any_related(lookups.logs(&issue.id)?, field, test, log_cell),
        Scope::Comment => any_related(lookups.comments(&issue.id)?, field, test, comment_cell),
        Scope::Handoff => any_related(lookups.handoffs(&issue.id)?, field, test, handoff_cell),
        Scope::File => any_related(lookups.files(&issue.id)?, field, test, file_cell),
        Scope::Epic => lookups.epic(issue)?.is_some_and(|epic| {
            issue_cell(epic, field.def.name).is_some_and(|c| passes(&c, field.kind(), test))
        }),
    };
    Ok(hit != test.op.is_negated())
}

fn predicate_matches(
    predicate: &Predicate,
    issue: &Issue,
    lookups: &mut Lookups<'_>,
) -> Result<bool> {
    let id = issue.id.as_str();
    Ok(match predicate {
        Predicate::Field { field, test } => field_matches(*field, test, issue, lookups)?,
        Predicate::Text(text) => {
            let needle = text.to_ascii_lowercase();
            [&issue.id, &issue.title, &issue.description]
                .iter()
                .any(|s| s.to_ascii_lowercase().contains(&needle))
        }
        Predicate::Has(related) => match related {
            Related::Log => !lookups.logs(id)?.is_empty(),
            Related::Comment => !lookups.comments(id)?.is_empty(),
            Related::Handoff => !lookups.handoffs(id)?.is_empty(),
            Related::File => !lookups.files(id)?.is_empty(),
            Related::Children => lookups.has_children(id)?,
            Related::Blockers => !lookups.blockers_of(id)?.is_empty(),
        },
        Predicate::DescendantOf(root) => lookups.descendants_of(root)?.contains(id),
        Predicate::Blocks(target) => lookups.blockers_of(target)?.contains(id),
        Predicate::BlockedBy(target) => lookups.dependents_of(target)?.contains(id),
        Predicate::LinkedTo(prefix) => {
            let prefix = prefix.to_ascii_lowercase();
            lookups
                .files(id)?
                .iter()
                .any(|f| f.file_path.to_ascii_lowercase().starts_with(&prefix))
        }
        Predicate::Rework => {
            matches!(issue.status, Status::Open | Status::InProgress)
                && lookups.rework()?.contains(id)
        }
        Predicate::IsReady => issue.status == Status::Open && !lookups.open_deps()?.contains(id),
        Predicate::HasOpenDeps => lookups.open_deps()?.contains(id),
    })
}

/// Map storage failures during evaluation onto the execution error.
pub(crate) fn execution_error(err: TdError) -> TdError {
    match err {
        TdError::Database(db) => TdError::Execution(db.to_string()),
        other => other,
    }
}
