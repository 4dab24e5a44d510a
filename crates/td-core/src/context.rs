//! Session context: what a resuming agent needs to see first.
//!
//! Built fresh on every call. Serializes as the compact machine form;
//! [`ContextSnapshot::render_text`] gives the human briefing.

use crate::db::issues::{IssueFilter, IssueSort, SortField};
use crate::db::{Store, activity, history, issues};
use crate::error::Result;
use crate::model::{GitSnapshot, Handoff, Issue, Log, Status};
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub logs: usize,
    pub open: usize,
    pub review: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            logs: 5,
            open: 5,
            review: 10,
        }
    }
}

/// The focused issue with its latest state.
#[derive(Debug, Clone, Serialize)]
pub struct FocusContext {
    pub issue: Issue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff: Option<Handoff>,
    pub logs: Vec<Log>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub session: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus: Option<FocusContext>,
    /// In progress and implemented by this session.
    pub in_progress: Vec<Issue>,
    /// Awaiting review and untouched by this session.
    pub reviewable: Vec<Issue>,
    pub next_up: Vec<Issue>,
}

/// Assemble the context for `session_id`. A focus id that no longer
/// resolves to a live issue is ignored.
///
/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn build(
    store: &Store,
    session_id: &str,
    focus: Option<&str>,
    limits: ContextLimits,
) -> Result<ContextSnapshot> {
    store.read(|conn| {
        let focus = match focus.map(|id| issues::find(conn, id)).transpose()?.flatten() {
            Some(issue) if !issue.is_deleted() => {
                let handoff = activity::latest_handoff(conn, &issue.id)?;
                let logs = activity::logs_for_issue(conn, &issue.id, Some(limits.logs))?;
                let git = activity::latest_snapshot(conn, &issue.id)?;
                Some(FocusContext {
                    issue,
                    handoff,
                    logs,
                    git,
                })
            }
            _ => None,
        };

        let in_progress = issues::list(
            conn,
            &IssueFilter {
                statuses: vec![Status::InProgress],
                ..IssueFilter::default()
            },
        )?
        .into_iter()
        .filter(|i| i.implementer_session.as_deref() == Some(session_id))
        .collect();

        let involved = history::involved_issue_ids(conn, session_id)?;
        let reviewable = issues::list(
            conn,
            &IssueFilter {
                statuses: vec![Status::InReview],
                sort: IssueSort::asc(SortField::Priority),
                ..IssueFilter::default()
            },
        )?
        .into_iter()
        .filter(|i| {
            i.implementer_session.as_deref() != Some(session_id) && !involved.contains(&i.id)
        })
        .take(limits.review)
        .collect();

        let next_up = issues::list(
            conn,
            &IssueFilter {
                statuses: vec![Status::Open],
                sort: IssueSort::asc(SortField::Priority),
                limit: Some(limits.open),
                ..IssueFilter::default()
            },
        )?;

        Ok(ContextSnapshot {
            session: session_id.to_string(),
            focus,
            in_progress,
            reviewable,
            next_up,
        })
    })
}

fn issue_line(out: &mut String, issue: &Issue) {
    let _ = writeln!(
        out,
        "  {} [{}] {} ({})",
        issue.id,
        issue.priority,
        issue.title,
        issue.status.as_str()
    );
}

fn bullet_list(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "  {heading}:");
    for item in items {
        let _ = writeln!(out, "    - {item}");
    }
}

impl ContextSnapshot {
    /// Formatted briefing.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "SESSION: {}", self.session);

        if let Some(focus) = &self.focus {
            let _ = writeln!(out, "\nFOCUSED:");
            issue_line(&mut out, &focus.issue);
            if let Some(h) = &focus.handoff {
                let _ = writeln!(
                    out,
                    "  last handoff by {} at {}",
                    h.session_id,
                    h.timestamp.format("%Y-%m-%d %H:%M")
                );
                bullet_list(&mut out, "done", &h.done);
                bullet_list(&mut out, "remaining", &h.remaining);
                bullet_list(&mut out, "decisions", &h.decisions);
                bullet_list(&mut out, "uncertain", &h.uncertain);
            }
            if !focus.logs.is_empty() {
                let _ = writeln!(out, "  recent logs:");
                for log in &focus.logs {
                    let _ = writeln!(
                        out,
                        "    [{}] {} {}",
                        log.timestamp.format("%m-%d %H:%M"),
                        log.log_type,
                        log.message
                    );
                }
            }
            if let Some(git) = &focus.git {
                let _ = writeln!(
                    out,
                    "  git: {} on {} ({} dirty, {} untracked)",
                    git.short_sha(),
                    git.branch,
                    git.dirty_files,
                    git.untracked_files
                );
            }
        } else {
            let _ = writeln!(out, "\nFOCUSED: none");
        }

        for (heading, list) in [
            ("IN PROGRESS", &self.in_progress),
            ("AWAITING YOUR REVIEW", &self.reviewable),
            ("NEXT UP", &self.next_up),
        ] {
            if list.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n{heading}:");
            for issue in list {
                issue_line(&mut out, issue);
            }
        }
        out
    }
}
