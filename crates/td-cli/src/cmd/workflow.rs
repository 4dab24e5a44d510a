//! Workflow verbs: `start`, `review`, `approve`, `reject`, `block`,
//! `unblock`, `close` and `reopen`.

use crate::app::App;
use crate::output::{render, render_warnings};
use anyhow::Result;
use chrono::Utc;
use clap::Args;
use serde::Serialize;
use std::io::Write as _;
use td_core::model::{Issue, LogType};
use td_core::mutation::activity;
use td_core::mutation::issues::{self, TransitionOptions, Verb};
use td_core::vcs;

#[derive(Args, Debug, Default)]
pub struct VerbArgs {
    /// Issue ids; defaults to the focused issue.
    pub ids: Vec<String>,

    /// Record a log entry explaining the change.
    #[arg(short = 'm', long = "reason", alias = "message")]
    pub reason: Option<String>,

    /// Proceed even when open blockers remain.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct VerbOutput {
    action: &'static str,
    issue: Issue,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cascaded: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    unblocked: Vec<String>,
}

fn stable_line(verb: Verb, id: &str, session: &str) -> String {
    match verb {
        Verb::Start => format!("STARTED {id} (session: {session})"),
        Verb::Review => format!("REVIEW REQUESTED {id} (session: {session})"),
        Verb::Approve => format!("APPROVED {id} (reviewer: {session})"),
        Verb::Reject => format!("REJECTED {id} → in_progress"),
        Verb::Block => format!("BLOCKED {id}"),
        Verb::Unblock => format!("UNBLOCKED {id}"),
        Verb::Close => format!("CLOSED {id}"),
        Verb::Reopen => format!("REOPENED {id}"),
    }
}

const fn reason_log_type(verb: Verb) -> LogType {
    match verb {
        Verb::Block => LogType::Blocker,
        Verb::Approve | Verb::Reject | Verb::Close => LogType::Decision,
        _ => LogType::Progress,
    }
}

/// Run `verb` on every target in order.
///
/// # Errors
///
/// Stops at the first failing transition; earlier ones stay committed.
pub fn run_verb(verb: Verb, args: &VerbArgs, app: &mut App) -> Result<()> {
    let targets = if args.ids.is_empty() {
        vec![super::target_issue(app, None)?]
    } else {
        args.ids
            .iter()
            .map(|raw| App::issue_id(raw))
            .collect::<Result<Vec<_>>>()?
    };

    let mut results = Vec::new();
    for id in &targets {
        let git_snapshot = if verb == Verb::Start {
            vcs::snapshot(app.root(), Utc::now())
        } else {
            None
        };
        let options = TransitionOptions {
            force: args.force,
            git_snapshot,
        };
        let applied = issues::transition(&app.store, app.ctx(), id, verb, options)?;
        render_warnings(app.output, &applied.warnings);
        if let Some(reason) = args.reason.as_deref().filter(|r| !r.trim().is_empty()) {
            activity::add_log(&app.store, app.ctx(), id, reason_log_type(verb), reason)?;
        }
        let outcome = applied.value;
        results.push(VerbOutput {
            action: verb.as_str(),
            issue: outcome.issue,
            cascaded: outcome.cascaded,
            unblocked: outcome.unblocked,
        });
    }

    update_focus(verb, &targets, app)?;

    let session = app.session_id().to_string();
    render(app.output, &results, |items, w| {
        for item in items {
            writeln!(w, "{}", stable_line(verb, &item.issue.id, &session))?;
            for id in &item.cascaded {
                writeln!(w, "  cascaded {id}")?;
            }
            for id in &item.unblocked {
                writeln!(w, "  unblocked {id}")?;
            }
        }
        Ok(())
    })
}

/// `start` focuses the (last) started issue; finishing the focused issue
/// clears the focus.
fn update_focus(verb: Verb, targets: &[String], app: &mut App) -> Result<()> {
    match verb {
        Verb::Start => {
            if let Some(last) = targets.last().cloned() {
                app.update_project(|cfg| cfg.focus = Some(last))?;
            }
        }
        Verb::Approve | Verb::Close => {
            let focused = app.project.focus.clone();
            if focused.is_some_and(|f| targets.contains(&f)) {
                app.update_project(|cfg| cfg.focus = None)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_lines_match_contract() {
        assert_eq!(
            stable_line(Verb::Start, "td-a1b2c3", "ses_abcdef"),
            "STARTED td-a1b2c3 (session: ses_abcdef)"
        );
        assert_eq!(
            stable_line(Verb::Review, "td-a1b2c3", "ses_abcdef"),
            "REVIEW REQUESTED td-a1b2c3 (session: ses_abcdef)"
        );
        assert_eq!(
            stable_line(Verb::Approve, "td-a1b2c3", "ses_123456"),
            "APPROVED td-a1b2c3 (reviewer: ses_123456)"
        );
        assert_eq!(
            stable_line(Verb::Reject, "td-a1b2c3", "x"),
            "REJECTED td-a1b2c3 → in_progress"
        );
        assert_eq!(stable_line(Verb::Block, "td-a1b2c3", "x"), "BLOCKED td-a1b2c3");
    }

    #[test]
    fn block_reason_is_a_blocker_log() {
        assert_eq!(reason_log_type(Verb::Block), LogType::Blocker);
        assert_eq!(reason_log_type(Verb::Start), LogType::Progress);
    }
}
