//! `td show`: one issue with its activity, links and history.

use crate::app::App;
use crate::output::{pretty_kv, pretty_section, render_mode};
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use std::io::{self, Write};
use td_core::views::{self, IssueDetail};

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Issue id (`td-a1b2c3` or `a1b2c3`).
    pub id: String,

    /// Show the issue even when it is soft-deleted.
    #[arg(long)]
    pub deleted: bool,
}

/// # Errors
///
/// `not_found` for unknown ids.
pub fn run_show(args: &ShowArgs, app: &App) -> Result<()> {
    let id = App::issue_id(&args.id)?;
    let detail = views::issue_detail(&app.store, &id, args.deleted)?;
    render_mode(app.output, &detail, write_text, write_pretty)
}

fn ts(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

fn write_text(d: &IssueDetail, w: &mut dyn Write) -> io::Result<()> {
    let i = &d.issue;
    writeln!(w, "{} {}", i.id, i.title)?;
    writeln!(
        w,
        "status={} type={} priority={} points={}",
        i.status, i.issue_type, i.priority, i.points
    )?;
    if !i.labels.is_empty() {
        writeln!(w, "labels={}", i.labels.join(","))?;
    }
    if let Some(parent) = &i.parent_id {
        writeln!(w, "parent={parent}")?;
    }
    if let Some(s) = &i.implementer_session {
        writeln!(w, "implementer={s}")?;
    }
    if let Some(s) = &i.reviewer_session {
        writeln!(w, "reviewer={s}")?;
    }
    if i.deleted_at.is_some() {
        writeln!(w, "deleted=true")?;
    }
    if !i.description.is_empty() {
        writeln!(w, "description: {}", i.description)?;
    }
    if !i.acceptance.is_empty() {
        writeln!(w, "acceptance: {}", i.acceptance)?;
    }
    for dep in &d.blocked_by {
        writeln!(w, "blocked_by {}", dep.blocker_id)?;
    }
    for dep in &d.blocks {
        writeln!(w, "blocks {}", dep.blocked_id)?;
    }
    for child in &d.children {
        writeln!(w, "child {} {} {}", child.id, child.status, child.title)?;
    }
    for file in &d.files {
        writeln!(w, "file {} ({})", file.file_path, file.role)?;
    }
    if let Some(h) = d.handoffs.last() {
        writeln!(w, "handoff {} by {}", ts(&h.timestamp), h.session_id)?;
        for (label, items) in [
            ("done", &h.done),
            ("remaining", &h.remaining),
            ("decision", &h.decisions),
            ("uncertain", &h.uncertain),
        ] {
            for item in items {
                writeln!(w, "  {label}: {item}")?;
            }
        }
    }
    for log in &d.logs {
        writeln!(w, "log {} [{}] {}", ts(&log.timestamp), log.log_type, log.message)?;
    }
    for c in &d.comments {
        writeln!(w, "comment {} {}: {}", c.id, c.session_id, c.text)?;
    }
    Ok(())
}

fn write_pretty(d: &IssueDetail, w: &mut dyn Write) -> io::Result<()> {
    let i = &d.issue;
    pretty_section(w, &format!("{}  {}", i.id, i.title))?;
    pretty_kv(w, "status", i.status.as_str())?;
    pretty_kv(w, "type", i.issue_type.as_str())?;
    pretty_kv(w, "priority", i.priority.as_str())?;
    if i.points > 0 {
        pretty_kv(w, "points", i.points.to_string())?;
    }
    if !i.labels.is_empty() {
        pretty_kv(w, "labels", i.labels.join(", "))?;
    }
    if let Some(parent) = &i.parent_id {
        pretty_kv(w, "parent", parent)?;
    }
    if let Some(s) = &i.implementer_session {
        pretty_kv(w, "implementer", s)?;
    }
    if let Some(s) = &i.reviewer_session {
        pretty_kv(w, "reviewer", s)?;
    }
    pretty_kv(w, "created", ts(&i.created_at))?;
    pretty_kv(w, "updated", ts(&i.updated_at))?;
    if let Some(at) = &i.due_at {
        pretty_kv(w, "due", ts(at))?;
    }
    if let Some(at) = &i.deleted_at {
        pretty_kv(w, "deleted", ts(at))?;
    }
    if !i.description.is_empty() {
        writeln!(w)?;
        writeln!(w, "{}", i.description)?;
    }
    if !i.acceptance.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Acceptance")?;
        writeln!(w, "{}", i.acceptance)?;
    }
    if !d.blocked_by.is_empty() || !d.blocks.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Dependencies")?;
        for dep in &d.blocked_by {
            writeln!(w, "  waits on  {}", dep.blocker_id)?;
        }
        for dep in &d.blocks {
            writeln!(w, "  blocks    {}", dep.blocked_id)?;
        }
    }
    if !d.children.is_empty() {
        writeln!(w)?;
        super::write_issue_table(w, "Children", &d.children)?;
    }
    if !d.files.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Files")?;
        for file in &d.files {
            writeln!(w, "  {:<14} {}", file.role.as_str(), file.file_path)?;
        }
    }
    if let Some(h) = d.handoffs.last() {
        writeln!(w)?;
        pretty_section(w, &format!("Latest handoff ({}, {})", ts(&h.timestamp), h.session_id))?;
        for (label, items) in [
            ("Done", &h.done),
            ("Remaining", &h.remaining),
            ("Decisions", &h.decisions),
            ("Uncertain", &h.uncertain),
        ] {
            if items.is_empty() {
                continue;
            }
            writeln!(w, "{label}:")?;
            for item in items {
                writeln!(w, "  - {item}")?;
            }
        }
    }
    if !d.logs.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Log")?;
        for log in &d.logs {
            writeln!(w, "  {} {:<10} {}", ts(&log.timestamp), log.log_type.as_str(), log.message)?;
        }
    }
    if !d.comments.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Comments")?;
        for c in &d.comments {
            writeln!(w, "  {} ({}): {}", ts(&c.created_at), c.session_id, c.text)?;
        }
    }
    if !d.history.is_empty() {
        writeln!(w)?;
        pretty_section(w, "Sessions")?;
        for h in &d.history {
            writeln!(w, "  {} {:<8} {}", ts(&h.at), h.action, h.session_id)?;
        }
    }
    Ok(())
}
