//! `td dep`: blocking dependencies between issues.
//!
//! - `td dep add <issue> <blocker>`: `<issue>` waits on `<blocker>`
//! - `td dep rm <issue> <blocker>`
//! - `td dep list <issue>`: both directions

use crate::app::App;
use crate::output::{mutation_line, render};
use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use std::io::Write as _;
use td_core::db::links;
use td_core::model::Dependency;
use td_core::mutation::activity;

#[derive(Args, Debug)]
pub struct DepArgs {
    #[command(subcommand)]
    pub command: DepCommand,
}

#[derive(Subcommand, Debug)]
pub enum DepCommand {
    #[command(
        about = "Make an issue wait on a blocker",
        after_help = "EXAMPLES:\n    # td-bbbbbb cannot start until td-aaaaaa closes\n    td dep add td-bbbbbb td-aaaaaa"
    )]
    Add { issue: String, blocker: String },

    #[command(about = "Remove a dependency")]
    Rm { issue: String, blocker: String },

    #[command(about = "Show what an issue waits on and what waits on it")]
    List { issue: String },
}

#[derive(Debug, Serialize)]
struct DepList {
    issue: String,
    blocked_by: Vec<Dependency>,
    blocks: Vec<Dependency>,
}

/// # Errors
///
/// `invalid_input` for cycles, `conflict` for duplicates, `not_found` for
/// unknown issues or edges.
pub fn run_dep(args: &DepArgs, app: &App) -> Result<()> {
    match &args.command {
        DepCommand::Add { issue, blocker } => {
            let (issue, blocker) = (App::issue_id(issue)?, App::issue_id(blocker)?);
            let applied = activity::add_dependency(&app.store, app.ctx(), &issue, &blocker)?;
            mutation_line(app.output, &format!("DEPENDS {issue} ON {blocker}"), &applied.value)
        }
        DepCommand::Rm { issue, blocker } => {
            let (issue, blocker) = (App::issue_id(issue)?, App::issue_id(blocker)?);
            let applied = activity::remove_dependency(&app.store, app.ctx(), &issue, &blocker)?;
            mutation_line(app.output, &format!("REMOVED {issue} ON {blocker}"), &applied.value)
        }
        DepCommand::List { issue } => {
            let issue = App::issue_id(issue)?;
            let list = app.store.read(|conn| {
                td_core::db::issues::get(conn, &issue)?;
                Ok(DepList {
                    blocked_by: links::blockers_of(conn, &issue)?,
                    blocks: links::dependents_of(conn, &issue)?,
                    issue: issue.clone(),
                })
            })?;
            render(app.output, &list, |l, w| {
                for dep in &l.blocked_by {
                    writeln!(w, "{} waits on {}", l.issue, dep.blocker_id)?;
                }
                for dep in &l.blocks {
                    writeln!(w, "{} blocks {}", l.issue, dep.blocked_id)?;
                }
                if l.blocked_by.is_empty() && l.blocks.is_empty() {
                    writeln!(w, "(no dependencies)")?;
                }
                Ok(())
            })
        }
    }
}
