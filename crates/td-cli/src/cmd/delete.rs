//! `td delete` / `td restore`: soft delete and undelete.

use crate::app::App;
use crate::output::{OutputMode, render};
use anyhow::Result;
use clap::Args;
use std::io::Write as _;
use td_core::model::Issue;
use td_core::mutation::issues;

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Issue ids.
    #[arg(required = true)]
    pub ids: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    #[arg(required = true)]
    pub ids: Vec<String>,
}

fn print(output: OutputMode, verb: &str, done: &[Issue]) -> Result<()> {
    render(output, &done, |items, w| {
        for issue in *items {
            writeln!(w, "{verb} {}", issue.id)?;
        }
        Ok(())
    })
}

/// # Errors
///
/// Stops at the first id that cannot be deleted.
pub fn run_delete(args: &DeleteArgs, app: &App) -> Result<()> {
    let mut done = Vec::new();
    for raw in &args.ids {
        let id = App::issue_id(raw)?;
        done.push(issues::delete(&app.store, app.ctx(), &id)?.value);
    }
    print(app.output, "DELETED", &done)
}

/// # Errors
///
/// Stops at the first id that cannot be restored.
pub fn run_restore(args: &RestoreArgs, app: &App) -> Result<()> {
    let mut done = Vec::new();
    for raw in &args.ids {
        let id = App::issue_id(raw)?;
        done.push(issues::restore(&app.store, app.ctx(), &id)?.value);
    }
    print(app.output, "RESTORED", &done)
}
