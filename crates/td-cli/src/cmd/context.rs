//! `td context`: the briefing a resuming agent reads first.

use crate::app::App;
use crate::output::render;
use anyhow::Result;
use clap::Args;
use std::io::Write as _;
use td_core::context::{self, ContextLimits};

#[derive(Args, Debug)]
pub struct ContextArgs {
    /// Recent logs shown for the focused issue.
    #[arg(long, default_value_t = 5)]
    pub logs: usize,

    /// Open issues listed under "next up".
    #[arg(long, default_value_t = 5)]
    pub open: usize,

    /// Issues awaiting review listed.
    #[arg(long, default_value_t = 10)]
    pub review: usize,
}

/// # Errors
///
/// Returns `database_error` on SQLite failure.
pub fn run_context(args: &ContextArgs, app: &App) -> Result<()> {
    let limits = ContextLimits {
        logs: args.logs,
        open: args.open,
        review: args.review,
    };
    let focus = app.project.focus.as_deref();
    let snapshot = context::build(&app.store, app.session_id(), focus, limits)?;
    render(app.output, &snapshot, |s, w| write!(w, "{}", s.render_text()))
}
