//! `td focus` / `td unfocus`: the issue that `log`, `handoff` and verbs
//! default to.

use crate::app::App;
use crate::output::render;
use anyhow::Result;
use clap::Args;
use serde_json::json;
use std::io::Write as _;
use td_core::db::issues;

#[derive(Args, Debug)]
pub struct FocusArgs {
    /// Issue to focus; omit to print the current focus.
    pub id: Option<String>,
}

/// # Errors
///
/// `not_found` when the issue does not exist.
pub fn run_focus(args: &FocusArgs, app: &mut App) -> Result<()> {
    let Some(raw) = args.id.as_deref() else {
        let focus = app.project.focus.clone();
        return render(app.output, &json!({ "focus": focus }), |_, w| match &focus {
            Some(id) => writeln!(w, "{id}"),
            None => writeln!(w, "(no focus)"),
        });
    };
    let id = App::issue_id(raw)?;
    let issue = app.store.read(|conn| issues::get(conn, &id))?;
    app.update_project(|cfg| cfg.focus = Some(issue.id.clone()))?;
    render(app.output, &json!({ "focus": issue.id }), |_, w| {
        writeln!(w, "FOCUSED {}", issue.id)
    })
}

/// # Errors
///
/// Fails when the config cannot be written.
pub fn run_unfocus(app: &mut App) -> Result<()> {
    let previous = app.update_project(|cfg| cfg.focus.take())?;
    render(app.output, &json!({ "unfocused": previous }), |_, w| match &previous {
        Some(id) => writeln!(w, "UNFOCUSED {id}"),
        None => writeln!(w, "UNFOCUSED"),
    })
}
