//! `td session`: show or name the current session.

use crate::app::App;
use crate::output::render;
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::io::Write as _;

#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Pin a session name for this project (`--name ""` clears it).
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
struct SessionView<'a> {
    id: &'a str,
    first_seen: String,
    is_new: bool,
    explicit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    focus: Option<&'a str>,
    workflow_mode: String,
}

/// # Errors
///
/// Fails when the project config cannot be written.
pub fn run_session(args: &SessionArgs, app: &mut App) -> Result<()> {
    if let Some(name) = &args.name {
        let name = name.trim().to_string();
        let cleared = name.is_empty();
        app.update_project(|cfg| cfg.session_name = (!cleared).then_some(name.clone()))?;
        let line = if cleared {
            "SESSION NAME CLEARED".to_string()
        } else {
            format!("SESSION NAME SET {name}")
        };
        let json = serde_json::json!({ "session_name": app.project.session_name });
        return render(app.output, &json, |_, w| writeln!(w, "{line}"));
    }

    let view = SessionView {
        id: &app.session.id,
        first_seen: app.session.first_seen.to_rfc3339(),
        is_new: app.session.is_new,
        explicit: app.session.explicit,
        name: app.project.session_name.as_deref(),
        focus: app.project.focus.as_deref(),
        workflow_mode: app.project.workflow_mode.to_string(),
    };
    render(app.output, &view, |v, w| {
        writeln!(w, "session:  {}", v.id)?;
        writeln!(w, "since:    {}", v.first_seen)?;
        if let Some(name) = v.name {
            writeln!(w, "name:     {name}")?;
        }
        if let Some(focus) = v.focus {
            writeln!(w, "focus:    {focus}")?;
        }
        writeln!(w, "workflow: {}", v.workflow_mode)
    })
}
