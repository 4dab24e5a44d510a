//! `td log`: append a progress entry.

use super::{parse_value, target_issue};
use crate::app::App;
use crate::output::mutation_line;
use anyhow::Result;
use clap::Args;
use td_core::TdError;
use td_core::model::LogType;
use td_core::mutation::activity;

#[derive(Args, Debug)]
pub struct LogArgs {
    /// Message text; words are joined with spaces.
    #[arg(required = true)]
    pub message: Vec<String>,

    /// Target issue; defaults to the focused issue.
    #[arg(short, long)]
    pub issue: Option<String>,

    /// progress, blocker, decision, hypothesis, tried or result.
    #[arg(short = 't', long = "type", default_value = "progress")]
    pub log_type: String,
}

/// # Errors
///
/// `invalid_input` for an empty message or when no issue is resolvable.
pub fn run_log(args: &LogArgs, app: &App) -> Result<()> {
    let message = args.message.join(" ");
    if message.trim().is_empty() {
        return Err(TdError::invalid("log message must not be empty").into());
    }
    let log_type = parse_value::<LogType>(&args.log_type)?;
    let id = target_issue(app, args.issue.as_deref())?;
    let applied = activity::add_log(&app.store, app.ctx(), &id, log_type, &message)?;
    mutation_line(app.output, &format!("LOGGED {id}"), &applied.value)
}
