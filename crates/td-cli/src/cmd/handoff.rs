//! `td handoff`: record structured state for the next session.

use super::target_issue;
use crate::app::App;
use crate::output::mutation_line;
use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::Args;
use serde::Deserialize;
use std::io::Read as _;
use td_core::mutation::activity::{self, HandoffInput};
use td_core::vcs;

#[derive(Args, Debug, Default)]
pub struct HandoffArgs {
    /// Issue id; defaults to the focused issue.
    pub id: Option<String>,

    /// Completed item (repeatable).
    #[arg(short, long)]
    pub done: Vec<String>,

    /// Work still left (repeatable).
    #[arg(short, long)]
    pub remaining: Vec<String>,

    /// Decision taken (repeatable).
    #[arg(long = "decision")]
    pub decisions: Vec<String>,

    /// Open question or doubt (repeatable).
    #[arg(short, long)]
    pub uncertain: Vec<String>,

    /// Read a JSON object `{done, remaining, decisions, uncertain}` from stdin.
    #[arg(long)]
    pub stdin: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HandoffJson {
    done: Vec<String>,
    remaining: Vec<String>,
    decisions: Vec<String>,
    uncertain: Vec<String>,
}

fn merge(args: &HandoffArgs, extra: HandoffJson) -> HandoffInput {
    let join = |a: &[String], b: Vec<String>| a.iter().cloned().chain(b).collect::<Vec<_>>();
    HandoffInput {
        done: join(&args.done, extra.done),
        remaining: join(&args.remaining, extra.remaining),
        decisions: join(&args.decisions, extra.decisions),
        uncertain: join(&args.uncertain, extra.uncertain),
    }
}

/// # Errors
///
/// `invalid_input` when every list is empty or stdin is not valid JSON.
pub fn run_handoff(args: &HandoffArgs, app: &App) -> Result<()> {
    let id = target_issue(app, args.id.as_deref())?;
    let extra = if args.stdin {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read handoff from stdin")?;
        serde_json::from_str(&raw)
            .map_err(|err| td_core::TdError::invalid(format!("invalid handoff JSON: {err}")))?
    } else {
        HandoffJson::default()
    };
    let input = merge(args, extra);
    let snapshot = vcs::snapshot(app.root(), Utc::now());
    let applied = activity::add_handoff(&app.store, app.ctx(), &id, input, snapshot)?;
    mutation_line(app.output, &format!("HANDOFF RECORDED {id}"), &applied.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: HandoffArgs,
    }

    #[test]
    fn flags_and_stdin_combine() {
        let w = Wrapper::parse_from(["test", "td-a1b2c3", "-d", "parser", "-r", "docs"]);
        let extra: HandoffJson =
            serde_json::from_str(r#"{"done":["lexer"],"uncertain":["perf"]}"#).unwrap();
        let input = merge(&w.args, extra);
        assert_eq!(input.done, vec!["parser", "lexer"]);
        assert_eq!(input.remaining, vec!["docs"]);
        assert_eq!(input.uncertain, vec!["perf"]);
        assert!(input.decisions.is_empty());
    }
}
