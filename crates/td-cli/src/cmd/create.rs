//! `td create`: create a new issue.

use super::{parse_date, parse_value, split_list};
use crate::app::App;
use crate::output::{mutation_line, render_warnings};
use anyhow::Result;
use clap::Args;
use td_core::model::{IssueType, Priority};
use td_core::mutation::issues::{self, NewIssue};
use td_core::vcs;

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Title of the new issue.
    pub title: String,

    /// Issue type: bug, feature, task, epic or chore.
    #[arg(short = 't', long = "type", default_value = "task")]
    pub issue_type: String,

    /// Priority P0 (highest) to P4.
    #[arg(short, long, default_value = "P2")]
    pub priority: String,

    /// Story points (0, 1, 2, 3, 5, 8, 13, 21).
    #[arg(long, default_value_t = 0)]
    pub points: u8,

    /// Labels (comma-separated or repeated).
    #[arg(short, long = "labels", alias = "label")]
    pub labels: Vec<String>,

    #[arg(short, long)]
    pub description: Option<String>,

    /// Acceptance criteria.
    #[arg(long)]
    pub acceptance: Option<String>,

    /// Parent issue (usually an epic).
    #[arg(long)]
    pub parent: Option<String>,

    /// Minor issues may be approved by their implementer.
    #[arg(long)]
    pub minor: bool,

    #[arg(long)]
    pub sprint: Option<String>,

    /// Hide from ready queues until this date.
    #[arg(long)]
    pub defer: Option<String>,

    #[arg(long)]
    pub due: Option<String>,
}

/// # Errors
///
/// Fails on invalid input or when the parent does not exist.
pub fn run_create(args: &CreateArgs, app: &App) -> Result<()> {
    let input = NewIssue {
        title: args.title.clone(),
        description: args.description.clone().unwrap_or_default(),
        acceptance: args.acceptance.clone().unwrap_or_default(),
        issue_type: parse_value::<IssueType>(&args.issue_type)?,
        priority: parse_value::<Priority>(&args.priority)?,
        points: args.points,
        labels: split_list(&args.labels),
        parent_id: args.parent.as_deref().map(App::issue_id).transpose()?,
        minor: args.minor,
        sprint: args.sprint.clone().unwrap_or_default(),
        created_branch: vcs::current_branch(app.root()).unwrap_or_default(),
        defer_at: args.defer.as_deref().map(parse_date).transpose()?,
        due_at: args.due.as_deref().map(parse_date).transpose()?,
    };
    let applied = issues::create(&app.store, app.ctx(), input)?;
    render_warnings(app.output, &applied.warnings);
    let issue = applied.value;
    mutation_line(app.output, &format!("CREATED {}", issue.id), &issue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: CreateArgs,
    }

    #[test]
    fn create_args_defaults() {
        let w = Wrapper::parse_from(["test", "Hello"]);
        assert_eq!(w.args.title, "Hello");
        assert_eq!(w.args.issue_type, "task");
        assert_eq!(w.args.priority, "P2");
        assert!(w.args.parent.is_none());
        assert!(w.args.labels.is_empty());
    }

    #[test]
    fn create_args_full() {
        let w = Wrapper::parse_from([
            "test", "Ship it", "-t", "epic", "-p", "P0", "-l", "a,b", "--label", "c", "--minor",
        ]);
        assert_eq!(w.args.issue_type, "epic");
        assert_eq!(split_list(&w.args.labels), vec!["a", "b", "c"]);
        assert!(w.args.minor);
    }
}
