//! `td update`: edit issue fields. Status changes go through workflow verbs.

use super::{parse_date, parse_opt, split_list};
use crate::app::App;
use crate::output::{mutation_line, render_warnings};
use anyhow::Result;
use clap::Args;
use td_core::TdError;
use td_core::model::{IssuePatch, IssueType, Priority};
use td_core::mutation::issues;

#[derive(Args, Debug, Default)]
pub struct UpdateArgs {
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(short, long)]
    pub description: Option<String>,

    #[arg(long)]
    pub acceptance: Option<String>,

    #[arg(short = 't', long = "type")]
    pub issue_type: Option<String>,

    #[arg(short, long)]
    pub priority: Option<String>,

    #[arg(long)]
    pub points: Option<u8>,

    /// Replace all labels.
    #[arg(long)]
    pub labels: Option<String>,

    #[arg(long = "add-label")]
    pub add_label: Vec<String>,

    #[arg(long = "remove-label")]
    pub remove_label: Vec<String>,

    #[arg(long, conflicts_with = "no_parent")]
    pub parent: Option<String>,

    #[arg(long)]
    pub no_parent: bool,

    /// Mark or unmark as minor.
    #[arg(long)]
    pub minor: Option<bool>,

    #[arg(long)]
    pub sprint: Option<String>,

    #[arg(long, conflicts_with = "clear_defer")]
    pub defer: Option<String>,

    #[arg(long)]
    pub clear_defer: bool,

    #[arg(long, conflicts_with = "clear_due")]
    pub due: Option<String>,

    #[arg(long)]
    pub clear_due: bool,
}

impl UpdateArgs {
    fn patch(&self) -> Result<IssuePatch> {
        let parent_id = if self.no_parent {
            Some(None)
        } else {
            self.parent
                .as_deref()
                .map(App::issue_id)
                .transpose()?
                .map(Some)
        };
        let date_patch = |value: Option<&str>, clear: bool| -> Result<_> {
            if clear {
                return Ok(Some(None));
            }
            Ok(value.map(parse_date).transpose()?.map(Some))
        };
        Ok(IssuePatch {
            title: self.title.clone(),
            description: self.description.clone(),
            acceptance: self.acceptance.clone(),
            issue_type: parse_opt::<IssueType>(self.issue_type.as_deref())?,
            priority: parse_opt::<Priority>(self.priority.as_deref())?,
            points: self.points,
            labels: self
                .labels
                .as_ref()
                .map(|raw| split_list(std::slice::from_ref(raw))),
            add_labels: split_list(&self.add_label),
            remove_labels: split_list(&self.remove_label),
            parent_id,
            minor: self.minor,
            sprint: self.sprint.clone(),
            defer_at: date_patch(self.defer.as_deref(), self.clear_defer)?,
            due_at: date_patch(self.due.as_deref(), self.clear_due)?,
        })
    }
}

/// # Errors
///
/// `invalid_input` when nothing would change or a value is invalid.
pub fn run_update(args: &UpdateArgs, app: &App) -> Result<()> {
    let id = App::issue_id(&args.id)?;
    let patch = args.patch()?;
    if patch.is_empty() {
        return Err(TdError::invalid("nothing to update; pass at least one field flag").into());
    }
    let applied = issues::update(&app.store, app.ctx(), &id, patch)?;
    render_warnings(app.output, &applied.warnings);
    mutation_line(app.output, &format!("UPDATED {id}"), &applied.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: UpdateArgs,
    }

    #[test]
    fn empty_patch_detected() {
        let w = Wrapper::parse_from(["test", "td-a1b2c3"]);
        assert!(w.args.patch().unwrap().is_empty());
    }

    #[test]
    fn parent_clear_and_labels() {
        let w = Wrapper::parse_from([
            "test",
            "a1b2c3",
            "--no-parent",
            "--labels",
            "x, y",
            "--clear-due",
            "--priority",
            "p0",
        ]);
        let patch = w.args.patch().unwrap();
        assert_eq!(patch.parent_id, Some(None));
        assert_eq!(patch.labels, Some(vec!["x".to_string(), "y".to_string()]));
        assert_eq!(patch.due_at, Some(None));
        assert_eq!(patch.priority, Some(Priority::P0));
    }

    #[test]
    fn parent_and_no_parent_conflict() {
        let parsed = Wrapper::try_parse_from(["test", "x", "--parent", "y", "--no-parent"]);
        assert!(parsed.is_err());
    }
}
