//! `td list`: filtered issue listing.

use super::{parse_opt, parse_value, write_issue_rows, write_issue_table};
use crate::app::App;
use crate::output::render_mode;
use anyhow::Result;
use clap::Args;
use td_core::db::issues::{self, IssueFilter, IssueSort};
use td_core::model::{IssueType, Priority, Status};

const ACTIVE: [Status; 4] = [
    Status::Open,
    Status::InProgress,
    Status::Blocked,
    Status::InReview,
];

#[derive(Args, Debug, Default)]
pub struct ListArgs {
    /// Restrict to these statuses (comma-separated or repeated).
    #[arg(short, long)]
    pub status: Vec<String>,

    /// Include closed issues.
    #[arg(short, long)]
    pub all: bool,

    #[arg(short = 't', long = "type")]
    pub issue_type: Option<String>,

    #[arg(short, long)]
    pub priority: Option<String>,

    #[arg(short, long)]
    pub label: Option<String>,

    /// Children of this issue.
    #[arg(long)]
    pub parent: Option<String>,

    /// Only soft-deleted issues.
    #[arg(long)]
    pub deleted: bool,

    /// Sort key, `-` prefix for descending (e.g. `-created`).
    #[arg(long, allow_hyphen_values = true)]
    pub sort: Option<String>,

    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

impl ListArgs {
    fn filter(&self) -> Result<IssueFilter> {
        let statuses = if self.status.is_empty() {
            if self.all || self.deleted {
                Vec::new()
            } else {
                ACTIVE.to_vec()
            }
        } else {
            super::split_list(&self.status)
                .iter()
                .map(|s| parse_value::<Status>(s))
                .collect::<Result<Vec<_>>>()?
        };
        Ok(IssueFilter {
            statuses,
            issue_type: parse_opt::<IssueType>(self.issue_type.as_deref())?,
            priority: parse_opt::<Priority>(self.priority.as_deref())?,
            label: self.label.clone(),
            parent_id: self.parent.as_deref().map(App::issue_id).transpose()?,
            include_deleted: false,
            only_deleted: self.deleted,
            sort: parse_opt::<IssueSort>(self.sort.as_deref())?.unwrap_or_default(),
            limit: self.limit,
        })
    }
}

/// # Errors
///
/// Fails on unknown filter values.
pub fn run_list(args: &ListArgs, app: &App) -> Result<()> {
    let filter = args.filter()?;
    let found = app.store.read(|conn| issues::list(conn, &filter))?;
    render_mode(
        app.output,
        &found,
        |v, w| write_issue_rows(w, v),
        |v, w| write_issue_table(w, "Issues", v),
    )
}
