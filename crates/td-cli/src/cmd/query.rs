//! `td query`: run a TDQ expression.

use super::{parse_value, write_issue_rows};
use crate::app::App;
use crate::output::render;
use anyhow::Result;
use chrono::Utc;
use clap::Args;
use serde_json::json;
use std::io::Write as _;
use td_core::db::issues::IssueSort;
use td_core::tdq::{self, QueryOptions};

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// TDQ expression; several words are joined with spaces. Quote it when a
    /// word starts with `-` (e.g. `"created > -7d"`).
    #[arg(required = true)]
    pub expr: Vec<String>,

    /// Sort key, `-` prefix for descending (e.g. `-priority`).
    #[arg(long, allow_hyphen_values = true)]
    pub sort: Option<String>,

    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// Include soft-deleted issues.
    #[arg(long)]
    pub deleted: bool,

    /// Only parse and validate; print the normalized query.
    #[arg(long)]
    pub check: bool,
}

impl QueryArgs {
    fn expression(&self) -> String {
        self.expr.join(" ")
    }
}

/// # Errors
///
/// `parse_error` or `validation_error` for bad queries.
pub fn run_query(args: &QueryArgs, app: &App) -> Result<()> {
    let input = args.expression();
    if args.check {
        let query = tdq::compile(&input)?;
        let normalized = query.to_string();
        return render(app.output, &json!({ "valid": true, "query": normalized }), |_, w| {
            writeln!(w, "OK {normalized}")
        });
    }

    let mut opts = QueryOptions::new(app.session_id(), Utc::now());
    if let Some(sort) = &args.sort {
        opts.sort = parse_value::<IssueSort>(sort)?;
    }
    opts.limit = args.limit;
    opts.include_deleted = args.deleted;
    let found = app.store.read(|conn| tdq::query(conn, &input, &opts))?;
    render(app.output, &found, |items, w| write_issue_rows(w, items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: QueryArgs,
    }

    #[test]
    fn words_are_joined() {
        let w = Wrapper::parse_from(["test", "status", "=", "open", "AND", "priority", "<=", "P1"]);
        assert_eq!(w.args.expression(), "status = open AND priority <= P1");
    }

    #[test]
    fn flags_before_expression() {
        let w = Wrapper::parse_from(["test", "--sort", "-priority", "-n", "5", "type = bug"]);
        assert_eq!(w.args.sort.as_deref(), Some("-priority"));
        assert_eq!(w.args.limit, Some(5));
        assert_eq!(w.args.expression(), "type = bug");
    }
}
