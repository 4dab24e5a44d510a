//! TDQ, the `td` query language.
//!
//! ```text
//! status = open AND (priority <= P1 OR labels ~ urgent) sort:-created
//! log.message ~ flaky AND NOT has(handoffs)
//! descendant_of(td-a1b2c3) is_ready()
//! ```
//!
//! A query goes through [`parse`], [`validate`] (canonical fields and enum
//! values), then [`plan::plan`], which lowers the tree once and splits it
//! into a SQL row filter and an in-memory residual.

pub mod ast;
pub mod dates;
pub mod eval;
pub mod fields;
pub mod lexer;
pub mod parser;
pub mod plan;
pub mod validate;

pub use ast::Query;
pub use parser::ParseError;
pub use plan::DEFAULT_FETCH_CAP;

use crate::db::issues::{self, IssueSort};
use crate::error::{Result, TdError};
use crate::model::Issue;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ToSql};

/// Parse without semantic checks.
///
/// # Errors
///
/// Returns the first syntax error with its position.
pub fn parse(input: &str) -> Result<Query, ParseError> {
    parser::parse(input)
}

/// Check and canonicalize a parsed query.
///
/// # Errors
///
/// Returns `validation_error` carrying every problem found.
pub fn validate(query: &Query) -> Result<Query> {
    validate::validate(query).map_err(TdError::Validation)
}

/// Parse and validate.
///
/// # Errors
///
/// Returns `parse_error` or `validation_error`.
pub fn compile(input: &str) -> Result<Query> {
    validate(&parse(input)?)
}

/// Evaluation settings.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Value of `@me`.
    pub session_id: String,
    pub now: DateTime<Utc>,
    /// Used when the query has no `sort:` clause.
    pub sort: IssueSort,
    pub limit: Option<usize>,
    pub include_deleted: bool,
    /// Row bound for the SQL fetch when an in-memory pass follows.
    pub fetch_cap: usize,
}

impl QueryOptions {
    #[must_use]
    pub fn new(session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            now,
            sort: IssueSort::default(),
            limit: None,
            include_deleted: false,
            fetch_cap: DEFAULT_FETCH_CAP,
        }
    }

    fn lower_context(&self) -> plan::LowerContext {
        plan::LowerContext {
            now: self.now,
            session_id: self.session_id.clone(),
        }
    }
}

/// Run a compiled query.
///
/// # Errors
///
/// Returns `validation_error` for dates out of range and an execution error
/// for storage failures or parent cycles met during evaluation.
pub fn execute(conn: &Connection, query: &Query, opts: &QueryOptions) -> Result<Vec<Issue>> {
    let plan = plan::plan(
        query,
        &opts.lower_context(),
        opts.sort,
        opts.include_deleted,
        opts.limit,
        opts.fetch_cap,
    )?;
    let params: Vec<Box<dyn ToSql>> = plan
        .filter
        .params
        .iter()
        .cloned()
        .map(|p| Box::new(p) as Box<dyn ToSql>)
        .collect();
    let rows = issues::select_where(conn, &plan.filter.sql, &params, plan.sort, plan.fetch_limit)
        .map_err(eval::execution_error)?;
    if !plan.needs_memory_pass() {
        return Ok(rows);
    }
    if rows.len() >= opts.fetch_cap {
        tracing::warn!(
            cap = opts.fetch_cap,
            "query fetch hit the row cap; results may be incomplete"
        );
    }

    let mut lookups = eval::Lookups::new(conn);
    let mut out = Vec::new();
    for issue in rows {
        let mut keep = true;
        for node in &plan.residual {
            if !eval::matches(node, &issue, &mut lookups).map_err(eval::execution_error)? {
                keep = false;
                break;
            }
        }
        if keep {
            out.push(issue);
            if plan.limit.is_some_and(|limit| out.len() >= limit) {
                break;
            }
        }
    }
    Ok(out)
}

/// Compile and run `input`.
///
/// # Errors
///
/// See [`compile`] and [`execute`].
pub fn query(conn: &Connection, input: &str, opts: &QueryOptions) -> Result<Vec<Issue>> {
    let compiled = compile(input)?;
    tracing::debug!(query = %compiled, "executing tdq");
    execute(conn, &compiled, opts)
}

/// Whether a single issue satisfies `query`, evaluated fully in memory.
///
/// # Errors
///
/// See [`execute`].
pub fn matches_issue(
    conn: &Connection,
    query: &Query,
    issue: &Issue,
    opts: &QueryOptions,
) -> Result<bool> {
    if issue.is_deleted() && !opts.include_deleted {
        return Ok(false);
    }
    let Some(expr) = &query.expr else {
        return Ok(true);
    };
    let node = plan::lower(expr, &opts.lower_context())?;
    let mut lookups = eval::Lookups::new(conn);
    eval::matches(&node, issue, &mut lookups).map_err(eval::execution_error)
}
