//! Lowering and SQL generation.
//!
//! [`lower`] walks a validated tree once and produces a [`Node`] tree whose
//! leaves are fully typed predicates. The same leaves render to SQL here and
//! are tested against loaded issues in [`super::eval`], so the two backends
//! cannot drift apart.
//!
//! Leaves that need related rows, graph walks or prefetched sets have no SQL
//! form. [`Plan`] pushes every top-level conjunct that does into the `WHERE`
//! clause and leaves the rest for the in-memory pass.

use super::ast::{CompareOp, Expr, Query, Value};
use super::dates::{self, DateRange};
use super::fields::{self, FieldKind, FieldRef, Related, Scope};
use crate::db::issues::IssueSort;
use crate::error::{Result, TdError};
use crate::time;
use chrono::{DateTime, Utc};
use rusqlite::ToSql;
use rusqlite::types::ToSqlOutput;

/// Typed right-hand side of a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Text(String),
    Number(i64),
    Bool(bool),
    Range(DateRange),
    Empty,
    List(Vec<Operand>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Test {
    pub op: CompareOp,
    pub operand: Operand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Field { field: FieldRef, test: Test },
    Text(String),
    Has(Related),
    DescendantOf(String),
    Blocks(String),
    BlockedBy(String),
    LinkedTo(String),
    Rework,
    IsReady,
    HasOpenDeps,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
    Leaf(Predicate),
}

/// Clock and identity a query is evaluated against.
#[derive(Debug, Clone)]
pub struct LowerContext {
    pub now: DateTime<Utc>,
    pub session_id: String,
}

fn invalid(message: impl Into<String>) -> TdError {
    TdError::Validation(vec![message.into()])
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        other => other.as_text().map(str::to_string),
    }
}

fn operand(kind: FieldKind, value: &Value, ctx: &LowerContext) -> Result<Operand> {
    match value {
        Value::Empty | Value::Null => return Ok(Operand::Empty),
        Value::Me => return Ok(Operand::Text(ctx.session_id.clone())),
        Value::List(items) => {
            return items
                .iter()
                .map(|item| operand(kind, item, ctx))
                .collect::<Result<Vec<_>>>()
                .map(Operand::List);
        }
        _ => {}
    }
    let raw = text_of(value).ok_or_else(|| invalid("unsupported value"))?;
    match kind {
        FieldKind::Number => match value {
            Value::Number(n) => Ok(Operand::Number(*n)),
            _ => raw
                .trim()
                .parse()
                .map(Operand::Number)
                .map_err(|_| invalid(format!("'{raw}' is not a number"))),
        },
        FieldKind::Bool => Ok(Operand::Bool(raw.eq_ignore_ascii_case("true"))),
        FieldKind::Date => {
            let spec = dates::parse(&raw).ok_or_else(|| invalid(format!("'{raw}' is not a date")))?;
            dates::resolve(spec, ctx.now)
                .map(Operand::Range)
                .ok_or_else(|| invalid(format!("date '{raw}' is out of range")))
        }
        _ => Ok(Operand::Text(raw)),
    }
}

fn field_leaf(field: FieldRef, op: CompareOp, operand: Operand) -> Node {
    Node::Leaf(Predicate::Field {
        field,
        test: Test { op, operand },
    })
}

fn issue_field(name: &str) -> Result<FieldRef> {
    fields::resolve(name)
        .filter(|f| f.scope == Scope::Issue)
        .ok_or_else(|| invalid(format!("unknown field '{name}'")))
}

fn single_arg(args: &[Value], name: &str) -> Result<String> {
    args.first()
        .and_then(text_of)
        .ok_or_else(|| invalid(format!("{name}() needs an argument")))
}

fn fold(nodes: Vec<Node>, join: fn(Box<Node>, Box<Node>) -> Node) -> Option<Node> {
    nodes
        .into_iter()
        .reduce(|acc, next| join(Box::new(acc), Box::new(next)))
}

/// Lower a validated expression.
///
/// # Errors
///
/// Returns `validation_error` for anything validation would have rejected
/// and for dates that leave the representable range.
pub fn lower(expr: &Expr, ctx: &LowerContext) -> Result<Node> {
    Ok(match expr {
        Expr::And(l, r) => Node::And(Box::new(lower(l, ctx)?), Box::new(lower(r, ctx)?)),
        Expr::Or(l, r) => Node::Or(Box::new(lower(l, ctx)?), Box::new(lower(r, ctx)?)),
        Expr::Not(inner) => Node::Not(Box::new(lower(inner, ctx)?)),
        Expr::Text(text) => Node::Leaf(Predicate::Text(text.clone())),
        Expr::Compare(cmp) => {
            let field = fields::resolve(&cmp.field)
                .ok_or_else(|| invalid(format!("unknown field '{}'", cmp.field)))?;
            field_leaf(field, cmp.op, operand(field.kind(), &cmp.value, ctx)?)
        }
        Expr::Call(call) => lower_call(&call.name, &call.args, ctx)?,
    })
}

fn lower_call(name: &str, args: &[Value], ctx: &LowerContext) -> Result<Node> {
    let leaf = |p| Ok(Node::Leaf(p));
    match name {
        "has" => {
            let target = single_arg(args, name)?;
            if let Some(related) = Related::parse(&target) {
                return leaf(Predicate::Has(related));
            }
            Ok(field_leaf(issue_field(&target)?, CompareOp::Ne, Operand::Empty))
        }
        "is" => Ok(field_leaf(
            issue_field("status")?,
            CompareOp::Eq,
            Operand::Text(single_arg(args, name)?),
        )),
        "child_of" => Ok(field_leaf(
            issue_field("parent")?,
            CompareOp::Eq,
            Operand::Text(single_arg(args, name)?),
        )),
        "descendant_of" => leaf(Predicate::DescendantOf(single_arg(args, name)?)),
        "blocks" => leaf(Predicate::Blocks(single_arg(args, name)?)),
        "blocked_by" => leaf(Predicate::BlockedBy(single_arg(args, name)?)),
        "linked_to" => leaf(Predicate::LinkedTo(single_arg(args, name)?)),
        "rework" => leaf(Predicate::Rework),
        "is_ready" => leaf(Predicate::IsReady),
        "has_open_deps" => leaf(Predicate::HasOpenDeps),
        "any" | "all" | "none" => {
            let field = issue_field(&single_arg(args, name)?)?;
            let leaves = args[1..]
                .iter()
                .map(|v| Ok(field_leaf(field, CompareOp::Eq, operand(field.kind(), v, ctx)?)))
                .collect::<Result<Vec<_>>>()?;
            let joined = if name == "all" {
                fold(leaves, Node::And)
            } else {
                fold(leaves, Node::Or)
            }
            .ok_or_else(|| invalid(format!("{name}() needs at least one value")))?;
            Ok(if name == "none" {
                Node::Not(Box::new(joined))
            } else {
                joined
            })
        }
        other => Err(invalid(format!("unknown function '{other}'"))),
    }
}

/// A positional SQL parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Text(s) => s.to_sql(),
            Self::Int(n) => n.to_sql(),
        }
    }
}

/// A `WHERE` fragment with `?` placeholders in parameter order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Fragment {
    fn new(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    fn join(parts: Vec<Self>, sep: &str) -> Self {
        let sql = parts
            .iter()
            .map(|p| format!("({})", p.sql))
            .collect::<Vec<_>>()
            .join(sep);
        let params = parts.into_iter().flat_map(|p| p.params).collect();
        Self { sql, params }
    }

    fn negate(self) -> Self {
        Self {
            sql: format!("NOT ({})", self.sql),
            params: self.params,
        }
    }
}

/// Escape `%`, `_` and the escape character itself for `LIKE ... ESCAPE '\'`.
#[must_use]
pub fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

const NEVER: &str = "0";

impl Node {
    /// SQL form, or `None` when any leaf below needs the in-memory pass.
    #[must_use]
    pub fn to_sql(&self) -> Option<Fragment> {
        match self {
            Self::And(l, r) => Some(Fragment::join(vec![l.to_sql()?, r.to_sql()?], " AND ")),
            Self::Or(l, r) => Some(Fragment::join(vec![l.to_sql()?, r.to_sql()?], " OR ")),
            Self::Not(inner) => Some(inner.to_sql()?.negate()),
            Self::Leaf(predicate) => predicate.to_sql(),
        }
    }

    /// Split a top-level `AND` chain into its conjuncts.
    #[must_use]
    pub fn conjuncts(self) -> Vec<Self> {
        match self {
            Self::And(l, r) => {
                let mut out = l.conjuncts();
                out.extend(r.conjuncts());
                out
            }
            other => vec![other],
        }
    }
}

impl Predicate {
    #[must_use]
    pub fn to_sql(&self) -> Option<Fragment> {
        match self {
            Self::Field { field, test } if field.scope == Scope::Issue => {
                Some(field_sql(field.def.column, field.kind(), test))
            }
            Self::Field { .. }
            | Self::DescendantOf(_)
            | Self::Rework
            | Self::IsReady
            | Self::HasOpenDeps => None,
            Self::Text(text) => {
                let pattern = format!("%{}%", escape_like(text));
                Some(Fragment::new(
                    r"i.id LIKE ? ESCAPE '\' OR i.title LIKE ? ESCAPE '\' OR i.description LIKE ? ESCAPE '\'",
                    vec![
                        SqlParam::Text(pattern.clone()),
                        SqlParam::Text(pattern.clone()),
                        SqlParam::Text(pattern),
                    ],
                ))
            }
            Self::Has(related) => Some(Fragment::new(
                match related {
                    Related::Log => "EXISTS (SELECT 1 FROM logs l WHERE l.issue_id = i.id)",
                    Related::Comment => {
                        "EXISTS (SELECT 1 FROM comments c WHERE c.issue_id = i.id AND c.deleted_at IS NULL)"
                    }
                    Related::Handoff => "EXISTS (SELECT 1 FROM handoffs h WHERE h.issue_id = i.id)",
                    Related::File => "EXISTS (SELECT 1 FROM issue_files f WHERE f.issue_id = i.id)",
                    Related::Children => {
                        "EXISTS (SELECT 1 FROM issues ch WHERE ch.parent_id = i.id AND ch.deleted_at IS NULL)"
                    }
                    Related::Blockers => {
                        "EXISTS (SELECT 1 FROM issue_dependencies d WHERE d.blocked_id = i.id)"
                    }
                },
                Vec::new(),
            )),
            Self::Blocks(id) => Some(Fragment::new(
                "i.id IN (SELECT blocker_id FROM issue_dependencies WHERE blocked_id = ?)",
                vec![SqlParam::Text(id.clone())],
            )),
            Self::BlockedBy(id) => Some(Fragment::new(
                "i.id IN (SELECT blocked_id FROM issue_dependencies WHERE blocker_id = ?)",
                vec![SqlParam::Text(id.clone())],
            )),
            Self::LinkedTo(path) => Some(Fragment::new(
                r"EXISTS (SELECT 1 FROM issue_files f WHERE f.issue_id = i.id AND f.file_path LIKE ? ESCAPE '\')",
                vec![SqlParam::Text(format!("{}%", escape_like(path)))],
            )),
        }
    }
}

fn field_sql(column: &str, kind: FieldKind, test: &Test) -> Fragment {
    let positive = match test.op {
        CompareOp::Eq | CompareOp::Ne => eq_sql(column, kind, &test.operand),
        CompareOp::Contains | CompareOp::NotContains => contains_sql(column, kind, &test.operand),
        op => order_sql(column, op, &test.operand),
    };
    if test.op.is_negated() {
        positive.negate()
    } else {
        positive
    }
}

fn eq_sql(column: &str, kind: FieldKind, operand: &Operand) -> Fragment {
    match (kind, operand) {
        (_, Operand::List(items)) => {
            if items.is_empty() {
                return Fragment::new(NEVER, Vec::new());
            }
            Fragment::join(items.iter().map(|o| eq_sql(column, kind, o)).collect(), " OR ")
        }
        (FieldKind::Date, Operand::Empty) => Fragment::new(format!("{column} IS NULL"), Vec::new()),
        (FieldKind::Number | FieldKind::Bool, Operand::Empty) => {
            Fragment::new(format!("{column} = 0"), Vec::new())
        }
        (_, Operand::Empty) => Fragment::new(format!("COALESCE({column}, '') = ''"), Vec::new()),
        (FieldKind::Labels, Operand::Text(label)) => Fragment::new(
            format!(r"(',' || {column} || ',') LIKE ? ESCAPE '\'"),
            vec![SqlParam::Text(format!("%,{},%", escape_like(label)))],
        ),
        (k, Operand::Text(value)) if k.is_textual() => Fragment::new(
            format!("lower(COALESCE({column}, '')) = lower(?)"),
            vec![SqlParam::Text(value.clone())],
        ),
        (_, Operand::Text(value)) => {
            Fragment::new(format!("{column} = ?"), vec![SqlParam::Text(value.clone())])
        }
        (_, Operand::Number(n)) => Fragment::new(format!("{column} = ?"), vec![SqlParam::Int(*n)]),
        (_, Operand::Bool(b)) => {
            Fragment::new(format!("{column} = ?"), vec![SqlParam::Int(i64::from(*b))])
        }
        (_, Operand::Range(range)) => Fragment::new(
            format!("{column} IS NOT NULL AND {column} >= ? AND {column} < ?"),
            vec![
                SqlParam::Text(time::to_db(&range.start)),
                SqlParam::Text(time::to_db(&range.end)),
            ],
        ),
    }
}

fn contains_sql(column: &str, kind: FieldKind, operand: &Operand) -> Fragment {
    let Operand::Text(needle) = operand else {
        return Fragment::new(NEVER, Vec::new());
    };
    let column = if kind == FieldKind::Labels {
        column.to_string()
    } else {
        format!("COALESCE({column}, '')")
    };
    Fragment::new(
        format!(r"{column} LIKE ? ESCAPE '\'"),
        vec![SqlParam::Text(format!("%{}%", escape_like(needle)))],
    )
}

fn order_sql(column: &str, op: CompareOp, operand: &Operand) -> Fragment {
    match operand {
        Operand::Text(value) => {
            Fragment::new(format!("{column} {op} ?"), vec![SqlParam::Text(value.clone())])
        }
        Operand::Number(n) => Fragment::new(format!("{column} {op} ?"), vec![SqlParam::Int(*n)]),
        Operand::Range(range) => {
            let (cmp, bound) = match op {
                CompareOp::Lt => ("<", range.start),
                CompareOp::Le => ("<", range.end),
                CompareOp::Gt => (">=", range.end),
                _ => (">=", range.start),
            };
            Fragment::new(
                format!("{column} IS NOT NULL AND {column} {cmp} ?"),
                vec![SqlParam::Text(time::to_db(&bound))],
            )
        }
        _ => Fragment::new(NEVER, Vec::new()),
    }
}

/// Default bound on rows fetched before the in-memory pass.
pub const DEFAULT_FETCH_CAP: usize = 10_000;

/// Execution plan for one query.
#[derive(Debug, Clone)]
pub struct Plan {
    /// `WHERE` clause for the row fetch, deletion filter included.
    pub filter: Fragment,
    /// Conjuncts evaluated in memory after the fetch.
    pub residual: Vec<Node>,
    pub sort: IssueSort,
    /// Row limit for the SQL fetch.
    pub fetch_limit: Option<usize>,
    /// Limit applied after the in-memory pass.
    pub limit: Option<usize>,
}

impl Plan {
    #[must_use]
    pub fn needs_memory_pass(&self) -> bool {
        !self.residual.is_empty()
    }
}

/// Plan `query`. The query's sort clause overrides `default_sort`.
///
/// # Errors
///
/// Returns `validation_error` when lowering fails.
pub fn plan(
    query: &Query,
    ctx: &LowerContext,
    default_sort: IssueSort,
    include_deleted: bool,
    limit: Option<usize>,
    fetch_cap: usize,
) -> Result<Plan> {
    let mut parts = Vec::new();
    if !include_deleted {
        parts.push(Fragment::new("i.deleted_at IS NULL", Vec::new()));
    }
    let mut residual = Vec::new();
    if let Some(expr) = &query.expr {
        for conjunct in lower(expr, ctx)?.conjuncts() {
            match conjunct.to_sql() {
                Some(fragment) => parts.push(fragment),
                None => residual.push(conjunct),
            }
        }
    }
    let filter = if parts.is_empty() {
        Fragment::default()
    } else {
        Fragment::join(parts, " AND ")
    };

    let sort = match &query.sort {
        Some(clause) => {
            let raw = format!("{}{}", if clause.descending { "-" } else { "" }, clause.field);
            raw.parse::<IssueSort>()?
        }
        None => default_sort,
    };

    let fetch_limit = if residual.is_empty() {
        limit
    } else {
        Some(fetch_cap)
    };
    Ok(Plan {
        filter,
        residual,
        sort,
        fetch_limit,
        limit,
    })
}
