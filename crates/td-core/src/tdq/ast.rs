//! TDQ syntax tree.
//!
//! `Display` prints a query that parses back to the same tree: right-nested
//! `AND`/`OR` chains and grouped operands of `NOT` keep their parentheses.

use std::fmt::{self, Write as _};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Contains,
    NotContains,
}

impl CompareOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Contains => "~",
            Self::NotContains => "!~",
        }
    }

    /// `!=` and `!~` are the negation of `=` and `~`.
    #[must_use]
    pub const fn is_negated(self) -> bool {
        matches!(self, Self::Ne | Self::NotContains)
    }

    #[must_use]
    pub const fn is_ordering(self) -> bool {
        matches!(self, Self::Lt | Self::Gt | Self::Le | Self::Ge)
    }

    #[must_use]
    pub const fn is_equality(self) -> bool {
        matches!(self, Self::Eq | Self::Ne)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of a comparison or a function argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Ident(String),
    Number(i64),
    Str(String),
    /// ISO day, relative offset (`-7d`) or a named date after validation.
    Date(String),
    Me,
    Empty,
    Null,
    List(Vec<Value>),
}

impl Value {
    /// Textual payload of identifier-like values.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Ident(s) | Self::Str(s) | Self::Date(s) => Some(s),
            _ => None,
        }
    }
}

/// Where a node starts in the query text. Positions never take part in
/// equality: a reprinted query compares equal to the one it came from.
#[derive(Debug, Clone, Copy, Default)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

impl Span {
    #[must_use]
    pub const fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

impl PartialEq for Span {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl Eq for Span {}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.col)
    }
}

/// `field op value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
    pub at: Span,
}

/// `name(arg, ...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Value>,
    pub at: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Comparison),
    Call(Call),
    /// Free text searched over id, title and description.
    Text(String),
}

impl Expr {
    #[must_use]
    pub fn and(left: Self, right: Self) -> Self {
        Self::And(Box::new(left), Box::new(right))
    }

    #[must_use]
    pub fn or(left: Self, right: Self) -> Self {
        Self::Or(Box::new(left), Box::new(right))
    }

    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Self) -> Self {
        Self::Not(Box::new(inner))
    }
}

/// `sort:field` or `sort:-field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortClause {
    pub field: String,
    pub descending: bool,
    pub at: Span,
}

/// A parsed query. Both parts are optional: the empty query matches all.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Query {
    pub expr: Option<Expr>,
    pub sort: Option<SortClause>,
}

impl Query {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.expr.is_none() && self.sort.is_none()
    }
}

/// Whether `s` lexes back as a single plain identifier.
fn is_plain_ident(s: &str) -> bool {
    super::lexer::word_kind(s) == super::lexer::WordKind::Ident
        && !super::lexer::is_keyword(s)
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        if matches!(c, '"' | '\\') {
            f.write_char('\\')?;
        }
        f.write_char(c)?;
    }
    f.write_char('"')
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(s) if is_plain_ident(s) => f.write_str(s),
            Self::Ident(s) | Self::Str(s) => write_quoted(f, s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Date(s) => f.write_str(s),
            Self::Me => f.write_str("@me"),
            Self::Empty => f.write_str("EMPTY"),
            Self::Null => f.write_str("NULL"),
            Self::List(items) => {
                f.write_char('(')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_char(')')
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn grouped(f: &mut fmt::Formatter<'_>, expr: &Expr, wrap: bool) -> fmt::Result {
            if wrap {
                write!(f, "({expr})")
            } else {
                write!(f, "{expr}")
            }
        }

        match self {
            Self::And(l, r) => {
                grouped(f, l, matches!(**l, Self::Or(..)))?;
                f.write_str(" AND ")?;
                grouped(f, r, matches!(**r, Self::Or(..) | Self::And(..)))
            }
            Self::Or(l, r) => {
                write!(f, "{l}")?;
                f.write_str(" OR ")?;
                grouped(f, r, matches!(**r, Self::Or(..)))
            }
            Self::Not(inner) => {
                f.write_str("NOT ")?;
                grouped(f, inner, matches!(**inner, Self::Or(..) | Self::And(..)))
            }
            Self::Compare(c) => write!(f, "{} {} {}", c.field, c.op, c.value),
            Self::Call(call) => {
                write!(f, "{}(", call.name)?;
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_char(')')
            }
            Self::Text(text) => write_quoted(f, text),
        }
    }
}

impl fmt::Display for SortClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sort:")?;
        if self.descending {
            f.write_char('-')?;
        }
        f.write_str(&self.field)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.expr, &self.sort) {
            (Some(expr), Some(sort)) => write!(f, "{expr} {sort}"),
            (Some(expr), None) => write!(f, "{expr}"),
            (None, Some(sort)) => write!(f, "{sort}"),
            (None, None) => Ok(()),
        }
    }
}
