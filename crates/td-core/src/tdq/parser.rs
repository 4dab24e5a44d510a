//! Recursive-descent TDQ parser.
//!
//! Precedence from loosest to tightest: `OR`, `AND` (explicit or implied by
//! juxtaposition), `NOT`, primary. `(` groups and `NOT` each count one level
//! of nesting; more than [`MAX_DEPTH`] levels is a parse error. `AND`/`OR`
//! chains build binary trees, so a query may join at most [`MAX_TERMS`]
//! operands in total; together the two limits bound every tree walk.

use super::ast::{Call, Comparison, Expr, Query, SortClause, Span, Value};
use super::lexer::{Lexer, Token, TokenKind};
use std::fmt;

/// Maximum nesting of groups and `NOT`.
pub const MAX_DEPTH: usize = 50;

/// Maximum number of `AND`/`OR` operands across the whole query.
pub const MAX_TERMS: usize = 256;

/// A positioned syntax error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub col: usize,
    /// What the parser was looking for, when it knows.
    pub expected: Option<String>,
}

impl ParseError {
    #[must_use]
    pub fn new(
        message: impl Into<String>,
        line: usize,
        col: usize,
        expected: Option<String>,
    ) -> Self {
        Self {
            message: message.into(),
            line,
            col,
            expected,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parse error at line {}, column {}: {}",
            self.line, self.col, self.message
        )?;
        if let Some(expected) = &self.expected {
            write!(f, " (expected {expected})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Parse a TDQ string into a [`Query`]. Whitespace-only input is the empty
/// query.
///
/// # Errors
///
/// Returns a [`ParseError`] with the line and column of the offending token.
pub fn parse(input: &str) -> Result<Query, ParseError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser {
        tokens,
        index: 0,
        depth: 0,
        joins: 0,
    };
    parser.parse_query()
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    depth: usize,
    joins: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with `Eof`.
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.index.min(last)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn span(&self) -> Span {
        let token = self.peek();
        Span::new(token.line, token.col)
    }

    fn peek_second(&self) -> Option<&TokenKind> {
        self.tokens.get(self.index + 1).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.index < self.tokens.len() {
            self.index += 1;
        }
        token
    }

    fn error_expected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        ParseError::new(
            format!("unexpected {}", token.kind.describe()),
            token.line,
            token.col,
            Some(expected.to_string()),
        )
    }

    fn expect(&mut self, kind: &TokenKind, expected: &str) -> Result<Token, ParseError> {
        if self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            Err(self.error_expected(expected))
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            let token = self.peek();
            return Err(ParseError::new(
                format!("query nests deeper than {MAX_DEPTH} levels"),
                token.line,
                token.col,
                None,
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Count one more `AND`/`OR` operand, failing at the current token once
    /// the query exceeds [`MAX_TERMS`].
    fn join(&mut self) -> Result<(), ParseError> {
        self.joins += 1;
        if self.joins >= MAX_TERMS {
            let token = self.peek();
            return Err(ParseError::new(
                format!("query joins more than {MAX_TERMS} terms"),
                token.line,
                token.col,
                None,
            ));
        }
        Ok(())
    }

    fn parse_query(&mut self) -> Result<Query, ParseError> {
        let mut query = Query::default();
        if !matches!(self.peek_kind(), TokenKind::Eof | TokenKind::Sort { .. }) {
            query.expr = Some(self.parse_or()?);
        }
        if let TokenKind::Sort { field, descending } = self.peek_kind().clone() {
            let at = self.span();
            self.advance();
            query.sort = Some(SortClause {
                field,
                descending,
                at,
            });
        }
        self.expect(&TokenKind::Eof, "AND, OR or end of query")?;
        Ok(query)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_and()?;
        while self.peek_kind() == &TokenKind::Or {
            self.join()?;
            self.advance();
            let rhs = self.parse_and()?;
            expr = Expr::or(expr, rhs);
        }
        Ok(expr)
    }

    fn starts_operand(kind: &TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Ident(_) | TokenKind::Str(_) | TokenKind::LParen | TokenKind::Not
        )
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_unary()?;
        loop {
            if self.peek_kind() == &TokenKind::And {
                self.join()?;
                self.advance();
            } else if Self::starts_operand(self.peek_kind()) {
                self.join()?;
            } else {
                break;
            }
            let rhs = self.parse_unary()?;
            expr = Expr::and(expr, rhs);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.peek_kind() == &TokenKind::Not {
            self.advance();
            self.enter()?;
            let inner = self.parse_unary();
            self.leave();
            return Ok(Expr::not(inner?));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let at = self.span();
        match self.peek_kind().clone() {
            TokenKind::LParen => {
                self.advance();
                self.enter()?;
                let inner = self.parse_or();
                self.leave();
                let inner = inner?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Str(text) => {
                self.advance();
                Ok(Expr::Text(text))
            }
            TokenKind::Ident(name) => match self.peek_second().cloned() {
                Some(TokenKind::LParen) => {
                    self.advance();
                    self.parse_call(name, at)
                }
                Some(TokenKind::Op(op)) => {
                    self.advance();
                    self.advance();
                    let value = self.parse_value()?;
                    Ok(Expr::Compare(Comparison {
                        field: name,
                        op,
                        value,
                        at,
                    }))
                }
                _ => {
                    // A lone word is a text search.
                    self.advance();
                    Ok(Expr::Text(name))
                }
            },
            _ => Err(self.error_expected("field comparison, function, text or '('")),
        }
    }

    fn parse_call(&mut self, name: String, at: Span) -> Result<Expr, ParseError> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if self.peek_kind() != &TokenKind::RParen {
            loop {
                args.push(self.parse_scalar()?);
                if self.peek_kind() == &TokenKind::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "',' or ')'")?;
        Ok(Expr::Call(Call { name, args, at }))
    }

    fn parse_value(&mut self) -> Result<Value, ParseError> {
        if self.peek_kind() != &TokenKind::LParen {
            return self.parse_scalar();
        }
        self.advance();
        let mut items = vec![self.parse_scalar()?];
        while self.peek_kind() == &TokenKind::Comma {
            self.advance();
            items.push(self.parse_scalar()?);
        }
        self.expect(&TokenKind::RParen, "',' or ')'")?;
        Ok(Value::List(items))
    }

    fn parse_scalar(&mut self) -> Result<Value, ParseError> {
        let value = match self.peek_kind().clone() {
            TokenKind::Ident(s) => Value::Ident(s),
            TokenKind::Number(n) => Value::Number(n),
            TokenKind::Str(s) => Value::Str(s),
            TokenKind::Date(s) => Value::Date(s),
            TokenKind::Me => Value::Me,
            TokenKind::Empty => Value::Empty,
            TokenKind::Null => Value::Null,
            _ => return Err(self.error_expected("value")),
        };
        self.advance();
        Ok(value)
    }
}
