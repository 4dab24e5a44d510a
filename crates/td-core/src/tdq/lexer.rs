//! TDQ tokenizer.
//!
//! Positions are 1-based line and column of the first character of each
//! token. Outside string literals a backslash before punctuation is dropped,
//! so `status \!= closed` lexes like `status != closed`.

use super::ast::CompareOp;
use super::parser::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Number(i64),
    Str(String),
    Date(String),
    Me,
    Op(CompareOp),
    And,
    Or,
    Not,
    Empty,
    Null,
    LParen,
    RParen,
    Comma,
    Sort { field: String, descending: bool },
    Eof,
}

impl TokenKind {
    /// Short human description used in "expected ..., found ..." messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Ident(s) => format!("identifier '{s}'"),
            Self::Number(n) => format!("number {n}"),
            Self::Str(s) => format!("string \"{s}\""),
            Self::Date(s) => format!("date {s}"),
            Self::Me => "@me".to_string(),
            Self::Op(op) => format!("operator '{op}'"),
            Self::And => "AND".to_string(),
            Self::Or => "OR".to_string(),
            Self::Not => "NOT".to_string(),
            Self::Empty => "EMPTY".to_string(),
            Self::Null => "NULL".to_string(),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
            Self::Comma => "','".to_string(),
            Self::Sort { .. } => "sort clause".to_string(),
            Self::Eof => "end of query".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

/// Classification of a bare word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordKind {
    Ident,
    Number,
    Date,
    Invalid,
}

const fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn is_iso_day(word: &str) -> bool {
    let b = word.as_bytes();
    b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && b.iter()
            .enumerate()
            .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit())
}

/// Classify a word the way the lexer does.
#[must_use]
pub fn word_kind(word: &str) -> WordKind {
    let Some(first) = word.chars().next() else {
        return WordKind::Invalid;
    };
    if !word.chars().skip(1).all(is_word_char) {
        return WordKind::Invalid;
    }
    if let Some(rest) = word.strip_prefix(['-', '+']) {
        if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
            return WordKind::Number;
        }
        let (digits, unit) = rest.split_at(rest.len().saturating_sub(1));
        if !digits.is_empty()
            && digits.bytes().all(|b| b.is_ascii_digit())
            && matches!(unit, "d" | "w" | "m" | "h")
        {
            return WordKind::Date;
        }
        return WordKind::Invalid;
    }
    if word.bytes().all(|b| b.is_ascii_digit()) {
        return WordKind::Number;
    }
    if is_iso_day(word) {
        return WordKind::Date;
    }
    if first.is_ascii_alphanumeric() || first == '_' {
        WordKind::Ident
    } else {
        WordKind::Invalid
    }
}

/// Reserved words, matched case-insensitively.
#[must_use]
pub fn is_keyword(word: &str) -> bool {
    ["and", "or", "not", "empty", "null"]
        .iter()
        .any(|k| k.eq_ignore_ascii_case(word))
}

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    pending: Option<Token>,
}

impl Lexer {
    #[must_use]
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            pending: None,
        }
    }

    /// Tokenize the whole input. The last token is always `Eof`.
    ///
    /// # Errors
    ///
    /// Returns a positioned [`ParseError`] on the first invalid character,
    /// unterminated string or malformed literal.
    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn error(&self, line: usize, col: usize, message: impl Into<String>) -> ParseError {
        ParseError::new(message, line, col, None)
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '\\'
                && self
                    .peek_at(1)
                    .is_some_and(|n| !n.is_alphanumeric() && !n.is_whitespace())
            {
                // Shell escape before punctuation.
                self.bump();
                return;
            } else {
                return;
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        if let Some(token) = self.pending.take() {
            return Ok(token);
        }
        self.skip_trivia();
        let (line, col) = (self.line, self.col);
        let token = |kind| Token { kind, line, col };

        let Some(c) = self.peek() else {
            return Ok(token(TokenKind::Eof));
        };

        let kind = match c {
            '(' => {
                self.bump();
                TokenKind::LParen
            }
            ')' => {
                self.bump();
                TokenKind::RParen
            }
            ',' => {
                self.bump();
                TokenKind::Comma
            }
            '=' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                }
                TokenKind::Op(CompareOp::Eq)
            }
            '~' => {
                self.bump();
                TokenKind::Op(CompareOp::Contains)
            }
            '!' => {
                self.bump();
                match self.peek() {
                    Some('=') => {
                        self.bump();
                        TokenKind::Op(CompareOp::Ne)
                    }
                    Some('~') => {
                        self.bump();
                        TokenKind::Op(CompareOp::NotContains)
                    }
                    _ => TokenKind::Not,
                }
            }
            '<' | '>' => {
                self.bump();
                let inclusive = self.peek() == Some('=');
                if inclusive {
                    self.bump();
                }
                TokenKind::Op(match (c, inclusive) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    (_, false) => CompareOp::Gt,
                    (_, true) => CompareOp::Ge,
                })
            }
            '&' | '|' => {
                self.bump();
                if self.peek() != Some(c) {
                    return Err(self.error(line, col, format!("expected '{c}{c}'")));
                }
                self.bump();
                if c == '&' { TokenKind::And } else { TokenKind::Or }
            }
            '"' | '\'' => self.read_string(c, line, col)?,
            '@' => {
                self.bump();
                let word = self.read_word();
                if word.eq_ignore_ascii_case("me") {
                    TokenKind::Me
                } else {
                    return Err(self.error(line, col, format!("unknown reference '@{word}'")));
                }
            }
            '-' | '+' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => {
                self.read_word_token(line, col)?
            }
            c if c.is_ascii_alphanumeric() || c == '_' => self.read_word_token(line, col)?,
            other => {
                return Err(self.error(line, col, format!("unexpected character '{other}'")));
            }
        };
        Ok(token(kind))
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        if let Some(sign @ ('-' | '+')) = self.peek() {
            word.push(sign);
            self.bump();
        }
        while let Some(c) = self.peek() {
            if !is_word_char(c) {
                break;
            }
            word.push(c);
            self.bump();
        }
        word
    }

    fn read_word_token(&mut self, line: usize, col: usize) -> Result<TokenKind, ParseError> {
        let word = self.read_word();

        if self.peek() == Some(':') {
            let (colon_line, colon_col) = (self.line, self.col);
            self.bump();
            if word.eq_ignore_ascii_case("sort") {
                return self.read_sort(line, col);
            }
            // Legacy `field:value`; the colon stands in for `=`.
            self.pending = Some(Token {
                kind: TokenKind::Op(CompareOp::Eq),
                line: colon_line,
                col: colon_col,
            });
        }

        match word_kind(&word) {
            WordKind::Number => word.parse::<i64>().map(TokenKind::Number).map_err(|_| {
                self.error(line, col, format!("number '{word}' is out of range"))
            }),
            WordKind::Date => Ok(TokenKind::Date(word)),
            WordKind::Ident => Ok(match word.to_ascii_lowercase().as_str() {
                "and" => TokenKind::And,
                "or" => TokenKind::Or,
                "not" => TokenKind::Not,
                "empty" => TokenKind::Empty,
                "null" => TokenKind::Null,
                _ => TokenKind::Ident(word),
            }),
            WordKind::Invalid => Err(self.error(line, col, format!("malformed literal '{word}'"))),
        }
    }

    fn read_sort(&mut self, line: usize, col: usize) -> Result<TokenKind, ParseError> {
        while self.peek().is_some_and(|c| c == ' ' || c == '\t') {
            self.bump();
        }
        let descending = match self.peek() {
            Some('-') => {
                self.bump();
                true
            }
            Some('+') => {
                self.bump();
                false
            }
            _ => false,
        };
        let mut field = String::new();
        while let Some(c) = self.peek() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            field.push(c);
            self.bump();
        }
        if field.is_empty() {
            return Err(ParseError::new(
                "sort clause has no field",
                line,
                col,
                Some("sort field".to_string()),
            ));
        }
        Ok(TokenKind::Sort { field, descending })
    }

    fn read_string(
        &mut self,
        quote: char,
        line: usize,
        col: usize,
    ) -> Result<TokenKind, ParseError> {
        self.bump();
        let mut out = String::new();
        while let Some(c) = self.bump() {
            match c {
                '\\' => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => out.push(other),
                    None => break,
                },
                c if c == quote => return Ok(TokenKind::Str(out)),
                c => out.push(c),
            }
        }
        Err(ParseError::new(
            "unterminated string literal",
            line,
            col,
            Some(format!("closing {quote}")),
        ))
    }
}
