//! Source path lexer and parser using logos.
//!
//! Grammar:
//!
//! ```text
//! root     := "/" table flag*
//! relative := (joined "/")* (joined | column)
//! joined   := "[" field "=" field "]" table flag*
//! flag     := "{" name ("=" text)? "}"
//! ```
//!
//! Recognized flags are `sortKey`, `primaryKey`, `filter` and `junction`.

use logos::Logos;
use std::ops::Range;

use crate::error::ConfigError;

/// Tokens of a source path.
#[derive(Logos, Debug, Clone, PartialEq)]
pub enum PathToken {
    #[token("/")]
    Slash,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("=")]
    Equals,

    // Flag body without the braces
    #[regex(r"\{[^{}]*\}", |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].to_string()
    })]
    Flag(String),

    // Table or column name, optionally schema-qualified
    #[regex(r"[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*)?", |lex| lex.slice().to_string())]
    Ident(String),
}

/// A table segment flag.
#[derive(Debug, Clone, PartialEq)]
pub enum Flag {
    SortKey(String),
    PrimaryKey(String),
    /// Filter text, handed to the filter parser.
    Filter(String),
    Junction,
}

/// One table of a source path.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSegment {
    /// `(source field, target field)` for joined tables, `None` for the root.
    pub join: Option<(String, String)>,
    pub table: String,
    pub flags: Vec<Flag>,
    /// The segment as written, flags included.
    pub text: String,
}

impl TableSegment {
    pub fn sort_key(&self) -> Option<&str> {
        self.flags.iter().find_map(|f| match f {
            Flag::SortKey(k) => Some(k.as_str()),
            _ => None,
        })
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.flags.iter().find_map(|f| match f {
            Flag::PrimaryKey(k) => Some(k.as_str()),
            _ => None,
        })
    }

    pub fn filter(&self) -> Option<&str> {
        self.flags.iter().find_map(|f| match f {
            Flag::Filter(text) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn is_junction_flagged(&self) -> bool {
        self.flags.iter().any(|f| matches!(f, Flag::Junction))
    }
}

/// A parsed relative source path.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourcePath {
    /// Joined tables, in order from the parent table.
    pub tables: Vec<TableSegment>,
    /// Trailing column, absent when the path ends at a table.
    pub column: Option<String>,
}

fn invalid(path: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidSourcePath {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn tokenize(path: &str) -> Result<Vec<(PathToken, Range<usize>)>, ConfigError> {
    let mut lexer = PathToken::lexer(path);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next() {
        match token {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(()) => {
                return Err(invalid(
                    path,
                    format!("unexpected '{}' at {}", lexer.slice(), lexer.span().start),
                ))
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    path: &'a str,
    tokens: Vec<(PathToken, Range<usize>)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(path: &'a str) -> Result<Self, ConfigError> {
        Ok(Self {
            path,
            tokens: tokenize(path)?,
            pos: 0,
        })
    }

    fn peek(&self) -> Option<&PathToken> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<(PathToken, Range<usize>)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn is_done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, Range<usize>), ConfigError> {
        match self.next() {
            Some((PathToken::Ident(name), span)) => Ok((name, span)),
            _ => Err(invalid(self.path, format!("expected {}", what))),
        }
    }

    fn expect(&mut self, expected: PathToken, what: &str) -> Result<(), ConfigError> {
        match self.next() {
            Some((token, _)) if token == expected => Ok(()),
            _ => Err(invalid(self.path, format!("expected {}", what))),
        }
    }

    fn flags(&mut self, mut end: usize) -> Result<(Vec<Flag>, usize), ConfigError> {
        let mut flags = Vec::new();
        while let Some(PathToken::Flag(_)) = self.peek() {
            if let Some((PathToken::Flag(body), span)) = self.next() {
                flags.push(parse_flag(self.path, &body)?);
                end = span.end;
            }
        }
        Ok((flags, end))
    }

    /// `[source=target]table{flags}` with the opening bracket already peeked.
    fn joined(&mut self) -> Result<TableSegment, ConfigError> {
        let start = match self.next() {
            Some((PathToken::LBracket, span)) => span.start,
            _ => return Err(invalid(self.path, "expected '['")),
        };
        let (source, _) = self.expect_ident("source field")?;
        self.expect(PathToken::Equals, "'=' in join condition")?;
        let (target, _) = self.expect_ident("target field")?;
        self.expect(PathToken::RBracket, "']'")?;
        let (table, span) = self.expect_ident("table name")?;
        let (flags, end) = self.flags(span.end)?;
        Ok(TableSegment {
            join: Some((source, target)),
            table,
            flags,
            text: self.path[start..end].to_string(),
        })
    }
}

fn parse_flag(path: &str, body: &str) -> Result<Flag, ConfigError> {
    let (name, value) = match body.split_once('=') {
        Some((name, value)) => (name.trim(), Some(value.trim())),
        None => (body.trim(), None),
    };
    match (name, value) {
        ("sortKey", Some(v)) => Ok(Flag::SortKey(v.to_string())),
        ("primaryKey", Some(v)) => Ok(Flag::PrimaryKey(v.to_string())),
        ("filter", Some(v)) if !v.is_empty() => Ok(Flag::Filter(v.to_string())),
        ("junction", None) => Ok(Flag::Junction),
        _ => Err(invalid(path, format!("unknown flag '{{{}}}'", body))),
    }
}

/// Parse the root path of a feature type, e.g. `/observation{sortKey=oid}`.
pub fn parse_root_path(path: &str) -> Result<TableSegment, ConfigError> {
    let mut parser = Parser::new(path)?;
    match parser.next() {
        Some((PathToken::Slash, _)) => {}
        _ => return Err(invalid(path, "root path must start with '/'")),
    }
    let (table, span) = parser.expect_ident("table name")?;
    let start = span.start;
    let (flags, end) = parser.flags(span.end)?;
    if !parser.is_done() {
        return Err(invalid(path, "root path must consist of a single table"));
    }
    Ok(TableSegment {
        join: None,
        table,
        flags,
        text: path[start..end].to_string(),
    })
}

/// Parse a property path relative to its parent table.
pub fn parse_relative_path(path: &str) -> Result<SourcePath, ConfigError> {
    let mut parser = Parser::new(path)?;
    let mut result = SourcePath::default();
    if parser.is_done() {
        return Err(invalid(path, "empty path"));
    }
    loop {
        match parser.peek() {
            Some(PathToken::LBracket) => result.tables.push(parser.joined()?),
            Some(PathToken::Ident(_)) => {
                let (column, _) = parser.expect_ident("column")?;
                if !parser.is_done() {
                    return Err(invalid(path, "column must be the last path element"));
                }
                result.column = Some(column);
                return Ok(result);
            }
            _ => return Err(invalid(path, "expected '[' or a column name")),
        }
        match parser.next() {
            None => return Ok(result),
            Some((PathToken::Slash, _)) if !parser.is_done() => {}
            _ => return Err(invalid(path, "expected '/' between path elements")),
        }
    }
}
