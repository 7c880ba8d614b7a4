//! Token set of the query language.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte range in the query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Pipeline commands. Only lexed as such right after a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Table,
    Stats,
    Regex,
    Sort,
    Where,
    TimeChart,
    Eval,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::Table,
        Command::Stats,
        Command::Regex,
        Command::Sort,
        Command::Where,
        Command::TimeChart,
        Command::Eval,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Table => "table",
            Command::Stats => "stats",
            Command::Regex => "regex",
            Command::Sort => "sort",
            Command::Where => "where",
            Command::TimeChart => "timechart",
            Command::Eval => "eval",
        }
    }

    /// Commands whose segments lex operator tokens.
    pub fn has_expressions(self) -> bool {
        matches!(self, Command::Where | Command::Eval)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keywords that only exist inside the segment of the command declaring them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Keyword {
    /// `AND` in the search segment.
    SearchAnd,
    /// `OR` in the search segment.
    SearchOr,
    By,
    As,
    Asc,
    Desc,
    Field,
    Span,
    TimeCol,
    MaxGroups,
    In,
    True,
    False,
    Null,
}

impl Keyword {
    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::SearchAnd => "AND",
            Keyword::SearchOr => "OR",
            Keyword::By => "by",
            Keyword::As => "as",
            Keyword::Asc => "asc",
            Keyword::Desc => "desc",
            Keyword::Field => "field",
            Keyword::Span => "span",
            Keyword::TimeCol => "timeCol",
            Keyword::MaxGroups => "maxGroups",
            Keyword::In => "in",
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::Null => "null",
        }
    }
}

/// Token classification.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Identifier(String),
    Number(f64),
    String(String),
    /// `` `...` ``: pre-filter values and regex patterns.
    Backtick(String),

    // Structure
    Pipe,
    LParen,
    RParen,
    Comma,
    Equal,
    NotEqual,

    // Context-sensitive
    Command(Command),
    Keyword(Keyword),

    // Operators, only inside where / eval
    DoubleEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Plus,
    Minus,
    Star,
    Slash,
    AndAnd,
    OrOr,
    Bang,
    LBracket,
    RBracket,

    Eof,
}

impl TokenKind {
    /// Short human description for error messages.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Identifier(s) => format!("identifier '{}'", s),
            TokenKind::Number(n) => format!("number {}", n),
            TokenKind::String(s) => format!("string \"{}\"", s),
            TokenKind::Backtick(s) => format!("`{}`", s),
            TokenKind::Command(c) => format!("command '{}'", c),
            TokenKind::Keyword(k) => format!("keyword '{}'", k.as_str()),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::Pipe => "|",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::Comma => ",",
            TokenKind::Equal => "=",
            TokenKind::NotEqual => "!=",
            TokenKind::DoubleEqual => "==",
            TokenKind::Greater => ">",
            TokenKind::GreaterEqual => ">=",
            TokenKind::Less => "<",
            TokenKind::LessEqual => "<=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Bang => "!",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            _ => "?",
        }
    }
}

/// A token with its source location and raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span, text: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            text: text.into(),
        }
    }

    pub fn is_keyword(&self, keyword: Keyword) -> bool {
        self.kind == TokenKind::Keyword(keyword)
    }
}
