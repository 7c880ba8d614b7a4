//! Context-sensitive tokenizer.
//!
//! Search text is unstructured, so the lexer must not reserve words there.
//! Most tokens are unconditional; keywords and operators are recognised only
//! inside the command segment that declares them. The *current segment* is
//! the run of tokens emitted since the last pipe, and its first token names
//! the command:
//!
//! ```text
//! error by host | stats count() by host | sort count desc
//! ^^^^^^^^^^^^^   ^^^^^^^^^^^^^^^^^^^^^   ^^^^^^^^^^^^^^^
//! search: `by` is  stats: `by` is a       sort: `desc` is a
//! a search term    keyword                keyword
//! ```
//!
//! Operators (`+ - * / > >= < <= == && || ! [ ]`, `in`) only exist inside
//! `where` and `eval` segments; elsewhere those characters are part of an
//! identifier or search term. A keyword only matches a whole word, so
//! `tablefoo` or `byte` never split into a keyword plus a remainder.

use super::token::{Command, Keyword, Span, Token, TokenKind};
use crate::error::LexError;

/// Result of tokenizing: the tokens (always terminated by `Eof`) and every
/// error encountered along the way.
#[derive(Debug, Clone)]
pub struct LexOutput {
    pub tokens: Vec<Token>,
    pub errors: Vec<LexError>,
}

/// Tokenize a query string.
pub fn tokenize(input: &str) -> LexOutput {
    Lexer::new(input).run()
}

/// Which grammar the current pipe-delimited segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    /// Before the first pipe.
    Search,
    /// Right after a pipe, before the command word.
    AwaitingCommand,
    Command(Command),
    /// After a pipe whose first word is not a command.
    Unknown,
}

impl Segment {
    fn has_operators(self) -> bool {
        matches!(self, Segment::Command(c) if c.has_expressions())
    }

    fn keyword(self, word: &str) -> Option<Keyword> {
        let keyword = match (self, word) {
            (Segment::Search, "AND") => Keyword::SearchAnd,
            (Segment::Search, "OR") => Keyword::SearchOr,
            (Segment::Command(Command::Stats | Command::TimeChart), "by") => Keyword::By,
            (
                Segment::Command(Command::Stats | Command::TimeChart | Command::Table),
                "as",
            ) => Keyword::As,
            (Segment::Command(Command::Sort), "asc") => Keyword::Asc,
            (Segment::Command(Command::Sort), "desc") => Keyword::Desc,
            (Segment::Command(Command::Regex), "field") => Keyword::Field,
            (Segment::Command(Command::TimeChart), "span") => Keyword::Span,
            (Segment::Command(Command::TimeChart), "timeCol") => Keyword::TimeCol,
            (Segment::Command(Command::TimeChart), "maxGroups") => Keyword::MaxGroups,
            (Segment::Command(Command::Where | Command::Eval), "in") => Keyword::In,
            (Segment::Command(Command::Where | Command::Eval), "true") => Keyword::True,
            (Segment::Command(Command::Where | Command::Eval), "false") => Keyword::False,
            (Segment::Command(Command::Where | Command::Eval), "null") => Keyword::Null,
            _ => return None,
        };
        Some(keyword)
    }
}

fn command_for(word: &str) -> Option<Command> {
    Command::ALL.into_iter().find(|c| c.as_str() == word)
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    tokens: Vec<Token>,
    errors: Vec<LexError>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn run(mut self) -> LexOutput {
        while self.pos < self.input.len() {
            self.scan_token();
        }
        let end = self.input.len();
        self.tokens
            .push(Token::new(TokenKind::Eof, Span::new(end, end), ""));
        LexOutput {
            tokens: self.tokens,
            errors: self.errors,
        }
    }

    // ========== Helpers ==========

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(n)
    }

    fn previous_char(&self) -> Option<char> {
        self.input[..self.pos].chars().next_back()
    }

    fn segment(&self) -> Segment {
        let Some(pipe) = self
            .tokens
            .iter()
            .rposition(|t| t.kind == TokenKind::Pipe)
        else {
            return Segment::Search;
        };
        match self.tokens.get(pipe + 1).map(|t| &t.kind) {
            None => Segment::AwaitingCommand,
            Some(TokenKind::Command(c)) => Segment::Command(*c),
            Some(_) => Segment::Unknown,
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        let span = Span::new(start, self.pos);
        let text = &self.input[start..self.pos];
        self.tokens.push(Token::new(kind, span, text));
    }

    fn emit_fixed(&mut self, kind: TokenKind, len: usize) {
        let start = self.pos;
        self.pos += len;
        self.push(kind, start);
    }

    fn error(&mut self, message: impl Into<String>, start: usize) {
        self.errors
            .push(LexError::new(message, Span::new(start, self.pos)));
    }

    /// Whether `c` may continue an identifier in `segment`.
    fn is_word_char(&self, c: char, next: Option<char>, segment: Segment) -> bool {
        if c.is_whitespace() || matches!(c, '|' | '(' | ')' | '"' | '`' | '=') {
            return false;
        }
        if c == '!' && next == Some('=') {
            return false;
        }
        if c == ',' && segment != Segment::Search {
            return false;
        }
        if segment.has_operators()
            && matches!(c, '+' | '-' | '*' | '/' | '>' | '<' | '&' | '!' | '[' | ']')
        {
            return false;
        }
        true
    }

    // ========== Scanning ==========

    fn scan_token(&mut self) {
        let Some(c) = self.peek() else {
            return;
        };
        let next = self.peek_nth(1);
        let segment = self.segment();
        let operators = segment.has_operators();

        match c {
            c if c.is_whitespace() => {
                self.pos += c.len_utf8();
            }

            '/' if next == Some('/')
                && self.previous_char().map_or(true, char::is_whitespace) =>
            {
                self.skip_line_comment();
            }

            '|' if operators && next == Some('|') => self.emit_fixed(TokenKind::OrOr, 2),
            '|' => self.emit_fixed(TokenKind::Pipe, 1),
            '(' => self.emit_fixed(TokenKind::LParen, 1),
            ')' => self.emit_fixed(TokenKind::RParen, 1),
            ',' if segment != Segment::Search => self.emit_fixed(TokenKind::Comma, 1),
            '!' if next == Some('=') => self.emit_fixed(TokenKind::NotEqual, 2),
            '=' if operators && next == Some('=') => {
                self.emit_fixed(TokenKind::DoubleEqual, 2)
            }
            '=' => self.emit_fixed(TokenKind::Equal, 1),
            '"' => self.scan_string(),
            '`' => self.scan_backtick(),

            '>' if operators && next == Some('=') => {
                self.emit_fixed(TokenKind::GreaterEqual, 2)
            }
            '>' if operators => self.emit_fixed(TokenKind::Greater, 1),
            '<' if operators && next == Some('=') => self.emit_fixed(TokenKind::LessEqual, 2),
            '<' if operators => self.emit_fixed(TokenKind::Less, 1),
            '+' if operators => self.emit_fixed(TokenKind::Plus, 1),
            '-' if operators => self.emit_fixed(TokenKind::Minus, 1),
            '*' if operators => self.emit_fixed(TokenKind::Star, 1),
            '/' if operators => self.emit_fixed(TokenKind::Slash, 1),
            '&' if operators && next == Some('&') => self.emit_fixed(TokenKind::AndAnd, 2),
            '!' if operators => self.emit_fixed(TokenKind::Bang, 1),
            '[' if operators => self.emit_fixed(TokenKind::LBracket, 1),
            ']' if operators => self.emit_fixed(TokenKind::RBracket, 1),
            '&' if operators => {
                let start = self.pos;
                self.pos += 1;
                self.error("unexpected character '&' (did you mean '&&'?)", start);
            }

            _ => self.scan_word(segment),
        }
    }

    fn skip_line_comment(&mut self) {
        match self.input[self.pos..].find('\n') {
            Some(offset) => self.pos += offset + 1,
            None => self.pos = self.input.len(),
        }
    }

    fn scan_string(&mut self) {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();

        while let Some(c) = self.peek() {
            self.pos += c.len_utf8();
            match c {
                '"' => {
                    self.push(TokenKind::String(value), start);
                    return;
                }
                '\\' => {
                    let Some(escaped) = self.peek() else {
                        break;
                    };
                    self.pos += escaped.len_utf8();
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        '"' => value.push('"'),
                        '\\' => value.push('\\'),
                        other => {
                            value.push('\\');
                            value.push(other);
                        }
                    }
                }
                other => value.push(other),
            }
        }

        self.error("unterminated string literal", start);
    }

    fn scan_backtick(&mut self) {
        let start = self.pos;
        match self.input[start + 1..].find('`') {
            Some(offset) => {
                let value = self.input[start + 1..start + 1 + offset].to_string();
                self.pos = start + offset + 2;
                self.push(TokenKind::Backtick(value), start);
            }
            None => {
                self.pos = self.input.len();
                self.error("unterminated backtick literal", start);
            }
        }
    }

    /// Identifiers, numbers, commands and keywords. The maximal word is read
    /// first so keywords and numbers only match when they span all of it.
    fn scan_word(&mut self, segment: Segment) {
        let start = self.pos;
        let mut chars = self.input[start..].char_indices().peekable();
        let mut end = self.input.len();
        while let Some((offset, c)) = chars.next() {
            let next = chars.peek().map(|(_, n)| *n);
            if !self.is_word_char(c, next, segment) {
                end = start + offset;
                break;
            }
        }

        if end == start {
            // Not reachable for well-formed dispatch; consume one char so the
            // lexer always makes progress.
            let c = self.peek().unwrap_or(' ');
            self.pos += c.len_utf8();
            self.error(format!("unexpected character '{}'", c), start);
            return;
        }

        self.pos = end;
        let word = &self.input[start..end];

        let kind = if segment == Segment::AwaitingCommand {
            match command_for(word) {
                Some(command) => TokenKind::Command(command),
                None => TokenKind::Identifier(word.to_string()),
            }
        } else if let Some(keyword) = segment.keyword(word) {
            TokenKind::Keyword(keyword)
        } else if is_number(word) {
            TokenKind::Number(word.parse().unwrap_or(f64::NAN))
        } else {
            TokenKind::Identifier(word.to_string())
        };
        self.push(kind, start);
    }
}

/// `\d+(\.\d+)?` spanning the whole word.
fn is_number(word: &str) -> bool {
    let (int, frac) = match word.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (word, None),
    };
    !int.is_empty()
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.map_or(true, |f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()))
}
