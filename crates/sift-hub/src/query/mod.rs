//! # Query Language
//!
//! Front end for the search language: a context-sensitive lexer, a
//! recursive-descent parser producing a typed AST, and the highlight and
//! autocomplete side channels editors use.
//!
//! Syntax:
//! ```text
//! service=`api` level!=`debug` error timeout | where status>=500 | stats count() by host | sort count desc
//! ```

pub mod ast;
pub mod context;
pub mod lexer;
pub mod parser;
pub mod suggest;
pub mod token;

use crate::error::ParseError;
use ast::Query;
use context::{Highlight, ParseContext, Suggestion};
use serde::Serialize;

/// Everything one parse produces. `query` is partial when `errors` is not
/// empty: stages that failed to parse are missing from it.
#[derive(Debug, Clone, Serialize)]
pub struct ParseOutcome {
    pub query: Query,
    pub highlights: Vec<Highlight>,
    pub suggestions: Vec<Suggestion>,
    #[serde(serialize_with = "serialize_errors")]
    pub errors: Vec<ParseError>,
}

fn serialize_errors<S: serde::Serializer>(
    errors: &[ParseError],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(errors.iter().map(|e| e.to_string()))
}

impl ParseOutcome {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Enabled markers covering `cursor`.
    pub fn suggestions_at(&self, cursor: usize) -> Vec<&Suggestion> {
        context::suggestions_at(&self.suggestions, cursor)
    }

    /// The query, or every error if there was any.
    pub fn into_result(self) -> Result<Query, Vec<ParseError>> {
        if self.errors.is_empty() {
            Ok(self.query)
        } else {
            Err(self.errors)
        }
    }
}

/// Lex and parse a query string.
pub fn parse(input: &str) -> ParseOutcome {
    let lexed = lexer::tokenize(input);
    let mut ctx = ParseContext::new();
    let (query, parse_errors) = parser::Parser::new(lexed.tokens, &mut ctx).parse_query();

    let mut errors: Vec<ParseError> = lexed.errors.into_iter().map(ParseError::from).collect();
    errors.extend(parse_errors);
    errors.sort_by_key(|e| e.span.start);

    let (highlights, suggestions) = ctx.into_parts();
    ParseOutcome {
        query,
        highlights,
        suggestions,
        errors,
    }
}
