//! Error types for the query engine.
//!
//! One error type per concern, all built with `thiserror`:
//!
//! - [`LexError`] / [`ParseError`]: the query text is malformed. Collected by
//!   the front end, surfaced directly to the caller of `run_query`.
//! - [`StageError`]: a pipeline stage got data it cannot process. Aborts that
//!   pipeline run only.
//! - [`ProviderError`]: a data source failed to fetch. Marks that source's
//!   sub-task failed.
//! - [`CacheError`]: misuse of the cache API. These are invariant violations.
//! - [`ConfigError`]: the configuration file could not be read.
//!
//! [`EngineError`] wraps all of them at the orchestration boundary.

use crate::query::token::Span;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Identifier of a query task.
pub type TaskId = String;

/// Unrecognised character sequence or unterminated literal.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("lex error at {}: {message}", span.start)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

impl LexError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Grammar violation. `expected` lists what the parser would have accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
    pub expected: Vec<String>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            expected: Vec::new(),
        }
    }

    pub fn expected(mut self, expected: impl Into<String>) -> Self {
        self.expected.push(expected.into());
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parse error at {}: {}", self.span.start, self.message)?;
        if !self.expected.is_empty() {
            write!(f, " (expected: {})", self.expected.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        Self::new(err.message, err.span)
    }
}

/// A pipeline stage could not process its input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("{stage}: column '{column}' holds non-numeric value '{value}'")]
    NonNumeric {
        stage: &'static str,
        column: String,
        value: String,
    },

    #[error("{stage}: invalid regex: {message}")]
    InvalidRegex { stage: &'static str, message: String },

    #[error("{stage}: {message}")]
    Invalid { stage: &'static str, message: String },
}

impl StageError {
    pub fn invalid(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            stage,
            message: message.into(),
        }
    }
}

/// A data source failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("invalid source parameters: {0}")]
    InvalidParams(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Cache API misuse. Callers must check before adding or referencing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("cache key {0} already exists")]
    DuplicateKey(String),

    #[error("cache key {0} does not exist")]
    MissingKey(String),
}

/// Configuration loading failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors surfaced by the orchestration engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{}", describe_parse_errors(.0))]
    Parse(Vec<ParseError>),

    #[error("unknown search profile '{0}'")]
    UnknownProfile(String),

    #[error("unknown source instance '{0}'")]
    UnknownInstance(String),

    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),

    #[error("query selects no source instances")]
    NoInstances,

    #[error("invalid time range: from {from} is not before to {to}")]
    InvalidRange { from: i64, to: i64 },

    #[error("task '{0}' not found")]
    TaskNotFound(TaskId),

    #[error("task '{0}' has no table view")]
    NoTableView(TaskId),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn describe_parse_errors(errors: &[ParseError]) -> String {
    match errors.first() {
        Some(first) if errors.len() > 1 => {
            format!("{} (and {} more)", first, errors.len() - 1)
        }
        Some(first) => first.to_string(),
        None => "parse error".to_string(),
    }
}

/// Standard result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_lists_expected() {
        let err = ParseError::new("unexpected token", Span::new(4, 5))
            .expected("column")
            .expected("')'");
        assert_eq!(
            err.to_string(),
            "parse error at 4: unexpected token (expected: column, ')')"
        );
    }

    #[test]
    fn test_engine_parse_error_mentions_extra_count() {
        let errors = vec![
            ParseError::new("first", Span::new(0, 1)),
            ParseError::new("second", Span::new(2, 3)),
        ];
        let err = EngineError::Parse(errors);
        assert_eq!(err.to_string(), "parse error at 0: first (and 1 more)");
    }

    #[test]
    fn test_stage_error_display() {
        let err = StageError::NonNumeric {
            stage: "stats",
            column: "latency".into(),
            value: "slow".into(),
        };
        assert_eq!(
            err.to_string(),
            "stats: column 'latency' holds non-numeric value 'slow'"
        );
    }
}
