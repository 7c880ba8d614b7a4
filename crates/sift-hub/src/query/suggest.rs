//! Turns autocomplete markers into concrete completions.

use super::ast::{AggFunc, Function};
use super::context::{suggestions_at, Suggestion, SuggestionKind};
use super::token::Command;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Names the editor may complete that the grammar does not know about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionCatalog {
    /// Column names seen in results so far.
    pub columns: Vec<String>,
    /// Pre-filter keys with their known values.
    pub params: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    Command,
    Param,
    ParamValue,
    Column,
    Aggregation,
    Function,
    Keyword,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub kind: CompletionKind,
}

/// The word ending at `cursor`, used to filter completions.
fn prefix_at(input: &str, cursor: usize) -> &str {
    let mut cursor = cursor.min(input.len());
    while !input.is_char_boundary(cursor) {
        cursor -= 1;
    }
    let head = &input[..cursor];
    let start = head
        .rfind(|c: char| c.is_whitespace() || "|(),=`\"[]!<>+-*/&".contains(c))
        .map_or(0, |i| i + 1);
    &head[start..]
}

/// Completions for the markers covering `cursor`, filtered by the word
/// being typed. Order follows the markers; duplicates are dropped.
pub fn complete(
    input: &str,
    markers: &[Suggestion],
    cursor: usize,
    catalog: &CompletionCatalog,
) -> Vec<Completion> {
    let prefix = prefix_at(input, cursor).to_lowercase();
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    let mut push = |text: &str, kind: CompletionKind| {
        if text.to_lowercase().starts_with(&prefix) && seen.insert((text.to_string(), kind)) {
            out.push(Completion {
                text: text.to_string(),
                kind,
            });
        }
    };

    for marker in suggestions_at(markers, cursor) {
        match &marker.kind {
            SuggestionKind::Commands => Command::ALL
                .iter()
                .for_each(|c| push(c.as_str(), CompletionKind::Command)),
            SuggestionKind::Params => catalog
                .params
                .keys()
                .for_each(|k| push(k, CompletionKind::Param)),
            SuggestionKind::ParamValues { key } => {
                if let Some(values) = catalog.params.get(key) {
                    values
                        .iter()
                        .for_each(|v| push(v, CompletionKind::ParamValue));
                }
            }
            SuggestionKind::Columns => catalog
                .columns
                .iter()
                .for_each(|c| push(c, CompletionKind::Column)),
            SuggestionKind::AggregationFunctions => AggFunc::ALL
                .iter()
                .for_each(|f| push(f.as_str(), CompletionKind::Aggregation)),
            SuggestionKind::Functions => Function::ALL
                .iter()
                .for_each(|f| push(f.as_str(), CompletionKind::Function)),
            SuggestionKind::Keywords { keywords } => keywords
                .iter()
                .for_each(|k| push(k, CompletionKind::Keyword)),
        }
    }
    out
}
