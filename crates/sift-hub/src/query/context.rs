//! Side channels filled in while parsing.
//!
//! The parser does not build a concrete syntax tree; instead its productions
//! record highlight spans and autocomplete markers into a [`ParseContext`]
//! as they consume tokens. Editors read both back from the parse outcome.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightKind {
    Keyword,
    Command,
    Column,
    Function,
    Operator,
    String,
    Number,
    Regex,
    ParamKey,
    ParamValue,
    Boolean,
}

/// A classified byte range of the query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub kind: HighlightKind,
    pub start: usize,
    pub end: usize,
}

/// What an autocomplete marker offers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuggestionKind {
    Commands,
    Params,
    ParamValues { key: String },
    Columns,
    AggregationFunctions,
    Functions,
    Keywords { keywords: Vec<String> },
}

impl SuggestionKind {
    pub fn keywords(words: &[&str]) -> Self {
        SuggestionKind::Keywords {
            keywords: words.iter().map(|w| w.to_string()).collect(),
        }
    }
}

/// An autocomplete marker covering `[from, to)`. An open marker (`to` is
/// `None`) extends to the end of input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub from: usize,
    pub to: Option<usize>,
    pub disabled: bool,
}

impl Suggestion {
    pub fn covers(&self, cursor: usize) -> bool {
        !self.disabled && self.from <= cursor && self.to.map_or(true, |to| cursor < to)
    }
}

/// Handle to a marker opened through [`ParseContext::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerId(usize);

/// Accumulates highlights and markers during one parse.
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    highlights: Vec<Highlight>,
    suggestions: Vec<Suggestion>,
}

impl ParseContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn highlight(&mut self, kind: HighlightKind, start: usize, end: usize) {
        if start < end {
            self.highlights.push(Highlight { kind, start, end });
        }
    }

    pub fn open(&mut self, kind: SuggestionKind, from: usize) -> MarkerId {
        self.suggestions.push(Suggestion {
            kind,
            from,
            to: None,
            disabled: false,
        });
        MarkerId(self.suggestions.len() - 1)
    }

    /// Set the end of a marker. `None` leaves it open.
    pub fn close(&mut self, id: MarkerId, to: Option<usize>) {
        if let Some(marker) = self.suggestions.get_mut(id.0) {
            marker.to = to;
        }
    }

    pub fn disable(&mut self, id: MarkerId) {
        if let Some(marker) = self.suggestions.get_mut(id.0) {
            marker.disabled = true;
        }
    }

    pub fn enable(&mut self, id: MarkerId) {
        if let Some(marker) = self.suggestions.get_mut(id.0) {
            marker.disabled = false;
        }
    }

    /// Move the start of a marker.
    pub fn reset(&mut self, id: MarkerId, from: usize) {
        if let Some(marker) = self.suggestions.get_mut(id.0) {
            marker.from = from;
        }
    }

    pub fn highlights(&self) -> &[Highlight] {
        &self.highlights
    }

    pub fn suggestions(&self) -> &[Suggestion] {
        &self.suggestions
    }

    /// Enabled markers covering `cursor`.
    pub fn suggestions_at(&self, cursor: usize) -> Vec<&Suggestion> {
        suggestions_at(&self.suggestions, cursor)
    }

    pub fn into_parts(mut self) -> (Vec<Highlight>, Vec<Suggestion>) {
        self.highlights.sort_by_key(|h| (h.start, h.end));
        (self.highlights, self.suggestions)
    }
}

/// Enabled markers in `markers` covering `cursor`.
pub fn suggestions_at(markers: &[Suggestion], cursor: usize) -> Vec<&Suggestion> {
    markers.iter().filter(|m| m.covers(cursor)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_range_is_half_open() {
        let mut ctx = ParseContext::new();
        let id = ctx.open(SuggestionKind::Columns, 3);
        ctx.close(id, Some(8));
        assert!(ctx.suggestions_at(2).is_empty());
        assert_eq!(ctx.suggestions_at(3).len(), 1);
        assert_eq!(ctx.suggestions_at(7).len(), 1);
        assert!(ctx.suggestions_at(8).is_empty());
    }

    #[test]
    fn test_open_marker_reaches_end_of_input() {
        let mut ctx = ParseContext::new();
        ctx.open(SuggestionKind::Commands, 1);
        assert_eq!(ctx.suggestions_at(1_000).len(), 1);
    }

    #[test]
    fn test_disabled_marker_is_skipped_until_enabled() {
        let mut ctx = ParseContext::new();
        let id = ctx.open(SuggestionKind::keywords(&["by"]), 0);
        ctx.disable(id);
        assert!(ctx.suggestions_at(5).is_empty());
        ctx.enable(id);
        ctx.reset(id, 6);
        assert!(ctx.suggestions_at(5).is_empty());
        assert_eq!(ctx.suggestions_at(6).len(), 1);
    }

    #[test]
    fn test_empty_highlights_are_dropped() {
        let mut ctx = ParseContext::new();
        ctx.highlight(HighlightKind::Number, 4, 4);
        ctx.highlight(HighlightKind::Column, 0, 3);
        assert_eq!(ctx.highlights().len(), 1);
    }
}
