//! The row type produced by data sources.

use crate::field::Field;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Conventional timestamp column; always a [`Field`] of type Date.
pub const TIME_FIELD: &str = "_time";
/// Conventional column naming the source instance a row came from.
pub const SOURCE_FIELD: &str = "_source";

/// One row of data: named fields plus the raw message text.
///
/// Records are shared as `Arc<Record>` once a source has produced them and
/// are never mutated in place afterwards; pipeline stages that rewrite fields
/// do so through a draft that produces new records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub fields: BTreeMap<String, Field>,
    pub message: String,
}

impl Record {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            fields: BTreeMap::new(),
            message: message.into(),
        }
    }

    /// Builder-style field insertion.
    pub fn with_field(mut self, name: impl Into<String>, field: impl Into<Field>) -> Self {
        self.fields.insert(name.into(), field.into());
        self
    }

    /// Builder-style `_time` insertion.
    pub fn with_time(self, millis: i64) -> Self {
        self.with_field(TIME_FIELD, Field::date(millis))
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, field: Field) {
        self.fields.insert(name.into(), field);
    }

    /// `_time` in epoch milliseconds, if present and coercible.
    pub fn time(&self) -> Option<i64> {
        self.fields.get(TIME_FIELD).and_then(Field::as_date)
    }

    /// Display string of a column; absent columns display as empty.
    pub fn display(&self, name: &str) -> String {
        self.fields.get(name).map(Field::display).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_reads_time_field() {
        let r = Record::new("hello").with_time(1_000).with_field("host", "a");
        assert_eq!(r.time(), Some(1_000));
        assert_eq!(r.display("host"), "a");
        assert_eq!(r.display("missing"), "");
    }

    #[test]
    fn test_record_without_time() {
        assert_eq!(Record::new("x").time(), None);
    }
}
