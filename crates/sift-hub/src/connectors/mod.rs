//! # Source Connector Framework
//!
//! Every data source a query can read from implements [`QueryProvider`].
//! Providers are created by [`registry::Plugin`]s from string parameters and
//! registered as named instances in the [`registry::SourceRegistry`].
//!
//! A provider receives the query's pre-filters and search tree, a time range
//! and a row limit, and reports rows through a callback in batches sorted by
//! descending `_time`. It settles exactly once and stops promptly when the
//! cancellation token fires.

pub mod jsonl;
pub mod memory;
pub mod registry;

use crate::error::ProviderError;
use crate::query::ast::{PreFilter, SearchLiteral, SearchNode};
use serde::{Deserialize, Serialize};
use sift_core::{Field, Record, TIME_FIELD};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Filterable label → allowed values.
pub type ControllerParams = BTreeMap<String, Vec<String>>;

/// Receives one time-sorted batch of rows.
pub type BatchCallback = Arc<dyn Fn(Vec<Record>) + Send + Sync>;

/// Per-fetch parameters handed to [`QueryProvider::query`].
#[derive(Clone)]
pub struct QueryParams {
    /// Inclusive lower bound, epoch milliseconds.
    pub from_time: i64,
    /// Exclusive upper bound, epoch milliseconds.
    pub to_time: i64,
    /// Maximum number of rows to report, most recent first.
    pub limit: usize,
    pub cancel: CancellationToken,
    pub on_batch: BatchCallback,
}

impl QueryParams {
    pub fn in_range(&self, millis: i64) -> bool {
        millis >= self.from_time && millis < self.to_time
    }
}

impl fmt::Debug for QueryParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryParams")
            .field("from_time", &self.from_time)
            .field("to_time", &self.to_time)
            .field("limit", &self.limit)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// The capability every data source adapter implements.
#[async_trait::async_trait]
pub trait QueryProvider: Send + Sync {
    /// Enumerate filterable labels and their allowed values.
    async fn get_controller_params(&self) -> Result<ControllerParams, ProviderError>;

    /// Run a fetch, reporting rows through `params.on_batch`.
    async fn query(
        &self,
        pre_filters: &[PreFilter],
        search: Option<&SearchNode>,
        params: QueryParams,
    ) -> Result<(), ProviderError>;
}

/// Describes one parameter a plugin accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
}

impl ParamSpec {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, description: &str, default: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: false,
            default: Some(default.to_string()),
        }
    }
}

// =============================================================================
// Shared matching
// =============================================================================

/// Whether `record` passes every pre-filter and the search tree.
pub fn matches(record: &Record, pre_filters: &[PreFilter], search: Option<&SearchNode>) -> bool {
    pre_filters
        .iter()
        .all(|filter| filter.accepts(&record.display(&filter.key)))
        && search.map_or(true, |node| node.matches(&|lit| literal_matches(record, lit)))
}

/// A literal matches when the message or any field's display string
/// contains it, ignoring case.
fn literal_matches(record: &Record, literal: &SearchLiteral) -> bool {
    let needle = literal.text().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    record.message.to_lowercase().contains(&needle)
        || record
            .fields
            .values()
            .any(|field| field.display().to_lowercase().contains(&needle))
}

/// Distinct display values of `labels` across `records`, sorted.
pub fn collect_params<'a>(
    records: impl IntoIterator<Item = &'a Record>,
    labels: &[String],
) -> ControllerParams {
    let mut values: BTreeMap<String, BTreeSet<String>> = labels
        .iter()
        .map(|label| (label.clone(), BTreeSet::new()))
        .collect();
    for record in records {
        for (label, seen) in values.iter_mut() {
            if let Some(field) = record.get(label).filter(|f| !f.is_null()) {
                seen.insert(field.display());
            }
        }
    }
    values
        .into_iter()
        .map(|(label, seen)| (label, seen.into_iter().collect()))
        .collect()
}

/// Build a record from a JSON object. The time field becomes `_time`; rows
/// without a usable timestamp are skipped.
pub fn record_from_json(
    value: &serde_json::Value,
    time_field: &str,
    message_field: &str,
) -> Option<Record> {
    let object = value.as_object()?;
    let time = object
        .get(time_field)
        .map(Field::from_json)
        .and_then(|f| f.as_date())?;

    let message = match object.get(message_field) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let mut record = Record::new(message);
    for (key, value) in object {
        if key == time_field || key == message_field {
            continue;
        }
        record.set(key.clone(), Field::from_json(value));
    }
    record.set(TIME_FIELD, Field::date(time));
    Some(record)
}

/// Sort by descending `_time`, keep the `limit` most recent rows and report
/// them in batches of `batch_size`, yielding between batches. Stops early
/// when cancelled.
pub async fn emit_batches(mut rows: Vec<Record>, batch_size: usize, params: &QueryParams) {
    rows.sort_by(|a, b| b.time().cmp(&a.time()));
    rows.truncate(params.limit);

    let batch_size = batch_size.max(1);
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        if params.cancel.is_cancelled() {
            return;
        }
        let batch: Vec<Record> = rows.by_ref().take(batch_size).collect();
        (params.on_batch)(batch);
        tokio::task::yield_now().await;
    }
}

/// Parse an optional numeric plugin parameter.
pub(crate) fn parse_param<T: std::str::FromStr>(
    params: &BTreeMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ProviderError> {
    match params.get(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ProviderError::InvalidParams(format!("{} must be a number, got '{}'", name, raw))
        }),
        None => Ok(default),
    }
}

/// Split a comma-separated list parameter.
pub(crate) fn list_param(params: &BTreeMap<String, String>, name: &str) -> Vec<String> {
    params
        .get(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::PreFilterOp;
    use parking_lot::Mutex;

    fn record() -> Record {
        Record::new("GET /api timed out")
            .with_time(1_000)
            .with_field("level", "error")
            .with_field("host", "web-1")
    }

    #[test]
    fn test_search_matches_message_or_fields_ignoring_case() {
        let r = record();
        assert!(matches(&r, &[], Some(&SearchNode::term("TIMED"))));
        assert!(matches(&r, &[], Some(&SearchNode::term("web-1"))));
        assert!(!matches(&r, &[], Some(&SearchNode::term("refused"))));
        let tree = SearchNode::or(SearchNode::term("refused"), SearchNode::phrase("/api"));
        assert!(matches(&r, &[], Some(&tree)));
        assert!(matches(&r, &[], None));
    }

    #[test]
    fn test_pre_filters_compare_display_strings() {
        let r = record();
        let eq = PreFilter::new("level", PreFilterOp::Eq, "error");
        let ne = PreFilter::new("host", PreFilterOp::NotEq, "web-1");
        assert!(matches(&r, &[eq.clone()], None));
        assert!(!matches(&r, &[eq, ne], None));
        let absent = PreFilter::new("region", PreFilterOp::NotEq, "eu");
        assert!(matches(&r, &[absent], None));
    }

    #[test]
    fn test_record_from_json() {
        let value = serde_json::json!({
            "ts": "2024-01-01T00:00:00Z",
            "msg": "hello",
            "status": 503,
        });
        let r = record_from_json(&value, "ts", "msg").expect("has time");
        assert_eq!(r.message, "hello");
        assert_eq!(r.time(), Some(1_704_067_200_000));
        assert_eq!(r.get("status"), Some(&Field::number(503.0)));
        assert!(r.get("ts").is_none());

        assert!(record_from_json(&serde_json::json!({"msg": "x"}), "ts", "msg").is_none());
        assert!(record_from_json(&serde_json::json!([1, 2]), "ts", "msg").is_none());
    }

    #[test]
    fn test_collect_params_lists_distinct_values() {
        let rows = vec![
            record(),
            record().with_field("level", "warn"),
            record().with_field("host", Field::null()),
        ];
        let params = collect_params(&rows, &["level".into(), "host".into()]);
        assert_eq!(params["level"], vec!["error", "warn"]);
        assert_eq!(params["host"], vec!["web-1"]);
    }

    #[tokio::test]
    async fn test_emit_batches_sorts_limits_and_chunks() {
        let seen: Arc<Mutex<Vec<Vec<i64>>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let params = QueryParams {
            from_time: 0,
            to_time: 100,
            limit: 4,
            cancel: CancellationToken::new(),
            on_batch: Arc::new(move |batch: Vec<Record>| {
                sink.lock()
                    .push(batch.iter().filter_map(Record::time).collect());
            }),
        };
        let rows = [3, 9, 1, 7, 5].iter().map(|t| Record::new("").with_time(*t)).collect();
        emit_batches(rows, 3, &params).await;
        assert_eq!(*seen.lock(), vec![vec![9, 7, 5], vec![3]]);
    }

    #[test]
    fn test_parse_param() {
        let mut params = BTreeMap::new();
        params.insert("batch_size".to_string(), "25".to_string());
        assert_eq!(parse_param(&params, "batch_size", 10usize).unwrap(), 25);
        assert_eq!(parse_param(&params, "other", 10usize).unwrap(), 10);
        params.insert("batch_size".to_string(), "many".to_string());
        assert!(matches!(
            parse_param(&params, "batch_size", 10usize),
            Err(ProviderError::InvalidParams(_))
        ));
    }
}
