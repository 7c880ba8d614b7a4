//! # In-Memory Source
//!
//! Serves a fixed record set held in process. Used by tests and demos, and
//! configurable from `sift.toml` with inline JSON records.

use super::registry::Plugin;
use super::{
    collect_params, emit_batches, list_param, matches, parse_param, record_from_json,
    ControllerParams, ParamSpec, QueryParams, QueryProvider,
};
use crate::error::ProviderError;
use crate::query::ast::{PreFilter, SearchNode};
use parking_lot::RwLock;
use sift_core::Record;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_BATCH_SIZE: usize = 500;

pub struct MemoryProvider {
    records: RwLock<Vec<Record>>,
    batch_size: usize,
    labels: Vec<String>,
}

impl MemoryProvider {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: RwLock::new(records),
            batch_size: DEFAULT_BATCH_SIZE,
            labels: Vec::new(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Labels reported by [`QueryProvider::get_controller_params`].
    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn push(&self, record: Record) {
        self.records.write().push(record);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn from_params(params: &BTreeMap<String, String>) -> Result<Self, ProviderError> {
        let batch_size = parse_param(params, "batch_size", DEFAULT_BATCH_SIZE)?;
        let records = match params.get("records") {
            Some(raw) => {
                let values: Vec<serde_json::Value> = serde_json::from_str(raw).map_err(|e| {
                    ProviderError::InvalidParams(format!("records must be a JSON array: {}", e))
                })?;
                values
                    .iter()
                    .filter_map(|v| record_from_json(v, "_time", "message"))
                    .collect()
            }
            None => Vec::new(),
        };
        Ok(Self {
            records: RwLock::new(records),
            batch_size: batch_size.max(1),
            labels: list_param(params, "labels"),
        })
    }
}

#[async_trait::async_trait]
impl QueryProvider for MemoryProvider {
    async fn get_controller_params(&self) -> Result<ControllerParams, ProviderError> {
        Ok(collect_params(self.records.read().iter(), &self.labels))
    }

    async fn query(
        &self,
        pre_filters: &[PreFilter],
        search: Option<&SearchNode>,
        params: QueryParams,
    ) -> Result<(), ProviderError> {
        let selected: Vec<Record> = self
            .records
            .read()
            .iter()
            .filter(|r| r.time().map_or(false, |t| params.in_range(t)))
            .filter(|r| matches(r, pre_filters, search))
            .cloned()
            .collect();
        tracing::debug!(rows = selected.len(), "memory source matched");
        emit_batches(selected, self.batch_size, &params).await;
        Ok(())
    }
}

pub fn plugin() -> Plugin {
    Plugin::new(
        "memory",
        "In-process record set",
        vec![
            ParamSpec::optional(
                "records",
                "JSON array of objects with `_time` and `message` keys",
                "[]",
            ),
            ParamSpec::optional(
                "batch_size",
                "Rows per reported batch",
                &DEFAULT_BATCH_SIZE.to_string(),
            ),
            ParamSpec::optional("labels", "Comma-separated filterable labels", ""),
        ],
        |params| Ok(Arc::new(MemoryProvider::from_params(params)?) as Arc<dyn QueryProvider>),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::PreFilterOp;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    fn provider() -> MemoryProvider {
        let rows = (0..10)
            .map(|i| {
                Record::new(format!("request {}", i))
                    .with_time(i * 1_000)
                    .with_field("level", if i % 2 == 0 { "info" } else { "error" })
            })
            .collect();
        MemoryProvider::new(rows)
            .with_batch_size(2)
            .with_labels(&["level"])
    }

    fn params(limit: usize, sink: Arc<Mutex<Vec<Vec<i64>>>>) -> QueryParams {
        QueryParams {
            from_time: 2_000,
            to_time: 9_000,
            limit,
            cancel: CancellationToken::new(),
            on_batch: Arc::new(move |batch: Vec<Record>| {
                sink.lock().push(batch.iter().filter_map(Record::time).collect());
            }),
        }
    }

    #[tokio::test]
    async fn test_query_filters_range_and_pre_filters() {
        let seen: Arc<Mutex<Vec<Vec<i64>>>> = Arc::default();
        let filters = [PreFilter::new("level", PreFilterOp::Eq, "error")];
        provider()
            .query(&filters, None, params(100, Arc::clone(&seen)))
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec![vec![7_000, 5_000], vec![3_000]]);
    }

    #[tokio::test]
    async fn test_query_honours_limit_and_search() {
        let seen: Arc<Mutex<Vec<Vec<i64>>>> = Arc::default();
        let search = SearchNode::or(SearchNode::term("request 4"), SearchNode::term("REQUEST 8"));
        provider()
            .query(&[], Some(&search), params(1, Arc::clone(&seen)))
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec![vec![8_000]]);
    }

    #[tokio::test]
    async fn test_controller_params() {
        let params = provider().get_controller_params().await.unwrap();
        assert_eq!(params["level"], vec!["error", "info"]);
    }

    #[tokio::test]
    async fn test_plugin_builds_from_inline_records() {
        let mut params = BTreeMap::new();
        params.insert(
            "records".to_string(),
            r#"[{"_time": 5, "message": "a"}, {"message": "no time"}]"#.to_string(),
        );
        let provider = MemoryProvider::from_params(&params).unwrap();
        assert_eq!(provider.len(), 1);

        params.insert("records".to_string(), "{".to_string());
        assert!(MemoryProvider::from_params(&params).is_err());
    }
}
