//! # JSON-Lines File Source
//!
//! Reads a file holding one JSON object per line. Each object becomes a
//! record: `time_field` becomes `_time`, `message_field` the message, and
//! every other key a field. Lines that are blank, malformed or lack a
//! timestamp are skipped.

use super::registry::Plugin;
use super::{
    collect_params, emit_batches, list_param, matches, parse_param, record_from_json,
    ControllerParams, ParamSpec, QueryParams, QueryProvider,
};
use crate::error::ProviderError;
use crate::query::ast::{PreFilter, SearchNode};
use sift_core::Record;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

pub const DEFAULT_TIME_FIELD: &str = "timestamp";
pub const DEFAULT_MESSAGE_FIELD: &str = "message";
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Lines read between cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 4096;

pub struct JsonlProvider {
    path: PathBuf,
    time_field: String,
    message_field: String,
    batch_size: usize,
    labels: Vec<String>,
}

impl JsonlProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            time_field: DEFAULT_TIME_FIELD.to_string(),
            message_field: DEFAULT_MESSAGE_FIELD.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            labels: Vec::new(),
        }
    }

    pub fn with_fields(mut self, time_field: &str, message_field: &str) -> Self {
        self.time_field = time_field.to_string();
        self.message_field = message_field.to_string();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    fn from_params(params: &BTreeMap<String, String>) -> Result<Self, ProviderError> {
        let path = params
            .get("path")
            .ok_or_else(|| ProviderError::InvalidParams("jsonl requires 'path'".into()))?;
        let field = |name: &str, default: &str| {
            params
                .get(name)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };
        Ok(Self::new(path)
            .with_fields(
                &field("time_field", DEFAULT_TIME_FIELD),
                &field("message_field", DEFAULT_MESSAGE_FIELD),
            )
            .with_batch_size(parse_param(params, "batch_size", DEFAULT_BATCH_SIZE)?)
            .with_labels(list_param(params, "labels")))
    }

    /// Stream the file, keeping the records `keep` accepts. Returns `None`
    /// when cancelled part way.
    async fn scan<F>(
        &self,
        cancel: Option<&tokio_util::sync::CancellationToken>,
        mut keep: F,
    ) -> Result<Option<Vec<Record>>, ProviderError>
    where
        F: FnMut(&Record) -> bool,
    {
        let file = File::open(&self.path).await.map_err(|e| {
            ProviderError::Unavailable(format!("{}: {}", self.path.display(), e))
        })?;
        let mut lines = BufReader::new(file).lines();

        let mut kept = Vec::new();
        let mut line_no = 0usize;
        let mut skipped = 0usize;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line_no % CANCEL_CHECK_INTERVAL == 0 && cancel.map_or(false, |c| c.is_cancelled()) {
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str::<serde_json::Value>(&line)
                .ok()
                .and_then(|v| record_from_json(&v, &self.time_field, &self.message_field));
            match record {
                Some(record) if keep(&record) => kept.push(record),
                Some(_) => {}
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(path = %self.path.display(), skipped, "skipped unreadable lines");
        }
        Ok(Some(kept))
    }
}

#[async_trait::async_trait]
impl QueryProvider for JsonlProvider {
    async fn get_controller_params(&self) -> Result<ControllerParams, ProviderError> {
        let records = self.scan(None, |_| true).await?.unwrap_or_default();
        Ok(collect_params(&records, &self.labels))
    }

    async fn query(
        &self,
        pre_filters: &[PreFilter],
        search: Option<&SearchNode>,
        params: QueryParams,
    ) -> Result<(), ProviderError> {
        let scanned = self
            .scan(Some(&params.cancel), |r| {
                r.time().map_or(false, |t| params.in_range(t)) && matches(r, pre_filters, search)
            })
            .await?;
        let Some(rows) = scanned else {
            debug!(path = %self.path.display(), "jsonl scan cancelled");
            return Ok(());
        };
        debug!(path = %self.path.display(), rows = rows.len(), "jsonl source matched");
        emit_batches(rows, self.batch_size, &params).await;
        Ok(())
    }
}

pub fn plugin() -> Plugin {
    Plugin::new(
        "jsonl",
        "JSON-lines log file",
        vec![
            ParamSpec::required("path", "Path of the file to read"),
            ParamSpec::optional("time_field", "Key holding the timestamp", DEFAULT_TIME_FIELD),
            ParamSpec::optional(
                "message_field",
                "Key holding the message text",
                DEFAULT_MESSAGE_FIELD,
            ),
            ParamSpec::optional(
                "batch_size",
                "Rows per reported batch",
                &DEFAULT_BATCH_SIZE.to_string(),
            ),
            ParamSpec::optional("labels", "Comma-separated filterable labels", ""),
        ],
        |params| Ok(Arc::new(JsonlProvider::from_params(params)?) as Arc<dyn QueryProvider>),
    )
}
