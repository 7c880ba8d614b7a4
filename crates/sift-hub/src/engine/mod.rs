//! # Query Orchestration Engine
//!
//! Turns query text into a running task: parses it, picks the source
//! instances, attaches one cached fetch per instance and drives the pipeline
//! as batches arrive. Each batch merge re-runs the whole pipeline over the
//! merged rows of every source and publishes a [`TaskUpdate`].
//!
//! Tasks move `Running → Completed | Failed | Canceled`. Every read API
//! works on the results of the last successful pipeline run and returns
//! plain serializable data.

pub mod export;
pub mod index;
pub mod task;

use crate::cache::{BatchSink, CacheIdentity, FetchFuture, FetchStatus, QueryCache};
use crate::config::EngineConfig;
use crate::connectors::registry::{InstanceInfo, PluginInfo, SourceRegistry};
use crate::connectors::{BatchCallback, ControllerParams, QueryParams, QueryProvider};
use crate::error::{EngineError, Result, TaskId};
use crate::pipeline::{run_pipeline, PipelineContext};
use crate::query::ast::{PreFilter, PreFilterOp};
use crate::query::parse;
use export::{export_table, ExportFormat};
use futures_util::future::{select_all, FutureExt};
use index::{Histogram, HistogramBucket, TimeIndex};
use serde::{Deserialize, Serialize};
use sift_core::{kway_merge_desc, ChartView, Record, SOURCE_FIELD};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use task::{QueryTask, SourceStatus, SubTask, TaskState};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

pub use task::TaskStatus;

/// Pre-filter key that selects source instances instead of filtering rows.
pub const SOURCE_SELECTOR: &str = "source";

/// Events sampled when collecting autocomplete keys.
const AUTOCOMPLETE_SAMPLE: usize = 1000;

// =============================================================================
// Public types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Inclusive start, epoch milliseconds. Defaults to `to - default_range`.
    #[serde(default)]
    pub from: Option<i64>,
    /// Exclusive end, epoch milliseconds. Defaults to now.
    #[serde(default)]
    pub to: Option<i64>,
    /// Rows requested per source. Defaults to `engine.default_limit`.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Drop any cached fetch for the same identity and fetch anew.
    #[serde(default)]
    pub is_forced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: TaskId,
    pub instances: Vec<String>,
    pub from: i64,
    pub to: i64,
}

/// Published on the engine's update stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskUpdate {
    BatchDone {
        task_id: TaskId,
        /// Histogram bucket width in milliseconds.
        scale: i64,
        events: usize,
        table_rows: Option<usize>,
        columns: Vec<String>,
        autocomplete_keys: Vec<String>,
        buckets: Vec<HistogramBucket>,
    },
    StageFailed {
        task_id: TaskId,
        error: String,
    },
    StatusChanged {
        task_id: TaskId,
        status: TaskStatus,
        error: Option<String>,
    },
}

impl TaskUpdate {
    pub fn task_id(&self) -> &str {
        match self {
            TaskUpdate::BatchDone { task_id, .. }
            | TaskUpdate::StageFailed { task_id, .. }
            | TaskUpdate::StatusChanged { task_id, .. } => task_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub next: Option<usize>,
    pub prev: Option<usize>,
}

impl<T: Clone> Page<T> {
    fn slice(items: &[T], offset: usize, limit: usize) -> Self {
        let total = items.len();
        let start = offset.min(total);
        let end = start.saturating_add(limit).min(total);
        Self {
            data: items[start..end].to_vec(),
            total,
            next: (end < total).then_some(end),
            prev: (start > 0).then(|| start.saturating_sub(limit)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePage {
    pub columns: Vec<String>,
    #[serde(flatten)]
    pub page: Page<Arc<Record>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosestEvent {
    /// Position in the task's event list.
    pub index: usize,
    pub timestamp: i64,
    pub event: Arc<Record>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub query: String,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub from: i64,
    pub to: i64,
    pub events: usize,
    pub sources: Vec<SourceStatus>,
}

// =============================================================================
// Engine
// =============================================================================

pub struct QueryEngine {
    registry: Arc<SourceRegistry>,
    cache: Arc<QueryCache>,
    config: EngineConfig,
    tasks: RwLock<HashMap<TaskId, Arc<QueryTask>>>,
    updates: broadcast::Sender<TaskUpdate>,
}

impl QueryEngine {
    pub fn new(registry: Arc<SourceRegistry>, cache: Arc<QueryCache>, config: EngineConfig) -> Self {
        let (updates, _) = broadcast::channel(1024);
        Self {
            registry,
            cache,
            config,
            tasks: RwLock::new(HashMap::new()),
            updates,
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskUpdate> {
        self.updates.subscribe()
    }

    /// Parse `text` and start a task over the sources it selects.
    pub async fn run_query(
        &self,
        profile: &str,
        text: &str,
        options: QueryOptions,
    ) -> Result<TaskHandle> {
        let query = parse(text).into_result().map_err(EngineError::Parse)?;
        let (from, to) = self.resolve_range(&options)?;
        let limit = options.limit.unwrap_or(self.config.default_limit);

        let instances = self.resolve_instances(profile, &query.pre_filters).await?;
        let forwarded: Vec<PreFilter> = query
            .pre_filters
            .iter()
            .filter(|f| f.key != SOURCE_SELECTOR)
            .cloned()
            .collect();

        // Resolve every provider before taking any cache reference.
        let mut providers = Vec::with_capacity(instances.len());
        for instance in &instances {
            providers.push((instance.clone(), self.registry.provider(instance).await?));
        }

        let task_id = format!("task-{}", uuid::Uuid::new_v4().as_simple());
        let mut subtasks = Vec::with_capacity(providers.len());
        for (instance, provider) in providers {
            let identity = CacheIdentity {
                pre_filters: forwarded.clone(),
                search: query.search.clone(),
                from,
                to,
                instance: instance.clone(),
            };
            if options.is_forced && self.cache.force_remove_from_cache(&identity).is_some() {
                debug!(task = %task_id, instance = %instance, "forced refetch");
            }
            let factory = fetch_factory(provider, &identity, limit);
            let (record, created) = self.cache.reference_or_add(identity, &task_id, factory);
            debug!(task = %task_id, instance = %instance, cached = !created, "source attached");
            subtasks.push(SubTask { instance, record });
        }

        let task = Arc::new(QueryTask::new(
            task_id.clone(),
            text.to_string(),
            query,
            PipelineContext { from, to },
            subtasks,
        ));
        self.tasks
            .write()
            .await
            .insert(task_id.clone(), Arc::clone(&task));

        info!(task = %task_id, instances = ?task.instances(), from, to, "query started");
        let handle = TaskHandle {
            task_id,
            instances: task.instances(),
            from,
            to,
        };
        tokio::spawn(drive(
            task,
            self.updates.clone(),
            self.config.histogram_buckets,
        ));
        Ok(handle)
    }

    fn resolve_range(&self, options: &QueryOptions) -> Result<(i64, i64)> {
        let to = options
            .to
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        let from = match options.from {
            Some(from) => from,
            None => to - self.config.default_range_ms()?,
        };
        if from >= to {
            return Err(EngineError::InvalidRange { from, to });
        }
        Ok((from, to))
    }

    /// `source=` pre-filters pick instances explicitly, `source!=` removes
    /// them; otherwise the profile decides.
    async fn resolve_instances(&self, profile: &str, filters: &[PreFilter]) -> Result<Vec<String>> {
        let selectors: Vec<&PreFilter> = filters
            .iter()
            .filter(|f| f.key == SOURCE_SELECTOR)
            .collect();

        let mut selected: Vec<String> = Vec::new();
        let explicit: Vec<&str> = selectors
            .iter()
            .filter(|f| f.op == PreFilterOp::Eq)
            .map(|f| f.value.as_str())
            .collect();
        if explicit.is_empty() {
            selected = self.registry.profile_instances(profile).await?;
        } else {
            for name in explicit {
                if !self.registry.has_instance(name).await {
                    return Err(EngineError::UnknownInstance(name.to_string()));
                }
                if !selected.iter().any(|s| s == name) {
                    selected.push(name.to_string());
                }
            }
        }
        selected.retain(|name| {
            selectors
                .iter()
                .filter(|f| f.op == PreFilterOp::NotEq)
                .all(|f| f.accepts(name))
        });

        if selected.is_empty() {
            return Err(EngineError::NoInstances);
        }
        Ok(selected)
    }

    async fn task(&self, task_id: &str) -> Result<Arc<QueryTask>> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))
    }

    /// Stop a running task and drop its cache references. Fetches still
    /// referenced by other tasks keep running. A finished task is left as is.
    pub async fn cancel_query(&self, task_id: &str) -> Result<()> {
        let task = self.task(task_id).await?;
        if !task.finish(TaskStatus::Canceled) {
            return Ok(());
        }
        task.cancel.cancel();
        self.release_references(&task);
        info!(task = %task_id, "query canceled");
        let _ = self.updates.send(TaskUpdate::StatusChanged {
            task_id: task_id.to_string(),
            status: TaskStatus::Canceled,
            error: None,
        });
        Ok(())
    }

    /// Cancel the task if needed, drop its cache references and forget it.
    pub async fn release_task_resources(&self, task_id: &str) -> Result<()> {
        let task = self
            .tasks
            .write()
            .await
            .remove(task_id)
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
        if task.finish(TaskStatus::Canceled) {
            let _ = self.updates.send(TaskUpdate::StatusChanged {
                task_id: task_id.to_string(),
                status: TaskStatus::Canceled,
                error: None,
            });
        }
        task.cancel.cancel();
        self.release_references(&task);
        debug!(task = %task_id, "task resources released");
        Ok(())
    }

    fn release_references(&self, task: &QueryTask) {
        if !task.take_references() {
            return;
        }
        for sub in &task.subtasks {
            if self.cache.release(&sub.record, &task.id) {
                debug!(task = %task.id, instance = %sub.instance, "fetch dropped");
            }
        }
    }

    /// Resolves once the task leaves `Running`.
    pub async fn wait_for_completion(&self, task_id: &str) -> Result<TaskStatus> {
        let task = self.task(task_id).await?;
        let mut status = task.subscribe_status();
        let finished = status
            .wait_for(|s| s.is_terminal())
            .await
            .map(|s| *s)
            .unwrap_or(TaskStatus::Canceled);
        Ok(finished)
    }

    // -------------------------------------------------------------------------
    // Read APIs
    // -------------------------------------------------------------------------

    pub async fn get_task_status(&self, task_id: &str) -> Result<TaskInfo> {
        let task = self.task(task_id).await?;
        let state = task.state.lock().await;
        Ok(TaskInfo {
            task_id: task.id.clone(),
            query: task.text.clone(),
            status: task.status(),
            error: state.error.clone(),
            from: task.ctx.from,
            to: task.ctx.to,
            events: state.results.events.len(),
            sources: task.source_statuses(),
        })
    }

    pub async fn get_logs_paginated(
        &self,
        task_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Page<Arc<Record>>> {
        let task = self.task(task_id).await?;
        let state = task.state.lock().await;
        Ok(Page::slice(&state.results.events, offset, limit))
    }

    pub async fn get_table_data_paginated(
        &self,
        task_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<TablePage> {
        let task = self.task(task_id).await?;
        let state = task.state.lock().await;
        let table = state
            .results
            .table
            .as_ref()
            .ok_or_else(|| EngineError::NoTableView(task_id.to_string()))?;
        Ok(TablePage {
            columns: table.columns.clone(),
            page: Page::slice(&table.rows, offset, limit),
        })
    }

    /// The event nearest `timestamp`; ties go to the earlier event.
    pub async fn get_closest_date_event(
        &self,
        task_id: &str,
        timestamp: i64,
    ) -> Result<Option<ClosestEvent>> {
        let task = self.task(task_id).await?;
        let state = task.state.lock().await;
        Ok(state.index.closest(timestamp).and_then(|(ts, index)| {
            state.results.events.get(index).map(|event| ClosestEvent {
                index,
                timestamp: ts,
                event: Arc::clone(event),
            })
        }))
    }

    pub async fn export_table_results(&self, task_id: &str, format: ExportFormat) -> Result<String> {
        let task = self.task(task_id).await?;
        let state = task.state.lock().await;
        let table = state
            .results
            .table
            .as_ref()
            .ok_or_else(|| EngineError::NoTableView(task_id.to_string()))?;
        Ok(export_table(table, format))
    }

    pub async fn get_view_data(&self, task_id: &str) -> Result<Option<ChartView>> {
        let task = self.task(task_id).await?;
        let state = task.state.lock().await;
        Ok(state.results.view.clone())
    }

    pub async fn get_histogram(&self, task_id: &str) -> Result<Histogram> {
        let task = self.task(task_id).await?;
        let state = task.state.lock().await;
        Ok(state.histogram.clone())
    }

    pub async fn get_controller_params(&self, instance: &str) -> Result<ControllerParams> {
        self.registry.controller_params(instance).await
    }

    pub async fn get_supported_plugins(&self) -> Vec<PluginInfo> {
        self.registry.supported_plugins().await
    }

    pub async fn get_initialized_plugins(&self) -> Vec<InstanceInfo> {
        self.registry.initialized_plugins().await
    }

    pub async fn get_search_profiles(&self) -> BTreeMap<String, Vec<String>> {
        self.registry.search_profiles().await
    }
}

// =============================================================================
// Fetch and drive
// =============================================================================

/// The cache-side fetch for one instance: runs the provider and stamps each
/// row with its source.
fn fetch_factory(
    provider: Arc<dyn QueryProvider>,
    identity: &CacheIdentity,
    limit: usize,
) -> impl FnOnce(BatchSink) -> FetchFuture {
    let pre_filters = identity.pre_filters.clone();
    let search = identity.search.clone();
    let instance = identity.instance.clone();
    let (from_time, to_time) = (identity.from, identity.to);

    move |sink: BatchSink| {
        async move {
            let cancel = sink.cancel_token();
            let on_batch: BatchCallback = Arc::new(move |batch: Vec<Record>| {
                let stamped = batch
                    .into_iter()
                    .map(|r| r.with_field(SOURCE_FIELD, instance.as_str()))
                    .collect();
                sink.push(stamped);
            });
            let params = QueryParams {
                from_time,
                to_time,
                limit,
                cancel,
                on_batch,
            };
            provider.query(&pre_filters, search.as_ref(), params).await
        }
        .boxed()
    }
}

/// Re-run the pipeline on every change to any of the task's fetches until
/// all of them settle, then decide the final status.
async fn drive(task: Arc<QueryTask>, updates: broadcast::Sender<TaskUpdate>, buckets: usize) {
    let mut progress: Vec<_> = task.subtasks.iter().map(|s| s.record.subscribe()).collect();

    while !task.fetches_settled() && !progress.is_empty() {
        let changed = select_all(progress.iter_mut().map(|rx| Box::pin(rx.changed())));
        let woke = tokio::select! {
            biased;
            _ = task.cancel.cancelled() => None,
            (result, _, _) = changed => Some(result.is_ok()),
        };
        match woke {
            None => return,
            Some(false) => break,
            Some(true) => {}
        }
        for rx in progress.iter_mut() {
            rx.borrow_and_update();
        }
        if !task.fetches_settled() {
            recompute(&task, &updates, buckets).await;
        }
    }

    if task.cancel.is_cancelled() {
        return;
    }
    let pipeline_ok = recompute(&task, &updates, buckets).await;

    let statuses: Vec<FetchStatus> = task.subtasks.iter().map(|s| s.record.status()).collect();
    let failures: Vec<&str> = statuses
        .iter()
        .filter_map(|s| match s {
            FetchStatus::Failed(msg) => Some(msg.as_str()),
            _ => None,
        })
        .collect();
    let live = statuses
        .iter()
        .filter(|s| **s != FetchStatus::Canceled)
        .count();
    let all_failed = live > 0 && failures.len() == live;

    let error = {
        let mut state = task.state.lock().await;
        if all_failed {
            state.error = Some(failures.join("; "));
        } else if !failures.is_empty() && state.error.is_none() {
            state.error = Some(format!("{} of {} sources failed", failures.len(), live));
        }
        state.error.clone()
    };
    let status = if all_failed || !pipeline_ok {
        TaskStatus::Failed
    } else {
        TaskStatus::Completed
    };

    if task.finish(status) {
        match status {
            TaskStatus::Failed => warn!(task = %task.id, error = ?error, "query failed"),
            _ => info!(task = %task.id, "query completed"),
        }
        let _ = updates.send(TaskUpdate::StatusChanged {
            task_id: task.id.clone(),
            status,
            error,
        });
    }
}

/// Merge every source, run the pipeline and publish the outcome. Returns
/// whether the pipeline succeeded.
async fn recompute(task: &QueryTask, updates: &broadcast::Sender<TaskUpdate>, buckets: usize) -> bool {
    let sources: Vec<_> = task.subtasks.iter().map(|s| s.record.data()).collect();
    let lists: Vec<&[Arc<Record>]> = sources.iter().map(|d| d.as_slice()).collect();
    let merged = kway_merge_desc(&lists);

    let mut state = task.state.lock().await;
    if task.cancel.is_cancelled() {
        return false;
    }
    match run_pipeline(merged, &task.query.pipeline, &task.ctx) {
        Ok(results) => {
            let update = batch_update(&task.id, &results, task.ctx, buckets, &mut state);
            state.results = results;
            state.error = None;
            debug!(task = %task.id, events = state.results.events.len(), "batch processed");
            let _ = updates.send(update);
            true
        }
        Err(e) => {
            warn!(task = %task.id, error = %e, "pipeline stage failed");
            state.error = Some(e.to_string());
            let _ = updates.send(TaskUpdate::StageFailed {
                task_id: task.id.clone(),
                error: e.to_string(),
            });
            false
        }
    }
}

/// Rebuild the index and histogram for `results` and describe the batch.
fn batch_update(
    task_id: &str,
    results: &sift_core::DisplayResults,
    ctx: PipelineContext,
    buckets: usize,
    state: &mut TaskState,
) -> TaskUpdate {
    state.index = TimeIndex::build(&results.events);
    state.histogram = Histogram::build(&results.events, ctx.from, ctx.to, buckets);

    let mut keys: BTreeSet<String> = results
        .events
        .iter()
        .take(AUTOCOMPLETE_SAMPLE)
        .flat_map(|e| e.fields.keys().cloned())
        .collect();
    let columns = results
        .table
        .as_ref()
        .map(|t| t.columns.clone())
        .unwrap_or_default();
    keys.extend(columns.iter().cloned());

    TaskUpdate::BatchDone {
        task_id: task_id.to_string(),
        scale: state.histogram.scale,
        events: results.events.len(),
        table_rows: results.table.as_ref().map(|t| t.rows.len()),
        columns,
        autocomplete_keys: keys.into_iter().collect(),
        buckets: state.histogram.buckets.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_slicing() {
        let items: Vec<u32> = (0..10).collect();
        let page = Page::slice(&items, 4, 3);
        assert_eq!(page.data, vec![4, 5, 6]);
        assert_eq!(page.total, 10);
        assert_eq!(page.next, Some(7));
        assert_eq!(page.prev, Some(1));

        let last = Page::slice(&items, 8, 5);
        assert_eq!(last.data, vec![8, 9]);
        assert_eq!(last.next, None);

        let first = Page::slice(&items, 0, 5);
        assert_eq!(first.prev, None);

        let past = Page::slice(&items, 50, 5);
        assert!(past.data.is_empty());
        assert_eq!(past.prev, Some(5));
    }

    #[test]
    fn test_update_serializes_with_type_tag() {
        let update = TaskUpdate::StageFailed {
            task_id: "task-1".into(),
            error: "boom".into(),
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "stage_failed");
        assert_eq!(update.task_id(), "task-1");
    }
}
