//! End-to-end tests of the orchestration engine over in-process sources.

use sift_core::{Record, SOURCE_FIELD};
use sift_hub::connectors::memory::MemoryProvider;
use sift_hub::connectors::{ControllerParams, QueryParams, QueryProvider};
use sift_hub::error::ProviderError;
use sift_hub::query::ast::{PreFilter, SearchNode};
use sift_hub::{
    EngineConfig, EngineError, ExportFormat, FetchStatus, QueryCache, QueryEngine, QueryOptions,
    SourceRegistry, TaskStatus, TaskUpdate,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const HOUR: i64 = 3_600_000;

// =============================================================================
// Test sources
// =============================================================================

/// Counts fetches and delegates to a memory source.
struct CountingProvider {
    inner: MemoryProvider,
    calls: AtomicUsize,
}

impl CountingProvider {
    fn new(records: Vec<Record>) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryProvider::new(records),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl QueryProvider for CountingProvider {
    async fn get_controller_params(&self) -> Result<ControllerParams, ProviderError> {
        self.inner.get_controller_params().await
    }

    async fn query(
        &self,
        pre_filters: &[PreFilter],
        search: Option<&SearchNode>,
        params: QueryParams,
    ) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.query(pre_filters, search, params).await
    }
}

/// Reports one row, then holds the fetch open until cancelled.
struct StallingProvider;

#[async_trait::async_trait]
impl QueryProvider for StallingProvider {
    async fn get_controller_params(&self) -> Result<ControllerParams, ProviderError> {
        Ok(ControllerParams::new())
    }

    async fn query(
        &self,
        _pre_filters: &[PreFilter],
        _search: Option<&SearchNode>,
        params: QueryParams,
    ) -> Result<(), ProviderError> {
        (params.on_batch)(vec![Record::new("first").with_time(params.from_time + 1)]);
        params.cancel.cancelled().await;
        Ok(())
    }
}

struct FailingProvider;

#[async_trait::async_trait]
impl QueryProvider for FailingProvider {
    async fn get_controller_params(&self) -> Result<ControllerParams, ProviderError> {
        Err(ProviderError::Unavailable("offline".into()))
    }

    async fn query(
        &self,
        _pre_filters: &[PreFilter],
        _search: Option<&SearchNode>,
        _params: QueryParams,
    ) -> Result<(), ProviderError> {
        Err(ProviderError::Unavailable("offline".into()))
    }
}

/// Fails its first fetch, then serves its records.
struct RecoveringProvider {
    inner: CountingProvider,
}

impl RecoveringProvider {
    fn new(records: Vec<Record>) -> Arc<Self> {
        Arc::new(Self {
            inner: CountingProvider {
                inner: MemoryProvider::new(records),
                calls: AtomicUsize::new(0),
            },
        })
    }
}

#[async_trait::async_trait]
impl QueryProvider for RecoveringProvider {
    async fn get_controller_params(&self) -> Result<ControllerParams, ProviderError> {
        self.inner.get_controller_params().await
    }

    async fn query(
        &self,
        pre_filters: &[PreFilter],
        search: Option<&SearchNode>,
        params: QueryParams,
    ) -> Result<(), ProviderError> {
        if self.inner.calls() == 0 {
            self.inner.calls.fetch_add(1, Ordering::SeqCst);
            return Err(ProviderError::Unavailable("warming up".into()));
        }
        self.inner.query(pre_filters, search, params).await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn log_records() -> Vec<Record> {
    [
        (5_000, "web-2", "error"),
        (4_000, "web-1", "error"),
        (3_000, "web-1", "info"),
        (2_000, "web-1", "error"),
        (1_000, "web-2", "info"),
    ]
    .into_iter()
    .map(|(t, host, level)| {
        Record::new(format!("{} {} request", host, level))
            .with_time(t)
            .with_field("host", host)
            .with_field("level", level)
    })
    .collect()
}

fn source<P: QueryProvider + 'static>(provider: Arc<P>) -> Arc<dyn QueryProvider> {
    provider
}

async fn engine(instances: Vec<(&str, Arc<dyn QueryProvider>)>) -> QueryEngine {
    let registry = SourceRegistry::with_builtin_plugins().await;
    for (name, provider) in instances {
        registry.add_instance(name, "test", "", provider).await;
    }
    QueryEngine::new(
        Arc::new(registry),
        Arc::new(QueryCache::new()),
        EngineConfig::default(),
    )
}

fn options() -> QueryOptions {
    QueryOptions {
        from: Some(0),
        to: Some(HOUR),
        ..QueryOptions::default()
    }
}

async fn finish(engine: &QueryEngine, task_id: &str) -> TaskStatus {
    tokio::time::timeout(Duration::from_secs(5), engine.wait_for_completion(task_id))
        .await
        .expect("task finishes")
        .expect("task exists")
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_stats_count_by_host() {
    let engine = engine(vec![("app", source(CountingProvider::new(log_records())))]).await;
    let handle = engine
        .run_query("default", r#"level="error" | stats count() by host"#, options())
        .await
        .unwrap();
    assert_eq!(handle.instances, vec!["app"]);
    assert_eq!(finish(&engine, &handle.task_id).await, TaskStatus::Completed);

    let table = engine
        .get_table_data_paginated(&handle.task_id, 0, 10)
        .await
        .unwrap();
    assert_eq!(table.columns, vec!["host", "count"]);
    let rows: Vec<_> = table
        .page
        .data
        .iter()
        .map(|r| (r.display("host"), r.display("count")))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("web-2".to_string(), "1".to_string()),
            ("web-1".to_string(), "2".to_string()),
        ]
    );

    let logs = engine.get_logs_paginated(&handle.task_id, 0, 10).await.unwrap();
    assert_eq!(logs.total, 3);
    assert!(logs.data.iter().all(|r| r.display(SOURCE_FIELD) == "app"));
}

#[tokio::test]
async fn test_whitespace_different_queries_share_one_fetch() {
    let provider = CountingProvider::new(log_records());
    let engine = engine(vec![("app", source(provider.clone()))]).await;

    let first = engine
        .run_query("default", "level=`error`   request | stats count()", options())
        .await
        .unwrap();
    let second = engine
        .run_query("default", "level=`error` request | table host", options())
        .await
        .unwrap();
    finish(&engine, &first.task_id).await;
    finish(&engine, &second.task_id).await;

    assert_eq!(provider.calls(), 1);
    assert_eq!(engine.cache().len(), 1);

    let status = engine.get_task_status(&second.task_id).await.unwrap();
    let record = engine.cache().get(&status.sources[0].cache_key).unwrap();
    assert_eq!(record.references(), 2);
}

#[tokio::test]
async fn test_forced_query_refetches() {
    let provider = CountingProvider::new(log_records());
    let engine = engine(vec![("app", source(provider.clone()))]).await;

    let first = engine.run_query("default", "error", options()).await.unwrap();
    finish(&engine, &first.task_id).await;
    let forced = QueryOptions {
        is_forced: true,
        ..options()
    };
    let second = engine.run_query("default", "error", forced).await.unwrap();
    finish(&engine, &second.task_id).await;

    assert_eq!(provider.calls(), 2);
    assert_eq!(engine.cache().len(), 1);
    let logs = engine.get_logs_paginated(&first.task_id, 0, 10).await.unwrap();
    assert_eq!(logs.total, 3);
}

#[tokio::test]
async fn test_cancelling_one_of_two_tasks_keeps_shared_fetch() {
    let engine = engine(vec![("slow", source(Arc::new(StallingProvider)))]).await;
    let a = engine.run_query("default", "first", options()).await.unwrap();
    let b = engine.run_query("default", "first", options()).await.unwrap();

    let key = engine.get_task_status(&a.task_id).await.unwrap().sources[0]
        .cache_key
        .clone();
    let record = engine.cache().get(&key).unwrap();
    assert_eq!(record.references(), 2);

    engine.cancel_query(&a.task_id).await.unwrap();
    assert_eq!(finish(&engine, &a.task_id).await, TaskStatus::Canceled);
    assert!(engine.cache().get(&key).is_some());
    assert_eq!(record.references(), 1);
    assert!(record.is_referenced_by(&b.task_id));
    assert_eq!(record.status(), FetchStatus::Running);
    assert_eq!(
        engine.get_task_status(&b.task_id).await.unwrap().status,
        TaskStatus::Running
    );

    engine.cancel_query(&b.task_id).await.unwrap();
    assert!(engine.cache().is_empty());
    let completion = record.completion().expect("fetch started");
    let settled = tokio::time::timeout(Duration::from_secs(5), completion)
        .await
        .unwrap();
    assert_eq!(settled, FetchStatus::Canceled);
}

#[tokio::test]
async fn test_pagination_closest_event_and_export() {
    let records = (1..=10)
        .map(|i| {
            Record::new(format!("event {}", i))
                .with_time(i * 1_000)
                .with_field("host", format!("web-{}", i % 3))
                .with_field("status", (200 + i) as f64)
        })
        .collect();
    let engine = engine(vec![("app", source(CountingProvider::new(records)))]).await;
    let handle = engine
        .run_query("default", "| table host, status", options())
        .await
        .unwrap();
    finish(&engine, &handle.task_id).await;

    let page = engine.get_logs_paginated(&handle.task_id, 4, 3).await.unwrap();
    assert_eq!(page.total, 10);
    assert_eq!(page.next, Some(7));
    assert_eq!(page.prev, Some(1));
    let times: Vec<_> = page.data.iter().filter_map(|r| r.time()).collect();
    assert_eq!(times, vec![6_000, 5_000, 4_000]);

    let closest = engine
        .get_closest_date_event(&handle.task_id, 2_500)
        .await
        .unwrap()
        .expect("events exist");
    assert_eq!(closest.timestamp, 2_000);
    assert_eq!(closest.index, 8);

    let csv = engine
        .export_table_results(&handle.task_id, ExportFormat::Csv)
        .await
        .unwrap();
    assert!(csv.starts_with("host,status\r\nweb-1,210\r\n"));
    assert_eq!(csv.lines().count(), 11);

    let json = engine
        .export_table_results(&handle.task_id, ExportFormat::Json)
        .await
        .unwrap();
    let rows: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(rows.as_array().map(Vec::len), Some(10));

    assert!(engine.get_view_data(&handle.task_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_timechart_publishes_view() {
    let engine = engine(vec![("app", source(CountingProvider::new(log_records())))]).await;
    let handle = engine
        .run_query("default", "| timechart span=1m count() by level", options())
        .await
        .unwrap();
    finish(&engine, &handle.task_id).await;
    let view = engine
        .get_view_data(&handle.task_id)
        .await
        .unwrap()
        .expect("chart view");
    let names: Vec<_> = view.series.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["error", "info"]);
    assert_eq!(view.points.len(), 60);
    assert_eq!(view.points[0].values["error"], 3.0);
}

#[tokio::test]
async fn test_stage_failure_fails_task_and_is_published() {
    let engine = engine(vec![("app", source(CountingProvider::new(log_records())))]).await;
    let mut updates = engine.subscribe();
    let handle = engine
        .run_query("default", "| stats sum(host)", options())
        .await
        .unwrap();
    assert_eq!(finish(&engine, &handle.task_id).await, TaskStatus::Failed);

    let mut saw_stage_failure = false;
    let final_status = loop {
        let update = tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .expect("update published")
            .expect("channel open");
        match update {
            TaskUpdate::StageFailed { error, .. } => {
                assert!(error.contains("non-numeric"));
                saw_stage_failure = true;
            }
            TaskUpdate::StatusChanged { status, .. } => break status,
            TaskUpdate::BatchDone { .. } => {}
        }
    };
    assert!(saw_stage_failure);
    assert_eq!(final_status, TaskStatus::Failed);

    let info = engine.get_task_status(&handle.task_id).await.unwrap();
    assert!(info.error.unwrap_or_default().contains("'host'"));
}

#[tokio::test]
async fn test_task_fails_only_when_every_source_fails() {
    let engine = engine(vec![
        ("app", source(CountingProvider::new(log_records()))),
        ("down", source(Arc::new(FailingProvider))),
    ])
    .await;

    let mixed = engine.run_query("default", "error", options()).await.unwrap();
    assert_eq!(finish(&engine, &mixed.task_id).await, TaskStatus::Completed);
    let info = engine.get_task_status(&mixed.task_id).await.unwrap();
    assert_eq!(info.events, 3);
    assert!(info.error.is_some());

    let only_down = engine
        .run_query("default", "source=`down` error", options())
        .await
        .unwrap();
    assert_eq!(only_down.instances, vec!["down"]);
    assert_eq!(finish(&engine, &only_down.task_id).await, TaskStatus::Failed);
}

#[tokio::test]
async fn test_failed_fetch_is_retried_by_next_query() {
    let provider = RecoveringProvider::new(log_records());
    let engine = engine(vec![("app", source(provider.clone()))]).await;

    let first = engine.run_query("default", "error", options()).await.unwrap();
    assert_eq!(finish(&engine, &first.task_id).await, TaskStatus::Failed);

    let second = engine.run_query("default", "error", options()).await.unwrap();
    assert_eq!(finish(&engine, &second.task_id).await, TaskStatus::Completed);
    assert_eq!(provider.inner.calls(), 2);
    assert_eq!(engine.cache().len(), 1);

    let logs = engine.get_logs_paginated(&second.task_id, 0, 10).await.unwrap();
    assert_eq!(logs.total, 3);

    // The failed task still holds its own record.
    let failed = engine.get_task_status(&first.task_id).await.unwrap();
    assert!(failed.error.unwrap_or_default().contains("warming up"));
    engine.release_task_resources(&first.task_id).await.unwrap();
    assert_eq!(engine.cache().len(), 1);
}

#[tokio::test]
async fn test_repeated_stats_counts_one_per_group() {
    let engine = engine(vec![("app", source(CountingProvider::new(log_records())))]).await;
    let handle = engine
        .run_query(
            "default",
            "| stats count() by host | stats count() by host",
            options(),
        )
        .await
        .unwrap();
    assert_eq!(finish(&engine, &handle.task_id).await, TaskStatus::Completed);

    let table = engine
        .get_table_data_paginated(&handle.task_id, 0, 10)
        .await
        .unwrap();
    assert_eq!(table.page.total, 2);
    assert!(table.page.data.iter().all(|r| r.display("count") == "1"));
}

#[tokio::test]
async fn test_source_selectors() {
    let engine = engine(vec![
        ("api", source(CountingProvider::new(log_records()))),
        ("worker", source(CountingProvider::new(log_records()))),
    ])
    .await;

    let all = engine.run_query("default", "error", options()).await.unwrap();
    assert_eq!(all.instances, vec!["api", "worker"]);
    let excluded = engine
        .run_query("default", "source!=`api` error", options())
        .await
        .unwrap();
    assert_eq!(excluded.instances, vec!["worker"]);
    let both = engine
        .run_query("default", "source=api source=worker", options())
        .await
        .unwrap();
    assert_eq!(both.instances, vec!["api", "worker"]);

    assert!(matches!(
        engine.run_query("default", "source=nope", options()).await,
        Err(EngineError::UnknownInstance(name)) if name == "nope"
    ));
    assert!(matches!(
        engine
            .run_query("default", "source=api source!=api", options())
            .await,
        Err(EngineError::NoInstances)
    ));
    assert!(matches!(
        engine.run_query("ops", "error", options()).await,
        Err(EngineError::UnknownProfile(_))
    ));
}

#[tokio::test]
async fn test_rejected_queries_start_no_task() {
    let engine = engine(vec![("app", source(CountingProvider::new(log_records())))]).await;
    assert!(matches!(
        engine.run_query("default", "| stats avg(", options()).await,
        Err(EngineError::Parse(_))
    ));
    let backwards = QueryOptions {
        from: Some(HOUR),
        to: Some(0),
        ..QueryOptions::default()
    };
    assert!(matches!(
        engine.run_query("default", "error", backwards).await,
        Err(EngineError::InvalidRange { .. })
    ));
    assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn test_release_task_resources_forgets_task() {
    let engine = engine(vec![("app", source(CountingProvider::new(log_records())))]).await;
    let handle = engine.run_query("default", "error", options()).await.unwrap();
    finish(&engine, &handle.task_id).await;
    assert_eq!(engine.cache().len(), 1);

    engine.release_task_resources(&handle.task_id).await.unwrap();
    assert!(engine.cache().is_empty());
    assert!(matches!(
        engine.get_task_status(&handle.task_id).await,
        Err(EngineError::TaskNotFound(_))
    ));
    assert!(matches!(
        engine.get_table_data_paginated("task-missing", 0, 1).await,
        Err(EngineError::TaskNotFound(_))
    ));
}

#[tokio::test]
async fn test_catalogue_apis() {
    let engine = engine(vec![(
        "app",
        source(Arc::new(
            MemoryProvider::new(log_records()).with_labels(&["host"]),
        )),
    )])
    .await;
    let params = engine.get_controller_params("app").await.unwrap();
    assert_eq!(params["host"], vec!["web-1", "web-2"]);
    assert_eq!(engine.get_initialized_plugins().await.len(), 1);
    assert_eq!(engine.get_supported_plugins().await.len(), 2);
    assert_eq!(engine.get_search_profiles().await["default"], vec!["app"]);
}
