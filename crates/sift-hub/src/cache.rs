//! # Result Cache
//!
//! Content-addressed, reference-counted cache of source fetches. Two tasks
//! whose fetch identity (pre-filters, search tree, time range, instance) is
//! structurally equal share one [`CacheRecord`] and one running fetch.
//!
//! Locking: the index sits behind one `parking_lot::Mutex`; each record has
//! its own lock for its data and references. When both are needed the index
//! is locked first. Neither lock is ever held across an `.await`.

use crate::error::{CacheError, ProviderError, TaskId};
use crate::query::ast::{PreFilter, SearchNode};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sift_core::{merge_sorted_desc, sort_desc, Record};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Hex SHA-256 of the canonical identity.
pub type CacheKey = String;

/// A fetch is a provider query that pushes batches into a [`BatchSink`].
pub type FetchFuture = BoxFuture<'static, Result<(), ProviderError>>;

type Completion = Shared<BoxFuture<'static, FetchStatus>>;

// =============================================================================
// Identity
// =============================================================================

/// Everything that determines what a source returns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheIdentity {
    pub pre_filters: Vec<PreFilter>,
    pub search: Option<SearchNode>,
    pub from: i64,
    pub to: i64,
    pub instance: String,
}

impl CacheIdentity {
    pub fn key(&self) -> CacheKey {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        sha256_hex(&canonical)
    }
}

fn sha256_hex(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    format!("{:x}", digest)
}

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum FetchStatus {
    Running,
    Done,
    Failed(String),
    Canceled,
}

impl FetchStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, FetchStatus::Running)
    }
}

/// Published on every change to a record: a new batch merged or the fetch
/// settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub version: u64,
    pub status: FetchStatus,
}

struct RecordState {
    referencing_tasks: HashSet<TaskId>,
    data: Arc<Vec<Arc<Record>>>,
    status: FetchStatus,
}

/// One cached fetch: its identity, the time-sorted rows received so far and
/// the tasks referencing it.
pub struct CacheRecord {
    key: CacheKey,
    identity: CacheIdentity,
    state: Mutex<RecordState>,
    progress: watch::Sender<Progress>,
    cancel: CancellationToken,
    completion: Mutex<Option<Completion>>,
}

impl CacheRecord {
    fn new(identity: CacheIdentity, key: CacheKey, task: &str) -> Arc<Self> {
        let (progress, _) = watch::channel(Progress {
            version: 0,
            status: FetchStatus::Running,
        });
        Arc::new(Self {
            key,
            identity,
            state: Mutex::new(RecordState {
                referencing_tasks: HashSet::from([task.to_string()]),
                data: Arc::new(Vec::new()),
                status: FetchStatus::Running,
            }),
            progress,
            cancel: CancellationToken::new(),
            completion: Mutex::new(None),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn identity(&self) -> &CacheIdentity {
        &self.identity
    }

    /// Rows received so far, sorted by descending `_time`.
    pub fn data(&self) -> Arc<Vec<Arc<Record>>> {
        Arc::clone(&self.state.lock().data)
    }

    pub fn status(&self) -> FetchStatus {
        self.state.lock().status.clone()
    }

    pub fn references(&self) -> usize {
        self.state.lock().referencing_tasks.len()
    }

    pub fn is_referenced_by(&self, task: &str) -> bool {
        self.state.lock().referencing_tasks.contains(task)
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Resolves once the fetch settles. Always `Some` for records handed
    /// out by [`QueryCache`].
    pub fn completion(&self) -> Option<Completion> {
        self.completion.lock().clone()
    }

    fn add_reference(&self, task: &str) {
        self.state.lock().referencing_tasks.insert(task.to_string());
    }

    /// Drop a reference. Returns whether none remain.
    fn remove_reference(&self, task: &str) -> bool {
        let mut state = self.state.lock();
        state.referencing_tasks.remove(task);
        state.referencing_tasks.is_empty()
    }

    fn merge_batch(&self, batch: Vec<Record>) {
        if self.cancel.is_cancelled() || batch.is_empty() {
            return;
        }
        let mut rows: Vec<Arc<Record>> = batch.into_iter().map(Arc::new).collect();
        sort_desc(&mut rows);

        {
            let mut state = self.state.lock();
            state.data = Arc::new(merge_sorted_desc(&state.data, &rows));
        }
        self.progress.send_modify(|p| p.version += 1);
    }

    fn finish(&self, status: FetchStatus) {
        {
            let mut state = self.state.lock();
            if state.status.is_settled() {
                return;
            }
            state.status = status.clone();
        }
        self.progress.send_modify(|p| {
            p.version += 1;
            p.status = status;
        });
    }

    /// Spawn the fetch produced by `factory`.
    fn start<F>(self: &Arc<Self>, factory: F)
    where
        F: FnOnce(BatchSink) -> FetchFuture,
    {
        let fetch = factory(BatchSink {
            record: Arc::clone(self),
        });
        let cancel = self.cancel.clone();
        let record = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => FetchStatus::Canceled,
                result = fetch => match result {
                    Ok(()) => FetchStatus::Done,
                    Err(e) => {
                        warn!(key = %record.key, error = %e, "source fetch failed");
                        FetchStatus::Failed(e.to_string())
                    }
                },
            };
            record.finish(status.clone());
            status
        });

        let completion = handle
            .map(|joined| {
                joined.unwrap_or_else(|e| FetchStatus::Failed(format!("fetch task aborted: {}", e)))
            })
            .boxed()
            .shared();
        *self.completion.lock() = Some(completion);
    }
}

/// Write side of a record handed to the fetch.
#[derive(Clone)]
pub struct BatchSink {
    record: Arc<CacheRecord>,
}

impl BatchSink {
    /// Sort a batch and merge it into the record.
    pub fn push(&self, batch: Vec<Record>) {
        self.record.merge_batch(batch);
    }

    /// Cancelled when the last reference to the record is dropped.
    pub fn cancel_token(&self) -> CancellationToken {
        self.record.cancel.clone()
    }
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Default)]
pub struct QueryCache {
    index: Mutex<HashMap<CacheKey, Arc<CacheRecord>>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.lock().is_empty()
    }

    pub fn in_cache(&self, identity: &CacheIdentity) -> bool {
        self.index.lock().contains_key(&identity.key())
    }

    pub fn get(&self, key: &str) -> Option<Arc<CacheRecord>> {
        self.index.lock().get(key).cloned()
    }

    /// Create a record referenced by `task` and start its fetch. The caller
    /// must have checked [`QueryCache::in_cache`].
    pub fn add_to_cache<F>(
        &self,
        identity: CacheIdentity,
        task: &str,
        factory: F,
    ) -> Result<Arc<CacheRecord>, CacheError>
    where
        F: FnOnce(BatchSink) -> FetchFuture,
    {
        let key = identity.key();
        let record = {
            let mut index = self.index.lock();
            if index.contains_key(&key) {
                error!(key = %key, task, "cache key added twice");
                return Err(CacheError::DuplicateKey(key));
            }
            let record = CacheRecord::new(identity, key.clone(), task);
            record.start(factory);
            index.insert(key.clone(), Arc::clone(&record));
            record
        };
        debug!(key = %key, task, "cache miss, fetch started");
        Ok(record)
    }

    /// Add `task` as a reference to an existing record.
    pub fn reference_cache(
        &self,
        identity: &CacheIdentity,
        task: &str,
    ) -> Result<Arc<CacheRecord>, CacheError> {
        let key = identity.key();
        let index = self.index.lock();
        let Some(record) = index.get(&key) else {
            error!(key = %key, task, "referenced a missing cache key");
            return Err(CacheError::MissingKey(key));
        };
        record.add_reference(task);
        debug!(key = %key, task, "cache hit");
        Ok(Arc::clone(record))
    }

    /// Reference the record for `identity`, creating it if absent, under one
    /// lock. A record whose fetch failed is replaced by a fresh one. Returns
    /// the record and whether it was created.
    pub fn reference_or_add<F>(
        &self,
        identity: CacheIdentity,
        task: &str,
        factory: F,
    ) -> (Arc<CacheRecord>, bool)
    where
        F: FnOnce(BatchSink) -> FetchFuture,
    {
        let key = identity.key();
        let record = {
            let mut index = self.index.lock();
            match index.get(&key) {
                Some(existing) if matches!(existing.status(), FetchStatus::Failed(_)) => {
                    debug!(key = %key, task, "cached fetch failed, fetching again");
                }
                Some(existing) => {
                    existing.add_reference(task);
                    debug!(key = %key, task, "cache hit");
                    return (Arc::clone(existing), false);
                }
                None => {}
            }
            let record = CacheRecord::new(identity, key.clone(), task);
            record.start(factory);
            index.insert(key.clone(), Arc::clone(&record));
            record
        };
        debug!(key = %key, task, "cache miss, fetch started");
        (record, true)
    }

    /// Drop `task`'s reference to the record under `key`. When no references
    /// remain the record is deleted and its fetch cancelled. Returns whether
    /// the record was deleted.
    pub fn remove_from_cache_by_key(&self, key: &str, task: &str) -> Result<bool, CacheError> {
        let mut index = self.index.lock();
        let Some(record) = index.get(key).cloned() else {
            error!(key, task, "released a missing cache key");
            return Err(CacheError::MissingKey(key.to_string()));
        };
        let orphaned = record.remove_reference(task);
        if orphaned {
            index.remove(key);
            record.cancel.cancel();
            debug!(key, "cache entry dropped");
        }
        Ok(orphaned)
    }

    /// Drop `task`'s reference to `record`, which may already have been
    /// force-removed from the index. Returns whether the fetch was dropped.
    pub fn release(&self, record: &Arc<CacheRecord>, task: &str) -> bool {
        let mut index = self.index.lock();
        let orphaned = record.remove_reference(task);
        if orphaned {
            if index
                .get(record.key())
                .map_or(false, |current| Arc::ptr_eq(current, record))
            {
                index.remove(record.key());
            }
            record.cancel.cancel();
            debug!(key = %record.key, task, "cache entry released");
        }
        orphaned
    }

    /// Remove the record for `identity` from the index regardless of its
    /// references. Tasks holding it keep reading it; the next lookup fetches
    /// anew.
    pub fn force_remove_from_cache(&self, identity: &CacheIdentity) -> Option<Arc<CacheRecord>> {
        let key = identity.key();
        let removed = self.index.lock().remove(&key);
        if removed.is_some() {
            debug!(key = %key, "cache entry force-removed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn identity(instance: &str) -> CacheIdentity {
        CacheIdentity {
            pre_filters: Vec::new(),
            search: Some(SearchNode::term("error")),
            from: 0,
            to: 1_000,
            instance: instance.to_string(),
        }
    }

    fn idle_fetch(_sink: BatchSink) -> FetchFuture {
        futures_util::future::pending().boxed()
    }

    fn rows(times: &[i64]) -> Vec<Record> {
        times.iter().map(|t| Record::new("").with_time(*t)).collect()
    }

    async fn settle(record: &CacheRecord) -> FetchStatus {
        let completion = record.completion().expect("fetch started");
        tokio::time::timeout(Duration::from_secs(5), completion)
            .await
            .expect("fetch settles")
    }

    #[test]
    fn test_identity_ignores_query_whitespace() {
        let build = |text: &str| {
            let q = parse(text).into_result().expect("parses");
            CacheIdentity {
                pre_filters: q.pre_filters,
                search: q.search,
                from: 0,
                to: 10,
                instance: "app".into(),
            }
        };
        let a = build("level=`error`   timeout  | stats count()");
        let b = build("level=`error` timeout | stats   count() by host");
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), build("level=`warn` timeout").key());
        assert_eq!(a.key().len(), 64);
    }

    #[tokio::test]
    async fn test_add_and_reference_errors() {
        let cache = QueryCache::new();
        let id = identity("app");
        assert!(matches!(
            cache.reference_cache(&id, "t1"),
            Err(CacheError::MissingKey(_))
        ));
        cache.add_to_cache(id.clone(), "t1", idle_fetch).unwrap();
        assert!(cache.in_cache(&id));
        assert!(matches!(
            cache.add_to_cache(id.clone(), "t2", idle_fetch),
            Err(CacheError::DuplicateKey(_))
        ));
        let record = cache.reference_cache(&id, "t2").unwrap();
        assert_eq!(record.references(), 2);
    }

    #[tokio::test]
    async fn test_factory_runs_once_per_identity() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        for task in ["t1", "t2", "t3"] {
            let calls = Arc::clone(&calls);
            let (_, _created) = cache.reference_or_add(identity("app"), task, move |sink| {
                calls.fetch_add(1, Ordering::SeqCst);
                idle_fetch(sink)
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_batches_merge_in_descending_time_order() {
        let cache = QueryCache::new();
        let record = cache
            .add_to_cache(identity("app"), "t1", |sink| {
                async move {
                    sink.push(rows(&[1, 5]));
                    sink.push(rows(&[4, 3, 6]));
                    Ok(())
                }
                .boxed()
            })
            .unwrap();
        let mut progress = record.subscribe();
        assert_eq!(settle(&record).await, FetchStatus::Done);

        let times: Vec<_> = record.data().iter().filter_map(|r| r.time()).collect();
        assert_eq!(times, vec![6, 5, 4, 3, 1]);
        assert!(progress.borrow_and_update().version >= 3);
        assert_eq!(progress.borrow().status, FetchStatus::Done);
    }

    #[tokio::test]
    async fn test_failed_fetch_records_error() {
        let cache = QueryCache::new();
        let record = cache
            .add_to_cache(identity("app"), "t1", |_| {
                async { Err(ProviderError::Unavailable("down".into())) }.boxed()
            })
            .unwrap();
        assert!(matches!(settle(&record).await, FetchStatus::Failed(msg) if msg.contains("down")));
        assert_eq!(record.status(), settle(&record).await);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_replaced_on_next_reference() {
        let cache = QueryCache::new();
        let (failed, created) = cache.reference_or_add(identity("app"), "t1", |_| {
            async { Err(ProviderError::Unavailable("down".into())) }.boxed()
        });
        assert!(created);
        assert!(matches!(settle(&failed).await, FetchStatus::Failed(_)));

        let (fresh, created) = cache.reference_or_add(identity("app"), "t2", |sink| {
            async move {
                sink.push(rows(&[7]));
                Ok(())
            }
            .boxed()
        });
        assert!(created);
        assert!(!Arc::ptr_eq(&failed, &fresh));
        assert_eq!(settle(&fresh).await, FetchStatus::Done);
        assert_eq!(fresh.data().len(), 1);

        // The old holder lets go without touching the replacement.
        assert!(cache.release(&failed, "t1"));
        assert!(cache.in_cache(&identity("app")));

        let (hit, created) = cache.reference_or_add(identity("app"), "t3", idle_fetch);
        assert!(!created);
        assert!(Arc::ptr_eq(&hit, &fresh));
    }

    #[tokio::test]
    async fn test_indexed_records_have_a_completion() {
        let cache = QueryCache::new();
        let added = cache.add_to_cache(identity("a"), "t1", idle_fetch).unwrap();
        let (referenced, _) = cache.reference_or_add(identity("b"), "t1", idle_fetch);
        for record in [added, referenced] {
            let found = cache.get(record.key()).expect("indexed");
            assert!(found.completion().is_some());
        }
    }

    #[tokio::test]
    async fn test_last_reference_cancels_fetch() {
        let cache = QueryCache::new();
        let (record, _) = cache.reference_or_add(identity("app"), "t1", idle_fetch);
        cache.reference_or_add(identity("app"), "t2", idle_fetch);

        assert!(!cache.remove_from_cache_by_key(record.key(), "t1").unwrap());
        assert!(cache.in_cache(&identity("app")));
        assert_eq!(record.references(), 1);

        assert!(cache.remove_from_cache_by_key(record.key(), "t2").unwrap());
        assert!(cache.is_empty());
        assert_eq!(settle(&record).await, FetchStatus::Canceled);
        assert!(matches!(
            cache.remove_from_cache_by_key(record.key(), "t2"),
            Err(CacheError::MissingKey(_))
        ));
    }

    #[tokio::test]
    async fn test_force_remove_leaves_old_holders_alone() {
        let cache = QueryCache::new();
        let (old, _) = cache.reference_or_add(identity("app"), "t1", idle_fetch);
        assert!(cache.force_remove_from_cache(&identity("app")).is_some());
        let (new, created) = cache.reference_or_add(identity("app"), "t2", idle_fetch);
        assert!(created);
        assert!(!Arc::ptr_eq(&old, &new));

        // Releasing the orphan must not evict the fresh entry.
        assert!(cache.release(&old, "t1"));
        assert!(cache.in_cache(&identity("app")));
        assert_eq!(settle(&old).await, FetchStatus::Canceled);
    }
}
