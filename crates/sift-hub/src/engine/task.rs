//! Per-query task state.

use super::index::{Histogram, TimeIndex};
use crate::cache::{CacheRecord, FetchStatus};
use crate::error::TaskId;
use crate::pipeline::PipelineContext;
use crate::query::ast::Query;
use serde::{Deserialize, Serialize};
use sift_core::DisplayResults;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        self != TaskStatus::Running
    }
}

/// One source's fetch within a task.
pub struct SubTask {
    pub instance: String,
    pub record: Arc<CacheRecord>,
}

/// Results of the last successful pipeline run.
#[derive(Default)]
pub struct TaskState {
    pub results: DisplayResults,
    pub index: TimeIndex,
    pub histogram: Histogram,
    /// Last stage or source error.
    pub error: Option<String>,
}

pub struct QueryTask {
    pub id: TaskId,
    pub text: String,
    pub query: Query,
    pub ctx: PipelineContext,
    pub subtasks: Vec<SubTask>,
    pub cancel: CancellationToken,
    pub state: Mutex<TaskState>,
    status: watch::Sender<TaskStatus>,
    released: AtomicBool,
}

impl QueryTask {
    pub fn new(
        id: TaskId,
        text: String,
        query: Query,
        ctx: PipelineContext,
        subtasks: Vec<SubTask>,
    ) -> Self {
        let (status, _) = watch::channel(TaskStatus::Running);
        Self {
            id,
            text,
            query,
            ctx,
            subtasks,
            cancel: CancellationToken::new(),
            state: Mutex::new(TaskState::default()),
            status,
            released: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> TaskStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<TaskStatus> {
        self.status.subscribe()
    }

    /// Move a running task to `status`. Returns false when the task had
    /// already finished.
    pub fn finish(&self, status: TaskStatus) -> bool {
        self.status.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = status;
            true
        })
    }

    /// Claim the task's cache references for release. Returns true exactly
    /// once.
    pub fn take_references(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    pub fn instances(&self) -> Vec<String> {
        self.subtasks.iter().map(|s| s.instance.clone()).collect()
    }

    pub fn fetches_settled(&self) -> bool {
        self.subtasks
            .iter()
            .all(|s| s.record.status().is_settled())
    }

    pub fn source_statuses(&self) -> Vec<SourceStatus> {
        self.subtasks
            .iter()
            .map(|s| SourceStatus {
                instance: s.instance.clone(),
                cache_key: s.record.key().to_string(),
                status: s.record.status(),
                rows: s.record.data().len(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub instance: String,
    pub cache_key: String,
    pub status: FetchStatus,
    pub rows: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;

    fn task() -> QueryTask {
        let query = parse("error").into_result().unwrap();
        QueryTask::new(
            "task-1".into(),
            "error".into(),
            query,
            PipelineContext { from: 0, to: 10 },
            Vec::new(),
        )
    }

    #[test]
    fn test_finish_only_moves_running_tasks() {
        let task = task();
        assert_eq!(task.status(), TaskStatus::Running);
        assert!(task.finish(TaskStatus::Canceled));
        assert!(!task.finish(TaskStatus::Completed));
        assert_eq!(task.status(), TaskStatus::Canceled);
    }

    #[test]
    fn test_references_are_taken_once() {
        let task = task();
        assert!(task.take_references());
        assert!(!task.take_references());
    }
}
