//! # Pipeline Stage Engine
//!
//! Runs the `| stage | stage ...` part of a query over an in-memory record
//! set. Each stage takes the previous [`DisplayResults`] and returns a new
//! one; stages read the table when a tabular stage already ran, else the
//! events. Only `timechart` produces a chart view; every other stage clears
//! it.

pub mod draft;
pub mod expr;
pub mod filter;
pub mod regex;
pub mod sort;
pub mod stats;
pub mod table;
pub mod eval;
pub mod timechart;

use crate::error::StageError;
use crate::query::ast::Stage;
use sift_core::{DisplayResults, Record};
use std::sync::Arc;

/// Time range of the query, in epoch milliseconds (`to` exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineContext {
    pub from: i64,
    pub to: i64,
}

/// Apply a single stage.
pub fn apply_stage(
    results: DisplayResults,
    stage: &Stage,
    ctx: &PipelineContext,
) -> Result<DisplayResults, StageError> {
    match stage {
        Stage::Table(s) => Ok(table::apply(results, s)),
        Stage::Stats(s) => stats::apply(results, s),
        Stage::Regex(s) => regex::apply(results, s),
        Stage::Sort(s) => Ok(sort::apply(results, s)),
        Stage::Where(s) => Ok(filter::apply(results, s)),
        Stage::TimeChart(s) => timechart::apply(results, s, ctx),
        Stage::Eval(s) => Ok(eval::apply(results, s)),
    }
}

/// Run all stages over `events`. The first failing stage aborts the run.
pub fn run_pipeline(
    events: Vec<Arc<Record>>,
    stages: &[Stage],
    ctx: &PipelineContext,
) -> Result<DisplayResults, StageError> {
    stages
        .iter()
        .try_fold(DisplayResults::from_events(events), |results, stage| {
            apply_stage(results, stage, ctx)
        })
}
