//! `where`: drop rows whose condition is not truthy.

use super::expr::Evaluator;
use crate::query::ast::WhereStage;
use sift_core::{DisplayResults, Record};
use std::sync::Arc;

pub fn apply(mut results: DisplayResults, stage: &WhereStage) -> DisplayResults {
    let mut evaluator = Evaluator::new();
    let mut keep = |rows: &mut Vec<Arc<Record>>| {
        rows.retain(|row| evaluator.test(&stage.expr, row));
    };

    keep(&mut results.events);
    if let Some(table) = results.table.as_mut() {
        keep(&mut table.rows);
    }
    results.view = None;
    results
}
