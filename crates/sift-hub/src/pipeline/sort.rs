//! `sort`: stable multi-key ordering.

use crate::query::ast::{SortDirection, SortStage};
use sift_core::{DisplayResults, Field, Record};
use std::cmp::Ordering;
use std::sync::Arc;

pub fn apply(mut results: DisplayResults, stage: &SortStage) -> DisplayResults {
    match results.table.as_mut() {
        Some(table) => sort_rows(&mut table.rows, stage),
        None => sort_rows(&mut results.events, stage),
    }
    results.view = None;
    results
}

fn sort_rows(rows: &mut [Arc<Record>], stage: &SortStage) {
    let absent = Field::null();
    rows.sort_by(|a, b| {
        for key in &stage.keys {
            let x = a.get(&key.column).unwrap_or(&absent);
            let y = b.get(&key.column).unwrap_or(&absent);
            let ord = match key.direction {
                SortDirection::Asc => x.cmp_natural(y),
                SortDirection::Desc => y.cmp_natural(x),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}
