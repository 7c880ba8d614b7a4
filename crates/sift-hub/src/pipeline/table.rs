//! `table`: project and rename columns.

use crate::query::ast::TableStage;
use sift_core::{DisplayResults, Record, TableView};
use std::sync::Arc;

pub fn apply(results: DisplayResults, stage: &TableStage) -> DisplayResults {
    let rows = results
        .current_rows()
        .iter()
        .map(|row| {
            let mut out = Record::new(row.message.clone());
            for column in &stage.columns {
                if let Some(value) = row.get(&column.column) {
                    out.set(column.output_name(), value.clone());
                }
            }
            Arc::new(out)
        })
        .collect();

    let columns = stage
        .columns
        .iter()
        .map(|c| c.output_name().to_string())
        .collect();

    DisplayResults {
        events: results.events,
        table: Some(TableView { columns, rows }),
        view: None,
    }
}
