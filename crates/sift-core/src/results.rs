//! Pipeline output views.

use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A tabular view: an ordered column schema plus rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableView {
    pub columns: Vec<String>,
    pub rows: Vec<Arc<Record>>,
}

/// One plotted series in a [`ChartView`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub color: String,
}

/// One x-axis position with a value per series (absent = no data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub timestamp: i64,
    pub values: BTreeMap<String, f64>,
}

/// A time-chart view produced by the `timechart` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartView {
    pub x_axis: String,
    pub series: Vec<Series>,
    pub points: Vec<ChartPoint>,
}

/// The result of one pipeline run.
///
/// `events` always holds the (possibly filtered) event list; `table` is set
/// once a tabular stage ran; `view` is only set by a trailing `timechart`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayResults {
    pub events: Vec<Arc<Record>>,
    pub table: Option<TableView>,
    pub view: Option<ChartView>,
}

impl DisplayResults {
    pub fn from_events(events: Vec<Arc<Record>>) -> Self {
        Self {
            events,
            table: None,
            view: None,
        }
    }

    /// The rows a following stage reads: the table if there is one, else the
    /// events.
    pub fn current_rows(&self) -> &[Arc<Record>] {
        match &self.table {
            Some(table) => &table.rows,
            None => &self.events,
        }
    }
}
