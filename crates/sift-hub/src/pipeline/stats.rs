//! `stats`: grouped aggregation into a table.

use crate::error::StageError;
use crate::query::ast::{AggCall, AggFunc, StatsStage};
use sift_core::{DisplayResults, Field, Record, TableView};
use std::collections::HashMap;
use std::sync::Arc;

pub fn apply(results: DisplayResults, stage: &StatsStage) -> Result<DisplayResults, StageError> {
    let table = aggregate(
        results.current_rows(),
        &stage.aggregations,
        &stage.by,
        "stats",
    )?;
    Ok(DisplayResults {
        events: results.events,
        table: Some(table),
        view: None,
    })
}

/// Grouping key of a row: the display strings of the `by` columns.
pub(crate) fn group_key(row: &Record, by: &[String]) -> String {
    by.iter()
        .map(|column| row.display(column))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Split rows into groups in first-appearance order.
pub(crate) fn group_rows<'a>(
    rows: impl IntoIterator<Item = &'a Arc<Record>>,
    by: &[String],
) -> Vec<(String, Vec<&'a Arc<Record>>)> {
    let mut groups: Vec<(String, Vec<&'a Arc<Record>>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let key = group_key(row, by);
        match index.get(&key) {
            Some(&i) => groups[i].1.push(row),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![row]));
            }
        }
    }
    groups
}

/// Build one output row per group: the `by` columns followed by one column
/// per aggregation.
pub(crate) fn aggregate(
    rows: &[Arc<Record>],
    aggregations: &[AggCall],
    by: &[String],
    stage: &'static str,
) -> Result<TableView, StageError> {
    let groups = if by.is_empty() {
        vec![(String::new(), rows.iter().collect())]
    } else {
        group_rows(rows, by)
    };

    let mut out = Vec::with_capacity(groups.len());
    for (_, members) in &groups {
        let mut record = Record::new("");
        if let Some(first) = members.first() {
            for column in by {
                let value = first.get(column).cloned().unwrap_or_default();
                record.set(column.clone(), value);
            }
        }
        for agg in aggregations {
            record.set(agg.output_name(), compute(agg, members, stage)?);
        }
        out.push(Arc::new(record));
    }

    let columns = by
        .iter()
        .cloned()
        .chain(aggregations.iter().map(AggCall::output_name))
        .collect();
    Ok(TableView { columns, rows: out })
}

/// Apply one aggregation to a group.
pub(crate) fn compute(
    agg: &AggCall,
    rows: &[&Arc<Record>],
    stage: &'static str,
) -> Result<Field, StageError> {
    let Some(column) = agg.column.as_deref() else {
        return Ok(match agg.func {
            AggFunc::Count => Field::number(rows.len() as f64),
            _ => Field::null(),
        });
    };

    let present = rows
        .iter()
        .filter_map(|row| row.get(column))
        .filter(|field| !field.is_null());

    match agg.func {
        AggFunc::Count => Ok(Field::number(present.count() as f64)),
        AggFunc::First => Ok(present.cloned().next().unwrap_or_default()),
        AggFunc::Last => Ok(present.cloned().last().unwrap_or_default()),
        AggFunc::Sum | AggFunc::Avg | AggFunc::Min | AggFunc::Max => {
            let mut values = Vec::new();
            for field in present {
                match field.as_number() {
                    Some(n) => values.push(n),
                    None => {
                        return Err(StageError::NonNumeric {
                            stage,
                            column: column.to_string(),
                            value: field.display(),
                        })
                    }
                }
            }
            Ok(numeric_aggregate(agg.func, &values))
        }
    }
}

fn numeric_aggregate(func: AggFunc, values: &[f64]) -> Field {
    if values.is_empty() {
        return match func {
            AggFunc::Sum => Field::number(0.0),
            _ => Field::null(),
        };
    }
    let sum: f64 = values.iter().sum();
    match func {
        AggFunc::Sum => Field::number(sum),
        AggFunc::Avg => Field::number(sum / values.len() as f64),
        AggFunc::Min => Field::number(values.iter().copied().fold(f64::INFINITY, f64::min)),
        _ => Field::number(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
    }
}
