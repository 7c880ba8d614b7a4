//! `timechart`: time-bucketed aggregation with an optional split by group.

use super::stats::{compute, group_key};
use super::PipelineContext;
use crate::error::StageError;
use crate::query::ast::TimeChartStage;
use sift_core::{
    ChartPoint, ChartView, DisplayResults, Field, Record, Series, TableView, TIME_FIELD,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const DEFAULT_MAX_GROUPS: usize = 10;
pub const MAX_AUTO_BUCKETS: i64 = 100;
/// Upper bound on buckets for an explicit `span`.
pub const MAX_BUCKETS: i64 = 10_000;

/// Candidate spans for automatic bucketing, smallest first.
const AUTO_SPANS_MS: [i64; 14] = [
    1_000,
    5_000,
    10_000,
    30_000,
    60_000,
    300_000,
    600_000,
    1_800_000,
    3_600_000,
    10_800_000,
    21_600_000,
    43_200_000,
    86_400_000,
    604_800_000,
];

/// Series colours, cycled in order.
pub const PALETTE: [&str; 10] = [
    "#4e79a7", "#f28e2b", "#e15759", "#76b7b2", "#59a14f", "#edc948", "#b07aa1", "#ff9da7",
    "#9c755f", "#bab0ac",
];

/// Smallest candidate span that covers `range_ms` in at most
/// [`MAX_AUTO_BUCKETS`] buckets.
pub fn auto_span(range_ms: i64) -> i64 {
    AUTO_SPANS_MS
        .into_iter()
        .find(|span| bucket_count(range_ms, *span) <= MAX_AUTO_BUCKETS)
        .unwrap_or(AUTO_SPANS_MS[AUTO_SPANS_MS.len() - 1])
}

fn bucket_count(range_ms: i64, span_ms: i64) -> i64 {
    if range_ms <= 0 {
        0
    } else {
        (range_ms + span_ms - 1) / span_ms
    }
}

pub fn apply(
    results: DisplayResults,
    stage: &TimeChartStage,
    ctx: &PipelineContext,
) -> Result<DisplayResults, StageError> {
    let time_col = stage.time_col.as_deref().unwrap_or(TIME_FIELD);
    let span = stage
        .span
        .map(|s| s.as_millis())
        .unwrap_or_else(|| auto_span(ctx.to - ctx.from))
        .max(1);
    let max_groups = stage.max_groups.unwrap_or(DEFAULT_MAX_GROUPS);
    let buckets = bucket_count(ctx.to - ctx.from, span);
    if buckets > MAX_BUCKETS {
        return Err(StageError::invalid(
            "timechart",
            format!(
                "span of {}ms yields {} buckets over this range (at most {})",
                span, buckets, MAX_BUCKETS
            ),
        ));
    }
    let buckets = buckets as usize;

    // Bucket every in-range row.
    let mut placed: Vec<(usize, &Arc<Record>)> = Vec::new();
    for row in results.current_rows() {
        let Some(t) = row.get(time_col).and_then(Field::as_date) else {
            continue;
        };
        if t < ctx.from || t >= ctx.to {
            continue;
        }
        placed.push((((t - ctx.from) / span) as usize, row));
    }

    // Rank groups by size; ties keep first appearance.
    let mut sizes: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (_, row) in &placed {
        let key = group_key(row, &stage.by);
        match index.get(&key) {
            Some(&i) => sizes[i].1 += 1,
            None => {
                index.insert(key.clone(), sizes.len());
                sizes.push((key, 1));
            }
        }
    }
    sizes.sort_by(|a, b| b.1.cmp(&a.1));
    sizes.truncate(max_groups);
    // Without a split there is exactly one group, even when no row landed.
    let groups: Vec<String> = if stage.by.is_empty() {
        vec![String::new()]
    } else {
        sizes.into_iter().map(|(key, _)| key).collect()
    };
    let group_slot: HashMap<&str, usize> = groups
        .iter()
        .enumerate()
        .map(|(i, g)| (g.as_str(), i))
        .collect();

    // cells[bucket][group] = rows
    let mut cells: Vec<Vec<Vec<&Arc<Record>>>> = vec![vec![Vec::new(); groups.len()]; buckets];
    for (bucket, row) in placed {
        let key = group_key(row, &stage.by);
        if let Some(&slot) = group_slot.get(key.as_str()) {
            if let Some(cell) = cells.get_mut(bucket) {
                cell[slot].push(row);
            }
        }
    }

    let split = !stage.by.is_empty();
    let multi_agg = stage.aggregations.len() > 1;
    let mut series = Vec::new();
    for group in &groups {
        for agg in &stage.aggregations {
            let name = match (split, multi_agg) {
                (true, true) => format!("{}: {}", group, agg.output_name()),
                (true, false) => group.clone(),
                (false, _) => agg.output_name(),
            };
            series.push(name);
        }
    }

    let mut rows = Vec::with_capacity(buckets);
    let mut points = Vec::with_capacity(buckets);
    for (bucket, cell) in cells.iter().enumerate() {
        let timestamp = ctx.from + bucket as i64 * span;
        let mut record = Record::new("").with_time(timestamp);
        let mut values = BTreeMap::new();
        let mut names = series.iter();
        for members in cell {
            for agg in &stage.aggregations {
                let value = compute(agg, members, "timechart")?;
                let Some(name) = names.next() else {
                    continue;
                };
                if let Some(n) = value.as_number() {
                    values.insert(name.clone(), n);
                }
                if !value.is_null() {
                    record.set(name.clone(), value);
                }
            }
        }
        rows.push(Arc::new(record));
        points.push(ChartPoint { timestamp, values });
    }

    let mut columns = vec![TIME_FIELD.to_string()];
    columns.extend(series.iter().cloned());
    let view = ChartView {
        x_axis: TIME_FIELD.to_string(),
        series: series
            .into_iter()
            .enumerate()
            .map(|(i, name)| Series {
                name,
                color: PALETTE[i % PALETTE.len()].to_string(),
            })
            .collect(),
        points,
    };

    Ok(DisplayResults {
        events: results.events,
        table: Some(TableView { columns, rows }),
        view: Some(view),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{AggCall, AggFunc, SpanUnit, TimeSpan};

    const MIN: i64 = 60_000;

    fn event(t: i64, host: &str, latency: f64) -> Arc<Record> {
        Arc::new(
            Record::new("")
                .with_time(t)
                .with_field("host", host)
                .with_field("latency", latency),
        )
    }

    fn stage(aggs: Vec<AggCall>, by: &[&str]) -> TimeChartStage {
        TimeChartStage {
            span: Some(TimeSpan::new(1, SpanUnit::Minutes)),
            time_col: None,
            max_groups: None,
            aggregations: aggs,
            by: by.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_auto_span_picks_smallest_fitting_candidate() {
        assert_eq!(auto_span(100_000), 1_000);
        assert_eq!(auto_span(3_600_000), 60_000);
        assert_eq!(auto_span(86_400_000), 1_800_000);
        assert_eq!(auto_span(i64::MAX / 2), 604_800_000);
    }

    #[test]
    fn test_buckets_cover_range_and_skip_outside_rows() {
        let ctx = PipelineContext { from: 0, to: 3 * MIN };
        let events = vec![
            event(0, "a", 1.0),
            event(30_000, "a", 1.0),
            event(2 * MIN + 1, "a", 1.0),
            event(3 * MIN, "a", 1.0),
            event(-1, "a", 1.0),
        ];
        let out = apply(
            DisplayResults::from_events(events),
            &stage(vec![AggCall::new(AggFunc::Count, None)], &[]),
            &ctx,
        )
        .unwrap();

        let view = out.view.expect("chart view");
        assert_eq!(view.x_axis, "_time");
        assert_eq!(view.series.len(), 1);
        assert_eq!(view.series[0].name, "count");
        assert_eq!(view.series[0].color, PALETTE[0]);
        let counts: Vec<f64> = view.points.iter().map(|p| p.values["count"]).collect();
        assert_eq!(counts, vec![2.0, 0.0, 1.0]);

        let table = out.table.expect("table");
        assert_eq!(table.columns, vec!["_time", "count"]);
        assert_eq!(table.rows[1].time(), Some(MIN));
    }

    #[test]
    fn test_explicit_span_with_too_many_buckets_fails() {
        let ctx = PipelineContext { from: 0, to: 30 * 24 * 60 * MIN };
        let mut st = stage(vec![AggCall::new(AggFunc::Count, None)], &[]);
        st.span = Some(TimeSpan::new(1, SpanUnit::Seconds));
        let err = apply(DisplayResults::from_events(vec![event(1, "a", 1.0)]), &st, &ctx)
            .unwrap_err();
        assert!(err.to_string().starts_with("timechart: span of 1000ms"));

        st.span = Some(TimeSpan::new(1, SpanUnit::Hours));
        assert!(apply(DisplayResults::from_events(Vec::new()), &st, &ctx).is_ok());
    }

    #[test]
    fn test_groups_are_ranked_and_capped() {
        let ctx = PipelineContext { from: 0, to: MIN };
        let events = vec![
            event(1, "rare", 1.0),
            event(2, "busy", 1.0),
            event(3, "busy", 1.0),
            event(4, "mid", 1.0),
            event(5, "mid", 1.0),
            event(6, "busy", 1.0),
        ];
        let mut st = stage(vec![AggCall::new(AggFunc::Count, None)], &["host"]);
        st.max_groups = Some(2);
        let out = apply(DisplayResults::from_events(events), &st, &ctx).unwrap();
        let names: Vec<_> = out
            .view
            .expect("view")
            .series
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["busy", "mid"]);
    }

    #[test]
    fn test_series_names_when_groups_and_aggregations_vary() {
        let ctx = PipelineContext { from: 0, to: MIN };
        let events = vec![event(1, "a", 10.0), event(2, "b", 20.0)];
        let st = stage(
            vec![
                AggCall::new(AggFunc::Count, None),
                AggCall::new(AggFunc::Avg, Some("latency")),
            ],
            &["host"],
        );
        let out = apply(DisplayResults::from_events(events), &st, &ctx).unwrap();
        let view = out.view.expect("view");
        let names: Vec<_> = view.series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a: count", "a: avg(latency)", "b: count", "b: avg(latency)"]);
        assert_eq!(view.points[0].values["b: avg(latency)"], 20.0);
        assert_eq!(view.series[3].color, PALETTE[3]);
    }
}
