//! Time index over a task's event list, and the event histogram.

use serde::{Deserialize, Serialize};
use sift_core::Record;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Ordered `_time → position` map over an event list sorted by descending
/// time. Each timestamp maps to its first position.
#[derive(Debug, Clone, Default)]
pub struct TimeIndex {
    by_time: BTreeMap<i64, usize>,
}

impl TimeIndex {
    pub fn build(events: &[Arc<Record>]) -> Self {
        let mut by_time = BTreeMap::new();
        for (position, event) in events.iter().enumerate() {
            if let Some(t) = event.time() {
                by_time.entry(t).or_insert(position);
            }
        }
        Self { by_time }
    }

    pub fn len(&self) -> usize {
        self.by_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_time.is_empty()
    }

    /// The indexed timestamp nearest `ts` and its position. Ties go to the
    /// lower timestamp.
    pub fn closest(&self, ts: i64) -> Option<(i64, usize)> {
        let below = self.by_time.range(..=ts).next_back();
        let above = self.by_time.range(ts..).next();
        match (below, above) {
            (Some((&lo, &lo_pos)), Some((&hi, &hi_pos))) => {
                let lo_dist = (ts as i128) - (lo as i128);
                let hi_dist = (hi as i128) - (ts as i128);
                if hi_dist < lo_dist {
                    Some((hi, hi_pos))
                } else {
                    Some((lo, lo_pos))
                }
            }
            (Some((&t, &pos)), None) | (None, Some((&t, &pos))) => Some((t, pos)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub start: i64,
    pub count: usize,
}

/// Event counts over the task's time range in equal-width buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram {
    /// Bucket width in milliseconds.
    pub scale: i64,
    pub buckets: Vec<HistogramBucket>,
}

impl Histogram {
    pub fn build(events: &[Arc<Record>], from: i64, to: i64, buckets: usize) -> Self {
        let range = to.saturating_sub(from);
        if range <= 0 || buckets == 0 {
            return Self::default();
        }
        let n = buckets as i64;
        let scale = ((range + n - 1) / n).max(1);
        let count = ((range + scale - 1) / scale) as usize;

        let mut out: Vec<HistogramBucket> = (0..count)
            .map(|i| HistogramBucket {
                start: from + i as i64 * scale,
                count: 0,
            })
            .collect();
        for t in events.iter().filter_map(|e| e.time()) {
            if t < from || t >= to {
                continue;
            }
            if let Some(bucket) = out.get_mut(((t - from) / scale) as usize) {
                bucket.count += 1;
            }
        }
        Self {
            scale,
            buckets: out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn events(times: &[i64]) -> Vec<Arc<Record>> {
        let mut times = times.to_vec();
        times.sort_unstable_by(|a, b| b.cmp(a));
        times
            .into_iter()
            .map(|t| Arc::new(Record::new("").with_time(t)))
            .collect()
    }

    #[test]
    fn test_closest_prefers_lower_on_tie() {
        let index = TimeIndex::build(&events(&[10, 20, 40]));
        assert_eq!(index.closest(30), Some((20, 1)));
        assert_eq!(index.closest(31), Some((40, 0)));
        assert_eq!(index.closest(20), Some((20, 1)));
        assert_eq!(index.closest(-5), Some((10, 2)));
        assert_eq!(index.closest(1_000), Some((40, 0)));
        assert_eq!(TimeIndex::default().closest(0), None);
    }

    #[test]
    fn test_duplicate_times_map_to_first_position() {
        let index = TimeIndex::build(&events(&[5, 5, 5, 1]));
        assert_eq!(index.len(), 2);
        assert_eq!(index.closest(5), Some((5, 0)));
    }

    #[test]
    fn test_histogram_buckets() {
        let h = Histogram::build(&events(&[0, 5, 9, 10, 99, 100, -1]), 0, 100, 10);
        assert_eq!(h.scale, 10);
        assert_eq!(h.buckets.len(), 10);
        assert_eq!(h.buckets[0].count, 3);
        assert_eq!(h.buckets[1].count, 1);
        assert_eq!(h.buckets[9], HistogramBucket { start: 90, count: 1 });
        assert_eq!(Histogram::build(&[], 10, 10, 10), Histogram::default());
    }

    proptest! {
        #[test]
        fn prop_closest_minimises_distance(
            times in proptest::collection::vec(-1_000i64..1_000, 1..40),
            ts in -1_200i64..1_200,
        ) {
            let index = TimeIndex::build(&events(&times));
            let (found, _) = index.closest(ts).unwrap();
            let best = times.iter().map(|t| (t - ts).abs()).min().unwrap();
            prop_assert_eq!((found - ts).abs(), best);
            // No strictly lower timestamp is equally close.
            prop_assert!(!times.iter().any(|t| *t < found && (t - ts).abs() == best));
        }
    }
}
