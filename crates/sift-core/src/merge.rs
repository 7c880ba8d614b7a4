//! Ordering primitives for time-sorted record lists.
//!
//! Every list handled here is sorted by descending `_time`. Records without a
//! timestamp sort after all timestamped ones. All merges are stable: for
//! equal timestamps, records of an earlier input come first and records of
//! the same input keep their relative order.

use crate::record::Record;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

#[inline]
fn time_key(record: &Record) -> i64 {
    record.time().unwrap_or(i64::MIN)
}

/// Stable sort by descending `_time`.
pub fn sort_desc(rows: &mut [Arc<Record>]) {
    rows.sort_by_key(|r| Reverse(time_key(r)));
}

/// Merge two descending lists. Ties keep `a` first.
pub fn merge_sorted_desc(a: &[Arc<Record>], b: &[Arc<Record>]) -> Vec<Arc<Record>> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if time_key(&b[j]) > time_key(&a[i]) {
            out.push(Arc::clone(&b[j]));
            j += 1;
        } else {
            out.push(Arc::clone(&a[i]));
            i += 1;
        }
    }
    out.extend(a[i..].iter().cloned());
    out.extend(b[j..].iter().cloned());
    out
}

#[derive(PartialEq, Eq)]
struct HeapEntry {
    time: i64,
    list: usize,
    pos: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap on time; for equal times the lower list index wins.
        self.time
            .cmp(&other.time)
            .then_with(|| other.list.cmp(&self.list))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Stable k-way merge of descending lists.
pub fn kway_merge_desc(lists: &[&[Arc<Record>]]) -> Vec<Arc<Record>> {
    match lists.len() {
        0 => return Vec::new(),
        1 => return lists[0].to_vec(),
        2 => return merge_sorted_desc(lists[0], lists[1]),
        _ => {}
    }

    let total = lists.iter().map(|l| l.len()).sum();
    let mut out = Vec::with_capacity(total);
    let mut heap = BinaryHeap::with_capacity(lists.len());

    for (list, rows) in lists.iter().enumerate() {
        if let Some(first) = rows.first() {
            heap.push(HeapEntry {
                time: time_key(first),
                list,
                pos: 0,
            });
        }
    }

    while let Some(HeapEntry { list, pos, .. }) = heap.pop() {
        let rows = lists[list];
        out.push(Arc::clone(&rows[pos]));
        if let Some(next) = rows.get(pos + 1) {
            heap.push(HeapEntry {
                time: time_key(next),
                list,
                pos: pos + 1,
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rows(times: &[i64], tag: &str) -> Vec<Arc<Record>> {
        times
            .iter()
            .map(|t| Arc::new(Record::new(tag).with_time(*t)))
            .collect()
    }

    fn times(rows: &[Arc<Record>]) -> Vec<i64> {
        rows.iter().map(|r| r.time().unwrap_or(i64::MIN)).collect()
    }

    #[test]
    fn test_two_way_merge_prefers_left_on_ties() {
        let a = rows(&[5, 3], "a");
        let b = rows(&[5, 4], "b");
        let merged = merge_sorted_desc(&a, &b);
        assert_eq!(times(&merged), vec![5, 5, 4, 3]);
        assert_eq!(merged[0].message, "a");
        assert_eq!(merged[1].message, "b");
    }

    #[test]
    fn test_untimed_records_sort_last() {
        let mut list = vec![
            Arc::new(Record::new("none")),
            Arc::new(Record::new("t").with_time(1)),
        ];
        sort_desc(&mut list);
        assert_eq!(list[0].message, "t");
        assert_eq!(list[1].message, "none");
    }

    #[test]
    fn test_kway_merge_is_stable_across_lists() {
        let a = rows(&[9, 1], "a");
        let b = rows(&[9, 5], "b");
        let c = rows(&[9, 7], "c");
        let merged = kway_merge_desc(&[&a, &b, &c]);
        assert_eq!(times(&merged), vec![9, 9, 9, 7, 5, 1]);
        let tags: Vec<_> = merged.iter().take(3).map(|r| r.message.as_str()).collect();
        assert_eq!(tags, vec!["a", "b", "c"]);
    }

    proptest! {
        #[test]
        fn prop_kway_merge_is_globally_descending(
            mut sources in proptest::collection::vec(
                proptest::collection::vec(-1_000i64..1_000, 0..40),
                0..6,
            )
        ) {
            let lists: Vec<Vec<Arc<Record>>> = sources
                .iter_mut()
                .map(|s| {
                    s.sort_unstable_by(|a, b| b.cmp(a));
                    rows(s, "p")
                })
                .collect();
            let refs: Vec<&[Arc<Record>]> = lists.iter().map(|l| l.as_slice()).collect();
            let merged = kway_merge_desc(&refs);

            let expected_len: usize = sources.iter().map(|s| s.len()).sum();
            prop_assert_eq!(merged.len(), expected_len);
            let t = times(&merged);
            prop_assert!(t.windows(2).all(|w| w[0] >= w[1]));
        }
    }
}
