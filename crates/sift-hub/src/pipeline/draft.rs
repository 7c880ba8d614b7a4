//! Copy-on-write row editing for stages that add fields.
//!
//! Rows are shared `Arc<Record>`s that other tasks and the cache may still
//! hold, so stages never mutate them. A [`RowDraft`] keeps the shared rows
//! untouched and records field writes in a patch list; [`RowDraft::commit`]
//! then builds new records only for the rows that were written.

use sift_core::{Field, Record};
use std::sync::Arc;

struct Patch {
    row: usize,
    column: String,
    value: Field,
}

pub struct RowDraft {
    base: Vec<Arc<Record>>,
    patches: Vec<Patch>,
}

impl RowDraft {
    pub fn new(rows: &[Arc<Record>]) -> Self {
        Self {
            base: rows.to_vec(),
            patches: Vec::new(),
        }
    }

    /// The rows as they were before any write.
    pub fn rows(&self) -> &[Arc<Record>] {
        &self.base
    }

    /// Queue a field write. Later writes to the same column win.
    pub fn set(&mut self, row: usize, column: impl Into<String>, value: Field) {
        if row < self.base.len() {
            self.patches.push(Patch {
                row,
                column: column.into(),
                value,
            });
        }
    }

    pub fn patched_rows(&self) -> usize {
        let mut rows: Vec<usize> = self.patches.iter().map(|p| p.row).collect();
        rows.sort_unstable();
        rows.dedup();
        rows.len()
    }

    /// Apply all patches. Unpatched rows keep their original `Arc`.
    pub fn commit(self) -> Vec<Arc<Record>> {
        let RowDraft { mut base, mut patches } = self;
        // Stable, so writes to one row keep their order.
        patches.sort_by_key(|p| p.row);

        let mut iter = patches.into_iter().peekable();
        while let Some(first) = iter.next() {
            let row = first.row;
            let mut record = Record::clone(&base[row]);
            record.set(first.column, first.value);
            while let Some(next) = iter.next_if(|p| p.row == row) {
                record.set(next.column, next.value);
            }
            base[row] = Arc::new(record);
        }
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpatched_rows_are_shared() {
        let rows = vec![
            Arc::new(Record::new("a")),
            Arc::new(Record::new("b")),
        ];
        let mut draft = RowDraft::new(&rows);
        draft.set(1, "x", Field::number(1.0));
        assert_eq!(draft.patched_rows(), 1);

        let out = draft.commit();
        assert!(Arc::ptr_eq(&out[0], &rows[0]));
        assert!(!Arc::ptr_eq(&out[1], &rows[1]));
        assert_eq!(out[1].get("x"), Some(&Field::number(1.0)));
        assert!(rows[1].get("x").is_none());
    }

    #[test]
    fn test_later_writes_win() {
        let rows = vec![Arc::new(Record::new("a"))];
        let mut draft = RowDraft::new(&rows);
        draft.set(0, "user", Field::string("first"));
        draft.set(0, "user", Field::string("second"));
        let out = draft.commit();
        assert_eq!(out[0].display("user"), "second");
    }
}
