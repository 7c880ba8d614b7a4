//! `eval`: compute a column per row.

use super::draft::RowDraft;
use super::expr::Evaluator;
use crate::query::ast::EvalStage;
use sift_core::DisplayResults;

pub fn apply(mut results: DisplayResults, stage: &EvalStage) -> DisplayResults {
    let mut evaluator = Evaluator::new();
    let mut draft = RowDraft::new(results.current_rows());
    for i in 0..draft.rows().len() {
        let value = evaluator.eval(&stage.expr, &draft.rows()[i]);
        draft.set(i, stage.target.clone(), value);
    }
    let rows = draft.commit();

    match results.table.as_mut() {
        Some(table) => {
            table.rows = rows;
            if !table.columns.contains(&stage.target) {
                table.columns.push(stage.target.clone());
            }
        }
        None => results.events = rows,
    }
    results.view = None;
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{BinaryOp, Expr};
    use sift_core::{Field, Record, TableView};
    use std::sync::Arc;

    fn stage(target: &str, expr: Expr) -> EvalStage {
        EvalStage {
            target: target.into(),
            expr,
        }
    }

    #[test]
    fn test_eval_writes_new_records() {
        let original = Arc::new(Record::new("x").with_field("a", 2.0));
        let expr = Expr::binary(BinaryOp::Mul, Expr::column("a"), Expr::number(10.0));
        let out = apply(
            DisplayResults::from_events(vec![Arc::clone(&original)]),
            &stage("b", expr),
        );
        assert_eq!(out.events[0].get("b"), Some(&Field::number(20.0)));
        assert!(original.get("b").is_none());
    }

    #[test]
    fn test_eval_appends_table_column_once() {
        let rows = vec![Arc::new(Record::new("").with_field("a", 1.0))];
        let results = DisplayResults {
            events: Vec::new(),
            table: Some(TableView {
                columns: vec!["a".into()],
                rows,
            }),
            view: None,
        };
        let out = apply(results, &stage("a", Expr::number(5.0)));
        let out = apply(out, &stage("c", Expr::column("a")));
        let table = out.table.expect("table");
        assert_eq!(table.columns, vec!["a", "c"]);
        assert_eq!(table.rows[0].display("c"), "5");
    }
}
