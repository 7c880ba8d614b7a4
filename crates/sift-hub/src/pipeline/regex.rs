//! `regex`: extract named capture groups into fields.

use super::draft::RowDraft;
use crate::error::StageError;
use crate::query::ast::RegexStage;
use sift_core::{DisplayResults, Field};

pub fn apply(mut results: DisplayResults, stage: &RegexStage) -> Result<DisplayResults, StageError> {
    let re = regex::Regex::new(&stage.pattern).map_err(|e| StageError::InvalidRegex {
        stage: "regex",
        message: e.to_string(),
    })?;
    let names: Vec<&str> = re.capture_names().flatten().collect();

    let mut draft = RowDraft::new(results.current_rows());
    for i in 0..draft.rows().len() {
        let row = &draft.rows()[i];
        let text = match &stage.field {
            Some(field) => row.display(field),
            None => row.message.clone(),
        };
        let mut writes = Vec::new();
        for caps in re.captures_iter(&text) {
            for name in &names {
                if let Some(m) = caps.name(name) {
                    writes.push((name.to_string(), Field::string(m.as_str())));
                }
            }
        }
        for (name, value) in writes {
            draft.set(i, name, value);
        }
    }
    let rows = draft.commit();

    match results.table.as_mut() {
        Some(table) => {
            table.rows = rows;
            for name in names {
                if !table.columns.iter().any(|c| c == name) {
                    table.columns.push(name.to_string());
                }
            }
        }
        None => results.events = rows,
    }
    results.view = None;
    Ok(results)
}
