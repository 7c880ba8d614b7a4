//! Table export as CSV or JSON.

use serde::{Deserialize, Serialize};
use sift_core::TableView;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv => write!(f, "csv"),
            Self::Json => write!(f, "json"),
        }
    }
}

pub fn export_table(table: &TableView, format: ExportFormat) -> String {
    match format {
        ExportFormat::Csv => to_csv(table),
        ExportFormat::Json => to_json(table),
    }
}

/// RFC 4180: header row, CRLF line endings, fields quoted when needed.
fn to_csv(table: &TableView) -> String {
    let mut out = String::new();
    push_csv_row(&mut out, table.columns.iter().map(String::as_str));
    for row in &table.rows {
        let cells: Vec<String> = table.columns.iter().map(|c| row.display(c)).collect();
        push_csv_row(&mut out, cells.iter().map(String::as_str));
    }
    out
}

fn push_csv_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if cell.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(cell);
        }
    }
    out.push_str("\r\n");
}

/// Array of objects, one per row; absent cells are `null`.
fn to_json(table: &TableView) -> String {
    let rows: Vec<serde_json::Value> = table
        .rows
        .iter()
        .map(|row| {
            let object: serde_json::Map<String, serde_json::Value> = table
                .columns
                .iter()
                .map(|column| {
                    let value = row
                        .get(column)
                        .map(|f| f.to_json())
                        .unwrap_or(serde_json::Value::Null);
                    (column.clone(), value)
                })
                .collect();
            serde_json::Value::Object(object)
        })
        .collect();
    format!("{:#}", serde_json::Value::Array(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::Record;
    use std::sync::Arc;

    fn table() -> TableView {
        TableView {
            columns: vec!["host".into(), "note".into(), "count".into()],
            rows: vec![
                Arc::new(
                    Record::new("")
                        .with_field("host", "web-1")
                        .with_field("note", "say \"hi\", then leave")
                        .with_field("count", 3.0),
                ),
                Arc::new(Record::new("").with_field("host", "web-2")),
            ],
        }
    }

    #[test]
    fn test_csv_quotes_special_cells() {
        let csv = export_table(&table(), ExportFormat::Csv);
        assert_eq!(
            csv,
            "host,note,count\r\nweb-1,\"say \"\"hi\"\", then leave\",3\r\nweb-2,,\r\n"
        );
    }

    #[test]
    fn test_json_rows_keep_types() {
        let json = export_table(&table(), ExportFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["count"], serde_json::json!(3.0));
        assert_eq!(value[1]["note"], serde_json::Value::Null);
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>(), Ok(ExportFormat::Csv));
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
