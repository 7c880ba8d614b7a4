//! Typed field values.
//!
//! A [`Field`] is a tagged value plus an error list. A field with errors is
//! *invalid* but keeps its type, so a pipeline stage can carry a `NaN` or a
//! half-parsed value forward instead of aborting the whole run.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// The value carried by a [`Field`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Absent / null / undefined.
    #[default]
    Null,
    Number(f64),
    String(String),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    Boolean(bool),
    Array(Vec<Field>),
    Object(BTreeMap<String, Field>),
}

/// A typed value with an optional list of errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Field {
    pub value: FieldValue,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

// =============================================================================
// Construction
// =============================================================================

impl Field {
    pub fn new(value: FieldValue) -> Self {
        Self {
            value,
            errors: Vec::new(),
        }
    }

    pub fn null() -> Self {
        Self::new(FieldValue::Null)
    }

    pub fn number(n: f64) -> Self {
        Self::new(FieldValue::Number(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::new(FieldValue::String(s.into()))
    }

    pub fn date(millis: i64) -> Self {
        Self::new(FieldValue::Date(millis))
    }

    pub fn boolean(b: bool) -> Self {
        Self::new(FieldValue::Boolean(b))
    }

    pub fn array(items: Vec<Field>) -> Self {
        Self::new(FieldValue::Array(items))
    }

    pub fn object(entries: BTreeMap<String, Field>) -> Self {
        Self::new(FieldValue::Object(entries))
    }

    /// An invalid number: `NaN` carrying the reason it could not be computed.
    pub fn invalid_number(error: impl Into<String>) -> Self {
        Self::number(f64::NAN).with_error(error)
    }

    /// Attach an error, marking the field invalid.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    /// Convert a JSON value into a field. Strings are kept as strings; callers
    /// that know a column holds timestamps convert it with [`Field::as_date`].
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::null(),
            serde_json::Value::Bool(b) => Self::boolean(*b),
            serde_json::Value::Number(n) => Self::number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::string(s.clone()),
            serde_json::Value::Array(items) => {
                Self::array(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }
}

// =============================================================================
// Inspection and coercion
// =============================================================================

impl Field {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn is_null(&self) -> bool {
        matches!(self.value, FieldValue::Null)
    }

    /// Best-effort numeric view: numbers, numeric strings, dates (as millis)
    /// and booleans are coercible; everything else is not. Strings such as
    /// `NaN` or `inf` are text.
    pub fn as_number(&self) -> Option<f64> {
        match &self.value {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Date(ms) => Some(*ms as f64),
            FieldValue::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            FieldValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Best-effort timestamp view in epoch milliseconds.
    pub fn as_date(&self) -> Option<i64> {
        match &self.value {
            FieldValue::Date(ms) => Some(*ms),
            FieldValue::Number(n) if n.is_finite() => Some(*n as i64),
            FieldValue::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.timestamp_millis())
                .or_else(|| s.trim().parse::<i64>().ok()),
            _ => None,
        }
    }

    /// Truthiness used by `where` and conditional functions.
    pub fn as_bool(&self) -> bool {
        match &self.value {
            FieldValue::Null => false,
            FieldValue::Boolean(b) => *b,
            FieldValue::Number(n) => *n != 0.0 && !n.is_nan(),
            FieldValue::Date(_) => true,
            FieldValue::String(s) => !s.is_empty(),
            FieldValue::Array(items) => !items.is_empty(),
            FieldValue::Object(_) => true,
        }
    }

    /// The canonical display string, used for grouping keys, regex input,
    /// string comparisons and exports.
    pub fn display(&self) -> String {
        match &self.value {
            FieldValue::Null => String::new(),
            FieldValue::Number(n) => format_number(*n),
            FieldValue::String(s) => s.clone(),
            FieldValue::Date(ms) => format_date(*ms),
            FieldValue::Boolean(b) => b.to_string(),
            FieldValue::Array(items) => items
                .iter()
                .map(Field::display)
                .collect::<Vec<_>>()
                .join(","),
            FieldValue::Object(_) => self.to_json().to_string(),
        }
    }

    /// Plain JSON rendering (no type tags), used for exports.
    pub fn to_json(&self) -> serde_json::Value {
        match &self.value {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FieldValue::String(s) => serde_json::Value::String(s.clone()),
            FieldValue::Date(ms) => serde_json::Value::String(format_date(*ms)),
            FieldValue::Boolean(b) => serde_json::Value::Bool(*b),
            FieldValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(Field::to_json).collect())
            }
            FieldValue::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    fn type_rank(&self) -> u8 {
        match &self.value {
            FieldValue::Null => 0,
            FieldValue::Boolean(_) => 1,
            FieldValue::Number(_) | FieldValue::Date(_) => 2,
            FieldValue::String(_) => 3,
            FieldValue::Array(_) => 4,
            FieldValue::Object(_) => 5,
        }
    }

    /// Natural ordering: numbers and dates numerically, strings
    /// lexicographically, booleans `false < true`. Unrelated types fall back
    /// to a fixed rank so the ordering stays total.
    pub fn cmp_natural(&self, other: &Field) -> Ordering {
        match (&self.value, &other.value) {
            (
                FieldValue::Number(_) | FieldValue::Date(_),
                FieldValue::Number(_) | FieldValue::Date(_),
            ) => {
                let a = self.as_number().unwrap_or(f64::NAN);
                let b = other.as_number().unwrap_or(f64::NAN);
                a.total_cmp(&b)
            }
            (FieldValue::String(a), FieldValue::String(b)) => a.cmp(b),
            (FieldValue::Boolean(a), FieldValue::Boolean(b)) => a.cmp(b),
            (FieldValue::Array(a), FieldValue::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.cmp_natural(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (FieldValue::Object(_), FieldValue::Object(_)) => self.display().cmp(&other.display()),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl From<f64> for Field {
    fn from(n: f64) -> Self {
        Self::number(n)
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<String> for Field {
    fn from(s: String) -> Self {
        Self::string(s)
    }
}

impl From<bool> for Field {
    fn from(b: bool) -> Self {
        Self::boolean(b)
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn format_date(ms: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ms.to_string(),
    }
}
