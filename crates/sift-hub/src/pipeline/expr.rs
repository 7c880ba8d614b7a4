//! Expression evaluation for `where` and `eval`.
//!
//! Evaluation never fails: arithmetic on values that are not numbers, or a
//! division by zero, yields an invalid number (`NaN` with an error) that
//! later stages can still carry or filter out.

use crate::query::ast::{BinaryOp, Expr, Function, Literal};
use sift_core::{Field, FieldValue, Record};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Evaluates expressions against records, caching regexes compiled for
/// `match()`.
#[derive(Default)]
pub struct Evaluator {
    regexes: HashMap<String, Result<regex::Regex, String>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eval(&mut self, expr: &Expr, record: &Record) -> Field {
        match expr {
            Expr::Literal(lit) => literal_field(lit),
            Expr::Column(name) => record.get(name).cloned().unwrap_or_default(),
            Expr::Not(inner) => Field::boolean(!self.eval(inner, record).as_bool()),
            Expr::Neg(inner) => {
                let value = self.eval(inner, record);
                numeric(&value, "-").map_or_else(|e| e, |n| Field::number(-n))
            }
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let ok = self.eval(left, record).as_bool() && self.eval(right, record).as_bool();
                    Field::boolean(ok)
                }
                BinaryOp::Or => {
                    let ok = self.eval(left, record).as_bool() || self.eval(right, record).as_bool();
                    Field::boolean(ok)
                }
                _ => {
                    let l = self.eval(left, record);
                    let r = self.eval(right, record);
                    binary(*op, &l, &r)
                }
            },
            Expr::In { expr, list } => {
                let value = self.eval(expr, record);
                let found = list
                    .iter()
                    .any(|lit| compare(BinaryOp::Eq, &value, &literal_field(lit)));
                Field::boolean(found)
            }
            Expr::Call { func, args } => self.call(*func, args, record),
        }
    }

    /// Truthiness of `expr`, as used by `where`.
    pub fn test(&mut self, expr: &Expr, record: &Record) -> bool {
        self.eval(expr, record).as_bool()
    }

    fn call(&mut self, func: Function, args: &[Expr], record: &Record) -> Field {
        // Lazily evaluated functions first.
        match func {
            Function::If => {
                let branch = if self.arg(args, 0, record).as_bool() { 1 } else { 2 };
                return self.arg(args, branch, record);
            }
            Function::Case => {
                let mut pairs = args.chunks_exact(2);
                for pair in pairs.by_ref() {
                    if self.eval(&pair[0], record).as_bool() {
                        return self.eval(&pair[1], record);
                    }
                }
                return match pairs.remainder() {
                    [default] => self.eval(default, record),
                    _ => Field::null(),
                };
            }
            Function::Coalesce => {
                for arg in args {
                    let value = self.eval(arg, record);
                    if !value.is_null() {
                        return value;
                    }
                }
                return Field::null();
            }
            _ => {}
        }

        let values: Vec<Field> = args.iter().map(|a| self.eval(a, record)).collect();
        let first = values.first().cloned().unwrap_or_default();
        let second = values.get(1).cloned().unwrap_or_default();

        match func {
            Function::Contains => text_test(&first, &second, |a, b| a.contains(b)),
            Function::StartsWith => text_test(&first, &second, |a, b| a.starts_with(b)),
            Function::EndsWith => text_test(&first, &second, |a, b| a.ends_with(b)),
            Function::Match => {
                if first.is_null() {
                    return Field::boolean(false);
                }
                match self.regex(&second.display()) {
                    Ok(re) => Field::boolean(re.is_match(&first.display())),
                    Err(message) => Field::boolean(false).with_error(message),
                }
            }
            Function::IsNull => Field::boolean(first.is_null()),
            Function::IsNotNull => Field::boolean(!first.is_null()),
            Function::Lower => map_text(&first, |s| s.to_lowercase()),
            Function::Upper => map_text(&first, |s| s.to_uppercase()),
            Function::Length => match &first.value {
                FieldValue::Null => Field::null(),
                FieldValue::Array(items) => Field::number(items.len() as f64),
                _ => Field::number(first.display().chars().count() as f64),
            },
            Function::Abs => map_number(&first, "abs", f64::abs),
            Function::Floor => map_number(&first, "floor", f64::floor),
            Function::Ceil => map_number(&first, "ceil", f64::ceil),
            Function::Round => {
                let digits = if values.len() > 1 {
                    match numeric(&second, "round") {
                        Ok(d) => d,
                        Err(invalid) => return invalid,
                    }
                } else {
                    0.0
                };
                let scale = 10f64.powi(digits as i32);
                map_number(&first, "round", |n| (n * scale).round() / scale)
            }
            Function::ToNumber => match first.value {
                FieldValue::Null => Field::null(),
                _ => numeric(&first, "toNumber").map_or_else(|e| e, Field::number),
            },
            Function::ToString => match first.value {
                FieldValue::Null => Field::null(),
                _ => Field::string(first.display()),
            },
            Function::If | Function::Case | Function::Coalesce => Field::null(),
        }
    }

    fn arg(&mut self, args: &[Expr], index: usize, record: &Record) -> Field {
        match args.get(index) {
            Some(expr) => self.eval(expr, record),
            None => Field::null(),
        }
    }

    fn regex(&mut self, pattern: &str) -> Result<&regex::Regex, String> {
        self.regexes
            .entry(pattern.to_string())
            .or_insert_with(|| {
                regex::Regex::new(pattern).map_err(|e| format!("invalid regex: {}", e))
            })
            .as_ref()
            .map_err(|e| e.clone())
    }
}

pub(crate) fn literal_field(lit: &Literal) -> Field {
    match lit {
        Literal::Number(n) => Field::number(*n),
        Literal::String(s) => Field::string(s.clone()),
        Literal::Boolean(b) => Field::boolean(*b),
        Literal::Null => Field::null(),
    }
}

/// Numeric view of an operand, or the invalid number to return instead.
fn numeric(value: &Field, op: &str) -> Result<f64, Field> {
    if !value.is_valid() {
        let mut invalid = Field::number(f64::NAN);
        invalid.errors = value.errors.clone();
        return Err(invalid);
    }
    match value.as_number() {
        Some(n) => Ok(n),
        None if value.is_null() => Err(Field::invalid_number(format!(
            "{}: operand is absent",
            op
        ))),
        None => Err(Field::invalid_number(format!(
            "{}: '{}' is not a number",
            op,
            value.display()
        ))),
    }
}

fn binary(op: BinaryOp, left: &Field, right: &Field) -> Field {
    let arithmetic = matches!(
        op,
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div
    );
    if !arithmetic {
        return Field::boolean(compare(op, left, right));
    }

    let symbol = op.as_str();
    let a = match numeric(left, symbol) {
        Ok(a) => a,
        Err(invalid) => return invalid,
    };
    let b = match numeric(right, symbol) {
        Ok(b) => b,
        Err(invalid) => return invalid,
    };
    match op {
        BinaryOp::Add => Field::number(a + b),
        BinaryOp::Sub => Field::number(a - b),
        BinaryOp::Mul => Field::number(a * b),
        _ if b == 0.0 => Field::invalid_number("division by zero"),
        _ => Field::number(a / b),
    }
}

/// Comparison semantics shared by `where`, `eval` and `in`.
///
/// Against an absent value `==` holds only when both sides are absent, `!=`
/// holds unless both are absent, and ordering operators never hold. Present
/// values compare numerically when both are numeric, else by display text.
pub(crate) fn compare(op: BinaryOp, left: &Field, right: &Field) -> bool {
    match (left.is_null(), right.is_null()) {
        (true, true) => return op == BinaryOp::Eq,
        (true, false) | (false, true) => return op == BinaryOp::NotEq,
        (false, false) => {}
    }

    let ordering = match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => match a.partial_cmp(&b) {
            Some(ord) => ord,
            // NaN is unordered and unequal to everything.
            None => return op == BinaryOp::NotEq,
        },
        _ => left.display().cmp(&right.display()),
    };

    match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::NotEq => ordering != Ordering::Equal,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::GtEq => ordering != Ordering::Less,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::LtEq => ordering != Ordering::Greater,
        _ => false,
    }
}

fn text_test(value: &Field, needle: &Field, test: impl Fn(&str, &str) -> bool) -> Field {
    if value.is_null() {
        return Field::boolean(false);
    }
    Field::boolean(test(&value.display(), &needle.display()))
}

fn map_text(value: &Field, f: impl Fn(&str) -> String) -> Field {
    match value.value {
        FieldValue::Null => Field::null(),
        _ => Field::string(f(&value.display())),
    }
}

fn map_number(value: &Field, op: &str, f: impl Fn(f64) -> f64) -> Field {
    numeric(value, op).map_or_else(|e| e, |n| Field::number(f(n)))
}
