//! Query AST.
//!
//! Nodes carry no source positions, so two queries that differ only in
//! whitespace or comments compare equal and serialize identically. Every node
//! prints back as canonical query text through `Display`; parsing that text
//! again yields an equal tree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Query
// =============================================================================

/// A parsed query: head pre-filters, free-text search and pipeline stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub pre_filters: Vec<PreFilter>,
    pub search: Option<SearchNode>,
    pub pipeline: Vec<Stage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreFilterOp {
    Eq,
    NotEq,
}

impl PreFilterOp {
    pub fn as_str(self) -> &'static str {
        match self {
            PreFilterOp::Eq => "=",
            PreFilterOp::NotEq => "!=",
        }
    }
}

/// `key=value` / `key!=value` at the head of a query. Forwarded to the data
/// source rather than evaluated by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreFilter {
    pub key: String,
    pub op: PreFilterOp,
    pub value: String,
}

impl PreFilter {
    pub fn new(key: impl Into<String>, op: PreFilterOp, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    /// Whether a candidate value passes this filter.
    pub fn accepts(&self, candidate: &str) -> bool {
        match self.op {
            PreFilterOp::Eq => candidate == self.value,
            PreFilterOp::NotEq => candidate != self.value,
        }
    }
}

// =============================================================================
// Search
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchLiteral {
    /// Bare word or number.
    Term(String),
    /// Double-quoted phrase.
    Phrase(String),
}

impl SearchLiteral {
    pub fn text(&self) -> &str {
        match self {
            SearchLiteral::Term(s) | SearchLiteral::Phrase(s) => s,
        }
    }
}

/// Free-text search tree. `AND`/`OR` bind everything to their right.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchNode {
    Literal(SearchLiteral),
    And(Box<SearchNode>, Box<SearchNode>),
    Or(Box<SearchNode>, Box<SearchNode>),
}

impl SearchNode {
    pub fn term(s: impl Into<String>) -> Self {
        SearchNode::Literal(SearchLiteral::Term(s.into()))
    }

    pub fn phrase(s: impl Into<String>) -> Self {
        SearchNode::Literal(SearchLiteral::Phrase(s.into()))
    }

    pub fn and(left: SearchNode, right: SearchNode) -> Self {
        SearchNode::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: SearchNode, right: SearchNode) -> Self {
        SearchNode::Or(Box::new(left), Box::new(right))
    }

    /// Evaluate against a predicate deciding single literals.
    pub fn matches<F>(&self, literal: &F) -> bool
    where
        F: Fn(&SearchLiteral) -> bool,
    {
        match self {
            SearchNode::Literal(lit) => literal(lit),
            SearchNode::And(l, r) => l.matches(literal) && r.matches(literal),
            SearchNode::Or(l, r) => l.matches(literal) || r.matches(literal),
        }
    }
}

// =============================================================================
// Stages
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableColumn {
    pub column: String,
    pub alias: Option<String>,
}

impl TableColumn {
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    First,
    Last,
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub const ALL: [AggFunc; 7] = [
        AggFunc::First,
        AggFunc::Last,
        AggFunc::Count,
        AggFunc::Sum,
        AggFunc::Avg,
        AggFunc::Min,
        AggFunc::Max,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AggFunc::First => "first",
            AggFunc::Last => "last",
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

/// `func(column) as alias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggCall {
    pub func: AggFunc,
    pub column: Option<String>,
    pub alias: Option<String>,
}

impl AggCall {
    pub fn new(func: AggFunc, column: Option<&str>) -> Self {
        Self {
            func,
            column: column.map(str::to_string),
            alias: None,
        }
    }

    /// Output column name: the alias, else `func(column)`, else `func`.
    pub fn output_name(&self) -> String {
        match (&self.alias, &self.column) {
            (Some(alias), _) => alias.clone(),
            (None, Some(column)) => format!("{}({})", self.func.as_str(), column),
            (None, None) => self.func.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl SpanUnit {
    fn suffix(self) -> char {
        match self {
            SpanUnit::Seconds => 's',
            SpanUnit::Minutes => 'm',
            SpanUnit::Hours => 'h',
            SpanUnit::Days => 'd',
        }
    }

    fn millis(self) -> i64 {
        match self {
            SpanUnit::Seconds => 1_000,
            SpanUnit::Minutes => 60_000,
            SpanUnit::Hours => 3_600_000,
            SpanUnit::Days => 86_400_000,
        }
    }
}

/// A duration written as `<N><s|m|h|d>`, e.g. `5m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSpan {
    pub amount: u64,
    pub unit: SpanUnit,
}

impl TimeSpan {
    pub fn new(amount: u64, unit: SpanUnit) -> Self {
        Self { amount, unit }
    }

    pub fn as_millis(self) -> i64 {
        (self.amount as i64).saturating_mul(self.unit.millis())
    }
}

impl FromStr for TimeSpan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let unit = match s.chars().last() {
            Some('s') => SpanUnit::Seconds,
            Some('m') => SpanUnit::Minutes,
            Some('h') => SpanUnit::Hours,
            Some('d') => SpanUnit::Days,
            _ => return Err(format!("invalid duration '{}': expected <N>s|m|h|d", s)),
        };
        let digits = &s[..s.len() - 1];
        match digits.parse::<u64>() {
            Ok(amount) if amount > 0 && digits.bytes().all(|b| b.is_ascii_digit()) => {
                Ok(Self::new(amount, unit))
            }
            _ => Err(format!("invalid duration '{}': expected <N>s|m|h|d", s)),
        }
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStage {
    pub columns: Vec<TableColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsStage {
    pub aggregations: Vec<AggCall>,
    pub by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegexStage {
    pub field: Option<String>,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortStage {
    pub keys: Vec<SortKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereStage {
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeChartStage {
    pub span: Option<TimeSpan>,
    pub time_col: Option<String>,
    pub max_groups: Option<usize>,
    pub aggregations: Vec<AggCall>,
    pub by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalStage {
    pub target: String,
    pub expr: Expr,
}

/// One pipeline stage. The set is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Stage {
    Table(TableStage),
    Stats(StatsStage),
    Regex(RegexStage),
    Sort(SortStage),
    Where(WhereStage),
    TimeChart(TimeChartStage),
    Eval(EvalStage),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Table(_) => "table",
            Stage::Stats(_) => "stats",
            Stage::Regex(_) => "regex",
            Stage::Sort(_) => "sort",
            Stage::Where(_) => "where",
            Stage::TimeChart(_) => "timechart",
            Stage::Eval(_) => "eval",
        }
    }
}

// =============================================================================
// Expressions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOp::And | BinaryOp::Or => 0,
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Gt
            | BinaryOp::GtEq
            | BinaryOp::Lt
            | BinaryOp::LtEq => 2,
            BinaryOp::Add | BinaryOp::Sub => 3,
            BinaryOp::Mul | BinaryOp::Div => 4,
        }
    }

    /// Minimum precedence of (left, right) operands that print without
    /// parentheses.
    fn operand_levels(self) -> (u8, u8) {
        match self.precedence() {
            0 => (1, 0),
            2 => (3, 3),
            3 => (3, 4),
            _ => (4, 5),
        }
    }
}

/// Built-in functions usable in `where` and `eval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Function {
    Contains,
    StartsWith,
    EndsWith,
    Match,
    IsNull,
    IsNotNull,
    Lower,
    Upper,
    Length,
    Abs,
    Round,
    Floor,
    Ceil,
    ToNumber,
    ToString,
    If,
    Case,
    Coalesce,
}

impl Function {
    pub const ALL: [Function; 18] = [
        Function::Contains,
        Function::StartsWith,
        Function::EndsWith,
        Function::Match,
        Function::IsNull,
        Function::IsNotNull,
        Function::Lower,
        Function::Upper,
        Function::Length,
        Function::Abs,
        Function::Round,
        Function::Floor,
        Function::Ceil,
        Function::ToNumber,
        Function::ToString,
        Function::If,
        Function::Case,
        Function::Coalesce,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Function::Contains => "contains",
            Function::StartsWith => "startsWith",
            Function::EndsWith => "endsWith",
            Function::Match => "match",
            Function::IsNull => "isNull",
            Function::IsNotNull => "isNotNull",
            Function::Lower => "lower",
            Function::Upper => "upper",
            Function::Length => "length",
            Function::Abs => "abs",
            Function::Round => "round",
            Function::Floor => "floor",
            Function::Ceil => "ceil",
            Function::ToNumber => "toNumber",
            Function::ToString => "toString",
            Function::If => "if",
            Function::Case => "case",
            Function::Coalesce => "coalesce",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }

    /// Predicate functions that always return a boolean.
    pub fn is_boolean(self) -> bool {
        matches!(
            self,
            Function::Contains
                | Function::StartsWith
                | Function::EndsWith
                | Function::Match
                | Function::IsNull
                | Function::IsNotNull
        )
    }

    /// Accepted argument count as `(min, max)`.
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Function::Contains | Function::StartsWith | Function::EndsWith | Function::Match => {
                (2, Some(2))
            }
            Function::Round => (1, Some(2)),
            Function::If => (3, Some(3)),
            Function::Case => (2, None),
            Function::Coalesce => (1, None),
            _ => (1, Some(1)),
        }
    }
}

/// Expression tree for `where` and `eval`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(Literal),
    Column(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    In {
        expr: Box<Expr>,
        list: Vec<Literal>,
    },
    Call {
        func: Function,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn number(n: f64) -> Self {
        Expr::Literal(Literal::Number(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Expr::Literal(Literal::String(s.into()))
    }

    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Printing level: 0 logical, 1 unary not, 2 comparison, 3 additive,
    /// 4 multiplicative, 5 negation, 6 atom.
    fn level(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Not(_) => 1,
            Expr::In { .. } => 2,
            Expr::Neg(_) => 5,
            Expr::Literal(_) | Expr::Column(_) | Expr::Call { .. } => 6,
        }
    }
}

// =============================================================================
// Canonical text
// =============================================================================

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            other => write!(f, "{}", other)?,
        }
    }
    f.write_str("\"")
}

/// Backticks unless the text itself contains one.
fn write_pattern(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    if s.contains('`') {
        write_quoted(f, s)
    } else {
        write!(f, "`{}`", s)
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, min_level: u8) -> fmt::Result {
    if expr.level() < min_level {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

impl fmt::Display for PreFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.key, self.op.as_str())?;
        write_pattern(f, &self.value)
    }
}

impl fmt::Display for SearchNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchNode::Literal(SearchLiteral::Term(t)) => f.write_str(t),
            SearchNode::Literal(SearchLiteral::Phrase(p)) => write_quoted(f, p),
            SearchNode::And(l, r) | SearchNode::Or(l, r) => {
                let op = if matches!(self, SearchNode::And(..)) {
                    "AND"
                } else {
                    "OR"
                };
                match l.as_ref() {
                    SearchNode::Literal(_) => write!(f, "{}", l)?,
                    compound => write!(f, "({})", compound)?,
                }
                write!(f, " {} {}", op, r)
            }
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => write_quoted(f, s),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Null => f.write_str("null"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Column(name) => f.write_str(name),
            Expr::Not(inner) => {
                f.write_str("!")?;
                write_operand(f, inner, 1)
            }
            Expr::Neg(inner) => {
                f.write_str("-")?;
                write_operand(f, inner, 5)
            }
            Expr::Binary { op, left, right } => {
                let (l, r) = op.operand_levels();
                write_operand(f, left, l)?;
                write!(f, " {} ", op.as_str())?;
                write_operand(f, right, r)
            }
            Expr::In { expr, list } => {
                write_operand(f, expr, 3)?;
                f.write_str(" in [")?;
                write_list(f, list)?;
                f.write_str("]")
            }
            Expr::Call { func, args } => {
                write!(f, "{}(", func.as_str())?;
                write_list(f, args)?;
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for TableColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.column)?;
        if let Some(alias) = &self.alias {
            write!(f, " as {}", alias)?;
        }
        Ok(())
    }
}

impl fmt::Display for AggCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({})",
            self.func.as_str(),
            self.column.as_deref().unwrap_or("")
        )?;
        if let Some(alias) = &self.alias {
            write!(f, " as {}", alias)?;
        }
        Ok(())
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        };
        write!(f, "{} {}", self.column, dir)
    }
}

fn write_aggregations(
    f: &mut fmt::Formatter<'_>,
    aggregations: &[AggCall],
    by: &[String],
) -> fmt::Result {
    write_list(f, aggregations)?;
    if !by.is_empty() {
        f.write_str(" by ")?;
        write_list(f, by)?;
    }
    Ok(())
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.name())?;
        match self {
            Stage::Table(t) => write_list(f, &t.columns),
            Stage::Stats(s) => write_aggregations(f, &s.aggregations, &s.by),
            Stage::Regex(r) => {
                if let Some(field) = &r.field {
                    write!(f, "field={} ", field)?;
                }
                write_pattern(f, &r.pattern)
            }
            Stage::Sort(s) => write_list(f, &s.keys),
            Stage::Where(w) => write!(f, "{}", w.expr),
            Stage::TimeChart(t) => {
                if let Some(span) = t.span {
                    write!(f, "span={} ", span)?;
                }
                if let Some(col) = &t.time_col {
                    write!(f, "timeCol={} ", col)?;
                }
                if let Some(max) = t.max_groups {
                    write!(f, "maxGroups={} ", max)?;
                }
                write_aggregations(f, &t.aggregations, &t.by)
            }
            Stage::Eval(e) => write!(f, "{} = {}", e.target, e.expr),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for filter in &self.pre_filters {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}", filter)?;
            first = false;
        }
        if let Some(search) = &self.search {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}", search)?;
            first = false;
        }
        for stage in &self.pipeline {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "| {}", stage)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_span_parsing() {
        assert_eq!("5m".parse::<TimeSpan>(), Ok(TimeSpan::new(5, SpanUnit::Minutes)));
        assert_eq!("1d".parse::<TimeSpan>().map(TimeSpan::as_millis), Ok(86_400_000));
        assert!("0s".parse::<TimeSpan>().is_err());
        assert!("5w".parse::<TimeSpan>().is_err());
        assert!("m".parse::<TimeSpan>().is_err());
        assert!("+5m".parse::<TimeSpan>().is_err());
    }

    #[test]
    fn test_agg_output_names() {
        assert_eq!(AggCall::new(AggFunc::Count, None).output_name(), "count");
        assert_eq!(
            AggCall::new(AggFunc::Avg, Some("latency")).output_name(),
            "avg(latency)"
        );
        let mut aliased = AggCall::new(AggFunc::Sum, Some("bytes"));
        aliased.alias = Some("total".into());
        assert_eq!(aliased.output_name(), "total");
    }

    #[test]
    fn test_expression_printing_keeps_grouping() {
        // (1 + 2) * 3
        let expr = Expr::binary(
            BinaryOp::Mul,
            Expr::binary(BinaryOp::Add, Expr::number(1.0), Expr::number(2.0)),
            Expr::number(3.0),
        );
        assert_eq!(expr.to_string(), "(1 + 2) * 3");

        // 1 - (2 - 3)
        let expr = Expr::binary(
            BinaryOp::Sub,
            Expr::number(1.0),
            Expr::binary(BinaryOp::Sub, Expr::number(2.0), Expr::number(3.0)),
        );
        assert_eq!(expr.to_string(), "1 - (2 - 3)");
    }

    #[test]
    fn test_search_printing_parenthesizes_left_compounds() {
        let node = SearchNode::and(
            SearchNode::or(SearchNode::term("a"), SearchNode::term("b")),
            SearchNode::phrase("c d"),
        );
        assert_eq!(node.to_string(), "(a OR b) AND \"c d\"");
    }

    #[test]
    fn test_query_printing() {
        let query = Query {
            pre_filters: vec![PreFilter::new("service", PreFilterOp::Eq, "api")],
            search: Some(SearchNode::term("error")),
            pipeline: vec![Stage::Stats(StatsStage {
                aggregations: vec![AggCall::new(AggFunc::Count, None)],
                by: vec!["host".into()],
            })],
        };
        assert_eq!(query.to_string(), "service=`api` error | stats count() by host");
    }
}
