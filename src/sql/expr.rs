//! Predicate tree rendered to parameterized SQL. Columns come from metadata only; values are always bound.

use crate::sql::builder::{quoted, QueryBuf};
use serde_json::Value;

/// A column under a join alias, with the PostgreSQL type used to cast bound values.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
    pub pg_type: Option<&'static str>,
}

impl ColumnRef {
    pub fn new(alias: impl Into<String>, column: impl Into<String>, pg_type: Option<&'static str>) -> Self {
        ColumnRef {
            alias: alias.into(),
            column: column.into(),
            pg_type,
        }
    }

    pub fn sql(&self) -> String {
        format!("{}.{}", quoted(&self.alias), quoted(&self.column))
    }

    fn placeholder(&self, buf: &mut QueryBuf, v: &Value) -> String {
        let n = buf.push_param(v.clone());
        match self.pg_type {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Compare { column: ColumnRef, op: CompareOp, value: Value },
    ColumnsEq(ColumnRef, ColumnRef),
    IsNull { column: ColumnRef, negated: bool },
    /// `pattern` is a complete LIKE pattern; escape with [`escape_like`].
    Like { column: ColumnRef, pattern: String, negated: bool },
    In { column: ColumnRef, values: Vec<Value>, negated: bool },
    Between { column: ColumnRef, low: Value, high: Value },
    /// Comparison after truncating both sides to a calendar date.
    DateCompare { column: ColumnRef, op: CompareOp, value: Value },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(column: ColumnRef, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column,
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    pub fn render(&self, buf: &mut QueryBuf) -> String {
        match self {
            Predicate::Compare { column, op, value } => {
                let ph = column.placeholder(buf, value);
                format!("{} {} {}", column.sql(), op.sql(), ph)
            }
            Predicate::ColumnsEq(a, b) => format!("{} = {}", a.sql(), b.sql()),
            Predicate::IsNull { column, negated } => {
                format!("{} IS {}NULL", column.sql(), if *negated { "NOT " } else { "" })
            }
            Predicate::Like { column, pattern, negated } => {
                let n = buf.push_param(Value::String(pattern.clone()));
                format!(
                    "{}::text {}LIKE ${} ESCAPE '\\'",
                    column.sql(),
                    if *negated { "NOT " } else { "" },
                    n
                )
            }
            Predicate::In { column, values, negated } => {
                if values.is_empty() {
                    return if *negated { "TRUE".into() } else { "FALSE".into() };
                }
                let phs: Vec<String> = values.iter().map(|v| column.placeholder(buf, v)).collect();
                format!(
                    "{} {}IN ({})",
                    column.sql(),
                    if *negated { "NOT " } else { "" },
                    phs.join(", ")
                )
            }
            Predicate::Between { column, low, high } => {
                let lo = column.placeholder(buf, low);
                let hi = column.placeholder(buf, high);
                format!("{} BETWEEN {} AND {}", column.sql(), lo, hi)
            }
            Predicate::DateCompare { column, op, value } => {
                let n = buf.push_param(value.clone());
                format!("({})::date {} (${}::timestamptz)::date", column.sql(), op.sql(), n)
            }
            Predicate::All(parts) => join_parts(parts, " AND ", "TRUE", buf),
            Predicate::Any(parts) => join_parts(parts, " OR ", "FALSE", buf),
        }
    }
}

fn join_parts(parts: &[Predicate], sep: &str, empty: &str, buf: &mut QueryBuf) -> String {
    match parts {
        [] => empty.to_string(),
        [only] => only.render(buf),
        _ => {
            let rendered: Vec<String> = parts.iter().map(|p| format!("({})", p.render(buf))).collect();
            rendered.join(sep)
        }
    }
}

/// Escape LIKE wildcards so user text matches literally.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
