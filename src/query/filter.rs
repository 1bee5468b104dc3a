//! Filter validation and translation to predicates bound to join aliases.

use crate::config::{DataType, Entity, ResolvedModel};
use crate::error::AppError;
use crate::query::vector::AttributeVector;
use crate::sql::{escape_like, ColumnRef, CompareOp, Predicate};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterInput {
    pub path: String,
    #[serde(default)]
    pub match_type: Option<String>,
    #[serde(default)]
    pub constraints: Vec<ConstraintInput>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ConstraintInput {
    #[serde(alias = "operator")]
    pub op: String,
    #[serde(default)]
    pub values: Vec<Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MatchType {
    #[default]
    MatchAll,
    MatchAny,
}

impl FromStr for MatchType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "matchAll" | "all" => Ok(MatchType::MatchAll),
            "matchAny" | "any" => Ok(MatchType::MatchAny),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    StartsWith,
    Contains,
    NotContains,
    EndsWith,
    Equals,
    NotEquals,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    Between,
    DateIs,
    DateIsNot,
    DateBefore,
    DateAfter,
}

impl FromStr for Operator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "startsWith" => Operator::StartsWith,
            "contains" => Operator::Contains,
            "notContains" => Operator::NotContains,
            "endsWith" => Operator::EndsWith,
            "equals" => Operator::Equals,
            "notEquals" => Operator::NotEquals,
            "lt" => Operator::Lt,
            "lte" => Operator::Lte,
            "gt" => Operator::Gt,
            "gte" => Operator::Gte,
            "in" => Operator::In,
            "notIn" => Operator::NotIn,
            "between" => Operator::Between,
            "dateIs" => Operator::DateIs,
            "dateIsNot" => Operator::DateIsNot,
            "dateBefore" => Operator::DateBefore,
            "dateAfter" => Operator::DateAfter,
            _ => return Err(()),
        })
    }
}

enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Operator {
    fn arity(self) -> Arity {
        match self {
            Operator::In | Operator::NotIn => Arity::AtLeast(1),
            Operator::Between => Arity::Exactly(2),
            _ => Arity::Exactly(1),
        }
    }

    fn applies_to(self, t: DataType) -> bool {
        match self {
            Operator::StartsWith | Operator::Contains | Operator::NotContains | Operator::EndsWith => t.is_textual(),
            Operator::Equals | Operator::NotEquals | Operator::In | Operator::NotIn => true,
            Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte | Operator::Between => t.is_ordered(),
            Operator::DateIs | Operator::DateIsNot | Operator::DateBefore | Operator::DateAfter => t.is_temporal(),
        }
    }

    fn accepts_null(self) -> bool {
        matches!(self, Operator::Equals | Operator::NotEquals)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    pub operator: Operator,
    /// Already coerced to the attribute's type.
    pub values: Vec<Value>,
}

impl Constraint {
    fn to_predicate(&self, column: &ColumnRef) -> Predicate {
        let first = || self.values.first().cloned().unwrap_or(Value::Null);
        let text = || first().as_str().map(escape_like).unwrap_or_default();
        let compare = |op| Predicate::Compare {
            column: column.clone(),
            op,
            value: first(),
        };
        let date = |op| Predicate::DateCompare {
            column: column.clone(),
            op,
            value: first(),
        };
        let like = |pattern: String, negated| Predicate::Like {
            column: column.clone(),
            pattern,
            negated,
        };
        match self.operator {
            Operator::StartsWith => like(format!("{}%", text()), false),
            Operator::EndsWith => like(format!("%{}", text()), false),
            Operator::Contains => like(format!("%{}%", text()), false),
            Operator::NotContains => like(format!("%{}%", text()), true),
            Operator::Equals | Operator::NotEquals if first().is_null() => Predicate::IsNull {
                column: column.clone(),
                negated: self.operator == Operator::NotEquals,
            },
            Operator::Equals => compare(CompareOp::Eq),
            Operator::NotEquals => compare(CompareOp::Ne),
            Operator::Lt => compare(CompareOp::Lt),
            Operator::Lte => compare(CompareOp::Lte),
            Operator::Gt => compare(CompareOp::Gt),
            Operator::Gte => compare(CompareOp::Gte),
            Operator::In | Operator::NotIn => Predicate::In {
                column: column.clone(),
                values: self.values.clone(),
                negated: self.operator == Operator::NotIn,
            },
            Operator::Between => Predicate::Between {
                column: column.clone(),
                low: first(),
                high: self.values.get(1).cloned().unwrap_or(Value::Null),
            },
            Operator::DateIs => date(CompareOp::Eq),
            Operator::DateIsNot => date(CompareOp::Ne),
            Operator::DateBefore => date(CompareOp::Lt),
            Operator::DateAfter => date(CompareOp::Gt),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ValidFilter {
    pub vector: AttributeVector,
    pub column: ColumnRef,
    pub match_type: MatchType,
    pub constraints: Vec<Constraint>,
}

impl ValidFilter {
    /// Validate raw input against `root`. Every failure names the path and, when known, the operator.
    pub fn validate(
        model: &ResolvedModel,
        root: &Arc<Entity>,
        input: &FilterInput,
        max_depth: usize,
    ) -> Result<Self, AppError> {
        let vector = AttributeVector::resolve(model, root, &input.path, max_depth)?;
        let column = vector.column()?;
        let match_type = match input.match_type.as_deref() {
            None => MatchType::default(),
            Some(s) => s.parse().map_err(|_| {
                AppError::validation(&input.path, format!("unknown matchType '{}'", s))
            })?,
        };
        if input.constraints.is_empty() {
            return Err(AppError::validation(&input.path, "filter has no constraints"));
        }
        let data_type = vector.attribute.data_type;
        let constraints = input
            .constraints
            .iter()
            .map(|c| validate_constraint(&input.path, data_type, c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ValidFilter {
            vector,
            column,
            match_type,
            constraints,
        })
    }

    pub fn to_predicate(&self) -> Predicate {
        let parts = self.constraints.iter().map(|c| c.to_predicate(&self.column)).collect();
        match self.match_type {
            MatchType::MatchAll => Predicate::All(parts),
            MatchType::MatchAny => Predicate::Any(parts),
        }
    }
}

/// Validate every filter; the first failure wins.
pub fn validate_filters(
    model: &ResolvedModel,
    root: &Arc<Entity>,
    inputs: &[FilterInput],
    max_depth: usize,
) -> Result<Vec<ValidFilter>, AppError> {
    inputs
        .iter()
        .map(|f| ValidFilter::validate(model, root, f, max_depth))
        .collect()
}

fn validate_constraint(path: &str, data_type: DataType, input: &ConstraintInput) -> Result<Constraint, AppError> {
    let operator: Operator = input
        .op
        .parse()
        .map_err(|_| AppError::invalid_operator(path, &input.op, "unknown operator"))?;
    let n = input.values.len();
    match operator.arity() {
        Arity::Exactly(k) if n != k => {
            return Err(AppError::invalid_operator(
                path,
                &input.op,
                format!("expects exactly {} value(s), got {}", k, n),
            ))
        }
        Arity::AtLeast(k) if n < k => {
            return Err(AppError::invalid_operator(
                path,
                &input.op,
                format!("expects at least {} value(s), got {}", k, n),
            ))
        }
        _ => {}
    }
    if !operator.applies_to(data_type) {
        return Err(AppError::invalid_operator(
            path,
            &input.op,
            format!("not applicable to {:?} attributes", data_type),
        ));
    }
    let values = input
        .values
        .iter()
        .map(|v| {
            if v.is_null() {
                if operator.accepts_null() {
                    return Ok(Value::Null);
                }
                return Err(AppError::invalid_operator(path, &input.op, "null is only valid for equals/notEquals"));
            }
            if matches!(
                operator,
                Operator::StartsWith | Operator::Contains | Operator::NotContains | Operator::EndsWith
            ) {
                return v
                    .as_str()
                    .map(|s| Value::String(s.to_string()))
                    .ok_or_else(|| AppError::invalid_operator(path, &input.op, "expects a string value"));
            }
            coerce(data_type, v).ok_or_else(|| {
                AppError::invalid_operator(path, &input.op, format!("value {} is not a valid {:?}", v, data_type))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Constraint { operator, values })
}

/// Coerce a JSON value to the representation bound for `data_type`.
pub fn coerce(data_type: DataType, v: &Value) -> Option<Value> {
    match data_type {
        DataType::Int | DataType::Lookup => match v {
            Value::Number(n) => n.as_i64().map(Value::from),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        DataType::Float => match v {
            Value::Number(n) => n.as_f64().map(Value::from),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()).map(Value::from),
            _ => None,
        },
        DataType::Boolean => match v {
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::String(s) => match s.as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        DataType::String | DataType::Text => match v {
            Value::String(s) => Some(Value::String(s.clone())),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        DataType::Datetime => parse_datetime(v.as_str()?).map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))),
        DataType::Date => parse_date(v.as_str()?).map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        DataType::Junction | DataType::Collection => None,
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date_naive()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolved::fixtures::blog_model;
    use crate::sql::eval::eval;
    use crate::sql::QueryBuf;
    use serde_json::json;

    fn filter(v: Value) -> Result<ValidFilter, AppError> {
        let model = blog_model();
        let post = model.lookup("post").unwrap().clone();
        let input: FilterInput = serde_json::from_value(v).unwrap();
        ValidFilter::validate(&model, &post, &input, 5)
    }

    #[test]
    fn between_requires_exactly_two_values() {
        for values in [json!([]), json!([1]), json!([1, 2, 3])] {
            let err = filter(json!({"path": "views", "constraints": [{"op": "between", "values": values}]})).unwrap_err();
            match err {
                AppError::Validation { field, operator, .. } => {
                    assert_eq!(field, "views");
                    assert_eq!(operator.as_deref(), Some("between"));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert!(filter(json!({"path": "views", "constraints": [{"op": "between", "values": [1, 9]}]})).is_ok());
    }

    #[test]
    fn unknown_operator_names_field_and_operator() {
        let err = filter(json!({"path": "title", "constraints": [{"op": "resembles", "values": ["x"]}]})).unwrap_err();
        assert!(matches!(err, AppError::Validation { ref operator, .. } if operator.as_deref() == Some("resembles")));
    }

    #[test]
    fn operator_must_fit_attribute_type() {
        assert!(filter(json!({"path": "views", "constraints": [{"op": "startsWith", "values": ["1"]}]})).is_err());
        assert!(filter(json!({"path": "title", "constraints": [{"op": "dateIs", "values": ["2024-01-01"]}]})).is_err());
        assert!(filter(json!({"path": "views", "constraints": [{"op": "gt", "values": ["abc"]}]})).is_err());
        assert!(filter(json!({"path": "views", "constraints": [{"op": "lt", "values": [null]}]})).is_err());
    }

    #[test]
    fn match_any_ors_constraints() {
        let f = filter(json!({
            "path": "title",
            "matchType": "matchAny",
            "constraints": [
                {"op": "startsWith", "values": ["a"]},
                {"op": "startsWith", "values": ["b"]}
            ]
        }))
        .unwrap();
        let p = f.to_predicate();
        let titles = ["apple", "banana", "cherry", "avocado", "Blueberry"];
        let hits: Vec<&str> = titles
            .iter()
            .copied()
            .filter(|t| eval(&p, &|_| json!(t)) == Some(true))
            .collect();
        assert_eq!(hits, vec!["apple", "banana", "avocado"]);

        let mut buf = QueryBuf::default();
        assert_eq!(
            p.render(&mut buf),
            r#"("main"."title"::text LIKE $1 ESCAPE '\') OR ("main"."title"::text LIKE $2 ESCAPE '\')"#
        );
        assert_eq!(buf.params, vec![json!("a%"), json!("b%")]);
    }

    #[test]
    fn match_all_ands_constraints() {
        let f = filter(json!({
            "path": "views",
            "constraints": [{"op": "gte", "values": [10]}, {"op": "lt", "values": ["20"]}]
        }))
        .unwrap();
        let p = f.to_predicate();
        assert_eq!(eval(&p, &|_| json!(15)), Some(true));
        assert_eq!(eval(&p, &|_| json!(20)), Some(false));
        assert_eq!(eval(&p, &|_| Value::Null), None);
    }

    #[test]
    fn equals_null_becomes_is_null() {
        let f = filter(json!({"path": "author", "constraints": [{"op": "equals", "values": [null]}]})).unwrap();
        let mut buf = QueryBuf::default();
        assert_eq!(f.to_predicate().render(&mut buf), r#""main"."author" IS NULL"#);
        assert!(buf.params.is_empty());
    }

    #[test]
    fn date_operators_truncate_to_calendar_day() {
        let f = filter(json!({"path": "created_at", "constraints": [{"op": "dateIs", "values": ["2024-03-05T23:59:00Z"]}]}))
            .unwrap();
        let p = f.to_predicate();
        assert_eq!(eval(&p, &|_| json!("2024-03-05T08:00:00Z")), Some(true));
        assert_eq!(eval(&p, &|_| json!("2024-03-06T00:00:00Z")), Some(false));
        let mut buf = QueryBuf::default();
        assert_eq!(
            p.render(&mut buf),
            r#"("main"."created_at")::date = ($1::timestamptz)::date"#
        );
    }

    #[test]
    fn like_input_is_escaped() {
        let f = filter(json!({"path": "title", "constraints": [{"op": "contains", "values": ["50%"]}]})).unwrap();
        match f.to_predicate() {
            Predicate::All(parts) => assert!(matches!(&parts[0], Predicate::Like { pattern, .. } if pattern == "%50\\%%")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn filter_paths_bind_to_join_alias() {
        let f = filter(json!({"path": "tags.name", "constraints": [{"op": "startsWith", "values": ["a"]}]})).unwrap();
        assert_eq!(f.column.alias, "main.tags");
        assert!(f.vector.is_collective());
    }

    #[test]
    fn collection_path_without_column_is_rejected() {
        assert!(filter(json!({"path": "comments", "constraints": [{"op": "equals", "values": [1]}]})).is_err());
    }
}
