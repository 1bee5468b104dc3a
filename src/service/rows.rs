//! Row decoding and reshaping of dot-labelled columns into nested objects.

use serde_json::{Map, Value};
use sqlx::postgres::PgRow;

/// Decode every column of `row` into a JSON map keyed by column label.
pub fn row_to_map(row: &PgRow) -> Map<String, Value> {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}

/// Turn `{"author.name": "x"}` into `{"author": {"name": "x"}}`. Objects win over scalars on conflict.
pub fn nest_row(flat: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (label, value) in flat {
        let segments: Vec<&str> = label.split('.').collect();
        insert_path(&mut out, &segments, value);
    }
    out
}

fn insert_path(target: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [last] => match target.get(*last) {
            Some(Value::Object(_)) if !value.is_object() => {}
            _ => {
                target.insert(last.to_string(), value);
            }
        },
        [head, rest @ ..] => {
            let slot = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(inner) = slot {
                insert_path(inner, rest, value);
            }
        }
    }
}

/// Stable hash key for matching parent and child rows by a JSON key value.
pub fn key_of(v: &Value) -> String {
    v.to_string()
}

/// Distinct non-null values of `label` across `rows`, in first-seen order.
pub fn distinct_keys(rows: &[Map<String, Value>], label: &str) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    rows.iter()
        .filter_map(|r| r.get(label))
        .filter(|v| !v.is_null())
        .filter(|v| seen.insert(key_of(v)))
        .cloned()
        .collect()
}
