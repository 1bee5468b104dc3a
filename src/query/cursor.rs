//! Keyset (cursor) pagination over an arbitrary sort chain, plus offset pagination bounds.
//!
//! A cursor is the edge row's value for every sort vector, keyed by full path,
//! serialized as JSON and base64url-encoded. The seek predicate is the usual
//! lexicographic expansion: for each `i`, equality on the earlier sort columns
//! AND a strict comparison on column `i`, ORed together.

use crate::error::AppError;
use crate::query::filter::coerce;
use crate::query::sort::{SortOrder, ValidSort};
use crate::settings::Settings;
use crate::sql::{CompareOp, Predicate};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PaginationInput {
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SpanInput {
    #[serde(default)]
    pub first: Option<String>,
    #[serde(default)]
    pub last: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekDirection {
    /// Rows strictly after the cursor row (`span.last`).
    After,
    /// Rows strictly before the cursor row (`span.first`).
    Before,
}

impl SpanInput {
    /// The single cursor to seek from, if any. Supplying both edges is ambiguous and rejected.
    pub fn seek(&self) -> Result<Option<(SeekDirection, &str)>, AppError> {
        match (self.first.as_deref(), self.last.as_deref()) {
            (Some(_), Some(_)) => Err(AppError::validation("span", "supply either span.first or span.last, not both")),
            (Some(t), None) => Ok(Some((SeekDirection::Before, t))),
            (None, Some(t)) => Ok(Some((SeekDirection::After, t))),
            (None, None) => Ok(None),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidPagination {
    pub offset: u32,
    pub limit: u32,
}

impl ValidPagination {
    /// Limit defaults to the entity's page size, then the configured default, and is capped at the maximum.
    pub fn resolve(
        input: Option<&PaginationInput>,
        entity_default: Option<u32>,
        settings: &Settings,
    ) -> Result<Self, AppError> {
        let limit = input
            .and_then(|p| p.limit)
            .or(entity_default)
            .unwrap_or(settings.default_page_size);
        if limit == 0 {
            return Err(AppError::validation("pagination.limit", "limit must be positive"));
        }
        Ok(ValidPagination {
            offset: input.and_then(|p| p.offset).unwrap_or(0),
            limit: limit.min(settings.max_page_size),
        })
    }
}

/// Edge state of one page.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_previous: bool,
    pub has_next: bool,
    /// Cursor of the first row; present only when rows exist before it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
    /// Cursor of the last row; present only when rows exist after it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
}

/// Encode the edge `row` (flat, labelled by full path) for `sorts`.
pub fn encode_cursor(sorts: &[ValidSort], row: &Map<String, Value>) -> String {
    let mut key = Map::new();
    for s in sorts {
        let path = &s.vector.full_path;
        key.insert(path.clone(), row.get(path).cloned().unwrap_or(Value::Null));
    }
    BASE64.encode(Value::Object(key).to_string())
}

/// Decode `token` into one value per sort vector, in sort order.
pub fn decode_cursor(token: &str, sorts: &[ValidSort]) -> Result<Vec<Value>, AppError> {
    let malformed = |msg: &str| AppError::validation("cursor", msg);
    let bytes = BASE64.decode(token).map_err(|_| malformed("cursor is not valid base64"))?;
    let mut key: Map<String, Value> = match serde_json::from_slice(&bytes) {
        Ok(Value::Object(m)) => m,
        _ => return Err(malformed("cursor payload is not an object")),
    };
    if key.len() != sorts.len() {
        return Err(malformed("cursor does not match the sort order"));
    }
    sorts
        .iter()
        .map(|s| {
            let raw = key
                .remove(&s.vector.full_path)
                .ok_or_else(|| malformed("cursor does not match the sort order"))?;
            if raw.is_null() {
                return Ok(Value::Null);
            }
            coerce(s.vector.attribute.data_type, &raw).ok_or_else(|| {
                AppError::validation(
                    "cursor",
                    format!("cursor value for '{}' is not a valid {:?}", s.vector.full_path, s.vector.attribute.data_type),
                )
            })
        })
        .collect()
}

/// The root primary key can never be null, so its seek needs no null disjunct.
fn is_root_key(sort: &ValidSort) -> bool {
    sort.vector.steps.is_empty() && sort.vector.attribute.field == sort.vector.entity.primary_key
}

/// Predicate selecting rows strictly beyond `values` in `direction`.
///
/// Null placement follows PostgreSQL defaults (ASC NULLS LAST, DESC NULLS FIRST), which are
/// exact mirrors, so a reversed chain stays consistent.
pub fn seek_predicate(sorts: &[ValidSort], values: &[Value], direction: SeekDirection) -> Predicate {
    let reversed = direction == SeekDirection::Before;
    let mut clauses = Vec::with_capacity(sorts.len());
    for (i, (sort, value)) in sorts.iter().zip(values).enumerate() {
        let strict = match (sort.effective(reversed), value.is_null()) {
            // Nothing sorts after NULL when nulls are last.
            (SortOrder::Asc, true) => continue,
            (SortOrder::Asc, false) if is_root_key(sort) => Predicate::Compare {
                column: sort.column.clone(),
                op: CompareOp::Gt,
                value: value.clone(),
            },
            (SortOrder::Asc, false) => Predicate::Any(vec![
                Predicate::Compare {
                    column: sort.column.clone(),
                    op: CompareOp::Gt,
                    value: value.clone(),
                },
                Predicate::IsNull {
                    column: sort.column.clone(),
                    negated: false,
                },
            ]),
            (SortOrder::Desc, true) => Predicate::IsNull {
                column: sort.column.clone(),
                negated: true,
            },
            (SortOrder::Desc, false) => Predicate::Compare {
                column: sort.column.clone(),
                op: CompareOp::Lt,
                value: value.clone(),
            },
        };
        let mut parts: Vec<Predicate> = sorts[..i]
            .iter()
            .zip(values)
            .map(|(prev, v)| {
                if v.is_null() {
                    Predicate::IsNull {
                        column: prev.column.clone(),
                        negated: false,
                    }
                } else {
                    Predicate::eq(prev.column.clone(), v.clone())
                }
            })
            .collect();
        parts.push(strict);
        clauses.push(Predicate::All(parts));
    }
    Predicate::Any(clauses)
}

/// Trim a `limit + 1` fetch to `limit` rows in caller order and compute edge flags.
pub fn trim_page<T>(
    mut rows: Vec<T>,
    limit: u32,
    seek: Option<SeekDirection>,
    offset: u32,
) -> (Vec<T>, bool, bool) {
    let more = rows.len() > limit as usize;
    rows.truncate(limit as usize);
    match seek {
        Some(SeekDirection::Before) => {
            rows.reverse();
            (rows, more, true)
        }
        Some(SeekDirection::After) => (rows, true, more),
        None => (rows, offset > 0, more),
    }
}

/// Page info with cursors emitted only on edges that have more rows.
pub fn page_info(
    sorts: &[ValidSort],
    rows: &[Map<String, Value>],
    has_previous: bool,
    has_next: bool,
) -> PageInfo {
    PageInfo {
        has_previous,
        has_next,
        first: rows.first().filter(|_| has_previous).map(|r| encode_cursor(sorts, r)),
        last: rows.last().filter(|_| has_next).map(|r| encode_cursor(sorts, r)),
    }
}
