//! Sort validation: an ordered tie-break chain, always ending in the primary key.

use crate::config::{Entity, ResolvedModel};
use crate::error::AppError;
use crate::query::vector::AttributeVector;
use crate::sql::{ColumnRef, OrderTerm};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone, Debug, Deserialize)]
pub struct SortInput {
    pub path: String,
    #[serde(default)]
    pub order: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ValidSort {
    pub vector: AttributeVector,
    pub column: ColumnRef,
    pub order: SortOrder,
}

impl ValidSort {
    /// Ordering direction once `reversed` (backward paging) is applied.
    pub fn effective(&self, reversed: bool) -> SortOrder {
        if reversed {
            self.order.reverse()
        } else {
            self.order
        }
    }
}

/// Validate `inputs` in order, drop repeated paths, and append the primary key when missing.
///
/// Paths through a Junction or Collection are rejected: one root row would carry many sort values.
pub fn validate_sorts(
    model: &ResolvedModel,
    root: &Arc<Entity>,
    inputs: &[SortInput],
    max_depth: usize,
) -> Result<Vec<ValidSort>, AppError> {
    let mut out: Vec<ValidSort> = Vec::with_capacity(inputs.len() + 1);
    for input in inputs {
        let order = match input.order.as_deref() {
            None => SortOrder::Asc,
            Some(s) => SortOrder::parse(s)
                .ok_or_else(|| AppError::validation(&input.path, format!("unknown sort order '{}'", s)))?,
        };
        let vector = AttributeVector::resolve(model, root, &input.path, max_depth)?;
        if vector.is_collective() {
            return Err(AppError::validation(
                &input.path,
                "cannot sort through a collection or junction relation",
            ));
        }
        let column = vector.column()?;
        if out.iter().any(|s| s.vector.full_path == vector.full_path) {
            continue;
        }
        out.push(ValidSort { vector, column, order });
    }
    let pk = AttributeVector::primary_key(root);
    if !out.iter().any(|s| s.vector.full_path == pk.full_path) {
        let column = pk.column()?;
        out.push(ValidSort {
            vector: pk,
            column,
            order: SortOrder::Asc,
        });
    }
    Ok(out)
}

pub fn order_terms(sorts: &[ValidSort], reversed: bool) -> Vec<OrderTerm> {
    sorts
        .iter()
        .map(|s| OrderTerm {
            column: s.column.clone(),
            descending: s.effective(reversed) == SortOrder::Desc,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolved::fixtures::blog_model;
    use serde_json::json;

    fn sorts(v: serde_json::Value) -> Result<Vec<ValidSort>, AppError> {
        let model = blog_model();
        let post = model.lookup("post").unwrap().clone();
        let inputs: Vec<SortInput> = serde_json::from_value(v).unwrap();
        validate_sorts(&model, &post, &inputs, 5)
    }

    #[test]
    fn appends_primary_key_tiebreaker() {
        let s = sorts(json!([{"path": "views", "order": "desc"}, {"path": "author.name"}])).unwrap();
        let paths: Vec<&str> = s.iter().map(|s| s.vector.full_path.as_str()).collect();
        assert_eq!(paths, vec!["views", "author.name", "id"]);
        assert_eq!(s[0].order, SortOrder::Desc);
        assert_eq!(s[2].order, SortOrder::Asc);
    }

    #[test]
    fn explicit_primary_key_keeps_its_direction() {
        let s = sorts(json!([{"path": "id", "order": "Desc"}])).unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(s[0].order, SortOrder::Desc);
    }

    #[test]
    fn repeated_paths_collapse() {
        let s = sorts(json!([{"path": "title"}, {"path": "title", "order": "desc"}])).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s[0].order, SortOrder::Asc);
    }

    #[test]
    fn collective_sort_paths_are_rejected() {
        assert!(matches!(sorts(json!([{"path": "tags.name"}])), Err(AppError::Validation { .. })));
        assert!(matches!(sorts(json!([{"path": "title", "order": "up"}])), Err(AppError::Validation { .. })));
    }

    #[test]
    fn reversed_terms_flip_every_direction() {
        let s = sorts(json!([{"path": "views", "order": "desc"}])).unwrap();
        let terms = order_terms(&s, true);
        assert!(!terms[0].descending);
        assert!(terms[1].descending);
    }
}
