//! Transport-agnostic request shape.

use crate::query::cursor::{PaginationInput, SpanInput};
use crate::query::filter::FilterInput;
use crate::query::sort::SortInput;
use serde::Deserialize;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Root entity name. Routes fill this from the URL.
    #[serde(default)]
    pub entity: String,
    /// Dot-paths to return. Empty selects every column of the root entity.
    #[serde(default, alias = "selectedFieldPaths")]
    pub fields: Vec<String>,
    #[serde(default)]
    pub relations: Vec<RelationRequest>,
    #[serde(default)]
    pub filters: Vec<FilterInput>,
    #[serde(default)]
    pub sorts: Vec<SortInput>,
    #[serde(default)]
    pub pagination: Option<PaginationInput>,
    #[serde(default)]
    pub span: Option<SpanInput>,
}

/// Nested selection of a relation, resolved by one batched query per page.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationRequest {
    /// Relation attribute on the parent entity.
    pub field: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub relations: Vec<RelationRequest>,
    #[serde(default)]
    pub filters: Vec<FilterInput>,
    #[serde(default)]
    pub sorts: Vec<SortInput>,
    /// Per-parent window for Collection and Junction relations.
    #[serde(default)]
    pub pagination: Option<PaginationInput>,
}
