//! Per-request query structures: attribute paths, join graph, filters, sorts and cursors.

pub mod cursor;
pub mod filter;
mod request;
pub mod sort;
pub mod tree;
pub mod vector;

pub use cursor::{PageInfo, PaginationInput, SeekDirection, SpanInput, ValidPagination};
pub use filter::{ConstraintInput, FilterInput, MatchType, Operator, ValidFilter};
pub use request::{QueryRequest, RelationRequest};
pub use sort::{SortInput, SortOrder, ValidSort};
pub use tree::{AttributeTree, JoinGraph};
pub use vector::{AttributeVector, ROOT_ALIAS};
