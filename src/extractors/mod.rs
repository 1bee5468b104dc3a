//! Request extractors.

pub mod scope;
pub use scope::{VisibilityScope, PUBLICATION_STATUS_HEADER};
