//! Query execution: binds validated requests to the database collaborator.

pub mod executor;
mod query;
mod relations;
pub mod rows;

pub use executor::{Executor, PgSession};
pub use query::{FieldError, ListPlan, ListResult, QueryService, SingleResult};
pub use relations::PARENT_LABEL;
