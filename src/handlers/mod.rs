//! HTTP handlers for entity queries and metadata ingestion.

pub mod config;
pub mod query;
