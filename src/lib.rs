//! CMS query engine: metadata-driven joins, filters, sorts and keyset pagination over PostgreSQL.

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod migration;
pub mod query;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{load_from_pool, parse_config, resolve, FullConfig, ResolvedModel};
pub use error::{AppError, ConfigError};
pub use migration::apply_migrations;
pub use query::{PageInfo, QueryRequest};
pub use routes::{api_router, common_routes_with_ready, config_routes, query_routes};
pub use service::{Executor, ListResult, PgSession, QueryService, SingleResult};
pub use settings::{init_tracing, Settings};
pub use state::{AppState, ModelHandle};
pub use store::{ensure_database_exists, ensure_sys_tables, replace_entities};
