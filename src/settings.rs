//! Runtime settings from environment variables, plus tracing setup for binaries.

use crate::config::is_identifier;
use crate::error::ConfigError;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/cms";
pub const DEFAULT_SYS_SCHEMA: &str = "cms";

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    /// Schema holding the `_sys_*` metadata tables. Checked by [`Settings::validate`].
    pub sys_schema: String,
    /// Per-statement timeout. Exceeding it fails the call with a retryable error.
    pub command_timeout: Duration,
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// Maximum number of relation hops in one attribute path.
    pub max_path_depth: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            sys_schema: DEFAULT_SYS_SCHEMA.to_string(),
            command_timeout: Duration::from_millis(30_000),
            default_page_size: 20,
            max_page_size: 1000,
            max_path_depth: 5,
        }
    }
}

impl Settings {
    /// Read settings from the environment; unparsable values fall back to defaults.
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Settings {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            sys_schema: std::env::var("CMS_SYS_SCHEMA").unwrap_or(defaults.sys_schema),
            command_timeout: env_parse("CMS_COMMAND_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.command_timeout),
            default_page_size: env_parse("CMS_DEFAULT_PAGE_SIZE").unwrap_or(defaults.default_page_size),
            max_page_size: env_parse("CMS_MAX_PAGE_SIZE").unwrap_or(defaults.max_page_size),
            max_path_depth: env_parse("CMS_MAX_PATH_DEPTH").unwrap_or(defaults.max_path_depth),
        }
    }
}

impl Settings {
    /// Reject values that would be interpolated into DDL. Call once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_identifier(&self.sys_schema) {
            return Err(ConfigError::InvalidIdentifier(self.sys_schema.clone()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("{}: cannot parse '{}', using default", key, raw);
            None
        }
    }
}

/// Install a fmt subscriber honouring `RUST_LOG`, defaulting to `default_directive`.
pub fn init_tracing(default_directive: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
