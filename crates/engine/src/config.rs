//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default cap on selection nesting.
pub const DEFAULT_MAX_SELECTION_DEPTH: usize = 16;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Schema introspected for table metadata (default: public).
    pub database_schema: String,

    /// Per-statement timeout applied inside the execution transaction.
    pub statement_timeout: Option<Duration>,

    /// Maximum nesting depth accepted in a selection (default: 16).
    pub max_selection_depth: usize,

    /// TOML file with mapping declarations.
    pub mappings_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let database_schema = env::var("DATABASE_SCHEMA").unwrap_or_else(|_| "public".to_string());

        let statement_timeout = env::var("STATEMENT_TIMEOUT_MS")
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("STATEMENT_TIMEOUT_MS must be a number of milliseconds")?
            .map(Duration::from_millis);

        let max_selection_depth = env::var("MAX_SELECTION_DEPTH")
            .unwrap_or_else(|_| DEFAULT_MAX_SELECTION_DEPTH.to_string())
            .parse()
            .context("MAX_SELECTION_DEPTH must be a valid usize")?;

        let mappings_path = env::var("MAPPINGS_PATH").ok().map(PathBuf::from);

        Ok(Self {
            database_url,
            database_max_connections,
            database_schema,
            statement_timeout,
            max_selection_depth,
            mappings_path,
        })
    }
}
