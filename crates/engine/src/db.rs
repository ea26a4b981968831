//! Database connection pool management and statement execution.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::Config;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    Ok(pool)
}

/// Check if the database connection is healthy.
pub async fn check_health(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

/// Runs one fully rendered statement and returns every row as a JSON object.
///
/// This is the only suspension point of a request.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Value>, sqlx::Error>;
}

/// [`QueryExecutor`] backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgExecutor {
    pool: PgPool,
    statement_timeout: Option<Duration>,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout: None,
        }
    }

    /// Apply `SET LOCAL statement_timeout` to every execution.
    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn fetch_rows(&self, sql: &str) -> Result<Vec<Value>, sqlx::Error> {
        let wrapped = format!("SELECT row_to_json(t) FROM ({sql}) t");

        let Some(timeout) = self.statement_timeout else {
            return sqlx::query_scalar::<_, Value>(&wrapped)
                .fetch_all(&self.pool)
                .await;
        };

        // SET LOCAL only lives until commit/rollback.
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;
        let rows = sqlx::query_scalar::<_, Value>(&wrapped)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(rows)
    }
}
