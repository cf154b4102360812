//! Connection settings for the PostgreSQL event store.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::{EventStoreError, Result};

/// PostgreSQL configuration.
///
/// Reads from environment variables:
/// - `DATABASE_URL`: connection string. When unset, a local default is derived
///   from `APP_ENV` (`test` or `development`, default `test`).
/// - `PG_MAX_CONNECTIONS`: pool size (default: `5`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl PgConfig {
    /// Loads configuration from the environment.
    ///
    /// `basename` names the local databases used when `DATABASE_URL` is not
    /// set (`<basename>-test`, `<basename>-development`).
    pub fn from_env(basename: &str) -> Result<Self> {
        Self::from_lookup(basename, |key| std::env::var(key).ok())
    }

    fn from_lookup(basename: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = match lookup("DATABASE_URL") {
            Some(url) => url,
            None => {
                let env = lookup("APP_ENV").unwrap_or_else(|| "test".to_string());
                match env.as_str() {
                    "test" | "development" => format!("postgres://localhost/{basename}-{env}"),
                    other => {
                        return Err(EventStoreError::Configuration(format!(
                            "Environment variable 'DATABASE_URL' required when APP_ENV={other}"
                        )));
                    }
                }
            }
        };

        Ok(Self {
            database_url,
            max_connections: lookup("PG_MAX_CONNECTIONS")
                .and_then(|n| n.parse().ok())
                .unwrap_or(5),
        })
    }

    /// Opens the connection pool. Call once at process start and share the pool.
    pub async fn connect(&self) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await?;
        Ok(pool)
    }
}
