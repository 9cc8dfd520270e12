//! Connection pool management for PostgreSQL locks.

use std::time::Duration;

use locker_core::error::{LockError, LockResult};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::unavailable;

/// PostgreSQL connection source.
#[derive(Debug, Clone)]
pub enum PostgresConnection {
    /// Connection string - library manages pooling.
    ConnectionString(String),
    /// External connection pool.
    Pool(PgPool),
}

impl PostgresConnection {
    /// Creates a connection pool from a connection string.
    ///
    /// Session-scoped locks pin one pooled connection each, so size the pool
    /// for the number of locks held at once.
    pub async fn create_pool(
        connection_string: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> LockResult<PgPool> {
        if connection_string.is_empty() {
            return Err(LockError::Configuration(
                "connection string cannot be empty".to_string(),
            ));
        }
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(connection_string)
            .await
            .map_err(unavailable)
    }

    /// Gets or creates a connection pool.
    pub async fn get_pool(
        &self,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> LockResult<PgPool> {
        match self {
            Self::ConnectionString(conn_str) => {
                Self::create_pool(conn_str, max_connections, acquire_timeout).await
            }
            Self::Pool(pool) => Ok(pool.clone()),
        }
    }
}
