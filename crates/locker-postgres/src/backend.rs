//! PostgreSQL implementation of the storage capabilities.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use locker_core::backend::{AdvisoryBackend, LeaseBackend, RecordBackend, RowLockBackend, RowWait};
use locker_core::error::{LockError, LockResult};
use locker_core::holder::HolderId;
use locker_core::key::AdvisoryKey;
use locker_core::record::{LockRecord, lease_expiry};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

use crate::connection::PostgresConnection;
use crate::error::{LOCK_NOT_AVAILABLE, backend, has_code, unavailable};
use crate::sql::{self, DEFAULT_TABLE, Queries};

/// Builder for [`PostgresBackend`] configuration.
pub struct PostgresBackendBuilder {
    connection: Option<PostgresConnection>,
    table_name: String,
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PostgresBackendBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            connection: None,
            table_name: DEFAULT_TABLE.to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the PostgreSQL connection string.
    pub fn connection_string(mut self, conn_str: impl Into<String>) -> Self {
        self.connection = Some(PostgresConnection::ConnectionString(conn_str.into()));
        self
    }

    /// Sets an existing connection pool.
    pub fn pool(mut self, pool: PgPool) -> Self {
        self.connection = Some(PostgresConnection::Pool(pool));
        self
    }

    /// Table holding lock records, optionally schema-qualified. Defaults to `locks`.
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Pool size when the pool is created from a connection string.
    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// How long to wait for a pooled connection.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Builds the backend.
    pub async fn build(self) -> LockResult<PostgresBackend> {
        let connection = self.connection.ok_or_else(|| {
            LockError::Configuration("connection not specified".to_string())
        })?;
        if self.max_connections == 0 {
            return Err(LockError::Configuration(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        let queries = Queries::new(&self.table_name)?;
        let pool = connection
            .get_pool(self.max_connections, self.acquire_timeout)
            .await?;

        Ok(PostgresBackend {
            pool,
            queries: Arc::new(queries),
        })
    }
}

impl Default for PostgresBackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock storage in one PostgreSQL database.
///
/// Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    queries: Arc<Queries>,
}

/// A pooled connection pinned for the lifetime of a session-scoped lock.
pub struct PgSession {
    conn: PoolConnection<Postgres>,
}

impl PgSession {
    /// The underlying connection.
    pub fn connection(&mut self) -> &mut PoolConnection<Postgres> {
        &mut self.conn
    }
}

/// The open transaction holding a row lock.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgTransaction {
    /// The underlying transaction. Statements run here see the locked row.
    pub fn transaction(&mut self) -> &mut Transaction<'static, Postgres> {
        &mut self.tx
    }
}

impl PostgresBackend {
    /// Returns a new builder for configuring the backend.
    pub fn builder() -> PostgresBackendBuilder {
        PostgresBackendBuilder::new()
    }

    /// Creates a backend using the specified connection string.
    pub async fn new(connection_string: impl Into<String>) -> LockResult<Self> {
        Self::builder()
            .connection_string(connection_string)
            .build()
            .await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn record_from_row(row: &PgRow) -> LockResult<LockRecord> {
    Ok(LockRecord {
        key: row.try_get("key").map_err(backend)?,
        holder: row.try_get("holder").map_err(backend)?,
        acquired_at: row.try_get("acquired_at").map_err(backend)?,
        expires_at: row.try_get("expires_at").map_err(backend)?,
        sequence: row.try_get("sequence").map_err(backend)?,
    })
}

impl RecordBackend for PostgresBackend {
    #[instrument(skip(self), fields(backend = "postgres"))]
    async fn ensure_record_exists(&self, key: &str) -> LockResult<()> {
        sqlx::query(&self.queries.ensure)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn fetch_record(&self, key: &str) -> LockResult<Option<LockRecord>> {
        let row = sqlx::query(&self.queries.fetch)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(record_from_row).transpose()
    }
}

impl LeaseBackend for PostgresBackend {
    #[instrument(skip(self, holder), fields(backend = "postgres"))]
    async fn execute_atomic_claim(
        &self,
        key: &str,
        holder: &HolderId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> LockResult<Option<LockRecord>> {
        let row = sqlx::query(&self.queries.claim)
            .bind(key)
            .bind(holder.as_str())
            .bind(now)
            .bind(lease_expiry(now, ttl))
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn execute_renew(
        &self,
        key: &str,
        holder: &HolderId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> LockResult<bool> {
        let result = sqlx::query(&self.queries.renew)
            .bind(key)
            .bind(holder.as_str())
            .bind(lease_expiry(now, ttl))
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn execute_release(
        &self,
        key: &str,
        holder: &HolderId,
        now: DateTime<Utc>,
    ) -> LockResult<bool> {
        let result = sqlx::query(&self.queries.release)
            .bind(key)
            .bind(holder.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn query_is_held_by_me(
        &self,
        key: &str,
        holder: &HolderId,
        now: DateTime<Utc>,
    ) -> LockResult<bool> {
        sqlx::query_scalar::<_, bool>(&self.queries.is_held)
            .bind(key)
            .bind(holder.as_str())
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)
    }
}

impl RowLockBackend for PostgresBackend {
    type Transaction = PgTransaction;

    #[instrument(skip(self), fields(backend = "postgres"))]
    async fn lock_row(&self, key: &str, wait: RowWait) -> LockResult<Option<PgTransaction>> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        let statement = match wait {
            RowWait::NoWait => &self.queries.lock_row_nowait,
            RowWait::Wait(timeout) => {
                if let Some(timeout) = timeout {
                    sqlx::query(&sql::lock_timeout(timeout))
                        .execute(&mut *tx)
                        .await
                        .map_err(backend)?;
                }
                &self.queries.lock_row
            }
        };

        match sqlx::query(statement).bind(key).fetch_optional(&mut *tx).await {
            Ok(Some(_)) => Ok(Some(PgTransaction { tx })),
            Ok(None) => Err(LockError::Backend(
                format!("no lock record for key '{key}'").into(),
            )),
            // dropping the transaction rolls it back
            Err(e) if has_code(&e, LOCK_NOT_AVAILABLE) => {
                debug!("row is locked by another transaction");
                Ok(None)
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn transaction_alive(&self, tx: &mut PgTransaction) -> LockResult<bool> {
        match sqlx::query("SELECT 1").execute(&mut *tx.tx).await {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) => {
                debug!(error = %e, "transaction is no longer usable");
                Ok(false)
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn end_transaction(&self, tx: PgTransaction) -> LockResult<bool> {
        match tx.tx.rollback().await {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!(error = %e, "rollback failed, row lock already gone");
                Ok(false)
            }
        }
    }
}

async fn advisory_call(
    conn: &mut PoolConnection<Postgres>,
    statement: &str,
    key: AdvisoryKey,
) -> LockResult<bool> {
    let query = sqlx::query_scalar::<_, bool>(statement);
    let query = match key {
        AdvisoryKey::Single(k) => query.bind(k),
        AdvisoryKey::Pair(k1, k2) => query.bind(k1).bind(k2),
    };
    query.fetch_one(&mut **conn).await.map_err(backend)
}

impl AdvisoryBackend for PostgresBackend {
    type Session = PgSession;

    async fn open_session(&self) -> LockResult<PgSession> {
        let conn = self.pool.acquire().await.map_err(unavailable)?;
        Ok(PgSession { conn })
    }

    #[instrument(skip(self, session), fields(backend = "postgres", advisory_key = %key))]
    async fn try_native_lock(&self, session: &mut PgSession, key: AdvisoryKey) -> LockResult<bool> {
        advisory_call(&mut session.conn, sql::try_advisory_lock(key), key).await
    }

    async fn release_native_lock(&self, session: &mut PgSession, key: AdvisoryKey) -> LockResult<bool> {
        advisory_call(&mut session.conn, sql::advisory_unlock(key), key).await
    }

    async fn is_native_lock_held_by_session(
        &self,
        session: &mut PgSession,
        key: AdvisoryKey,
    ) -> LockResult<bool> {
        let (classid, objid) = key.keys();
        sqlx::query_scalar::<_, bool>(sql::ADVISORY_HELD)
            .bind(classid)
            .bind(objid)
            .bind(sql::objsubid(key))
            .fetch_one(&mut *session.conn)
            .await
            .map_err(backend)
    }

    async fn close_session(&self, session: PgSession, reusable: bool) {
        if reusable {
            return;
        }
        // lock state unknown: never hand this connection to another caller
        if let Err(e) = session.conn.close().await {
            debug!(error = %e, "closing session failed");
        }
    }
}
