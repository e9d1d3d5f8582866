//! PostgreSQL connection pool.

use std::fmt;

#[cfg(all(feature = "postgres", feature = "deadpool"))]
use crate::{DieselConfig, DieselError, DieselResult};
#[cfg(all(feature = "postgres", feature = "deadpool"))]
use diesel_async::AsyncPgConnection;
#[cfg(all(feature = "postgres", feature = "deadpool"))]
use std::sync::Arc;
#[cfg(all(feature = "postgres", feature = "deadpool"))]
use waybill_log::{debug, info};

#[cfg(all(feature = "postgres", feature = "deadpool"))]
use diesel_async::pooled_connection::deadpool::{Object as DeadpoolObject, Pool as DeadpoolPool};

#[cfg(all(feature = "postgres", feature = "deadpool"))]
use diesel_async::scoped_futures::ScopedBoxFuture;

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// PostgreSQL default; what the outbox claim relies on.
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL fragment for `SET TRANSACTION ISOLATION LEVEL`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// PostgreSQL connection pool using deadpool.
#[cfg(all(feature = "postgres", feature = "deadpool"))]
#[derive(Clone)]
pub struct PgPool {
    pool: DeadpoolPool<AsyncPgConnection>,
    config: Arc<DieselConfig>,
}

#[cfg(all(feature = "postgres", feature = "deadpool"))]
impl PgPool {
    /// Create a new PostgreSQL connection pool. Connections are opened lazily.
    pub async fn new(config: DieselConfig) -> DieselResult<Self> {
        use diesel_async::pooled_connection::AsyncDieselConnectionManager;

        info!(
            { "url" => config.redacted_url(), "pool_size" => config.pool_size },
            "Creating PostgreSQL connection pool"
        );

        let manager =
            AsyncDieselConnectionManager::<AsyncPgConnection>::new(config.connection_url());

        let pool = DeadpoolPool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| DieselError::Pool(e.to_string()))?;

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    /// Get a connection from the pool, waiting at most `connect_timeout`.
    pub async fn get(&self) -> DieselResult<DeadpoolObject<AsyncPgConnection>> {
        debug!("Acquiring PostgreSQL connection from pool");
        tokio::time::timeout(self.config.connect_timeout, self.pool.get())
            .await
            .map_err(|_| {
                DieselError::Timeout(format!(
                    "no connection to {} within {:?}",
                    self.config.redacted_url(),
                    self.config.connect_timeout
                ))
            })?
            .map_err(|e| DieselError::Pool(e.to_string()))
    }

    /// Run `f` in a transaction on a pooled connection.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise.
    ///
    /// ```rust,ignore
    /// use diesel_async::scoped_futures::ScopedFutureExt;
    ///
    /// pool.transaction::<_, DieselError, _>(|conn| async move {
    ///     diesel::sql_query("UPDATE ...").execute(conn).await?;
    ///     Ok(())
    /// }.scope_boxed()).await?;
    /// ```
    pub async fn transaction<'a, R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: for<'r> FnOnce(&'r mut AsyncPgConnection) -> ScopedBoxFuture<'a, 'r, Result<R, E>>
            + Send
            + 'a,
        E: From<diesel::result::Error> + From<DieselError> + Send + 'a,
        R: Send + 'a,
    {
        use diesel_async::AsyncConnection;

        let mut conn = self.get().await?;
        let conn: &mut AsyncPgConnection = &mut conn;
        conn.transaction(f).await
    }

    /// Like [`transaction`](Self::transaction), with an explicit isolation level.
    pub async fn transaction_with_isolation<'a, R, E, F>(
        &self,
        isolation: IsolationLevel,
        f: F,
    ) -> Result<R, E>
    where
        F: for<'r> FnOnce(&'r mut AsyncPgConnection) -> ScopedBoxFuture<'a, 'r, Result<R, E>>
            + Send
            + 'a,
        E: From<diesel::result::Error> + From<DieselError> + Send + 'a,
        R: Send + 'a,
    {
        use diesel_async::scoped_futures::ScopedFutureExt;
        use diesel_async::{AsyncConnection, RunQueryDsl};

        let mut conn = self.get().await?;
        let conn: &mut AsyncPgConnection = &mut conn;

        conn.transaction(move |conn| {
            async move {
                diesel::sql_query(format!(
                    "SET TRANSACTION ISOLATION LEVEL {}",
                    isolation.as_sql()
                ))
                .execute(conn)
                .await?;
                f(conn).await
            }
            .scope_boxed()
        })
        .await
    }

    /// Check that a connection can be opened and used.
    pub async fn ping(&self) -> DieselResult<()> {
        use diesel_async::RunQueryDsl;

        let mut conn = self.get().await?;
        let conn: &mut AsyncPgConnection = &mut conn;
        diesel::sql_query("SELECT 1").execute(conn).await?;
        debug!({ "url" => self.config.redacted_url() }, "PostgreSQL connection healthy");
        Ok(())
    }

    /// Get pool statistics.
    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            size: status.size,
            available: status.available,
            waiting: status.waiting,
            max_size: status.max_size,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &DieselConfig {
        &self.config
    }
}

#[cfg(all(feature = "postgres", feature = "deadpool"))]
impl fmt::Debug for PgPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgPool")
            .field("url", &self.config.redacted_url())
            .field("status", &self.status())
            .finish()
    }
}

/// Connection pool statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    /// Current number of connections.
    pub size: usize,
    /// Number of available (idle) connections.
    pub available: usize,
    /// Number of tasks waiting for a connection.
    pub waiting: usize,
    /// Maximum pool size.
    pub max_size: usize,
}

impl PoolStatus {
    /// Share of the pool in use, as a percentage.
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            (self.size.saturating_sub(self.available) as f64 / self.max_size as f64) * 100.0
        }
    }

    /// Check if the pool is under pressure.
    pub fn is_under_pressure(&self) -> bool {
        self.waiting > 0 || self.utilization() > 80.0
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} in use, {} waiting",
            self.size.saturating_sub(self.available),
            self.max_size,
            self.waiting
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization() {
        let status = PoolStatus {
            size: 8,
            available: 2,
            waiting: 0,
            max_size: 10,
        };
        assert!((status.utilization() - 60.0).abs() < f64::EPSILON);
        assert!(!status.is_under_pressure());
        assert_eq!(status.to_string(), "6/10 in use, 0 waiting");
    }

    #[test]
    fn test_pressure_when_waiting() {
        let status = PoolStatus {
            size: 2,
            available: 2,
            waiting: 3,
            max_size: 2,
        };
        assert!(status.is_under_pressure());
    }

    #[test]
    fn test_empty_pool_utilization() {
        let status = PoolStatus {
            size: 0,
            available: 0,
            waiting: 0,
            max_size: 0,
        };
        assert_eq!(status.utilization(), 0.0);
    }

    #[test]
    fn test_isolation_sql() {
        assert_eq!(IsolationLevel::ReadCommitted.as_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
    }

    #[cfg(all(feature = "postgres", feature = "deadpool"))]
    #[tokio::test]
    async fn test_pool_is_lazy() {
        let pool = PgPool::new(DieselConfig::new("postgres://nobody@127.0.0.1:1/none").pool_size(2))
            .await
            .unwrap();
        assert_eq!(pool.status().max_size, 2);
        assert_eq!(pool.status().size, 0);
        assert_eq!(pool.config().pool_size, 2);
    }
}
