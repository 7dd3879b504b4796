//! Connection pool
//!
//! Wraps `sqlx::PgPool` with:
//! - a bounded acquire wait that surfaces as `PoolExhausted`
//! - [`Lease`], a scoped loan that returns or discards its connection on drop
//! - acquire/release/discard counters for observability
//!
//! A lease whose statement is still in flight when it is dropped (timeout,
//! caller cancellation) or that hit a transport failure is detached from the
//! pool instead of going back to the idle set. The pool opens a replacement
//! lazily on the next acquire.

use crate::core::{GatewayConfig, GatewayError, Result};
use serde::{Deserialize, Serialize};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions};
use sqlx::{Connection, Postgres};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct PoolCounters {
    acquired: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

struct Shared {
    counters: PoolCounters,
    connect_options: PgConnectOptions,
    config: Arc<GatewayConfig>,
}

/// Point-in-time pool statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Open connections, idle or leased
    pub size: u32,
    pub idle: usize,
    pub max_size: u32,
    pub acquired: u64,
    pub released: u64,
    pub discarded: u64,
    pub in_use: u64,
    pub acquire_timeout_ms: u64,
    pub idle_timeout_ms: u64,
}

/// Bounded, shareable pool of PostgreSQL connections
#[derive(Clone)]
pub struct ConnectionPool {
    pool: PgPool,
    shared: Arc<Shared>,
}

impl ConnectionPool {
    fn pool_options(config: &GatewayConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(0)
            .acquire_timeout(config.acquire_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .test_before_acquire(true)
    }

    /// Build the pool and open one connection to fail fast on bad settings
    pub async fn connect(config: Arc<GatewayConfig>) -> Result<Self> {
        let connect_options = config.connect_options();
        let pool = Self::pool_options(&config)
            .connect_with(connect_options.clone())
            .await
            .map_err(|e| GatewayError::from_sqlx(e, &config))?;

        info!(
            target_db = %config.target(),
            max_connections = config.max_connections,
            "Connection pool ready"
        );

        Ok(Self::from_parts(pool, connect_options, config))
    }

    /// Build the pool without connecting; connections open on first acquire
    pub fn connect_lazy(config: Arc<GatewayConfig>) -> Self {
        let connect_options = config.connect_options();
        let pool = Self::pool_options(&config).connect_lazy_with(connect_options.clone());
        Self::from_parts(pool, connect_options, config)
    }

    fn from_parts(pool: PgPool, connect_options: PgConnectOptions, config: Arc<GatewayConfig>) -> Self {
        ConnectionPool {
            pool,
            shared: Arc::new(Shared {
                counters: PoolCounters::default(),
                connect_options,
                config,
            }),
        }
    }

    /// Borrow a connection, waiting at most the configured acquire timeout
    pub async fn acquire(&self) -> Result<Lease> {
        let started = Instant::now();
        match self.pool.acquire().await {
            Ok(conn) => {
                self.shared.counters.acquired.fetch_add(1, Ordering::Relaxed);
                debug!(
                    wait_ms = started.elapsed().as_millis() as u64,
                    idle = self.pool.num_idle(),
                    "Connection acquired"
                );
                Ok(Lease {
                    conn: Some(conn),
                    shared: self.shared.clone(),
                    backend_pid: None,
                    in_flight: false,
                    reusable: true,
                })
            }
            Err(e) => {
                let err = GatewayError::from_sqlx(e, &self.shared.config);
                warn!(
                    wait_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "Connection acquire failed"
                );
                Err(err)
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let counters = &self.shared.counters;
        let acquired = counters.acquired.load(Ordering::Relaxed);
        let released = counters.released.load(Ordering::Relaxed);
        let discarded = counters.discarded.load(Ordering::Relaxed);
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max_size: self.shared.config.max_connections,
            acquired,
            released,
            discarded,
            in_use: acquired.saturating_sub(released + discarded),
            acquire_timeout_ms: self.shared.config.acquire_timeout_ms,
            idle_timeout_ms: self.shared.config.idle_timeout_ms,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.shared.config
    }

    /// Close idle connections and refuse new acquisitions
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Connection pool closed");
    }
}

/// Exclusive loan of one pooled connection.
///
/// Dropping the lease is the release: the connection goes back to the idle
/// set when its state is trusted and is discarded otherwise.
pub struct Lease {
    conn: Option<PoolConnection<Postgres>>,
    shared: Arc<Shared>,
    backend_pid: Option<i32>,
    in_flight: bool,
    reusable: bool,
}

impl Lease {
    pub fn connection(&mut self) -> Result<&mut PgConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| GatewayError::Database("Connection already released".to_string()))
    }

    pub fn set_backend_pid(&mut self, pid: i32) {
        self.backend_pid = Some(pid);
    }

    pub fn backend_pid(&self) -> Option<i32> {
        self.backend_pid
    }

    /// Mark a statement as running; until [`Lease::end_statement`] the
    /// connection is treated as untrusted
    pub fn begin_statement(&mut self) {
        self.in_flight = true;
    }

    pub fn end_statement(&mut self) {
        self.in_flight = false;
    }

    /// Discard rather than reuse the connection when the lease ends
    pub fn mark_unusable(&mut self) {
        self.reusable = false;
    }

    pub fn is_reusable(&self) -> bool {
        self.reusable && !self.in_flight
    }

    /// Explicit release; equivalent to dropping the lease
    pub fn release(self) {}
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let counters = &self.shared.counters;

        if self.is_reusable() {
            drop(conn);
            counters.released.fetch_add(1, Ordering::Relaxed);
            debug!("Connection returned to pool");
            return;
        }

        if self.in_flight {
            if let Some(pid) = self.backend_pid {
                spawn_cancel(self.shared.connect_options.clone(), pid);
            }
        }
        drop(conn.detach());
        counters.discarded.fetch_add(1, Ordering::Relaxed);
        warn!(
            backend_pid = ?self.backend_pid,
            in_flight = self.in_flight,
            "Discarded connection in untrusted state"
        );
    }
}

/// Best-effort `pg_cancel_backend` over a fresh, unpooled connection
fn spawn_cancel(options: PgConnectOptions, pid: i32) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        warn!(pid, "No runtime available to cancel in-flight statement");
        return;
    };

    handle.spawn(async move {
        match PgConnection::connect_with(&options).await {
            Ok(mut conn) => {
                match sqlx::query_scalar::<_, bool>("SELECT pg_cancel_backend($1)")
                    .bind(pid)
                    .fetch_one(&mut conn)
                    .await
                {
                    Ok(cancelled) => debug!(pid, cancelled, "Cancel requested for in-flight statement"),
                    Err(e) => warn!(pid, error = %e, "Cancel request failed"),
                }
                let _ = conn.close().await;
            }
            Err(e) => warn!(pid, error = %e, "Could not open connection to cancel statement"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lazy_pool_starts_empty() {
        let config = Arc::new(GatewayConfig {
            max_connections: 3,
            ..Default::default()
        });
        let pool = ConnectionPool::connect_lazy(config);
        let stats = pool.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.max_size, 3);
        assert_eq!(stats.acquired, 0);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn test_acquire_on_closed_pool_fails() {
        let pool = ConnectionPool::connect_lazy(Arc::new(GatewayConfig::default()));
        pool.close().await;
        let err = pool.acquire().await.err().unwrap();
        assert_eq!(err.kind(), crate::core::ErrorKind::DatabaseError);
        assert_eq!(pool.stats().acquired, 0);
    }
}
