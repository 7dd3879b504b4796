//! Execution guard
//!
//! Runs one statement under the gateway's bounds:
//! - write policy checked before any connection is touched
//! - parameters bound through the driver, never interpolated
//! - per-session `statement_timeout` plus a client-side backstop
//! - row cap appended to unbounded plain reads
//! - transaction control refused, session state reset before reuse
//! - connection released on every path, discarded when its state is unknown

pub mod pool;
pub mod scan;
pub mod values;

use crate::core::{
    GatewayConfig, GatewayError, QueryRequest, QueryResult, Result, WritePolicy,
};
use futures::TryStreamExt;
use scan::ScannedSql;
use sqlx::postgres::{PgArguments, PgConnection, PgRow};
use sqlx::{Connection, Either};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use pool::{ConnectionPool, Lease, PoolStats};

/// Client-side wait beyond `statement_timeout` before giving up on the server
pub const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Leading keywords that open, close or mark a transaction block.
///
/// Each call runs in its own implicit transaction, so these are refused.
pub const TRANSACTION_CONTROL: &[&str] = &[
    "begin", "start", "commit", "end", "rollback", "abort", "savepoint", "release",
];

/// `SELECT`, `WITH`, `VALUES` or `TABLE`
fn is_read_keyword(keyword: &str) -> bool {
    matches!(keyword, "select" | "with" | "values" | "table")
}

/// Whether the outermost query already bounds its result (`LIMIT`, `FETCH FIRST/NEXT`).
///
/// Comments, quoted text and parenthesized subqueries are not looked at.
pub fn has_row_limit(sql: &str) -> bool {
    ScannedSql::scan(sql).has_top_level_limit()
}

/// Text to execute in place of `sql`, when a row cap has to be appended.
///
/// Trailing comments and semicolons are dropped and the cap goes on its own line.
pub fn apply_row_cap(sql: &str, cap: u32) -> Option<String> {
    let scanned = ScannedSql::scan(sql);
    if scanned.has_multiple_statements()
        || !is_read_keyword(&scanned.first_keyword())
        || scanned.has_top_level_limit()
    {
        return None;
    }
    Some(format!("{}\nLIMIT {}", scanned.body(sql), cap))
}

fn reject_transaction_control(sql: &str) -> Result<()> {
    let keyword = ScannedSql::scan(sql).first_keyword();
    if TRANSACTION_CONTROL.contains(&keyword.as_str()) {
        return Err(GatewayError::InvalidArguments(format!(
            "{} is not supported: each call runs as its own transaction",
            keyword.to_ascii_uppercase()
        )));
    }
    Ok(())
}

/// Guarded executor shared by every operation
#[derive(Clone)]
pub struct ExecutionGuard {
    pool: ConnectionPool,
    config: Arc<GatewayConfig>,
    policy: WritePolicy,
}

impl ExecutionGuard {
    pub fn new(pool: ConnectionPool, config: Arc<GatewayConfig>) -> Self {
        let policy = WritePolicy::new(config.allow_write);
        ExecutionGuard {
            pool,
            config,
            policy,
        }
    }

    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Execute one statement
    pub async fn execute(&self, request: &QueryRequest) -> Result<QueryResult> {
        let started = Instant::now();

        let classification = self.policy.authorize(&request.sql)?;
        reject_transaction_control(&request.sql)?;
        let capped = apply_row_cap(&request.sql, self.config.max_rows);
        let executed_sql = capped.as_deref().unwrap_or(&request.sql);
        let arguments = values::bind_arguments(&request.params)?;

        let mut lease = self.pool.acquire().await?;
        let budget = self.config.statement_timeout() + CANCEL_GRACE;

        // In flight from here on: any early exit discards the connection.
        lease.begin_statement();

        let pid = match tokio::time::timeout(budget, prepare_session(lease.connection()?, &self.config)).await {
            Ok(Ok(pid)) => pid,
            Ok(Err(e)) => return Err(GatewayError::from_sqlx(e, &self.config)),
            Err(_) => return Err(GatewayError::QueryTimeout(self.config.statement_timeout())),
        };
        lease.set_backend_pid(pid);

        debug!(
            backend_pid = pid,
            %classification,
            params = request.params.len(),
            capped = capped.is_some(),
            "Executing statement"
        );

        let outcome = tokio::time::timeout(
            budget,
            run_statement(lease.connection()?, executed_sql, arguments),
        )
        .await;

        let Ok(outcome) = outcome else {
            warn!(
                backend_pid = pid,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Statement exceeded client-side budget"
            );
            return Err(GatewayError::QueryTimeout(self.config.statement_timeout()));
        };
        lease.end_statement();

        let (pg_rows, rows_affected) = match outcome {
            Ok(done) => done,
            Err(e) => {
                let transport = is_transport_error(&e);
                let err = GatewayError::from_sqlx(e, &self.config);
                if transport || matches!(err, GatewayError::QueryTimeout(_)) {
                    lease.mark_unusable();
                } else {
                    self.reset(&mut lease, budget).await;
                }
                warn!(
                    backend_pid = pid,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "Statement failed"
                );
                return Err(err);
            }
        };
        self.reset(&mut lease, budget).await;
        lease.release();

        let rows = pg_rows
            .iter()
            .map(values::decode_row)
            .collect::<Result<Vec<_>>>()?;

        let row_count = if rows.is_empty() {
            rows_affected
        } else {
            rows.len() as u64
        };
        let truncated = !rows.is_empty() && rows.len() as u64 == self.config.max_rows as u64;
        let note = truncated.then(|| {
            if capped.is_some() {
                format!(
                    "Result limited to {} rows; add an explicit LIMIT to control the result size",
                    self.config.max_rows
                )
            } else {
                format!(
                    "Result has exactly {} rows, the configured row cap; more rows may exist",
                    self.config.max_rows
                )
            }
        });

        info!(
            row_count,
            truncated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Statement completed"
        );

        Ok(QueryResult {
            rows,
            row_count,
            truncated,
            note,
            executed_sql: capped,
        })
    }

    /// Reset session state before the connection goes back to the pool.
    ///
    /// A failed or interrupted reset discards the connection.
    async fn reset(&self, lease: &mut Lease, budget: Duration) {
        if !lease.is_reusable() {
            return;
        }
        lease.begin_statement();
        let outcome = match lease.connection() {
            Ok(conn) => tokio::time::timeout(budget, reset_session(conn)).await,
            Err(_) => return,
        };
        match outcome {
            Ok(Ok(())) => lease.end_statement(),
            Ok(Err(e)) => {
                lease.end_statement();
                lease.mark_unusable();
                debug!(error = %e, "Session reset failed");
            }
            Err(_) => warn!("Session reset exceeded its budget"),
        }
    }
}

/// Record the backend pid and pin the session's statement timeout.
///
/// Runs on every lease so a caller cannot carry a changed timeout across calls.
async fn prepare_session(
    conn: &mut PgConnection,
    config: &GatewayConfig,
) -> std::result::Result<i32, sqlx::Error> {
    let (pid, _): (i32, String) = sqlx::query_as(
        "SELECT pg_backend_pid(), set_config('statement_timeout', $1, false)",
    )
    .persistent(false)
    .bind(config.statement_timeout_ms.to_string())
    .fetch_one(conn)
    .await?;
    Ok(pid)
}

/// Drop settings, prepared statements, temporary tables, listeners and
/// advisory locks a statement may have left on the session.
///
/// `DISCARD ALL` fails inside a transaction block, which discards the connection.
async fn reset_session(conn: &mut PgConnection) -> std::result::Result<(), sqlx::Error> {
    conn.clear_cached_statements().await?;
    sqlx::Executor::execute(conn, sqlx::raw_sql("DISCARD ALL")).await?;
    Ok(())
}

#[allow(deprecated)]
async fn run_statement(
    conn: &mut PgConnection,
    sql: &str,
    arguments: PgArguments,
) -> std::result::Result<(Vec<PgRow>, u64), sqlx::Error> {
    let mut stream = sqlx::query_with(sql, arguments)
        .persistent(false)
        .fetch_many(conn);

    let mut rows = Vec::new();
    let mut rows_affected = 0;
    while let Some(item) = stream.try_next().await? {
        match item {
            Either::Left(done) => rows_affected += done.rows_affected(),
            Either::Right(row) => rows.push(row),
        }
    }
    Ok((rows, rows_affected))
}

fn is_transport_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_cap_appended_to_unbounded_select() {
        assert_eq!(
            apply_row_cap("SELECT * FROM t;", 100).unwrap(),
            "SELECT * FROM t\nLIMIT 100"
        );
        assert_eq!(
            apply_row_cap("  with x as (select 1) select * from x  ", 5).unwrap(),
            "  with x as (select 1) select * from x\nLIMIT 5"
        );
    }

    #[test]
    fn test_row_cap_survives_trailing_comment() {
        assert_eq!(
            apply_row_cap("select * from t -- all of it", 10).unwrap(),
            "select * from t\nLIMIT 10"
        );
        assert_eq!(apply_row_cap("SELECT 1; -- x", 10).unwrap(), "SELECT 1\nLIMIT 10");
        assert_eq!(
            apply_row_cap("SELECT * FROM t /* done */;\n", 10).unwrap(),
            "SELECT * FROM t\nLIMIT 10"
        );
    }

    #[test]
    fn test_hidden_limits_do_not_suppress_cap() {
        assert_eq!(
            apply_row_cap("SELECT * FROM big -- limit 1", 50).unwrap(),
            "SELECT * FROM big\nLIMIT 50"
        );
        assert_eq!(
            apply_row_cap("SELECT *, 'limit 1' AS tag FROM big", 50).unwrap(),
            "SELECT *, 'limit 1' AS tag FROM big\nLIMIT 50"
        );
        assert_eq!(
            apply_row_cap("SELECT *, (SELECT 1 LIMIT 1) FROM big", 50).unwrap(),
            "SELECT *, (SELECT 1 LIMIT 1) FROM big\nLIMIT 50"
        );
        assert!(apply_row_cap("SELECT * FROM (SELECT * FROM big) s LIMIT 10", 50).is_none());
    }

    #[test]
    fn test_commented_and_parenthesized_reads_capped() {
        assert_eq!(
            apply_row_cap("/* report */ SELECT * FROM t", 7).unwrap(),
            "/* report */ SELECT * FROM t\nLIMIT 7"
        );
        assert!(apply_row_cap("(SELECT * FROM t)", 7).is_some());
        assert!(apply_row_cap("VALUES (1), (2)", 7).is_some());
        assert!(apply_row_cap("TABLE t", 7).is_some());
    }

    #[test]
    fn test_multiple_statements_not_capped() {
        assert!(apply_row_cap("SELECT 1; SELECT 2", 7).is_none());
    }

    #[test]
    fn test_explicit_limits_left_untouched() {
        assert!(apply_row_cap("SELECT * FROM t LIMIT 5000", 100).is_none());
        assert!(apply_row_cap("select * from t limit all", 100).is_none());
        assert!(apply_row_cap("select * from t limit $1", 100).is_none());
        assert!(apply_row_cap("SELECT * FROM t FETCH FIRST 3 ROWS ONLY", 100).is_none());
    }

    #[test]
    fn test_non_reads_not_capped() {
        assert!(apply_row_cap("EXPLAIN SELECT * FROM t", 100).is_none());
        assert!(apply_row_cap("insert into t values (1)", 100).is_none());
        assert!(apply_row_cap("show search_path", 100).is_none());
    }

    #[test]
    fn test_limit_detection_needs_word_boundary() {
        assert!(!has_row_limit("select speed_limit from cars"));
        assert!(!has_row_limit("select limits from t"));
        assert!(has_row_limit("select * from t\nLIMIT\n10"));
    }

    #[tokio::test]
    async fn test_write_rejected_without_acquire() {
        let config = Arc::new(GatewayConfig::default());
        let guard = ExecutionGuard::new(ConnectionPool::connect_lazy(config.clone()), config);

        let err = guard
            .execute(&QueryRequest::new("DELETE FROM accounts"))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::WriteNotAllowed(_)));
        assert_eq!(guard.pool().stats().acquired, 0);
    }

    #[tokio::test]
    async fn test_transaction_control_rejected_without_acquire() {
        let config = Arc::new(GatewayConfig {
            allow_write: true,
            ..Default::default()
        });
        let guard = ExecutionGuard::new(ConnectionPool::connect_lazy(config.clone()), config);

        for sql in ["BEGIN", "start transaction", "/* keep */ COMMIT", "-- x\nrollback;"] {
            let err = guard.execute(&QueryRequest::new(sql)).await.unwrap_err();
            assert!(matches!(err, GatewayError::InvalidArguments(_)), "{}", sql);
        }
        assert_eq!(guard.pool().stats().acquired, 0);
    }
}
