//! Core types and data structures for sqlgate
//!
//! This module defines the fundamental types used across the gateway:
//! - Error taxonomy shared by every layer
//! - Query requests and results
//! - The tool result contract handed back to callers
//! - Configuration and write policy

pub mod config;
pub mod policy;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use config::GatewayConfig;
pub use policy::{classify, Classification, WritePolicy};

/// SQLSTATE raised by PostgreSQL when `statement_timeout` cancels a statement
pub const SQLSTATE_QUERY_CANCELED: &str = "57014";

/// Programmatic error kinds, stable across the external contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or missing call arguments; the database was not touched
    InvalidArguments,
    /// Mutating statement refused by the write policy; nothing ran
    WriteNotAllowed,
    /// No connection became available within the acquire bound
    PoolExhausted,
    /// Statement exceeded its time budget; its connection was discarded
    QueryTimeout,
    /// The database rejected or failed the statement
    DatabaseError,
    /// No operation is registered under the requested name
    UnknownOperation,
}

impl ErrorKind {
    /// Whether the caller may reasonably retry the same call later
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::PoolExhausted | ErrorKind::QueryTimeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidArguments => "InvalidArguments",
            ErrorKind::WriteNotAllowed => "WriteNotAllowed",
            ErrorKind::PoolExhausted => "PoolExhausted",
            ErrorKind::QueryTimeout => "QueryTimeout",
            ErrorKind::DatabaseError => "DatabaseError",
            ErrorKind::UnknownOperation => "UnknownOperation",
        };
        f.write_str(name)
    }
}

/// Error type shared by the pool, guard, introspection and dispatcher layers
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Write operations are disabled: {0} statements are not allowed")]
    WriteNotAllowed(String),

    #[error("Connection pool exhausted: no connection available within {}ms", .0.as_millis())]
    PoolExhausted(Duration),

    #[error("Query exceeded the statement timeout of {}ms", .0.as_millis())]
    QueryTimeout(Duration),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::InvalidArguments(_) => ErrorKind::InvalidArguments,
            GatewayError::WriteNotAllowed(_) => ErrorKind::WriteNotAllowed,
            GatewayError::PoolExhausted(_) => ErrorKind::PoolExhausted,
            GatewayError::QueryTimeout(_) => ErrorKind::QueryTimeout,
            GatewayError::Database(_) => ErrorKind::DatabaseError,
            GatewayError::UnknownOperation(_) => ErrorKind::UnknownOperation,
        }
    }

    /// Translate a driver error into the gateway taxonomy.
    ///
    /// Messages are passed through from the engine, with the SQLSTATE and any
    /// detail/hint appended, after credentials have been redacted.
    pub fn from_sqlx(err: sqlx::Error, config: &GatewayConfig) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => GatewayError::PoolExhausted(config.acquire_timeout()),
            sqlx::Error::Database(db)
                if db.code().as_deref() == Some(SQLSTATE_QUERY_CANCELED) =>
            {
                GatewayError::QueryTimeout(config.statement_timeout())
            }
            sqlx::Error::Database(db) => {
                let mut message = db.message().to_string();
                if let Some(pg) = db.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
                    if let Some(detail) = pg.detail() {
                        message.push_str(&format!(" (detail: {})", detail));
                    }
                    if let Some(hint) = pg.hint() {
                        message.push_str(&format!(" (hint: {})", hint));
                    }
                }
                if let Some(code) = db.code() {
                    message.push_str(&format!(" [SQLSTATE {}]", code));
                }
                GatewayError::Database(config.redact(&message))
            }
            other => GatewayError::Database(config.redact(&other.to_string())),
        }
    }
}

/// One result row: column name to JSON value, in column order
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A statement and its bind parameters.
///
/// Parameters travel through the driver's argument channel (`$1`, `$2`, ...)
/// and are never spliced into `sql`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        QueryRequest {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<serde_json::Value>) -> Self {
        QueryRequest {
            sql: sql.into(),
            params,
        }
    }

    /// Append one bind parameter
    pub fn bind(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Outcome of one guarded execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<Row>,

    /// Returned rows, or rows affected for statements that return none
    pub row_count: u64,

    /// Set when the returned row count equals the configured row cap
    #[serde(default)]
    pub truncated: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    /// Statement text actually sent, when it differs from the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_sql: Option<String>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Decode every row into a typed record
    pub fn rows_as<T: serde::de::DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.rows
            .iter()
            .map(|row| {
                serde_json::from_value(serde_json::Value::Object(row.clone())).map_err(|e| {
                    GatewayError::Database(format!("Unexpected result shape: {}", e))
                })
            })
            .collect()
    }
}

/// Tool result handed to the invocation layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub text: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,

    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(text: String) -> Self {
        ToolResult {
            text,
            structured_content: None,
            is_error: false,
        }
    }

    pub fn error(message: String) -> Self {
        ToolResult {
            text: message,
            structured_content: None,
            is_error: true,
        }
    }

    pub fn with_structured(mut self, data: serde_json::Value) -> Self {
        self.structured_content = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let cases = [
            (
                GatewayError::InvalidArguments("x".into()),
                ErrorKind::InvalidArguments,
            ),
            (
                GatewayError::WriteNotAllowed("DELETE".into()),
                ErrorKind::WriteNotAllowed,
            ),
            (
                GatewayError::PoolExhausted(Duration::from_secs(1)),
                ErrorKind::PoolExhausted,
            ),
            (
                GatewayError::QueryTimeout(Duration::from_secs(1)),
                ErrorKind::QueryTimeout,
            ),
            (GatewayError::Database("x".into()), ErrorKind::DatabaseError),
            (
                GatewayError::UnknownOperation("x".into()),
                ErrorKind::UnknownOperation,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn test_pool_timeout_maps_to_exhausted() {
        let config = GatewayConfig::default();
        let err = GatewayError::from_sqlx(sqlx::Error::PoolTimedOut, &config);
        assert_eq!(err.kind(), ErrorKind::PoolExhausted);
        assert!(err.kind().is_transient());
    }

    #[test]
    fn test_error_kind_serializes_by_name() {
        let json = serde_json::to_value(ErrorKind::WriteNotAllowed).unwrap();
        assert_eq!(json, serde_json::json!("WriteNotAllowed"));
        assert_eq!(ErrorKind::QueryTimeout.to_string(), "QueryTimeout");
    }

    #[test]
    fn test_tool_result_contract() {
        let result = ToolResult::error("boom".to_string());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["isError"], true);
        assert_eq!(json["text"], "boom");
        assert!(json.get("structuredContent").is_none());
    }

    #[test]
    fn test_rows_as_typed() {
        #[derive(Deserialize)]
        struct Item {
            id: i64,
        }

        let mut row = Row::new();
        row.insert("id".into(), serde_json::json!(7));
        let result = QueryResult {
            rows: vec![row],
            row_count: 1,
            truncated: false,
            note: None,
            executed_sql: None,
        };
        let items: Vec<Item> = result.rows_as().unwrap();
        assert_eq!(items[0].id, 7);
    }
}
