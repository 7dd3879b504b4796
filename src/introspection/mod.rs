//! Catalog introspection
//!
//! Fixed compositions of read-only catalog queries. Every query goes
//! through the [`ExecutionGuard`], so the row cap and statement timeout
//! apply here exactly as they do to caller SQL. Schema and table names are
//! checked against an identifier allow-list and then bound as parameters.

mod queries;

use crate::core::{GatewayError, QueryRequest, Result};
use crate::execution::{ExecutionGuard, PoolStats};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

pub const DEFAULT_SCHEMA: &str = "public";

/// PostgreSQL truncates identifiers beyond this many bytes
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Accept only plain identifiers: ASCII letters, digits, `_` and `$`,
/// starting with a letter or `_`.
pub fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    let starts_ok = value
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let chars_ok = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');

    if starts_ok && chars_ok && value.len() <= MAX_IDENTIFIER_LEN {
        return Ok(());
    }

    let shown: String = value.chars().take(MAX_IDENTIFIER_LEN + 1).collect();
    Err(GatewayError::InvalidArguments(format!(
        "{} must be 1-{} characters of letters, digits, '_' or '$' and start with a letter or '_' (got {:?})",
        kind, MAX_IDENTIFIER_LEN, shown
    )))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSummary {
    pub table_name: String,
    pub table_type: String,
    pub column_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    pub nullable: bool,
    pub column_default: Option<String>,
    pub max_length: Option<i32>,
    pub ordinal_position: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintInfo {
    pub constraint_name: String,
    /// `PRIMARY KEY`, `FOREIGN KEY`, `UNIQUE`, `CHECK`, `EXCLUDE` or `NOT NULL`
    pub constraint_type: String,
    pub columns: Vec<String>,
    pub referenced_table: Option<String>,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescription {
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub constraints: Vec<ConstraintInfo>,
}

impl TableDescription {
    pub fn primary_key(&self) -> Option<&ConstraintInfo> {
        self.constraints
            .iter()
            .find(|c| c.constraint_type == "PRIMARY KEY")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub table: String,
    /// Planner estimate; -1 when the table was never vacuumed or analyzed
    pub row_estimate: i64,
    pub live_tuples: Option<i64>,
    pub dead_tuples: Option<i64>,
    pub total_bytes: i64,
    pub table_bytes: i64,
    pub index_bytes: i64,
    pub toast_bytes: i64,
    pub total_size: String,
    pub last_vacuum: Option<String>,
    pub last_autovacuum: Option<String>,
    pub last_analyze: Option<String>,
    pub last_autoanalyze: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub table_name: String,
    pub index_name: String,
    pub definition: String,
    pub is_unique: bool,
    pub is_primary: bool,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSummary {
    pub schema_name: String,
    pub owner: String,
    pub table_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainPlan {
    pub plan: JsonValue,
    pub analyzed: bool,
}

/// Introspection operations over one execution guard
#[derive(Clone)]
pub struct Catalog {
    guard: ExecutionGuard,
}

impl Catalog {
    pub fn new(guard: ExecutionGuard) -> Self {
        Catalog { guard }
    }

    pub fn guard(&self) -> &ExecutionGuard {
        &self.guard
    }

    /// Tables and views in `schema` with their column counts
    pub async fn list_tables(&self, schema: &str) -> Result<Vec<TableSummary>> {
        validate_identifier("schema", schema)?;
        debug!(schema, "Listing tables");

        let request = QueryRequest::new(queries::LIST_TABLES).bind(schema);
        self.guard.execute(&request).await?.rows_as()
    }

    /// Columns and constraints of one table
    pub async fn describe_table(&self, schema: &str, table: &str) -> Result<TableDescription> {
        validate_identifier("schema", schema)?;
        validate_identifier("table", table)?;
        debug!(schema, table, "Describing table");

        let columns: Vec<ColumnInfo> = self
            .guard
            .execute(&QueryRequest::new(queries::DESCRIBE_COLUMNS).bind(schema).bind(table))
            .await?
            .rows_as()?;

        if columns.is_empty() {
            return Err(missing_relation(schema, table));
        }

        let constraints: Vec<ConstraintInfo> = self
            .guard
            .execute(
                &QueryRequest::new(queries::DESCRIBE_CONSTRAINTS)
                    .bind(schema)
                    .bind(table),
            )
            .await?
            .rows_as()?;

        Ok(TableDescription {
            schema: schema.to_string(),
            table: table.to_string(),
            columns,
            constraints,
        })
    }

    /// Row estimate and storage breakdown of one table
    pub async fn table_stats(&self, schema: &str, table: &str) -> Result<TableStats> {
        validate_identifier("schema", schema)?;
        validate_identifier("table", table)?;
        debug!(schema, table, "Collecting table statistics");

        let mut stats: Vec<TableStats> = self
            .guard
            .execute(&QueryRequest::new(queries::TABLE_STATS).bind(schema).bind(table))
            .await?
            .rows_as()?;

        let mut stats = stats.pop().ok_or_else(|| missing_relation(schema, table))?;
        stats.schema = schema.to_string();
        stats.table = table.to_string();
        Ok(stats)
    }

    /// Index definitions in `schema`, optionally for one table only
    pub async fn list_indexes(&self, schema: &str, table: Option<&str>) -> Result<Vec<IndexInfo>> {
        validate_identifier("schema", schema)?;
        if let Some(table) = table {
            validate_identifier("table", table)?;
        }
        debug!(schema, ?table, "Listing indexes");

        let request = QueryRequest::new(queries::LIST_INDEXES)
            .bind(schema)
            .bind(table.map(JsonValue::from).unwrap_or(JsonValue::Null));
        self.guard.execute(&request).await?.rows_as()
    }

    /// Schemas with their table counts; system schemas only on request
    pub async fn list_schemas(&self, include_system: bool) -> Result<Vec<SchemaSummary>> {
        debug!(include_system, "Listing schemas");
        let request = QueryRequest::new(queries::LIST_SCHEMAS).bind(include_system);
        self.guard.execute(&request).await?.rows_as()
    }

    /// Execution plan of `sql` in JSON form.
    ///
    /// With `analyze` the statement really runs, so it must pass the write
    /// policy on its own, not merely as the argument of `EXPLAIN`.
    pub async fn explain(&self, sql: &str, analyze: bool) -> Result<ExplainPlan> {
        let inner = sql.trim().trim_end_matches(';').trim_end();
        if inner.is_empty() {
            return Err(GatewayError::InvalidArguments(
                "sql must not be empty".to_string(),
            ));
        }

        if analyze {
            self.guard.policy().authorize(inner)?;
        }

        let options = if analyze {
            "FORMAT JSON, ANALYZE, BUFFERS"
        } else {
            "FORMAT JSON"
        };
        let statement = format!("EXPLAIN ({}) {}", options, inner);
        debug!(analyze, "Explaining statement");

        let result = self.guard.execute(&QueryRequest::new(statement)).await?;
        let plan = result
            .rows
            .into_iter()
            .next()
            .and_then(|mut row| row.shift_remove("QUERY PLAN"))
            .ok_or_else(|| GatewayError::Database("EXPLAIN returned no plan".to_string()))?;

        Ok(ExplainPlan {
            plan,
            analyzed: analyze,
        })
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.guard.pool().stats()
    }
}

fn missing_relation(schema: &str, table: &str) -> GatewayError {
    GatewayError::Database(format!("relation \"{}.{}\" does not exist", schema, table))
}
