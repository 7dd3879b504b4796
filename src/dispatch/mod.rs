//! Operation dispatcher
//!
//! Routes a named call with a JSON argument map to one registered
//! operation, and is the single place where failures become the external
//! error payload `{ "isError": true, "kind": ..., "message": ... }`.

pub mod args;

use crate::core::{ErrorKind, GatewayError, QueryRequest, Result, ToolResult};
use crate::execution::{ConnectionPool, ExecutionGuard};
use crate::introspection::Catalog;
use args::{
    ExplainArgs, ListIndexesArgs, ListSchemasArgs, ListTablesArgs, NoArgs, QueryArgs, TableArgs,
};
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use std::fmt;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Handler tag of a registered operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Query,
    ListTables,
    DescribeTable,
    TableStats,
    ExplainQuery,
    ListIndexes,
    ListSchemas,
    PoolStats,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Query => "query",
            Operation::ListTables => "list_tables",
            Operation::DescribeTable => "describe_table",
            Operation::TableStats => "table_stats",
            Operation::ExplainQuery => "explain_query",
            Operation::ListIndexes => "list_indexes",
            Operation::ListSchemas => "list_schemas",
            Operation::PoolStats => "pool_stats",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Registry entry: name, description, argument schema and handler tag
pub struct OperationDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub operation: Operation,
    schema: fn() -> schemars::Schema,
}

impl OperationDescriptor {
    /// JSON schema of the operation's arguments
    pub fn input_schema(&self) -> JsonValue {
        serde_json::to_value((self.schema)()).unwrap_or_else(|_| json!({"type": "object"}))
    }
}

impl fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("name", &self.name)
            .field("operation", &self.operation)
            .finish()
    }
}

fn schema_of<T: JsonSchema>() -> schemars::Schema {
    schemars::schema_for!(T)
}

pub static OPERATIONS: &[OperationDescriptor] = &[
    OperationDescriptor {
        name: "query",
        description: "Run one SQL statement with optional positional parameters ($1, $2, ...). \
            Unbounded SELECT/WITH reads are capped at the configured row limit; \
            mutating statements are refused unless writes are enabled.",
        operation: Operation::Query,
        schema: schema_of::<QueryArgs>,
    },
    OperationDescriptor {
        name: "list_tables",
        description: "List tables and views in a schema with their column counts.",
        operation: Operation::ListTables,
        schema: schema_of::<ListTablesArgs>,
    },
    OperationDescriptor {
        name: "describe_table",
        description: "Describe a table's columns and constraints.",
        operation: Operation::DescribeTable,
        schema: schema_of::<TableArgs>,
    },
    OperationDescriptor {
        name: "table_stats",
        description: "Row estimate, tuple counts, on-disk sizes and maintenance timestamps of a table.",
        operation: Operation::TableStats,
        schema: schema_of::<TableArgs>,
    },
    OperationDescriptor {
        name: "explain_query",
        description: "Show the execution plan of a statement as JSON. \
            With analyze the statement is executed, subject to the write policy.",
        operation: Operation::ExplainQuery,
        schema: schema_of::<ExplainArgs>,
    },
    OperationDescriptor {
        name: "list_indexes",
        description: "List indexes in a schema, optionally for one table.",
        operation: Operation::ListIndexes,
        schema: schema_of::<ListIndexesArgs>,
    },
    OperationDescriptor {
        name: "list_schemas",
        description: "List schemas with their table counts.",
        operation: Operation::ListSchemas,
        schema: schema_of::<ListSchemasArgs>,
    },
    OperationDescriptor {
        name: "pool_stats",
        description: "Connection pool size, idle connections and lease counters.",
        operation: Operation::PoolStats,
        schema: schema_of::<NoArgs>,
    },
];

pub fn find_operation(name: &str) -> Option<&'static OperationDescriptor> {
    OPERATIONS.iter().find(|d| d.name == name)
}

/// Failure of one dispatch, in the shape returned to callers
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct DispatchError {
    pub operation: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl DispatchError {
    pub fn new(operation: &str, err: GatewayError) -> Self {
        DispatchError {
            operation: operation.to_string(),
            kind: err.kind(),
            message: format!("{}: {}", operation, err),
        }
    }

    pub fn to_payload(&self) -> JsonValue {
        json!({
            "isError": true,
            "kind": self.kind,
            "message": self.message,
        })
    }
}

/// Routes named calls to operations
#[derive(Clone)]
pub struct Dispatcher {
    catalog: Catalog,
}

impl Dispatcher {
    pub fn new(guard: ExecutionGuard) -> Self {
        Dispatcher {
            catalog: Catalog::new(guard),
        }
    }

    pub fn operations(&self) -> &'static [OperationDescriptor] {
        OPERATIONS
    }

    pub fn guard(&self) -> &ExecutionGuard {
        self.catalog.guard()
    }

    pub fn pool(&self) -> &ConnectionPool {
        self.catalog.guard().pool()
    }

    /// Run one operation and return its JSON payload
    pub async fn dispatch(
        &self,
        name: &str,
        args: Map<String, JsonValue>,
    ) -> std::result::Result<JsonValue, DispatchError> {
        let Some(descriptor) = find_operation(name) else {
            warn!(operation = name, "Unknown operation");
            return Err(DispatchError::new(
                name,
                GatewayError::UnknownOperation(name.to_string()),
            ));
        };

        let started = Instant::now();
        debug!(operation = name, args = args.len(), "Dispatching");

        match self.run(descriptor.operation, args).await {
            Ok(value) => {
                info!(
                    operation = name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Operation completed"
                );
                Ok(value)
            }
            Err(err) => {
                let err = DispatchError::new(name, err);
                warn!(
                    operation = name,
                    kind = %err.kind,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Operation failed"
                );
                Err(err)
            }
        }
    }

    /// Like [`Dispatcher::dispatch`], rendered as a tool result
    pub async fn call(&self, name: &str, args: Map<String, JsonValue>) -> ToolResult {
        match self.dispatch(name, args).await {
            Ok(value) => ToolResult::success(pretty(&value)).with_structured(value),
            Err(err) => {
                let payload = err.to_payload();
                ToolResult::error(pretty(&payload)).with_structured(payload)
            }
        }
    }

    async fn run(&self, operation: Operation, args: Map<String, JsonValue>) -> Result<JsonValue> {
        let catalog = &self.catalog;
        match operation {
            Operation::Query => {
                let a: QueryArgs = args::parse(args)?;
                let request = QueryRequest::with_params(a.sql, a.params.unwrap_or_default());
                encode(catalog.guard().execute(&request).await?)
            }
            Operation::ListTables => {
                let a: ListTablesArgs = args::parse(args)?;
                encode(catalog.list_tables(&a.schema()?).await?)
            }
            Operation::DescribeTable => {
                let a: TableArgs = args::parse(args)?;
                encode(catalog.describe_table(&a.schema()?, &a.table).await?)
            }
            Operation::TableStats => {
                let a: TableArgs = args::parse(args)?;
                encode(catalog.table_stats(&a.schema()?, &a.table).await?)
            }
            Operation::ExplainQuery => {
                let a: ExplainArgs = args::parse(args)?;
                encode(catalog.explain(&a.sql, a.analyze.unwrap_or(false)).await?)
            }
            Operation::ListIndexes => {
                let a: ListIndexesArgs = args::parse(args)?;
                encode(catalog.list_indexes(&a.schema()?, a.table.as_deref()).await?)
            }
            Operation::ListSchemas => {
                let a: ListSchemasArgs = args::parse(args)?;
                encode(catalog.list_schemas(a.include_system.unwrap_or(false)).await?)
            }
            Operation::PoolStats => {
                let _: NoArgs = args::parse(args)?;
                encode(catalog.pool_stats())
            }
        }
    }
}

fn encode<T: Serialize>(value: T) -> Result<JsonValue> {
    serde_json::to_value(value)
        .map_err(|e| GatewayError::Database(format!("Failed to encode result: {}", e)))
}

fn pretty(value: &JsonValue) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_registry_names_unique_and_consistent() {
        let names: HashSet<_> = OPERATIONS.iter().map(|d| d.name).collect();
        assert_eq!(names.len(), OPERATIONS.len());
        for descriptor in OPERATIONS {
            assert_eq!(descriptor.name, descriptor.operation.name());
            assert!(find_operation(descriptor.name).is_some());
        }
        assert!(find_operation("drop_everything").is_none());
    }

    #[test]
    fn test_input_schemas_are_objects() {
        for descriptor in OPERATIONS {
            let schema = descriptor.input_schema();
            assert_eq!(schema["type"], "object", "{}", descriptor.name);
        }
        let query = find_operation("query").unwrap().input_schema();
        let required = query["required"].as_array().unwrap();
        assert_eq!(required, &vec![json!("sql")]);
    }

    #[test]
    fn test_error_payload_shape() {
        let err = DispatchError::new("query", GatewayError::WriteNotAllowed("DELETE".into()));
        let payload = err.to_payload();
        assert_eq!(payload["isError"], true);
        assert_eq!(payload["kind"], "WriteNotAllowed");
        assert!(payload["message"].as_str().unwrap().starts_with("query: "));
    }
}
