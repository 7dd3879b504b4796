//! Tests for the MCP adapter

use rmcp::ServerHandler;
use sqlgate::core::GatewayConfig;
use sqlgate::dispatch::Dispatcher;
use sqlgate::execution::{ConnectionPool, ExecutionGuard};
use sqlgate::mcp::GatewayServer;
use std::sync::Arc;

fn server(config: GatewayConfig) -> GatewayServer {
    let config = Arc::new(config);
    let pool = ConnectionPool::connect_lazy(config.clone());
    GatewayServer::new(Dispatcher::new(ExecutionGuard::new(pool, config)))
}

#[test]
fn test_one_tool_per_operation() {
    let tools = GatewayServer::tools();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();
    assert_eq!(names.len(), 8);
    for expected in [
        "query",
        "list_tables",
        "describe_table",
        "table_stats",
        "explain_query",
        "list_indexes",
        "list_schemas",
        "pool_stats",
    ] {
        assert!(names.contains(&expected), "missing tool {}", expected);
    }
}

#[test]
fn test_tool_schemas_describe_arguments() {
    let tools = GatewayServer::tools();
    let describe = tools
        .iter()
        .find(|t| t.name == "describe_table")
        .unwrap();

    assert_eq!(describe.input_schema["type"], "object");
    let properties = describe.input_schema["properties"].as_object().unwrap();
    assert!(properties.contains_key("table"));
    assert!(properties.contains_key("schema"));
    assert_eq!(describe.input_schema["required"], serde_json::json!(["table"]));
}

#[tokio::test]
async fn test_server_info_reflects_policy() {
    let read_only = server(GatewayConfig::default()).get_info();
    assert!(read_only.capabilities.tools.is_some());
    assert_eq!(read_only.server_info.name, "sqlgate");
    assert!(read_only.instructions.unwrap().contains("read-only"));

    let writable = server(GatewayConfig {
        allow_write: true,
        max_rows: 25,
        ..Default::default()
    })
    .get_info();
    let instructions = writable.instructions.unwrap();
    assert!(instructions.contains("Writes are enabled"));
    assert!(instructions.contains("25 rows"));
}
