//! MCP server adapter using the rmcp SDK
//!
//! Every registered operation is exposed as one MCP tool. `tools/call` is
//! forwarded to the dispatcher; failures come back as tool results with
//! `isError` set rather than as protocol errors.

use crate::core::ToolResult;
use crate::dispatch::{Dispatcher, OPERATIONS};
use rmcp::{
    model::{
        CallToolRequestParam as CallToolRequestParams, CallToolResult, Content, Implementation,
        InitializeRequestParam as InitializeRequestParams, InitializeResult, JsonObject,
        ListToolsResult, PaginatedRequestParam as PaginatedRequestParams, ServerCapabilities,
        ServerInfo, Tool,
    },
    service::RequestContext,
    ErrorData, RoleServer, ServerHandler,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;

/// MCP server exposing the gateway operations
#[derive(Clone)]
pub struct GatewayServer {
    dispatcher: Dispatcher,
}

impl GatewayServer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        GatewayServer { dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Tool definitions built from the operation registry
    pub fn tools() -> Vec<Tool> {
        OPERATIONS
            .iter()
            .map(|descriptor| {
                let schema = match descriptor.input_schema() {
                    JsonValue::Object(map) => map,
                    _ => JsonObject::new(),
                };
                Tool::new(descriptor.name, descriptor.description, Arc::new(schema))
            })
            .collect()
    }

    /// Convert a dispatcher result into an MCP tool result.
    ///
    /// Structured content is only attached when the payload is an object.
    fn tool_result_to_call_result(result: ToolResult) -> CallToolResult {
        let contents = vec![Content::text(result.text)];
        let mut call_result = if result.is_error {
            CallToolResult::error(contents)
        } else {
            CallToolResult::success(contents)
        };
        if let Some(structured @ JsonValue::Object(_)) = result.structured_content {
            call_result.structured_content = Some(structured);
        }
        call_result
    }
}

impl ServerHandler for GatewayServer {
    fn get_info(&self) -> ServerInfo {
        let config = self.dispatcher.guard().config();
        let mode = if config.allow_write {
            "Writes are enabled."
        } else {
            "The gateway is read-only: INSERT, UPDATE, DELETE and DDL statements are refused."
        };

        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "sqlgate".to_string(),
                title: Some("PostgreSQL query gateway".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                website_url: None,
                icons: None,
            },
            instructions: Some(format!(
                "Query a PostgreSQL database through guarded operations. \
                Use list_schemas, list_tables and describe_table to explore, then query to run SQL \
                with $1, $2, ... parameters. Unbounded reads are limited to {} rows and every \
                statement times out after {}ms. {}",
                config.max_rows, config.statement_timeout_ms, mode
            )),
        }
    }

    async fn initialize(
        &self,
        _request: InitializeRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, ErrorData> {
        Ok(self.get_info())
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: Self::tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        debug!(tool = %request.name, "Tool call");
        let args = request.arguments.unwrap_or_default();
        let result = self.dispatcher.call(&request.name, args).await;
        Ok(Self::tool_result_to_call_result(result))
    }
}
