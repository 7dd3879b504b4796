//! sqlgate CLI
//!
//! Main entry point for the sqlgate MCP server.
//! Supports multiple modes:
//! - serve: run as an MCP server over stdio (default) or streamable HTTP
//! - check: verify connectivity and print the effective settings
//! - operations: list the registered operations and their schemas
//! - call: run one operation from the shell

use anyhow::{Context, Result};
use axum::extract::State;
use axum::response::Json;
use clap::{Parser, Subcommand, ValueEnum};
use rmcp::{transport::stdio, ServiceExt};
use serde_json::{json, Value as JsonValue};
use sqlgate::core::{GatewayConfig, QueryRequest};
use sqlgate::dispatch::{Dispatcher, OPERATIONS};
use sqlgate::execution::{ConnectionPool, ExecutionGuard};
use sqlgate::mcp::GatewayServer;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sqlgate")]
#[command(about = "sqlgate - guarded SQL gateway for PostgreSQL", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (YAML); SQLGATE_* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server (stdio by default)
    Serve {
        #[command(subcommand)]
        mode: Option<ServerMode>,
    },

    /// Connect once, report the server version and effective settings
    Check,

    /// List operations and their argument schemas
    #[command(visible_alias = "ls")]
    Operations {
        /// JSON output
        #[arg(short, long)]
        json: bool,
    },

    /// Run one operation
    /// Usage: sqlgate call <operation> [json-args]
    Call {
        /// Operation name, e.g. list_tables
        operation: String,

        /// JSON arguments (or use stdin)
        args: Option<String>,
    },
}

#[derive(Subcommand)]
enum ServerMode {
    /// Run in stdio mode (default for MCP)
    Stdio,

    /// Run in HTTP mode
    Http {
        /// Bind address
        #[arg(short, long, default_value = "127.0.0.1:8000")]
        bind: String,
    },
}

/// Initialize logging. Output goes to stderr; stdout carries the stdio transport.
fn init_logging(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{}={}", env!("CARGO_CRATE_NAME"), level).into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn build_dispatcher(config: Arc<GatewayConfig>) -> Dispatcher {
    let pool = ConnectionPool::connect_lazy(config.clone());
    Dispatcher::new(ExecutionGuard::new(pool, config))
}

/// Open one connection so a bad setup shows up in the logs at startup
async fn check_reachable(dispatcher: &Dispatcher) {
    match dispatcher.pool().acquire().await {
        Ok(lease) => {
            lease.release();
            info!("Database reachable");
        }
        Err(e) => warn!(error = %e, "Database not reachable yet; operations will retry on demand"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}

async fn health(State(pool): State<ConnectionPool>) -> Json<JsonValue> {
    Json(json!({
        "status": "healthy",
        "service": "sqlgate",
        "version": env!("CARGO_PKG_VERSION"),
        "pool": pool.stats(),
    }))
}

fn print_banner(config: &GatewayConfig, mode: &str) {
    eprintln!("sqlgate v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Mode: {}", mode);
    eprintln!("Database: {}", config.target());
    eprintln!(
        "Writes: {}",
        if config.allow_write { "ENABLED" } else { "disabled" }
    );
    eprintln!(
        "Row cap: {}, statement timeout: {}ms, pool size: {}",
        config.max_rows, config.statement_timeout_ms, config.max_connections
    );
    eprintln!();
}

fn read_args(args: Option<String>) -> Result<serde_json::Map<String, JsonValue>> {
    let args_json = if let Some(a) = args {
        a
    } else {
        use std::io::{IsTerminal, Read};
        let mut buffer = String::new();
        if !std::io::stdin().is_terminal() {
            std::io::stdin().read_to_string(&mut buffer)?;
        }
        buffer.trim().to_string()
    };

    if args_json.is_empty() {
        return Ok(serde_json::Map::new());
    }

    match serde_json::from_str(&args_json).context("Invalid JSON arguments")? {
        JsonValue::Object(map) => Ok(map),
        other => anyhow::bail!("Arguments must be a JSON object, got: {}", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_format);

    let config = Arc::new(
        GatewayConfig::load(cli.config.as_deref()).context("Failed to load configuration")?,
    );

    match cli.command.unwrap_or(Commands::Serve { mode: None }) {
        Commands::Serve { mode } => {
            let dispatcher = build_dispatcher(config.clone());
            let server = GatewayServer::new(dispatcher.clone());

            match mode.unwrap_or(ServerMode::Stdio) {
                ServerMode::Stdio => {
                    print_banner(&config, "stdio");
                    info!(target_db = %config.target(), "Starting sqlgate in stdio mode");
                    check_reachable(&dispatcher).await;

                    let service = server.serve(stdio()).await?;
                    tokio::select! {
                        quit = service.waiting() => {
                            quit?;
                        }
                        _ = shutdown_signal() => {}
                    }
                }

                ServerMode::Http { bind } => {
                    print_banner(&config, "HTTP");
                    eprintln!("Listening on: http://{}", bind);
                    eprintln!("MCP Endpoint: http://{}/mcp", bind);
                    eprintln!();
                    info!(%bind, target_db = %config.target(), "Starting sqlgate in HTTP mode");
                    check_reachable(&dispatcher).await;

                    use rmcp::transport::streamable_http_server::{
                        session::local::LocalSessionManager,
                        tower::{StreamableHttpServerConfig, StreamableHttpService},
                    };

                    let mcp_service = StreamableHttpService::new(
                        move || Ok(server.clone()),
                        LocalSessionManager::default().into(),
                        StreamableHttpServerConfig::default(),
                    );

                    let app = axum::Router::new()
                        .route("/health", axum::routing::get(health))
                        .nest_service("/mcp", mcp_service)
                        .layer(CorsLayer::permissive())
                        .with_state(dispatcher.pool().clone());

                    let listener = tokio::net::TcpListener::bind(&bind)
                        .await
                        .with_context(|| format!("Failed to bind {}", bind))?;
                    info!("HTTP server listening on {}", bind);

                    axum::serve(listener, app)
                        .with_graceful_shutdown(shutdown_signal())
                        .await?;
                }
            }

            dispatcher.pool().close().await;
        }

        Commands::Check => {
            info!(target_db = %config.target(), "Checking connectivity");
            let pool = ConnectionPool::connect(config.clone())
                .await
                .with_context(|| format!("Failed to connect to {}", config.target()))?;
            let guard = ExecutionGuard::new(pool.clone(), config.clone());

            let result = guard
                .execute(&QueryRequest::new(
                    "SELECT version() AS version, current_user AS login",
                ))
                .await?;
            let row = result.rows.first().context("Server returned no version row")?;

            println!("Connected to {}", config.target());
            println!("Server: {}", row.get("version").and_then(JsonValue::as_str).unwrap_or("unknown"));
            println!("Login: {}", row.get("login").and_then(JsonValue::as_str).unwrap_or("unknown"));
            println!();
            println!("Effective settings:");
            print!("{}", serde_yaml::to_string(&*config)?);

            pool.close().await;
        }

        Commands::Operations { json } => {
            if json {
                let listing: Vec<JsonValue> = OPERATIONS
                    .iter()
                    .map(|d| {
                        json!({
                            "name": d.name,
                            "description": d.description,
                            "inputSchema": d.input_schema(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                for d in OPERATIONS {
                    println!("{:<16} {}", d.name, d.description);
                }
            }
        }

        Commands::Call { operation, args } => {
            let args = read_args(args)?;
            let dispatcher = build_dispatcher(config.clone());

            let outcome = dispatcher.dispatch(&operation, args).await;
            dispatcher.pool().close().await;

            match outcome {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Err(err) => {
                    println!("{}", serde_json::to_string_pretty(&err.to_payload())?);
                    std::process::exit(2);
                }
            }
        }
    }

    Ok(())
}
