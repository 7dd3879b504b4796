//! Tests for core module: classification, write policy, configuration and errors

use sqlgate::core::config::ConfigError;
use sqlgate::core::policy::MUTATING_KEYWORDS;
use sqlgate::core::{classify, Classification, ErrorKind, GatewayConfig, GatewayError, WritePolicy};
use std::collections::HashMap;
use std::io::Write;
use tempfile::NamedTempFile;

fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
    Some(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

fn yaml_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_every_mutating_keyword_detected() {
    for keyword in MUTATING_KEYWORDS {
        for sql in [
            format!("{} x", keyword),
            format!("   {} x", keyword.to_uppercase()),
            format!("\n\t{}\n x", keyword),
        ] {
            assert_eq!(classify(&sql), Classification::Mutating, "{:?}", sql);
        }
    }
}

#[test]
fn test_non_mutating_statements() {
    for sql in [
        "SELECT * FROM users",
        "with t as (select 1) select * from t",
        "SHOW statement_timeout",
        "EXPLAIN DELETE FROM t",
        "VALUES (1), (2)",
        "selectinsert",
    ] {
        assert_eq!(classify(sql), Classification::ReadOnly, "{:?}", sql);
    }
}

#[test]
fn test_read_only_policy_reports_keyword() {
    let err = WritePolicy::read_only()
        .authorize("  truncate table audit_log")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriteNotAllowed);
    assert!(err.to_string().contains("TRUNCATE"));
}

#[test]
fn test_config_file_then_env_precedence() {
    let file = yaml_file(
        r#"
host: db.internal
port: 6543
database: analytics
max_rows: 250
allow_write: false
"#,
    );

    let config = GatewayConfig::load_with_env(
        Some(file.path()),
        env(&[("SQLGATE_MAX_ROWS", "50"), ("SQLGATE_ALLOW_WRITE", "true")]),
    )
    .unwrap();

    assert_eq!(config.host, "db.internal");
    assert_eq!(config.port, 6543);
    assert_eq!(config.database, "analytics");
    assert_eq!(config.max_rows, 50);
    assert!(config.allow_write);
    // untouched fields keep their defaults
    assert_eq!(config.statement_timeout_ms, 30_000);
    assert_eq!(config.max_connections, 10);
}

#[test]
fn test_invalid_config_rejected() {
    let file = yaml_file("max_connections: 0\n");
    let err = GatewayConfig::load_with_env(Some(file.path()), env(&[])).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));

    let err = GatewayConfig::load_with_env(None, env(&[("SQLGATE_STATEMENT_TIMEOUT_MS", "0")]))
        .unwrap_err();
    assert!(err.to_string().contains("statement_timeout_ms"));
}

#[test]
fn test_missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.yaml");
    assert!(matches!(
        GatewayConfig::load_with_env(Some(&missing), env(&[])),
        Err(ConfigError::Load(_))
    ));
}

#[test]
fn test_password_not_serialized() {
    let config = GatewayConfig::load_with_env(None, env(&[("SQLGATE_PASSWORD", "hunter2")])).unwrap();
    assert_eq!(config.password, "hunter2");
    assert!(!serde_json::to_string(&config).unwrap().contains("hunter2"));
}

#[test]
fn test_only_transient_kinds_are_retryable() {
    let transient: Vec<ErrorKind> = [
        ErrorKind::InvalidArguments,
        ErrorKind::WriteNotAllowed,
        ErrorKind::PoolExhausted,
        ErrorKind::QueryTimeout,
        ErrorKind::DatabaseError,
        ErrorKind::UnknownOperation,
    ]
    .into_iter()
    .filter(ErrorKind::is_transient)
    .collect();
    assert_eq!(transient, vec![ErrorKind::PoolExhausted, ErrorKind::QueryTimeout]);
}

#[test]
fn test_non_database_driver_errors_become_database_errors() {
    let config = GatewayConfig::default();
    let err = GatewayError::from_sqlx(sqlx::Error::RowNotFound, &config);
    assert_eq!(err.kind(), ErrorKind::DatabaseError);
}
