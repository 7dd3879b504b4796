//! Per-operation argument schemas
//!
//! Each struct rejects unknown fields. Optional fields accept `null` as
//! absent. Boolean flags also accept the strings `"true"` and `"false"`.

use crate::core::{GatewayError, Result};
use crate::introspection::{validate_identifier, DEFAULT_SCHEMA};
use schemars::JsonSchema;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

fn params_schema(_gen: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": ["array", "null"],
        "items": {},
        "description": "Positional bind parameters for $1, $2, ..."
    })
}

/// Accept `true`, `false`, `"true"`, `"false"` (any case) or `null`
fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Bool(bool),
        Text(String),
    }

    match Option::<Lenient>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Lenient::Bool(b)) => Ok(Some(b)),
        Some(Lenient::Text(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(D::Error::custom(format!(
                "expected a boolean, got {:?}",
                text
            ))),
        },
    }
}

fn require_sql(sql: &str) -> Result<()> {
    if sql.trim().is_empty() {
        return Err(GatewayError::InvalidArguments(
            "sql must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn resolve_schema(schema: Option<&str>) -> Result<String> {
    let schema = schema.unwrap_or(DEFAULT_SCHEMA);
    validate_identifier("schema", schema)?;
    Ok(schema.to_string())
}

/// Checks beyond what deserialization enforces
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct QueryArgs {
    /// SQL statement; reference parameters as $1, $2, ...
    pub sql: String,

    #[serde(default)]
    #[schemars(schema_with = "params_schema")]
    pub params: Option<Vec<JsonValue>>,
}

impl Validate for QueryArgs {
    fn validate(&self) -> Result<()> {
        require_sql(&self.sql)
    }
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListTablesArgs {
    /// Schema to list (default "public")
    #[serde(default)]
    pub schema: Option<String>,
}

impl ListTablesArgs {
    pub fn schema(&self) -> Result<String> {
        resolve_schema(self.schema.as_deref())
    }
}

impl Validate for ListTablesArgs {
    fn validate(&self) -> Result<()> {
        self.schema().map(|_| ())
    }
}

/// Arguments shared by `describe_table` and `table_stats`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TableArgs {
    /// Table name
    pub table: String,

    /// Schema of the table (default "public")
    #[serde(default)]
    pub schema: Option<String>,
}

impl TableArgs {
    pub fn schema(&self) -> Result<String> {
        resolve_schema(self.schema.as_deref())
    }
}

impl Validate for TableArgs {
    fn validate(&self) -> Result<()> {
        self.schema()?;
        validate_identifier("table", &self.table)
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExplainArgs {
    /// Statement to explain
    pub sql: String,

    /// Execute the statement and report actual timings and buffer usage
    #[serde(default, deserialize_with = "lenient_bool")]
    #[schemars(with = "Option<bool>")]
    pub analyze: Option<bool>,
}

impl Validate for ExplainArgs {
    fn validate(&self) -> Result<()> {
        require_sql(&self.sql)
    }
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListIndexesArgs {
    /// Only indexes of this table
    #[serde(default)]
    pub table: Option<String>,

    /// Schema to list (default "public")
    #[serde(default)]
    pub schema: Option<String>,
}

impl ListIndexesArgs {
    pub fn schema(&self) -> Result<String> {
        resolve_schema(self.schema.as_deref())
    }
}

impl Validate for ListIndexesArgs {
    fn validate(&self) -> Result<()> {
        self.schema()?;
        match &self.table {
            Some(table) => validate_identifier("table", table),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListSchemasArgs {
    /// Include pg_* and information_schema
    #[serde(default, deserialize_with = "lenient_bool")]
    #[schemars(with = "Option<bool>")]
    pub include_system: Option<bool>,
}

impl Validate for ListSchemasArgs {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NoArgs {}

impl Validate for NoArgs {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Deserialize and validate one operation's arguments
pub fn parse<T>(args: serde_json::Map<String, JsonValue>) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Validate,
{
    let parsed: T = serde_json::from_value(JsonValue::Object(args))
        .map_err(|e| GatewayError::InvalidArguments(e.to_string()))?;
    parsed.validate()?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: JsonValue) -> serde_json::Map<String, JsonValue> {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_analyze_coercion() {
        let args: ExplainArgs = parse(map(json!({"sql": "select 1", "analyze": "TRUE"}))).unwrap();
        assert_eq!(args.analyze, Some(true));

        let args: ExplainArgs = parse(map(json!({"sql": "select 1", "analyze": null}))).unwrap();
        assert_eq!(args.analyze, None);

        let err = parse::<ExplainArgs>(map(json!({"sql": "select 1", "analyze": "maybe"})))
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidArguments(_)));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = parse::<ListTablesArgs>(map(json!({"schema": "public", "limit": 5}))).unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn test_missing_and_empty_sql() {
        assert!(parse::<QueryArgs>(map(json!({}))).is_err());
        assert!(parse::<QueryArgs>(map(json!({"sql": "   "}))).is_err());
        let args: QueryArgs = parse(map(json!({"sql": "select $1", "params": null}))).unwrap();
        assert!(args.params.is_none());
    }

    #[test]
    fn test_identifier_checks() {
        assert!(parse::<TableArgs>(map(json!({"table": "users; drop table x"}))).is_err());
        assert!(parse::<ListIndexesArgs>(map(json!({"schema": "1bad"}))).is_err());
        let args: TableArgs = parse(map(json!({"table": "users", "schema": null}))).unwrap();
        assert_eq!(args.schema().unwrap(), "public");
    }
}
