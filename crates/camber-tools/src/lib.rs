use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use camber_types::{ToolResult, ToolSchema};

mod stock;
mod weather;

pub use stock::StockTool;
pub use weather::WeatherTool;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// One invocable capability. `execute` receives arguments already validated
/// against [`Tool::schema`] and must shape every internal failure into a
/// failure [`ToolResult`]; nothing escapes the registry boundary as an error.
#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    async fn execute(&self, args: &Map<String, Value>) -> ToolResult;
}

/// Static name → capability mapping, built once at startup and read-only for
/// the lifetime of the process. Safe to share across concurrent runs.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<HashMap<String, Arc<dyn Tool>>>,
    call_timeout: Duration,
}

impl ToolRegistry {
    /// Registry with the bundled stock and weather lookups, credentials
    /// sourced from the environment.
    pub fn builtin() -> Self {
        Self::with_tools(vec![
            Arc::new(StockTool::from_env()),
            Arc::new(WeatherTool::new()),
        ])
    }

    pub fn with_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut map: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        for tool in tools {
            map.insert(tool.schema().name, tool);
        }
        Self {
            tools: Arc::new(map),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas = self
            .tools
            .values()
            .map(|tool| tool.schema())
            .collect::<Vec<_>>();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Route one tool call: unknown names, schema-invalid arguments and
    /// timeouts all come back as failure results, never as errors.
    pub async fn dispatch(&self, name: &str, arguments: &Value) -> ToolResult {
        let Some(tool) = self.resolve(name) else {
            return ToolResult::failure(format!("unknown tool `{name}`"));
        };
        let schema = tool.schema();
        let args = match validate_arguments(&schema, arguments) {
            Ok(args) => args,
            Err(detail) => {
                return ToolResult::failure_with_details(
                    format!("invalid arguments for tool `{name}`"),
                    detail,
                )
            }
        };
        match tokio::time::timeout(self.call_timeout, tool.execute(&args)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(tool = name, timeout_ms = self.call_timeout.as_millis() as u64, "tool call timed out");
                ToolResult::failure(format!(
                    "tool `{name}` timed out after {}s",
                    self.call_timeout.as_secs()
                ))
            }
        }
    }
}

/// Checks `arguments` against the declared input schema: must be an object,
/// every `required` field present, declared primitive types respected.
/// Returns the argument map handed to the tool.
pub fn validate_arguments(
    schema: &ToolSchema,
    arguments: &Value,
) -> Result<Map<String, Value>, String> {
    let args = match arguments {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(format!(
                "arguments must be an object, got {}",
                json_type_name(other)
            ))
        }
    };
    let properties = schema
        .input_schema
        .get("properties")
        .and_then(|v| v.as_object());
    if let Some(required) = schema.input_schema.get("required").and_then(|v| v.as_array()) {
        for field in required.iter().filter_map(|v| v.as_str()) {
            if !args.contains_key(field) {
                return Err(format!("missing required field `{field}`"));
            }
        }
    }
    if let Some(properties) = properties {
        for (key, value) in &args {
            let Some(declared) = properties.get(key) else {
                continue;
            };
            let Some(expected) = declared.get("type").and_then(|v| v.as_str()) else {
                continue;
            };
            if !value_matches_type(value, expected) {
                return Err(format!(
                    "field `{key}` must be {expected}, got {}",
                    json_type_name(value)
                ));
            }
        }
    }
    Ok(args)
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSchemaValidationError {
    pub tool_name: String,
    pub path: String,
    pub reason: String,
}

impl std::fmt::Display for ToolSchemaValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid tool schema `{}` at `{}`: {}",
            self.tool_name, self.path, self.reason
        )
    }
}

impl std::error::Error for ToolSchemaValidationError {}

/// Startup check over declared tool schemas: array schemas must carry
/// `items`, and every `required` field must be declared under `properties`.
pub fn validate_tool_schemas(schemas: &[ToolSchema]) -> Result<(), ToolSchemaValidationError> {
    for schema in schemas {
        validate_schema_node(&schema.name, "$", &schema.input_schema)?;
        if let (Some(required), properties) = (
            schema.input_schema.get("required").and_then(|v| v.as_array()),
            schema
                .input_schema
                .get("properties")
                .and_then(|v| v.as_object()),
        ) {
            for field in required.iter().filter_map(|v| v.as_str()) {
                if !properties.is_some_and(|props| props.contains_key(field)) {
                    return Err(ToolSchemaValidationError {
                        tool_name: schema.name.clone(),
                        path: format!("$.required.{field}"),
                        reason: "required field not declared in properties".to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn validate_schema_node(
    tool_name: &str,
    path: &str,
    value: &Value,
) -> Result<(), ToolSchemaValidationError> {
    let Some(obj) = value.as_object() else {
        return Ok(());
    };

    if obj.get("type").and_then(|t| t.as_str()) == Some("array") && !obj.contains_key("items") {
        return Err(ToolSchemaValidationError {
            tool_name: tool_name.to_string(),
            path: path.to_string(),
            reason: "array schema missing items".to_string(),
        });
    }

    if let Some(items) = obj.get("items") {
        validate_schema_node(tool_name, &format!("{path}.items"), items)?;
    }
    if let Some(props) = obj.get("properties").and_then(|v| v.as_object()) {
        for (key, child) in props {
            validate_schema_node(tool_name, &format!("{path}.properties.{key}"), child)?;
        }
    }
    if let Some(additional) = obj.get("additionalProperties") {
        validate_schema_node(tool_name, &format!("{path}.additionalProperties"), additional)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "echo".to_string(),
                description: "Echo arguments back".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            }
        }

        async fn execute(&self, args: &Map<String, Value>) -> ToolResult {
            let mut fields = Map::new();
            fields.insert("text".to_string(), args["text"].clone());
            ToolResult::success(fields)
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "slow".to_string(),
                description: "Never finishes in time".to_string(),
                input_schema: json!({"type": "object", "properties": {}}),
            }
        }

        async fn execute(&self, _args: &Map<String, Value>) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ToolResult::success(Map::new())
        }
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_a_failure_result() {
        let registry = ToolRegistry::with_tools(vec![Arc::new(EchoTool)]);
        let result = registry.dispatch("nope", &json!({})).await;
        assert!(result.is_failure());
        assert!(result.to_value()["error"]
            .as_str()
            .expect("error text")
            .contains("unknown tool"));
    }

    #[tokio::test]
    async fn dispatch_missing_required_field_names_the_field() {
        let registry = ToolRegistry::with_tools(vec![Arc::new(EchoTool)]);
        let result = registry.dispatch("echo", &json!({})).await;
        let value = result.to_value();
        assert!(value["details"]
            .as_str()
            .expect("details text")
            .contains("missing required field `text`"));
    }

    #[tokio::test]
    async fn dispatch_wrong_type_is_rejected_without_invoking() {
        let registry = ToolRegistry::with_tools(vec![Arc::new(EchoTool)]);
        let result = registry.dispatch("echo", &json!({"text": 42})).await;
        let value = result.to_value();
        assert!(value["details"]
            .as_str()
            .expect("details text")
            .contains("must be string"));
    }

    #[tokio::test]
    async fn dispatch_valid_arguments_invokes_the_tool() {
        let registry = ToolRegistry::with_tools(vec![Arc::new(EchoTool)]);
        let result = registry.dispatch("echo", &json!({"text": "hi"})).await;
        assert_eq!(result.to_value()["text"], "hi");
    }

    #[tokio::test]
    async fn dispatch_null_arguments_count_as_empty_object() {
        let registry = ToolRegistry::with_tools(vec![Arc::new(SlowTool)])
            .with_call_timeout(Duration::from_millis(20));
        // no required fields, so null validates; the call then times out
        let result = registry.dispatch("slow", &Value::Null).await;
        assert!(result.is_failure());
        assert!(result.to_value()["error"]
            .as_str()
            .expect("error text")
            .contains("timed out"));
    }

    #[tokio::test]
    async fn repeated_dispatch_is_idempotent_for_the_registry() {
        let registry = ToolRegistry::with_tools(vec![Arc::new(EchoTool)]);
        let schemas_before = registry.schemas();
        let first = registry.dispatch("echo", &json!({"text": "hi"})).await;
        let second = registry.dispatch("echo", &json!({"text": "hi"})).await;
        assert_eq!(first, second);
        assert_eq!(registry.schemas(), schemas_before);
    }

    #[tokio::test]
    async fn registry_schemas_are_unique_and_valid() {
        let registry = ToolRegistry::builtin();
        let schemas = registry.schemas();
        validate_tool_schemas(&schemas).expect("builtin tool schemas should validate");
        let unique = schemas
            .iter()
            .map(|schema| schema.name.as_str())
            .collect::<HashSet<_>>();
        assert_eq!(unique.len(), schemas.len());
    }

    #[test]
    fn validator_rejects_array_without_items() {
        let schemas = vec![ToolSchema {
            name: "bad".to_string(),
            description: "bad schema".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"rows": {"type": "array"}}
            }),
        }];
        let err = validate_tool_schemas(&schemas).expect_err("expected validation failure");
        assert_eq!(err.tool_name, "bad");
        assert!(err.path.contains("properties.rows"));
    }

    #[test]
    fn validator_rejects_undeclared_required_field() {
        let schemas = vec![ToolSchema {
            name: "bad".to_string(),
            description: "bad schema".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"a": {"type": "string"}},
                "required": ["b"]
            }),
        }];
        let err = validate_tool_schemas(&schemas).expect_err("expected validation failure");
        assert!(err.path.contains("required.b"));
    }

    #[test]
    fn validate_arguments_rejects_non_object() {
        let schema = EchoTool.schema();
        let err = validate_arguments(&schema, &json!([1, 2])).expect_err("array is not valid");
        assert!(err.contains("must be an object"));
    }
}
