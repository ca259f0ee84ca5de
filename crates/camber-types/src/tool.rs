use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Rendering directive attached to a tool result for the client to draw,
/// e.g. `{"type": "stock_chart", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UiComponent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

impl UiComponent {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

/// The uniform output of one tool invocation: domain fields plus an optional
/// UI hint on success, or an error descriptor on failure. Always wrapped into
/// a tool-role turn before rejoining the history.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Success {
        fields: Map<String, Value>,
        ui_component: Option<UiComponent>,
    },
    Failure {
        error: String,
        details: Option<String>,
    },
}

impl ToolResult {
    pub fn success(fields: Map<String, Value>) -> Self {
        ToolResult::Success {
            fields,
            ui_component: None,
        }
    }

    pub fn success_with_ui(fields: Map<String, Value>, ui_component: UiComponent) -> Self {
        ToolResult::Success {
            fields,
            ui_component: Some(ui_component),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ToolResult::Failure {
            error: error.into(),
            details: None,
        }
    }

    pub fn failure_with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        ToolResult::Failure {
            error: error.into(),
            details: Some(details.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ToolResult::Failure { .. })
    }

    /// Wire shape: `{..fields.., "ui_component"?: {..}}` on success,
    /// `{"error": .., "details"?: ..}` on failure.
    pub fn to_value(&self) -> Value {
        match self {
            ToolResult::Success {
                fields,
                ui_component,
            } => {
                let mut out = fields.clone();
                if let Some(ui) = ui_component {
                    out.insert(
                        "ui_component".to_string(),
                        serde_json::to_value(ui).unwrap_or(Value::Null),
                    );
                }
                Value::Object(out)
            }
            ToolResult::Failure { error, details } => {
                let mut out = Map::new();
                out.insert("error".to_string(), Value::String(error.clone()));
                if let Some(details) = details {
                    out.insert("details".to_string(), Value::String(details.clone()));
                }
                Value::Object(out)
            }
        }
    }

    /// Presence of an `error` key marks a failure; everything else is a
    /// success payload.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return ToolResult::failure("tool result is not a JSON object");
        };
        if let Some(error) = obj.get("error").and_then(|v| v.as_str()) {
            return ToolResult::Failure {
                error: error.to_string(),
                details: obj
                    .get("details")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
            };
        }
        let mut fields = obj.clone();
        let ui_component = fields
            .remove("ui_component")
            .and_then(|v| serde_json::from_value(v).ok());
        ToolResult::Success {
            fields,
            ui_component,
        }
    }
}
