use serde::{Deserialize, Serialize};
use serde_json::Value;

use camber_types::{History, HistoryError, ToolCall, Turn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireToolCall {
    pub id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One turn as it crosses the transport boundary. All role-specific fields
/// are optional here; decoding into [`Turn`] is where the shape is enforced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireTurn {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<WireTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: WireTurn,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WireError {
    UnknownRole { role: String },
    UserTurnWithToolCalls,
    ToolTurnMissingField { field: &'static str },
    InvalidHistory { detail: String },
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::UnknownRole { role } => write!(f, "unknown role `{role}`"),
            WireError::UserTurnWithToolCalls => {
                write!(f, "user turns cannot carry tool_calls")
            }
            WireError::ToolTurnMissingField { field } => {
                write!(f, "tool turn is missing required field `{field}`")
            }
            WireError::InvalidHistory { detail } => write!(f, "invalid history: {detail}"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<HistoryError> for WireError {
    fn from(err: HistoryError) -> Self {
        WireError::InvalidHistory {
            detail: err.to_string(),
        }
    }
}

impl WireTurn {
    pub fn from_turn(turn: &Turn) -> Self {
        match turn {
            Turn::User { content } => Self {
                role: "user".to_string(),
                content: content.clone(),
                tool_calls: None,
                tool_call_id: None,
                tool_name: None,
            },
            Turn::Assistant {
                content,
                tool_calls,
            } => Self {
                role: "assistant".to_string(),
                content: content.clone(),
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        tool_calls
                            .iter()
                            .map(|call| WireToolCall {
                                id: call.id.clone(),
                                tool_name: call.tool_name.clone(),
                                arguments: call.arguments.clone(),
                            })
                            .collect(),
                    )
                },
                tool_call_id: None,
                tool_name: None,
            },
            Turn::Tool {
                content,
                tool_call_id,
                tool_name,
            } => Self {
                role: "tool".to_string(),
                content: content.clone(),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
                tool_name: Some(tool_name.clone()),
            },
        }
    }

    pub fn into_turn(self) -> Result<Turn, WireError> {
        match self.role.as_str() {
            "user" => {
                if self.tool_calls.as_ref().is_some_and(|c| !c.is_empty()) {
                    return Err(WireError::UserTurnWithToolCalls);
                }
                Ok(Turn::user(self.content))
            }
            "assistant" => {
                let calls = self
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(|call| ToolCall::new(call.id, call.tool_name, call.arguments))
                    .collect();
                Ok(Turn::assistant_with_calls(self.content, calls))
            }
            "tool" => {
                let tool_call_id = self
                    .tool_call_id
                    .ok_or(WireError::ToolTurnMissingField {
                        field: "tool_call_id",
                    })?;
                let tool_name = self.tool_name.ok_or(WireError::ToolTurnMissingField {
                    field: "tool_name",
                })?;
                Ok(Turn::tool(self.content, tool_call_id, tool_name))
            }
            other => Err(WireError::UnknownRole {
                role: other.to_string(),
            }),
        }
    }
}

pub fn decode_history(messages: Vec<WireTurn>) -> Result<History, WireError> {
    let turns = messages
        .into_iter()
        .map(WireTurn::into_turn)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(History::from_turns(turns)?)
}

pub fn encode_history(history: &History) -> Vec<WireTurn> {
    history.turns().iter().map(WireTurn::from_turn).collect()
}
