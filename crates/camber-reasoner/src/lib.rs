use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use camber_types::{History, ToolCall, ToolSchema, Turn};

/// Instructions carried over verbatim from the original deployment: the
/// model is told to fetch live data through the tools and to embed
/// `stock_chart` / `weather_card` JSON payloads for client-side rendering.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant that can provide information about stocks and weather.

When responding to user queries about stocks or weather, use the appropriate tools to fetch real-time data.

For UI rendering, you should use the following format when appropriate:

1. For stock information:
```json
{
  "type": "stock_chart",
  "data": {
    "symbol": "AAPL",
    "price": 150.25,
    "change": 2.5,
    "percent_change": "1.7%"
  }
}
```

2. For weather information:
```json
{
  "type": "weather_card",
  "data": {
    "location": "New York",
    "temperature": 72,
    "condition": "Sunny",
    "humidity": 65
  }
}
```

Embed these JSON objects in your responses when you want to display visual components.
The frontend will render these components appropriately."#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasonerError {
    /// Backend unreachable, rejected the request, or timed out. Fatal for
    /// the current run; retry policy, if any, lives outside the core.
    Unavailable { detail: String },
    /// Backend answered, but the completion could not be understood.
    Malformed { detail: String },
}

impl std::fmt::Display for ReasonerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReasonerError::Unavailable { detail } => {
                write!(f, "reasoner unavailable: {detail}")
            }
            ReasonerError::Malformed { detail } => {
                write!(f, "reasoner returned a malformed completion: {detail}")
            }
        }
    }
}

impl std::error::Error for ReasonerError {}

/// Boundary over the language-model backend: reads the full history, returns
/// exactly one next assistant turn, never appends to the history itself.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn next_turn(&self, history: &History) -> Result<Turn, ReasonerError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub system_prompt: String,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4-turbo".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl ReasonerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env_string("CAMBER_REASONER_URL").unwrap_or(defaults.base_url),
            api_key: env_string("CAMBER_REASONER_API_KEY")
                .or_else(|| env_string("OPENAI_API_KEY"))
                .filter(|key| !is_placeholder_api_key(key)),
            model: env_string("CAMBER_REASONER_MODEL").unwrap_or(defaults.model),
            system_prompt: defaults.system_prompt,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_placeholder_api_key(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("x")
        || trimmed.eq_ignore_ascii_case("placeholder")
}

/// Non-streaming adapter for OpenAI-compatible `/chat/completions` backends.
pub struct OpenAiCompatibleReasoner {
    base_url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
    tools: Vec<ToolSchema>,
    client: reqwest::Client,
}

impl OpenAiCompatibleReasoner {
    pub fn new(config: ReasonerConfig, tools: Vec<ToolSchema>) -> Self {
        Self {
            base_url: normalize_base(&config.base_url),
            api_key: config.api_key,
            model: config.model,
            system_prompt: config.system_prompt,
            tools,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, history: &History) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": wire_messages(history, &self.system_prompt),
            "temperature": 0,
            "stream": false,
        });
        if !self.tools.is_empty() {
            body["tools"] = Value::Array(
                self.tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.input_schema,
                            }
                        })
                    })
                    .collect(),
            );
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

#[async_trait]
impl Reasoner for OpenAiCompatibleReasoner {
    async fn next_turn(&self, history: &History) -> Result<Turn, ReasonerError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(url).json(&self.request_body(history));
        if let Some(api_key) = &self.api_key {
            req = req.bearer_auth(api_key);
        }
        let response = req.send().await.map_err(|err| ReasonerError::Unavailable {
            detail: err.to_string(),
        })?;
        let status = response.status();
        let value: Value = response.json().await.map_err(|err| ReasonerError::Unavailable {
            detail: err.to_string(),
        })?;
        if !status.is_success() {
            let detail = extract_openai_error(&value)
                .unwrap_or_else(|| format!("backend request failed with status {status}"));
            return Err(ReasonerError::Unavailable {
                detail: truncate_for_error(&detail, 500),
            });
        }
        if let Some(detail) = extract_openai_error(&value) {
            return Err(ReasonerError::Unavailable {
                detail: truncate_for_error(&detail, 500),
            });
        }
        parse_completion(&value)
    }
}

/// Maps internal turns onto the OpenAI chat wire shape, with the system
/// prompt prepended.
fn wire_messages(history: &History, system_prompt: &str) -> Vec<Value> {
    let mut messages = vec![json!({"role": "system", "content": system_prompt})];
    for turn in history.turns() {
        match turn {
            Turn::User { content } => {
                messages.push(json!({"role": "user", "content": content}));
            }
            Turn::Assistant {
                content,
                tool_calls,
            } => {
                let mut msg = json!({"role": "assistant", "content": content});
                if !tool_calls.is_empty() {
                    msg["tool_calls"] = Value::Array(
                        tool_calls
                            .iter()
                            .map(|call| {
                                json!({
                                    "id": call.id,
                                    "type": "function",
                                    "function": {
                                        "name": call.tool_name,
                                        "arguments": call.arguments.to_string(),
                                    }
                                })
                            })
                            .collect(),
                    );
                }
                messages.push(msg);
            }
            Turn::Tool {
                content,
                tool_call_id,
                tool_name,
            } => {
                messages.push(json!({
                    "role": "tool",
                    "content": content,
                    "tool_call_id": tool_call_id,
                    "name": tool_name,
                }));
            }
        }
    }
    messages
}

fn parse_completion(value: &Value) -> Result<Turn, ReasonerError> {
    let message = value
        .get("choices")
        .and_then(|v| v.get(0))
        .and_then(|v| v.get("message"))
        .ok_or_else(|| ReasonerError::Malformed {
            detail: format!(
                "no choices in completion (response: {})",
                truncate_for_error(&value.to_string(), 500)
            ),
        })?;
    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let tool_calls = message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let id = call.get("id").and_then(|v| v.as_str())?;
                    let function = call.get("function")?;
                    let name = function.get("name").and_then(|v| v.as_str())?;
                    if id.is_empty() || name.is_empty() {
                        return None;
                    }
                    // Unparsable argument text degrades to null so registry
                    // validation reports it back to the reasoner instead of
                    // failing the run.
                    let arguments = function
                        .get("arguments")
                        .and_then(|v| v.as_str())
                        .map(|raw| serde_json::from_str(raw).unwrap_or(Value::Null))
                        .unwrap_or(Value::Null);
                    Some(ToolCall::new(id, name, arguments))
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Ok(Turn::assistant_with_calls(content, tool_calls))
}

fn extract_openai_error(value: &Value) -> Option<String> {
    value
        .get("error")
        .and_then(|v| v.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| {
            value
                .get("error")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
}

fn normalize_base(input: &str) -> String {
    if input.ends_with("/v1") {
        input.trim_end_matches('/').to_string()
    } else {
        format!("{}/v1", input.trim_end_matches('/'))
    }
}

fn truncate_for_error(input: &str, max_len: usize) -> String {
    if input.len() <= max_len {
        input.to_string()
    } else {
        format!("{}...", &input[..max_len])
    }
}

/// Replays a fixed queue of assistant turns. Used in tests and offline runs
/// where no backend is configured.
pub struct ScriptedReasoner {
    turns: Mutex<VecDeque<Turn>>,
}

impl ScriptedReasoner {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
        }
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn next_turn(&self, _history: &History) -> Result<Turn, ReasonerError> {
        self.turns
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ReasonerError::Unavailable {
                detail: "scripted reasoner has no further turns".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_messages_prepend_system_and_keep_linkage() {
        let mut history = History::new();
        history.push(Turn::user("quote AAPL")).expect("user");
        history
            .push(Turn::assistant_with_calls(
                "",
                vec![ToolCall::new(
                    "call_1",
                    "get_stock_info",
                    json!({"symbol": "AAPL"}),
                )],
            ))
            .expect("assistant");
        history
            .push(Turn::tool(
                r#"{"price":150.25}"#,
                "call_1",
                "get_stock_info",
            ))
            .expect("tool");

        let messages = wire_messages(&history, "be helpful");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(
            messages[2]["tool_calls"][0]["function"]["name"],
            "get_stock_info"
        );
        assert_eq!(
            messages[2]["tool_calls"][0]["function"]["arguments"],
            r#"{"symbol":"AAPL"}"#
        );
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "call_1");
    }

    #[test]
    fn parse_completion_without_tool_calls() {
        let value = json!({
            "choices": [{"message": {"role": "assistant", "content": "AAPL is at $150.25"}}]
        });
        let turn = parse_completion(&value).expect("parses");
        assert_eq!(turn.content(), "AAPL is at $150.25");
        assert!(turn.tool_calls().is_empty());
    }

    #[test]
    fn parse_completion_with_tool_calls_and_null_content() {
        let value = json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "get_stock_info", "arguments": "{\"symbol\":\"AAPL\"}"}
                }]
            }}]
        });
        let turn = parse_completion(&value).expect("parses");
        assert_eq!(turn.content(), "");
        assert_eq!(turn.tool_calls().len(), 1);
        assert_eq!(turn.tool_calls()[0].arguments["symbol"], "AAPL");
    }

    #[test]
    fn unparsable_arguments_degrade_to_null() {
        let value = json!({
            "choices": [{"message": {
                "content": "",
                "tool_calls": [{
                    "id": "call_1",
                    "function": {"name": "get_stock_info", "arguments": "{not json"}
                }]
            }}]
        });
        let turn = parse_completion(&value).expect("parses");
        assert_eq!(turn.tool_calls()[0].arguments, Value::Null);
    }

    #[test]
    fn missing_choices_is_malformed() {
        let err = parse_completion(&json!({"id": "x"})).expect_err("malformed");
        assert!(matches!(err, ReasonerError::Malformed { .. }));
    }

    #[test]
    fn normalize_base_appends_v1_once() {
        assert_eq!(normalize_base("https://api.openai.com/v1"), "https://api.openai.com/v1");
        assert_eq!(
            normalize_base("http://127.0.0.1:11434/"),
            "http://127.0.0.1:11434/v1"
        );
    }

    #[test]
    fn placeholder_api_keys_are_filtered() {
        assert!(is_placeholder_api_key(" x "));
        assert!(is_placeholder_api_key("placeholder"));
        assert!(!is_placeholder_api_key("sk-real"));
    }

    #[tokio::test]
    async fn scripted_reasoner_replays_then_fails() {
        let reasoner = ScriptedReasoner::new(vec![Turn::assistant("one")]);
        let history = History::new();
        let turn = reasoner.next_turn(&history).await.expect("first turn");
        assert_eq!(turn.content(), "one");
        let err = reasoner.next_turn(&history).await.expect_err("exhausted");
        assert!(matches!(err, ReasonerError::Unavailable { .. }));
    }
}
