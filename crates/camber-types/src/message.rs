use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A request, emitted by the reasoner, to invoke one named tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// One role-tagged entry in a conversation history. Role-specific fields are
/// enforced by the variant shape: a user turn cannot carry tool calls, a tool
/// turn always names the call it answers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Turn {
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        content: String,
        tool_call_id: String,
        tool_name: String,
    },
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Turn::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Turn::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Turn::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool(
        content: impl Into<String>,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
    ) -> Self {
        Turn::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Turn::User { .. } => Role::User,
            Turn::Assistant { .. } => Role::Assistant,
            Turn::Tool { .. } => Role::Tool,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Turn::User { content }
            | Turn::Assistant { content, .. }
            | Turn::Tool { content, .. } => content,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Turn::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// A tool turn answers no pending tool call of the preceding assistant turn.
    UnmatchedToolTurn { tool_call_id: String },
    /// A tool turn appeared without any preceding assistant turn requesting tools.
    ToolTurnWithoutRequest { tool_call_id: String },
}

impl std::fmt::Display for HistoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryError::UnmatchedToolTurn { tool_call_id } => write!(
                f,
                "tool turn `{tool_call_id}` matches no pending tool call of the last assistant turn"
            ),
            HistoryError::ToolTurnWithoutRequest { tool_call_id } => write!(
                f,
                "tool turn `{tool_call_id}` has no preceding assistant turn requesting tools"
            ),
        }
    }
}

impl std::error::Error for HistoryError {}

/// The ordered, append-only log of turns for one conversation. Insertion order
/// is the context handed to the reasoner on every step, so appends are
/// invariant-checked rather than repaired; construction goes through
/// `from_turns`, never deserialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a client-submitted turn sequence by replaying it through
    /// the same invariant checks `push` applies.
    pub fn from_turns(turns: Vec<Turn>) -> Result<Self, HistoryError> {
        let mut history = Self::new();
        for turn in turns {
            history.push(turn)?;
        }
        Ok(history)
    }

    pub fn push(&mut self, turn: Turn) -> Result<(), HistoryError> {
        if let Turn::Tool { tool_call_id, .. } = &turn {
            let pending = self.pending_tool_calls();
            if pending.is_empty() {
                return Err(HistoryError::ToolTurnWithoutRequest {
                    tool_call_id: tool_call_id.clone(),
                });
            }
            if !pending.iter().any(|call| &call.id == tool_call_id) {
                return Err(HistoryError::UnmatchedToolTurn {
                    tool_call_id: tool_call_id.clone(),
                });
            }
        }
        self.turns.push(turn);
        Ok(())
    }

    /// Tool calls of the most recent assistant turn not yet answered by a
    /// following tool turn, in request order.
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        let Some(last_assistant) = self
            .turns
            .iter()
            .rposition(|turn| matches!(turn, Turn::Assistant { .. }))
        else {
            return Vec::new();
        };
        let answered: Vec<&str> = self.turns[last_assistant + 1..]
            .iter()
            .filter_map(|turn| match turn {
                Turn::Tool { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect();
        self.turns[last_assistant]
            .tool_calls()
            .iter()
            .filter(|call| !answered.contains(&call.id.as_str()))
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, tool: &str) -> ToolCall {
        ToolCall::new(id, tool, json!({"symbol": "AAPL"}))
    }

    #[test]
    fn user_turns_never_carry_tool_calls() {
        let turn = Turn::user("hello");
        assert!(turn.tool_calls().is_empty());
        assert_eq!(turn.role(), Role::User);
    }

    #[test]
    fn push_accepts_tool_turn_answering_pending_call() {
        let mut history = History::new();
        history.push(Turn::user("quote?")).expect("user turn");
        history
            .push(Turn::assistant_with_calls(
                "",
                vec![call("c1", "get_stock_info")],
            ))
            .expect("assistant turn");
        history
            .push(Turn::tool("{}", "c1", "get_stock_info"))
            .expect("tool turn should match pending call");
        assert!(history.pending_tool_calls().is_empty());
    }

    #[test]
    fn push_rejects_unmatched_tool_turn() {
        let mut history = History::new();
        history
            .push(Turn::assistant_with_calls(
                "",
                vec![call("c1", "get_stock_info")],
            ))
            .expect("assistant turn");
        let err = history
            .push(Turn::tool("{}", "other", "get_stock_info"))
            .expect_err("unmatched id must be rejected");
        assert_eq!(
            err,
            HistoryError::UnmatchedToolTurn {
                tool_call_id: "other".to_string()
            }
        );
    }

    #[test]
    fn push_rejects_tool_turn_without_request() {
        let mut history = History::new();
        history.push(Turn::user("hi")).expect("user turn");
        let err = history
            .push(Turn::tool("{}", "c1", "get_stock_info"))
            .expect_err("tool turn without request must be rejected");
        assert!(matches!(err, HistoryError::ToolTurnWithoutRequest { .. }));
    }

    #[test]
    fn pending_tool_calls_preserve_request_order() {
        let mut history = History::new();
        history
            .push(Turn::assistant_with_calls(
                "",
                vec![call("c1", "get_stock_info"), call("c2", "get_weather_info")],
            ))
            .expect("assistant turn");
        let pending = history.pending_tool_calls();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, "c1");
        assert_eq!(pending[1].id, "c2");

        history
            .push(Turn::tool("{}", "c1", "get_stock_info"))
            .expect("first result");
        let pending = history.pending_tool_calls();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "c2");
    }

    #[test]
    fn from_turns_replays_invariants() {
        let err = History::from_turns(vec![
            Turn::user("hi"),
            Turn::tool("{}", "c9", "get_stock_info"),
        ])
        .expect_err("invalid sequence must be rejected");
        assert!(matches!(err, HistoryError::ToolTurnWithoutRequest { .. }));
    }
}
