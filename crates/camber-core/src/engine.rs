use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use camber_observability::{emit_run_event, RunEvent};
use camber_reasoner::Reasoner;
use camber_tools::ToolRegistry;
use camber_types::{History, Role, ToolCall, Turn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Reasoning,
    ExecutingTools,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Reasoning => "reasoning",
            RunState::ExecutingTools => "executing_tools",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cap on reasoning↔tool-execution cycles per run.
    pub max_cycles: usize,
    /// Per-call timeout on the reasoner suspension point.
    pub reasoner_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cycles: 8,
            reasoner_timeout: Duration::from_secs(60),
        }
    }
}

/// Run-level failures. Tool failures never appear here: they rejoin the
/// history as failure-shaped tool turns for the reasoner to handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    ReasonerUnavailable { detail: String },
    HistoryInvariant { detail: String },
    CycleBudgetExhausted { cycles: usize },
    Cancelled,
}

impl RunError {
    pub fn error_code(&self) -> &'static str {
        match self {
            RunError::ReasonerUnavailable { .. } => "REASONER_UNAVAILABLE",
            RunError::HistoryInvariant { .. } => "HISTORY_INVARIANT",
            RunError::CycleBudgetExhausted { .. } => "CYCLE_BUDGET_EXHAUSTED",
            RunError::Cancelled => "RUN_CANCELLED",
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::ReasonerUnavailable { detail } => {
                write!(f, "reasoner unavailable: {detail}")
            }
            RunError::HistoryInvariant { detail } => {
                write!(f, "history invariant violated: {detail}")
            }
            RunError::CycleBudgetExhausted { cycles } => {
                write!(f, "run exceeded the configured cycle budget of {cycles}")
            }
            RunError::Cancelled => write!(f, "run cancelled"),
        }
    }
}

impl std::error::Error for RunError {}

/// The orchestration state machine. Alternates between asking the reasoner
/// for the next assistant turn and executing the tool calls it requested,
/// until a turn arrives with nothing left to execute. Owns its history
/// exclusively for the duration of one run; collaborators are injected and
/// shared read-only across concurrent runs.
#[derive(Clone)]
pub struct Engine {
    reasoner: Arc<dyn Reasoner>,
    tools: ToolRegistry,
    config: EngineConfig,
}

impl Engine {
    pub fn new(reasoner: Arc<dyn Reasoner>, tools: ToolRegistry, config: EngineConfig) -> Self {
        Self {
            reasoner,
            tools,
            config,
        }
    }

    /// Drives one run from the given history to `DONE` or a run-level
    /// failure. The returned history extends the input with the assistant
    /// and tool turns appended during the run; on failure nothing partial
    /// is returned.
    pub async fn run(
        &self,
        run_id: &str,
        mut history: History,
        cancel: CancellationToken,
    ) -> Result<History, RunError> {
        let mut cycles = 0usize;

        loop {
            if cancel.is_cancelled() {
                self.emit_state(run_id, RunState::Failed, Some("RUN_CANCELLED"));
                return Err(RunError::Cancelled);
            }

            let pending = history.pending_tool_calls();

            // Absence of pending tool calls on an assistant turn is the sole
            // termination predicate.
            if pending.is_empty()
                && history.last().map(|t| t.role()) == Some(Role::Assistant)
            {
                self.emit_state(run_id, RunState::Done, None);
                return Ok(history);
            }

            if !pending.is_empty() {
                if cycles >= self.config.max_cycles {
                    self.emit_state(run_id, RunState::Failed, Some("CYCLE_BUDGET_EXHAUSTED"));
                    return Err(RunError::CycleBudgetExhausted {
                        cycles: self.config.max_cycles,
                    });
                }
                cycles += 1;
                self.emit_state(run_id, RunState::ExecutingTools, None);
                self.execute_pending(run_id, &mut history, pending, &cancel)
                    .await?;
                continue;
            }

            self.emit_state(run_id, RunState::Reasoning, None);
            let turn = self.next_assistant_turn(run_id, &history, &cancel).await?;
            if turn.role() != Role::Assistant {
                self.emit_state(run_id, RunState::Failed, Some("HISTORY_INVARIANT"));
                return Err(RunError::HistoryInvariant {
                    detail: format!(
                        "reasoner produced a {} turn instead of an assistant turn",
                        turn.role().as_str()
                    ),
                });
            }
            if let Err(err) = history.push(turn) {
                self.emit_state(run_id, RunState::Failed, Some("HISTORY_INVARIANT"));
                return Err(RunError::HistoryInvariant {
                    detail: err.to_string(),
                });
            }
        }
    }

    async fn next_assistant_turn(
        &self,
        run_id: &str,
        history: &History,
        cancel: &CancellationToken,
    ) -> Result<Turn, RunError> {
        let call = tokio::time::timeout(self.config.reasoner_timeout, self.reasoner.next_turn(history));
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RunError::Cancelled);
            }
            outcome = call => outcome,
        };
        match outcome {
            Err(_) => {
                let detail = format!(
                    "reasoner call timed out after {}s",
                    self.config.reasoner_timeout.as_secs()
                );
                emit_run_event(
                    Level::ERROR,
                    RunEvent {
                        event: "reasoner.call",
                        component: "core.engine",
                        run_id: Some(run_id),
                        state: Some(RunState::Reasoning.as_str()),
                        tool: None,
                        status: Some("failed"),
                        error_code: Some("REASONER_UNAVAILABLE"),
                        detail: Some(&detail),
                    },
                );
                Err(RunError::ReasonerUnavailable { detail })
            }
            Ok(Err(err)) => {
                let detail = err.to_string();
                emit_run_event(
                    Level::ERROR,
                    RunEvent {
                        event: "reasoner.call",
                        component: "core.engine",
                        run_id: Some(run_id),
                        state: Some(RunState::Reasoning.as_str()),
                        tool: None,
                        status: Some("failed"),
                        error_code: Some("REASONER_UNAVAILABLE"),
                        detail: Some(&detail),
                    },
                );
                Err(RunError::ReasonerUnavailable { detail })
            }
            Ok(Ok(turn)) => Ok(turn),
        }
    }

    /// Dispatches every pending call concurrently and folds the results back
    /// into the history in request order: the ordering guarantee is on the
    /// output sequence, not on dispatch completion.
    async fn execute_pending(
        &self,
        run_id: &str,
        history: &mut History,
        pending: Vec<ToolCall>,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        let dispatches = pending
            .iter()
            .map(|call| self.tools.dispatch(&call.tool_name, &call.arguments));
        let results = tokio::select! {
            _ = cancel.cancelled() => {
                self.emit_state(run_id, RunState::Failed, Some("RUN_CANCELLED"));
                return Err(RunError::Cancelled);
            }
            results = join_all(dispatches) => results,
        };

        for (call, result) in pending.iter().zip(results) {
            emit_run_event(
                if result.is_failure() { Level::WARN } else { Level::INFO },
                RunEvent {
                    event: "tool.dispatch",
                    component: "core.engine",
                    run_id: Some(run_id),
                    state: Some(RunState::ExecutingTools.as_str()),
                    tool: Some(&call.tool_name),
                    status: Some(if result.is_failure() { "failed" } else { "ok" }),
                    error_code: None,
                    detail: None,
                },
            );
            let turn = Turn::tool(result.to_value().to_string(), &call.id, &call.tool_name);
            if let Err(err) = history.push(turn) {
                self.emit_state(run_id, RunState::Failed, Some("HISTORY_INVARIANT"));
                return Err(RunError::HistoryInvariant {
                    detail: err.to_string(),
                });
            }
        }
        Ok(())
    }

    fn emit_state(&self, run_id: &str, state: RunState, error_code: Option<&str>) {
        emit_run_event(
            if error_code.is_some() {
                Level::WARN
            } else {
                Level::INFO
            },
            RunEvent {
                event: "run.state",
                component: "core.engine",
                run_id: Some(run_id),
                state: Some(state.as_str()),
                tool: None,
                status: None,
                error_code,
                detail: None,
            },
        );
    }
}
