//! ReAct reasoning loop — Thought → Action → Observation.
//!
//! Each iteration asks the reasoning oracle for one step, parses it into a
//! single action, and either finishes with an answer or calls a tool and
//! feeds the observation back. Tool failures are never hidden from the
//! oracle: after the retry budget the error itself becomes the observation.
//!
//! The loop ends in exactly one of:
//! - `Done` — the oracle gave a final answer
//! - `Failed` — two unparseable outputs in a row, or the oracle is unreachable
//! - `Aborted` — the iteration budget ran out
//! - `Cancelled` — the turn's cancel token fired

use chrono::Utc;
use refdesk_config::AgentConfig;
use refdesk_core::{
    ErrorKind, EventPayload, InvocationError, Message, Observation, ReasoningOracle,
    ReasoningStep, SessionState, StepAction, StepRequest, ToolExecutor, ToolInvocation,
};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::emitter::EventEmitter;
use crate::parsing::{ParsedAction, parse_output};

/// Loop budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// Maximum recorded steps per turn, unparseable ones included
    pub max_iterations: usize,

    /// Extra attempts for transient tool failures
    pub tool_retry_budget: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tool_retry_budget: 1,
        }
    }
}

impl From<&AgentConfig> for LoopConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            tool_retry_budget: config.tool_retry_budget,
        }
    }
}

/// How a loop run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    Done {
        answer: String,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
    Aborted {
        message: String,
        partial_answer: Option<String>,
    },
    Cancelled,
}

/// Outcome of acting on one tool call.
enum Acted {
    Observed(Observation),
    Cancelled,
}

pub struct ReasoningLoop {
    oracle: Arc<dyn ReasoningOracle>,
    tools: Arc<dyn ToolExecutor>,
    config: LoopConfig,
}

impl ReasoningLoop {
    pub fn new(oracle: Arc<dyn ReasoningOracle>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self {
            oracle,
            tools,
            config: LoopConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> LoopConfig {
        self.config
    }

    /// Run until done, failed, aborted, or cancelled. Steps, invocations, and
    /// the final assistant message are recorded in `session`.
    pub async fn run(
        &self,
        session: &mut SessionState,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> LoopOutcome {
        let tools = self.tools.descriptors().await;
        let mut correction: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                info!(session = %session.id, "Reasoning cancelled");
                return LoopOutcome::Cancelled;
            }
            if session.steps.len() >= self.config.max_iterations {
                return self.abort(session);
            }

            let index = session.next_step_index();
            let request = StepRequest {
                history: &session.conversation.messages,
                steps: &session.steps,
                tools: &tools,
                correction: correction.as_deref(),
            };
            debug!(session = %session.id, step = index, "Querying reasoning oracle");

            let output = match self.oracle.next_step(&request).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(oracle = self.oracle.name(), error = %e, "Reasoning oracle failed");
                    return LoopOutcome::Failed {
                        kind: ErrorKind::OracleUnavailable,
                        message: format!("Reasoning oracle unavailable: {e}"),
                    };
                }
            };

            let action = parse_output(&output);
            emitter
                .emit(EventPayload::ThoughtEmitted {
                    step_index: index,
                    thought: action.thought().to_string(),
                })
                .await;

            match action {
                ParsedAction::FinalAnswer { thought, text } => {
                    info!(session = %session.id, steps = index + 1, "Final answer produced");
                    session.push_step(step(index, thought, StepAction::FinalAnswer { text: text.clone() }, None));
                    session.conversation.push(Message::assistant(text.clone()));
                    return LoopOutcome::Done { answer: text };
                }

                ParsedAction::Unparseable {
                    thought,
                    raw,
                    reason,
                } => {
                    warn!(session = %session.id, step = index, %reason, "Unparseable oracle output");
                    let observation = Observation::failure(ErrorKind::UnparseableAction, reason.clone());
                    session.push_step(step(
                        index,
                        thought,
                        StepAction::Unparseable {
                            raw,
                            reason: reason.clone(),
                        },
                        Some(observation),
                    ));

                    if correction.is_some() {
                        return LoopOutcome::Failed {
                            kind: ErrorKind::UnparseableAction,
                            message: format!(
                                "Could not understand the reasoning oracle twice in a row: {reason}"
                            ),
                        };
                    }
                    correction = Some(corrective_note(&reason));
                }

                ParsedAction::ToolCall {
                    thought,
                    tool_name,
                    arguments,
                } => {
                    correction = None;
                    let first_invocation = session.invocations.len();
                    let acted = self
                        .act(session, emitter, cancel, index, &tool_name, &arguments)
                        .await;
                    let invocation_ids = session.invocations[first_invocation..]
                        .iter()
                        .map(|inv| inv.id.clone())
                        .collect();

                    let observation = match &acted {
                        Acted::Observed(obs) => obs.clone(),
                        Acted::Cancelled => Observation::failure(
                            ErrorKind::Cancelled,
                            "Turn cancelled before the tool call completed",
                        ),
                    };
                    session.push_step(step(
                        index,
                        thought,
                        StepAction::ToolCall {
                            tool_name,
                            arguments,
                            invocation_ids,
                        },
                        Some(observation),
                    ));

                    if let Acted::Cancelled = acted {
                        return LoopOutcome::Cancelled;
                    }
                }
            }
        }
    }

    /// Dispatch one tool call, retrying transient failures within the budget.
    async fn act(
        &self,
        session: &mut SessionState,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
        step_index: u64,
        tool_name: &str,
        arguments: &Value,
    ) -> Acted {
        let mut attempt: u32 = 1;
        loop {
            if cancel.is_cancelled() {
                return Acted::Cancelled;
            }

            let id = session.next_invocation_id();
            let mut invocation =
                ToolInvocation::pending(id.clone(), step_index, tool_name, arguments.clone(), attempt);
            emitter
                .emit(EventPayload::ToolCallStarted {
                    invocation_id: id.clone(),
                    step_index,
                    tool_name: tool_name.to_string(),
                    arguments: arguments.clone(),
                    attempt,
                })
                .await;
            info!(tool = tool_name, invocation = %id, attempt, "Calling tool");

            let outcome = self.tools.invoke(tool_name, arguments).await;
            invocation.finalize(&outcome);

            let (output, error, error_kind) = match &outcome {
                Ok(out) => (Some(out.text.clone()), None, None),
                Err(e) => (None, Some(e.to_string()), Some(e.kind())),
            };
            emitter
                .emit(EventPayload::ToolCallFinished {
                    invocation_id: id,
                    step_index,
                    tool_name: tool_name.to_string(),
                    status: invocation.status,
                    output,
                    error,
                    error_kind,
                    duration_ms: invocation.duration_ms().unwrap_or_default(),
                })
                .await;
            session.record_invocation(invocation);

            match outcome {
                Ok(out) => return Acted::Observed(Observation::success(out.text)),
                Err(e) if e.is_transient() && attempt <= self.config.tool_retry_budget => {
                    warn!(tool = tool_name, attempt, error = %e, "Transient tool failure, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    warn!(tool = tool_name, attempt, error = %e, "Tool call failed");
                    return Acted::Observed(Observation::failure(e.kind(), describe_failure(&e, attempt)));
                }
            }
        }
    }

    fn abort(&self, session: &SessionState) -> LoopOutcome {
        let max = self.config.max_iterations;
        warn!(session = %session.id, max_iterations = max, "Iteration budget exhausted");
        match session.last_successful_observation() {
            Some((tool, observation)) => LoopOutcome::Aborted {
                message: format!(
                    "Stopped after {max} reasoning steps without a final answer. \
                     Showing the last result obtained."
                ),
                partial_answer: Some(format!("From {tool}:\n{}", observation.content)),
            },
            None => LoopOutcome::Aborted {
                message: format!(
                    "Unable to complete the request within {max} reasoning steps."
                ),
                partial_answer: None,
            },
        }
    }
}

fn step(index: u64, thought: String, action: StepAction, observation: Option<Observation>) -> ReasoningStep {
    ReasoningStep {
        index,
        thought,
        action,
        observation,
        timestamp: Utc::now(),
    }
}

/// Observation text for a failed tool call.
fn describe_failure(error: &InvocationError, attempts: u32) -> String {
    format!(
        "Error [{}] after {attempts} attempt{}: {error}",
        error.code(),
        if attempts == 1 { "" } else { "s" }
    )
}

fn corrective_note(reason: &str) -> String {
    format!(
        "Your previous reply could not be used ({reason}). Respond with exactly one tool call \
         whose arguments are a JSON object, or with your final answer."
    )
}
