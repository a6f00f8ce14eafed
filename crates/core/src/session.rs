//! Per-turn session state.
//!
//! A [`SessionState`] is created when a turn starts, threaded by `&mut`
//! through the guardrail and the reasoning loop, and handed back to the
//! caller when the turn ends. There is no process-wide session registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::message::{Conversation, Message};
use crate::oracle::Verdict;
use crate::tool::ToolInvocation;

/// Unique identifier for one turn's session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the oracle chose to do in one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// Call a tool. Holds every invocation id made for it, retries included.
    ToolCall {
        tool_name: String,
        arguments: serde_json::Value,
        invocation_ids: Vec<String>,
    },
    /// Finish the turn with this answer.
    FinalAnswer { text: String },
    /// The oracle output could not be decoded.
    Unparseable { raw: String, reason: String },
}

/// Result of acting on a step, as shown to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl Observation {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            error_kind: None,
        }
    }

    pub fn failure(kind: ErrorKind, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            error_kind: Some(kind),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_kind.is_some()
    }
}

/// One Thought → Action → Observation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// Strictly increasing from 0, never reused
    pub index: u64,

    pub thought: String,

    pub action: StepAction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<Observation>,

    pub timestamp: DateTime<Utc>,
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    #[default]
    None,
    Answered,
    Failed,
    Aborted,
    Rejected,
    Cancelled,
}

/// Everything a single turn knows about itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub id: SessionId,

    /// Conversation history, ending with this turn's user message
    pub conversation: Conversation,

    /// Append-only reasoning trace
    pub steps: Vec<ReasoningStep>,

    /// Every tool invocation made this turn, in dispatch order
    pub invocations: Vec<ToolInvocation>,

    /// Cached guardrail verdict for this turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,

    termination: TerminationReason,

    next_invocation: u64,

    pub started_at: DateTime<Utc>,
}

impl SessionState {
    /// Start a turn: append the user's message to the history.
    pub fn new(mut conversation: Conversation, user_message: impl Into<String>) -> Self {
        conversation.push(Message::user(user_message));
        Self {
            id: SessionId::new(),
            conversation,
            steps: Vec::new(),
            invocations: Vec::new(),
            verdict: None,
            termination: TerminationReason::None,
            next_invocation: 0,
            started_at: Utc::now(),
        }
    }

    /// The message this turn is answering.
    pub fn user_message(&self) -> &str {
        self.conversation
            .last_user_message()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// History before this turn's message.
    pub fn prior_messages(&self) -> &[Message] {
        let n = self.conversation.messages.len();
        &self.conversation.messages[..n.saturating_sub(1)]
    }

    /// Index the next recorded step will get.
    pub fn next_step_index(&self) -> u64 {
        self.steps.len() as u64
    }

    pub fn push_step(&mut self, step: ReasoningStep) {
        debug_assert_eq!(step.index, self.next_step_index());
        self.steps.push(step);
    }

    /// Allocate a session-unique invocation id.
    pub fn next_invocation_id(&mut self) -> String {
        let id = format!("call_{}", self.next_invocation);
        self.next_invocation += 1;
        id
    }

    pub fn record_invocation(&mut self, invocation: ToolInvocation) {
        self.invocations.push(invocation);
    }

    pub fn termination(&self) -> TerminationReason {
        self.termination
    }

    pub fn is_terminated(&self) -> bool {
        self.termination != TerminationReason::None
    }

    /// Move to a terminal state. Only the first call has an effect.
    pub fn terminate(&mut self, reason: TerminationReason) -> bool {
        if self.is_terminated() || reason == TerminationReason::None {
            return false;
        }
        self.termination = reason;
        true
    }

    /// The latest successful observation, used as a partial answer.
    pub fn last_successful_observation(&self) -> Option<(&str, &Observation)> {
        self.steps.iter().rev().find_map(|step| match (&step.action, &step.observation) {
            (StepAction::ToolCall { tool_name, .. }, Some(obs)) if !obs.is_error() => {
                Some((tool_name.as_str(), obs))
            }
            _ => None,
        })
    }
}
