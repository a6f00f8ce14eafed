//! Stream events — the externally observable trace of a turn.
//!
//! Every transition of the guardrail, the reasoning loop and the tool calls
//! becomes one [`StreamEvent`]. Events are independently serializable so a
//! consumer can render them live or write them as JSON lines.
//!
//! Payload types on the wire:
//! - `guardrail_result`   — the intent verdict
//! - `thought_emitted`    — ReAct reasoning step
//! - `tool_call_started`  — a tool invocation was dispatched
//! - `tool_call_finished` — a tool invocation completed or failed
//! - `final_answer`       — terminal: the turn's answer
//! - `error`              — terminal: the turn ended without an answer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::oracle::Verdict;
use crate::session::SessionId;
use crate::tool::InvocationStatus;

/// One unit of the turn's trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub session_id: SessionId,

    /// Contiguous from 0 within a session
    pub sequence: u64,

    pub timestamp: DateTime<Utc>,

    pub payload: EventPayload,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        self.payload.is_terminal()
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// The guardrail decided.
    GuardrailResult { verdict: Verdict },

    /// The oracle produced a step.
    ThoughtEmitted { step_index: u64, thought: String },

    /// A tool invocation was dispatched.
    ToolCallStarted {
        invocation_id: String,
        step_index: u64,
        tool_name: String,
        arguments: serde_json::Value,
        attempt: u32,
    },

    /// A tool invocation was finalized.
    ToolCallFinished {
        invocation_id: String,
        step_index: u64,
        tool_name: String,
        status: InvocationStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
        duration_ms: u64,
    },

    /// Terminal: the turn answered.
    FinalAnswer {
        text: String,
        steps: usize,
        tool_calls: usize,
    },

    /// Terminal: the turn ended without an answer.
    Error {
        kind: ErrorKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial_answer: Option<String>,
    },
}

impl EventPayload {
    /// Wire name of this payload type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::GuardrailResult { .. } => "guardrail_result",
            Self::ThoughtEmitted { .. } => "thought_emitted",
            Self::ToolCallStarted { .. } => "tool_call_started",
            Self::ToolCallFinished { .. } => "tool_call_finished",
            Self::FinalAnswer { .. } => "final_answer",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FinalAnswer { .. } | Self::Error { .. })
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
            partial_answer: None,
        }
    }

    /// The error kind, for terminal `Error` payloads.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
