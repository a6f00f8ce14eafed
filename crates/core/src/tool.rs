//! Tool abstractions — what the agent can call and what a call looks like.
//!
//! Tools live in an external process. The agent only ever sees their
//! [`ToolDescriptor`]s and reaches them through a [`ToolExecutor`], which the
//! protocol client implements in production and scripted stubs implement in
//! tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvocationError;

/// A callable tool, as discovered from the tool process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique name within one tool process (e.g., "search_issuer")
    pub name: String,

    /// Description of what the tool does (sent to the oracle)
    pub description: String,

    /// JSON Schema describing the tool's arguments
    pub parameters: serde_json::Value,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// The successful result of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Text content, items joined by newlines
    pub text: String,

    /// The raw result payload, when the tool returned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
        }
    }
}

/// Lifecycle of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Pending,
    Success,
    Error,
}

/// One attempt at calling a tool.
///
/// Created `Pending` when the loop dispatches, finalized exactly once on
/// response, timeout, or process failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Unique within the session
    pub id: String,

    /// Reasoning step that requested this invocation
    pub step_index: u64,

    pub tool_name: String,

    pub arguments: serde_json::Value,

    /// 1 for the first attempt, incremented per retry
    pub attempt: u32,

    pub status: InvocationStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolOutput>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ToolInvocation {
    pub fn pending(
        id: impl Into<String>,
        step_index: u64,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
        attempt: u32,
    ) -> Self {
        Self {
            id: id.into(),
            step_index,
            tool_name: tool_name.into(),
            arguments,
            attempt,
            status: InvocationStatus::Pending,
            result: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Record the outcome. Has no effect on an already finalized invocation.
    pub fn finalize(&mut self, outcome: &Result<ToolOutput, InvocationError>) {
        if self.status != InvocationStatus::Pending {
            return;
        }
        match outcome {
            Ok(output) => {
                self.status = InvocationStatus::Success;
                self.result = Some(output.clone());
            }
            Err(e) => {
                self.status = InvocationStatus::Error;
                self.error = Some(e.to_string());
            }
        }
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}

/// Something that can run tools by name.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// The tools currently callable.
    async fn descriptors(&self) -> Vec<ToolDescriptor>;

    /// Invoke a tool. Implementations validate arguments before any I/O.
    async fn invoke(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> Result<ToolOutput, InvocationError>;
}
