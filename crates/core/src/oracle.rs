//! Oracle traits — the opaque, possibly nondeterministic deciders.
//!
//! Two oracles drive a turn: the [`GuardrailOracle`] decides whether a
//! question is in scope, the [`ReasoningOracle`] decides each ReAct step.
//! Both are plain request/response contracts so tests can replay fixed
//! transcripts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OracleError;
use crate::message::Message;
use crate::session::ReasoningStep;
use crate::tool::ToolDescriptor;

/// Rejection reason when the question is not about reference data.
pub const OUT_OF_SCOPE: &str = "out_of_scope";

/// Rejection reason when no verdict could be obtained.
pub const GUARDRAIL_UNAVAILABLE: &str = "guardrail_unavailable";

/// Guardrail decision for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Verdict {
    Allowed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
    Rejected {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
}

impl Verdict {
    pub fn allowed() -> Self {
        Self::Allowed { rationale: None }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
            rationale: None,
        }
    }

    pub fn with_rationale(self, text: impl Into<String>) -> Self {
        let rationale = Some(text.into());
        match self {
            Self::Allowed { .. } => Self::Allowed { rationale },
            Self::Rejected { reason, .. } => Self::Rejected { reason, rationale },
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    pub fn rationale(&self) -> Option<&str> {
        match self {
            Self::Allowed { rationale } | Self::Rejected { rationale, .. } => rationale.as_deref(),
        }
    }
}

/// Everything the reasoning oracle sees when asked for the next step.
#[derive(Debug, Clone, Copy)]
pub struct StepRequest<'a> {
    /// Conversation so far, ending with the current user message
    pub history: &'a [Message],

    /// Every step recorded this turn, in order
    pub steps: &'a [ReasoningStep],

    /// Tools the oracle may call
    pub tools: &'a [ToolDescriptor],

    /// Set when the previous output could not be parsed
    pub correction: Option<&'a str>,
}

/// A tool call as the oracle emitted it, arguments still raw JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawToolCall {
    pub name: String,
    pub arguments: String,
}

impl RawToolCall {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Undecoded oracle output; the reasoning loop parses it into an action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleOutput {
    /// Free text: a thought, a final answer, or ReAct-formatted text
    #[serde(default)]
    pub content: String,

    /// Native function calls, if the oracle supports them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<RawToolCall>,
}

impl OracleOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(
        thought: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            content: thought.into(),
            tool_calls: vec![RawToolCall::new(name, arguments.to_string())],
        }
    }
}

/// Decides the next ReAct step.
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    fn name(&self) -> &str;

    async fn next_step(&self, request: &StepRequest<'_>) -> Result<OracleOutput, OracleError>;
}

/// Classifies a user message as in or out of scope.
#[async_trait]
pub trait GuardrailOracle: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, message: &str, context: &[Message]) -> Result<Verdict, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_serialization() {
        let v = Verdict::rejected(OUT_OF_SCOPE).with_rationale("weather question");
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.contains(r#""decision":"rejected""#));
        assert!(json.contains("out_of_scope"));
        assert_eq!(v.rationale(), Some("weather question"));
        assert!(!v.is_allowed());
    }

    #[test]
    fn allowed_verdict_omits_empty_rationale() {
        let json = serde_json::to_string(&Verdict::allowed()).unwrap();
        assert_eq!(json, r#"{"decision":"allowed"}"#);
    }

    #[test]
    fn tool_call_output_encodes_arguments() {
        let out = OracleOutput::tool_call("look it up", "search_issuer", serde_json::json!({"name": "Apple"}));
        assert_eq!(out.tool_calls.len(), 1);
        let args: serde_json::Value = serde_json::from_str(&out.tool_calls[0].arguments).unwrap();
        assert_eq!(args["name"], "Apple");
    }
}
