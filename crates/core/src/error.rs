//! Error types for the refdesk domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`ErrorKind`] is the flat,
//! serializable taxonomy carried by `Error` stream events.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all refdesk operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Tool invocation errors ---
    #[error("Tool error: {0}")]
    Invocation(#[from] InvocationError),

    // --- Oracle errors ---
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    // --- Transport errors ---
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// The flat error taxonomy exposed to stream subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The guardrail classified the message as out of scope.
    Rejected,
    /// The guardrail oracle failed; the guardrail failed closed.
    GuardrailUnavailable,
    /// Arguments did not match the tool's declared schema.
    InvalidArguments,
    /// A tool invocation exceeded its bounded wait.
    ToolTimeout,
    /// The tool process could not be reached after one reconnect attempt.
    ToolProcessUnavailable,
    /// The tool ran and reported an error of its own.
    ToolFailed,
    /// The reasoning oracle's output could not be decoded after one re-prompt.
    UnparseableAction,
    /// The iteration budget ran out before a final answer.
    MaxIterationsExceeded,
    /// The external cancel signal was observed.
    Cancelled,
    /// The reasoning oracle itself failed (network, API error).
    OracleUnavailable,
    /// Anything else, including a panic inside the turn.
    Internal,
}

impl ErrorKind {
    /// Stable snake_case name, used in observations and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::GuardrailUnavailable => "guardrail_unavailable",
            Self::InvalidArguments => "invalid_arguments",
            Self::ToolTimeout => "tool_timeout",
            Self::ToolProcessUnavailable => "tool_process_unavailable",
            Self::ToolFailed => "tool_failed",
            Self::UnparseableAction => "unparseable_action",
            Self::MaxIterationsExceeded => "max_iterations",
            Self::Cancelled => "cancelled",
            Self::OracleUnavailable => "oracle_unavailable",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Bounded context errors ---

/// Failure of a single tool invocation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvocationError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("Tool process unavailable: {0}")]
    ToolProcessUnavailable(String),

    #[error("Tool {tool_name} failed (code {code}): {message}")]
    Remote {
        tool_name: String,
        code: i64,
        message: String,
    },
}

impl InvocationError {
    /// Whether retrying the same call might succeed.
    ///
    /// Schema mismatches, unknown tools and errors reported by the tool itself
    /// are deterministic; timeouts and process loss are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ToolProcessUnavailable(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTool(_) | Self::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            Self::Timeout { .. } => ErrorKind::ToolTimeout,
            Self::ToolProcessUnavailable(_) => ErrorKind::ToolProcessUnavailable,
            Self::Remote { .. } => ErrorKind::ToolFailed,
        }
    }

    /// Short code written into observations, e.g. `tool_timeout`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            other => other.kind().as_str(),
        }
    }
}

/// Failure of a reasoning or guardrail oracle call.
#[derive(Debug, Clone, Error)]
pub enum OracleError {
    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Oracle not configured: {0}")]
    NotConfigured(String),

    #[error("Oracle timed out after {0}ms")]
    Timeout(u64),

    #[error("Malformed oracle response: {0}")]
    Malformed(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failure of the byte stream to the tool process.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Failed to spawn tool process `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("Connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Tool server is dead until restarted: {0}")]
    Dead(String),
}

impl From<TransportError> for InvocationError {
    fn from(err: TransportError) -> Self {
        InvocationError::ToolProcessUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_error_displays_correctly() {
        let err = Error::Invocation(InvocationError::Timeout {
            tool_name: "search_issuer".into(),
            timeout_ms: 30_000,
        });
        assert!(err.to_string().contains("search_issuer"));
        assert!(err.to_string().contains("30000ms"));
    }

    #[test]
    fn transient_errors() {
        assert!(InvocationError::ToolProcessUnavailable("gone".into()).is_transient());
        assert!(
            InvocationError::Timeout {
                tool_name: "t".into(),
                timeout_ms: 1
            }
            .is_transient()
        );
        assert!(
            !InvocationError::InvalidArguments {
                tool_name: "t".into(),
                reason: "missing isin".into()
            }
            .is_transient()
        );
        assert!(!InvocationError::UnknownTool("nope".into()).is_transient());
    }

    #[test]
    fn invocation_error_kinds() {
        assert_eq!(
            InvocationError::ToolProcessUnavailable("x".into()).kind(),
            ErrorKind::ToolProcessUnavailable
        );
        assert_eq!(
            InvocationError::UnknownTool("x".into()).code(),
            "unknown_tool"
        );
        assert_eq!(
            InvocationError::Timeout {
                tool_name: "t".into(),
                timeout_ms: 5
            }
            .code(),
            "tool_timeout"
        );
    }

    #[test]
    fn transport_error_maps_to_process_unavailable() {
        let err: InvocationError = TransportError::Closed.into();
        assert!(matches!(err, InvocationError::ToolProcessUnavailable(_)));
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::MaxIterationsExceeded).unwrap();
        assert_eq!(json, r#""max_iterations_exceeded""#);
        assert_eq!(ErrorKind::MaxIterationsExceeded.as_str(), "max_iterations");
    }
}
