//! # refdesk core
//!
//! Domain types, traits, and error definitions for the refdesk reference-data
//! agent. This crate does no I/O: it defines the domain
//! model that the protocol client, the oracle adapters and the agent loop all
//! implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the agent is a trait here:
//! - [`ReasoningOracle`] decides the next ReAct step
//! - [`GuardrailOracle`] classifies a user message as in or out of scope
//! - [`ToolExecutor`] invokes a named tool (the protocol client in production)
//!
//! Implementations live in their respective crates, which keeps the agent
//! testable with deterministic scripted stubs.

pub mod error;
pub mod event;
pub mod message;
pub mod oracle;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorKind, InvocationError, OracleError, Result, TransportError};
pub use event::{EventPayload, StreamEvent};
pub use message::{Conversation, ConversationId, Message, Role};
pub use oracle::{
    GUARDRAIL_UNAVAILABLE, GuardrailOracle, OUT_OF_SCOPE, OracleOutput, RawToolCall, ReasoningOracle,
    StepRequest, Verdict,
};
pub use session::{
    Observation, ReasoningStep, SessionId, SessionState, StepAction, TerminationReason,
};
pub use tool::{
    InvocationStatus, ToolDescriptor, ToolExecutor, ToolInvocation, ToolOutput,
};
