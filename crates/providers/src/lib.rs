//! Oracle adapters for OpenAI-compatible chat endpoints.
//!
//! One HTTP client backs both oracles: [`ChatReasoningOracle`] drives the
//! ReAct loop through function calling, [`ChatGuardrailOracle`] asks the
//! model for a strict YES/NO intent verdict.

pub mod intent;
pub mod openai_compat;
pub mod prompts;
pub mod reasoning;

pub use intent::ChatGuardrailOracle;
pub use openai_compat::{ChatMessage, ChatReply, ChatRequest, OpenAiCompatClient};
pub use reasoning::ChatReasoningOracle;
