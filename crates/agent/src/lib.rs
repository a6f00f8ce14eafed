//! The refdesk agent — a guarded ReAct loop over a reference-data tool server.
//!
//! A turn runs as:
//!
//! 1. **Guardrail**: is the question about bonds, issuers, or ratings?
//! 2. **Reasoning loop**: Thought → Action → Observation until the oracle
//!    answers, fails, or runs out of budget
//! 3. **Terminal event**: exactly one `final_answer` or `error`
//!
//! Every transition is streamed to the caller as a [`StreamEvent`] with a
//! contiguous sequence number.
//!
//! [`StreamEvent`]: refdesk_core::StreamEvent

pub mod controller;
pub mod emitter;
pub mod guardrail;
pub mod parsing;
pub mod react;

#[cfg(any(test, feature = "test-util"))]
pub mod test_helpers;

pub use controller::{SessionController, TurnHandle, TurnReport};
pub use emitter::EventEmitter;
pub use guardrail::{Guardrail, KeywordClassifier};
pub use parsing::{ParsedAction, parse_output};
pub use react::{LoopConfig, LoopOutcome, ReasoningLoop};
