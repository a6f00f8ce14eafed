//! Session controller — one turn, start to finish.
//!
//! Sequences Guardrail → Reasoning Loop → terminal event and guarantees
//! that every turn ends with exactly one terminal event, whichever path it
//! takes, panics inside the turn included.

use futures::FutureExt;
use refdesk_core::{
    Conversation, Error, ErrorKind, EventPayload, GUARDRAIL_UNAVAILABLE, SessionId, SessionState,
    StreamEvent, TerminationReason, Verdict,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::emitter::EventEmitter;
use crate::guardrail::Guardrail;
use crate::react::{LoopOutcome, ReasoningLoop};

const DEFAULT_REJECTION: &str = "Your query does not appear to be related to financial reference data. \
     Please ask about bonds, issuers, or credit ratings.";

const UNAVAILABLE_REJECTION: &str =
    "Your query could not be screened right now, so it was not processed. Please try again.";

/// Everything known about a finished turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    /// Final session state, termination reason set
    pub session: SessionState,

    /// The terminal event's payload as delivered
    pub terminal: EventPayload,
}

impl TurnReport {
    pub fn answer(&self) -> Option<&str> {
        match &self.terminal {
            EventPayload::FinalAnswer { text, .. } => Some(text),
            _ => None,
        }
    }

    /// The conversation to carry into the next turn.
    pub fn conversation(&self) -> &Conversation {
        &self.session.conversation
    }
}

/// A turn running on its own task.
pub struct TurnHandle {
    pub session_id: SessionId,
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    task: JoinHandle<TurnReport>,
}

impl TurnHandle {
    /// Next event, or `None` once the stream is closed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Ask the turn to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the turn. Undrained events are discarded.
    pub async fn finish(self) -> Result<TurnReport, Error> {
        drop(self.events);
        self.task
            .await
            .map_err(|e| Error::Internal(format!("turn task failed: {e}")))
    }

    /// Drain every event, then wait for the turn.
    pub async fn collect(mut self) -> Result<(Vec<StreamEvent>, TurnReport), Error> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let report = self
            .task
            .await
            .map_err(|e| Error::Internal(format!("turn task failed: {e}")))?;
        Ok((events, report))
    }
}

pub struct SessionController {
    guardrail: Guardrail,
    reasoning: ReasoningLoop,
    stream_capacity: usize,
    rejection_message: String,
}

impl SessionController {
    pub fn new(guardrail: Guardrail, reasoning: ReasoningLoop) -> Self {
        Self {
            guardrail,
            reasoning,
            stream_capacity: 64,
            rejection_message: DEFAULT_REJECTION.into(),
        }
    }

    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity.max(1);
        self
    }

    pub fn with_rejection_message(mut self, message: impl Into<String>) -> Self {
        self.rejection_message = message.into();
        self
    }

    /// Spawn a turn answering `message` after `conversation`.
    pub fn start_turn(self: &Arc<Self>, conversation: Conversation, message: impl Into<String>) -> TurnHandle {
        let session = SessionState::new(conversation, message);
        let session_id = session.id.clone();
        let cancel = CancellationToken::new();
        let (emitter, events) =
            EventEmitter::channel(session_id.clone(), self.stream_capacity, cancel.clone());

        let controller = Arc::clone(self);
        let task = tokio::spawn(async move { controller.run_turn(session, &emitter).await });

        TurnHandle {
            session_id,
            events,
            cancel,
            task,
        }
    }

    /// Run a turn inline, reporting through `emitter`.
    pub async fn run_turn(&self, mut session: SessionState, emitter: &EventEmitter) -> TurnReport {
        let cancel = emitter.cancel_token().clone();
        info!(session = %session.id, "Turn started");

        let sequenced = AssertUnwindSafe(self.sequence(&mut session, emitter, &cancel))
            .catch_unwind()
            .await;

        let (reason, terminal) = match sequenced {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(session = %session.id, %detail, "Turn panicked");
                (
                    TerminationReason::Failed,
                    EventPayload::error(ErrorKind::Internal, format!("Internal error: {detail}")),
                )
            }
        };

        // The emitter may have replaced the payload (cancellation).
        let terminal = emitter.finish(terminal.clone()).await.unwrap_or(terminal);
        let reason = match terminal.error_kind() {
            Some(ErrorKind::Cancelled) => TerminationReason::Cancelled,
            _ => reason,
        };
        session.terminate(reason);

        info!(
            session = %session.id,
            termination = ?session.termination(),
            steps = session.steps.len(),
            tool_calls = session.invocations.len(),
            "Turn finished"
        );
        TurnReport { session, terminal }
    }

    async fn sequence(
        &self,
        session: &mut SessionState,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> (TerminationReason, EventPayload) {
        if cancel.is_cancelled() {
            return cancelled();
        }

        if let Verdict::Rejected { reason, .. } = self.guardrail.check(session, emitter).await {
            let (kind, message) = if reason == GUARDRAIL_UNAVAILABLE {
                (ErrorKind::GuardrailUnavailable, UNAVAILABLE_REJECTION.to_string())
            } else {
                (ErrorKind::Rejected, self.rejection_message.clone())
            };
            return (TerminationReason::Rejected, EventPayload::error(kind, message));
        }

        match self.reasoning.run(session, emitter, cancel).await {
            LoopOutcome::Done { answer } => (
                TerminationReason::Answered,
                EventPayload::FinalAnswer {
                    text: answer,
                    steps: session.steps.len(),
                    tool_calls: session.invocations.len(),
                },
            ),
            LoopOutcome::Failed { kind, message } => {
                (TerminationReason::Failed, EventPayload::error(kind, message))
            }
            LoopOutcome::Aborted {
                message,
                partial_answer,
            } => (
                TerminationReason::Aborted,
                EventPayload::Error {
                    kind: ErrorKind::MaxIterationsExceeded,
                    message,
                    partial_answer,
                },
            ),
            LoopOutcome::Cancelled => cancelled(),
        }
    }
}

fn cancelled() -> (TerminationReason, EventPayload) {
    (
        TerminationReason::Cancelled,
        EventPayload::error(ErrorKind::Cancelled, "Turn cancelled"),
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
