//! Per-session event stream.
//!
//! Every transition of a turn goes through one [`EventEmitter`], which
//! stamps it with the next sequence number and pushes it into a bounded
//! channel. Numbering and sending happen under the same lock, so the
//! subscriber sees events in sequence order with no gaps. A full channel
//! blocks the producer.
//!
//! Once the turn's cancel token fires, ordinary events are dropped and the
//! terminal event is forced to `Error { kind: Cancelled }`. Exactly one
//! terminal event is ever sent.

use chrono::Utc;
use refdesk_core::{ErrorKind, EventPayload, SessionId, StreamEvent};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct EmitterState {
    next_sequence: u64,
    finished: bool,
    subscriber_gone: bool,
}

pub struct EventEmitter {
    session_id: SessionId,
    tx: mpsc::Sender<StreamEvent>,
    state: Mutex<EmitterState>,
    cancel: CancellationToken,
}

impl EventEmitter {
    /// Create an emitter and the receiving end of its stream.
    pub fn channel(
        session_id: SessionId,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let emitter = Self {
            session_id,
            tx,
            state: Mutex::new(EmitterState::default()),
            cancel,
        };
        (emitter, rx)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Send a non-terminal event. Returns whether it was delivered.
    ///
    /// Terminal payloads are routed to [`finish`](Self::finish).
    pub async fn emit(&self, payload: EventPayload) -> bool {
        if payload.is_terminal() {
            return self.finish(payload).await.is_some();
        }
        if self.cancel.is_cancelled() {
            debug!(event = payload.event_type(), "Suppressing event after cancellation");
            return false;
        }

        let mut state = self.state.lock().await;
        if state.finished {
            warn!(event = payload.event_type(), "Event after terminal event dropped");
            return false;
        }

        let event = self.stamp(&state, payload);
        if state.subscriber_gone {
            return false;
        }

        // A cancel while blocked on a full buffer drops the event unnumbered.
        tokio::select! {
            biased;
            sent = self.tx.send(event) => self.record_send(&mut state, sent.is_ok()),
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Send the terminal event, once. Returns the payload actually used,
    /// or `None` if the stream was already finished.
    pub async fn finish(&self, payload: EventPayload) -> Option<EventPayload> {
        let mut state = self.state.lock().await;
        if state.finished {
            warn!(event = payload.event_type(), "Second terminal event dropped");
            return None;
        }
        state.finished = true;

        let payload = if self.cancel.is_cancelled()
            && payload.error_kind() != Some(ErrorKind::Cancelled)
        {
            EventPayload::error(ErrorKind::Cancelled, "Turn cancelled")
        } else {
            payload
        };

        let event = self.stamp(&state, payload.clone());
        if !state.subscriber_gone {
            let sent = self.tx.send(event).await.is_ok();
            self.record_send(&mut state, sent);
        }
        Some(payload)
    }

    /// Number of events delivered so far.
    pub async fn sent(&self) -> u64 {
        self.state.lock().await.next_sequence
    }

    pub async fn is_finished(&self) -> bool {
        self.state.lock().await.finished
    }

    fn stamp(&self, state: &EmitterState, payload: EventPayload) -> StreamEvent {
        StreamEvent {
            session_id: self.session_id.clone(),
            sequence: state.next_sequence,
            timestamp: Utc::now(),
            payload,
        }
    }

    fn record_send(&self, state: &mut EmitterState, sent: bool) -> bool {
        if sent {
            state.next_sequence += 1;
        } else if !state.subscriber_gone {
            warn!(session = %self.session_id, "Event subscriber dropped, discarding further events");
            state.subscriber_gone = true;
        }
        sent
    }
}
