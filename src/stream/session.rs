//! Lifecycle of one streaming run.
//!
//! ```text
//! Idle -> Opening -> Streaming -> Completed
//!            |           |-----> Failed
//!            |           '-----> Cancelled
//!            '-----> Failed | Cancelled
//! ```
//!
//! A [`StreamSession`] is consumed by [`StreamSession::run`], so a controller
//! can only ever drive one request and reach one terminal state. Exactly one
//! of [`StreamObserver::on_complete`] or [`StreamObserver::on_error`] fires,
//! unless the run is cancelled, in which case neither does.

use super::assembler::FragmentAssembler;
use crate::agent::{AgentTransport, Event};
use crate::models::RunRequest;
use crate::response::ResponseAccumulator;
use crate::Error;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Opening,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }
}

/// Callbacks driven by a [`StreamSession`]. All methods default to no-ops.
pub trait StreamObserver: Send {
    /// A complete event, in stream order.
    fn on_event(&mut self, _event: &Event) {}

    /// The stream ended normally and every buffered event was delivered.
    fn on_complete(&mut self) {}

    /// Transport or body failure; terminal.
    fn on_error(&mut self, _error: Error) {}

    /// Every lifecycle transition, including the cancelled one.
    fn on_state_change(&mut self, _from: SessionState, _to: SessionState) {}
}

/// Streaming counterpart of [`crate::response::process`].
impl StreamObserver for ResponseAccumulator {
    fn on_event(&mut self, event: &Event) {
        self.apply(event);
    }
}

/// Observer that keeps every event and the terminal outcome.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    pub events: Vec<Event>,
    pub completed: bool,
    pub error: Option<Error>,
    pub transitions: Vec<(SessionState, SessionState)>,
}

impl StreamObserver for CollectingObserver {
    fn on_event(&mut self, event: &Event) {
        self.events.push(event.clone());
    }

    fn on_complete(&mut self) {
        self.completed = true;
    }

    fn on_error(&mut self, error: Error) {
        self.error = Some(error);
    }

    fn on_state_change(&mut self, from: SessionState, to: SessionState) {
        self.transitions.push((from, to));
    }
}

/// What a finished run looked like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub state: SessionState,
    pub events: usize,
    pub bytes: usize,
}

/// Per-request read-loop state; never outlives one `run`.
#[derive(Debug, Default)]
struct StreamState {
    assembler: FragmentAssembler,
    cancelled: bool,
    event_count: usize,
    bytes_received: usize,
}

/// Single-use controller for one streaming request.
#[derive(Debug)]
pub struct StreamSession {
    state: SessionState,
    cancel: CancellationToken,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            state: SessionState::Idle,
            cancel,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle for cancelling this session from elsewhere.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Open the stream and drive it to a terminal state.
    pub async fn run<T, O>(
        mut self,
        transport: &T,
        request: &RunRequest,
        observer: &mut O,
    ) -> SessionSummary
    where
        T: AgentTransport + ?Sized,
        O: StreamObserver + ?Sized,
    {
        let mut stream_state = StreamState::default();
        self.transition(SessionState::Opening, observer);

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = transport.open_stream(request) => Some(result),
        };

        let mut body = match opened {
            None => return self.cancelled(stream_state, observer),
            Some(Err(e)) => return self.failed(e, stream_state, observer),
            Some(Ok(body)) => body,
        };

        self.transition(SessionState::Streaming, observer);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.cancelled(stream_state, observer),
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    stream_state.bytes_received += chunk.len();
                    debug!(bytes = chunk.len(), "received stream chunk");
                    stream_state.assembler.push_bytes(&chunk);

                    while let Some(value) = stream_state.assembler.next_event() {
                        if self.cancel.is_cancelled() {
                            return self.cancelled(stream_state, observer);
                        }
                        Self::dispatch(value, &mut stream_state, observer);
                    }
                }
                Some(Err(e)) => return self.failed(e, stream_state, observer),
                None => break,
            }
        }
        drop(body);

        let mut tail = Vec::new();
        stream_state.assembler.finalize(|value| tail.push(value));
        for value in tail {
            if self.cancel.is_cancelled() {
                return self.cancelled(stream_state, observer);
            }
            Self::dispatch(value, &mut stream_state, observer);
        }

        if stream_state.bytes_received == 0 {
            return self.failed(Error::EmptyBody, stream_state, observer);
        }

        if self.cancel.is_cancelled() {
            return self.cancelled(stream_state, observer);
        }

        self.transition(SessionState::Completed, observer);
        info!(
            events = stream_state.event_count,
            bytes = stream_state.bytes_received,
            "stream completed"
        );
        observer.on_complete();
        self.summary(&stream_state)
    }

    fn dispatch<O>(value: Value, stream_state: &mut StreamState, observer: &mut O)
    where
        O: StreamObserver + ?Sized,
    {
        match serde_json::from_value::<Event>(value) {
            Ok(event) => {
                stream_state.event_count += 1;
                observer.on_event(&event);
            }
            Err(e) => warn!("Skipping stream object that is not an agent event: {}", e),
        }
    }

    fn transition<O>(&mut self, to: SessionState, observer: &mut O)
    where
        O: StreamObserver + ?Sized,
    {
        let from = self.state;
        debug!(?from, ?to, "stream session transition");
        self.state = to;
        observer.on_state_change(from, to);
    }

    fn cancelled<O>(mut self, mut stream_state: StreamState, observer: &mut O) -> SessionSummary
    where
        O: StreamObserver + ?Sized,
    {
        stream_state.cancelled = true;
        let discarded = stream_state.assembler.buffered_len();
        stream_state.assembler.clear();
        info!(
            events = stream_state.event_count,
            discarded_bytes = discarded,
            "stream cancelled"
        );
        self.transition(SessionState::Cancelled, observer);
        self.summary(&stream_state)
    }

    fn failed<O>(mut self, error: Error, stream_state: StreamState, observer: &mut O) -> SessionSummary
    where
        O: StreamObserver + ?Sized,
    {
        tracing::error!("Stream failed: {}", error);
        self.transition(SessionState::Failed, observer);
        observer.on_error(error);
        self.summary(&stream_state)
    }

    fn summary(&self, stream_state: &StreamState) -> SessionSummary {
        debug!(
            state = ?self.state,
            cancelled = stream_state.cancelled,
            "stream session finished"
        );
        SessionSummary {
            state: self.state,
            events: stream_state.event_count,
            bytes: stream_state.bytes_received,
        }
    }
}
