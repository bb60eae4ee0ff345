//! Generations and their observable results.
//!
//! [`GenerationController::generate`] returns a [`GenerationHandle`]: an
//! ordered stream of [`GenerationEvent`]s ending in exactly one terminal
//! event (`Completed`, `Failed` or `Aborted`). Hosts that prefer callbacks
//! use [`GenerationHandle::drive`] with a [`GenerationCallbacks`] impl.

pub mod controller;
pub mod fallback;
pub mod primary;
pub mod prompt;
pub mod strategy;
pub mod transport;

use futures_util::Stream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::types::ConversationId;

pub use controller::{GenerationController, GenerationControllerBuilder};
pub use fallback::{FallbackBoundary, FallbackExecutor, IsolatedBoundary};
pub use primary::PrimaryStrategy;
pub use strategy::{ChunkSink, GenerationJob, GenerationStrategy};
pub use transport::{TransportAttachment, TransportRequest};

/// Which path produced the final text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    /// Streamed from the pooled session.
    Primary,
    /// Produced by the fallback boundary.
    Fallback,
}

/// One observable step of a generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// The full text so far.
    Chunk {
        /// Text so far.
        text: String,
    },
    /// Finished; `text` is the final full text.
    Completed {
        /// Final text.
        text: String,
        /// Path that produced it.
        path: ExecutionPath,
    },
    /// Failed with a terminal error.
    Failed {
        /// Stable error code.
        code: &'static str,
        /// Text suitable for display.
        message: String,
    },
    /// Stopped or superseded.
    Aborted,
}

impl GenerationEvent {
    /// Whether this event ends the generation.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }
}

/// How a generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Finished with this text.
    Completed {
        /// Final text.
        text: String,
        /// Path that produced it.
        path: ExecutionPath,
    },
    /// Failed.
    Failed {
        /// Stable error code.
        code: &'static str,
        /// Text suitable for display.
        message: String,
    },
    /// Stopped or superseded.
    Aborted,
}

/// Callback interface for hosts that render through side effects.
pub trait GenerationCallbacks: Send + Sync {
    /// Latest full text.
    fn on_chunk(&self, text: &str);
    /// Final text.
    fn on_complete(&self, text: &str);
    /// Terminal failure.
    fn on_error(&self, code: &str, message: &str);
    /// Stopped or superseded. Not an error.
    fn on_abort(&self);
}

/// A running generation.
#[derive(Debug)]
pub struct GenerationHandle {
    id: Uuid,
    conversation: ConversationId,
    events: UnboundedReceiver<GenerationEvent>,
    cancel: CancellationToken,
    finished: bool,
}

impl GenerationHandle {
    pub(crate) fn new(
        id: Uuid,
        conversation: ConversationId,
        events: UnboundedReceiver<GenerationEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            conversation,
            events,
            cancel,
            finished: false,
        }
    }

    /// Generation id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Owning conversation.
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Stop this generation. The handle then ends with `Aborted`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether this generation has been cancelled or superseded.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Next event, or `None` after the terminal event.
    ///
    /// Chunks still queued when the generation is cancelled are dropped.
    pub async fn next_event(&mut self) -> Option<GenerationEvent> {
        if self.finished {
            return None;
        }
        loop {
            let Some(event) = self.events.recv().await else {
                self.finished = true;
                return Some(GenerationEvent::Aborted);
            };
            if matches!(event, GenerationEvent::Chunk { .. }) && self.cancel.is_cancelled() {
                continue;
            }
            if event.is_terminal() {
                self.finished = true;
            }
            return Some(event);
        }
    }

    /// Wait for the terminal event, discarding chunks.
    pub async fn outcome(mut self) -> GenerationOutcome {
        while let Some(event) = self.next_event().await {
            if let Some(outcome) = terminal(event) {
                return outcome;
            }
        }
        GenerationOutcome::Aborted
    }

    /// Deliver every event to `callbacks` and return the outcome.
    pub async fn drive(mut self, callbacks: &dyn GenerationCallbacks) -> GenerationOutcome {
        while let Some(event) = self.next_event().await {
            match &event {
                GenerationEvent::Chunk { text } => callbacks.on_chunk(text),
                GenerationEvent::Completed { text, .. } => callbacks.on_complete(text),
                GenerationEvent::Failed { code, message } => callbacks.on_error(code, message),
                GenerationEvent::Aborted => callbacks.on_abort(),
            }
            if let Some(outcome) = terminal(event) {
                return outcome;
            }
        }
        GenerationOutcome::Aborted
    }

    /// The events as a stream.
    pub fn into_stream(self) -> impl Stream<Item = GenerationEvent> + Send {
        futures_util::stream::unfold(self, |mut handle| async move {
            handle.next_event().await.map(|event| (event, handle))
        })
    }
}

fn terminal(event: GenerationEvent) -> Option<GenerationOutcome> {
    match event {
        GenerationEvent::Chunk { .. } => None,
        GenerationEvent::Completed { text, path } => Some(GenerationOutcome::Completed { text, path }),
        GenerationEvent::Failed { code, message } => Some(GenerationOutcome::Failed { code, message }),
        GenerationEvent::Aborted => Some(GenerationOutcome::Aborted),
    }
}
