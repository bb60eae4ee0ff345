//! Process-wide single-flight guard.
//!
//! Holds at most one active generation. Beginning a new one cancels the
//! previous token before the new ticket is handed out, so the superseded
//! generation is signalled before the new one can deliver anything.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use crate::types::ConversationId;

struct ActiveFlight {
    id: u64,
    conversation: ConversationId,
    token: CancellationToken,
}

/// Ownership of the single flight slot.
#[derive(Debug, Clone)]
pub struct FlightTicket {
    id: u64,
    conversation: ConversationId,
    token: CancellationToken,
}

impl FlightTicket {
    /// Sequence number, unique per guard.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Conversation the flight belongs to.
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Cancelled when the flight is superseded, stopped or shut down.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// The single-flight slot.
pub struct SingleFlight {
    root: CancellationToken,
    next_id: AtomicU64,
    active: Mutex<Option<ActiveFlight>>,
}

impl SingleFlight {
    /// An empty guard.
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            next_id: AtomicU64::new(1),
            active: Mutex::new(None),
        }
    }

    /// Take the slot for `conversation`, cancelling whoever held it.
    pub fn begin(&self, conversation: &ConversationId) -> FlightTicket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = active.take() {
            previous.token.cancel();
            tracing::debug!(
                superseded = previous.id,
                conversation = %previous.conversation,
                by = id,
                "superseding in-flight generation"
            );
        }
        *active = Some(ActiveFlight {
            id,
            conversation: conversation.clone(),
            token: token.clone(),
        });
        FlightTicket {
            id,
            conversation: conversation.clone(),
            token,
        }
    }

    /// Cancel the active flight if it belongs to `conversation` (any flight
    /// when `None`). Returns whether something was cancelled.
    pub fn abort(&self, conversation: Option<&ConversationId>) -> bool {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let matches = active
            .as_ref()
            .is_some_and(|a| conversation.is_none_or(|c| *c == a.conversation));
        if !matches {
            return false;
        }
        if let Some(flight) = active.take() {
            flight.token.cancel();
        }
        true
    }

    /// Release the slot if `ticket` still owns it.
    pub fn finish(&self, ticket: &FlightTicket) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.as_ref().is_some_and(|a| a.id == ticket.id) {
            *active = None;
        }
    }

    /// Whether any flight is active.
    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Conversation of the active flight.
    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|a| a.conversation.clone())
    }

    /// Cancel everything, including flights begun later.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.abort(None);
    }
}

impl Default for SingleFlight {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SingleFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("active", &self.active_conversation())
            .field("shut_down", &self.root.is_cancelled())
            .finish()
    }
}
