//! Conversation-keyed session pool.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::engine::{destroy_quietly, EngineSession, LanguageEngine, SessionOptions};
use crate::error::{HearthError, Result};
use crate::types::{ConversationId, SamplingConfig};

struct PooledSession {
    session: Arc<dyn EngineSession>,
    sampling: SamplingConfig,
    controller: CancellationToken,
}

/// A borrowed view of a pooled session.
///
/// `controller()` fires when the pool destroys the session, so a generation
/// using it can stop at its next suspension point.
#[derive(Clone)]
pub struct SessionHandle {
    conversation: ConversationId,
    session: Arc<dyn EngineSession>,
    controller: CancellationToken,
}

impl SessionHandle {
    /// The owning conversation.
    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// The engine session.
    pub fn session(&self) -> &Arc<dyn EngineSession> {
        &self.session
    }

    /// Fires when the pool destroys this session.
    pub fn controller(&self) -> &CancellationToken {
        &self.controller
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("conversation", &self.conversation)
            .field("aborted", &self.controller.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// At most one live engine session per conversation.
pub struct SessionPool {
    engine: Option<Arc<dyn LanguageEngine>>,
    sessions: Mutex<HashMap<ConversationId, PooledSession>>,
}

impl SessionPool {
    /// A pool creating sessions on `engine`.
    pub fn new(engine: Option<Arc<dyn LanguageEngine>>) -> Self {
        Self {
            engine,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The pooled session for `conversation`, created on demand.
    ///
    /// An existing session is reused only when it was created with the same
    /// sampling and has not been aborted; otherwise it is destroyed and
    /// replaced. The pool lock is not held while the engine creates the
    /// session, and creation is abandoned as soon as `cancel` fires.
    ///
    /// # Errors
    ///
    /// `EngineUnavailable` if there is no engine, `Cancelled` if `cancel`
    /// fires first, or whatever session creation fails with.
    pub async fn get_or_create(
        &self,
        conversation: &ConversationId,
        sampling: &SamplingConfig,
        cancel: &CancellationToken,
    ) -> Result<SessionHandle> {
        let engine = self.engine.as_ref().ok_or_else(|| {
            HearthError::EngineUnavailable("no language model capability in this host".to_owned())
        })?;

        {
            let mut sessions = self.sessions.lock().await;
            if let Some(handle) = reusable(&sessions, conversation, sampling) {
                return Ok(handle);
            }
            if let Some(stale) = sessions.remove(conversation) {
                tracing::debug!(%conversation, "replacing pooled session");
                release(conversation, stale);
            }
        }

        let session = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HearthError::cancelled("session creation abandoned")),
            created = engine.create_session(SessionOptions::with_sampling(sampling.clone())) => created?,
        };

        let mut sessions = self.sessions.lock().await;
        if cancel.is_cancelled() {
            destroy_quietly(session.as_ref(), conversation.as_str());
            return Err(HearthError::cancelled("session creation abandoned"));
        }
        // Another caller pooled a usable session while this one was created.
        if let Some(handle) = reusable(&sessions, conversation, sampling) {
            destroy_quietly(session.as_ref(), conversation.as_str());
            return Ok(handle);
        }
        if let Some(stale) = sessions.remove(conversation) {
            release(conversation, stale);
        }

        let controller = CancellationToken::new();
        sessions.insert(
            conversation.clone(),
            PooledSession {
                session: Arc::clone(&session),
                sampling: sampling.clone(),
                controller: controller.clone(),
            },
        );
        tracing::debug!(%conversation, pooled = sessions.len(), "created session");
        Ok(SessionHandle {
            conversation: conversation.clone(),
            session,
            controller,
        })
    }

    /// Destroy the session for `conversation`, or every session when `None`.
    ///
    /// Never fails; teardown errors are logged. Destroying an id with no
    /// session is a no-op. Returns how many sessions were released.
    pub async fn destroy(&self, conversation: Option<&ConversationId>) -> usize {
        let mut sessions = self.sessions.lock().await;
        match conversation {
            Some(id) => match sessions.remove(id) {
                Some(pooled) => {
                    release(id, pooled);
                    1
                }
                None => 0,
            },
            None => {
                let drained: Vec<_> = sessions.drain().collect();
                let count = drained.len();
                for (id, pooled) in drained {
                    release(&id, pooled);
                }
                count
            }
        }
    }

    /// Destroy the session for `conversation` only if it is still `handle`'s
    /// session. A replacement created meanwhile is left alone.
    pub async fn destroy_handle(&self, handle: &SessionHandle) -> bool {
        let mut sessions = self.sessions.lock().await;
        let is_current = sessions
            .get(&handle.conversation)
            .is_some_and(|p| Arc::ptr_eq(&p.session, &handle.session));
        if is_current {
            if let Some(pooled) = sessions.remove(&handle.conversation) {
                release(&handle.conversation, pooled);
            }
        } else if !handle.controller.is_cancelled() {
            handle.controller.cancel();
            destroy_quietly(handle.session.as_ref(), "detached session");
        }
        is_current
    }

    /// Whether a session is pooled for `conversation`.
    pub async fn contains(&self, conversation: &ConversationId) -> bool {
        self.sessions.lock().await.contains_key(conversation)
    }

    /// Number of pooled sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether the pool is empty.
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

fn reusable(
    sessions: &HashMap<ConversationId, PooledSession>,
    conversation: &ConversationId,
    sampling: &SamplingConfig,
) -> Option<SessionHandle> {
    sessions
        .get(conversation)
        .filter(|pooled| pooled.sampling == *sampling && !pooled.controller.is_cancelled())
        .map(|pooled| SessionHandle {
            conversation: conversation.clone(),
            session: Arc::clone(&pooled.session),
            controller: pooled.controller.clone(),
        })
}

fn release(conversation: &ConversationId, pooled: PooledSession) {
    pooled.controller.cancel();
    destroy_quietly(pooled.session.as_ref(), conversation.as_str());
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("engine", &self.engine.as_ref().map(|e| e.name().to_owned()))
            .finish_non_exhaustive()
    }
}
