//! Fallback path across an execution boundary.
//!
//! Used once when the primary path fails with a transient fault. The job is
//! converted to its transport form, executed by a [`FallbackBoundary`], and
//! the plain-text result returned in the same shape as the primary path.
//! There is no secondary fallback: any failure here is terminal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::strategy::{ChunkSink, GenerationJob, GenerationStrategy};
use super::transport::TransportRequest;
use crate::engine::{destroy_quietly, EngineSession, LanguageEngine, SessionOptions};
use crate::error::{HearthError, Result};
use crate::types::ConversationId;

/// An alternate execution context that accepts transport payloads.
#[async_trait]
pub trait FallbackBoundary: Send + Sync {
    /// Run one encoded [`TransportRequest`] and return the full text.
    ///
    /// Implementations own any session they create and must release it
    /// before returning, whatever the outcome, cancellation included.
    async fn execute(&self, payload: String, cancel: &CancellationToken) -> Result<String>;
}

/// A boundary that runs the prompt on a dedicated, non-pooled session.
///
/// Sessions are tracked per conversation only for the duration of one call.
pub struct IsolatedBoundary {
    engine: Arc<dyn LanguageEngine>,
    sessions: Mutex<HashMap<ConversationId, Arc<dyn EngineSession>>>,
}

impl IsolatedBoundary {
    /// A boundary creating sessions on `engine`.
    pub fn new(engine: Arc<dyn LanguageEngine>) -> Self {
        Self {
            engine,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Sessions currently held by the boundary.
    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn session_for(
        &self,
        request: &TransportRequest,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn EngineSession>> {
        if let Some(existing) = self.sessions.lock().await.get(&request.conversation) {
            return Ok(Arc::clone(existing));
        }
        let session = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HearthError::cancelled("fallback stopped")),
            created = self
                .engine
                .create_session(SessionOptions::with_sampling(request.sampling.clone())) => created?,
        };

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&request.conversation) {
            destroy_quietly(session.as_ref(), "fallback boundary");
            return Ok(Arc::clone(existing));
        }
        sessions.insert(request.conversation.clone(), Arc::clone(&session));
        Ok(session)
    }

    async fn teardown(&self, conversation: &ConversationId) {
        let removed = self.sessions.lock().await.remove(conversation);
        if let Some(session) = removed {
            destroy_quietly(session.as_ref(), "fallback boundary");
        }
    }
}

#[async_trait]
impl FallbackBoundary for IsolatedBoundary {
    async fn execute(&self, payload: String, cancel: &CancellationToken) -> Result<String> {
        let request = TransportRequest::decode(&payload)?;
        let conversation = request.conversation.clone();

        let result = async {
            let session = self.session_for(&request, cancel).await?;
            let input = request.into_prompt_input()?;
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(HearthError::cancelled("fallback stopped")),
                reply = session.prompt(input) => reply,
            }
        }
        .await;

        self.teardown(&conversation).await;
        result
    }
}

/// The fallback strategy.
pub struct FallbackExecutor {
    boundary: Arc<dyn FallbackBoundary>,
    activations: AtomicU32,
}

impl FallbackExecutor {
    /// An executor running through `boundary`.
    pub fn new(boundary: Arc<dyn FallbackBoundary>) -> Self {
        Self {
            boundary,
            activations: AtomicU32::new(0),
        }
    }

    /// How many times the fallback has been used.
    pub fn fallback_count(&self) -> u32 {
        self.activations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl GenerationStrategy for FallbackExecutor {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn run(
        &self,
        job: &GenerationJob,
        _sink: &mut ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.activations.fetch_add(1, Ordering::Relaxed);
        let payload = TransportRequest::from_job(job).encode()?;

        match self.boundary.execute(payload, cancel).await {
            Ok(text) => {
                tracing::info!(generation_id = %job.id, conversation = %job.conversation, "fallback succeeded");
                Ok(text)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e @ HearthError::AttachmentSerialization(_)) => Err(e),
            Err(e) => {
                tracing::warn!(generation_id = %job.id, error = %e, "fallback failed");
                Err(HearthError::FallbackFailure(e.message()))
            }
        }
    }
}
