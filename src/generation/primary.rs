//! Primary path: stream from the pooled session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use super::strategy::{ChunkSink, GenerationJob, GenerationStrategy};
use crate::error::{HearthError, Result};
use crate::reconcile::{sleep_until_due, Reconciler};
use crate::session::{SessionHandle, SessionPool};

/// Streams through the conversation's pooled session.
///
/// On any failure or cancellation the pooled session is destroyed; the
/// fallback path never reuses it. Engine failures other than cancellation
/// and context restriction are reported as `TransientEngineFault`.
pub struct PrimaryStrategy {
    pool: Arc<SessionPool>,
    throttle: Duration,
}

impl PrimaryStrategy {
    /// A primary path over `pool`, delivering at most once per `throttle`.
    pub fn new(pool: Arc<SessionPool>, throttle: Duration) -> Self {
        Self { pool, throttle }
    }

    async fn stream(
        &self,
        handle: &SessionHandle,
        job: &GenerationJob,
        sink: &mut ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut chunks = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HearthError::cancelled("generation stopped")),
            () = handle.controller().cancelled() => return Err(HearthError::cancelled("session was reset")),
            opened = handle.session().prompt_streaming(job.prompt_input()) => opened.map_err(classify)?,
        };

        let mut reconciler = Reconciler::new(self.throttle);
        loop {
            let due = reconciler.due_at();
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(HearthError::cancelled("generation stopped")),
                () = handle.controller().cancelled() => return Err(HearthError::cancelled("session was reset")),
                () = sleep_until_due(due) => {
                    if let Some(text) = reconciler.take_due() {
                        sink.deliver(text);
                    }
                }
                item = chunks.next() => match item {
                    Some(Ok(chunk)) => {
                        if let Some(text) = reconciler.push(chunk) {
                            sink.deliver(text);
                        }
                    }
                    Some(Err(e)) => return Err(classify(e)),
                    None => break,
                },
            }
        }

        if let Some(text) = reconciler.flush() {
            sink.deliver(text);
        }
        Ok(reconciler.into_text())
    }
}

fn classify(error: HearthError) -> HearthError {
    match error {
        e @ (HearthError::Cancelled(_)
        | HearthError::RestrictedContext(_)
        | HearthError::TransientEngineFault(_)) => e,
        other => HearthError::TransientEngineFault(other.message()),
    }
}

#[async_trait]
impl GenerationStrategy for PrimaryStrategy {
    fn name(&self) -> &'static str {
        "primary"
    }

    async fn run(
        &self,
        job: &GenerationJob,
        sink: &mut ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let handle = self
            .pool
            .get_or_create(&job.conversation, &job.sampling, cancel)
            .await?;

        let result = self.stream(&handle, job, sink, cancel).await;
        if let Err(e) = &result {
            tracing::debug!(
                generation_id = %job.id,
                conversation = %job.conversation,
                error = %e,
                "releasing pooled session after primary failure"
            );
            self.pool.destroy_handle(&handle).await;
        }
        result
    }
}
