//! The controller that owns every piece of process-wide state.
//!
//! One [`GenerationController`] is built per process and cloned into
//! callers. It owns the session pool, the single-flight guard, the
//! availability tracker and the diagnostics store, and runs each generation
//! as a tracked background task that reports through a
//! [`GenerationHandle`].

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::fallback::{FallbackBoundary, FallbackExecutor, IsolatedBoundary};
use super::primary::PrimaryStrategy;
use super::strategy::{ChunkSink, GenerationJob, GenerationStrategy};
use super::{ExecutionPath, GenerationEvent, GenerationHandle};
use crate::attachments::AttachmentPreprocessor;
use crate::availability::{AvailabilitySnapshot, AvailabilityStatus, AvailabilityTracker};
use crate::clock::{Clock, SystemClock};
use crate::config::HearthConfig;
use crate::diagnostics::DiagnosticsStore;
use crate::engine::Capabilities;
use crate::error::{HearthError, Result};
use crate::session::{FlightTicket, SessionPool, SingleFlight};
use crate::tasks::{ReplySuggester, Speaker, TitleGenerator, TranslationPipeline};
use crate::types::{ConversationId, GenerationRequest, GenerationRequestBuilder};

/// Builds a [`GenerationController`].
pub struct GenerationControllerBuilder {
    capabilities: Capabilities,
    config: HearthConfig,
    clock: Option<Arc<dyn Clock>>,
    diagnostics: Option<Arc<DiagnosticsStore>>,
    fallback_boundary: Option<Arc<dyn FallbackBoundary>>,
}

impl GenerationControllerBuilder {
    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: HearthConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `clock` for timestamps and priming TTLs.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use an existing diagnostics store instead of the configured one.
    pub fn diagnostics(mut self, diagnostics: Arc<DiagnosticsStore>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Run fallbacks through `boundary` instead of an isolated session on
    /// the same engine.
    pub fn fallback_boundary(mut self, boundary: Arc<dyn FallbackBoundary>) -> Self {
        self.fallback_boundary = Some(boundary);
        self
    }

    /// Validate the configuration and assemble the controller.
    ///
    /// # Errors
    ///
    /// `ConfigValidation` when the configuration is unusable.
    pub fn build(self) -> Result<GenerationController> {
        let Self {
            capabilities,
            config,
            clock,
            diagnostics,
            fallback_boundary,
        } = self;
        config.validate()?;

        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let diagnostics = diagnostics.unwrap_or_else(|| {
            if config.diagnostics.in_memory {
                Arc::new(DiagnosticsStore::in_memory())
            } else {
                Arc::new(DiagnosticsStore::from_path(config.diagnostics.resolved_path()))
            }
        });
        let engine = capabilities.language_model().cloned();

        let pool = Arc::new(SessionPool::new(engine.clone()));
        let primary: Arc<dyn GenerationStrategy> = Arc::new(PrimaryStrategy::new(
            Arc::clone(&pool),
            config.generation.throttle_interval(),
        ));
        let fallback = if config.generation.enable_fallback {
            fallback_boundary
                .or_else(|| {
                    engine
                        .clone()
                        .map(|e| Arc::new(IsolatedBoundary::new(e)) as Arc<dyn FallbackBoundary>)
                })
                .map(|boundary| Arc::new(FallbackExecutor::new(boundary)))
        } else {
            None
        };

        let prime_ttl = i64::try_from(config.availability.prime_ttl_secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .unwrap_or(chrono::TimeDelta::MAX);
        let availability = Arc::new(AvailabilityTracker::new(
            engine.clone(),
            Arc::clone(&diagnostics),
            Arc::clone(&clock),
            prime_ttl,
        ));

        let titles = TitleGenerator::new(engine.clone(), config.titles.clone(), Arc::clone(&clock));
        let replies = ReplySuggester::new(engine, config.replies.clone());
        let translation = TranslationPipeline::new(
            capabilities.language_detector().cloned(),
            capabilities.translator().cloned(),
            config.translation.clone(),
        );
        let speaker = Speaker::new(capabilities.speech().cloned(), config.speech.clone());

        tracing::debug!(
            ?capabilities,
            fallback = fallback.is_some(),
            throttle_ms = config.generation.throttle_ms,
            "generation controller built"
        );

        Ok(GenerationController {
            inner: Arc::new(Inner {
                attachments: AttachmentPreprocessor::new(&config.attachments),
                config,
                capabilities,
                pool,
                flight: SingleFlight::new(),
                lane: tokio::sync::Mutex::new(()),
                availability,
                diagnostics,
                primary,
                fallback,
                titles,
                replies,
                translation,
                speaker,
                tasks: TaskTracker::new(),
            }),
        })
    }
}

struct Inner {
    config: HearthConfig,
    capabilities: Capabilities,
    pool: Arc<SessionPool>,
    flight: SingleFlight,
    /// Held for the whole of a run so a superseded run has released its
    /// pooled session before the next one touches the pool.
    lane: tokio::sync::Mutex<()>,
    availability: Arc<AvailabilityTracker>,
    diagnostics: Arc<DiagnosticsStore>,
    attachments: AttachmentPreprocessor,
    primary: Arc<dyn GenerationStrategy>,
    fallback: Option<Arc<FallbackExecutor>>,
    titles: TitleGenerator,
    replies: ReplySuggester,
    translation: TranslationPipeline,
    speaker: Speaker,
    tasks: TaskTracker,
}

/// Process-wide generation controller. Cheap to clone.
#[derive(Clone)]
pub struct GenerationController {
    inner: Arc<Inner>,
}

impl GenerationController {
    /// Start building a controller over `capabilities`.
    pub fn builder(capabilities: Capabilities) -> GenerationControllerBuilder {
        GenerationControllerBuilder {
            capabilities,
            config: HearthConfig::default(),
            clock: None,
            diagnostics: None,
            fallback_boundary: None,
        }
    }

    /// Load diagnostics, take a fresh availability reading and, when
    /// configured and the model is ready, prime it in the background.
    pub async fn init(&self) -> AvailabilitySnapshot {
        let record = self.inner.diagnostics.snapshot().await;
        tracing::debug!(
            last_availability = ?record.availability,
            last_warmup = ?record.last_warmup_status,
            "loaded diagnostics"
        );

        let snapshot = self.inner.availability.check_availability(true).await;
        if self.inner.config.availability.prime_on_init
            && snapshot.status == AvailabilityStatus::Ready
        {
            let availability = Arc::clone(&self.inner.availability);
            self.inner.tasks.spawn(async move {
                if let Err(e) = availability.prime().await {
                    tracing::warn!(error = %e, "background prime failed");
                }
            });
        }
        snapshot
    }

    /// A request builder seeded with the configured default sampling.
    pub fn request_builder(
        &self,
        conversation: ConversationId,
        prompt: impl Into<String>,
    ) -> GenerationRequestBuilder {
        GenerationRequest::builder(conversation, prompt)
            .sampling(self.inner.config.generation.sampling.clone())
    }

    /// Start a generation, superseding whichever one is in flight.
    ///
    /// Validation happens before any session is created. The returned
    /// handle yields the chunks and exactly one terminal event.
    ///
    /// # Errors
    ///
    /// `EngineUnavailable` when there is no model, it is not ready, or the
    /// controller has been shut down; `ConfigValidation` when the sampling
    /// is outside the engine's domain.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationHandle> {
        let inner = &self.inner;
        if inner.tasks.is_closed() {
            return Err(HearthError::EngineUnavailable(
                "controller has been shut down".to_owned(),
            ));
        }
        let engine = inner.capabilities.require_language_model()?;
        let params = engine.params().await?;
        request.sampling().validate(&params)?;

        let status = inner.availability.check_availability(false).await.status;
        if status != AvailabilityStatus::Ready {
            return Err(HearthError::EngineUnavailable(format!(
                "language model is {status}; it must be downloaded and ready first"
            )));
        }

        let ticket = inner.flight.begin(request.conversation_id());
        let id = Uuid::new_v4();
        let (events, receiver) = mpsc::unbounded_channel();
        let handle = GenerationHandle::new(
            id,
            request.conversation_id().clone(),
            receiver,
            ticket.token().clone(),
        );
        tracing::debug!(
            generation_id = %id,
            conversation = %request.conversation_id(),
            attachments = request.attachments().len(),
            "starting generation"
        );

        inner
            .tasks
            .spawn(Inner::run(Arc::clone(inner), ticket, request, events, id));
        Ok(handle)
    }

    /// Stop the generation in flight for `conversation` (any when `None`).
    /// Returns whether one was stopped.
    pub fn stop(&self, conversation: Option<&ConversationId>) -> bool {
        self.inner.flight.abort(conversation)
    }

    /// Stop and forget `conversation`'s session (every session when `None`).
    /// Returns how many sessions were destroyed.
    pub async fn reset(&self, conversation: Option<&ConversationId>) -> usize {
        self.inner.flight.abort(conversation);
        self.inner.pool.destroy(conversation).await
    }

    /// Cancel everything, destroy every session and wait for background
    /// work to finish. Later `generate` calls fail.
    pub async fn shutdown(&self) {
        self.inner.flight.shutdown();
        self.inner.tasks.close();
        let destroyed = self.inner.pool.destroy(None).await;
        self.inner.tasks.wait().await;
        tracing::info!(destroyed, "generation controller shut down");
    }

    /// Availability, download, prime and warmup operations.
    pub fn availability(&self) -> &AvailabilityTracker {
        &self.inner.availability
    }

    /// The diagnostics record store.
    pub fn diagnostics(&self) -> &Arc<DiagnosticsStore> {
        &self.inner.diagnostics
    }

    /// How many times the fallback path has run.
    pub fn fallback_count(&self) -> u32 {
        self.inner
            .fallback
            .as_ref()
            .map_or(0, |f| f.fallback_count())
    }

    /// Whether a generation is in flight.
    pub fn is_generating(&self) -> bool {
        self.inner.flight.is_active()
    }

    /// Number of pooled sessions.
    pub async fn pooled_sessions(&self) -> usize {
        self.inner.pool.len().await
    }

    /// Conversation title synthesis.
    pub fn titles(&self) -> &TitleGenerator {
        &self.inner.titles
    }

    /// Smart reply suggestions.
    pub fn replies(&self) -> &ReplySuggester {
        &self.inner.replies
    }

    /// Language detection and translation.
    pub fn translation(&self) -> &TranslationPipeline {
        &self.inner.translation
    }

    /// Text-to-speech.
    pub fn speaker(&self) -> &Speaker {
        &self.inner.speaker
    }

    /// The active configuration.
    pub fn config(&self) -> &HearthConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for GenerationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationController")
            .field("capabilities", &self.inner.capabilities)
            .field("flight", &self.inner.flight)
            .field("fallback", &self.inner.fallback.is_some())
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn run(
        self: Arc<Self>,
        ticket: FlightTicket,
        request: GenerationRequest,
        events: UnboundedSender<GenerationEvent>,
        id: Uuid,
    ) {
        let cancel = ticket.token().clone();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(HearthError::cancelled("superseded before start")),
            lane = self.lane.lock() => {
                let _lane = lane;
                self.execute(id, &request, &events, &cancel).await
            }
        };
        self.flight.finish(&ticket);

        let terminal = match result {
            _ if cancel.is_cancelled() => GenerationEvent::Aborted,
            Ok((text, path)) => {
                tracing::debug!(generation_id = %id, ?path, chars = text.chars().count(), "generation complete");
                GenerationEvent::Completed { text, path }
            }
            Err(e) if e.is_cancelled() => GenerationEvent::Aborted,
            Err(e) => {
                tracing::warn!(
                    generation_id = %id,
                    conversation = %request.conversation_id(),
                    error = %e,
                    "generation failed"
                );
                GenerationEvent::Failed {
                    code: e.code(),
                    message: e.user_message().to_owned(),
                }
            }
        };
        if events.send(terminal).is_err() {
            tracing::debug!(generation_id = %id, "handle dropped before completion");
        }
    }

    async fn execute(
        &self,
        id: Uuid,
        request: &GenerationRequest,
        events: &UnboundedSender<GenerationEvent>,
        cancel: &CancellationToken,
    ) -> Result<(String, ExecutionPath)> {
        let attachments = self.attachments.prepare(request.attachments(), cancel).await?;
        let job = GenerationJob::new(
            id,
            request,
            attachments,
            self.config.generation.max_context_chars,
        );
        let mut sink = ChunkSink::new(events.clone(), cancel.clone());

        let error = match self.primary.run(&job, &mut sink, cancel).await {
            Ok(text) => return Ok((text, ExecutionPath::Primary)),
            Err(e) if !e.triggers_fallback() => return Err(e),
            Err(e) => e,
        };

        if self.config.generation.is_restricted_origin(request.origin()) {
            return Err(HearthError::RestrictedContext(format!(
                "inference is not permitted on {}: {}",
                request.origin().unwrap_or_default(),
                error.message()
            )));
        }
        let Some(fallback) = &self.fallback else {
            return Err(error);
        };

        sink.close();
        tracing::info!(
            generation_id = %id,
            conversation = %job.conversation,
            delivered = sink.delivered(),
            error = %error,
            strategy = fallback.name(),
            "primary path failed; switching to fallback"
        );
        let text = fallback.run(&job, &mut sink, cancel).await?;
        Ok((text, ExecutionPath::Fallback))
    }
}
