//! Short-lived auxiliary tasks.
//!
//! Each task owns its own session (never a pooled one), runs exactly one
//! prompt and releases the session whatever happens. All of them take a
//! cancellation token so a host can abandon them independently.

pub mod replies;
pub mod speech;
pub mod title;
pub mod translate;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::engine::{destroy_quietly, LanguageEngine, PromptInput, SessionOptions};
use crate::error::{HearthError, Result};
use crate::types::SamplingConfig;

pub use replies::{normalize_suggestions, ReplySuggester};
pub use speech::{SpeechOutcome, SpeechRequest, Speaker};
pub use title::{clean_title, is_generic_title, TitleGenerator};
pub use translate::{TranslationOutcome, TranslationPipeline};

/// Create a session, run `input`, destroy the session.
///
/// The session's sampling starts from the engine's defaults, is adjusted by
/// `tune` and validated before anything is created.
///
/// # Errors
///
/// `EngineUnavailable` without an engine, `ConfigValidation` if the tuned
/// sampling is outside the engine's domain, `Cancelled` if `cancel` fires,
/// or whatever the engine fails with.
pub async fn run_single_prompt(
    engine: Option<&Arc<dyn LanguageEngine>>,
    tune: impl FnOnce(SamplingConfig) -> SamplingConfig + Send,
    input: PromptInput,
    cancel: &CancellationToken,
    task: &'static str,
) -> Result<String> {
    let engine = engine.ok_or_else(|| {
        HearthError::EngineUnavailable("no language model capability in this host".to_owned())
    })?;

    let params = engine.params().await?;
    let sampling = tune(SamplingConfig::for_engine(&params));
    sampling.validate(&params)?;

    let session = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(HearthError::cancelled(format!("{task} cancelled"))),
        created = engine.create_session(SessionOptions::with_sampling(sampling)) => created?,
    };

    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(HearthError::cancelled(format!("{task} cancelled"))),
        reply = session.prompt(input) => reply,
    };
    destroy_quietly(session.as_ref(), task);

    if let Err(e) = &result {
        tracing::debug!(task, error = %e, "auxiliary prompt failed");
    }
    result
}
