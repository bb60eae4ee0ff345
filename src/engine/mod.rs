//! Host capability surface.
//!
//! The host application exposes a local language model, and optionally a
//! language detector, a translator and a speech synthesizer. Each is modeled
//! as a trait object; [`Capabilities`] bundles whichever ones the host
//! actually provides. A missing capability is a normal runtime state and
//! surfaces as [`HearthError::EngineUnavailable`](crate::HearthError).
//!
//! # Stream contract
//!
//! [`EngineSession::prompt_streaming`] yields [`EngineChunk`]s. Engines that
//! emit the full text so far and engines that emit deltas both use
//! [`EngineChunk::Text`]; the reconciler tells them apart by prefix.
//! Engines that can correct earlier output emit [`EngineChunk::Replace`].

pub mod capabilities;
pub mod scripted;
pub mod speech;
pub mod translator;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;

use crate::attachments::PixelBuffer;
use crate::error::Result;
use crate::progress::DownloadMonitor;
use crate::types::{EngineParams, SamplingConfig};

pub use capabilities::Capabilities;
pub use speech::{SpeechSynthesizer, SynthesisError, Utterance};
pub use translator::{DetectedLanguage, LanguageDetector, Translation, TranslatorAvailability, TranslatorEngine};

/// Raw readiness as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAvailability {
    /// The engine cannot run on this device.
    Unavailable,
    /// The model must be downloaded before use.
    Downloadable,
    /// The model is being downloaded.
    Downloading,
    /// Ready to create sessions.
    Available,
}

/// One value from a streaming prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineChunk {
    /// Either the full text so far or a delta; resolved by prefix.
    Text(String),
    /// Replaces everything accumulated so far.
    Replace(String),
}

/// A boxed stream of engine chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<EngineChunk>> + Send>>;

/// Options for creating a session.
#[derive(Clone, Default)]
pub struct SessionOptions {
    /// Sampling for the session. `None` creates a minimal session with
    /// engine defaults.
    pub sampling: Option<SamplingConfig>,
    /// Receives `(loaded, total)` while the model downloads.
    pub monitor: Option<DownloadMonitor>,
}

impl SessionOptions {
    /// A minimal session with engine defaults and no monitor.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// A session configured with `sampling`.
    pub fn with_sampling(sampling: SamplingConfig) -> Self {
        Self {
            sampling: Some(sampling),
            monitor: None,
        }
    }

    /// Register a download monitor.
    pub fn monitor(mut self, monitor: DownloadMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("sampling", &self.sampling)
            .field("monitor", &self.monitor.is_some())
            .finish()
    }
}

/// Input for one prompt call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptInput {
    /// Prompt text, already composed with context and text attachments.
    pub text: String,
    /// Images in engine pixel format.
    pub images: Vec<PixelBuffer>,
}

impl PromptInput {
    /// Text-only input.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }
}

/// The host's local language model.
#[async_trait]
pub trait LanguageEngine: Send + Sync {
    /// Engine name for logs.
    fn name(&self) -> &str;

    /// Query readiness. Called on every live availability check.
    async fn availability(&self) -> Result<EngineAvailability>;

    /// Accepted sampling domain.
    async fn params(&self) -> Result<EngineParams> {
        Ok(EngineParams::default())
    }

    /// Create a session. May trigger and await a model download, reporting
    /// through `options.monitor`.
    async fn create_session(&self, options: SessionOptions) -> Result<Arc<dyn EngineSession>>;
}

/// A live inference context.
#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Run one prompt and return the whole response.
    async fn prompt(&self, input: PromptInput) -> Result<String>;

    /// Run one prompt and stream the response.
    async fn prompt_streaming(&self, input: PromptInput) -> Result<ChunkStream>;

    /// Release engine resources. Must tolerate repeated calls.
    fn destroy(&self) -> Result<()>;
}

/// Destroy `session`, logging instead of propagating failure.
///
/// Used on every teardown path so a secondary failure never masks the
/// primary error.
pub fn destroy_quietly(session: &dyn EngineSession, context: &str) {
    if let Err(e) = session.destroy() {
        tracing::warn!(context, error = %e, "session teardown failed");
    }
}
