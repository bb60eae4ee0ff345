//! Language detection and translation capabilities.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::progress::DownloadMonitor;

/// One detection candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedLanguage {
    /// BCP-47 tag.
    pub language: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Detects the language of a text.
#[async_trait]
pub trait LanguageDetector: Send + Sync {
    /// Candidates, most likely first.
    async fn detect(&self, text: &str) -> Result<Vec<DetectedLanguage>>;
}

/// Readiness of a translator for one language pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslatorAvailability {
    /// The pair is not supported.
    Unavailable,
    /// A model must be downloaded first.
    Downloadable,
    /// A model is being downloaded.
    Downloading,
    /// Ready.
    Available,
}

/// Creates translators for language pairs.
#[async_trait]
pub trait TranslatorEngine: Send + Sync {
    /// Readiness for `source -> target`.
    async fn availability(&self, source: &str, target: &str) -> Result<TranslatorAvailability>;

    /// Create a translator, downloading its model if needed.
    async fn create(
        &self,
        source: &str,
        target: &str,
        monitor: Option<DownloadMonitor>,
    ) -> Result<Arc<dyn Translation>>;
}

/// A live translator for one pair.
#[async_trait]
pub trait Translation: Send + Sync {
    /// Translate `text`.
    async fn translate(&self, text: &str) -> Result<String>;

    /// Release resources. Must tolerate repeated calls.
    fn destroy(&self) -> Result<()>;
}
