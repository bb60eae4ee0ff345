//! The capability provider resolved once at controller construction.

use std::sync::Arc;

use crate::error::{HearthError, Result};

use super::{LanguageDetector, LanguageEngine, SpeechSynthesizer, TranslatorEngine};

/// Whichever host capabilities are present.
///
/// Absence is a first-class state: accessors return
/// [`HearthError::EngineUnavailable`] instead of forcing null checks at call
/// sites.
#[derive(Clone, Default)]
pub struct Capabilities {
    language_model: Option<Arc<dyn LanguageEngine>>,
    language_detector: Option<Arc<dyn LanguageDetector>>,
    translator: Option<Arc<dyn TranslatorEngine>>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
}

impl Capabilities {
    /// No capabilities at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Provide the language model.
    pub fn with_language_model(mut self, engine: Arc<dyn LanguageEngine>) -> Self {
        self.language_model = Some(engine);
        self
    }

    /// Provide the language detector.
    pub fn with_language_detector(mut self, detector: Arc<dyn LanguageDetector>) -> Self {
        self.language_detector = Some(detector);
        self
    }

    /// Provide the translator.
    pub fn with_translator(mut self, translator: Arc<dyn TranslatorEngine>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Provide the speech synthesizer.
    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(speech);
        self
    }

    /// The language model, if present.
    pub fn language_model(&self) -> Option<&Arc<dyn LanguageEngine>> {
        self.language_model.as_ref()
    }

    /// The language model, or `EngineUnavailable`.
    pub fn require_language_model(&self) -> Result<Arc<dyn LanguageEngine>> {
        self.language_model.clone().ok_or_else(|| {
            HearthError::EngineUnavailable("no language model capability in this host".to_owned())
        })
    }

    /// The language detector, if present.
    pub fn language_detector(&self) -> Option<&Arc<dyn LanguageDetector>> {
        self.language_detector.as_ref()
    }

    /// The translator, if present.
    pub fn translator(&self) -> Option<&Arc<dyn TranslatorEngine>> {
        self.translator.as_ref()
    }

    /// The speech synthesizer, if present.
    pub fn speech(&self) -> Option<&Arc<dyn SpeechSynthesizer>> {
        self.speech.as_ref()
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field(
                "language_model",
                &self.language_model.as_ref().map(|e| e.name().to_owned()),
            )
            .field("language_detector", &self.language_detector.is_some())
            .field("translator", &self.translator.is_some())
            .field("speech", &self.speech.is_some())
            .finish()
    }
}
