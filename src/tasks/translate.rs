//! Translation pipeline: detect, check, download, translate.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::TranslationConfig;
use crate::engine::{LanguageDetector, TranslatorAvailability, TranslatorEngine};
use crate::error::{HearthError, Result};
use crate::progress::{monitor_for, DownloadTarget, ProgressCallback};
use crate::types::primary_subtag;

/// Result of one translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationOutcome {
    /// Source language used (primary subtag).
    pub source_language: String,
    /// Target language (primary subtag).
    pub target_language: String,
    /// Translated text; the input itself when `same_language` is set.
    pub translated_text: String,
    /// Source and target matched, so nothing was translated.
    pub same_language: bool,
    /// A translation model was downloaded for this call.
    pub downloaded: bool,
}

/// Detector plus translator, both optional.
pub struct TranslationPipeline {
    detector: Option<Arc<dyn LanguageDetector>>,
    translator: Option<Arc<dyn TranslatorEngine>>,
    config: TranslationConfig,
}

impl TranslationPipeline {
    /// A pipeline over whichever capabilities the host has.
    pub fn new(
        detector: Option<Arc<dyn LanguageDetector>>,
        translator: Option<Arc<dyn TranslatorEngine>>,
        config: TranslationConfig,
    ) -> Self {
        Self {
            detector,
            translator,
            config,
        }
    }

    /// Source language of `text`: the detector's best candidate if it is
    /// confident enough, the configured default otherwise.
    pub async fn detect_source(&self, text: &str) -> String {
        let fallback = || primary_subtag(&self.config.default_source_language);
        let Some(detector) = &self.detector else {
            return fallback();
        };
        match detector.detect(text).await {
            Ok(candidates) => candidates
                .into_iter()
                .find(|c| c.confidence >= self.config.min_confidence)
                .map(|c| primary_subtag(&c.language))
                .filter(|l| !l.is_empty())
                .unwrap_or_else(fallback),
            Err(e) => {
                tracing::debug!(error = %e, "language detection failed; using default source");
                fallback()
            }
        }
    }

    /// Translate `text` into `target_language`.
    ///
    /// When the source already matches the target the input is returned
    /// with `same_language` set and the translator is never called.
    ///
    /// # Errors
    ///
    /// `EngineUnavailable` without a translator, `Translation` when the
    /// pair is unsupported or translation fails, `Cancelled` if `cancel`
    /// fires.
    pub async fn translate(
        &self,
        text: &str,
        target_language: &str,
        on_progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<TranslationOutcome> {
        let target = primary_subtag(target_language);
        let source = self.detect_source(text).await;

        if source == target {
            return Ok(TranslationOutcome {
                source_language: source,
                target_language: target,
                translated_text: text.to_owned(),
                same_language: true,
                downloaded: false,
            });
        }

        let translator = self.translator.as_ref().ok_or_else(|| {
            HearthError::EngineUnavailable("no translator capability in this host".to_owned())
        })?;

        let availability = translator
            .availability(&source, &target)
            .await
            .map_err(wrap)?;
        let downloaded = match availability {
            TranslatorAvailability::Unavailable => {
                return Err(HearthError::Translation(format!(
                    "no translation model for {source} -> {target}"
                )));
            }
            TranslatorAvailability::Downloadable | TranslatorAvailability::Downloading => true,
            TranslatorAvailability::Available => false,
        };

        let monitor = on_progress.filter(|_| downloaded).map(|callback| {
            monitor_for(
                DownloadTarget::Translator {
                    source: source.clone(),
                    target: target.clone(),
                },
                callback,
            )
        });

        let translation = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HearthError::cancelled("translation cancelled")),
            created = translator.create(&source, &target, monitor) => created.map_err(wrap)?,
        };

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(HearthError::cancelled("translation cancelled")),
            translated = translation.translate(text) => translated.map_err(wrap),
        };
        if let Err(e) = translation.destroy() {
            tracing::warn!(error = %e, "translator teardown failed");
        }

        let translated_text = result?;
        tracing::debug!(source, target, downloaded, "translated text");
        Ok(TranslationOutcome {
            source_language: source,
            target_language: target,
            translated_text,
            same_language: false,
            downloaded,
        })
    }
}

fn wrap(error: HearthError) -> HearthError {
    match error {
        e @ (HearthError::Cancelled(_) | HearthError::EngineUnavailable(_)) => e,
        other => HearthError::Translation(other.message()),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::engine::scripted::{ScriptedDetector, ScriptedFault, ScriptedTranslator};
    use crate::progress::ProgressEvent;
    use std::sync::Mutex;

    fn pipeline(
        detector: ScriptedDetector,
        translator: &Arc<ScriptedTranslator>,
    ) -> TranslationPipeline {
        TranslationPipeline::new(
            Some(Arc::new(detector)),
            Some(translator.clone()),
            TranslationConfig::default(),
        )
    }

    #[tokio::test]
    async fn same_language_short_circuits() {
        let translator = Arc::new(ScriptedTranslator::new(TranslatorAvailability::Available));
        let outcome = pipeline(ScriptedDetector::detecting("en-US", 0.9), &translator)
            .translate("Hello there", "EN", None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.same_language);
        assert_eq!(outcome.translated_text, "Hello there");
        assert_eq!(translator.total_calls(), 0);
    }

    #[tokio::test]
    async fn translates_and_releases_translator() {
        let translator = Arc::new(ScriptedTranslator::new(TranslatorAvailability::Available));
        let outcome = pipeline(ScriptedDetector::detecting("es", 0.95), &translator)
            .translate("Hola", "en", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.translated_text, "[es->en] Hola");
        assert_eq!(outcome.source_language, "es");
        assert!(!outcome.downloaded);
        assert_eq!(translator.translate_calls(), 1);
        assert_eq!(translator.destroyed(), 1);
    }

    #[tokio::test]
    async fn download_progress_is_reported() {
        let translator = Arc::new(ScriptedTranslator::new(TranslatorAvailability::Downloadable));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: ProgressCallback = Arc::new(move |e| sink.lock().unwrap().push(e));

        let outcome = pipeline(ScriptedDetector::detecting("ja", 0.8), &translator)
            .translate("こんにちは", "en", Some(callback), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.downloaded);
        let events = events.lock().unwrap();
        assert!(matches!(
            events.first(),
            Some(ProgressEvent::DownloadStarted {
                target: DownloadTarget::Translator { .. }
            })
        ));
        assert!(matches!(events.last(), Some(ProgressEvent::DownloadComplete { .. })));
    }

    #[tokio::test]
    async fn low_confidence_or_failed_detection_uses_default() {
        let translator = Arc::new(ScriptedTranslator::new(TranslatorAvailability::Available));
        let outcome = pipeline(ScriptedDetector::detecting("fr", 0.1), &translator)
            .translate("Bonjour", "en", None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.same_language);

        let failing = pipeline(
            ScriptedDetector::failing(ScriptedFault::Transient("no model".into())),
            &translator,
        );
        assert_eq!(failing.detect_source("anything").await, "en");
    }

    #[tokio::test]
    async fn unsupported_pair_is_translation_error() {
        let translator = Arc::new(ScriptedTranslator::new(TranslatorAvailability::Unavailable));
        let err = pipeline(ScriptedDetector::detecting("de", 0.9), &translator)
            .translate("Hallo", "en", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HearthError::Translation(_)));
    }

    #[tokio::test]
    async fn translate_failure_still_destroys_translator() {
        let translator = Arc::new(ScriptedTranslator::new(TranslatorAvailability::Available));
        translator.fail_translate(Some(ScriptedFault::Transient("oops".into())));
        let err = pipeline(ScriptedDetector::detecting("de", 0.9), &translator)
            .translate("Hallo", "en", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HearthError::Translation(_)));
        assert_eq!(translator.destroyed(), 1);
    }

    #[tokio::test]
    async fn missing_translator_is_engine_unavailable() {
        let pipeline = TranslationPipeline::new(
            Some(Arc::new(ScriptedDetector::detecting("de", 0.9))),
            None,
            TranslationConfig::default(),
        );
        let err = pipeline
            .translate("Hallo", "en", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HearthError::EngineUnavailable(_)));
    }
}
