//! Text-to-speech wrapper.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::SpeechConfig;
use crate::engine::{SpeechSynthesizer, Utterance};
use crate::error::{HearthError, Result};

/// What to speak and how.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeechRequest {
    /// Text to speak.
    pub text: String,
    /// BCP-47 language tag.
    pub language: Option<String>,
    /// Rate override, `0.1..=10.0`.
    pub rate: Option<f32>,
    /// Pitch override, `0.0..=2.0`.
    pub pitch: Option<f32>,
    /// Preferred voice name.
    pub voice: Option<String>,
}

impl SpeechRequest {
    /// Speak `text` with default settings.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Set the language.
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// How speaking ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// Played to the end.
    Finished,
    /// Stopped with an expected code such as `"interrupted"`.
    Interrupted {
        /// Synthesizer code.
        code: String,
    },
}

/// Speaks through the platform synthesizer.
pub struct Speaker {
    synth: Option<Arc<dyn SpeechSynthesizer>>,
    config: SpeechConfig,
}

impl Speaker {
    /// A speaker on `synth`.
    pub fn new(synth: Option<Arc<dyn SpeechSynthesizer>>, config: SpeechConfig) -> Self {
        Self { synth, config }
    }

    /// Speak `request` until it ends or `cancel` fires.
    ///
    /// Errors whose code is listed as expected (user interruption and the
    /// like) end as [`SpeechOutcome::Interrupted`], not as failures.
    ///
    /// # Errors
    ///
    /// `EngineUnavailable` without a synthesizer, `ConfigValidation` for
    /// out-of-range rate or pitch, `Speech` for any other synthesizer error.
    pub async fn speak(
        &self,
        request: SpeechRequest,
        cancel: &CancellationToken,
    ) -> Result<SpeechOutcome> {
        let synth = self.synth.as_ref().ok_or_else(|| {
            HearthError::EngineUnavailable("no speech capability in this host".to_owned())
        })?;

        let rate = request.rate.unwrap_or(self.config.rate);
        let pitch = request.pitch.unwrap_or(self.config.pitch);
        if !(0.1..=10.0).contains(&rate) {
            return Err(HearthError::ConfigValidation(format!(
                "speech rate must be within 0.1..=10, got {rate}"
            )));
        }
        if !(0.0..=2.0).contains(&pitch) {
            return Err(HearthError::ConfigValidation(format!(
                "speech pitch must be within 0..=2, got {pitch}"
            )));
        }
        if request.text.trim().is_empty() {
            return Ok(SpeechOutcome::Finished);
        }

        let utterance = Utterance {
            text: request.text,
            language: request.language,
            rate,
            pitch,
            voice: request.voice,
        };
        let speaking = synth.speak(utterance);
        tokio::pin!(speaking);
        let result = tokio::select! {
            biased;
            done = &mut speaking => done,
            () = cancel.cancelled() => {
                synth.cancel();
                speaking.await
            }
        };

        match result {
            Ok(()) => Ok(SpeechOutcome::Finished),
            Err(e) if self.is_expected(&e.code) => {
                tracing::debug!(code = %e.code, "speech ended early");
                Ok(SpeechOutcome::Interrupted { code: e.code })
            }
            Err(e) => Err(HearthError::Speech(e.to_string())),
        }
    }

    /// Stop whatever is being spoken.
    pub fn stop(&self) {
        if let Some(synth) = &self.synth {
            synth.cancel();
        }
    }

    fn is_expected(&self, code: &str) -> bool {
        self.config
            .expected_error_codes
            .iter()
            .any(|c| c.eq_ignore_ascii_case(code))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::engine::SynthesisError;
    use crate::engine::scripted::ScriptedSpeech;

    fn speaker(synth: &Arc<ScriptedSpeech>) -> Speaker {
        Speaker::new(Some(synth.clone()), SpeechConfig::default())
    }

    #[tokio::test]
    async fn plays_with_configured_defaults() {
        let synth = Arc::new(ScriptedSpeech::new());
        let outcome = speaker(&synth)
            .speak(SpeechRequest::new("Hello").language("en-GB"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, SpeechOutcome::Finished);
        let spoken = synth.spoken();
        assert_eq!(spoken[0].language.as_deref(), Some("en-GB"));
        assert!((spoken[0].rate - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn expected_codes_are_normal_completion() {
        let synth = Arc::new(ScriptedSpeech::new());
        synth.fail_with(SynthesisError::new("canceled", "user pressed stop"));
        let outcome = speaker(&synth)
            .speak(SpeechRequest::new("Hello"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SpeechOutcome::Interrupted {
                code: "canceled".into()
            }
        );
    }

    #[tokio::test]
    async fn unexpected_codes_fail() {
        let synth = Arc::new(ScriptedSpeech::new());
        synth.fail_with(SynthesisError::new("synthesis-failed", "no voice"));
        let err = speaker(&synth)
            .speak(SpeechRequest::new("Hello"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HearthError::Speech(_)));
    }

    #[tokio::test]
    async fn cancelling_interrupts_playback() {
        let synth = Arc::new(ScriptedSpeech::new());
        synth.hold_until_cancel(true);
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let outcome = speaker(&synth)
            .speak(SpeechRequest::new("A long story"), &cancel)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SpeechOutcome::Interrupted {
                code: "interrupted".into()
            }
        );
        assert_eq!(synth.cancels(), 1);
    }

    #[tokio::test]
    async fn out_of_range_rate_is_rejected() {
        let synth = Arc::new(ScriptedSpeech::new());
        let request = SpeechRequest {
            rate: Some(50.0),
            ..SpeechRequest::new("fast")
        };
        let err = speaker(&synth)
            .speak(request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HearthError::ConfigValidation(_)));
        assert!(synth.spoken().is_empty());
    }
}
