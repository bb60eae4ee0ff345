//! Platform text-to-speech capability.

use async_trait::async_trait;

/// One utterance to speak.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Text to speak.
    pub text: String,
    /// BCP-47 language tag.
    pub language: Option<String>,
    /// Speaking rate, 1.0 is normal.
    pub rate: f32,
    /// Pitch, 1.0 is normal.
    pub pitch: f32,
    /// Preferred voice name.
    pub voice: Option<String>,
}

/// Error reported by the platform synthesizer.
///
/// `code` is the platform's error code string (e.g. `"interrupted"`,
/// `"synthesis-failed"`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct SynthesisError {
    /// Platform error code.
    pub code: String,
    /// Detail text.
    pub message: String,
}

impl SynthesisError {
    /// Build an error from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Platform text-to-speech.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak `utterance`, resolving when playback ends.
    async fn speak(&self, utterance: Utterance) -> std::result::Result<(), SynthesisError>;

    /// Stop any ongoing speech. The pending `speak` resolves with an
    /// `"interrupted"` error.
    fn cancel(&self);
}
