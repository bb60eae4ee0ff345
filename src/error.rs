//! Error types for the hearth session controller.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! included in the Display output and accessible via [`HearthError::code()`].
//! Codes are part of the public API contract and will not change.

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// No language model capability is present in the host.
    pub const ENGINE_UNAVAILABLE: &str = "ENGINE_UNAVAILABLE";

    /// The operation was cancelled or superseded.
    pub const CANCELLED: &str = "CANCELLED";

    /// The caller's execution context forbids the operation.
    pub const RESTRICTED_CONTEXT: &str = "RESTRICTED_CONTEXT";

    /// The primary engine path failed for a recoverable reason.
    pub const TRANSIENT_ENGINE_FAULT: &str = "TRANSIENT_ENGINE_FAULT";

    /// The fallback execution path failed too.
    pub const FALLBACK_FAILED: &str = "FALLBACK_FAILED";

    /// An image attachment could not be decoded.
    pub const IMAGE_DECODE: &str = "IMAGE_DECODE";

    /// An attachment could not cross the fallback boundary.
    pub const ATTACHMENT_SERIALIZATION: &str = "ATTACHMENT_SERIALIZATION";

    /// Sampling or controller configuration is outside the accepted domain.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// Conversation id was empty.
    pub const INVALID_CONVERSATION_ID: &str = "INVALID_CONVERSATION_ID";

    /// A network-bound fetch exceeded its time bound.
    pub const TIMEOUT: &str = "TIMEOUT";

    /// A remote attachment fetch failed.
    pub const FETCH_FAILED: &str = "FETCH_FAILED";

    /// Translation pipeline failure.
    pub const TRANSLATION_FAILED: &str = "TRANSLATION_FAILED";

    /// Speech synthesis failure.
    pub const SPEECH_FAILED: &str = "SPEECH_FAILED";

    /// Diagnostics or config persistence failure.
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";

    /// Filesystem I/O failure.
    pub const IO_ERROR: &str = "IO_ERROR";
}

/// Errors produced by the session controller.
///
/// The Display impl formats as `[CODE] message`. Use
/// [`user_message`](Self::user_message) for text shown to end users.
#[derive(Debug, thiserror::Error)]
pub enum HearthError {
    /// No language model capability object is present.
    #[error("[{}] {}", error_codes::ENGINE_UNAVAILABLE, .0)]
    EngineUnavailable(String),

    /// Superseded by a newer generation or stopped by the user.
    #[error("[{}] {}", error_codes::CANCELLED, .0)]
    Cancelled(String),

    /// The active page or context forbids on-device inference.
    #[error("[{}] {}", error_codes::RESTRICTED_CONTEXT, .0)]
    RestrictedContext(String),

    /// The primary path failed; the fallback executor may recover.
    #[error("[{}] {}", error_codes::TRANSIENT_ENGINE_FAULT, .0)]
    TransientEngineFault(String),

    /// The fallback path failed. Terminal.
    #[error("[{}] {}", error_codes::FALLBACK_FAILED, .0)]
    FallbackFailure(String),

    /// Corrupt or unsupported image attachment.
    #[error("[{}] {}", error_codes::IMAGE_DECODE, .0)]
    ImageDecode(String),

    /// Attachment transport encoding or decoding failed.
    #[error("[{}] {}", error_codes::ATTACHMENT_SERIALIZATION, .0)]
    AttachmentSerialization(String),

    /// Configuration outside the accepted value domain.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    ConfigValidation(String),

    /// Empty or blank conversation id.
    #[error("[{}] {}", error_codes::INVALID_CONVERSATION_ID, .0)]
    InvalidConversationId(String),

    /// Network fetch exceeded its bound.
    #[error("[{}] {}", error_codes::TIMEOUT, .0)]
    Timeout(String),

    /// Remote attachment fetch failed.
    #[error("[{}] {}", error_codes::FETCH_FAILED, .0)]
    Fetch(String),

    /// Translation pipeline failure.
    #[error("[{}] {}", error_codes::TRANSLATION_FAILED, .0)]
    Translation(String),

    /// Speech synthesis failure.
    #[error("[{}] {}", error_codes::SPEECH_FAILED, .0)]
    Speech(String),

    /// Persistence failure.
    #[error("[{}] {}", error_codes::STORAGE_ERROR, .0)]
    Storage(String),

    /// I/O error.
    #[error("[{}] {}", error_codes::IO_ERROR, .0)]
    Io(#[from] std::io::Error),
}

impl HearthError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EngineUnavailable(_) => error_codes::ENGINE_UNAVAILABLE,
            Self::Cancelled(_) => error_codes::CANCELLED,
            Self::RestrictedContext(_) => error_codes::RESTRICTED_CONTEXT,
            Self::TransientEngineFault(_) => error_codes::TRANSIENT_ENGINE_FAULT,
            Self::FallbackFailure(_) => error_codes::FALLBACK_FAILED,
            Self::ImageDecode(_) => error_codes::IMAGE_DECODE,
            Self::AttachmentSerialization(_) => error_codes::ATTACHMENT_SERIALIZATION,
            Self::ConfigValidation(_) => error_codes::CONFIG_INVALID,
            Self::InvalidConversationId(_) => error_codes::INVALID_CONVERSATION_ID,
            Self::Timeout(_) => error_codes::TIMEOUT,
            Self::Fetch(_) => error_codes::FETCH_FAILED,
            Self::Translation(_) => error_codes::TRANSLATION_FAILED,
            Self::Speech(_) => error_codes::SPEECH_FAILED,
            Self::Storage(_) => error_codes::STORAGE_ERROR,
            Self::Io(_) => error_codes::IO_ERROR,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> String {
        match self {
            Self::EngineUnavailable(m)
            | Self::Cancelled(m)
            | Self::RestrictedContext(m)
            | Self::TransientEngineFault(m)
            | Self::FallbackFailure(m)
            | Self::ImageDecode(m)
            | Self::AttachmentSerialization(m)
            | Self::ConfigValidation(m)
            | Self::InvalidConversationId(m)
            | Self::Timeout(m)
            | Self::Fetch(m)
            | Self::Translation(m)
            | Self::Speech(m)
            | Self::Storage(m) => m.clone(),
            Self::Io(e) => e.to_string(),
        }
    }

    /// Shorthand for a cancellation with a reason.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Returns true for user- or system-initiated cancellation.
    ///
    /// Cancellation is never surfaced as an error; callers show a neutral
    /// "stopped" state instead.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if the fallback executor should be tried.
    ///
    /// Only transient engine faults qualify. Cancellation, restricted
    /// contexts, validation failures and a missing engine are terminal.
    pub fn triggers_fallback(&self) -> bool {
        matches!(self, Self::TransientEngineFault(_))
    }

    /// Human-readable text suitable for display.
    ///
    /// Never includes the raw engine error string.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::EngineUnavailable(_) => {
                "The on-device model is not available. Check that it is installed and downloaded."
            }
            Self::Cancelled(_) => "Stopped.",
            Self::RestrictedContext(_) => "The assistant can't run on this page.",
            Self::TransientEngineFault(_) | Self::FallbackFailure(_) => {
                "The model couldn't finish a response. Please try again."
            }
            Self::ImageDecode(_) => "One of the attached images couldn't be read.",
            Self::AttachmentSerialization(_) => "An attachment couldn't be prepared for the model.",
            Self::ConfigValidation(_) => "The model settings are out of range.",
            Self::InvalidConversationId(_) => "No conversation is selected.",
            Self::Timeout(_) => "Fetching an attachment took too long.",
            Self::Fetch(_) => "An attachment couldn't be downloaded.",
            Self::Translation(_) => "Translation failed.",
            Self::Speech(_) => "Reading aloud failed.",
            Self::Storage(_) | Self::Io(_) => "Saving local state failed.",
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, HearthError>;
