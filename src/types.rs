//! Core request types shared by the controller, the pool and the fallback
//! boundary.

use serde::{Deserialize, Serialize};

use crate::error::{HearthError, Result};

/// Identifier of one logical conversation.
///
/// Never empty: construction trims and rejects blank input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    /// Create an id, failing with [`HearthError::InvalidConversationId`] on
    /// empty or whitespace-only input.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(HearthError::InvalidConversationId(
                "conversation id must not be empty".to_owned(),
            ));
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ConversationId {
    type Error = HearthError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ConversationId> for String {
    fn from(value: ConversationId) -> Self {
        value.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output format the model is asked to produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Plain prose.
    #[default]
    PlainText,
    /// Markdown-formatted text.
    Markdown,
    /// A single JSON document.
    Json,
}

/// Accepted value domain for sampling parameters, reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineParams {
    /// Temperature used when the caller has no preference.
    pub default_temperature: f32,
    /// Largest accepted temperature.
    pub max_temperature: f32,
    /// Top-k used when the caller has no preference.
    pub default_top_k: u32,
    /// Largest accepted top-k.
    pub max_top_k: u32,
    /// BCP-47 primary subtags the engine accepts as expected languages.
    pub supported_languages: Vec<String>,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            default_temperature: 1.0,
            max_temperature: 2.0,
            default_top_k: 3,
            max_top_k: 128,
            supported_languages: vec!["en".to_owned(), "es".to_owned(), "ja".to_owned()],
        }
    }
}

/// Sampling configuration for one session.
///
/// Derived from user settings and validated against [`EngineParams`] before
/// any session is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Sampling temperature.
    pub temperature: f32,
    /// Top-k sampling cutoff.
    pub top_k: u32,
    /// System prompt installed when the session is created.
    pub system_prompt: Option<String>,
    /// Expected output language (primary subtag, e.g. `"en"`).
    pub expected_language: Option<String>,
    /// Expected output format.
    pub output_format: OutputFormat,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_k: 3,
            system_prompt: None,
            expected_language: Some("en".to_owned()),
            output_format: OutputFormat::PlainText,
        }
    }
}

impl SamplingConfig {
    /// Defaults with the engine's preferred temperature and top-k.
    pub fn for_engine(params: &EngineParams) -> Self {
        Self {
            temperature: params.default_temperature,
            top_k: params.default_top_k,
            ..Self::default()
        }
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set top-k.
    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the expected output language.
    pub fn with_expected_language(mut self, language: impl Into<String>) -> Self {
        self.expected_language = Some(language.into());
        self
    }

    /// Set the expected output format.
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Check every field against the engine's accepted domain.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::ConfigValidation`] naming the first offending
    /// field.
    pub fn validate(&self, params: &EngineParams) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(HearthError::ConfigValidation(format!(
                "temperature must be a non-negative number, got {}",
                self.temperature
            )));
        }
        if self.temperature > params.max_temperature {
            return Err(HearthError::ConfigValidation(format!(
                "temperature {} exceeds engine maximum {}",
                self.temperature, params.max_temperature
            )));
        }
        if self.top_k == 0 || self.top_k > params.max_top_k {
            return Err(HearthError::ConfigValidation(format!(
                "top_k must be within 1..={}, got {}",
                params.max_top_k, self.top_k
            )));
        }
        if let Some(language) = &self.expected_language {
            let primary = primary_subtag(language);
            if !params
                .supported_languages
                .iter()
                .any(|l| l.eq_ignore_ascii_case(&primary))
            {
                return Err(HearthError::ConfigValidation(format!(
                    "expected language {language:?} is not supported (supported: {})",
                    params.supported_languages.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Lowercased primary subtag of a BCP-47 tag (`"en-US"` -> `"en"`).
pub fn primary_subtag(tag: &str) -> String {
    tag.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// A request attachment.
///
/// Binary image data cannot cross the fallback boundary as-is and is
/// transport-encoded there; text passes through unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    /// Raw encoded image bytes (PNG, JPEG).
    Image {
        /// MIME type, e.g. `"image/png"`.
        mime: String,
        /// Encoded image bytes.
        bytes: Vec<u8>,
    },
    /// Pre-extracted text (e.g. from a PDF).
    Text {
        /// MIME type of the source document, e.g. `"application/pdf"`.
        mime: String,
        /// Display name of the source document.
        name: Option<String>,
        /// Extracted text.
        text: String,
    },
    /// An image fetched over the network before use.
    RemoteImage {
        /// Absolute URL of the image.
        url: String,
    },
}

impl Attachment {
    /// Construct an image attachment.
    pub fn image(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::Image {
            mime: mime.into(),
            bytes,
        }
    }

    /// Construct a text attachment.
    pub fn text(mime: impl Into<String>, name: Option<String>, text: impl Into<String>) -> Self {
        Self::Text {
            mime: mime.into(),
            name,
            text: text.into(),
        }
    }

    /// Returns true for attachments carrying raw binary data.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Image { .. })
    }
}

/// One generation request. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    conversation_id: ConversationId,
    prompt: String,
    context: Option<String>,
    attachments: Vec<Attachment>,
    sampling: SamplingConfig,
    origin: Option<String>,
}

impl GenerationRequest {
    /// Start building a request for `conversation_id`.
    pub fn builder(conversation_id: ConversationId, prompt: impl Into<String>) -> GenerationRequestBuilder {
        GenerationRequestBuilder {
            request: Self {
                conversation_id,
                prompt: prompt.into(),
                context: None,
                attachments: Vec::new(),
                sampling: SamplingConfig::default(),
                origin: None,
            },
        }
    }

    /// Conversation this request belongs to.
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// The user's prompt.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Surrounding context (e.g. page text), if any.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Attachments in the order given.
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Sampling configuration.
    pub fn sampling(&self) -> &SamplingConfig {
        &self.sampling
    }

    /// Origin of the page the request was made from, if known.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }
}

/// Builder for [`GenerationRequest`].
#[derive(Debug, Clone)]
pub struct GenerationRequestBuilder {
    request: GenerationRequest,
}

impl GenerationRequestBuilder {
    /// Attach context text.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.request.context = Some(context.into());
        self
    }

    /// Add an attachment.
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.request.attachments.push(attachment);
        self
    }

    /// Use `sampling` instead of the defaults.
    pub fn sampling(mut self, sampling: SamplingConfig) -> Self {
        self.request.sampling = sampling;
        self
    }

    /// Record the origin of the active page.
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.request.origin = Some(origin.into());
        self
    }

    /// Finish building.
    pub fn build(self) -> GenerationRequest {
        self.request
    }
}
