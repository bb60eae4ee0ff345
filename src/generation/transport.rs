//! Wire form of a job crossing the fallback boundary.
//!
//! Binary pixel data is base64-encoded; text attachments travel as-is. The
//! boundary receives a JSON string so nothing but owned, serializable data
//! crosses it.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::strategy::GenerationJob;
use crate::attachments::{PixelBuffer, PreparedAttachment};
use crate::engine::PromptInput;
use crate::error::{HearthError, Result};
use crate::types::{ConversationId, SamplingConfig};

/// A transport-safe attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportAttachment {
    /// RGBA pixels, base64-encoded.
    Image {
        /// Source MIME type.
        mime: String,
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
        /// Base64 of the RGBA bytes.
        data: String,
    },
    /// Text, unchanged.
    Text {
        /// Source MIME type.
        mime: String,
        /// Source document name.
        name: Option<String>,
        /// The text.
        text: String,
    },
}

impl TransportAttachment {
    fn encode(attachment: &PreparedAttachment) -> Self {
        match attachment {
            PreparedAttachment::Image { mime, pixels } => Self::Image {
                mime: mime.clone(),
                width: pixels.width,
                height: pixels.height,
                data: STANDARD.encode(&pixels.rgba),
            },
            PreparedAttachment::Text { mime, name, text } => Self::Text {
                mime: mime.clone(),
                name: name.clone(),
                text: text.clone(),
            },
        }
    }

    fn decode(self) -> Result<PreparedAttachment> {
        match self {
            Self::Image {
                mime,
                width,
                height,
                data,
            } => {
                let rgba = STANDARD.decode(data.as_bytes()).map_err(|e| {
                    HearthError::AttachmentSerialization(format!("invalid image payload: {e}"))
                })?;
                let expected = u64::from(width) * u64::from(height) * 4;
                if rgba.len() as u64 != expected {
                    return Err(HearthError::AttachmentSerialization(format!(
                        "image payload is {} bytes, expected {expected} for {width}x{height}",
                        rgba.len()
                    )));
                }
                Ok(PreparedAttachment::Image {
                    mime,
                    pixels: PixelBuffer {
                        width,
                        height,
                        rgba,
                    },
                })
            }
            Self::Text { mime, name, text } => Ok(PreparedAttachment::Text { mime, name, text }),
        }
    }
}

/// A job in transport form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportRequest {
    /// Owning conversation.
    pub conversation: ConversationId,
    /// Session sampling.
    pub sampling: SamplingConfig,
    /// Composed prompt text.
    pub prompt: String,
    /// Attachments in transport form.
    pub attachments: Vec<TransportAttachment>,
}

impl TransportRequest {
    /// Convert `job` into transport form.
    pub fn from_job(job: &GenerationJob) -> Self {
        Self {
            conversation: job.conversation.clone(),
            sampling: job.sampling.clone(),
            prompt: job.prompt.clone(),
            attachments: job.attachments.iter().map(TransportAttachment::encode).collect(),
        }
    }

    /// Serialize to the boundary payload.
    ///
    /// # Errors
    ///
    /// `AttachmentSerialization` if serialization fails.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            HearthError::AttachmentSerialization(format!("cannot encode fallback request: {e}"))
        })
    }

    /// Parse a boundary payload.
    ///
    /// # Errors
    ///
    /// `AttachmentSerialization` if the payload is malformed.
    pub fn decode(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| {
            HearthError::AttachmentSerialization(format!("cannot decode fallback request: {e}"))
        })
    }

    /// Rebuild the engine input, decoding images back into pixels.
    ///
    /// # Errors
    ///
    /// `AttachmentSerialization` if an image payload is corrupt.
    pub fn into_prompt_input(self) -> Result<PromptInput> {
        let mut images = Vec::new();
        for attachment in self.attachments {
            if let PreparedAttachment::Image { pixels, .. } = attachment.decode()? {
                images.push(pixels);
            }
        }
        Ok(PromptInput {
            text: self.prompt,
            images,
        })
    }
}
