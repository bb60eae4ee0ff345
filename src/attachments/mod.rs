//! Attachment preprocessing.
//!
//! Images are decoded off the async runtime, scaled to a bounded width and
//! rendered into the RGBA buffers the engine accepts. Remote images are
//! fetched first. Pre-extracted text passes through untouched.

pub mod pixels;
pub mod remote;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::AttachmentConfig;
use crate::error::{HearthError, Result};
use crate::types::Attachment;

pub use pixels::resize_target;

/// An RGBA8 image in engine pixel format.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major RGBA bytes, `width * height * 4` long.
    pub rgba: Vec<u8>,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

/// An attachment ready for prompt composition.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedAttachment {
    /// A decoded, resized image.
    Image {
        /// MIME type of the source image.
        mime: String,
        /// Engine pixels.
        pixels: PixelBuffer,
    },
    /// Pre-extracted text.
    Text {
        /// MIME type of the source document.
        mime: String,
        /// Display name of the source document.
        name: Option<String>,
        /// Extracted text.
        text: String,
    },
}

/// Turns request attachments into [`PreparedAttachment`]s.
#[derive(Debug, Clone)]
pub struct AttachmentPreprocessor {
    max_width: u32,
    fetch_timeout: Duration,
    max_fetch_bytes: usize,
    client: reqwest::Client,
}

impl AttachmentPreprocessor {
    /// Build a preprocessor from configuration.
    pub fn new(config: &AttachmentConfig) -> Self {
        Self {
            max_width: config.max_image_width,
            fetch_timeout: config.fetch_timeout(),
            max_fetch_bytes: config.max_fetch_bytes,
            client: reqwest::Client::new(),
        }
    }

    /// Prepare every attachment, in order.
    ///
    /// # Errors
    ///
    /// `ImageDecode` for corrupt images, `Fetch`/`Timeout` for remote images
    /// that cannot be retrieved, `Cancelled` if `cancel` fires first.
    pub async fn prepare(
        &self,
        attachments: &[Attachment],
        cancel: &CancellationToken,
    ) -> Result<Vec<PreparedAttachment>> {
        let mut prepared = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let item = match attachment {
                Attachment::Text { mime, name, text } => PreparedAttachment::Text {
                    mime: mime.clone(),
                    name: name.clone(),
                    text: text.clone(),
                },
                Attachment::Image { mime, bytes } => PreparedAttachment::Image {
                    mime: mime.clone(),
                    pixels: self.decode(bytes.clone(), cancel).await?,
                },
                Attachment::RemoteImage { url } => {
                    let (mime, bytes) = remote::fetch_image(
                        &self.client,
                        url,
                        self.fetch_timeout,
                        self.max_fetch_bytes,
                        cancel,
                    )
                    .await?;
                    tracing::debug!(url, mime, bytes = bytes.len(), "fetched remote image");
                    PreparedAttachment::Image {
                        mime,
                        pixels: self.decode(bytes, cancel).await?,
                    }
                }
            };
            prepared.push(item);
        }
        Ok(prepared)
    }

    async fn decode(&self, bytes: Vec<u8>, cancel: &CancellationToken) -> Result<PixelBuffer> {
        let max_width = self.max_width;
        let task = tokio::task::spawn_blocking(move || pixels::decode_to_pixels(&bytes, max_width));
        tokio::select! {
            () = cancel.cancelled() => Err(HearthError::cancelled("attachment decode cancelled")),
            joined = task => match joined {
                Ok(result) => result,
                Err(e) => Err(HearthError::ImageDecode(format!("decode task failed: {e}"))),
            },
        }
    }
}
