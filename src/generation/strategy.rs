//! The execution-strategy seam shared by the primary and fallback paths.

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::GenerationEvent;
use super::prompt::compose_prompt;
use crate::attachments::PreparedAttachment;
use crate::engine::PromptInput;
use crate::error::Result;
use crate::types::{ConversationId, GenerationRequest, SamplingConfig};

/// A request after attachment preparation and prompt composition.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    /// Generation id, for logs.
    pub id: Uuid,
    /// Owning conversation.
    pub conversation: ConversationId,
    /// Session sampling.
    pub sampling: SamplingConfig,
    /// Composed prompt text.
    pub prompt: String,
    /// Prepared attachments; images are sent as pixels, text is already
    /// part of `prompt`.
    pub attachments: Vec<PreparedAttachment>,
}

impl GenerationJob {
    /// Build a job from `request` and its prepared attachments.
    pub fn new(
        id: Uuid,
        request: &GenerationRequest,
        attachments: Vec<PreparedAttachment>,
        max_context_chars: usize,
    ) -> Self {
        let prompt = compose_prompt(
            request.prompt(),
            request.context(),
            &attachments,
            max_context_chars,
        );
        Self {
            id,
            conversation: request.conversation_id().clone(),
            sampling: request.sampling().clone(),
            prompt,
            attachments,
        }
    }

    /// Engine input for this job.
    pub fn prompt_input(&self) -> PromptInput {
        PromptInput {
            text: self.prompt.clone(),
            images: self
                .attachments
                .iter()
                .filter_map(|a| match a {
                    PreparedAttachment::Image { pixels, .. } => Some(pixels.clone()),
                    PreparedAttachment::Text { .. } => None,
                })
                .collect(),
        }
    }
}

/// Where intermediate text goes.
///
/// Nothing is delivered once the generation's token is cancelled or the
/// sink is closed.
#[derive(Debug)]
pub struct ChunkSink {
    events: UnboundedSender<GenerationEvent>,
    cancel: CancellationToken,
    closed: bool,
    delivered: usize,
}

impl ChunkSink {
    /// A sink sending on `events` until `cancel` fires.
    pub fn new(events: UnboundedSender<GenerationEvent>, cancel: CancellationToken) -> Self {
        Self {
            events,
            cancel,
            closed: false,
            delivered: 0,
        }
    }

    /// Send `text` as the latest full text. Returns whether it was sent.
    pub fn deliver(&mut self, text: String) -> bool {
        if self.closed || self.cancel.is_cancelled() {
            return false;
        }
        let sent = self.events.send(GenerationEvent::Chunk { text }).is_ok();
        if sent {
            self.delivered += 1;
        }
        sent
    }

    /// Refuse all further chunks.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Chunks delivered so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }
}

/// One way of running a generation.
#[async_trait]
pub trait GenerationStrategy: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &'static str;

    /// Run `job` to completion and return the full text.
    ///
    /// Must return `Cancelled` promptly once `cancel` fires.
    async fn run(
        &self,
        job: &GenerationJob,
        sink: &mut ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::attachments::PixelBuffer;

    #[test]
    fn prompt_input_carries_only_images() {
        let request = GenerationRequest::builder(ConversationId::new("c").unwrap(), "Describe")
            .build();
        let job = GenerationJob::new(
            Uuid::new_v4(),
            &request,
            vec![
                PreparedAttachment::Image {
                    mime: "image/png".into(),
                    pixels: PixelBuffer {
                        width: 1,
                        height: 1,
                        rgba: vec![0, 0, 0, 255],
                    },
                },
                PreparedAttachment::Text {
                    mime: "text/plain".into(),
                    name: None,
                    text: "notes".into(),
                },
            ],
            1000,
        );
        let input = job.prompt_input();
        assert_eq!(input.images.len(), 1);
        assert!(input.text.contains("notes"));
        assert!(input.text.ends_with("Describe"));
    }

    #[tokio::test]
    async fn sink_stops_after_cancel_or_close() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut sink = ChunkSink::new(tx.clone(), cancel.clone());
        assert!(sink.deliver("a".into()));
        sink.close();
        assert!(!sink.deliver("b".into()));

        let mut second = ChunkSink::new(tx, cancel.clone());
        cancel.cancel();
        assert!(!second.deliver("c".into()));

        assert!(matches!(rx.recv().await, Some(GenerationEvent::Chunk { text }) if text == "a"));
        assert_eq!(sink.delivered(), 1);
    }
}
