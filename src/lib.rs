//! Hearth: session controller for on-device language model inference.
//!
//! The crate sits between a host application and the local inference engine
//! the host exposes. It keeps one engine session per conversation, streams
//! generated text back at a bounded rate, allows a single generation in
//! flight per process, and retries once through a fallback boundary when the
//! primary path hits a transient fault.
//!
//! # Architecture
//!
//! - **Capabilities**: host-provided trait objects for the model, language
//!   detection, translation and speech ([`engine`])
//! - **Session pool**: one live session per conversation ([`session`])
//! - **Reconciler**: monotonic full text from delta or snapshot chunks,
//!   throttled delivery ([`reconcile`])
//! - **Controller**: single-flight generations with primary and fallback
//!   strategies ([`generation`])
//! - **Availability**: readiness cache, download, priming and warmup
//!   ([`availability`], [`diagnostics`])
//! - **Auxiliary tasks**: titles, smart replies, translation, speech
//!   ([`tasks`])

pub mod attachments;
pub mod availability;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod generation;
pub mod hearth_dirs;
pub mod logging;
pub mod progress;
pub mod reconcile;
pub mod session;
pub mod tasks;
pub mod types;

pub use availability::{AvailabilitySnapshot, AvailabilityStatus, DownloadOutcome, WarmupReport};
pub use config::HearthConfig;
pub use engine::Capabilities;
pub use error::{HearthError, Result};
pub use generation::{
    ExecutionPath, GenerationCallbacks, GenerationController, GenerationEvent, GenerationHandle,
    GenerationOutcome,
};
pub use progress::{ProgressCallback, ProgressEvent};
pub use types::{Attachment, ConversationId, GenerationRequest, SamplingConfig};
