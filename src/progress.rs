//! Progress event types for model and translator downloads.
//!
//! Provides callback-based progress reporting that decouples the download
//! monitor registered with the engine from whatever the host renders.

use std::sync::Arc;

/// What is being downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadTarget {
    /// The language model behind the prompt engine.
    LanguageModel,
    /// A translation model for a language pair.
    Translator {
        /// Source language primary subtag.
        source: String,
        /// Target language primary subtag.
        target: String,
    },
}

/// Progress events emitted while a model is fetched by the host engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A download has started.
    DownloadStarted {
        /// What is being downloaded.
        target: DownloadTarget,
    },

    /// Download progress update.
    DownloadProgress {
        /// What is being downloaded.
        target: DownloadTarget,
        /// Bytes (or engine units) loaded so far.
        loaded: u64,
        /// Total expected, as reported by the engine.
        total: u64,
    },

    /// The download finished.
    DownloadComplete {
        /// What was downloaded.
        target: DownloadTarget,
    },
}

impl ProgressEvent {
    /// Fraction complete in `[0, 1]`, for progress events with a known total.
    pub fn fraction(&self) -> Option<f64> {
        match self {
            Self::DownloadProgress { loaded, total, .. } if *total > 0 => {
                Some((*loaded as f64 / *total as f64).clamp(0.0, 1.0))
            }
            Self::DownloadComplete { .. } => Some(1.0),
            _ => None,
        }
    }
}

/// Callback type for receiving progress events.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Engine-facing download monitor: receives raw `(loaded, total)` pairs.
pub type DownloadMonitor = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Adapt a [`ProgressCallback`] into a [`DownloadMonitor`] for `target`.
///
/// A `DownloadStarted` event is emitted on the first report and a
/// `DownloadComplete` once `loaded` reaches `total`.
pub fn monitor_for(target: DownloadTarget, callback: ProgressCallback) -> DownloadMonitor {
    let started = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let completed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    Arc::new(move |loaded, total| {
        use std::sync::atomic::Ordering;
        if !started.swap(true, Ordering::AcqRel) {
            callback(ProgressEvent::DownloadStarted {
                target: target.clone(),
            });
        }
        callback(ProgressEvent::DownloadProgress {
            target: target.clone(),
            loaded,
            total,
        });
        if total > 0 && loaded >= total && !completed.swap(true, Ordering::AcqRel) {
            callback(ProgressEvent::DownloadComplete {
                target: target.clone(),
            });
        }
    })
}
