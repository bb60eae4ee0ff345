//! Engine availability, model download, priming and warmup.
//!
//! The tracker caches the last typed status in memory. The cache only
//! changes on a forced check or after this tracker drives a download; there
//! is no time-based expiry. Every live check is also written to the
//! diagnostics record.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::diagnostics::{DiagnosticsPatch, DiagnosticsStore, WarmupStatus};
use crate::engine::{destroy_quietly, EngineAvailability, LanguageEngine, SessionOptions};
use crate::error::{HearthError, Result};
use crate::progress::{monitor_for, DownloadTarget, ProgressCallback};

/// Typed availability of the language model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AvailabilityStatus {
    /// Not checked yet, or the last check failed.
    Unknown,
    /// No engine on this host.
    Unsupported,
    /// The model has to be downloaded first.
    NeedsDownload,
    /// The model is downloading.
    Downloading,
    /// Sessions can be created.
    Ready,
}

impl From<EngineAvailability> for AvailabilityStatus {
    fn from(raw: EngineAvailability) -> Self {
        match raw {
            EngineAvailability::Unavailable => Self::Unsupported,
            EngineAvailability::Downloadable => Self::NeedsDownload,
            EngineAvailability::Downloading => Self::Downloading,
            EngineAvailability::Available => Self::Ready,
        }
    }
}

impl std::fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Unsupported => "unsupported",
            Self::NeedsDownload => "needs-download",
            Self::Downloading => "downloading",
            Self::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// A status with the time it was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySnapshot {
    /// Observed status.
    pub status: AvailabilityStatus,
    /// When it was observed.
    pub checked_at: DateTime<Utc>,
}

/// Result of [`AvailabilityTracker::ensure_downloaded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOutcome {
    /// Status after the call.
    pub status: AvailabilityStatus,
    /// Whether this call drove a download.
    pub downloaded: bool,
}

/// Result of [`AvailabilityTracker::warm_up`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupReport {
    /// Recorded outcome.
    pub status: WarmupStatus,
    /// Availability after the warmup.
    pub availability: AvailabilityStatus,
    /// Error text for failed warmups.
    pub error: Option<String>,
}

/// Tracks availability and drives downloads for one engine.
pub struct AvailabilityTracker {
    engine: Option<Arc<dyn LanguageEngine>>,
    diagnostics: Arc<DiagnosticsStore>,
    clock: Arc<dyn Clock>,
    prime_ttl: chrono::Duration,
    cached: Mutex<Option<AvailabilitySnapshot>>,
}

impl AvailabilityTracker {
    /// Create a tracker. `engine` is `None` when the host has no model.
    pub fn new(
        engine: Option<Arc<dyn LanguageEngine>>,
        diagnostics: Arc<DiagnosticsStore>,
        clock: Arc<dyn Clock>,
        prime_ttl: chrono::Duration,
    ) -> Self {
        Self {
            engine,
            diagnostics,
            clock,
            prime_ttl,
            cached: Mutex::new(None),
        }
    }

    /// The cached snapshot, without querying.
    pub fn cached(&self) -> Option<AvailabilitySnapshot> {
        *self.cached.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current availability.
    ///
    /// Returns the cached snapshot unless `force` is set or nothing is
    /// cached. A failed engine query yields `Unknown` and leaves the cache
    /// alone.
    pub async fn check_availability(&self, force: bool) -> AvailabilitySnapshot {
        if !force {
            if let Some(snapshot) = self.cached() {
                return snapshot;
            }
        }

        let status = match &self.engine {
            None => AvailabilityStatus::Unsupported,
            Some(engine) => match engine.availability().await {
                Ok(raw) => AvailabilityStatus::from(raw),
                Err(HearthError::EngineUnavailable(reason)) => {
                    tracing::debug!(reason, "engine reports no model capability");
                    AvailabilityStatus::Unsupported
                }
                Err(e) => {
                    tracing::warn!(error = %e, "availability query failed");
                    return AvailabilitySnapshot {
                        status: AvailabilityStatus::Unknown,
                        checked_at: self.clock.now(),
                    };
                }
            },
        };
        self.store(status).await
    }

    async fn store(&self, status: AvailabilityStatus) -> AvailabilitySnapshot {
        let snapshot = AvailabilitySnapshot {
            status,
            checked_at: self.clock.now(),
        };
        let previous = self
            .cached
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(snapshot);
        if previous.map(|p| p.status) != Some(status) {
            tracing::info!(%status, "language model availability changed");
        }
        if let Err(e) = self
            .diagnostics
            .patch(DiagnosticsPatch::availability(status, snapshot.checked_at))
            .await
        {
            tracing::warn!(error = %e, "cannot record availability");
        }
        snapshot
    }

    /// Download the model if it is not ready yet.
    ///
    /// A no-op returning `{status, downloaded: false}` unless the status is
    /// `NeedsDownload` or `Downloading`. Otherwise a minimal session is
    /// created with a progress monitor attached, and torn down as soon as
    /// creation returns.
    ///
    /// # Errors
    ///
    /// Whatever session creation fails with.
    pub async fn ensure_downloaded(
        &self,
        on_progress: Option<ProgressCallback>,
    ) -> Result<DownloadOutcome> {
        let current = self.check_availability(false).await.status;
        if !matches!(
            current,
            AvailabilityStatus::NeedsDownload | AvailabilityStatus::Downloading
        ) {
            return Ok(DownloadOutcome {
                status: current,
                downloaded: false,
            });
        }
        let Some(engine) = &self.engine else {
            return Ok(DownloadOutcome {
                status: AvailabilityStatus::Unsupported,
                downloaded: false,
            });
        };

        self.store(AvailabilityStatus::Downloading).await;
        tracing::info!("downloading language model");

        let mut options = SessionOptions::minimal();
        if let Some(callback) = on_progress {
            options = options.monitor(monitor_for(DownloadTarget::LanguageModel, callback));
        }

        match engine.create_session(options).await {
            Ok(session) => {
                destroy_quietly(session.as_ref(), "model download");
                let snapshot = self.check_availability(true).await;
                Ok(DownloadOutcome {
                    status: snapshot.status,
                    downloaded: true,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "model download did not complete");
                self.check_availability(true).await;
                Err(e)
            }
        }
    }

    /// Create and drop a throwaway session to cut first-token latency.
    ///
    /// Runs only when the model is ready and the last successful warmup is
    /// older than the priming TTL. Returns whether priming ran.
    ///
    /// # Errors
    ///
    /// Whatever session creation fails with.
    pub async fn prime(&self) -> Result<bool> {
        let status = self.check_availability(false).await.status;
        if status != AvailabilityStatus::Ready {
            tracing::debug!(%status, "skipping prime");
            return Ok(false);
        }

        let record = self.diagnostics.snapshot().await;
        let now = self.clock.now();
        if record.last_warmup_status == Some(WarmupStatus::Success) {
            if let Some(last) = record.last_warmup_at {
                if now - last < self.prime_ttl {
                    return Ok(false);
                }
            }
        }

        self.run_throwaway_session().await?;
        self.record_warmup(WarmupStatus::Success, None).await;
        tracing::debug!("primed language model");
        Ok(true)
    }

    /// User-triggered warmup: download if needed, then prime regardless of
    /// the TTL. The outcome is recorded in diagnostics.
    pub async fn warm_up(&self, on_progress: Option<ProgressCallback>) -> WarmupReport {
        let report = self.warm_up_inner(on_progress).await;
        self.record_warmup(report.status, report.error.clone()).await;
        tracing::info!(status = %report.status, availability = %report.availability, "warmup finished");
        report
    }

    async fn warm_up_inner(&self, on_progress: Option<ProgressCallback>) -> WarmupReport {
        let status = self.check_availability(true).await.status;
        match status {
            AvailabilityStatus::Unsupported => {
                return WarmupReport {
                    status: WarmupStatus::Unavailable,
                    availability: status,
                    error: None,
                };
            }
            AvailabilityStatus::Unknown => {
                return WarmupReport {
                    status: WarmupStatus::Error,
                    availability: status,
                    error: Some("availability could not be determined".to_owned()),
                };
            }
            _ => {}
        }

        let outcome = match self.ensure_downloaded(on_progress).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let availability = self
                    .cached()
                    .map_or(AvailabilityStatus::Unknown, |s| s.status);
                let status = if matches!(
                    availability,
                    AvailabilityStatus::NeedsDownload | AvailabilityStatus::Downloading
                ) {
                    WarmupStatus::AwaitingDownload
                } else {
                    WarmupStatus::Error
                };
                return WarmupReport {
                    status,
                    availability,
                    error: Some(e.to_string()),
                };
            }
        };

        if outcome.status != AvailabilityStatus::Ready {
            return WarmupReport {
                status: WarmupStatus::AwaitingDownload,
                availability: outcome.status,
                error: None,
            };
        }

        match self.run_throwaway_session().await {
            Ok(()) => WarmupReport {
                status: WarmupStatus::Success,
                availability: AvailabilityStatus::Ready,
                error: None,
            },
            Err(e) => WarmupReport {
                status: WarmupStatus::Error,
                availability: AvailabilityStatus::Ready,
                error: Some(e.to_string()),
            },
        }
    }

    async fn run_throwaway_session(&self) -> Result<()> {
        let engine = self.engine.as_ref().ok_or_else(|| {
            HearthError::EngineUnavailable("no language model capability in this host".to_owned())
        })?;
        let session = engine.create_session(SessionOptions::minimal()).await?;
        destroy_quietly(session.as_ref(), "prime");
        Ok(())
    }

    async fn record_warmup(&self, status: WarmupStatus, error: Option<String>) {
        let patch = DiagnosticsPatch::warmup(status, self.clock.now(), error);
        if let Err(e) = self.diagnostics.patch(patch).await {
            tracing::warn!(error = %e, "cannot record warmup outcome");
        }
    }
}

impl std::fmt::Debug for AvailabilityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailabilityTracker")
            .field("engine", &self.engine.as_ref().map(|e| e.name().to_owned()))
            .field("cached", &self.cached())
            .finish_non_exhaustive()
    }
}
