//! Persisted diagnostics record.
//!
//! Holds the last-known availability and warmup outcome so a host can show
//! them across restarts. Loaded lazily on first access, merge-patched, and
//! written back after every patch (temp file then rename). Concurrent
//! processes writing the same file resolve last-writer-wins.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::availability::AvailabilityStatus;
use crate::error::{HearthError, Result};

/// Outcome of the last warmup or priming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarmupStatus {
    /// A session was created and released.
    Success,
    /// The model still needs to (finish) download.
    AwaitingDownload,
    /// Warmup failed.
    Error,
    /// No engine on this host.
    Unavailable,
}

impl std::fmt::Display for WarmupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::AwaitingDownload => "awaiting-download",
            Self::Error => "error",
            Self::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// The persisted record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiagnosticsRecord {
    /// Last availability observed.
    pub availability: Option<AvailabilityStatus>,
    /// When `availability` was observed.
    pub availability_checked_at: Option<DateTime<Utc>>,
    /// When the last warmup or priming ran.
    pub last_warmup_at: Option<DateTime<Utc>>,
    /// Its outcome.
    pub last_warmup_status: Option<WarmupStatus>,
    /// Its error message, if it failed.
    pub last_warmup_error: Option<String>,
}

/// A partial update. `None` fields leave the record untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosticsPatch {
    /// New availability.
    pub availability: Option<AvailabilityStatus>,
    /// New availability timestamp.
    pub availability_checked_at: Option<DateTime<Utc>>,
    /// New warmup timestamp.
    pub last_warmup_at: Option<DateTime<Utc>>,
    /// New warmup outcome.
    pub last_warmup_status: Option<WarmupStatus>,
    /// `Some(None)` clears the stored error.
    pub last_warmup_error: Option<Option<String>>,
}

impl DiagnosticsPatch {
    /// Record an availability observation.
    pub fn availability(status: AvailabilityStatus, at: DateTime<Utc>) -> Self {
        Self {
            availability: Some(status),
            availability_checked_at: Some(at),
            ..Self::default()
        }
    }

    /// Record a warmup outcome, replacing any previous error.
    pub fn warmup(status: WarmupStatus, at: DateTime<Utc>, error: Option<String>) -> Self {
        Self {
            last_warmup_at: Some(at),
            last_warmup_status: Some(status),
            last_warmup_error: Some(error),
            ..Self::default()
        }
    }
}

impl DiagnosticsRecord {
    /// Merge `patch` into this record.
    pub fn apply(&mut self, patch: DiagnosticsPatch) {
        if let Some(v) = patch.availability {
            self.availability = Some(v);
        }
        if let Some(v) = patch.availability_checked_at {
            self.availability_checked_at = Some(v);
        }
        if let Some(v) = patch.last_warmup_at {
            self.last_warmup_at = Some(v);
        }
        if let Some(v) = patch.last_warmup_status {
            self.last_warmup_status = Some(v);
        }
        if let Some(v) = patch.last_warmup_error {
            self.last_warmup_error = v;
        }
    }
}

/// Lazily loaded, write-through diagnostics record.
#[derive(Debug)]
pub struct DiagnosticsStore {
    path: Option<PathBuf>,
    record: Mutex<Option<DiagnosticsRecord>>,
}

impl DiagnosticsStore {
    /// A store persisted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            record: Mutex::new(None),
        }
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            record: Mutex::new(None),
        }
    }

    /// Build from an optional path; `None` is in-memory.
    pub fn from_path(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => Self::new(path),
            None => Self::in_memory(),
        }
    }

    /// Where the record is persisted, if anywhere.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current record, loading it first if needed.
    pub async fn snapshot(&self) -> DiagnosticsRecord {
        let mut slot = self.record.lock().await;
        self.loaded(&mut slot).await.clone()
    }

    /// Merge `patch`, persist, and return the merged record.
    ///
    /// The in-memory record is updated even when persisting fails.
    ///
    /// # Errors
    ///
    /// `Storage` if the record cannot be written.
    pub async fn patch(&self, patch: DiagnosticsPatch) -> Result<DiagnosticsRecord> {
        let mut slot = self.record.lock().await;
        let record = self.loaded(&mut slot).await;
        record.apply(patch);
        let merged = record.clone();
        if let Some(path) = &self.path {
            write_atomic(path, &merged).await?;
        }
        Ok(merged)
    }

    async fn loaded<'a>(&self, slot: &'a mut Option<DiagnosticsRecord>) -> &'a mut DiagnosticsRecord {
        if slot.is_none() {
            *slot = Some(match &self.path {
                Some(path) => read_record(path).await,
                None => DiagnosticsRecord::default(),
            });
        }
        slot.get_or_insert_with(DiagnosticsRecord::default)
    }
}

async fn read_record(path: &Path) -> DiagnosticsRecord {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return DiagnosticsRecord::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read diagnostics record");
            return DiagnosticsRecord::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "discarding unreadable diagnostics record");
            DiagnosticsRecord::default()
        }
    }
}

async fn write_atomic(path: &Path, record: &DiagnosticsRecord) -> Result<()> {
    let json = serde_json::to_vec_pretty(record)
        .map_err(|e| HearthError::Storage(format!("cannot serialize diagnostics: {e}")))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            HearthError::Storage(format!(
                "cannot create diagnostics directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await.map_err(|e| {
        HearthError::Storage(format!("cannot write {}: {e}", tmp_path.display()))
    })?;
    tokio::fs::rename(&tmp_path, path).await.map_err(|e| {
        HearthError::Storage(format!(
            "cannot rename {} to {}: {e}",
            tmp_path.display(),
            path.display()
        ))
    })
}
