//! Centralized application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! # Environment Overrides
//!
//! - `HEARTH_DATA_DIR` overrides [`data_dir`]
//! - `HEARTH_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Holds the diagnostics record and rotated logs. Resolves to
/// `dirs::data_dir()/hearth/` by default.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("HEARTH_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("hearth"))
        .unwrap_or_else(|| PathBuf::from("/tmp/hearth-data"))
}

/// Application config directory (`config.toml`).
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("HEARTH_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("hearth"))
        .unwrap_or_else(|| PathBuf::from("/tmp/hearth-config"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Default location of the persisted diagnostics record.
#[must_use]
pub fn diagnostics_path() -> PathBuf {
    data_dir().join("diagnostics.json")
}
