//! Configuration types for the session controller.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{HearthError, Result};
use crate::types::SamplingConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HearthConfig {
    /// Primary generation and fallback settings.
    pub generation: GenerationConfig,
    /// Availability caching and priming.
    pub availability: AvailabilityConfig,
    /// Attachment preprocessing.
    pub attachments: AttachmentConfig,
    /// Conversation title synthesis.
    pub titles: TitleConfig,
    /// Smart reply suggestions.
    pub replies: ReplyConfig,
    /// Translation pipeline.
    pub translation: TranslationConfig,
    /// Text-to-speech.
    pub speech: SpeechConfig,
    /// Diagnostics record persistence.
    pub diagnostics: DiagnosticsConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Minimum interval between streamed chunk deliveries, in milliseconds.
    pub throttle_ms: u64,
    /// Sampling used when a request does not carry its own.
    pub sampling: SamplingConfig,
    /// Whether the fallback executor is tried after a transient fault.
    pub enable_fallback: bool,
    /// Page origin prefixes on which inference is refused and no fallback
    /// is attempted.
    pub restricted_origins: Vec<String>,
    /// Character budget for context plus text attachments in one prompt.
    pub max_context_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 100,
            sampling: SamplingConfig::default(),
            enable_fallback: true,
            restricted_origins: vec![
                "chrome://".to_owned(),
                "chrome-extension://".to_owned(),
                "edge://".to_owned(),
                "about:".to_owned(),
                "https://chromewebstore.google.com".to_owned(),
            ],
            max_context_chars: 24_000,
        }
    }
}

impl GenerationConfig {
    /// Throttle interval as a [`Duration`].
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Returns true if `origin` starts with any restricted prefix.
    pub fn is_restricted_origin(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return false;
        };
        let origin = origin.trim().to_ascii_lowercase();
        self.restricted_origins
            .iter()
            .any(|prefix| origin.starts_with(&prefix.to_ascii_lowercase()))
    }
}

/// Availability settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilityConfig {
    /// Minimum time between automatic primes, in seconds.
    pub prime_ttl_secs: u64,
    /// Whether [`crate::GenerationController::init`] primes in the background.
    pub prime_on_init: bool,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            prime_ttl_secs: 30 * 60,
            prime_on_init: true,
        }
    }
}

/// Attachment preprocessing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentConfig {
    /// Images wider than this are scaled down, preserving aspect ratio.
    pub max_image_width: u32,
    /// Bound on a remote image fetch, in seconds.
    pub fetch_timeout_secs: u64,
    /// Largest remote image accepted, in bytes.
    pub max_fetch_bytes: usize,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_image_width: 1024,
            fetch_timeout_secs: 15,
            max_fetch_bytes: 20 * 1024 * 1024,
        }
    }
}

impl AttachmentConfig {
    /// Fetch timeout as a [`Duration`].
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Title synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleConfig {
    /// Characters kept from each side of the conversation.
    pub input_chars: usize,
    /// Longest title returned.
    pub max_title_chars: usize,
    /// Titles this short that match a generic term get a time suffix.
    pub generic_max_chars: usize,
    /// Sampling temperature for the title session.
    pub temperature: f32,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            input_chars: 500,
            max_title_chars: 60,
            generic_max_chars: 24,
            temperature: 0.3,
        }
    }
}

/// Smart reply settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    /// Number of suggestions requested and returned at most.
    pub count: usize,
    /// Longest suggestion returned.
    pub max_chars: usize,
    /// Characters of the last message included in the prompt.
    pub input_chars: usize,
    /// Sampling temperature for the reply session.
    pub temperature: f32,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            count: 3,
            max_chars: 80,
            input_chars: 1_500,
            temperature: 0.7,
        }
    }
}

/// Translation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Source language assumed when detection is unavailable.
    pub default_source_language: String,
    /// Minimum detector confidence to accept a detected language.
    pub min_confidence: f32,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            default_source_language: "en".to_owned(),
            min_confidence: 0.5,
        }
    }
}

/// Speech settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Synthesizer error codes treated as normal completion.
    pub expected_error_codes: Vec<String>,
    /// Default speaking rate.
    pub rate: f32,
    /// Default pitch.
    pub pitch: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            expected_error_codes: vec!["interrupted".to_owned(), "canceled".to_owned()],
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

/// Diagnostics record settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Path of the persisted record. `None` uses
    /// [`crate::hearth_dirs::diagnostics_path`].
    pub path: Option<PathBuf>,
    /// Keep the record in memory only.
    pub in_memory: bool,
}

impl DiagnosticsConfig {
    /// Resolved record path, or `None` when persistence is disabled.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        if self.in_memory {
            return None;
        }
        Some(
            self.path
                .clone()
                .unwrap_or_else(crate::hearth_dirs::diagnostics_path),
        )
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Also write daily-rotated log files.
    pub file: bool,
    /// Directory for log files. `None` uses [`crate::hearth_dirs::logs_dir`].
    pub dir: Option<PathBuf>,
    /// Number of rotated files kept.
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "hearth=info".to_owned(),
            file: false,
            dir: None,
            max_files: 7,
        }
    }
}

impl HearthConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| HearthError::ConfigValidation(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| HearthError::Storage(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `config_dir()/config.toml`.
    pub fn default_config_path() -> PathBuf {
        crate::hearth_dirs::config_dir().join("config.toml")
    }

    /// Reject values no component can work with.
    ///
    /// Sampling values are checked later against the engine's own domain.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(HearthError::ConfigValidation(msg.to_owned()));
        if self.attachments.max_image_width == 0 {
            return invalid("attachments.max_image_width must be positive");
        }
        if self.attachments.fetch_timeout_secs == 0 {
            return invalid("attachments.fetch_timeout_secs must be positive");
        }
        if self.titles.max_title_chars == 0 || self.titles.input_chars == 0 {
            return invalid("titles limits must be positive");
        }
        if self.replies.count == 0 || self.replies.max_chars == 0 {
            return invalid("replies.count and replies.max_chars must be positive");
        }
        if self.translation.default_source_language.trim().is_empty() {
            return invalid("translation.default_source_language must not be empty");
        }
        if !(0.0..=1.0).contains(&self.translation.min_confidence) {
            return invalid("translation.min_confidence must be within 0..=1");
        }
        Ok(())
    }
}
