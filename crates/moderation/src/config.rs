//! Moderation engine configuration
//!
//! Thresholds are plain integer vote counts. A threshold of zero disables
//! the behaviour it controls.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value the engine cannot run with
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// The service was built outside a tokio runtime
    #[error("Moderation service must be created inside a tokio runtime")]
    NoRuntime,

    /// Configuration document could not be parsed
    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Trusted mutes older than this stop counting (60 days)
pub const DEFAULT_TRUSTED_MUTE_WINDOW_SECS: u64 = 60 * 24 * 60 * 60;

/// Default `limit` for per-target report backfill
pub const DEFAULT_REPORT_BACKFILL_LIMIT: usize = 500;

/// Tunables for a [`ModerationService`](crate::service::ModerationService)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Trusted votes on the top category that block autoplay
    pub autoplay_block_threshold: u32,
    /// Trusted votes on the top category that blur media
    pub blur_threshold: u32,
    /// Trusted votes on the top category that hide content
    pub trusted_report_hide_threshold: u32,
    /// Trusted muters that hide an author
    pub trusted_mute_hide_threshold: u32,
    /// Backfill limit for report queries
    pub report_backfill_limit: usize,
    /// Age after which a trusted mute list stops counting
    pub trusted_mute_window_secs: Option<u64>,
    /// Capacity of the change-stream channel
    pub event_buffer_size: usize,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            autoplay_block_threshold: 1,
            blur_threshold: 1,
            trusted_report_hide_threshold: 3,
            trusted_mute_hide_threshold: 1,
            report_backfill_limit: DEFAULT_REPORT_BACKFILL_LIMIT,
            trusted_mute_window_secs: Some(DEFAULT_TRUSTED_MUTE_WINDOW_SECS),
            event_buffer_size: 64,
        }
    }
}

impl ModerationConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the autoplay-block threshold
    pub fn with_autoplay_block_threshold(mut self, threshold: u32) -> Self {
        self.autoplay_block_threshold = threshold;
        self
    }

    /// Set the blur threshold
    pub fn with_blur_threshold(mut self, threshold: u32) -> Self {
        self.blur_threshold = threshold;
        self
    }

    /// Set the report hide threshold
    pub fn with_trusted_report_hide_threshold(mut self, threshold: u32) -> Self {
        self.trusted_report_hide_threshold = threshold;
        self
    }

    /// Set the mute hide threshold
    pub fn with_trusted_mute_hide_threshold(mut self, threshold: u32) -> Self {
        self.trusted_mute_hide_threshold = threshold;
        self
    }

    /// Set the report backfill limit
    pub fn with_report_backfill_limit(mut self, limit: usize) -> Self {
        self.report_backfill_limit = limit;
        self
    }

    /// Set or disable the trusted mute window
    pub fn with_trusted_mute_window_secs(mut self, window: Option<u64>) -> Self {
        self.trusted_mute_window_secs = window;
        self
    }

    /// Set the change-stream capacity
    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    /// Check values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.report_backfill_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "report_backfill_limit",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.event_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "event_buffer_size",
                reason: "broadcast channels need a capacity of at least one".to_string(),
            });
        }
        Ok(())
    }

    /// Whether `count` reaches an enabled threshold
    pub(crate) fn reaches(threshold: u32, count: u32) -> bool {
        threshold > 0 && count >= threshold
    }
}
