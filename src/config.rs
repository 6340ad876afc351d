//! Engine configuration
//!
//! Everything here has a sensible default, so a JSON file only needs the
//! fields it wants to change:
//!
//! ```
//! use voicebus::EngineConfig;
//!
//! let config = EngineConfig::from_json_str(r#"{ "max_sleep_millis": 20 }"#).unwrap();
//! assert_eq!(config.max_sleep_millis, 20);
//! assert_eq!(config.min_sleep_micros, EngineConfig::default().min_sleep_micros);
//! ```

use crate::playback::Pacing;
use crate::{AudioError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for voice pacing, memory budgeting and reclamation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Shortest sleep between two chunk writes, in microseconds
    pub min_sleep_micros: u64,

    /// Longest sleep between two chunk writes, in milliseconds
    /// Bounds how late a voice notices a drained line
    pub max_sleep_millis: u64,

    /// Total PCM bytes assets may keep resident; unlimited when `None`
    pub memory_budget_bytes: Option<u64>,

    /// Minimum time between two reclamation sweeps started by `tick`
    pub reclaim_interval_millis: u64,

    /// Free budget below which memory counts as tight
    pub reclaim_threshold_bytes: u64,

    /// Queue size of each device line, in frames
    /// Larger queues = more latency but fewer underruns
    pub line_buffer_frames: usize,
}

impl EngineConfig {
    /// Short lines and tight pacing
    /// 2048 frames ≈ 46ms @ 44.1kHz
    pub fn low_latency() -> Self {
        EngineConfig {
            min_sleep_micros: 500,
            max_sleep_millis: 20,
            line_buffer_frames: 2048,
            ..Self::default()
        }
    }

    /// Long lines and relaxed pacing
    /// 16384 frames ≈ 372ms @ 44.1kHz
    pub fn stable() -> Self {
        EngineConfig {
            min_sleep_micros: 2_000,
            max_sleep_millis: 200,
            line_buffer_frames: 16_384,
            ..Self::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| AudioError::ConfigError(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AudioError::ConfigError(format!("cannot serialize: {e}")))
    }

    /// Check that the values make sense together
    pub fn validate(&self) -> Result<()> {
        if self.max_sleep() < self.min_sleep() {
            return Err(AudioError::ConfigError(format!(
                "max sleep {:?} is below min sleep {:?}",
                self.max_sleep(),
                self.min_sleep()
            )));
        }
        if self.max_sleep_millis == 0 {
            return Err(AudioError::ConfigError("max sleep must be positive".into()));
        }
        if self.line_buffer_frames == 0 {
            return Err(AudioError::ConfigError(
                "line buffer must hold at least one frame".into(),
            ));
        }
        Ok(())
    }

    /// Shortest sleep between chunk writes
    pub fn min_sleep(&self) -> Duration {
        Duration::from_micros(self.min_sleep_micros)
    }

    /// Longest sleep between chunk writes
    pub fn max_sleep(&self) -> Duration {
        Duration::from_millis(self.max_sleep_millis)
    }

    /// Minimum time between periodic sweeps
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_millis)
    }

    pub(crate) fn pacing(&self) -> Pacing {
        Pacing::new(self.min_sleep(), self.max_sleep())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            min_sleep_micros: 1_000,
            max_sleep_millis: 100,
            memory_budget_bytes: None,
            reclaim_interval_millis: 5_000,
            reclaim_threshold_bytes: 64 * 1024 * 1024,
            line_buffer_frames: 8_192,
        }
    }
}
