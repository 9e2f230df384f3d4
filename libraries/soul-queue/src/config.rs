//! Engine configuration
use crate::error::{QueueError, Result};
use crate::types::{RepeatMode, ShuffleMode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for the queue engine and its worker service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Repeat mode at startup (default: Off)
    #[serde(default)]
    pub initial_repeat: RepeatMode,

    /// Shuffle mode at startup (default: Off)
    #[serde(default)]
    pub initial_shuffle: ShuffleMode,

    /// Past this position, "previous" restarts the current track instead of
    /// moving back (default: 5000ms, 0 disables)
    #[serde(default = "default_rewind_threshold_ms")]
    pub rewind_threshold_ms: u64,

    /// Start playing when skipping while paused (default: false)
    #[serde(default)]
    pub auto_play_on_skip: bool,

    /// Pending commands accepted by the worker before senders block
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,

    /// Undelivered signals buffered per observer
    #[serde(default = "default_observer_capacity")]
    pub observer_capacity: usize,

    /// Snapshots buffered for the persistence collaborator
    #[serde(default = "default_persistence_capacity")]
    pub persistence_capacity: usize,

    /// Fixed shuffle seed (tests and reproducible sessions)
    #[serde(default)]
    pub shuffle_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_repeat: RepeatMode::Off,
            initial_shuffle: ShuffleMode::Off,
            rewind_threshold_ms: default_rewind_threshold_ms(),
            auto_play_on_skip: false,
            command_capacity: default_command_capacity(),
            observer_capacity: default_observer_capacity(),
            persistence_capacity: default_persistence_capacity(),
            shuffle_seed: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from an optional TOML file and the environment
    ///
    /// Environment variables prefixed with `SOUL_QUEUE_` override file values,
    /// e.g. `SOUL_QUEUE_REWIND_THRESHOLD_MS=3000`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        if let Some(path) = path {
            if path.exists() {
                settings = settings.add_source(config::File::from(path.to_path_buf()));
            }
        }

        settings = settings.add_source(
            config::Environment::with_prefix("SOUL_QUEUE")
                .prefix_separator("_")
                .try_parsing(true),
        );

        let config: Self = settings
            .build()
            .map_err(|e| QueueError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| QueueError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.command_capacity == 0 {
            return Err(QueueError::Config(
                "command_capacity must be at least 1".to_string(),
            ));
        }

        if self.observer_capacity == 0 {
            return Err(QueueError::Config(
                "observer_capacity must be at least 1".to_string(),
            ));
        }

        if self.persistence_capacity == 0 {
            return Err(QueueError::Config(
                "persistence_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Rewind threshold as a duration, `None` when disabled
    pub fn rewind_threshold(&self) -> Option<Duration> {
        (self.rewind_threshold_ms > 0).then(|| Duration::from_millis(self.rewind_threshold_ms))
    }
}

// Default values
fn default_rewind_threshold_ms() -> u64 {
    5000
}

fn default_command_capacity() -> usize {
    64
}

fn default_observer_capacity() -> usize {
    256
}

fn default_persistence_capacity() -> usize {
    8
}
