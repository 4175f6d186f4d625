//! Defines the configuration structure for the event loop.
//!
//! The struct is designed to be deserialized from a configuration file
//! (e.g., a TOML file) using `serde`, so a host application can tune the
//! loop externally from the code that schedules events.

use serde::Deserialize;

/// Top-level configuration for an [`EventLoop`](crate::engine::EventLoop).
#[derive(Debug, Clone, Deserialize)]
pub struct LoopConfig {
    /// Capacity of the [`LoopEvent`](crate::events::LoopEvent) broadcast
    /// channel. Slow subscribers that fall more than this many events
    /// behind start losing the oldest notifications.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// A human-readable label for this loop, used in log output. Useful
    /// when an application drives several loops at once.
    #[serde(default = "default_label")]
    pub label: String,
}

impl LoopConfig {
    /// Loads a configuration from a file via the `config` crate.
    ///
    /// The extension determines the format; TOML is the usual choice.
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?
            .try_deserialize()
    }
}

// --- Default value functions for serde ---

fn default_channel_capacity() -> usize {
    64
}

fn default_label() -> String {
    "evloop".to_string()
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            label: default_label(),
        }
    }
}
