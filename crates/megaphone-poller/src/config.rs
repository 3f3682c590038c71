//! Poller configuration.

use serde::{Deserialize, Serialize};

use megaphone_core::MegaphoneError;

/// What the read loop does with a line that does not decode into a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeErrorPolicy {
    /// Log the line, count it, keep reading.
    #[default]
    Skip,
    /// Treat it like a transport failure: every stream on the channel ends
    /// with the decode error.
    FailChannel,
}

/// Configuration for a `MegaphonePoller`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// How many recent event ids the dedup ring remembers.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Handling of undecodable lines.
    #[serde(default)]
    pub decode_errors: DecodeErrorPolicy,
}

fn default_dedup_capacity() -> usize { 256 }

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: default_dedup_capacity(),
            decode_errors: DecodeErrorPolicy::default(),
        }
    }
}

impl PollerConfig {
    /// Default config with a custom dedup window.
    pub fn with_dedup_capacity(dedup_capacity: usize) -> Self {
        Self {
            dedup_capacity,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), MegaphoneError> {
        if self.dedup_capacity == 0 {
            return Err(MegaphoneError::Config(
                "dedup_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
