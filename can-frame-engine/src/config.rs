//! Engine configuration
//!
//! Mirrors the recognized processing options: length-range validation,
//! decode fallback behavior, history bounds and monitoring switches.

use serde::{Deserialize, Serialize};

/// Configuration for the frame engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Enable the basic payload length-range check (0..=64 bytes)
    #[serde(default = "default_true")]
    pub dlc_validation: bool,

    /// When the decode ladder is exhausted, synthesize per-signal default
    /// values instead of reporting an error status
    #[serde(default)]
    pub use_default_on_decode_error: bool,

    /// Maximum decode retries before falling through the ladder
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,

    /// Bounded history capacity (oldest frames dropped past this)
    #[serde(default = "default_max_history")]
    pub max_message_history: usize,

    /// Expose raw hex/length fallback signals for unknown identifiers
    #[serde(default = "default_true")]
    pub unknown_id_basic_signals: bool,

    /// Run the ~1 Hz background statistics monitor
    #[serde(default = "default_true")]
    pub frequency_monitoring: bool,

    /// Enable signal post-validation (range warnings, NaN/Inf detection)
    #[serde(default = "default_true")]
    pub signal_validation: bool,
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u8 {
    3
}

fn default_max_history() -> usize {
    10_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dlc_validation: true,
            use_default_on_decode_error: false,
            max_retries: default_max_retries(),
            max_message_history: default_max_history(),
            unknown_id_basic_signals: true,
            frequency_monitoring: true,
            signal_validation: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: toggle the length-range check
    pub fn with_dlc_validation(mut self, enabled: bool) -> Self {
        self.dlc_validation = enabled;
        self
    }

    /// Builder method: toggle default-fill on decode failure
    pub fn with_default_on_decode_error(mut self, enabled: bool) -> Self {
        self.use_default_on_decode_error = enabled;
        self
    }

    /// Builder method: set the retry budget
    pub fn with_max_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    /// Builder method: set the history capacity
    pub fn with_max_history(mut self, capacity: usize) -> Self {
        self.max_message_history = capacity;
        self
    }

    /// Builder method: toggle the unknown-id raw fallback signals
    pub fn with_unknown_id_basic_signals(mut self, enabled: bool) -> Self {
        self.unknown_id_basic_signals = enabled;
        self
    }

    /// Builder method: toggle the background statistics monitor
    pub fn with_frequency_monitoring(mut self, enabled: bool) -> Self {
        self.frequency_monitoring = enabled;
        self
    }

    /// Builder method: toggle signal post-validation
    pub fn with_signal_validation(mut self, enabled: bool) -> Self {
        self.signal_validation = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new();
        assert!(config.dlc_validation);
        assert!(!config.use_default_on_decode_error);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_message_history, 10_000);
        assert!(config.unknown_id_basic_signals);
        assert!(config.frequency_monitoring);
        assert!(config.signal_validation);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_default_on_decode_error(true)
            .with_max_retries(1)
            .with_max_history(100)
            .with_frequency_monitoring(false);

        assert!(config.use_default_on_decode_error);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.max_message_history, 100);
        assert!(!config.frequency_monitoring);
    }
}
