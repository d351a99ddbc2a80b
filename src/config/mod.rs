//! Configuration for the dispatch core
//!
//! One flat config struct covering the tunables of this crate: the
//! debounce window of the system enqueuer, channel capacities for the
//! trigger streams, and the inbound body size limit. Defaults are defined
//! as named constants so tests and embedders reference the same values.

use serde::{Deserialize, Serialize};

/// Default debounce window for the system (ready) enqueuer, milliseconds.
/// Re-armed on every subscribe inside the window.
pub const DEFAULT_DEBOUNCE_WINDOW_MS: u64 = 1_500;

/// Default capacity for trigger signal channels (the system enqueuer's
/// kick channel; also the recommended capacity for seam-implemented
/// change-capture and cron tick streams)
pub const DEFAULT_TRIGGER_CHANNEL_CAPACITY: usize = 1_024;

/// Default maximum inbound HTTP body size accepted by the codec (bytes)
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Dispatch core configuration.
///
/// All fields have working defaults; embedders typically deserialize this
/// from their own config file section and override a field or two.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Debounce window for the system enqueuer (milliseconds)
    pub debounce_window_ms: u64,

    /// Buffered capacity of the trigger signal channels this crate owns
    pub trigger_channel_capacity: usize,

    /// Maximum raw body size the codec will parse (bytes)
    pub max_body_bytes: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW_MS,
            trigger_channel_capacity: DEFAULT_TRIGGER_CHANNEL_CAPACITY,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl DispatchConfig {
    /// Validate the configuration, rejecting values that would stall the
    /// dispatcher (a zero-width debounce window or empty channels).
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.debounce_window_ms == 0 {
            return Err(crate::error::DispatchError::Config(
                "debounce_window_ms must be greater than zero".to_string(),
            ));
        }
        if self.trigger_channel_capacity == 0 {
            return Err(crate::error::DispatchError::Config(
                "trigger_channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Debounce window as a `Duration`
    pub fn debounce_window(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.debounce_window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.debounce_window_ms, DEFAULT_DEBOUNCE_WINDOW_MS);
        assert_eq!(
            config.trigger_channel_capacity,
            DEFAULT_TRIGGER_CHANNEL_CAPACITY
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = DispatchConfig {
            debounce_window_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = DispatchConfig {
            debounce_window_ms: 250,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: DispatchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.debounce_window_ms, 250);
    }
}
