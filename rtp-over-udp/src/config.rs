//! Per-connection configuration.

use thiserror::Error;

use crate::packet::MAX_PAYLOAD;
use crate::timer::TimerConfig;

/// Settings fixed for the lifetime of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of outstanding (sender) or buffered (receiver) packets.
    pub window_size: u32,
    /// Largest DATA payload the sender emits.
    pub max_payload: usize,
    pub timers: TimerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: 128,
            max_payload: MAX_PAYLOAD,
            timers: TimerConfig::default(),
        }
    }
}

impl Config {
    /// Default configuration with the given window.
    pub fn with_window(window_size: u32) -> Self {
        Self {
            window_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.max_payload == 0 || self.max_payload > MAX_PAYLOAD {
            return Err(ConfigError::PayloadSize(self.max_payload));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("window size must be at least 1")]
    ZeroWindow,
    #[error("max payload {0} outside 1..={MAX_PAYLOAD}", MAX_PAYLOAD = MAX_PAYLOAD)]
    PayloadSize(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
        assert_eq!(Config::default().window_size, 128);
    }

    #[test]
    fn zero_window_rejected() {
        assert_eq!(Config::with_window(0).validate(), Err(ConfigError::ZeroWindow));
    }

    #[test]
    fn oversized_payload_rejected() {
        let cfg = Config {
            max_payload: MAX_PAYLOAD + 1,
            ..Config::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::PayloadSize(MAX_PAYLOAD + 1)));

        let cfg = Config {
            max_payload: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }
}
