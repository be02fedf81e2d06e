//! Connection configuration.

use std::time::Duration;

use crate::core::{
    DEFAULT_BUFFER_CAPACITY, DEFAULT_MODEL_NUMBER, DEFAULT_READ_CHUNK_SIZE, DEFAULT_RECOVERY_DELAY,
    DEFAULT_RESPONSE_TIMEOUT, DEFAULT_VERIFICATION_HEARTBEAT, MODEL_NUMBER_SIZE, SATL_MIN_PACKET_SIZE,
};

/// Pump connection configuration.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// How long a sent frame may stay unanswered before the session fails.
    pub response_timeout: Duration,

    /// Delay between `VERIFY_CONFIRM_REQUEST`s while the pump reports pending.
    pub verification_heartbeat: Duration,

    /// Back-off before a paired session reconnects after a failure.
    pub recovery_delay: Duration,

    /// Receive buffer capacity in bytes.
    pub buffer_capacity: usize,

    /// Bytes requested per link read.
    pub read_chunk_size: usize,

    /// Model number announced in `BIND` (at most 68 bytes).
    pub model_number: String,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            verification_heartbeat: DEFAULT_VERIFICATION_HEARTBEAT,
            recovery_delay: DEFAULT_RECOVERY_DELAY,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            model_number: DEFAULT_MODEL_NUMBER.to_string(),
        }
    }
}

/// Builder for [`PumpConfig`].
#[derive(Debug, Default)]
pub struct PumpConfigBuilder {
    config: PumpConfig,
}

impl PumpConfigBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response timeout.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = timeout;
        self
    }

    /// Set the verification heartbeat interval.
    pub fn verification_heartbeat(mut self, interval: Duration) -> Self {
        self.config.verification_heartbeat = interval;
        self
    }

    /// Set the recovery back-off.
    pub fn recovery_delay(mut self, delay: Duration) -> Self {
        self.config.recovery_delay = delay;
        self
    }

    /// Set the receive buffer capacity. Values below one packet are raised.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity.max(SATL_MIN_PACKET_SIZE);
        self
    }

    /// Set the read chunk size. Zero is raised to one.
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size.max(1);
        self
    }

    /// Set the model number; truncated to 68 bytes on the wire.
    pub fn model_number(mut self, model: impl Into<String>) -> Self {
        let mut model = model.into();
        if model.len() > MODEL_NUMBER_SIZE {
            let mut end = MODEL_NUMBER_SIZE;
            while !model.is_char_boundary(end) {
                end -= 1;
            }
            model.truncate(end);
        }
        self.config.model_number = model;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PumpConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PumpConfig::default();
        assert_eq!(config.response_timeout, Duration::from_millis(3000));
        assert_eq!(config.verification_heartbeat, Duration::from_millis(1000));
        assert_eq!(config.recovery_delay, Duration::from_millis(1000));
        assert_eq!(config.buffer_capacity, 1024);
        assert_eq!(config.model_number, "mobile client");
    }

    #[test]
    fn test_builder_clamps() {
        let config = PumpConfigBuilder::new()
            .buffer_capacity(4)
            .read_chunk_size(0)
            .model_number("x".repeat(100))
            .response_timeout(Duration::from_secs(1))
            .build();
        assert_eq!(config.buffer_capacity, SATL_MIN_PACKET_SIZE);
        assert_eq!(config.read_chunk_size, 1);
        assert_eq!(config.model_number.len(), 68);
        assert_eq!(config.response_timeout, Duration::from_secs(1));
    }
}
