use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::StreamError;

/// Configuration for a streaming session.
///
/// The session snapshots this on its first `start`; later changes are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfiguration {
    /// Output sample rate in Hz (default: 44100).
    pub sample_rate: u32,

    /// Number of output channels (default: 1). Valid values: 1, 2.
    pub channels: u16,

    /// Target bitrate in bits per second. Defaults to the 16-bit PCM rate.
    pub bitrate: u32,

    /// Length of one encoded frame in milliseconds (default: 20).
    pub frame_duration_ms: u32,

    /// Raw buffers held between capture and encoder. Oldest dropped on overflow.
    pub capture_queue_capacity: usize,

    /// Encoded frames held between encoder and network. Newest dropped on overflow.
    pub transmit_queue_capacity: usize,

    /// Consecutive backpressure drops before the channel gives up.
    pub max_backpressure_drops: u32,

    pub connect_timeout_ms: u64,

    pub disconnect_timeout_ms: u64,
}

impl StreamingConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(format!("unsupported sample rate: {}", self.sample_rate));
        }
        if ![1, 2].contains(&self.channels) {
            return Err(format!("unsupported channel count: {}", self.channels));
        }
        if self.bitrate == 0 {
            return Err("bitrate must be positive".into());
        }
        if !(10..=100).contains(&self.frame_duration_ms) {
            return Err(format!(
                "frame duration must be 10-100 ms, got {}",
                self.frame_duration_ms
            ));
        }
        if self.capture_queue_capacity == 0 || self.transmit_queue_capacity == 0 {
            return Err("queue capacities must be positive".into());
        }
        if self.max_backpressure_drops == 0 {
            return Err("max_backpressure_drops must be positive".into());
        }
        if self.connect_timeout_ms == 0 || self.disconnect_timeout_ms == 0 {
            return Err("connect and disconnect timeouts must be positive".into());
        }
        Ok(())
    }

    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, StreamError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| StreamError::ConfigurationFailed(format!("invalid json: {}", e)))?;
        config.validate().map_err(StreamError::ConfigurationFailed)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, StreamError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            StreamError::ConfigurationFailed(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Samples per channel in one encoded frame.
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as u64 * self.frame_duration_ms as u64 / 1000) as usize
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }
}

impl Default for StreamingConfiguration {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            bitrate: 44_100 * 16,
            frame_duration_ms: 20,
            capture_queue_capacity: 32,
            transmit_queue_capacity: 256,
            max_backpressure_drops: 250,
            connect_timeout_ms: 10_000,
            disconnect_timeout_ms: 3_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(StreamingConfiguration::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_channels() {
        let config = StreamingConfiguration {
            channels: 6,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("channel"));
    }

    #[test]
    fn rejects_zero_capacity() {
        let config = StreamingConfiguration {
            transmit_queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_timeouts() {
        let connect = StreamingConfiguration {
            connect_timeout_ms: 0,
            ..Default::default()
        };
        assert!(connect.validate().unwrap_err().contains("timeout"));

        let disconnect = StreamingConfiguration {
            disconnect_timeout_ms: 0,
            ..Default::default()
        };
        assert!(disconnect.validate().unwrap_err().contains("timeout"));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config =
            StreamingConfiguration::from_json_str(r#"{ "sample_rate": 48000, "channels": 2 }"#)
                .unwrap();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.channels, 2);
        assert_eq!(config.frame_duration_ms, 20);
        assert_eq!(config.transmit_queue_capacity, 256);
    }

    #[test]
    fn json_validation_errors_surface() {
        let err = StreamingConfiguration::from_json_str(r#"{ "sample_rate": 100 }"#).unwrap_err();
        assert!(matches!(err, StreamError::ConfigurationFailed(_)));
    }

    #[test]
    fn samples_per_frame_matches_duration() {
        let config = StreamingConfiguration {
            sample_rate: 48_000,
            frame_duration_ms: 20,
            ..Default::default()
        };
        assert_eq!(config.samples_per_frame(), 960);
    }
}
