use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Role of a capture device in the primary/secondary fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    Primary,
    Secondary,
}

/// A capture device backing a `CaptureSource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    pub id: String,
    pub name: String,
    pub role: DeviceRole,
}

/// One raw capture buffer, already converted to the session's output format.
///
/// `timestamp` is the capture time relative to the start of the stream and is
/// derived from the number of frames captured before this buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved f32 samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: Duration,
}

impl AudioBuffer {
    /// Number of sample frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Zero-filled copy with identical format, length and timestamp.
    pub fn silenced(&self) -> Self {
        Self {
            samples: vec![0.0; self.samples.len()],
            sample_rate: self.sample_rate,
            channels: self.channels,
            timestamp: self.timestamp,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|s| *s == 0.0)
    }
}

/// One unit of encoded audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub payload: Vec<u8>,
    /// Presentation timestamp in milliseconds since stream start.
    pub pts_ms: u64,
    /// Position in encoder output order, starting at 0 for each stream.
    pub sequence: u64,
}

/// Counters for debugging a streaming session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionDiagnostics {
    pub session_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub buffers_captured: u64,
    pub buffers_dropped: u64,
    pub frames_encoded: u64,
    pub encode_failures: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub bytes_sent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(samples: Vec<f32>, channels: u16) -> AudioBuffer {
        AudioBuffer {
            samples,
            sample_rate: 1000,
            channels,
            timestamp: Duration::from_millis(40),
        }
    }

    #[test]
    fn frame_count_accounts_for_channels() {
        assert_eq!(buffer(vec![0.1; 20], 2).frame_count(), 10);
        assert_eq!(buffer(vec![0.1; 20], 1).frame_count(), 20);
    }

    #[test]
    fn silenced_keeps_shape_and_timestamp() {
        let original = buffer(vec![0.5, -0.5, 0.25, 1.0], 2);
        let silent = original.silenced();
        assert_eq!(silent.samples.len(), 4);
        assert_eq!(silent.timestamp, original.timestamp);
        assert_eq!(silent.channels, 2);
        assert!(silent.is_silent());
        assert!(!original.is_silent());
    }

    #[test]
    fn diagnostics_serialize_to_json() {
        let diagnostics = SessionDiagnostics {
            session_id: "abc".into(),
            frames_sent: 12,
            ..Default::default()
        };
        let json = serde_json::to_value(&diagnostics).unwrap();
        assert_eq!(json["session_id"], "abc");
        assert_eq!(json["frames_sent"], 12);
        assert!(json["started_at"].is_null());
    }
}
