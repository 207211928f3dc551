use crate::models::audio_models::{AudioBuffer, EncodedFrame};
use crate::models::config::StreamingConfiguration;
use crate::models::error::StreamError;
use crate::processing::format_converter::to_s16le;
use crate::traits::audio_encoder::AudioEncoder;

/// Reference encoder: fixed-duration frames of 16-bit little-endian PCM.
///
/// Presentation timestamps come from the running sample count, so they are
/// strictly increasing and independent of capture jitter or muting.
#[derive(Debug, Default)]
pub struct PcmFrameEncoder {
    format: Option<FrameFormat>,
    pending: Vec<f32>,
    samples_emitted: u64,
    sequence: u64,
}

#[derive(Debug, Clone, Copy)]
struct FrameFormat {
    sample_rate: u32,
    channels: u16,
    samples_per_frame: usize,
}

impl PcmFrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&mut self, format: FrameFormat, interleaved_len: usize) -> EncodedFrame {
        let samples: Vec<f32> = self.pending.drain(..interleaved_len).collect();
        let frame = EncodedFrame {
            payload: to_s16le(&samples),
            pts_ms: self.samples_emitted * 1000 / format.sample_rate as u64,
            sequence: self.sequence,
        };
        self.samples_emitted += (interleaved_len / format.channels as usize) as u64;
        self.sequence += 1;
        frame
    }
}

impl AudioEncoder for PcmFrameEncoder {
    fn configure(&mut self, config: &StreamingConfiguration) -> Result<(), StreamError> {
        config.validate().map_err(StreamError::ConfigurationFailed)?;
        self.format = Some(FrameFormat {
            sample_rate: config.sample_rate,
            channels: config.channels,
            samples_per_frame: config.samples_per_frame(),
        });
        self.pending.clear();
        self.samples_emitted = 0;
        self.sequence = 0;
        Ok(())
    }

    fn encode(&mut self, buffer: &AudioBuffer) -> Result<Vec<EncodedFrame>, StreamError> {
        let format = self
            .format
            .ok_or_else(|| StreamError::EncoderFault("encoder not configured".into()))?;

        if buffer.sample_rate != format.sample_rate || buffer.channels != format.channels {
            return Err(StreamError::EncodeFailure(format!(
                "buffer format {}Hz/{}ch does not match {}Hz/{}ch",
                buffer.sample_rate, buffer.channels, format.sample_rate, format.channels
            )));
        }
        if buffer.samples.len() % format.channels as usize != 0 {
            return Err(StreamError::EncodeFailure("partial sample frame in buffer".into()));
        }
        if buffer.samples.iter().any(|s| !s.is_finite()) {
            return Err(StreamError::EncodeFailure("non-finite sample in buffer".into()));
        }

        self.pending.extend_from_slice(&buffer.samples);

        let frame_len = format.samples_per_frame * format.channels as usize;
        let mut frames = Vec::with_capacity(self.pending.len() / frame_len);
        while self.pending.len() >= frame_len {
            frames.push(self.emit(format, frame_len));
        }
        Ok(frames)
    }

    fn flush(&mut self) -> Result<Vec<EncodedFrame>, StreamError> {
        let Some(format) = self.format else {
            return Ok(Vec::new());
        };
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let len = self.pending.len();
        Ok(vec![self.emit(format, len)])
    }

    fn codec(&self) -> &str {
        "pcm_s16le"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> StreamingConfiguration {
        StreamingConfiguration {
            sample_rate: 8_000,
            channels: 1,
            frame_duration_ms: 10,
            ..Default::default()
        }
    }

    fn buffer(len: usize, value: f32) -> AudioBuffer {
        AudioBuffer {
            samples: vec![value; len],
            sample_rate: 8_000,
            channels: 1,
            timestamp: Duration::ZERO,
        }
    }

    fn configured() -> PcmFrameEncoder {
        let mut encoder = PcmFrameEncoder::new();
        encoder.configure(&config()).unwrap();
        encoder
    }

    #[test]
    fn splits_into_fixed_frames() {
        let mut encoder = configured();
        // 10 ms at 8 kHz = 80 samples per frame
        let frames = encoder.encode(&buffer(200, 0.5)).unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload.len(), 160);
        assert_eq!(frames[0].pts_ms, 0);
        assert_eq!(frames[1].pts_ms, 10);
        assert_eq!(frames[1].sequence, 1);
    }

    #[test]
    fn carries_partial_frame_across_buffers() {
        let mut encoder = configured();
        assert!(encoder.encode(&buffer(50, 0.1)).unwrap().is_empty());
        let frames = encoder.encode(&buffer(50, 0.1)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pts_ms, 0);
    }

    #[test]
    fn flush_drains_partial_frame() {
        let mut encoder = configured();
        encoder.encode(&buffer(120, 0.1)).unwrap();
        let tail = encoder.flush().unwrap();

        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].payload.len(), 80);
        assert_eq!(tail[0].pts_ms, 10);
        assert!(encoder.flush().unwrap().is_empty());
    }

    #[test]
    fn timestamps_strictly_increase() {
        let mut encoder = configured();
        let mut frames = Vec::new();
        for _ in 0..25 {
            frames.extend(encoder.encode(&buffer(147, 0.2)).unwrap());
        }
        frames.extend(encoder.flush().unwrap());

        for pair in frames.windows(2) {
            assert!(pair[1].pts_ms > pair[0].pts_ms);
            assert_eq!(pair[1].sequence, pair[0].sequence + 1);
        }
    }

    #[test]
    fn bad_buffer_is_recoverable() {
        let mut encoder = configured();
        let mut wrong_rate = buffer(80, 0.1);
        wrong_rate.sample_rate = 16_000;
        let err = encoder.encode(&wrong_rate).unwrap_err();
        assert!(matches!(err, StreamError::EncodeFailure(_)));
        assert!(!err.is_fatal());

        let err = encoder.encode(&buffer(80, f32::NAN)).unwrap_err();
        assert!(matches!(err, StreamError::EncodeFailure(_)));

        // The encoder keeps working after rejected buffers.
        assert_eq!(encoder.encode(&buffer(80, 0.1)).unwrap().len(), 1);
    }

    #[test]
    fn unconfigured_encoder_is_a_fault() {
        let mut encoder = PcmFrameEncoder::new();
        let err = encoder.encode(&buffer(80, 0.1)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn configure_resets_timeline() {
        let mut encoder = configured();
        encoder.encode(&buffer(240, 0.1)).unwrap();
        encoder.configure(&config()).unwrap();
        let frames = encoder.encode(&buffer(80, 0.1)).unwrap();
        assert_eq!(frames[0].pts_ms, 0);
        assert_eq!(frames[0].sequence, 0);
    }
}
