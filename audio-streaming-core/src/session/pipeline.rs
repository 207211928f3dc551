use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;

use crate::models::audio_models::{AudioBuffer, EncodedFrame};
use crate::models::config::StreamingConfiguration;
use crate::models::error::StreamError;
use crate::processing::format_converter::FormatConverter;
use crate::traits::audio_encoder::AudioEncoder;
use crate::traits::capture_source::{AudioBufferCallback, CaptureErrorCallback, CaptureSource};
use crate::transmit::channel::TransmitChannel;

/// Callback for errors that end the stream (capture device lost, encoder fault).
pub type PipelineFailureCallback = Arc<dyn Fn(StreamError) + Send + Sync + 'static>;

/// Counters shared between the capture callback, encode thread and session.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub buffers_captured: AtomicU64,
    pub buffers_dropped: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub encode_failures: AtomicU64,
}

impl PipelineCounters {
    pub fn reset(&self) {
        self.buffers_captured.store(0, Ordering::Relaxed);
        self.buffers_dropped.store(0, Ordering::Relaxed);
        self.frames_encoded.store(0, Ordering::Relaxed);
        self.encode_failures.store(0, Ordering::Relaxed);
    }
}

/// Capture → encode → transmit data path for one stream.
///
/// ```text
/// [CaptureSource] → convert/mute → [bounded buffer queue] → [encode thread] → TransmitChannel::send
///   audio thread       (drop-oldest when full)                 (preserves order)
/// ```
///
/// The capture callback never blocks: when the encoder falls behind, the
/// oldest queued buffer is discarded to make room.
pub struct Pipeline {
    running: Arc<AtomicBool>,
    encode_handle: Option<thread::JoinHandle<()>>,
}

pub struct PipelineParts<'a> {
    pub capture: &'a mut dyn CaptureSource,
    pub encoder: Arc<Mutex<Box<dyn AudioEncoder>>>,
    pub channel: Arc<TransmitChannel>,
    pub config: &'a StreamingConfiguration,
    pub muted: Arc<AtomicBool>,
    pub counters: Arc<PipelineCounters>,
    pub on_failure: PipelineFailureCallback,
}

impl Pipeline {
    /// Configure the encoder, spawn the encode thread and start capture.
    pub fn start(parts: PipelineParts<'_>) -> Result<Self, StreamError> {
        let PipelineParts {
            capture,
            encoder,
            channel,
            config,
            muted,
            counters,
            on_failure,
        } = parts;

        {
            let mut encoder = encoder.lock();
            encoder.configure(config)?;
            log::debug!("Encoder configured: {}", encoder.codec());
        }
        counters.reset();

        let (buffer_tx, buffer_rx) = bounded::<AudioBuffer>(config.capture_queue_capacity);
        let running = Arc::new(AtomicBool::new(true));

        let encode_handle = {
            let running = Arc::clone(&running);
            let counters = Arc::clone(&counters);
            let on_failure = Arc::clone(&on_failure);
            let buffer_rx = buffer_rx.clone();
            thread::Builder::new()
                .name("audio-encode".into())
                .spawn(move || encode_loop(buffer_rx, encoder, channel, running, counters, on_failure))
                .map_err(|e| StreamError::EncoderFault(format!("failed to spawn encode thread: {}", e)))?
        };

        let mut pipeline = Self {
            running,
            encode_handle: Some(encode_handle),
        };

        let on_buffer = capture_callback(config, buffer_tx, buffer_rx, muted, counters);
        let on_error: CaptureErrorCallback = Arc::new(move |error| {
            log::error!("Capture failed: {}", error);
            on_failure(error);
        });

        if let Err(e) = capture.start(on_buffer, on_error) {
            pipeline.shutdown_encoder();
            return Err(e);
        }
        log::info!(
            "Pipeline started: {} Hz, {} ch, {} ms frames",
            config.sample_rate,
            config.channels,
            config.frame_duration_ms
        );
        Ok(pipeline)
    }

    /// Stop capture, then let the encoder drain and flush into the channel.
    pub fn stop(mut self, capture: &mut dyn CaptureSource) {
        if let Err(e) = capture.stop() {
            log::warn!("Error stopping capture: {}", e);
        }
        self.shutdown_encoder();
        log::info!("Pipeline stopped");
    }

    fn shutdown_encoder(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.encode_handle.take() {
            // A fatal error reported from the encode thread may lead here
            // through a synchronous callback; it exits on its own.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("Encode thread panicked");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown_encoder();
    }
}

/// Build the real-time capture callback: convert, mute, timestamp, enqueue.
fn capture_callback(
    config: &StreamingConfiguration,
    buffer_tx: Sender<AudioBuffer>,
    buffer_rx: Receiver<AudioBuffer>,
    muted: Arc<AtomicBool>,
    counters: Arc<PipelineCounters>,
) -> AudioBufferCallback {
    let (sample_rate, channels) = (config.sample_rate, config.channels);
    let converter = Mutex::new(FormatConverter::new(sample_rate, channels));
    let frames_captured = AtomicU64::new(0);

    Arc::new(move |samples: &[f32], source_rate: u32, source_channels: u16| {
        let converted = converter.lock().convert(samples, source_rate, source_channels);
        if converted.is_empty() {
            return;
        }

        let frame_count = (converted.len() / channels as usize) as u64;
        let position = frames_captured.fetch_add(frame_count, Ordering::Relaxed);
        let timestamp = Duration::from_secs_f64(position as f64 / sample_rate as f64);

        let buffer = AudioBuffer {
            samples: converted,
            sample_rate,
            channels,
            timestamp,
        };
        // Muting substitutes silence of the same length so cadence and
        // timestamps downstream are unaffected.
        let buffer = if muted.load(Ordering::Relaxed) {
            buffer.silenced()
        } else {
            buffer
        };
        counters.buffers_captured.fetch_add(1, Ordering::Relaxed);

        match buffer_tx.try_send(buffer) {
            Ok(()) => {}
            Err(TrySendError::Full(buffer)) => {
                let _ = buffer_rx.try_recv();
                let dropped = counters.buffers_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 100 == 0 {
                    log::warn!("Encoder falling behind, dropped {} capture buffers", dropped);
                }
                let _ = buffer_tx.try_send(buffer);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    })
}

fn encode_loop(
    buffers: Receiver<AudioBuffer>,
    encoder: Arc<Mutex<Box<dyn AudioEncoder>>>,
    channel: Arc<TransmitChannel>,
    running: Arc<AtomicBool>,
    counters: Arc<PipelineCounters>,
    on_failure: PipelineFailureCallback,
) {
    let mut encoder = encoder.lock();

    let forward = |frames: Vec<EncodedFrame>, counters: &PipelineCounters| {
        counters
            .frames_encoded
            .fetch_add(frames.len() as u64, Ordering::Relaxed);
        for frame in frames {
            // Backpressure and disconnects are accounted for by the channel.
            let _ = channel.send(frame);
        }
    };

    let encode = |buffer: AudioBuffer, encoder: &mut Box<dyn AudioEncoder>| -> bool {
        match encoder.encode(&buffer) {
            Ok(frames) => {
                forward(frames, &counters);
                true
            }
            Err(error) if !error.is_fatal() => {
                let failures = counters.encode_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures == 1 || failures % 100 == 0 {
                    log::warn!("Dropped unencodable buffer ({} so far): {}", failures, error);
                }
                true
            }
            Err(error) => {
                log::error!("Encoder fault: {}", error);
                on_failure(error);
                false
            }
        }
    };

    while running.load(Ordering::SeqCst) {
        match buffers.recv_timeout(Duration::from_millis(50)) {
            Ok(buffer) => {
                if !encode(buffer, &mut *encoder) {
                    return;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Capture has stopped; drain what it left behind, then flush.
    while let Ok(buffer) = buffers.try_recv() {
        if !encode(buffer, &mut *encoder) {
            return;
        }
    }
    match encoder.flush() {
        Ok(frames) => forward(frames, &counters),
        Err(e) => log::warn!("Encoder flush failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_converts_and_timestamps() {
        let config = StreamingConfiguration {
            sample_rate: 8_000,
            channels: 1,
            ..Default::default()
        };
        let (tx, rx) = bounded(8);
        let counters = Arc::new(PipelineCounters::default());
        let callback = capture_callback(&config, tx, rx.clone(), Arc::new(AtomicBool::new(false)), counters);

        // Stereo device at the target rate: 80 frames = 10 ms.
        callback(&[0.5; 160], 8_000, 2);
        callback(&[0.5; 160], 8_000, 2);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.channels, 1);
        assert_eq!(first.samples.len(), 80);
        assert_eq!(first.timestamp, Duration::ZERO);
        assert_eq!(second.timestamp, Duration::from_millis(10));
    }

    #[test]
    fn resampled_callbacks_keep_pace_with_the_device() {
        // 48 kHz device, 512-frame callbacks, default 44.1 kHz session: one
        // second of input must yield one second of output.
        let config = StreamingConfiguration::default();
        let (tx, rx) = bounded(256);
        let counters = Arc::new(PipelineCounters::default());
        let callback = capture_callback(&config, tx, rx.clone(), Arc::new(AtomicBool::new(false)), counters);

        let mut produced = 0;
        let mut last = None;
        for _ in 0..(48_000 * 4 / 512) {
            callback(&[0.2; 512], 48_000, 1);
            for buffer in rx.try_iter() {
                if let Some(previous) = last.replace(buffer.timestamp) {
                    assert!(buffer.timestamp > previous);
                }
                produced += buffer.frame_count();
            }
        }
        // 375 callbacks = 4 s of input; only the final carried frame is pending.
        assert_eq!(produced, 4 * 44_100);
    }

    #[test]
    fn muted_callback_emits_silence_with_same_cadence() {
        let config = StreamingConfiguration {
            sample_rate: 8_000,
            channels: 1,
            ..Default::default()
        };
        let (tx, rx) = bounded(8);
        let muted = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(PipelineCounters::default());
        let callback = capture_callback(&config, tx, rx.clone(), Arc::clone(&muted), counters);

        callback(&[0.3; 80], 8_000, 1);
        muted.store(true, Ordering::SeqCst);
        callback(&[0.3; 80], 8_000, 1);
        muted.store(false, Ordering::SeqCst);
        callback(&[0.3; 80], 8_000, 1);

        let buffers: Vec<_> = rx.try_iter().collect();
        assert_eq!(buffers.len(), 3);
        assert!(!buffers[0].is_silent());
        assert!(buffers[1].is_silent());
        assert_eq!(buffers[1].samples.len(), 80);
        assert!(!buffers[2].is_silent());
        assert_eq!(buffers[2].timestamp, Duration::from_millis(20));
    }

    #[test]
    fn full_queue_drops_oldest() {
        let config = StreamingConfiguration {
            sample_rate: 8_000,
            channels: 1,
            ..Default::default()
        };
        let (tx, rx) = bounded(2);
        let counters = Arc::new(PipelineCounters::default());
        let callback = capture_callback(
            &config,
            tx,
            rx.clone(),
            Arc::new(AtomicBool::new(false)),
            Arc::clone(&counters),
        );

        for _ in 0..4 {
            callback(&[0.1; 80], 8_000, 1);
        }

        let kept: Vec<_> = rx.try_iter().map(|b| b.timestamp).collect();
        assert_eq!(kept, vec![Duration::from_millis(20), Duration::from_millis(30)]);
        assert_eq!(counters.buffers_dropped.load(Ordering::Relaxed), 2);
        assert_eq!(counters.buffers_captured.load(Ordering::Relaxed), 4);
    }
}
