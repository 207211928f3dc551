//! cpal microphone capture source.
//!
//! Opens the selected input device at its native format and delivers f32
//! samples via the `AudioBufferCallback`; the core converts them to the
//! session format.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::bounded;
use parking_lot::Mutex;

use audio_streaming_core::models::audio_models::AudioDevice;
use audio_streaming_core::models::error::StreamError;
use audio_streaming_core::traits::capture_source::{AudioBufferCallback, CaptureErrorCallback, CaptureSource};

use crate::device_enumerator::{DeviceEnumerator, SelectedDevice};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Microphone capture through cpal.
///
/// The cpal stream lives on a dedicated thread for its whole life, since
/// streams are not `Send` on every host.
pub struct CpalMicCapture {
    info: AudioDevice,
    running: Arc<AtomicBool>,
    capture_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl CpalMicCapture {
    /// Capture from the primary input device, falling back to the secondary.
    pub fn default_device() -> Result<Self, StreamError> {
        let selected = DeviceEnumerator::new().select()?;
        Ok(Self::from_selected(selected))
    }

    /// Capture from a specific input device by name.
    pub fn with_device(name: &str) -> Result<Self, StreamError> {
        let selected = DeviceEnumerator::new().find(name)?;
        Ok(Self::from_selected(selected))
    }

    fn from_selected(selected: SelectedDevice) -> Self {
        Self {
            info: selected.info,
            running: Arc::new(AtomicBool::new(false)),
            capture_handle: Mutex::new(None),
        }
    }
}

impl CaptureSource for CpalMicCapture {
    fn is_available(&self) -> bool {
        DeviceEnumerator::new().find(&self.info.name).is_ok()
    }

    fn start(&mut self, on_buffer: AudioBufferCallback, on_error: CaptureErrorCallback) -> Result<(), StreamError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(StreamError::ConfigurationFailed("mic capture already running".into()));
        }

        let running = Arc::clone(&self.running);
        let device_name = self.info.name.clone();
        let (ready_tx, ready_rx) = bounded::<Result<(), StreamError>>(1);

        let spawned = thread::Builder::new()
            .name("cpal-mic-capture".into())
            .spawn(move || {
                let stream = match open_stream(&device_name, on_buffer, on_error) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };

                while running.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(20));
                }
                drop(stream);
                log::debug!("Mic capture thread exiting");
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(StreamError::ConfigurationFailed(format!(
                    "failed to spawn mic thread: {}",
                    e
                )));
            }
        };

        let ready = ready_rx
            .recv_timeout(STARTUP_TIMEOUT)
            .unwrap_or(Err(StreamError::Timeout));
        if let Err(e) = ready {
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        *self.capture_handle.lock() = Some(handle);
        log::info!("Mic capture started on '{}'", self.info.name);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_handle.lock().take() {
            if handle.join().is_err() {
                log::error!("Mic capture thread panicked");
            }
        }
        Ok(())
    }

    fn device_info(&self) -> AudioDevice {
        self.info.clone()
    }
}

impl Drop for CpalMicCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Open and start an input stream at the device's native configuration.
fn open_stream(
    device_name: &str,
    on_buffer: AudioBufferCallback,
    on_error: CaptureErrorCallback,
) -> Result<cpal::Stream, StreamError> {
    let SelectedDevice { device, .. } = DeviceEnumerator::new().find(device_name)?;

    let default_config = device.default_input_config().map_err(|e| {
        StreamError::ConfigurationFailed(format!("failed to query default input config: {}", e))
    })?;
    let sample_rate = u32::from(default_config.sample_rate());
    let channels = default_config.channels();
    let sample_format = default_config.sample_format();
    let stream_config: cpal::StreamConfig = default_config.into();

    log::info!(
        "Opening '{}' at native format {} Hz, {} ch, {:?}",
        device_name,
        sample_rate,
        channels,
        sample_format
    );

    let err_callback = move |err: cpal::StreamError| match err {
        cpal::StreamError::DeviceNotAvailable => {
            log::error!("Input device disconnected");
            on_error(StreamError::DeviceUnavailable);
        }
        other => log::warn!("Audio stream error: {}", other),
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                on_buffer(data, sample_rate, channels);
            },
            err_callback,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                on_buffer(&samples, sample_rate, channels);
            },
            err_callback,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data
                    .iter()
                    .map(|&s| (s as f32 - 32_768.0) / 32_768.0)
                    .collect();
                on_buffer(&samples, sample_rate, channels);
            },
            err_callback,
            None,
        ),
        other => {
            return Err(StreamError::ConfigurationFailed(format!(
                "unsupported native sample format: {:?}",
                other
            )))
        }
    }
    .map_err(|e| StreamError::ConfigurationFailed(format!("failed to build input stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| StreamError::ConfigurationFailed(format!("failed to start input stream: {}", e)))?;
    Ok(stream)
}
