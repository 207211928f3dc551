use std::sync::Arc;

use crate::models::audio_models::AudioDevice;
use crate::models::error::StreamError;

/// Callback invoked when a raw audio buffer is available.
///
/// Parameters:
/// - `samples`: Interleaved f32 samples.
/// - `sample_rate`: The actual sample rate of the delivered audio.
/// - `channels`: Number of interleaved channels.
pub type AudioBufferCallback = Arc<dyn Fn(&[f32], u32, u16) + Send + Sync + 'static>;

/// Callback invoked when the device fails after `start` succeeded
/// (unplugged, access revoked).
pub type CaptureErrorCallback = Arc<dyn Fn(StreamError) + Send + Sync + 'static>;

/// Interface for host audio capture devices.
///
/// Implemented by the cpal microphone backend and by test doubles.
pub trait CaptureSource: Send {
    /// Whether the backing device can currently be opened.
    fn is_available(&self) -> bool;

    /// Start delivering buffers via `on_buffer`.
    ///
    /// The callback fires on a dedicated audio thread and must not block.
    /// Device failures after a successful start are reported through
    /// `on_error` instead of silently ending the buffer flow.
    fn start(
        &mut self,
        on_buffer: AudioBufferCallback,
        on_error: CaptureErrorCallback,
    ) -> Result<(), StreamError>;

    /// Stop capturing and release the device. Safe to call when stopped.
    fn stop(&mut self) -> Result<(), StreamError>;

    fn device_info(&self) -> AudioDevice;
}
