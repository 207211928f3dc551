use crate::models::audio_models::{AudioBuffer, EncodedFrame};
use crate::models::config::StreamingConfiguration;
use crate::models::error::StreamError;

/// Audio codec boundary.
///
/// Buffers are fed in capture order; frames come out in the same order with
/// strictly increasing presentation timestamps. The encoder may hold a
/// partial frame between calls.
///
/// Errors:
/// - `EncodeFailure`: this buffer is dropped, the stream continues.
/// - any other error: the encoder is unusable and the stream ends.
pub trait AudioEncoder: Send {
    /// Prepare for a new stream. Resets timestamps and internal buffering.
    fn configure(&mut self, config: &StreamingConfiguration) -> Result<(), StreamError>;

    fn encode(&mut self, buffer: &AudioBuffer) -> Result<Vec<EncodedFrame>, StreamError>;

    /// Drain any buffered partial frame before shutdown.
    fn flush(&mut self) -> Result<Vec<EncodedFrame>, StreamError>;

    /// Codec identifier (e.g., "pcm_s16le").
    fn codec(&self) -> &str;
}
