//! # audio-streaming-cpal
//!
//! Host backend for audio-streaming-core.
//!
//! Provides:
//! - `CpalMicCapture`: microphone capture via cpal at the device's native format
//! - `DeviceEnumerator`: input device listing and primary/secondary selection
//! - `ProbeAuthorization`: microphone access inferred by probing the device
//! - `create_session`: a `StreamingSession` wired to the microphone, the PCM
//!   encoder and the TCP transport
//!
//! ## Usage
//! ```ignore
//! use audio_streaming_cpal::create_session;
//! use audio_streaming_core::StreamingConfiguration;
//!
//! let session = create_session(StreamingConfiguration::default())?;
//! session.start("rtmp://ingest.example.com/live/key", |ok| println!("started: {}", ok));
//! ```

pub mod authorization;
pub mod cpal_mic;
pub mod device_enumerator;

use std::sync::Arc;

use audio_streaming_core::{
    AuthorizationGate, PcmFrameEncoder, StreamError, StreamingConfiguration, StreamingSession,
    TcpTransport,
};

pub use authorization::ProbeAuthorization;
pub use cpal_mic::CpalMicCapture;
pub use device_enumerator::DeviceEnumerator;

/// Create a session on the primary input device, falling back to the
/// secondary. Fails with `DeviceUnavailable` if the host has neither.
pub fn create_session(configuration: StreamingConfiguration) -> Result<StreamingSession, StreamError> {
    create_session_on(configuration, None)
}

/// Like `create_session`, optionally pinned to an input device by name.
pub fn create_session_on(
    configuration: StreamingConfiguration,
    device: Option<&str>,
) -> Result<StreamingSession, StreamError> {
    let capture = match device {
        Some(name) => CpalMicCapture::with_device(name)?,
        None => CpalMicCapture::default_device()?,
    };
    StreamingSession::new(
        configuration,
        Box::new(capture),
        Box::new(PcmFrameEncoder::new()),
        Box::new(TcpTransport::new()),
        AuthorizationGate::shared(),
    )
}

/// Route the process-wide authorization gate through `ProbeAuthorization`.
///
/// Must run before anything touches `AuthorizationGate::shared()`.
pub fn install_probe_authorization() -> Result<(), StreamError> {
    AuthorizationGate::install_shared(Arc::new(ProbeAuthorization))
}
