//! # audio-streaming-core
//!
//! Platform-agnostic live audio streaming core.
//!
//! Turns a capture callback into a time-ordered, encoded, network-delivered
//! stream and reports the connection lifecycle through a single state
//! machine. Host backends implement `CaptureSource` (and optionally
//! `AuthorizationProvider`) and plug into the generic `StreamingSession`.
//!
//! ## Architecture
//!
//! ```text
//! audio-streaming-core (this crate)
//! ├── traits/       ← CaptureSource, AudioEncoder, Transport, AuthorizationProvider, StreamingDelegate
//! ├── models/       ← StreamError, StreamState, StreamingConfiguration, AuthorizationStatus, etc.
//! ├── processing/   ← FormatConverter, PcmFrameEncoder
//! ├── transmit/     ← TransmitChannel (network thread), TcpTransport
//! └── session/      ← StreamingSession (controller), AuthorizationGate, Notifier, Pipeline
//! ```
//!
//! ## Data flow
//!
//! ```text
//! [CaptureSource] → FormatConverter → [buffer queue] → [AudioEncoder] → [frame queue] → [Transport]
//!   audio thread       mute/timestamp    drop-oldest     encode thread     drop-newest    network thread
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod traits;
pub mod transmit;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{AudioBuffer, AudioDevice, DeviceRole, EncodedFrame, SessionDiagnostics};
pub use models::authorization::AuthorizationStatus;
pub use models::config::StreamingConfiguration;
pub use models::error::StreamError;
pub use models::state::StreamState;
pub use processing::format_converter::FormatConverter;
pub use processing::pcm_encoder::PcmFrameEncoder;
pub use session::authorization_gate::{AuthorizationGate, StatusListener};
pub use session::streaming_session::StreamingSession;
pub use traits::audio_encoder::AudioEncoder;
pub use traits::authorization_provider::{AuthorizationProvider, HostGranted};
pub use traits::capture_source::{AudioBufferCallback, CaptureErrorCallback, CaptureSource};
pub use traits::stream_delegate::StreamingDelegate;
pub use traits::transport::Transport;
pub use transmit::channel::{ChannelEvent, ChannelState, ChannelStats, TransmitChannel};
pub use transmit::tcp::{parse_endpoint, TcpTransport};
