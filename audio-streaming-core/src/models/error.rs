use thiserror::Error;

/// Errors that can occur while streaming.
///
/// Never raised across the session boundary: the session surfaces them
/// through the `Error` state, the start completion and `last_error()`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("microphone access denied")]
    AuthorizationDenied,

    #[error("no capture device available")]
    DeviceUnavailable,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("transmit failed: {0}")]
    TransmitFailed(String),

    /// A single buffer could not be encoded; the pipeline keeps running.
    #[error("encode failed: {0}")]
    EncodeFailure(String),

    /// The encoder itself is broken; the stream cannot continue.
    #[error("encoder fault: {0}")]
    EncoderFault(String),

    #[error("connection attempt already in progress")]
    Busy,

    #[error("outbound queue full")]
    Backpressure,

    #[error("not connected")]
    NotConnected,

    #[error("invalid ingest url: {0}")]
    InvalidUrl(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("timeout")]
    Timeout,
}

impl StreamError {
    /// Errors that end the current stream rather than a single buffer/frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::EncodeFailure(_) | Self::Backpressure)
    }
}
