use std::time::Duration;

use url::Url;

use crate::models::config::StreamingConfiguration;
use crate::models::audio_models::EncodedFrame;
use crate::models::error::StreamError;

/// Wire protocol boundary to the ingest endpoint.
///
/// A transport is moved onto the transmit channel's network thread and only
/// ever used from there, so every call may block.
pub trait Transport: Send {
    /// Open the connection. Must give up after `timeout`.
    fn connect(
        &mut self,
        endpoint: &Url,
        config: &StreamingConfiguration,
        timeout: Duration,
    ) -> Result<(), StreamError>;

    /// Deliver one frame. Errors are treated as fatal for the connection.
    fn send_frame(&mut self, frame: &EncodedFrame) -> Result<(), StreamError>;

    /// Close the connection. Called at most once per successful connect.
    fn close(&mut self) -> Result<(), StreamError>;
}
