use std::io::Write;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use url::Url;

use crate::models::audio_models::EncodedFrame;
use crate::models::config::StreamingConfiguration;
use crate::models::error::StreamError;
use crate::traits::transport::Transport;

/// Stream header magic.
pub const STREAM_MAGIC: &[u8; 4] = b"LAS1";

const DEFAULT_RTMP_PORT: u16 = 1935;
const DEFAULT_RTMPS_PORT: u16 = 443;

/// Parse and check an ingest URL.
///
/// Accepts `rtmp`, `rtmps` and `tcp` URLs with a host. `tcp` needs an
/// explicit port.
pub fn parse_endpoint(url: &str) -> Result<Url, StreamError> {
    let endpoint = Url::parse(url).map_err(|e| StreamError::InvalidUrl(format!("{}: {}", url, e)))?;
    if !matches!(endpoint.scheme(), "rtmp" | "rtmps" | "tcp") {
        return Err(StreamError::InvalidUrl(format!(
            "unsupported scheme: {}",
            endpoint.scheme()
        )));
    }
    if endpoint.host_str().map_or(true, str::is_empty) {
        return Err(StreamError::InvalidUrl("missing host".into()));
    }
    if endpoint.scheme() == "tcp" && endpoint.port().is_none() {
        return Err(StreamError::InvalidUrl("tcp endpoint needs a port".into()));
    }
    Ok(endpoint)
}

fn endpoint_port(endpoint: &Url) -> Result<u16, StreamError> {
    match (endpoint.port(), endpoint.scheme()) {
        (Some(port), _) => Ok(port),
        (None, "rtmp") => Ok(DEFAULT_RTMP_PORT),
        (None, "rtmps") => Ok(DEFAULT_RTMPS_PORT),
        (None, scheme) => Err(StreamError::InvalidUrl(format!("no default port for {}", scheme))),
    }
}

/// Length-prefixed framing over plain TCP.
///
/// ## Wire format
///
/// ```text
/// Header (once per connection):
/// [4]  "LAS1"
/// [4]  sample rate (BE u32)
/// [2]  channels (BE u16)
/// [2]  stream path length (BE u16)
/// [n]  stream path (UTF-8, leading '/' stripped)
///
/// Frame (repeated):
/// [4]  payload length (BE u32)
/// [8]  presentation timestamp, ms (BE u64)
/// [n]  payload
/// ```
///
/// Does not speak the RTMP handshake or chunk protocol; an `rtmp://` URL only
/// selects host, default port and stream path.
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    write_timeout: Duration,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::with_write_timeout(Duration::from_secs(5))
    }

    /// A write blocked longer than `write_timeout` fails the connection.
    pub fn with_write_timeout(write_timeout: Duration) -> Self {
        Self {
            stream: None,
            write_timeout,
        }
    }

    fn open(endpoint: &Url, timeout: Duration) -> Result<TcpStream, StreamError> {
        let host = endpoint
            .host_str()
            .ok_or_else(|| StreamError::InvalidUrl("missing host".into()))?;
        let port = endpoint_port(endpoint)?;
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| StreamError::ConnectFailed(format!("failed to resolve {}: {}", host, e)))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    last_error = Some(StreamError::Timeout);
                }
                Err(e) => last_error = Some(StreamError::ConnectFailed(format!("{}: {}", addr, e))),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            StreamError::ConnectFailed(format!("{} resolved to no addresses", host))
        }))
    }

    fn header(endpoint: &Url, config: &StreamingConfiguration) -> Result<Vec<u8>, StreamError> {
        let path = endpoint.path().trim_start_matches('/');
        let path_len = u16::try_from(path.len())
            .map_err(|_| StreamError::InvalidUrl("stream path too long".into()))?;

        let mut header = Vec::with_capacity(12 + path.len());
        header.extend_from_slice(STREAM_MAGIC);
        header.extend_from_slice(&config.sample_rate.to_be_bytes());
        header.extend_from_slice(&config.channels.to_be_bytes());
        header.extend_from_slice(&path_len.to_be_bytes());
        header.extend_from_slice(path.as_bytes());
        Ok(header)
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    fn connect(
        &mut self,
        endpoint: &Url,
        config: &StreamingConfiguration,
        timeout: Duration,
    ) -> Result<(), StreamError> {
        let mut stream = Self::open(endpoint, timeout)?;
        let io_err = |e: std::io::Error| StreamError::ConnectFailed(e.to_string());
        stream.set_nodelay(true).map_err(io_err)?;
        stream.set_write_timeout(Some(self.write_timeout)).map_err(io_err)?;
        stream
            .write_all(&Self::header(endpoint, config)?)
            .map_err(io_err)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn send_frame(&mut self, frame: &EncodedFrame) -> Result<(), StreamError> {
        let stream = self.stream.as_mut().ok_or(StreamError::NotConnected)?;
        let length = u32::try_from(frame.payload.len())
            .map_err(|_| StreamError::TransmitFailed("frame too large".into()))?;

        let mut packet = Vec::with_capacity(12 + frame.payload.len());
        packet.extend_from_slice(&length.to_be_bytes());
        packet.extend_from_slice(&frame.pts_ms.to_be_bytes());
        packet.extend_from_slice(&frame.payload);
        stream
            .write_all(&packet)
            .map_err(|e| StreamError::TransmitFailed(e.to_string()))
    }

    fn close(&mut self) -> Result<(), StreamError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        let flushed = stream.flush();
        let _ = stream.shutdown(Shutdown::Both);
        flushed.map_err(|e| StreamError::TransmitFailed(e.to_string()))
    }
}
