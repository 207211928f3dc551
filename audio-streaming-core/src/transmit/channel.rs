use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, never, select, unbounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use url::Url;

use crate::models::audio_models::EncodedFrame;
use crate::models::config::StreamingConfiguration;
use crate::models::error::StreamError;
use crate::traits::transport::Transport;

/// Lifecycle events reported by the channel's network thread.
///
/// `attempt` identifies the `connect` call the event belongs to, so a
/// controller can discard events from attempts it already gave up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected { attempt: u64 },
    ConnectFailed { attempt: u64, error: StreamError },
    /// Fatal transport failure after a successful connect. Reported once.
    Failed { attempt: u64, error: StreamError },
    Disconnected { attempt: u64 },
}

pub type ChannelEventCallback = Arc<dyn Fn(ChannelEvent) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Connected,
    Closing,
    Failed,
}

/// Delivery counters for the current connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub bytes_sent: u64,
}

enum Command {
    Connect {
        endpoint: Url,
        config: StreamingConfiguration,
        timeout: Duration,
        attempt: u64,
        frames: Receiver<EncodedFrame>,
    },
    Disconnect {
        timeout: Duration,
        attempt: u64,
    },
    /// Close after a failure detected off the network thread.
    Abort,
    Shutdown,
}

struct ChannelShared {
    state: Mutex<ChannelState>,
    attempt: AtomicU64,
    failure_reported: AtomicBool,
    consecutive_drops: AtomicU32,
    max_consecutive_drops: AtomicU32,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    bytes_sent: AtomicU64,
    on_event: ChannelEventCallback,
}

impl ChannelShared {
    fn set_state(&self, state: ChannelState) {
        *self.state.lock() = state;
    }

    /// Mark the connection failed and report it, at most once per attempt.
    fn fail(&self, error: StreamError) -> bool {
        {
            let mut state = self.state.lock();
            if !matches!(*state, ChannelState::Connected | ChannelState::Closing) {
                return false;
            }
            *state = ChannelState::Failed;
        }
        if self.failure_reported.swap(true, Ordering::SeqCst) {
            return false;
        }
        log::error!("Transmit channel failed: {}", error);
        (self.on_event)(ChannelEvent::Failed {
            attempt: self.attempt.load(Ordering::SeqCst),
            error,
        });
        true
    }
}

/// Owns the single persistent connection to the ingest endpoint.
///
/// Frames are queued on a bounded queue and written by a dedicated network
/// thread. When the queue is full the newest frame is dropped and
/// `Backpressure` returned; after `max_backpressure_drops` consecutive drops
/// the connection is declared failed.
///
/// ```text
/// [encoder] ──send()──→ [bounded frame queue] ──→ [network thread] ──→ Transport
///                                                       ↑
/// connect() / disconnect() ──→ [command queue] ─────────┘
/// ```
pub struct TransmitChannel {
    shared: Arc<ChannelShared>,
    commands: Sender<Command>,
    frames: Mutex<Option<Sender<EncodedFrame>>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl TransmitChannel {
    pub fn new(transport: Box<dyn Transport>, on_event: ChannelEventCallback) -> Result<Self, StreamError> {
        let shared = Arc::new(ChannelShared {
            state: Mutex::new(ChannelState::Idle),
            attempt: AtomicU64::new(0),
            failure_reported: AtomicBool::new(false),
            consecutive_drops: AtomicU32::new(0),
            max_consecutive_drops: AtomicU32::new(u32::MAX),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            on_event,
        });

        let (commands, command_rx) = unbounded();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("transmit-channel".into())
            .spawn(move || NetworkWorker::new(transport, worker_shared).run(command_rx))
            .map_err(|e| StreamError::ConnectFailed(format!("failed to spawn network thread: {}", e)))?;

        Ok(Self {
            shared,
            commands,
            frames: Mutex::new(None),
            worker: Some(worker),
        })
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.lock()
    }

    /// Begin exactly one connection attempt. The outcome arrives as a
    /// `Connected` or `ConnectFailed` event carrying the returned attempt id.
    ///
    /// Fails with `Busy` while another attempt or connection is active. A
    /// connection that is still closing does not block: the new attempt runs
    /// on the network thread once the close has finished.
    pub fn connect(&self, endpoint: Url, config: &StreamingConfiguration) -> Result<u64, StreamError> {
        {
            let mut state = self.shared.state.lock();
            if matches!(*state, ChannelState::Connecting | ChannelState::Connected) {
                return Err(StreamError::Busy);
            }
            *state = ChannelState::Connecting;
        }

        let attempt = self.shared.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.failure_reported.store(false, Ordering::SeqCst);
        self.shared.consecutive_drops.store(0, Ordering::SeqCst);
        self.shared
            .max_consecutive_drops
            .store(config.max_backpressure_drops, Ordering::SeqCst);

        let (frame_tx, frame_rx) = bounded(config.transmit_queue_capacity);
        *self.frames.lock() = Some(frame_tx);

        let command = Command::Connect {
            endpoint,
            config: config.clone(),
            timeout: config.connect_timeout(),
            attempt,
            frames: frame_rx,
        };
        if self.commands.send(command).is_err() {
            self.shared.set_state(ChannelState::Idle);
            return Err(StreamError::ConnectFailed("network thread has exited".into()));
        }
        Ok(attempt)
    }

    /// Queue one frame for delivery without blocking.
    ///
    /// Frames are ignored (`NotConnected`) unless the channel is connected.
    pub fn send(&self, frame: EncodedFrame) -> Result<(), StreamError> {
        if self.state() != ChannelState::Connected {
            return Err(StreamError::NotConnected);
        }
        let frames = self.frames.lock();
        let Some(sender) = frames.as_ref() else {
            return Err(StreamError::NotConnected);
        };

        match sender.try_send(frame) {
            Ok(()) => {
                self.shared.consecutive_drops.store(0, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                drop(frames);
                self.record_drop();
                Err(StreamError::Backpressure)
            }
            Err(TrySendError::Disconnected(_)) => Err(StreamError::NotConnected),
        }
    }

    /// Close the connection, flushing queued frames for up to `timeout`.
    ///
    /// Always ends with a `Disconnected` event, whatever the current state.
    pub fn disconnect(&self, timeout: Duration) {
        *self.frames.lock() = None;
        {
            let mut state = self.shared.state.lock();
            if *state == ChannelState::Connected {
                *state = ChannelState::Closing;
            }
        }
        let attempt = self.shared.attempt.load(Ordering::SeqCst);
        if self.commands.send(Command::Disconnect { timeout, attempt }).is_err() {
            log::warn!("Transmit channel already shut down");
        }
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            frames_sent: self.shared.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.shared.frames_dropped.load(Ordering::Relaxed),
            bytes_sent: self.shared.bytes_sent.load(Ordering::Relaxed),
        }
    }

    fn record_drop(&self) {
        let dropped = self.shared.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        let consecutive = self.shared.consecutive_drops.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped == 1 || dropped % 50 == 0 {
            log::warn!(
                "Outbound queue full, dropped {} frames ({} consecutive)",
                dropped,
                consecutive
            );
        }

        let limit = self.shared.max_consecutive_drops.load(Ordering::Relaxed);
        if consecutive >= limit {
            let error = StreamError::TransmitFailed(format!(
                "network too slow: {} consecutive frames dropped",
                consecutive
            ));
            if self.shared.fail(error) {
                *self.frames.lock() = None;
                let _ = self.commands.send(Command::Abort);
            }
        }
    }
}

impl Drop for TransmitChannel {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Transmit channel thread panicked");
            }
        }
    }
}

/// State owned by the network thread.
struct NetworkWorker {
    transport: Box<dyn Transport>,
    shared: Arc<ChannelShared>,
    frames: Option<Receiver<EncodedFrame>>,
    /// The transport has an open connection that still needs `close`.
    open: bool,
}

impl NetworkWorker {
    fn new(transport: Box<dyn Transport>, shared: Arc<ChannelShared>) -> Self {
        Self {
            transport,
            shared,
            frames: None,
            open: false,
        }
    }

    fn run(mut self, commands: Receiver<Command>) {
        loop {
            let frames = self.frames.clone().unwrap_or_else(never);
            select! {
                recv(commands) -> command => match command {
                    Ok(Command::Connect { endpoint, config, timeout, attempt, frames }) => {
                        self.connect(&endpoint, &config, timeout, attempt, frames);
                    }
                    Ok(Command::Disconnect { timeout, attempt }) => self.disconnect(timeout, attempt),
                    Ok(Command::Abort) => self.close(),
                    Ok(Command::Shutdown) | Err(_) => {
                        self.close();
                        return;
                    }
                },
                recv(frames) -> frame => match frame {
                    Ok(frame) => self.deliver(&frame),
                    Err(_) => self.frames = None,
                },
            }
        }
    }

    fn connect(
        &mut self,
        endpoint: &Url,
        config: &StreamingConfiguration,
        timeout: Duration,
        attempt: u64,
        frames: Receiver<EncodedFrame>,
    ) {
        log::info!("Connecting to {} (attempt {})", redact(endpoint), attempt);
        self.shared.frames_sent.store(0, Ordering::SeqCst);
        self.shared.frames_dropped.store(0, Ordering::SeqCst);
        self.shared.bytes_sent.store(0, Ordering::SeqCst);
        match self.transport.connect(endpoint, config, timeout) {
            Ok(()) => {
                self.open = true;
                self.frames = Some(frames);
                self.shared.set_state(ChannelState::Connected);
                log::info!("Connected to {}", redact(endpoint));
                (self.shared.on_event)(ChannelEvent::Connected { attempt });
            }
            Err(error) => {
                self.shared.set_state(ChannelState::Idle);
                log::warn!("Connect to {} failed: {}", redact(endpoint), error);
                (self.shared.on_event)(ChannelEvent::ConnectFailed { attempt, error });
            }
        }
    }

    fn deliver(&mut self, frame: &EncodedFrame) {
        if !self.open {
            return;
        }
        if *self.shared.state.lock() == ChannelState::Failed {
            self.close();
            return;
        }
        match self.transport.send_frame(frame) {
            Ok(()) => {
                self.shared.frames_sent.fetch_add(1, Ordering::Relaxed);
                self.shared
                    .bytes_sent
                    .fetch_add(frame.payload.len() as u64, Ordering::Relaxed);
            }
            Err(error) => {
                let error = match error {
                    StreamError::TransmitFailed(_) => error,
                    other => StreamError::TransmitFailed(other.to_string()),
                };
                self.shared.fail(error);
                self.close();
            }
        }
    }

    fn disconnect(&mut self, timeout: Duration, attempt: u64) {
        if self.open {
            self.flush(timeout);
        }
        self.close();
        {
            // A newer attempt may already be queued behind this disconnect.
            let mut state = self.shared.state.lock();
            if *state != ChannelState::Connecting {
                *state = ChannelState::Idle;
            }
        }
        (self.shared.on_event)(ChannelEvent::Disconnected { attempt });
    }

    /// Deliver what is already queued; whatever remains at the deadline is discarded.
    fn flush(&mut self, timeout: Duration) {
        let Some(frames) = self.frames.take() else {
            return;
        };
        let deadline = Instant::now() + timeout;
        let mut discarded = 0usize;
        while let Ok(frame) = frames.try_recv() {
            if self.open && Instant::now() < deadline {
                self.deliver(&frame);
            } else {
                discarded += 1;
            }
        }
        if discarded > 0 {
            self.shared
                .frames_dropped
                .fetch_add(discarded as u64, Ordering::Relaxed);
            log::warn!("Discarded {} queued frames on disconnect", discarded);
        }
    }

    fn close(&mut self) {
        self.frames = None;
        if std::mem::take(&mut self.open) {
            if let Err(e) = self.transport.close() {
                log::warn!("Error closing transport: {}", e);
            }
        }
    }
}

/// Endpoint for logging: stream keys usually live in the path, so drop it.
fn redact(endpoint: &Url) -> String {
    match endpoint.port() {
        Some(port) => format!("{}://{}:{}/…", endpoint.scheme(), endpoint.host_str().unwrap_or(""), port),
        None => format!("{}://{}/…", endpoint.scheme(), endpoint.host_str().unwrap_or("")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    /// Transport whose behaviour is scripted per test.
    #[derive(Clone, Default)]
    struct ScriptedTransport {
        connect_error: Option<StreamError>,
        fail_after: Option<usize>,
        send_delay: Duration,
        close_delay: Duration,
        sent: Arc<Mutex<Vec<u64>>>,
        connects: Arc<AtomicU32>,
        closes: Arc<AtomicU32>,
    }

    impl Transport for ScriptedTransport {
        fn connect(&mut self, _: &Url, _: &StreamingConfiguration, _: Duration) -> Result<(), StreamError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
            match &self.connect_error {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            }
        }

        fn send_frame(&mut self, frame: &EncodedFrame) -> Result<(), StreamError> {
            thread::sleep(self.send_delay);
            let mut sent = self.sent.lock();
            if self.fail_after.is_some_and(|limit| sent.len() >= limit) {
                return Err(StreamError::TransmitFailed("connection reset".into()));
            }
            sent.push(frame.sequence);
            Ok(())
        }

        fn close(&mut self) -> Result<(), StreamError> {
            thread::sleep(self.close_delay);
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn frame(sequence: u64) -> EncodedFrame {
        EncodedFrame {
            payload: vec![0u8; 4],
            pts_ms: sequence * 20,
            sequence,
        }
    }

    fn endpoint() -> Url {
        Url::parse("rtmp://ingest.example/live/key").unwrap()
    }

    fn channel(transport: ScriptedTransport) -> (TransmitChannel, mpsc::Receiver<ChannelEvent>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let channel = TransmitChannel::new(
            Box::new(transport),
            Arc::new(move |event| {
                let _ = tx.lock().send(event);
            }),
        )
        .unwrap();
        (channel, rx)
    }

    fn next(rx: &mpsc::Receiver<ChannelEvent>) -> ChannelEvent {
        rx.recv_timeout(Duration::from_secs(2)).expect("channel event")
    }

    #[test]
    fn second_connect_while_connecting_is_busy() {
        let transport = ScriptedTransport::default();
        let connects = Arc::clone(&transport.connects);
        let (channel, rx) = channel(transport);
        let config = StreamingConfiguration::default();

        let attempt = channel.connect(endpoint(), &config).unwrap();
        assert_eq!(channel.connect(endpoint(), &config), Err(StreamError::Busy));
        assert_eq!(next(&rx), ChannelEvent::Connected { attempt });
        assert_eq!(channel.connect(endpoint(), &config), Err(StreamError::Busy));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn frames_delivered_in_order() {
        let transport = ScriptedTransport::default();
        let sent = Arc::clone(&transport.sent);
        let (channel, rx) = channel(transport);

        let attempt = channel.connect(endpoint(), &StreamingConfiguration::default()).unwrap();
        assert_eq!(next(&rx), ChannelEvent::Connected { attempt });

        for sequence in 0..100 {
            channel.send(frame(sequence)).unwrap();
        }
        channel.disconnect(Duration::from_secs(1));
        assert_eq!(next(&rx), ChannelEvent::Disconnected { attempt });

        let sent = sent.lock().clone();
        assert_eq!(sent, (0..100).collect::<Vec<_>>());
        assert_eq!(channel.stats().frames_sent, 100);
    }

    #[test]
    fn send_before_connect_is_ignored() {
        let (channel, _rx) = channel(ScriptedTransport::default());
        assert_eq!(channel.send(frame(0)), Err(StreamError::NotConnected));
    }

    #[test]
    fn connect_failure_reported_and_channel_reusable() {
        let transport = ScriptedTransport {
            connect_error: Some(StreamError::ConnectFailed("refused".into())),
            ..Default::default()
        };
        let (channel, rx) = channel(transport);
        let config = StreamingConfiguration::default();

        let attempt = channel.connect(endpoint(), &config).unwrap();
        assert!(matches!(next(&rx), ChannelEvent::ConnectFailed { attempt: a, .. } if a == attempt));
        assert_eq!(channel.state(), ChannelState::Idle);
        assert!(channel.connect(endpoint(), &config).is_ok());
    }

    #[test]
    fn transport_failure_reported_once_then_sends_ignored() {
        let transport = ScriptedTransport {
            fail_after: Some(2),
            ..Default::default()
        };
        let closes = Arc::clone(&transport.closes);
        let (channel, rx) = channel(transport);

        let attempt = channel.connect(endpoint(), &StreamingConfiguration::default()).unwrap();
        assert_eq!(next(&rx), ChannelEvent::Connected { attempt });
        for sequence in 0..5 {
            let _ = channel.send(frame(sequence));
        }

        assert!(matches!(next(&rx), ChannelEvent::Failed { .. }));
        assert_eq!(channel.state(), ChannelState::Failed);
        assert_eq!(channel.send(frame(9)), Err(StreamError::NotConnected));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        channel.disconnect(Duration::from_millis(100));
        assert_eq!(next(&rx), ChannelEvent::Disconnected { attempt });
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sustained_backpressure_fails_the_connection() {
        let transport = ScriptedTransport {
            send_delay: Duration::from_millis(200),
            ..Default::default()
        };
        let (channel, rx) = channel(transport);
        let config = StreamingConfiguration {
            transmit_queue_capacity: 2,
            max_backpressure_drops: 5,
            ..Default::default()
        };

        let attempt = channel.connect(endpoint(), &config).unwrap();
        assert_eq!(next(&rx), ChannelEvent::Connected { attempt });

        let mut backpressure = 0;
        for sequence in 0..20 {
            if channel.send(frame(sequence)) == Err(StreamError::Backpressure) {
                backpressure += 1;
            }
        }

        assert_eq!(backpressure, 5);
        assert!(matches!(
            next(&rx),
            ChannelEvent::Failed { error: StreamError::TransmitFailed(_), .. }
        ));
        assert!(channel.stats().frames_dropped >= 5);
    }

    #[test]
    fn disconnect_always_completes() {
        let (channel, rx) = channel(ScriptedTransport::default());
        channel.disconnect(Duration::from_millis(50));
        channel.disconnect(Duration::from_millis(50));
        assert!(matches!(next(&rx), ChannelEvent::Disconnected { .. }));
        assert!(matches!(next(&rx), ChannelEvent::Disconnected { .. }));
        assert_eq!(channel.state(), ChannelState::Idle);
    }

    #[test]
    fn flush_discards_frames_past_the_disconnect_deadline() {
        let transport = ScriptedTransport {
            send_delay: Duration::from_millis(50),
            ..Default::default()
        };
        let sent = Arc::clone(&transport.sent);
        let (channel, rx) = channel(transport);
        let config = StreamingConfiguration {
            transmit_queue_capacity: 64,
            ..Default::default()
        };

        let attempt = channel.connect(endpoint(), &config).unwrap();
        assert_eq!(next(&rx), ChannelEvent::Connected { attempt });
        for sequence in 0..20 {
            channel.send(frame(sequence)).unwrap();
        }
        channel.disconnect(Duration::from_millis(120));
        assert_eq!(next(&rx), ChannelEvent::Disconnected { attempt });

        let delivered = sent.lock().len() as u64;
        let stats = channel.stats();
        assert!(delivered > 0 && delivered < 20, "delivered {}", delivered);
        assert_eq!(stats.frames_sent, delivered);
        assert_eq!(stats.frames_sent + stats.frames_dropped, 20);
        assert_eq!(channel.state(), ChannelState::Idle);
    }

    #[test]
    fn connect_queues_behind_a_slow_close() {
        let transport = ScriptedTransport {
            close_delay: Duration::from_millis(300),
            ..Default::default()
        };
        let connects = Arc::clone(&transport.connects);
        let closes = Arc::clone(&transport.closes);
        let (channel, rx) = channel(transport);
        let config = StreamingConfiguration::default();

        let first = channel.connect(endpoint(), &config).unwrap();
        assert_eq!(next(&rx), ChannelEvent::Connected { attempt: first });
        channel.disconnect(Duration::from_millis(50));
        assert_eq!(channel.state(), ChannelState::Closing);
        assert_eq!(channel.send(frame(0)), Err(StreamError::NotConnected));

        let second = channel.connect(endpoint(), &config).unwrap();
        assert_eq!(next(&rx), ChannelEvent::Disconnected { attempt: first });
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(next(&rx), ChannelEvent::Connected { attempt: second });
        assert_eq!(channel.state(), ChannelState::Connected);
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn redact_hides_stream_key() {
        let url = Url::parse("rtmp://ingest.example:1935/live/secret").unwrap();
        assert_eq!(redact(&url), "rtmp://ingest.example:1935/…");
    }
}
