use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use url::Url;

use crate::models::audio_models::{AudioDevice, SessionDiagnostics};
use crate::models::authorization::AuthorizationStatus;
use crate::models::config::StreamingConfiguration;
use crate::models::error::StreamError;
use crate::models::state::StreamState;
use crate::session::authorization_gate::AuthorizationGate;
use crate::session::notifier::{Notifier, StartCompletion};
use crate::session::pipeline::{Pipeline, PipelineCounters, PipelineFailureCallback, PipelineParts};
use crate::session::state_machine::{next_state, StreamEvent};
use crate::traits::audio_encoder::AudioEncoder;
use crate::traits::capture_source::CaptureSource;
use crate::traits::stream_delegate::StreamingDelegate;
use crate::traits::transport::Transport;
use crate::transmit::channel::{ChannelEvent, TransmitChannel};
use crate::transmit::tcp::parse_endpoint;

/// Extra time allowed for the transport to close after the flush budget.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

enum ControlCommand {
    Start {
        url: String,
        completion: StartCompletion,
    },
    Stop,
    Authorization {
        generation: u64,
        status: AuthorizationStatus,
    },
    Channel(ChannelEvent),
    PipelineFailed {
        generation: u64,
        error: StreamError,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum Watchdog {
    Connect,
    Disconnect,
}

/// State readable from any thread. Written only by the control thread,
/// except for the caller-owned properties (configuration, mute, idle timer).
struct SessionShared {
    state: Mutex<StreamState>,
    push_url: Mutex<Option<Url>>,
    last_error: Mutex<Option<StreamError>>,
    configuration: Mutex<StreamingConfiguration>,
    /// Taken on the first accepted `start`; never replaced afterwards.
    snapshot: Mutex<Option<StreamingConfiguration>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    muted: Arc<AtomicBool>,
    idle_timer_disabled: AtomicBool,
    counters: Arc<PipelineCounters>,
}

/// A live audio streaming session.
///
/// Owns one capture source, one encoder and one transmit channel for its
/// whole lifetime. All state transitions run on a single control thread;
/// public methods only enqueue requests and never block on the network.
///
/// ```text
/// start()/stop() ─┐
/// authorization ──┼─→ [control queue] ─→ control thread ─→ state machine ─→ Notifier ─→ delegate
/// channel events ─┤                           │
/// pipeline errors ┘                           ├─→ TransmitChannel::connect / disconnect
///                                             └─→ Pipeline::start / stop
/// ```
pub struct StreamingSession {
    id: String,
    shared: Arc<SessionShared>,
    commands: Sender<ControlCommand>,
    notifier: Arc<Notifier>,
    channel: Arc<TransmitChannel>,
    device: AudioDevice,
    control: Option<thread::JoinHandle<()>>,
}

impl StreamingSession {
    /// Create a session around the given collaborators.
    ///
    /// Fails with `DeviceUnavailable` when the capture source has no usable
    /// device and `ConfigurationFailed` for an invalid configuration.
    pub fn new(
        configuration: StreamingConfiguration,
        capture: Box<dyn CaptureSource>,
        encoder: Box<dyn AudioEncoder>,
        transport: Box<dyn Transport>,
        gate: Arc<AuthorizationGate>,
    ) -> Result<Self, StreamError> {
        configuration
            .validate()
            .map_err(StreamError::ConfigurationFailed)?;
        if !capture.is_available() {
            return Err(StreamError::DeviceUnavailable);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let device = capture.device_info();
        let shared = Arc::new(SessionShared {
            state: Mutex::new(StreamState::Unknown),
            push_url: Mutex::new(None),
            last_error: Mutex::new(None),
            configuration: Mutex::new(configuration),
            snapshot: Mutex::new(None),
            started_at: Mutex::new(None),
            muted: Arc::new(AtomicBool::new(false)),
            idle_timer_disabled: AtomicBool::new(true),
            counters: Arc::new(PipelineCounters::default()),
        });
        let notifier = Arc::new(Notifier::new(&id)?);

        let (commands, command_rx) = unbounded();
        let channel = {
            let commands = commands.clone();
            Arc::new(TransmitChannel::new(
                transport,
                Arc::new(move |event| {
                    let _ = commands.send(ControlCommand::Channel(event));
                }),
            )?)
        };

        let controller = Controller {
            tag: id[..8].to_string(),
            shared: Arc::clone(&shared),
            notifier: Arc::clone(&notifier),
            gate,
            channel: Arc::clone(&channel),
            capture,
            encoder: Arc::new(Mutex::new(encoder)),
            commands: commands.clone(),
            pipeline: None,
            pending: None,
            stop_requested: false,
            generation: 0,
            connect_attempt: None,
            watchdog: None,
        };
        let control = thread::Builder::new()
            .name("stream-control".into())
            .spawn(move || controller.run(command_rx))
            .map_err(|e| {
                StreamError::ConfigurationFailed(format!("failed to spawn control thread: {}", e))
            })?;

        log::info!(
            "Streaming session {} created on device '{}' ({:?})",
            id,
            device.name,
            device.role
        );

        Ok(Self {
            id,
            shared,
            commands,
            notifier,
            channel,
            device,
            control: Some(control),
        })
    }

    // MARK: - Streaming

    /// Begin streaming to `url`.
    ///
    /// `completion` fires exactly once, on the notification thread: `true`
    /// once connected and capturing, `false` if the attempt fails or the
    /// session was not ready to start (already starting, running or in
    /// `Error`).
    pub fn start<F>(&self, url: &str, completion: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let command = ControlCommand::Start {
            url: url.to_string(),
            completion: Box::new(completion),
        };
        if let Err(rejected) = self.commands.send(command) {
            if let ControlCommand::Start { completion, .. } = rejected.into_inner() {
                self.notifier.complete(completion, false);
            }
        }
    }

    /// Stop streaming. Safe from any state; always converges to `Disconnected`.
    pub fn stop(&self) {
        if self.commands.send(ControlCommand::Stop).is_err() {
            log::warn!("[{}] stop after control thread exit", self.id);
        }
    }

    pub fn state(&self) -> StreamState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_streaming()
    }

    /// Endpoint of the most recent accepted `start`; `None` before the first.
    pub fn push_url(&self) -> Option<Url> {
        self.shared.push_url.lock().clone()
    }

    /// Why the session last entered `Error`.
    pub fn last_error(&self) -> Option<StreamError> {
        self.shared.last_error.lock().clone()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn device(&self) -> &AudioDevice {
        &self.device
    }

    // MARK: - Delegate

    /// Observe state changes. The session keeps only a weak reference.
    pub fn set_delegate(&self, delegate: &Arc<dyn StreamingDelegate>) {
        self.notifier.set_delegate(delegate);
    }

    pub fn clear_delegate(&self) {
        self.notifier.clear_delegate();
    }

    // MARK: - Configuration

    /// The configuration in effect: the snapshot once started, else the pending one.
    pub fn configuration(&self) -> StreamingConfiguration {
        if let Some(snapshot) = self.shared.snapshot.lock().as_ref() {
            return snapshot.clone();
        }
        self.shared.configuration.lock().clone()
    }

    /// Replace the configuration. Only honoured before the first `start`.
    pub fn set_configuration(&self, configuration: StreamingConfiguration) -> bool {
        // Held across the update so a concurrent first start sees old or new, never a mix.
        let snapshot = self.shared.snapshot.lock();
        if snapshot.is_some() {
            log::warn!("[{}] configuration change ignored after start", self.id);
            return false;
        }
        if let Err(reason) = configuration.validate() {
            log::warn!("[{}] invalid configuration rejected: {}", self.id, reason);
            return false;
        }
        *self.shared.configuration.lock() = configuration;
        true
    }

    // MARK: - Microphone

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::SeqCst)
    }

    /// Takes effect on the next captured buffer.
    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::SeqCst);
    }

    // MARK: - Application

    /// Whether the host's idle/sleep timer should be held off while streaming
    /// (default: true). Informational on hosts without an idle timer: the
    /// session stores the flag for the embedding application and does not act
    /// on it.
    pub fn is_idle_timer_disabled(&self) -> bool {
        self.shared.idle_timer_disabled.load(Ordering::SeqCst)
    }

    pub fn set_idle_timer_disabled(&self, disabled: bool) {
        self.shared.idle_timer_disabled.store(disabled, Ordering::SeqCst);
    }

    pub fn diagnostics(&self) -> SessionDiagnostics {
        let counters = &self.shared.counters;
        let channel = self.channel.stats();
        SessionDiagnostics {
            session_id: self.id.clone(),
            started_at: *self.shared.started_at.lock(),
            buffers_captured: counters.buffers_captured.load(Ordering::Relaxed),
            buffers_dropped: counters.buffers_dropped.load(Ordering::Relaxed),
            frames_encoded: counters.frames_encoded.load(Ordering::Relaxed),
            encode_failures: counters.encode_failures.load(Ordering::Relaxed),
            frames_sent: channel.frames_sent,
            frames_dropped: channel.frames_dropped,
            bytes_sent: channel.bytes_sent,
        }
    }

    // MARK: - Authorization

    /// Process-wide microphone authorization, without prompting.
    pub fn authorization_status() -> AuthorizationStatus {
        AuthorizationGate::shared().current_status()
    }

    /// Ask for microphone access through the process-wide gate.
    pub fn request_access<F>(handler: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        AuthorizationGate::shared().request_access(handler);
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        let _ = self.commands.send(ControlCommand::Shutdown);
        if let Some(handle) = self.control.take() {
            if handle.join().is_err() {
                log::error!("[{}] control thread panicked", self.id);
            }
        }
        log::info!("Streaming session {} released", self.id);
    }
}

/// Everything owned by the control thread.
struct Controller {
    tag: String,
    shared: Arc<SessionShared>,
    notifier: Arc<Notifier>,
    gate: Arc<AuthorizationGate>,
    channel: Arc<TransmitChannel>,
    capture: Box<dyn CaptureSource>,
    encoder: Arc<Mutex<Box<dyn AudioEncoder>>>,
    commands: Sender<ControlCommand>,
    pipeline: Option<Pipeline>,
    pending: Option<StartCompletion>,
    /// `stop` arrived while a connect was in flight.
    stop_requested: bool,
    /// Bumped per accepted `start`; tags authorization and pipeline callbacks.
    generation: u64,
    /// Channel attempt whose events are still relevant.
    connect_attempt: Option<u64>,
    watchdog: Option<(Instant, Watchdog)>,
}

impl Controller {
    fn run(mut self, commands: Receiver<ControlCommand>) {
        loop {
            let received = match self.watchdog {
                Some((deadline, _)) => commands.recv_deadline(deadline),
                None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            let command = match received {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => {
                    self.on_watchdog();
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => return,
            };

            match command {
                ControlCommand::Start { url, completion } => self.on_start(&url, completion),
                ControlCommand::Stop => self.on_stop(),
                ControlCommand::Authorization { generation, status } => {
                    if generation == self.generation {
                        self.on_authorization(status);
                    }
                }
                ControlCommand::Channel(event) => self.on_channel_event(event),
                ControlCommand::PipelineFailed { generation, error } => {
                    if generation == self.generation && self.state() == StreamState::Connected {
                        self.on_stream_failed(error);
                    }
                }
                ControlCommand::Shutdown => {
                    self.shutdown();
                    return;
                }
            }
        }
    }

    fn state(&self) -> StreamState {
        *self.shared.state.lock()
    }

    fn transition(&mut self, event: StreamEvent) -> bool {
        let (from, to) = {
            let mut state = self.shared.state.lock();
            let from = *state;
            let Some(to) = next_state(from, event) else {
                log::debug!("[{}] {:?} ignored in state {}", self.tag, event, from);
                return false;
            };
            *state = to;
            (from, to)
        };
        log::info!("[{}] {} → {}", self.tag, from, to);
        self.notifier.state_changed(to);
        true
    }

    fn complete(&mut self, success: bool) {
        if let Some(completion) = self.pending.take() {
            self.notifier.complete(completion, success);
        }
    }

    fn snapshot(&self) -> StreamingConfiguration {
        let mut snapshot = self.shared.snapshot.lock();
        snapshot
            .get_or_insert_with(|| self.shared.configuration.lock().clone())
            .clone()
    }

    fn on_start(&mut self, url: &str, completion: StartCompletion) {
        let state = self.state();
        if !state.is_ready_to_start() {
            log::warn!("[{}] start ignored in state {}", self.tag, state);
            self.notifier.complete(completion, false);
            return;
        }

        self.generation += 1;
        self.stop_requested = false;
        self.connect_attempt = None;
        self.pending = Some(completion);
        *self.shared.last_error.lock() = None;
        *self.shared.started_at.lock() = None;
        self.transition(StreamEvent::Start);

        let endpoint = match parse_endpoint(url) {
            Ok(endpoint) => endpoint,
            Err(error) => {
                self.fail_attempt(error);
                return;
            }
        };
        *self.shared.push_url.lock() = Some(endpoint);
        self.snapshot();

        let status = self.gate.current_status();
        if status.is_determined() {
            self.on_authorization(status);
            return;
        }

        log::info!("[{}] waiting for microphone authorization", self.tag);
        let commands = self.commands.clone();
        let generation = self.generation;
        self.gate.request_status(move |status| {
            let _ = commands.send(ControlCommand::Authorization { generation, status });
        });
    }

    fn on_authorization(&mut self, status: AuthorizationStatus) {
        if self.state() != StreamState::Connecting || self.connect_attempt.is_some() {
            return;
        }
        self.notifier.authorization_resolved(status);

        if !status.is_granted() {
            self.fail_attempt(StreamError::AuthorizationDenied);
            return;
        }
        if !self.capture.is_available() {
            self.fail_attempt(StreamError::DeviceUnavailable);
            return;
        }

        let config = self.snapshot();
        let Some(endpoint) = self.shared.push_url.lock().clone() else {
            self.fail_attempt(StreamError::InvalidUrl("no endpoint".into()));
            return;
        };
        match self.channel.connect(endpoint, &config) {
            Ok(attempt) => {
                self.connect_attempt = Some(attempt);
                self.watchdog = Some((Instant::now() + config.connect_timeout(), Watchdog::Connect));
            }
            Err(error) => self.fail_attempt(error),
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected { attempt } => {
                if self.connect_attempt != Some(attempt) || self.state() != StreamState::Connecting {
                    log::debug!("[{}] closing stale connection {}", self.tag, attempt);
                    self.channel.disconnect(self.snapshot().disconnect_timeout());
                    return;
                }
                self.watchdog = None;
                self.on_connected();
            }
            ChannelEvent::ConnectFailed { attempt, error } => {
                if self.connect_attempt == Some(attempt) && self.state() == StreamState::Connecting {
                    self.watchdog = None;
                    self.connect_attempt = None;
                    self.fail_attempt(error);
                }
            }
            ChannelEvent::Failed { attempt, error } => {
                if self.connect_attempt == Some(attempt) && self.state() == StreamState::Connected {
                    self.on_stream_failed(error);
                }
            }
            ChannelEvent::Disconnected { attempt } => {
                if self.connect_attempt == Some(attempt) && self.state() == StreamState::Disconnecting {
                    self.watchdog = None;
                    self.connect_attempt = None;
                    self.transition(StreamEvent::Disconnected);
                }
            }
        }
    }

    fn on_connected(&mut self) {
        self.transition(StreamEvent::Connected);

        if self.stop_requested {
            log::info!("[{}] stop requested while connecting", self.tag);
            self.stop_requested = false;
            self.complete(false);
            self.begin_disconnect();
            return;
        }

        let config = self.snapshot();
        let on_failure: PipelineFailureCallback = {
            let commands = self.commands.clone();
            let generation = self.generation;
            Arc::new(move |error| {
                let _ = commands.send(ControlCommand::PipelineFailed { generation, error });
            })
        };
        let started = Pipeline::start(PipelineParts {
            capture: self.capture.as_mut(),
            encoder: Arc::clone(&self.encoder),
            channel: Arc::clone(&self.channel),
            config: &config,
            muted: Arc::clone(&self.shared.muted),
            counters: Arc::clone(&self.shared.counters),
            on_failure,
        });

        match started {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                *self.shared.started_at.lock() = Some(Utc::now());
                self.complete(true);
            }
            Err(error) => {
                log::error!("[{}] pipeline failed to start: {}", self.tag, error);
                *self.shared.last_error.lock() = Some(error);
                self.transition(StreamEvent::FatalError);
                self.complete(false);
                self.connect_attempt = None;
                self.channel.disconnect(config.disconnect_timeout());
            }
        }
    }

    /// The attempt ended before streaming: Connecting → Error.
    fn fail_attempt(&mut self, error: StreamError) {
        log::warn!("[{}] start failed: {}", self.tag, error);
        *self.shared.last_error.lock() = Some(error);
        self.transition(StreamEvent::ConnectFailed);
        self.complete(false);

        if self.stop_requested {
            self.stop_requested = false;
            self.transition(StreamEvent::Stop);
        }
    }

    /// Fatal error while streaming: Connected → Error.
    fn on_stream_failed(&mut self, error: StreamError) {
        log::error!("[{}] stream failed: {}", self.tag, error);
        self.stop_pipeline();
        *self.shared.last_error.lock() = Some(error);
        self.transition(StreamEvent::FatalError);
        self.connect_attempt = None;
        self.channel.disconnect(self.snapshot().disconnect_timeout());
    }

    fn on_stop(&mut self) {
        match self.state() {
            StreamState::Unknown => {
                self.transition(StreamEvent::Stop);
            }
            StreamState::Connecting if self.connect_attempt.is_some() => {
                // Honoured when the connect attempt resolves.
                self.stop_requested = true;
            }
            StreamState::Connecting => {
                // Still waiting on authorization: abandon the attempt.
                self.generation += 1;
                self.stop_requested = true;
                self.fail_attempt(StreamError::ConnectFailed("start cancelled by stop".into()));
            }
            StreamState::Connected => self.begin_disconnect(),
            StreamState::Error => {
                self.channel.disconnect(self.snapshot().disconnect_timeout());
                self.transition(StreamEvent::Stop);
            }
            StreamState::Disconnecting | StreamState::Disconnected => {
                log::debug!("[{}] stop ignored, already stopping", self.tag);
            }
        }
    }

    fn begin_disconnect(&mut self) {
        self.stop_pipeline();
        self.transition(StreamEvent::Stop);
        let timeout = self.snapshot().disconnect_timeout();
        self.channel.disconnect(timeout);
        self.watchdog = Some((Instant::now() + timeout + CLOSE_GRACE, Watchdog::Disconnect));
    }

    fn stop_pipeline(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.stop(self.capture.as_mut());
        }
    }

    fn on_watchdog(&mut self) {
        let Some((_, kind)) = self.watchdog.take() else {
            return;
        };
        match (kind, self.state()) {
            (Watchdog::Connect, StreamState::Connecting) => {
                // Any late result for this attempt is now stale.
                self.connect_attempt = None;
                self.fail_attempt(StreamError::Timeout);
            }
            (Watchdog::Disconnect, StreamState::Disconnecting) => {
                log::warn!("[{}] transport did not close in time, forcing disconnect", self.tag);
                self.connect_attempt = None;
                self.transition(StreamEvent::Disconnected);
            }
            _ => {}
        }
    }

    fn shutdown(&mut self) {
        self.stop_pipeline();
        if matches!(
            self.state(),
            StreamState::Connecting | StreamState::Connected | StreamState::Disconnecting
        ) {
            self.channel.disconnect(self.snapshot().disconnect_timeout());
        }
        self.complete(false);
    }
}
