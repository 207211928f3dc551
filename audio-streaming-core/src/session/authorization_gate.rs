use std::sync::{Arc, OnceLock};
use std::thread;

use parking_lot::Mutex;

use crate::models::authorization::AuthorizationStatus;
use crate::models::error::StreamError;
use crate::traits::authorization_provider::{AuthorizationProvider, HostGranted};

/// Listener fired whenever a pending authorization request resolves.
pub type StatusListener = Arc<dyn Fn(AuthorizationStatus) + Send + Sync + 'static>;

type StatusHandler = Box<dyn FnOnce(AuthorizationStatus) + Send + 'static>;

static SHARED: OnceLock<Arc<AuthorizationGate>> = OnceLock::new();

struct GateState {
    /// `None` until the first query; afterwards only ever holds a determined status.
    cached: Option<AuthorizationStatus>,
    request_in_flight: bool,
    waiting: Vec<StatusHandler>,
    listeners: Vec<StatusListener>,
}

/// Gatekeeper for microphone access.
///
/// Caches the first determined status for the lifetime of the gate and
/// coalesces concurrent requests into a single host permission flow.
pub struct AuthorizationGate {
    provider: Arc<dyn AuthorizationProvider>,
    state: Mutex<GateState>,
}

impl AuthorizationGate {
    pub fn new(provider: Arc<dyn AuthorizationProvider>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            state: Mutex::new(GateState {
                cached: None,
                request_in_flight: false,
                waiting: Vec::new(),
                listeners: Vec::new(),
            }),
        })
    }

    /// Process-wide gate, created on first use.
    ///
    /// Uses the provider passed to `install_shared`, or `HostGranted` if none
    /// was installed before first use.
    pub fn shared() -> Arc<Self> {
        SHARED
            .get_or_init(|| Self::new(Arc::new(HostGranted)))
            .clone()
    }

    /// Choose the provider behind `shared()`. Fails once the gate exists.
    pub fn install_shared(provider: Arc<dyn AuthorizationProvider>) -> Result<(), StreamError> {
        SHARED.set(Self::new(provider)).map_err(|_| {
            StreamError::ConfigurationFailed("authorization gate already initialized".into())
        })
    }

    /// Cached status; queries the provider (without prompting) until determined.
    pub fn current_status(&self) -> AuthorizationStatus {
        if let Some(status) = self.state.lock().cached {
            return status;
        }
        let status = self.provider.query();
        if status.is_determined() {
            let mut state = self.state.lock();
            // A concurrent request may have resolved first; it wins.
            return *state.cached.get_or_insert(status);
        }
        status
    }

    /// Request access, reporting whether it was granted.
    ///
    /// Resolves immediately on the calling thread when the status is already
    /// determined; otherwise runs the host flow on a background thread.
    pub fn request_access<F>(self: &Arc<Self>, handler: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.request_status(move |status| handler(status.is_granted()));
    }

    /// Like `request_access`, but hands over the resolved status.
    pub fn request_status<F>(self: &Arc<Self>, handler: F)
    where
        F: FnOnce(AuthorizationStatus) + Send + 'static,
    {
        let status = self.current_status();
        if status.is_determined() {
            handler(status);
            return;
        }

        let start_request = {
            let mut state = self.state.lock();
            if let Some(status) = state.cached {
                drop(state);
                handler(status);
                return;
            }
            state.waiting.push(Box::new(handler));
            !std::mem::replace(&mut state.request_in_flight, true)
        };

        if start_request {
            let gate = Arc::clone(self);
            let spawned = thread::Builder::new()
                .name("authorization-request".into())
                .spawn(move || {
                    let status = gate.provider.request();
                    gate.resolve(status);
                });
            if let Err(e) = spawned {
                log::error!("Failed to spawn authorization request thread: {}", e);
                self.resolve(AuthorizationStatus::NotDetermined);
            }
        }
    }

    /// Register a listener for resolved requests.
    pub fn add_status_listener(&self, listener: StatusListener) {
        self.state.lock().listeners.push(listener);
    }

    fn resolve(&self, status: AuthorizationStatus) {
        let (waiting, listeners) = {
            let mut state = self.state.lock();
            if status.is_determined() {
                state.cached = Some(status);
            }
            state.request_in_flight = false;
            (std::mem::take(&mut state.waiting), state.listeners.clone())
        };

        log::info!("Microphone authorization resolved: {:?}", status);
        for listener in &listeners {
            listener(status);
        }
        for handler in waiting {
            handler(status);
        }
    }
}
