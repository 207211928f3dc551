use std::sync::{Arc, Weak};
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;

use crate::models::authorization::AuthorizationStatus;
use crate::models::error::StreamError;
use crate::models::state::StreamState;
use crate::traits::stream_delegate::StreamingDelegate;

/// Completion handler for `start`, fired exactly once.
pub type StartCompletion = Box<dyn FnOnce(bool) + Send + 'static>;

enum Notification {
    State(StreamState),
    Authorization(AuthorizationStatus),
    Completion(StartCompletion, bool),
}

type DelegateSlot = Arc<Mutex<Option<Weak<dyn StreamingDelegate>>>>;

/// Ordered, asynchronous delivery of session notifications.
///
/// Everything posted here is handed to one dedicated thread in posting
/// order, so delegates and completion handlers never run on the controller
/// thread and never observe transitions out of order.
pub struct Notifier {
    sender: Option<Sender<Notification>>,
    delegate: DelegateSlot,
    worker: Option<thread::JoinHandle<()>>,
}

impl Notifier {
    pub fn new(session_id: &str) -> Result<Self, StreamError> {
        let (sender, receiver) = unbounded::<Notification>();
        let delegate: DelegateSlot = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&delegate);

        let worker = thread::Builder::new()
            .name(format!("stream-notify-{}", &session_id[..session_id.len().min(8)]))
            .spawn(move || {
                for notification in receiver {
                    // Liveness is checked per dispatch; the lock is not held
                    // while the delegate runs.
                    let delegate = slot.lock().as_ref().and_then(Weak::upgrade);
                    match notification {
                        Notification::State(state) => {
                            if let Some(delegate) = delegate {
                                delegate.on_state_changed(state);
                            }
                        }
                        Notification::Authorization(status) => {
                            if let Some(delegate) = delegate {
                                delegate.on_authorization_status(status);
                            }
                        }
                        Notification::Completion(completion, success) => completion(success),
                    }
                }
            })
            .map_err(|e| {
                StreamError::ConfigurationFailed(format!("failed to spawn notification thread: {}", e))
            })?;

        Ok(Self {
            sender: Some(sender),
            delegate,
            worker: Some(worker),
        })
    }

    /// Observe `delegate` without keeping it alive.
    pub fn set_delegate(&self, delegate: &Arc<dyn StreamingDelegate>) {
        *self.delegate.lock() = Some(Arc::downgrade(delegate));
    }

    pub fn clear_delegate(&self) {
        *self.delegate.lock() = None;
    }

    pub fn state_changed(&self, state: StreamState) {
        self.post(Notification::State(state));
    }

    pub fn authorization_resolved(&self, status: AuthorizationStatus) {
        self.post(Notification::Authorization(status));
    }

    pub fn complete(&self, completion: StartCompletion, success: bool) {
        self.post(Notification::Completion(completion, success));
    }

    fn post(&self, notification: Notification) {
        let Some(sender) = self.sender.as_ref() else {
            return;
        };
        if sender.send(notification).is_err() {
            log::warn!("Notification thread has exited; dropping notification");
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain what is left and exit.
        self.sender.take();
        if let Some(handle) = self.worker.take() {
            // Dropped from inside a delegate callback: the worker cannot join itself.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("Notification thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Recorder {
        tx: Mutex<mpsc::Sender<StreamState>>,
    }

    impl StreamingDelegate for Recorder {
        fn on_state_changed(&self, state: StreamState) {
            let _ = self.tx.lock().send(state);
        }
    }

    fn recorder() -> (Arc<dyn StreamingDelegate>, mpsc::Receiver<StreamState>) {
        let (tx, rx) = mpsc::channel();
        let delegate: Arc<dyn StreamingDelegate> = Arc::new(Recorder { tx: Mutex::new(tx) });
        (delegate, rx)
    }

    #[test]
    fn delivers_in_posting_order() {
        let notifier = Notifier::new("test-session").unwrap();
        let (delegate, rx) = recorder();
        notifier.set_delegate(&delegate);

        notifier.state_changed(StreamState::Connecting);
        notifier.state_changed(StreamState::Connected);
        notifier.state_changed(StreamState::Disconnecting);

        let received: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        assert_eq!(
            received,
            vec![
                StreamState::Connecting,
                StreamState::Connected,
                StreamState::Disconnecting
            ]
        );
    }

    #[test]
    fn released_delegate_is_skipped() {
        let notifier = Notifier::new("test-session").unwrap();
        let (delegate, rx) = recorder();
        notifier.set_delegate(&delegate);
        drop(delegate);

        notifier.state_changed(StreamState::Connecting);
        let (tx, done) = mpsc::channel();
        notifier.complete(Box::new(move |ok| tx.send(ok).unwrap()), true);

        assert_eq!(done.recv_timeout(Duration::from_secs(1)), Ok(true));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn completion_runs_after_preceding_states() {
        let notifier = Notifier::new("test-session").unwrap();
        let (delegate, rx) = recorder();
        notifier.set_delegate(&delegate);

        notifier.state_changed(StreamState::Connected);
        let (tx, done) = mpsc::channel();
        notifier.complete(
            Box::new(move |ok| {
                tx.send(ok).unwrap();
            }),
            true,
        );

        assert_eq!(done.recv_timeout(Duration::from_secs(1)), Ok(true));
        // The state notification was dispatched before the completion ran.
        assert_eq!(rx.try_recv(), Ok(StreamState::Connected));
    }

    #[test]
    fn drop_drains_pending_notifications() {
        let notifier = Notifier::new("test-session").unwrap();
        let (tx, done) = mpsc::channel();
        notifier.complete(Box::new(move |ok| tx.send(ok).unwrap()), false);
        drop(notifier);
        assert_eq!(done.try_recv(), Ok(false));
    }
}
