use crate::models::authorization::AuthorizationStatus;
use crate::models::state::StreamState;

/// Observer for session notifications.
///
/// The session holds only a weak reference: dropping the delegate silently
/// ends notifications. All methods are called on the session's notification
/// thread, one at a time and in transition order, never while the session
/// holds internal locks.
pub trait StreamingDelegate: Send + Sync {
    /// Called once per state transition with the new state.
    fn on_state_changed(&self, state: StreamState);

    /// Called when an authorization request issued by the session resolves.
    fn on_authorization_status(&self, _status: AuthorizationStatus) {}
}
