use crate::models::authorization::AuthorizationStatus;

/// Host permission mechanism behind the `AuthorizationGate`.
pub trait AuthorizationProvider: Send + Sync {
    /// Current status without prompting the user.
    fn query(&self) -> AuthorizationStatus;

    /// Run the host permission flow. May block until the user answers.
    /// Returns the resolved status.
    fn request(&self) -> AuthorizationStatus;
}

/// Provider for hosts without a per-application consent prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostGranted;

impl AuthorizationProvider for HostGranted {
    fn query(&self) -> AuthorizationStatus {
        AuthorizationStatus::Authorized
    }

    fn request(&self) -> AuthorizationStatus {
        AuthorizationStatus::Authorized
    }
}
