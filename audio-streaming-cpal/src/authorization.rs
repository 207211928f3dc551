//! Microphone authorization by probing the input device.
//!
//! Desktop hosts reached through cpal have no consent dialog. Access is
//! inferred from whether the input device can be opened: a device that
//! refuses its configuration with an access error is treated as denied,
//! a missing device as restricted.

use cpal::traits::DeviceTrait;

use audio_streaming_core::models::authorization::AuthorizationStatus;
use audio_streaming_core::traits::authorization_provider::AuthorizationProvider;

use crate::device_enumerator::DeviceEnumerator;

#[derive(Debug, Default, Clone, Copy)]
pub struct ProbeAuthorization;

impl AuthorizationProvider for ProbeAuthorization {
    fn query(&self) -> AuthorizationStatus {
        let selected = match DeviceEnumerator::new().select() {
            Ok(selected) => selected,
            Err(_) => return AuthorizationStatus::Restricted,
        };

        match selected.device.default_input_config() {
            Ok(_) => AuthorizationStatus::Authorized,
            Err(cpal::DefaultStreamConfigError::DeviceNotAvailable) => AuthorizationStatus::Restricted,
            Err(e) => classify_probe_error(&e.to_string()),
        }
    }

    /// No prompt exists; re-probe.
    fn request(&self) -> AuthorizationStatus {
        self.query()
    }
}

fn classify_probe_error(message: &str) -> AuthorizationStatus {
    let lower = message.to_lowercase();
    if lower.contains("denied") || lower.contains("permission") || lower.contains("not permitted") {
        AuthorizationStatus::Denied
    } else {
        // Other error: assume available but report.
        log::warn!("Unexpected error probing microphone access: {}", message);
        AuthorizationStatus::Authorized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_errors_are_denied() {
        assert_eq!(
            classify_probe_error("Access denied (os error 13)"),
            AuthorizationStatus::Denied
        );
        assert_eq!(
            classify_probe_error("Operation not permitted"),
            AuthorizationStatus::Denied
        );
    }

    #[test]
    fn other_errors_assume_access() {
        assert_eq!(
            classify_probe_error("A backend-specific error has occurred: busy"),
            AuthorizationStatus::Authorized
        );
    }
}
