//! Input device enumeration via the cpal default host.
//!
//! Selection order: the host's default input device is the primary device,
//! otherwise the first enumerated input device is used as the secondary.

use cpal::traits::{DeviceTrait, HostTrait};

use audio_streaming_core::models::audio_models::{AudioDevice, DeviceRole};
use audio_streaming_core::models::error::StreamError;

/// A selected capture device together with its description.
pub struct SelectedDevice {
    pub device: cpal::Device,
    pub info: AudioDevice,
}

/// Input device enumerator over the cpal default host.
pub struct DeviceEnumerator {
    host: cpal::Host,
}

impl DeviceEnumerator {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    /// List input devices with their role relative to the host default.
    pub fn list_input_devices(&self) -> Result<Vec<AudioDevice>, StreamError> {
        let default_name = self.host.default_input_device().and_then(|d| device_name(&d));
        let devices = self.host.input_devices().map_err(|e| {
            StreamError::ConfigurationFailed(format!("failed to enumerate input devices: {}", e))
        })?;

        Ok(devices
            .filter_map(|device| device_name(&device))
            .map(|name| {
                let role = if default_name.as_deref() == Some(name.as_str()) {
                    DeviceRole::Primary
                } else {
                    DeviceRole::Secondary
                };
                AudioDevice {
                    id: name.clone(),
                    name,
                    role,
                }
            })
            .collect())
    }

    /// Pick the capture device: primary if present, else secondary.
    pub fn select(&self) -> Result<SelectedDevice, StreamError> {
        let default = self.host.default_input_device();
        let first = || self.host.input_devices().ok().and_then(|mut devices| devices.next());

        let (device, role) = select_device(default, first).ok_or(StreamError::DeviceUnavailable)?;
        let name = device_name(&device).unwrap_or_else(|| "Unknown input".into());
        log::info!("Selected {:?} input device '{}'", role, name);

        Ok(SelectedDevice {
            device,
            info: AudioDevice {
                id: name.clone(),
                name,
                role,
            },
        })
    }

    /// Find an input device by exact name.
    pub fn find(&self, name: &str) -> Result<SelectedDevice, StreamError> {
        let default_name = self.host.default_input_device().and_then(|d| device_name(&d));
        let devices = self.host.input_devices().map_err(|e| {
            StreamError::ConfigurationFailed(format!("failed to enumerate input devices: {}", e))
        })?;

        for device in devices {
            if device_name(&device).as_deref() == Some(name) {
                let role = if default_name.as_deref() == Some(name) {
                    DeviceRole::Primary
                } else {
                    DeviceRole::Secondary
                };
                return Ok(SelectedDevice {
                    device,
                    info: AudioDevice {
                        id: name.to_string(),
                        name: name.to_string(),
                        role,
                    },
                });
            }
        }
        Err(StreamError::DeviceUnavailable)
    }
}

impl Default for DeviceEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(deprecated)]
fn device_name(device: &cpal::Device) -> Option<String> {
    device.name().ok()
}

/// Primary/secondary fallback. The secondary lookup only runs when needed.
fn select_device<D>(primary: Option<D>, secondary: impl FnOnce() -> Option<D>) -> Option<(D, DeviceRole)> {
    match primary {
        Some(device) => Some((device, DeviceRole::Primary)),
        None => secondary().map(|device| (device, DeviceRole::Secondary)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_primary_device() {
        let selected = select_device(Some("default"), || panic!("secondary not needed"));
        assert_eq!(selected, Some(("default", DeviceRole::Primary)));
    }

    #[test]
    fn falls_back_to_secondary_device() {
        let selected = select_device(None, || Some("usb"));
        assert_eq!(selected, Some(("usb", DeviceRole::Secondary)));
    }

    #[test]
    fn no_device_selects_nothing() {
        assert_eq!(select_device::<&str>(None, || None), None);
    }
}
