//! Audio output device enumeration and selection.

use serde::{Deserialize, Serialize};

/// Metadata about an audio output device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default output device.
    pub is_default: bool,
}

/// Case- and whitespace-insensitive device name comparison. Device names on
/// Windows carry inconsistent trailing spaces between enumeration APIs.
pub fn matches_device_name(candidate: &str, wanted: &str) -> bool {
    candidate.trim().eq_ignore_ascii_case(wanted.trim())
}

/// Find the output device to play through: the preferred device by name if
/// it exists, otherwise the system default.
#[cfg(feature = "audio-cpal")]
pub fn find_output_device(
    preferred: Option<&str>,
) -> crate::error::Result<(cpal::Device, String)> {
    use cpal::traits::{DeviceTrait, HostTrait};

    use crate::error::VocalisError;

    let host = cpal::default_host();

    if let Some(wanted) = preferred {
        let found = host
            .output_devices()
            .map_err(|e| VocalisError::AudioDevice(e.to_string()))?
            .find(|d| {
                d.name()
                    .map(|n| matches_device_name(&n, wanted))
                    .unwrap_or(false)
            });
        match found {
            Some(device) => {
                let name = device.name().unwrap_or_else(|_| wanted.to_string());
                return Ok((device, name));
            }
            None => {
                tracing::warn!(
                    device = wanted,
                    "preferred output device not found, falling back to default"
                );
            }
        }
    }

    let device = host
        .default_output_device()
        .ok_or(VocalisError::NoDefaultOutputDevice)?;
    let name = device
        .name()
        .unwrap_or_else(|_| "Default Output Device".to_string());
    Ok((device, name))
}

/// List all available audio output devices on the system.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    match host.output_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                let is_default = default_name.as_deref() == Some(name.as_str());
                DeviceInfo { name, is_default }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            vec![]
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::matches_device_name;

    #[test]
    fn device_name_matching_ignores_case_and_padding() {
        assert!(matches_device_name(
            "Speakers (Realtek Audio) ",
            "speakers (realtek audio)"
        ));
        assert!(!matches_device_name("Speakers", "Headphones"));
    }
}
