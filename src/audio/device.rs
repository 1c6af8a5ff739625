//! Audio device enumeration and lookup

use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

use crate::audio::format::{SampleKind, StreamFormat};
use crate::error::AudioError;

/// Device description for listings and logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioDeviceInfo {
    /// `input:<name>` or `output:<name>`
    pub id: String,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// Wrapper around a cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub is_input: bool,
}

impl AudioDevice {
    fn from_cpal(device: cpal::Device, is_input: bool) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            is_input,
        }
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Native configuration of the device in its direction
    pub fn default_config(&self) -> Result<cpal::SupportedStreamConfig, AudioError> {
        let config = if self.is_input {
            self.inner.default_input_config()
        } else {
            self.inner.default_output_config()
        };
        config.map_err(|e| AudioError::DeviceNotFound(format!("{}: {}", self.name, e)))
    }
}

/// Map a cpal configuration to a pipeline format.
///
/// Only 16-bit integer and 32-bit float devices are driven directly.
pub fn stream_format(config: &cpal::SupportedStreamConfig) -> Result<StreamFormat, AudioError> {
    let kind = match config.sample_format() {
        cpal::SampleFormat::I16 => SampleKind::I16,
        cpal::SampleFormat::F32 => SampleKind::F32,
        other => return Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    };
    Ok(StreamFormat::new(config.sample_rate().0, config.channels(), kind))
}

/// List all available audio devices
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<AudioDeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = device_capabilities(&device, true);
                devices.push(AudioDeviceInfo {
                    id: format!("input:{}", name),
                    is_default: default_input_name.as_ref() == Some(&name),
                    name,
                    is_input: true,
                    is_output: false,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);

                // Duplex devices are listed once
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                    continue;
                }

                let (sample_rates, channels) = device_capabilities(&device, false);
                devices.push(AudioDeviceInfo {
                    id: format!("output:{}", name),
                    name,
                    is_input: false,
                    is_output: true,
                    is_default,
                    sample_rates,
                    channels,
                });
            }
        }
    }

    devices
}

fn device_capabilities(device: &cpal::Device, is_input: bool) -> (Vec<u32>, Vec<u16>) {
    let configs: Vec<cpal::SupportedStreamConfigRange> = if is_input {
        device.supported_input_configs().map(|c| c.collect()).unwrap_or_default()
    } else {
        device.supported_output_configs().map(|c| c.collect()).unwrap_or_default()
    };

    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    for config in &configs {
        for rate in [16_000u32, 44_100, 48_000, 96_000] {
            let supported = cpal::SampleRate(rate) >= config.min_sample_rate()
                && cpal::SampleRate(rate) <= config.max_sample_rate();
            if supported && !sample_rates.contains(&rate) {
                sample_rates.push(rate);
            }
        }
        if !channels.contains(&config.channels()) {
            channels.push(config.channels());
        }
    }

    sample_rates.sort_unstable();
    channels.sort_unstable();
    (sample_rates, channels)
}

/// Input device by name, or the host default when `name` is `None`
pub fn find_input_device(name: Option<&str>) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .map(|d| AudioDevice::from_cpal(d, true))
            .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string())),
        Some(name) => {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
            find_named(devices, strip_id(name, "input:"), true)
        }
    }
}

/// Output device by name, or the host default when `name` is `None`
pub fn find_output_device(name: Option<&str>) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .map(|d| AudioDevice::from_cpal(d, false))
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string())),
        Some(name) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
            find_named(devices, strip_id(name, "output:"), false)
        }
    }
}

/// Accept both a bare device name and a listing id
fn strip_id<'a>(name: &'a str, prefix: &str) -> &'a str {
    name.strip_prefix(prefix).unwrap_or(name)
}

fn find_named(
    devices: impl Iterator<Item = cpal::Device>,
    name: &str,
    is_input: bool,
) -> Result<AudioDevice, AudioError> {
    devices
        .into_iter()
        .find(|d| d.name().map_or(false, |n| n == name))
        .map(|d| AudioDevice::from_cpal(d, is_input))
        .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_id() {
        assert_eq!(strip_id("input:USB Mic", "input:"), "USB Mic");
        assert_eq!(strip_id("USB Mic", "input:"), "USB Mic");
    }

    #[test]
    fn test_list_devices_ids_match_direction() {
        // May be empty on CI/systems without audio devices
        for device in list_devices() {
            assert!(device.is_input || device.is_output);
            assert!(device.id.starts_with("input:") || device.id.starts_with("output:"));
        }
    }

    #[test]
    fn test_unknown_device_is_reported() {
        assert!(matches!(
            find_output_device(Some("no-such-device-7f3a")),
            Err(AudioError::DeviceNotFound(_))
        ));
    }
}
