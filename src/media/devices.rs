//! Audio-Geräte über cpal

use super::MediaError;
use cpal::traits::{DeviceTrait, HostTrait};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDevice {
    pub name: String,
    pub is_default: bool,
}

/// Ein- und Ausgabegeräte des Standard-Hosts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AudioDevices {
    pub inputs: Vec<AudioDevice>,
    pub outputs: Vec<AudioDevice>,
}

pub fn list_audio_devices() -> Result<AudioDevices, MediaError> {
    let host = cpal::default_host();

    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let inputs = host
        .input_devices()
        .map_err(|e| MediaError::Device(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .map(|name| AudioDevice {
            is_default: Some(&name) == default_input.as_ref(),
            name,
        })
        .collect();

    let outputs = host
        .output_devices()
        .map_err(|e| MediaError::Device(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .map(|name| AudioDevice {
            is_default: Some(&name) == default_output.as_ref(),
            name,
        })
        .collect();

    Ok(AudioDevices { inputs, outputs })
}

/// Prüft, ob ein Mikrofon verfügbar ist
pub(crate) fn has_input_device() -> bool {
    cpal::default_host().default_input_device().is_some()
}
