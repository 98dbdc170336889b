//! Error types for the binding layer

use std::path::PathBuf;

/// Errors surfaced by devices, bindings and mapping resolution
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The named MIDI port could not be opened
    #[error("Could not open MIDI device {name:?} ({reason}). Available device names are: {available:?}")]
    DeviceOpen {
        name: String,
        available: Vec<String>,
        reason: String,
    },

    /// No factory is registered for this device name
    #[error("No device implemented for device_name: {name:?} (known: {known:?})")]
    UnknownDeviceModel { name: String, known: Vec<String> },

    /// Sending to or closing a port failed
    #[error("MIDI transport error: {0}")]
    Transport(String),

    /// A mapping record failed validation
    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    /// The device has no knob/button with this index
    #[error("Device has no {kind} with index {index}")]
    UnknownControl { kind: &'static str, index: u8 },

    /// The target system has no method with this name
    #[error("Core object has no method {0:?}")]
    UnknownCoreMethod(String),

    /// A button target reported a current value outside its own allowed values
    #[error("Current value {value:?} of {device}.{property} is not one of its allowed values {allowed:?}")]
    CurrentValueNotAllowed {
        device: String,
        property: String,
        value: String,
        allowed: Vec<String>,
    },

    /// A knob target reported a value that is not a number
    #[error("Value {value:?} of {device}.{property} is not numeric")]
    InvalidPropertyValue {
        device: String,
        property: String,
        value: String,
    },

    /// Failure reported by the target system
    #[error("{0}")]
    Target(String),

    #[error("File type not recognized. Must be .json, .yaml, or .yml, not {0:?}")]
    UnsupportedFormat(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON mapping: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse YAML mapping: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
