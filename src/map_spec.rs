//! Declarative device maps
//!
//! A [`DeviceMap`] names a device and lists [`Mapping`]s from its controls to
//! core properties or methods. Maps are read from JSON or YAML:
//!
//! ```yaml
//! device_name: X-TOUCH MINI
//! mappings:
//!   - [button, 8, Camera, AllowMultiROI]
//!   - [knob, 2, Camera, Gain]
//!   - message_type: button
//!     control_id: 10
//!     core_method: snap
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::binding::{
    connect_button_to_property, connect_core_method, connect_knob_to_property, Disconnect,
};
use crate::controls::Control;
use crate::device::{DeviceRegistry, MidiDevice};
use crate::error::{Error, Result};
use crate::midi::{MessageKind, MAX_VALUE};
use crate::target::TargetSystem;
use crate::transport::Transport;

/// What a mapping drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingTarget {
    Property {
        device_label: String,
        property_name: String,
    },
    CoreMethod(String),
}

/// One control → target mapping, validated on construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MappingRecord", into = "MappingFields")]
pub struct Mapping {
    message_type: MessageKind,
    control_id: u8,
    target: MappingTarget,
}

/// Object form of a mapping as written in files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct MappingFields {
    message_type: String,
    control_id: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    property_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    core_method: Option<String>,
}

/// Either the positional `[type, id, device, property]` form or the object form.
/// Both are kept loose so validation reports [`Error::InvalidMapping`].
#[derive(Deserialize)]
#[serde(untagged)]
enum MappingRecord {
    Positional(Vec<Value>),
    Fields(Map<String, Value>),
}

/// A device map as read from a file, before mapping validation
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDeviceMap {
    device_name: String,
    mappings: Vec<MappingRecord>,
}

impl TryFrom<RawDeviceMap> for DeviceMap {
    type Error = Error;

    fn try_from(raw: RawDeviceMap) -> Result<Self> {
        let mappings = raw
            .mappings
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                Mapping::try_from(record).map_err(|e| match e {
                    Error::InvalidMapping(msg) => {
                        Error::InvalidMapping(format!("mapping #{}: {}", index, msg))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(raw.device_name, mappings))
    }
}

impl Mapping {
    /// Validate and build a mapping.
    ///
    /// `message_type` accepts the `button`, `knob` and `slider` aliases.
    /// Exactly one of `core_method` or `device_label` + `property_name` must
    /// be given.
    pub fn new(
        message_type: &str,
        control_id: u8,
        device_label: Option<String>,
        property_name: Option<String>,
        core_method: Option<String>,
    ) -> Result<Self> {
        let message_type: MessageKind = message_type.parse()?;
        if control_id > MAX_VALUE {
            return Err(Error::InvalidMapping(format!(
                "control_id must be 0-{}, not {}",
                MAX_VALUE, control_id
            )));
        }

        let target = match (core_method, device_label, property_name) {
            (Some(method), None, None) => MappingTarget::CoreMethod(method),
            (None, Some(device_label), Some(property_name)) => MappingTarget::Property {
                device_label,
                property_name,
            },
            (Some(_), _, _) => {
                return Err(Error::InvalidMapping(
                    "core_method cannot be combined with device_label or property_name".to_string(),
                ))
            }
            (None, _, _) => {
                return Err(Error::InvalidMapping(
                    "either core_method or both device_label and property_name must be given"
                        .to_string(),
                ))
            }
        };

        Ok(Self {
            message_type,
            control_id,
            target,
        })
    }

    pub fn property(
        message_type: &str,
        control_id: u8,
        device_label: &str,
        property_name: &str,
    ) -> Result<Self> {
        Self::new(
            message_type,
            control_id,
            Some(device_label.to_string()),
            Some(property_name.to_string()),
            None,
        )
    }

    pub fn core_method(message_type: &str, control_id: u8, method: &str) -> Result<Self> {
        Self::new(message_type, control_id, None, None, Some(method.to_string()))
    }

    /// Build from the positional form:
    /// `[message_type, control_id, device_label?, property_name?, core_method?]`
    fn from_positional(values: Vec<Value>) -> Result<Self> {
        if !(2..=5).contains(&values.len()) {
            return Err(Error::InvalidMapping(format!(
                "positional mapping needs 2 to 5 elements, got {}",
                values.len()
            )));
        }

        let message_type = values[0].as_str().ok_or_else(|| {
            Error::InvalidMapping(format!("message_type must be a string, not {}", values[0]))
        })?;
        let control_id = values[1]
            .as_u64()
            .and_then(|id| u8::try_from(id).ok())
            .ok_or_else(|| {
                Error::InvalidMapping(format!(
                    "control_id must be an integer, not {}",
                    values[1]
                ))
            })?;

        let text = |index: usize| -> Result<Option<String>> {
            match values.get(index) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(other) => Err(Error::InvalidMapping(format!(
                    "expected a string at position {}, not {}",
                    index, other
                ))),
            }
        };

        Self::new(message_type, control_id, text(2)?, text(3)?, text(4)?)
    }

    pub fn message_type(&self) -> MessageKind {
        self.message_type
    }

    pub fn control_id(&self) -> u8 {
        self.control_id
    }

    pub fn target(&self) -> &MappingTarget {
        &self.target
    }

    pub fn device_label(&self) -> Option<&str> {
        match &self.target {
            MappingTarget::Property { device_label, .. } => Some(device_label),
            MappingTarget::CoreMethod(_) => None,
        }
    }

    pub fn property_name(&self) -> Option<&str> {
        match &self.target {
            MappingTarget::Property { property_name, .. } => Some(property_name),
            MappingTarget::CoreMethod(_) => None,
        }
    }

    pub fn core_method_name(&self) -> Option<&str> {
        match &self.target {
            MappingTarget::CoreMethod(method) => Some(method),
            MappingTarget::Property { .. } => None,
        }
    }

    /// The knob (control_change) or button (note) this mapping addresses
    pub fn control(&self, device: &MidiDevice) -> Result<Control> {
        if self.message_type.is_note() {
            device
                .buttons()
                .get(self.control_id)
                .cloned()
                .map(Control::Button)
                .ok_or(Error::UnknownControl {
                    kind: "button",
                    index: self.control_id,
                })
        } else {
            device
                .knobs()
                .get(self.control_id)
                .cloned()
                .map(Control::Knob)
                .ok_or(Error::UnknownControl {
                    kind: "knob",
                    index: self.control_id,
                })
        }
    }

    /// Bind this mapping's control on `device` to its target on `core`
    pub fn connect(&self, device: &MidiDevice, core: &Arc<dyn TargetSystem>) -> Result<Disconnect> {
        let control = self.control(device)?;
        match (&self.target, &control) {
            (MappingTarget::CoreMethod(method), _) => connect_core_method(&control, core, method),
            (
                MappingTarget::Property {
                    device_label,
                    property_name,
                },
                Control::Knob(knob),
            ) => connect_knob_to_property(knob, core, device_label, property_name),
            (
                MappingTarget::Property {
                    device_label,
                    property_name,
                },
                Control::Button(button),
            ) => connect_button_to_property(button, core, device_label, property_name),
        }
    }
}

impl TryFrom<MappingRecord> for Mapping {
    type Error = Error;

    fn try_from(record: MappingRecord) -> Result<Self> {
        match record {
            MappingRecord::Positional(values) => Self::from_positional(values),
            MappingRecord::Fields(fields) => {
                let fields: MappingFields = serde_json::from_value(Value::Object(fields))
                    .map_err(|e| Error::InvalidMapping(e.to_string()))?;
                Self::new(
                    &fields.message_type,
                    fields.control_id,
                    fields.device_label,
                    fields.property_name,
                    fields.core_method,
                )
            }
        }
    }
}

impl From<Mapping> for MappingFields {
    fn from(mapping: Mapping) -> Self {
        let (device_label, property_name, core_method) = match mapping.target {
            MappingTarget::Property {
                device_label,
                property_name,
            } => (Some(device_label), Some(property_name), None),
            MappingTarget::CoreMethod(method) => (None, None, Some(method)),
        };
        Self {
            message_type: mapping.message_type.to_string(),
            control_id: mapping.control_id,
            device_label,
            property_name,
            core_method,
        }
    }
}

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> ", self.message_type, self.control_id)?;
        match &self.target {
            MappingTarget::Property {
                device_label,
                property_name,
            } => write!(f, "{}.{}", device_label, property_name),
            MappingTarget::CoreMethod(method) => write!(f, "{}()", method),
        }
    }
}

/// A device name with its ordered list of mappings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceMap {
    pub device_name: String,
    pub mappings: Vec<Mapping>,
}

impl DeviceMap {
    pub fn new(device_name: impl Into<String>, mappings: Vec<Mapping>) -> Self {
        Self {
            device_name: device_name.into(),
            mappings,
        }
    }

    /// Read a map from a `.json`, `.yaml` or `.yml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match extension.as_deref() {
            Some("json") => Self::from_json_str(&std::fs::read_to_string(path)?),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&std::fs::read_to_string(path)?),
            _ => Err(Error::UnsupportedFormat(path.to_path_buf())),
        }
    }

    /// Parse a JSON map. Bad mapping entries fail with [`Error::InvalidMapping`].
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str::<RawDeviceMap>(json)?.try_into()
    }

    /// Parse a YAML map. Bad mapping entries fail with [`Error::InvalidMapping`].
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str::<RawDeviceMap>(yaml)?.try_into()
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Bind every mapping to `core`, in order.
    ///
    /// Returns one handle disconnecting all bindings. If any mapping fails,
    /// the bindings already made by this call are disconnected before the
    /// error is returned.
    pub fn connect_to_core(
        &self,
        core: &Arc<dyn TargetSystem>,
        device: &MidiDevice,
    ) -> Result<Disconnect> {
        let mut handles = Vec::with_capacity(self.mappings.len());

        for (index, mapping) in self.mappings.iter().enumerate() {
            match mapping.connect(device, core) {
                Ok(handle) => {
                    debug!("Mapping #{} connected: {}", index, mapping);
                    handles.push(handle);
                }
                Err(e) => {
                    warn!(
                        "Mapping #{} ({}) failed, rolling back {} bindings: {}",
                        index,
                        mapping,
                        handles.len(),
                        e
                    );
                    // Aggregate teardown never fails
                    let _ = Disconnect::all(handles).disconnect();
                    return Err(e);
                }
            }
        }

        info!(
            "Connected {} mappings on '{}'",
            handles.len(),
            self.device_name
        );
        Ok(Disconnect::all(handles))
    }

    /// Open `device_name` through the registry, then connect to `core`
    pub fn open_and_connect(
        &self,
        registry: &DeviceRegistry,
        transport: &dyn Transport,
        core: &Arc<dyn TargetSystem>,
    ) -> Result<(MidiDevice, Disconnect)> {
        let device = registry.open(&self.device_name, transport)?;
        match self.connect_to_core(core, &device) {
            Ok(disconnect) => Ok((device, disconnect)),
            Err(e) => {
                device.close();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests;
