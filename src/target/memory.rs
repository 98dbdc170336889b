//! In-process target system
//!
//! [`SimulatedCore`] keeps device properties in memory, validates writes
//! against limits or allowed values and records method calls. The demo
//! preset mirrors the camera of the standard demo hardware configuration.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

use super::{PropertyChange, TargetSystem};
use crate::error::{Error, Result};
use crate::signal::Signal;

/// Constraint on a property value
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    /// Any string
    Free,
    /// Numeric value within [lower, upper]
    Limits { lower: f64, upper: f64 },
    /// One of an ordered list of strings
    Allowed(Vec<String>),
}

#[derive(Debug, Clone)]
struct Property {
    value: String,
    kind: PropertyKind,
}

/// Callable method on the simulated core
pub type MethodFn = Arc<dyn Fn(&[Value]) -> Result<()> + Send + Sync>;

/// In-memory [`TargetSystem`]
#[derive(Default)]
pub struct SimulatedCore {
    devices: RwLock<BTreeMap<String, BTreeMap<String, Property>>>,
    methods: RwLock<BTreeMap<String, MethodFn>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
    property_changed: Signal<PropertyChange>,
}

impl SimulatedCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Core with a demo `Camera` device and `snap`/`setAutoFocusOffset` methods
    pub fn demo() -> Self {
        let allowed = |values: &[&str]| {
            PropertyKind::Allowed(values.iter().map(|v| v.to_string()).collect())
        };
        let limits = |lower, upper| PropertyKind::Limits { lower, upper };

        let core = Self::new();
        core.define_property("Camera", "Binning", "1", allowed(&["1", "2", "4", "8"]));
        core.define_property("Camera", "AllowMultiROI", "0", allowed(&["0", "1"]));
        core.define_property("Camera", "PixelType", "8bit", allowed(&["8bit", "16bit", "32bit"]));
        core.define_property("Camera", "Gain", "0", limits(-5.0, 8.0));
        core.define_property("Camera", "Exposure", "10", limits(0.0, 10000.0));
        core.define_property("Camera", "CCDTemperature", "0", limits(-100.0, 10.0));
        core.define_property("Camera", "TestProperty5", "0", PropertyKind::Free);
        core.register_method("snap", |_| Ok(()));
        core.register_method("setAutoFocusOffset", |_| Ok(()));
        core
    }

    /// Create or replace a property. Does not emit a change.
    pub fn define_property(&self, device: &str, property: &str, value: &str, kind: PropertyKind) {
        self.devices
            .write()
            .entry(device.to_string())
            .or_default()
            .insert(
                property.to_string(),
                Property {
                    value: value.to_string(),
                    kind,
                },
            );
    }

    /// Remove a device with all its properties
    pub fn unload_device(&self, device: &str) -> bool {
        self.devices.write().remove(device).is_some()
    }

    pub fn has_device(&self, device: &str) -> bool {
        self.devices.read().contains_key(device)
    }

    pub fn register_method<F>(&self, name: &str, method: F)
    where
        F: Fn(&[Value]) -> Result<()> + Send + Sync + 'static,
    {
        self.methods.write().insert(name.to_string(), Arc::new(method));
    }

    /// Every method call made so far, in order
    pub fn method_calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().clone()
    }

    fn with_property<T>(
        &self,
        device: &str,
        property: &str,
        f: impl FnOnce(&Property) -> T,
    ) -> Result<T> {
        let devices = self.devices.read();
        let prop = devices
            .get(device)
            .ok_or_else(|| no_device(device))?
            .get(property)
            .ok_or_else(|| no_property(device, property))?;
        Ok(f(prop))
    }

    fn validate(device: &str, property: &str, kind: &PropertyKind, value: &str) -> Result<()> {
        match kind {
            PropertyKind::Free => Ok(()),
            PropertyKind::Limits { lower, upper } => {
                let number: f64 = value.trim().parse().map_err(|_| Error::InvalidPropertyValue {
                    device: device.to_string(),
                    property: property.to_string(),
                    value: value.to_string(),
                })?;
                if number < *lower || number > *upper {
                    return Err(Error::Target(format!(
                        "Value {} of {}.{} is outside limits [{}, {}]",
                        value, device, property, lower, upper
                    )));
                }
                Ok(())
            }
            PropertyKind::Allowed(values) => {
                if values.iter().any(|v| v == value) {
                    Ok(())
                } else {
                    Err(Error::Target(format!(
                        "Value {:?} is not allowed for {}.{} (allowed: {:?})",
                        value, device, property, values
                    )))
                }
            }
        }
    }
}

fn no_device(device: &str) -> Error {
    Error::Target(format!("No device with label \"{}\"", device))
}

fn no_property(device: &str, property: &str) -> Error {
    Error::Target(format!(
        "Property \"{}\" of device \"{}\" does not exist",
        property, device
    ))
}

impl TargetSystem for SimulatedCore {
    fn has_property_limits(&self, device: &str, property: &str) -> Result<bool> {
        self.with_property(device, property, |p| matches!(p.kind, PropertyKind::Limits { .. }))
    }

    fn property_limits(&self, device: &str, property: &str) -> Result<(f64, f64)> {
        self.with_property(device, property, |p| match p.kind {
            PropertyKind::Limits { lower, upper } => (lower, upper),
            _ => (0.0, 0.0),
        })
    }

    fn allowed_property_values(&self, device: &str, property: &str) -> Result<Vec<String>> {
        self.with_property(device, property, |p| match &p.kind {
            PropertyKind::Allowed(values) => values.clone(),
            _ => Vec::new(),
        })
    }

    fn get_property(&self, device: &str, property: &str) -> Result<String> {
        self.with_property(device, property, |p| p.value.clone())
    }

    fn set_property(&self, device: &str, property: &str, value: &str) -> Result<()> {
        {
            let mut devices = self.devices.write();
            let prop = devices
                .get_mut(device)
                .ok_or_else(|| no_device(device))?
                .get_mut(property)
                .ok_or_else(|| no_property(device, property))?;
            Self::validate(device, property, &prop.kind, value)?;
            prop.value = value.to_string();
        }

        trace!("Set {}.{} = {}", device, property, value);
        // Lock released before notifying
        self.property_changed.emit(&PropertyChange {
            device: device.to_string(),
            property: property.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn property_changed(&self) -> &Signal<PropertyChange> {
        &self.property_changed
    }

    fn has_method(&self, name: &str) -> bool {
        self.methods.read().contains_key(name)
    }

    fn call_method(&self, name: &str, args: &[Value]) -> Result<()> {
        let method = self
            .methods
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownCoreMethod(name.to_string()))?;

        debug!("Calling core method {}({:?})", name, args);
        self.calls.lock().push((name.to_string(), args.to_vec()));
        method(args)
    }
}
