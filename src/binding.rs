//! Bidirectional control ↔ property bindings
//!
//! Each `connect_*` function installs one subscription on the control
//! (hardware → property) and, for property bindings, one on the target's
//! property-changed signal (property → hardware display). The returned
//! [`Disconnect`] removes them.
//!
//! Hardware echo cannot loop: writing to a control never emits the control's
//! own signals, only inbound hardware messages do.

use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::controls::{Button, Control, Knob};
use crate::error::{Error, Result};
use crate::midi::MAX_VALUE;
use crate::target::TargetSystem;

type Teardown = Box<dyn FnOnce() -> Result<()> + Send>;

/// Handle that tears a binding down
///
/// Only the first call to [`Disconnect::disconnect`] does anything; later
/// calls return `Ok(())`.
pub struct Disconnect {
    teardown: Mutex<Option<Teardown>>,
}

impl Disconnect {
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// A handle with nothing to tear down
    pub fn noop() -> Self {
        Self {
            teardown: Mutex::new(None),
        }
    }

    /// Combine handles into one that calls each of them in order.
    ///
    /// Individual failures are logged and discarded so every handle runs.
    pub fn all(handles: Vec<Disconnect>) -> Self {
        Self::new(move || {
            for (index, handle) in handles.iter().enumerate() {
                if let Err(e) = handle.disconnect() {
                    debug!("Ignoring failure of disconnect #{}: {}", index, e);
                }
            }
            Ok(())
        })
    }

    pub fn disconnect(&self) -> Result<()> {
        let teardown = self.teardown.lock().take();
        match teardown {
            Some(teardown) => teardown(),
            None => Ok(()),
        }
    }

    /// False once disconnected, and for no-op handles
    pub fn is_connected(&self) -> bool {
        self.teardown.lock().is_some()
    }
}

impl fmt::Debug for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disconnect")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Linear map between the 7-bit knob range and a property's limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnobScale {
    lower: f64,
    upper: f64,
}

impl KnobScale {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// Knob value → property value, kept inside the limits
    pub fn to_target(&self, value: u8) -> f64 {
        let target =
            f64::from(value) / f64::from(MAX_VALUE) * (self.upper - self.lower) + self.lower;
        // float error can overshoot an endpoint
        target
            .max(self.lower.min(self.upper))
            .min(self.upper.max(self.lower))
    }

    /// Property value → knob value, rounded and clamped into 0..=127
    pub fn to_hardware(&self, value: f64) -> u8 {
        let span = self.upper - self.lower;
        if span == 0.0 || !span.is_finite() {
            return 0;
        }
        let scaled = ((value - self.lower) / span * f64::from(MAX_VALUE)).round();
        // NaN casts to 0
        scaled.clamp(0.0, f64::from(MAX_VALUE)) as u8
    }
}

/// Shortest decimal text that parses back to exactly `value`
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        // also folds -0
        return "0".to_string();
    }
    value.to_string()
}

fn parse_number(device: &str, property: &str, value: &str) -> Result<f64> {
    value.trim().parse().map_err(|_| Error::InvalidPropertyValue {
        device: device.to_string(),
        property: property.to_string(),
        value: value.to_string(),
    })
}

/// Connect a knob to a property with numeric limits.
///
/// The knob display is initialised from the current property value. A
/// property without limits cannot be bound: a warning is logged and a
/// no-op handle returned.
pub fn connect_knob_to_property(
    knob: &Knob,
    core: &Arc<dyn TargetSystem>,
    device_label: &str,
    property_name: &str,
) -> Result<Disconnect> {
    if !core.has_property_limits(device_label, property_name)? {
        warn!(
            "Property {}.{} has no limits and cannot be connected to a MIDI knob",
            device_label, property_name
        );
        return Ok(Disconnect::noop());
    }

    let (lower, upper) = core.property_limits(device_label, property_name)?;
    let scale = KnobScale::new(lower, upper);

    let current = core.get_property(device_label, property_name)?;
    let current = parse_number(device_label, property_name, &current)?;
    knob.set_value(scale.to_hardware(current))?;

    // hardware → property
    let knob_slot = {
        let core = core.clone();
        let (device, property) = (device_label.to_string(), property_name.to_string());
        knob.changed().connect(move |&value| {
            let target = format_number(scale.to_target(value));
            if let Err(e) = core.set_property(&device, &property, &target) {
                warn!("Failed to set {}.{} from knob: {}", device, property, e);
            }
        })
    };

    // property → hardware
    let core_slot = {
        let knob = knob.clone();
        let (device, property) = (device_label.to_string(), property_name.to_string());
        core.property_changed().connect(move |change| {
            if !change.is_for(&device, &property) {
                return;
            }
            match parse_number(&device, &property, &change.value) {
                Ok(value) => {
                    if let Err(e) = knob.set_value(scale.to_hardware(value)) {
                        warn!("Failed to update {:?} display: {}", knob, e);
                    }
                }
                Err(e) => warn!("{}", e),
            }
        })
    };

    debug!("Connected {:?} to {}.{}", knob, device_label, property_name);

    let changed = knob.changed().clone();
    let core = core.clone();
    Ok(Disconnect::new(move || {
        changed.disconnect(knob_slot);
        core.property_changed().disconnect(core_slot);
        Ok(())
    }))
}

/// How a button lights up for a property value
#[derive(Debug, Clone, Copy)]
struct ButtonDisplay {
    is_bool: bool,
}

impl ButtonDisplay {
    fn for_allowed(allowed: &[String]) -> Self {
        let values: BTreeSet<&str> = allowed.iter().map(String::as_str).collect();
        Self {
            is_bool: values == BTreeSet::from(["0", "1"]),
        }
    }

    /// "0" turns the light off. Only boolean properties light it up;
    /// multi-valued properties have no on state to show.
    fn apply(&self, button: &Button, value: &str) -> Result<()> {
        if value == "0" || value.eq_ignore_ascii_case("false") {
            button.release()
        } else if self.is_bool {
            button.press()
        } else {
            Ok(())
        }
    }
}

/// The value after `current` in `allowed`, wrapping around
fn next_allowed<'a>(allowed: &'a [String], current: &str) -> Option<&'a str> {
    let index = allowed.iter().position(|v| v == current)?;
    Some(allowed[(index + 1) % allowed.len()].as_str())
}

fn not_allowed(device: &str, property: &str, value: &str, allowed: &[String]) -> Error {
    Error::CurrentValueNotAllowed {
        device: device.to_string(),
        property: property.to_string(),
        value: value.to_string(),
        allowed: allowed.to_vec(),
    }
}

/// Connect a button to a property with allowed values.
///
/// Each release of the button advances the property to its next allowed
/// value. A property without allowed values cannot be bound: a warning is
/// logged and a no-op handle returned. Fails if the property's current value
/// is not one of its allowed values.
pub fn connect_button_to_property(
    button: &Button,
    core: &Arc<dyn TargetSystem>,
    device_label: &str,
    property_name: &str,
) -> Result<Disconnect> {
    let allowed = core.allowed_property_values(device_label, property_name)?;
    if allowed.is_empty() {
        warn!(
            "Property {}.{} has no allowed values and cannot be connected to a MIDI button",
            device_label, property_name
        );
        return Ok(Disconnect::noop());
    }

    let display = ButtonDisplay::for_allowed(&allowed);

    let current = core.get_property(device_label, property_name)?;
    if !allowed.contains(&current) {
        return Err(not_allowed(device_label, property_name, &current, &allowed));
    }
    display.apply(button, &current)?;

    // hardware → property
    let button_slot = {
        let core = core.clone();
        let target = button.clone();
        let (device, property) = (device_label.to_string(), property_name.to_string());
        button.released().connect(move |_| {
            let current = match core.get_property(&device, &property) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Failed to read {}.{}: {}", device, property, e);
                    return;
                }
            };
            let Some(next) = next_allowed(&allowed, &current) else {
                error!("{}", not_allowed(&device, &property, &current, &allowed));
                return;
            };
            if let Err(e) = core.set_property(&device, &property, next) {
                warn!("Failed to set {}.{} from button: {}", device, property, e);
                return;
            }
            if let Err(e) = display.apply(&target, next) {
                warn!("Failed to update {:?} display: {}", target, e);
            }
        })
    };

    // property → hardware
    let core_slot = {
        let target = button.clone();
        let (device, property) = (device_label.to_string(), property_name.to_string());
        core.property_changed().connect(move |change| {
            if !change.is_for(&device, &property) {
                return;
            }
            if let Err(e) = display.apply(&target, &change.value) {
                warn!("Failed to update {:?} display: {}", target, e);
            }
        })
    };

    debug!("Connected {:?} to {}.{}", button, device_label, property_name);

    let released = button.released().clone();
    let core = core.clone();
    Ok(Disconnect::new(move || {
        released.disconnect(button_slot);
        core.property_changed().disconnect(core_slot);
        Ok(())
    }))
}

/// Connect a control straight to a core method.
///
/// A button press calls `method()`; a knob change calls `method(value)`
/// with the raw 0-127 value. Nothing flows back to the hardware.
pub fn connect_core_method(
    control: &Control,
    core: &Arc<dyn TargetSystem>,
    method: &str,
) -> Result<Disconnect> {
    if !core.has_method(method) {
        return Err(Error::UnknownCoreMethod(method.to_string()));
    }

    let disconnect = match control {
        Control::Button(button) => {
            let (core, name) = (core.clone(), method.to_string());
            let slot = button.pressed().connect(move |_| {
                if let Err(e) = core.call_method(&name, &[]) {
                    warn!("Core method {} failed: {}", name, e);
                }
            });
            let pressed = button.pressed().clone();
            Disconnect::new(move || {
                pressed.disconnect(slot);
                Ok(())
            })
        }
        Control::Knob(knob) => {
            let (core, name) = (core.clone(), method.to_string());
            let slot = knob.changed().connect(move |&value| {
                if let Err(e) = core.call_method(&name, &[json!(value)]) {
                    warn!("Core method {} failed: {}", name, e);
                }
            });
            let changed = knob.changed().clone();
            Disconnect::new(move || {
                changed.disconnect(slot);
                Ok(())
            })
        }
    };

    debug!("Connected {:?} to core method {}", control, method);
    Ok(disconnect)
}
