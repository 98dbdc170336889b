//! The controlled system
//!
//! [`TargetSystem`] is the seam to the microscope core: named device
//! properties with limits or allowed values, a property-changed signal and
//! callable methods. [`memory::SimulatedCore`] implements it in process.

pub mod memory;

use serde_json::Value;

use crate::error::Result;
use crate::signal::Signal;

/// A property value change reported by the target system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChange {
    pub device: String,
    pub property: String,
    pub value: String,
}

impl PropertyChange {
    pub fn is_for(&self, device: &str, property: &str) -> bool {
        self.device == device && self.property == property
    }
}

/// Property registry of the controlled system
///
/// Implementations must be safe to call from the MIDI delivery thread and
/// must not hold internal locks while emitting [`TargetSystem::property_changed`].
pub trait TargetSystem: Send + Sync {
    /// Whether the property has numeric limits
    fn has_property_limits(&self, device: &str, property: &str) -> Result<bool>;

    /// Lower and upper limit of the property
    fn property_limits(&self, device: &str, property: &str) -> Result<(f64, f64)>;

    /// Legal values in the order the system reports them (empty if unrestricted)
    fn allowed_property_values(&self, device: &str, property: &str) -> Result<Vec<String>>;

    fn get_property(&self, device: &str, property: &str) -> Result<String>;

    fn set_property(&self, device: &str, property: &str, value: &str) -> Result<()>;

    /// Fires after any property value changes
    fn property_changed(&self) -> &Signal<PropertyChange>;

    fn has_method(&self, name: &str) -> bool;

    fn call_method(&self, name: &str, args: &[Value]) -> Result<()>;
}
