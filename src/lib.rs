//! mmcore-midi - bind MIDI controller knobs and buttons to microscope properties
//!
//! Knobs follow numeric properties within their limits, buttons cycle through
//! a property's allowed values or call core methods, and every property
//! change is mirrored back onto the hardware.

pub mod binding;
pub mod controls;
pub mod device;
pub mod error;
pub mod map_spec;
pub mod midi;
pub mod signal;
pub mod target;
pub mod transport;
pub mod watcher;

pub use binding::{
    connect_button_to_property, connect_core_method, connect_knob_to_property, Disconnect,
    KnobScale,
};
pub use controls::{Button, Buttons, Control, Knob, Knobs};
pub use device::{DeviceLayout, DeviceRegistry, MidiDevice, XTouchMini};
pub use error::{Error, Result};
pub use map_spec::{DeviceMap, Mapping, MappingTarget};
pub use target::{PropertyChange, TargetSystem};
