//! MIDI controller devices
//!
//! A [`MidiDevice`] owns one input/output port pair, builds its button and
//! knob groups and routes inbound hardware messages to the right control.

pub mod xtouch_mini;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::controls::{Buttons, Knobs};
use crate::error::{Error, Result};
use crate::midi::{MidiMessage, DEFAULT_CHANNEL};
use crate::transport::{InputPort, OutputPort, Transport};

pub use xtouch_mini::XTouchMini;

/// Environment variable enabling per-message logging
pub const DEBUG_ENV: &str = "MMCORE_MIDI_DEBUG";

/// Which notes and controllers a device exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLayout {
    pub button_ids: Vec<u8>,
    pub knob_ids: Vec<u8>,
    pub channel: u8,
}

impl DeviceLayout {
    pub fn new(
        button_ids: impl IntoIterator<Item = u8>,
        knob_ids: impl IntoIterator<Item = u8>,
    ) -> Self {
        Self {
            button_ids: button_ids.into_iter().collect(),
            knob_ids: knob_ids.into_iter().collect(),
            channel: DEFAULT_CHANNEL,
        }
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }
}

/// Generic MIDI controller
pub struct MidiDevice {
    name: String,
    input: Box<dyn InputPort>,
    output: Arc<dyn OutputPort>,
    buttons: Buttons,
    knobs: Knobs,
    debug: Arc<AtomicBool>,
}

impl MidiDevice {
    /// Open the ports named `name` and install the demultiplexer
    pub fn open(transport: &dyn Transport, name: &str, layout: DeviceLayout) -> Result<Self> {
        let (mut input, output) = transport.open(name)?;

        let buttons = Buttons::new(layout.button_ids, layout.channel, output.clone());
        let knobs = Knobs::new(layout.knob_ids, layout.channel, output.clone());
        let debug = Arc::new(AtomicBool::new(debug_from_env()));

        let (b, k, d) = (buttons.clone(), knobs.clone(), debug.clone());
        let device_name = name.to_string();
        input.set_callback(Arc::new(move |message: MidiMessage| {
            if d.load(Ordering::Relaxed) {
                info!("{} {}", device_name, message);
            }
            demultiplex(&b, &k, &message);
        }));

        info!(
            "Opened MIDI device '{}' ({} buttons, {} knobs)",
            name,
            buttons.len(),
            knobs.len()
        );

        Ok(Self {
            name: name.to_string(),
            input,
            output,
            buttons,
            knobs,
            debug,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The buttons on the device
    pub fn buttons(&self) -> &Buttons {
        &self.buttons
    }

    /// The knobs and sliders on the device
    pub fn knobs(&self) -> &Knobs {
        &self.knobs
    }

    /// Log every inbound message at info level
    pub fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
    }

    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// Route one message as if it had arrived from the hardware
    pub fn dispatch(&self, message: &MidiMessage) {
        demultiplex(&self.buttons, &self.knobs, message);
    }

    /// Set all knobs to 0 and release all buttons.
    ///
    /// Every write is attempted; the first failure is returned.
    pub fn reset(&self) -> Result<()> {
        let mut first_error = None;

        let knob_writes = self.knobs.values().map(|knob| knob.set_value(0));
        let button_writes = self.buttons.values().map(|button| button.release());
        for result in knob_writes.chain(button_writes) {
            if let Err(e) = result {
                warn!("Reset write on '{}' failed: {}", self.name, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close both ports
    pub fn close(self) {
        self.input.close();
        self.output.close();
        info!("Closed MIDI device '{}'", self.name);
    }
}

impl fmt::Debug for MidiDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MidiDevice")
            .field("name", &self.name)
            .field("buttons", &self.buttons.len())
            .field("knobs", &self.knobs.len())
            .finish()
    }
}

fn debug_from_env() -> bool {
    std::env::var(DEBUG_ENV).map(|v| v == "1").unwrap_or(false)
}

/// Route an inbound message to the control it addresses
fn demultiplex(buttons: &Buttons, knobs: &Knobs, message: &MidiMessage) {
    match *message {
        MidiMessage::ControlChange { control, value, .. } => match knobs.get(control) {
            Some(knob) => knob.changed().emit(&value),
            None => trace!("No knob for control {}", control),
        },
        MidiMessage::NoteOn { note, .. } => match buttons.get(note) {
            Some(button) => button.pressed().emit(&()),
            None => trace!("No button for note {}", note),
        },
        MidiMessage::NoteOff { note, .. } => match buttons.get(note) {
            Some(button) => button.released().emit(&()),
            None => trace!("No button for note {}", note),
        },
        _ => trace!("Ignored {}", message),
    }
}

/// Opens a known device model on a transport
pub type DeviceFactory = Arc<dyn Fn(&dyn Transport) -> Result<MidiDevice> + Send + Sync>;

/// Device models by name
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    factories: BTreeMap<String, DeviceFactory>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every model shipped in this crate
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(XTouchMini::DEVICE_NAME, |transport: &dyn Transport| {
            XTouchMini::open(transport).map(XTouchMini::into_inner)
        });
        registry
    }

    /// Register a factory, replacing any previous one with the same name
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&dyn Transport) -> Result<MidiDevice> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!("Registered device model '{}'", name);
        self.factories.insert(name, Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|s| s.as_str())
    }

    /// Open the device model registered under exactly `name`
    pub fn open(&self, name: &str, transport: &dyn Transport) -> Result<MidiDevice> {
        let factory = self.factories.get(name).ok_or_else(|| Error::UnknownDeviceModel {
            name: name.to_string(),
            known: self.factories.keys().cloned().collect(),
        })?;
        factory(transport)
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use parking_lot::Mutex;

    fn open_device() -> (crate::transport::memory::MemoryPort, MidiDevice) {
        let transport = MemoryTransport::new();
        let port = transport.add_port("test-device");
        let device =
            MidiDevice::open(&transport, "test-device", DeviceLayout::new(0..8, 1..=4)).unwrap();
        (port, device)
    }

    #[test]
    fn test_demultiplex_routes_to_controls() {
        let (port, device) = open_device();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        device.knobs()[4].changed().connect(move |v| l.lock().push(format!("knob4 {}", v)));
        let l = log.clone();
        device.buttons()[3].pressed().connect(move |_| l.lock().push("pressed3".to_string()));
        let l = log.clone();
        device.buttons()[3].released().connect(move |_| l.lock().push("released3".to_string()));

        port.inject(MidiMessage::ControlChange { channel: 10, control: 4, value: 30 });
        port.inject(MidiMessage::NoteOn { channel: 10, note: 3, velocity: 64 });
        port.inject(MidiMessage::NoteOff { channel: 10, note: 3, velocity: 64 });

        assert_eq!(*log.lock(), vec!["knob4 30", "pressed3", "released3"]);
    }

    #[test]
    fn test_unknown_messages_are_ignored() {
        let (port, device) = open_device();
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        device.knobs().changed().connect(move |_| *h.lock() += 1);
        let h = hits.clone();
        device.buttons().pressed().connect(move |_| *h.lock() += 1);

        port.inject(MidiMessage::PitchBend { channel: 0, value: 100 });
        port.inject(MidiMessage::ProgramChange { channel: 0, program: 1 });
        port.inject(MidiMessage::ControlChange { channel: 10, control: 99, value: 1 });
        port.inject(MidiMessage::NoteOn { channel: 10, note: 99, velocity: 1 });

        assert_eq!(*hits.lock(), 0);
    }

    #[test]
    fn test_dispatch_without_hardware() {
        let (_port, device) = open_device();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        device.knobs().changed().connect(move |ev| *s.lock() = Some(*ev));

        device.dispatch(&MidiMessage::ControlChange { channel: 0, control: 2, value: 5 });
        assert_eq!(*seen.lock(), Some((2, 5)));
    }

    #[test]
    fn test_open_failure_lists_available() {
        let transport = MemoryTransport::new();
        transport.add_port("Launch Control XL");

        let err = MidiDevice::open(&transport, "X-TOUCH MINI", DeviceLayout::new(0..1, 0..1))
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("X-TOUCH MINI"), "{text}");
        assert!(text.contains("Launch Control XL"), "{text}");
    }

    #[test]
    fn test_reset_writes_everything() {
        let (port, device) = open_device();
        device.reset().unwrap();

        let sent = port.take_sent();
        assert_eq!(sent.len(), 4 + 8);
        assert!(sent[..4]
            .iter()
            .all(|m| matches!(m, MidiMessage::ControlChange { value: 0, .. })));
        assert!(sent[4..]
            .iter()
            .all(|m| matches!(m, MidiMessage::NoteOff { .. })));
    }

    #[test]
    fn test_reset_reports_failure_after_trying_all() {
        let (port, device) = open_device();
        port.set_fail_sends(true);
        assert!(device.reset().is_err());
    }

    #[test]
    fn test_close_releases_ports() {
        let (port, device) = open_device();
        let knob = device.knobs()[1].clone();
        device.close();

        assert!(!port.is_input_open());
        assert!(!port.is_output_open());
        assert!(knob.set_value(1).is_err());
    }

    #[test]
    fn test_layout_channel() {
        let transport = MemoryTransport::new();
        let port = transport.add_port("dev");
        let layout = DeviceLayout::new([7], []).with_channel(0);
        let device = MidiDevice::open(&transport, "dev", layout).unwrap();

        device.buttons()[7].press().unwrap();
        assert_eq!(
            port.take_sent(),
            vec![MidiMessage::NoteOn { channel: 0, note: 7, velocity: 64 }]
        );
    }

    #[test]
    fn test_registry() {
        let transport = MemoryTransport::new();
        transport.add_port(XTouchMini::DEVICE_NAME);
        let registry = DeviceRegistry::with_builtin();

        assert!(registry.contains("X-TOUCH MINI"));
        let device = registry.open("X-TOUCH MINI", &transport).unwrap();
        assert_eq!(device.knobs().len(), 18);

        match registry.open("X-TOUCH", &transport).unwrap_err() {
            Error::UnknownDeviceModel { name, known } => {
                assert_eq!(name, "X-TOUCH");
                assert_eq!(known, vec!["X-TOUCH MINI".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
