//! Buttons and knobs
//!
//! Primitives send commands to hardware and expose signals that fire only
//! when the hardware reports a new state. Calling [`Button::press`] or
//! [`Knob::set_value`] never emits [`Button::pressed`] or [`Knob::changed`],
//! so a binding echoing a software change back to hardware cannot re-trigger
//! itself.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use crate::error::Result;
use crate::midi::{MidiMessage, DEFAULT_VELOCITY, MAX_VALUE};
use crate::signal::Signal;
use crate::transport::OutputPort;

/// A button (note) on a MIDI device
#[derive(Clone)]
pub struct Button {
    note: u8,
    channel: u8,
    output: Arc<dyn OutputPort>,
    pressed: Arc<Signal<()>>,
    released: Arc<Signal<()>>,
}

impl Button {
    pub fn new(note: u8, channel: u8, output: Arc<dyn OutputPort>) -> Self {
        Self {
            note,
            channel,
            output,
            pressed: Arc::new(Signal::new()),
            released: Arc::new(Signal::new()),
        }
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Send a note_on message (lights the button)
    pub fn press(&self) -> Result<()> {
        self.output.send(&MidiMessage::NoteOn {
            channel: self.channel,
            note: self.note,
            velocity: DEFAULT_VELOCITY,
        })
    }

    /// Send a note_off message
    pub fn release(&self) -> Result<()> {
        self.output.send(&MidiMessage::NoteOff {
            channel: self.channel,
            note: self.note,
            velocity: DEFAULT_VELOCITY,
        })
    }

    /// Fires when the hardware reports the button pressed
    pub fn pressed(&self) -> &Arc<Signal<()>> {
        &self.pressed
    }

    /// Fires when the hardware reports the button released
    pub fn released(&self) -> &Arc<Signal<()>> {
        &self.released
    }
}

impl fmt::Debug for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Button({})", self.note)
    }
}

/// A knob or slider on a MIDI device
#[derive(Clone)]
pub struct Knob {
    control: u8,
    channel: u8,
    output: Arc<dyn OutputPort>,
    changed: Arc<Signal<u8>>,
}

impl Knob {
    pub fn new(control: u8, channel: u8, output: Arc<dyn OutputPort>) -> Self {
        Self {
            control,
            channel,
            output,
            changed: Arc::new(Signal::new()),
        }
    }

    pub fn control(&self) -> u8 {
        self.control
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Send a control_change message moving the knob display to `value`
    pub fn set_value(&self, value: u8) -> Result<()> {
        self.output.send(&MidiMessage::ControlChange {
            channel: self.channel,
            control: self.control,
            value: value.min(MAX_VALUE),
        })
    }

    /// Fires with the new value when the hardware reports a change
    pub fn changed(&self) -> &Arc<Signal<u8>> {
        &self.changed
    }
}

impl fmt::Debug for Knob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Knob({})", self.control)
    }
}

/// Read-only index → control mapping
#[derive(Clone)]
pub struct ControlGroup<T> {
    members: Arc<BTreeMap<u8, T>>,
}

impl<T> ControlGroup<T> {
    fn new(members: BTreeMap<u8, T>) -> Self {
        Self {
            members: Arc::new(members),
        }
    }

    pub fn get(&self, index: u8) -> Option<&T> {
        self.members.get(&index)
    }

    pub fn contains(&self, index: u8) -> bool {
        self.members.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Indices in ascending order
    pub fn indices(&self) -> impl Iterator<Item = u8> + '_ {
        self.members.keys().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.members.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &T)> {
        self.members.iter().map(|(k, v)| (*k, v))
    }
}

impl<T> Index<u8> for ControlGroup<T> {
    type Output = T;

    fn index(&self, index: u8) -> &T {
        self.get(index)
            .unwrap_or_else(|| panic!("no control with index {}", index))
    }
}

impl<T: fmt::Debug> fmt::Debug for ControlGroup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.members.iter()).finish()
    }
}

/// All buttons of a device, with group-level signals carrying the note
#[derive(Clone)]
pub struct Buttons {
    group: ControlGroup<Button>,
    pressed: Arc<Signal<u8>>,
    released: Arc<Signal<u8>>,
}

impl Buttons {
    pub fn new(
        notes: impl IntoIterator<Item = u8>,
        channel: u8,
        output: Arc<dyn OutputPort>,
    ) -> Self {
        let members: BTreeMap<u8, Button> = notes
            .into_iter()
            .map(|note| (note, Button::new(note, channel, output.clone())))
            .collect();

        let pressed = Arc::new(Signal::new());
        let released = Arc::new(Signal::new());

        for (&note, button) in &members {
            let group_pressed = pressed.clone();
            button.pressed().connect(move |_| group_pressed.emit(&note));
            let group_released = released.clone();
            button.released().connect(move |_| group_released.emit(&note));
        }

        Self {
            group: ControlGroup::new(members),
            pressed,
            released,
        }
    }

    /// Fires with the note of any button the hardware reports pressed
    pub fn pressed(&self) -> &Arc<Signal<u8>> {
        &self.pressed
    }

    /// Fires with the note of any button the hardware reports released
    pub fn released(&self) -> &Arc<Signal<u8>> {
        &self.released
    }
}

impl std::ops::Deref for Buttons {
    type Target = ControlGroup<Button>;

    fn deref(&self) -> &Self::Target {
        &self.group
    }
}

impl fmt::Debug for Buttons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.group, f)
    }
}

/// All knobs of a device, with a group-level signal carrying (control, value)
#[derive(Clone)]
pub struct Knobs {
    group: ControlGroup<Knob>,
    changed: Arc<Signal<(u8, u8)>>,
}

impl Knobs {
    pub fn new(
        controls: impl IntoIterator<Item = u8>,
        channel: u8,
        output: Arc<dyn OutputPort>,
    ) -> Self {
        let members: BTreeMap<u8, Knob> = controls
            .into_iter()
            .map(|control| (control, Knob::new(control, channel, output.clone())))
            .collect();

        let changed = Arc::new(Signal::new());
        for (&control, knob) in &members {
            let group_changed = changed.clone();
            knob.changed()
                .connect(move |value| group_changed.emit(&(control, *value)));
        }

        Self {
            group: ControlGroup::new(members),
            changed,
        }
    }

    /// Fires with (control, value) when any knob reports a change
    pub fn changed(&self) -> &Arc<Signal<(u8, u8)>> {
        &self.changed
    }
}

impl std::ops::Deref for Knobs {
    type Target = ControlGroup<Knob>;

    fn deref(&self) -> &Self::Target {
        &self.group
    }
}

impl fmt::Debug for Knobs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.group, f)
    }
}

/// Either kind of primitive, as addressed by a mapping
#[derive(Debug, Clone)]
pub enum Control {
    Button(Button),
    Knob(Knob),
}
