//! MIDI message types
//!
//! Parsing and encoding of the channel voice messages exchanged with
//! controllers. System messages are not needed by the binding layer and
//! parse to `None`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Default MIDI channel used by controls (0-based)
pub const DEFAULT_CHANNEL: u8 = 10;

/// Velocity sent with button note messages
pub const DEFAULT_VELOCITY: u8 = 64;

/// Upper bound of a 7-bit data byte
pub const MAX_VALUE: u8 = 127;

/// Channel voice message. Channels are 0-based, data bytes 7-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    PolyPressure { channel: u8, note: u8, pressure: u8 },
    ControlChange { channel: u8, control: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    /// 14-bit value, 8192 is centre
    PitchBend { channel: u8, value: u16 },
}

impl MidiMessage {
    /// Decode one message from a raw packet
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;

        // Running status and system messages are not handled
        if !(0x80..0xF0).contains(&status) {
            return None;
        }

        let channel = status & 0x0F;
        let d1 = rest.first().map(|b| b & 0x7F);
        let d2 = rest.get(1).map(|b| b & 0x7F);

        match status & 0xF0 {
            0x80 => Some(MidiMessage::NoteOff {
                channel,
                note: d1?,
                velocity: d2?,
            }),
            0x90 => {
                let (note, velocity) = (d1?, d2?);
                // velocity 0 releases
                Some(match velocity {
                    0 => MidiMessage::NoteOff { channel, note, velocity },
                    _ => MidiMessage::NoteOn { channel, note, velocity },
                })
            }
            0xA0 => Some(MidiMessage::PolyPressure {
                channel,
                note: d1?,
                pressure: d2?,
            }),
            0xB0 => Some(MidiMessage::ControlChange {
                channel,
                control: d1?,
                value: d2?,
            }),
            0xC0 => Some(MidiMessage::ProgramChange { channel, program: d1? }),
            0xD0 => Some(MidiMessage::ChannelPressure { channel, pressure: d1? }),
            0xE0 => {
                let lsb = d1? as u16;
                let msb = d2? as u16;
                Some(MidiMessage::PitchBend {
                    channel,
                    value: (msb << 7) | lsb,
                })
            }
            _ => None,
        }
    }

    /// Wire bytes: status with channel, then the masked data bytes
    pub fn encode(&self) -> Vec<u8> {
        let (status, data): (u8, [Option<u8>; 2]) = match *self {
            MidiMessage::NoteOff { note, velocity, .. } => (0x80, [Some(note), Some(velocity)]),
            MidiMessage::NoteOn { note, velocity, .. } => (0x90, [Some(note), Some(velocity)]),
            MidiMessage::PolyPressure { note, pressure, .. } => {
                (0xA0, [Some(note), Some(pressure)])
            }
            MidiMessage::ControlChange { control, value, .. } => {
                (0xB0, [Some(control), Some(value)])
            }
            MidiMessage::ProgramChange { program, .. } => (0xC0, [Some(program), None]),
            MidiMessage::ChannelPressure { pressure, .. } => (0xD0, [Some(pressure), None]),
            MidiMessage::PitchBend { value, .. } => {
                (0xE0, [Some((value & 0x7F) as u8), Some((value >> 7) as u8)])
            }
        };

        std::iter::once(status | (self.channel() & 0x0F))
            .chain(data.into_iter().flatten().map(|b| b & 0x7F))
            .collect()
    }

    /// Channel of the message (0-15)
    pub fn channel(&self) -> u8 {
        match *self {
            MidiMessage::NoteOff { channel, .. }
            | MidiMessage::NoteOn { channel, .. }
            | MidiMessage::PolyPressure { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => channel,
        }
    }

    /// The kind this message has for control routing, if any
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            MidiMessage::NoteOn { .. } => Some(MessageKind::NoteOn),
            MidiMessage::NoteOff { .. } => Some(MessageKind::NoteOff),
            MidiMessage::ControlChange { .. } => Some(MessageKind::ControlChange),
            _ => None,
        }
    }
}

impl fmt::Display for MidiMessage {
    /// Same layout as the mido text format, e.g. `note_on channel=10 note=8 velocity=64`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ch = self.channel();
        match *self {
            MidiMessage::NoteOff { note, velocity, .. } => {
                write!(f, "note_off channel={ch} note={note} velocity={velocity}")
            }
            MidiMessage::NoteOn { note, velocity, .. } => {
                write!(f, "note_on channel={ch} note={note} velocity={velocity}")
            }
            MidiMessage::PolyPressure { note, pressure, .. } => {
                write!(f, "polytouch channel={ch} note={note} value={pressure}")
            }
            MidiMessage::ControlChange { control, value, .. } => {
                write!(f, "control_change channel={ch} control={control} value={value}")
            }
            MidiMessage::ProgramChange { program, .. } => {
                write!(f, "program_change channel={ch} program={program}")
            }
            MidiMessage::ChannelPressure { pressure, .. } => {
                write!(f, "aftertouch channel={ch} value={pressure}")
            }
            MidiMessage::PitchBend { value, .. } => {
                write!(f, "pitchwheel channel={ch} pitch={value}")
            }
        }
    }
}

/// Message kinds a control can be mapped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    NoteOn,
    NoteOff,
    ControlChange,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::NoteOn => "note_on",
            MessageKind::NoteOff => "note_off",
            MessageKind::ControlChange => "control_change",
        }
    }

    /// Whether this kind addresses a button (note) rather than a knob
    pub fn is_note(&self) -> bool {
        !matches!(self, MessageKind::ControlChange)
    }
}

impl FromStr for MessageKind {
    type Err = Error;

    /// Parse a message type, accepting the `button`, `knob` and `slider` aliases
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "note_on" | "button" => Ok(MessageKind::NoteOn),
            "note_off" => Ok(MessageKind::NoteOff),
            "control_change" | "knob" | "slider" => Ok(MessageKind::ControlChange),
            other => Err(Error::InvalidMapping(format!(
                "message_type must be one of note_on, note_off, control_change, button, knob, slider, not {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `9A 12 40` style dump for trace logs
pub fn format_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    out
}
