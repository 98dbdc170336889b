//! MIDI port transport
//!
//! A [`Transport`] opens a named input/output port pair. The `midir` backend
//! talks to real hardware; [`memory::MemoryTransport`] is an in-process
//! stand-in.

pub mod memory;

use midir::{Ignore, MidiIO, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::error::{Error, Result};
use crate::midi::{format_hex, MidiMessage};

/// Callback invoked for every parsed inbound message
pub type InputCallback = Arc<dyn Fn(MidiMessage) + Send + Sync>;

/// Receiving half of an opened port
pub trait InputPort: Send {
    /// Replace the inbound callback. Only one callback is active at a time.
    fn set_callback(&mut self, callback: InputCallback);

    fn close(self: Box<Self>);
}

/// Sending half of an opened port
pub trait OutputPort: Send + Sync {
    fn send(&self, message: &MidiMessage) -> Result<()>;

    fn close(&self);
}

/// Opens named MIDI port pairs
pub trait Transport {
    /// Names of the input ports currently available
    fn input_names(&self) -> Vec<String>;

    /// Names of the output ports currently available
    fn output_names(&self) -> Vec<String>;

    /// Open the input and output port with this name
    fn open(&self, name: &str) -> Result<(Box<dyn InputPort>, Arc<dyn OutputPort>)>;
}

/// Transport backed by the system MIDI API through `midir`
#[derive(Debug, Clone)]
pub struct MidirTransport {
    client_name: String,
}

impl MidirTransport {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn open_error(&self, name: &str, reason: impl ToString) -> Error {
        Error::DeviceOpen {
            name: name.to_string(),
            available: self.input_names(),
            reason: reason.to_string(),
        }
    }
}

impl Default for MidirTransport {
    fn default() -> Self {
        Self::new("mmcore-midi")
    }
}

/// List port names of a midir client
fn port_names<T: MidiIO>(io: &T) -> Vec<String> {
    io.ports()
        .iter()
        .filter_map(|port| io.port_name(port).ok())
        .collect()
}

/// Find a port by exact name, falling back to a case-insensitive substring
/// match (Windows appends port numbers to device names)
fn find_port<T: MidiIO>(io: &T, name: &str) -> Option<(T::Port, String)> {
    let named: Vec<(T::Port, String)> = io
        .ports()
        .into_iter()
        .filter_map(|port| io.port_name(&port).ok().map(|n| (port, n)))
        .collect();

    if let Some(found) = named.iter().find(|(_, n)| n == name) {
        return Some(found.clone());
    }

    let pattern = name.to_lowercase();
    named.into_iter().find(|(_, n)| {
        let matched = n.to_lowercase().contains(&pattern);
        if matched {
            debug!("Found port '{}' matching pattern '{}'", n, name);
        }
        matched
    })
}

impl Transport for MidirTransport {
    fn input_names(&self) -> Vec<String> {
        MidiInput::new(&format!("{}-scanner", self.client_name))
            .map(|midi_in| port_names(&midi_in))
            .unwrap_or_default()
    }

    fn output_names(&self) -> Vec<String> {
        MidiOutput::new(&format!("{}-scanner", self.client_name))
            .map(|midi_out| port_names(&midi_out))
            .unwrap_or_default()
    }

    fn open(&self, name: &str) -> Result<(Box<dyn InputPort>, Arc<dyn OutputPort>)> {
        let mut midi_in = MidiInput::new(&format!("{}-input", self.client_name))
            .map_err(|e| self.open_error(name, e))?;
        midi_in.ignore(Ignore::All);

        let (in_port, in_name) =
            find_port(&midi_in, name).ok_or_else(|| self.open_error(name, "input port not found"))?;

        let callback: Arc<Mutex<Option<InputCallback>>> = Arc::new(Mutex::new(None));
        let slot = callback.clone();
        let connection = midi_in
            .connect(
                &in_port,
                &self.client_name,
                move |_timestamp, data, _| match MidiMessage::parse(data) {
                    Some(message) => {
                        // Clone out of the lock so the callback may replace itself
                        let current = slot.lock().clone();
                        if let Some(callback) = current {
                            callback(message);
                        }
                    }
                    None => trace!("Dropped unhandled MIDI: {}", format_hex(data)),
                },
                (),
            )
            .map_err(|e| self.open_error(name, e))?;
        info!("Connected to input port: {}", in_name);

        let midi_out = MidiOutput::new(&format!("{}-output", self.client_name))
            .map_err(|e| self.open_error(name, e))?;
        let (out_port, out_name) = find_port(&midi_out, name)
            .ok_or_else(|| self.open_error(name, "output port not found"))?;
        let output = midi_out
            .connect(&out_port, &self.client_name)
            .map_err(|e| self.open_error(name, e))?;
        info!("Connected to output port: {}", out_name);

        Ok((
            Box::new(MidirInput {
                connection,
                callback,
            }),
            Arc::new(MidirOutput {
                name: out_name,
                connection: Mutex::new(Some(output)),
            }),
        ))
    }
}

struct MidirInput {
    connection: MidiInputConnection<()>,
    callback: Arc<Mutex<Option<InputCallback>>>,
}

impl InputPort for MidirInput {
    fn set_callback(&mut self, callback: InputCallback) {
        *self.callback.lock() = Some(callback);
    }

    fn close(self: Box<Self>) {
        self.callback.lock().take();
        let _ = self.connection.close();
    }
}

struct MidirOutput {
    name: String,
    connection: Mutex<Option<MidiOutputConnection>>,
}

impl OutputPort for MidirOutput {
    fn send(&self, message: &MidiMessage) -> Result<()> {
        let mut connection = self.connection.lock();
        let conn = connection
            .as_mut()
            .ok_or_else(|| Error::Transport(format!("output port '{}' is closed", self.name)))?;

        let data = message.encode();
        conn.send(&data)
            .map_err(|e| Error::Transport(format!("failed to send to '{}': {}", self.name, e)))?;

        trace!("Sent: {} | {}", format_hex(&data), message);
        Ok(())
    }

    fn close(&self) {
        if let Some(conn) = self.connection.lock().take() {
            conn.close();
            debug!("Closed output port: {}", self.name);
        }
    }
}
