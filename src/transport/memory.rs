//! In-process transport
//!
//! Ports live in memory: outbound messages are recorded and inbound
//! messages are injected by the owner of the [`MemoryPort`] handle. Used for
//! tests and for running the bridge without hardware.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::{InputCallback, InputPort, OutputPort, Transport};
use crate::error::{Error, Result};
use crate::midi::MidiMessage;

#[derive(Default)]
struct PortState {
    callback: Mutex<Option<InputCallback>>,
    sent: Mutex<Vec<MidiMessage>>,
    input_open: AtomicBool,
    output_open: AtomicBool,
    fail_sends: AtomicBool,
}

/// Handle on one virtual device, held by the test or simulator
#[derive(Clone)]
pub struct MemoryPort {
    name: String,
    state: Arc<PortState>,
}

impl MemoryPort {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver a message as if the hardware had sent it.
    ///
    /// Returns false if no callback is installed.
    pub fn inject(&self, message: MidiMessage) -> bool {
        let callback = self.state.callback.lock().clone();
        match callback {
            Some(callback) => {
                callback(message);
                true
            }
            None => false,
        }
    }

    /// Parse and deliver raw bytes. Unparseable data is dropped.
    pub fn inject_raw(&self, data: &[u8]) -> bool {
        match MidiMessage::parse(data) {
            Some(message) => self.inject(message),
            None => false,
        }
    }

    /// Messages sent to the device so far
    pub fn sent(&self) -> Vec<MidiMessage> {
        self.state.sent.lock().clone()
    }

    /// Drain the recorded outbound messages
    pub fn take_sent(&self) -> Vec<MidiMessage> {
        std::mem::take(&mut *self.state.sent.lock())
    }

    pub fn is_input_open(&self) -> bool {
        self.state.input_open.load(Ordering::SeqCst)
    }

    pub fn is_output_open(&self) -> bool {
        self.state.output_open.load(Ordering::SeqCst)
    }

    /// Make every subsequent send fail
    pub fn set_fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }
}

/// Transport over in-memory ports
#[derive(Clone, Default)]
pub struct MemoryTransport {
    ports: Arc<Mutex<BTreeMap<String, Arc<PortState>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a virtual device under `name`
    pub fn add_port(&self, name: impl Into<String>) -> MemoryPort {
        let name = name.into();
        let state = self
            .ports
            .lock()
            .entry(name.clone())
            .or_insert_with(|| Arc::new(PortState::default()))
            .clone();
        MemoryPort { name, state }
    }

    /// Handle on an already registered device
    pub fn port(&self, name: &str) -> Option<MemoryPort> {
        self.ports.lock().get(name).map(|state| MemoryPort {
            name: name.to_string(),
            state: state.clone(),
        })
    }
}

impl Transport for MemoryTransport {
    fn input_names(&self) -> Vec<String> {
        self.ports.lock().keys().cloned().collect()
    }

    fn output_names(&self) -> Vec<String> {
        self.input_names()
    }

    fn open(&self, name: &str) -> Result<(Box<dyn InputPort>, Arc<dyn OutputPort>)> {
        let state = self
            .ports
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::DeviceOpen {
                name: name.to_string(),
                available: self.input_names(),
                reason: "no such port".to_string(),
            })?;

        state.input_open.store(true, Ordering::SeqCst);
        state.output_open.store(true, Ordering::SeqCst);

        Ok((
            Box::new(MemoryInput {
                state: state.clone(),
            }),
            Arc::new(MemoryOutput {
                name: name.to_string(),
                state,
            }),
        ))
    }
}

struct MemoryInput {
    state: Arc<PortState>,
}

impl InputPort for MemoryInput {
    fn set_callback(&mut self, callback: InputCallback) {
        *self.state.callback.lock() = Some(callback);
    }

    fn close(self: Box<Self>) {
        self.state.callback.lock().take();
        self.state.input_open.store(false, Ordering::SeqCst);
    }
}

struct MemoryOutput {
    name: String,
    state: Arc<PortState>,
}

impl OutputPort for MemoryOutput {
    fn send(&self, message: &MidiMessage) -> Result<()> {
        if !self.state.output_open.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!("output port '{}' is closed", self.name)));
        }
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!("failed to send to '{}'", self.name)));
        }

        trace!("Memory TX -> {}: {}", self.name, message);
        self.state.sent.lock().push(*message);
        Ok(())
    }

    fn close(&self) {
        self.state.output_open.store(false, Ordering::SeqCst);
    }
}
