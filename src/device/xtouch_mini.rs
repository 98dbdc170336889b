//! Behringer X-Touch Mini
//!
//! 8 knobs (each also a button), 16 buttons and 1 slider, in two layers.
//!
//! Button notes:
//!
//! ```text
//! Layer A:
//! [ 0] [ 1] [ 2] [ 3] [ 4] [ 5] [ 6] [ 7]   (knob pushes)
//! [ 8] [ 9] [10] [11] [12] [13] [14] [15]   (top row)
//! [16] [17] [18] [19] [20] [21] [22] [23]   (bottom row)
//!
//! Layer B:
//! [24] [25] [26] [27] [28] [29] [30] [31]   (knob pushes)
//! [32] [33] [34] [35] [36] [37] [38] [39]   (top row)
//! [40] [41] [42] [43] [44] [45] [46] [47]   (bottom row)
//! ```
//!
//! Knob/slider controllers:
//!
//! ```text
//! Layer A: [ 1] .. [ 8] knobs, [ 9] slider
//! Layer B: [10] slider, [11] .. [18] knobs
//! ```

use std::ops::Deref;

use super::{DeviceLayout, MidiDevice};
use crate::controls::Button;
use crate::error::Result;
use crate::transport::Transport;

/// X-Touch Mini in standard (non-MC) mode
#[derive(Debug)]
pub struct XTouchMini {
    device: MidiDevice,
}

impl XTouchMini {
    pub const DEVICE_NAME: &'static str = "X-TOUCH MINI";

    pub fn layout() -> DeviceLayout {
        DeviceLayout::new(0..48, 1..=18)
    }

    pub fn open(transport: &dyn Transport) -> Result<Self> {
        let device = MidiDevice::open(transport, Self::DEVICE_NAME, Self::layout())?;
        Ok(Self { device })
    }

    pub fn into_inner(self) -> MidiDevice {
        self.device
    }

    fn button(&self, note: u8) -> &Button {
        &self.device.buttons()[note]
    }

    pub fn rewind(&self) -> &Button {
        self.button(18)
    }

    pub fn fast_forward(&self) -> &Button {
        self.button(19)
    }

    pub fn r#loop(&self) -> &Button {
        self.button(20)
    }

    pub fn stop(&self) -> &Button {
        self.button(21)
    }

    pub fn play(&self) -> &Button {
        self.button(22)
    }

    pub fn record(&self) -> &Button {
        self.button(23)
    }
}

impl Deref for XTouchMini {
    type Target = MidiDevice;

    fn deref(&self) -> &MidiDevice {
        &self.device
    }
}
