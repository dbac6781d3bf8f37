//! Pass-through virtual input device using evdev/uinput
//!
//! Receives the events of grabbed sub-devices and re-emits them, so the
//! desktop keeps seeing the device while we hold the exclusive grab.

use std::cell::RefCell;
use std::io;

use evdev::{
    uinput::{VirtualDevice, VirtualDeviceBuilder},
    AttributeSet, EventType, Key, RelativeAxisType,
};
use hidconn_kernel::ioctl::EV_SYN;
use hidconn_kernel::InputEvent;
use thiserror::Error;

use crate::input_mapper::VirtualOutput;

/// Highest key code we register (KEY_MAX)
const KEY_CODE_MAX: u16 = 0x2ff;

#[derive(Debug, Error)]
pub enum VirtualDeviceError {
    #[error("Failed to create virtual device: {0}")]
    CreateDevice(#[source] io::Error),
}

pub struct UinputOutput {
    device: RefCell<VirtualDevice>,
}

impl UinputOutput {
    /// Create a virtual device with keys, buttons, pointer motion and wheels
    ///
    /// # Arguments
    /// * `name` - Device name (shown in `evtest` and desktop settings)
    pub fn new(name: &str) -> Result<Self, VirtualDeviceError> {
        let mut keys = AttributeSet::<Key>::new();
        for code in 1..=KEY_CODE_MAX {
            keys.insert(Key::new(code));
        }

        let mut axes = AttributeSet::<RelativeAxisType>::new();
        axes.insert(RelativeAxisType::REL_X);
        axes.insert(RelativeAxisType::REL_Y);
        axes.insert(RelativeAxisType::REL_WHEEL);
        axes.insert(RelativeAxisType::REL_HWHEEL);

        let device = VirtualDeviceBuilder::new()
            .map_err(VirtualDeviceError::CreateDevice)?
            .name(name)
            .with_keys(&keys)
            .map_err(VirtualDeviceError::CreateDevice)?
            .with_relative_axes(&axes)
            .map_err(VirtualDeviceError::CreateDevice)?
            .build()
            .map_err(VirtualDeviceError::CreateDevice)?;

        Ok(Self {
            device: RefCell::new(device),
        })
    }
}

impl VirtualOutput for UinputOutput {
    fn emit(&self, events: &[InputEvent]) -> io::Result<()> {
        // VirtualDevice::emit appends its own SYN_REPORT
        let events: Vec<evdev::InputEvent> = events
            .iter()
            .filter(|e| e.type_ != EV_SYN)
            .map(|e| evdev::InputEvent::new(EventType(e.type_), e.code, e.value))
            .collect();
        if events.is_empty() {
            return Ok(());
        }
        self.device.borrow_mut().emit(&events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidconn_kernel::ioctl::EV_KEY;

    #[test]
    #[ignore] // Requires uinput access (run with: cargo test -- --ignored)
    fn test_create_and_emit() {
        let output = UinputOutput::new("hidconn test device").unwrap();
        output
            .emit(&[InputEvent::new(EV_KEY, 30, 1), InputEvent::new(EV_KEY, 30, 0)])
            .unwrap();
    }
}
