//! Shared input mapper
//!
//! One mapper exists per physical device and is shared (`Rc`) with every
//! sub-device connection of that device. Sub-devices consult it to decide
//! whether grabbing makes sense and forward decoded input to it.

use std::cell::Cell;
use std::io;
use std::rc::Rc;

use hidconn_kernel::InputEvent;
use tracing::{trace, warn};

/// Where remapped input goes
pub trait VirtualOutput {
    fn emit(&self, events: &[InputEvent]) -> io::Result<()>;
}

pub struct InputMapper {
    virtual_device: Option<Rc<dyn VirtualOutput>>,
    forwarded: Cell<u64>,
}

impl InputMapper {
    pub fn new(virtual_device: Option<Rc<dyn VirtualOutput>>) -> Self {
        Self {
            virtual_device,
            forwarded: Cell::new(0),
        }
    }

    pub fn virtual_device(&self) -> Option<&Rc<dyn VirtualOutput>> {
        self.virtual_device.as_ref()
    }

    /// Input remapping is wired up, so taking the device's input is safe
    pub fn has_virtual_device(&self) -> bool {
        self.virtual_device.is_some()
    }

    /// Forward events read from a sub-device
    ///
    /// Without a virtual device the events are dropped.
    pub fn add_events(&self, events: &[InputEvent]) {
        if events.is_empty() {
            return;
        }
        let Some(output) = &self.virtual_device else {
            trace!("No virtual device, dropping {} events", events.len());
            return;
        };
        match output.emit(events) {
            Ok(()) => self.forwarded.set(self.forwarded.get() + events.len() as u64),
            Err(e) => warn!("Failed to forward {} events: {}", events.len(), e),
        }
    }

    /// Events successfully handed to the virtual device so far
    pub fn forwarded(&self) -> u64 {
        self.forwarded.get()
    }
}
