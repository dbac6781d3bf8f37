//! evdev sub-device (`/dev/input/eventN`)

use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

use hidconn_kernel::ioctl::{bit, EV_REL};
use hidconn_kernel::{DeviceOpener, InputEvent, OpenMode, INPUT_EVENT_SIZE};
use tracing::{debug, error, trace, warn};

use super::{
    enable_nonblocking, ConnectionMode, ConnectionType, SubDeviceBase, SubDeviceCandidate,
    SubDeviceConnection, SubDeviceEvent,
};
use crate::device::DeviceConnection;
use crate::flags::DeviceFlags;
use crate::identity::hex_id;
use crate::reactor::{DeviceHandle, NotifierKind, Reactor};

/// Records drained per readiness notification
const READ_BATCH: usize = 16;

pub struct EventConnection {
    base: SubDeviceBase,
}

impl EventConnection {
    /// Open and probe an event node on behalf of `owner`
    ///
    /// Returns `None` if the node cannot be opened, belongs to a different
    /// device or cannot be queried. The node is closed again in that case.
    pub fn create(
        candidate: &SubDeviceCandidate,
        owner: &DeviceConnection,
        opener: &dyn DeviceOpener,
        reactor: &Reactor,
    ) -> Option<Rc<Self>> {
        let path = candidate.device_file.as_str();
        let node = match opener.open(path, OpenMode::ReadOnly, false) {
            Ok(node) => node,
            Err(e) => {
                warn!("Cannot open event device {} for read: {}", path, e);
                return None;
            }
        };
        let handle = Rc::new(DeviceHandle::new(node));

        let id = owner.id();
        match handle.node().input_id() {
            Ok(input_id) if id.matches(input_id.vendor, input_id.product) => {}
            Ok(input_id) => {
                debug!(
                    "Device id mismatch: {} ({}:{})",
                    path,
                    hex_id(input_id.vendor),
                    hex_id(input_id.product)
                );
                return None;
            }
            Err(e) => {
                debug!("Cannot read device id of {}: {}", path, e);
                return None;
            }
        }

        let event_bits = match handle.node().event_bits() {
            Ok(bits) => bits,
            Err(e) => {
                warn!(
                    "Cannot get device properties: {} ({}:{}): {}",
                    path,
                    hex_id(id.vendor_id()),
                    hex_id(id.product_id()),
                    e
                );
                return None;
            }
        };
        let relative_bits = if event_bits & bit(EV_REL) != 0 {
            handle.node().relative_bits().unwrap_or_else(|e| {
                debug!("Cannot get relative axes of {}: {}", path, e);
                0
            })
        } else {
            0
        };
        let mut flags = DeviceFlags::from_event_bits(event_bits, relative_bits);

        let grabbed = if owner.input_mapper().has_virtual_device() {
            match handle.grab() {
                Ok(()) => {
                    debug!("Grabbed {}", path);
                    flags |= DeviceFlags::GRABBED;
                    true
                }
                Err(e) => {
                    error!("Error grabbing device {}: {}", path, e);
                    // Drop whatever part of the grab the kernel may have taken
                    if let Err(e) = handle.node().set_grab(false) {
                        trace!("Ungrab after failed grab of {}: {}", path, e);
                    }
                    false
                }
            }
        } else {
            false
        };

        if enable_nonblocking(&handle) {
            flags |= DeviceFlags::NON_BLOCKING;
        }

        let connection = Rc::new(Self {
            base: SubDeviceBase::new(
                path,
                ConnectionType::Event,
                ConnectionMode::ReadOnly,
                flags,
                grabbed,
            ),
        });

        let notifier = reactor.notifier(handle, NotifierKind::Read);
        let weak: Weak<Self> = Rc::downgrade(&connection);
        notifier.set_handler(move |fd| {
            if let Some(connection) = weak.upgrade() {
                connection.on_readable(fd);
            }
        });
        connection.base.set_read_notifier(notifier);
        connection.base.bind_input_mapper(Rc::clone(owner.input_mapper()));

        debug!(
            "Connected event device {} (flags {:?}, grabbed {})",
            path, flags, grabbed
        );
        Some(connection)
    }

    /// Drain available input records and hand them to the input mapper
    pub fn on_readable(&self, _fd: RawFd) {
        let mut buf = [0u8; INPUT_EVENT_SIZE * READ_BATCH];
        let n = match self.base.read(&mut buf) {
            None => return,
            Some(Ok(n)) => n,
            Some(Err(e)) if e.is_would_block() => return,
            Some(Err(e)) => {
                let errno = e.errno().unwrap_or(libc::EIO);
                debug!("Read from {} failed: {}", self.path(), e);
                self.base.emit(SubDeviceEvent::SocketReadError(errno));
                return;
            }
        };

        let events: Vec<InputEvent> = InputEvent::parse_records(&buf[..n]);
        trace!("{} events from {}", events.len(), self.path());
        if let Some(mapper) = self.input_mapper() {
            mapper.add_events(&events);
        }
    }
}

impl SubDeviceConnection for EventConnection {
    fn base(&self) -> &SubDeviceBase {
        &self.base
    }

    fn is_connected(&self) -> bool {
        self.base.read_notifier_enabled()
    }
}
