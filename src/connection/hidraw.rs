//! hidraw sub-device (`/dev/hidrawN`)
//!
//! The raw channel carries vendor reports in both directions. Writes are
//! synchronous; the write notifier is installed disabled and only marks the
//! channel as writable.

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

use hidconn_kernel::{DeviceOpener, OpenMode};
use tracing::{debug, warn};

use super::{
    enable_nonblocking, ConnectionMode, ConnectionType, SubDeviceBase, SubDeviceCandidate,
    SubDeviceConnection, SubDeviceEvent,
};
use crate::error::ConnectionError;
use crate::flags::DeviceFlags;
use crate::identity::{hex_id, DeviceId};
use crate::reactor::{DeviceHandle, NotifierKind, Reactor, SocketNotifier};

/// Longest report we expect from the devices we talk to
const REPORT_BUFFER_SIZE: usize = 20;

type ReportHandler = Rc<dyn Fn(&[u8]) -> bool>;

pub struct HidrawConnection {
    base: SubDeviceBase,
    write_notifier: RefCell<Option<SocketNotifier>>,
    report_handler: RefCell<Option<ReportHandler>>,
}

impl HidrawConnection {
    /// Open and probe a hidraw node belonging to `owner_id`
    pub fn create(
        candidate: &SubDeviceCandidate,
        owner_id: DeviceId,
        opener: &dyn DeviceOpener,
        reactor: &Reactor,
    ) -> Option<Rc<Self>> {
        let path = candidate.device_file.as_str();
        let node = match opener.open(path, OpenMode::ReadWrite, true) {
            Ok(node) => node,
            Err(e) => {
                warn!("Cannot open hidraw device {} for read/write: {}", path, e);
                return None;
            }
        };
        let handle = Rc::new(DeviceHandle::new(node));

        let size = match handle.node().report_descriptor_size() {
            Ok(size) => size,
            Err(e) => {
                warn!("Cannot retrieve report descriptor size of {}: {}", path, e);
                return None;
            }
        };
        match handle.node().report_descriptor(size) {
            Ok(descriptor) => debug!("{}: {} byte report descriptor", path, descriptor.len()),
            Err(e) => {
                warn!("Cannot retrieve report descriptor of {}: {}", path, e);
                return None;
            }
        }

        let info = match handle.node().raw_info() {
            Ok(info) => info,
            Err(e) => {
                warn!("Cannot get info from hidraw device {}: {}", path, e);
                return None;
            }
        };
        if !owner_id.matches(info.vendor, info.product) {
            debug!(
                "Device id mismatch: {} ({}:{})",
                path,
                hex_id(info.vendor),
                hex_id(info.product)
            );
            return None;
        }

        let mut flags = DeviceFlags::empty();
        if enable_nonblocking(&handle) {
            flags |= DeviceFlags::NON_BLOCKING;
        }

        let connection = Rc::new(Self::new(path, ConnectionMode::ReadWrite, flags));
        connection.install_read_notifier(reactor, Rc::clone(&handle));
        connection.install_write_notifier(reactor, handle);

        debug!("Connected hidraw device {} (flags {:?})", path, flags);
        Some(connection)
    }

    fn new(path: &str, mode: ConnectionMode, flags: DeviceFlags) -> Self {
        Self {
            base: SubDeviceBase::new(path, ConnectionType::Hidraw, mode, flags, false),
            write_notifier: RefCell::new(None),
            report_handler: RefCell::new(None),
        }
    }

    fn install_read_notifier(self: &Rc<Self>, reactor: &Reactor, handle: Rc<DeviceHandle>) {
        let notifier = reactor.notifier(handle, NotifierKind::Read);
        let weak: Weak<Self> = Rc::downgrade(self);
        notifier.set_handler(move |fd| {
            if let Some(connection) = weak.upgrade() {
                connection.on_readable(fd);
            }
        });
        self.base.set_read_notifier(notifier);
    }

    fn install_write_notifier(&self, reactor: &Reactor, handle: Rc<DeviceHandle>) {
        let notifier = reactor.notifier(handle, NotifierKind::Write);
        notifier.set_enabled(false);
        *self.write_notifier.borrow_mut() = Some(notifier);
    }

    /// Handler offered every incoming report; returns whether it consumed it
    pub fn set_report_handler(&self, handler: impl Fn(&[u8]) -> bool + 'static) {
        *self.report_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Write one report
    ///
    /// Returns the number of bytes written, which may be short.
    pub fn send_data(&self, data: &[u8]) -> Result<usize, ConnectionError> {
        let not_writable = || ConnectionError::NotWritable {
            path: self.path().to_string(),
        };
        if self.mode() != ConnectionMode::ReadWrite {
            return Err(not_writable());
        }

        let result = {
            let write_notifier = self.write_notifier.borrow();
            let Some(notifier) = write_notifier.as_ref() else {
                return Err(not_writable());
            };
            notifier.handle().node().write(data)
        };

        match result {
            Ok(n) if n == data.len() => {
                debug!("{} bytes written to {} ({:02x?})", n, self.path(), data);
                Ok(n)
            }
            Ok(n) => {
                warn!(
                    "Short write to {}: {} of {} bytes",
                    self.path(),
                    n,
                    data.len()
                );
                Ok(n)
            }
            Err(e) => {
                warn!("Writing to {} failed: {}", self.path(), e);
                Err(ConnectionError::Write {
                    path: self.path().to_string(),
                    source: e,
                })
            }
        }
    }

    /// Read one report and dispatch it
    pub fn on_readable(&self, _fd: RawFd) {
        let mut buf = [0u8; REPORT_BUFFER_SIZE];
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

        let report = &buf[..n];
        let handler = self.report_handler.borrow().clone();
        let claimed = handler.is_some_and(|h| h(report));
        if !claimed {
            debug!("Received {:02x?} from {}", report, self.path());
        }
    }
}

impl SubDeviceConnection for HidrawConnection {
    fn base(&self) -> &SubDeviceBase {
        &self.base
    }

    fn is_connected(&self) -> bool {
        self.base.read_notifier_enabled() && self.write_notifier.borrow().is_some()
    }

    fn disconnect(&self) {
        self.base.disconnect_read();
        let notifier = self.write_notifier.borrow_mut().take();
        if let Some(notifier) = notifier {
            drop(notifier);
            debug!("Released write notifier of {}", self.path());
        }
    }
}
