//! Single-threaded readiness reactor
//!
//! A [`SocketNotifier`] asks the [`Reactor`] to call a handler whenever its
//! descriptor becomes readable (or writable). Notifiers own the descriptor
//! through a shared [`DeviceHandle`]: when the last notifier on a descriptor
//! is dropped, a held grab is released, the notifier is disabled and
//! deregistered, and only then is the descriptor closed.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io;
use std::os::unix::io::{BorrowedFd, RawFd};
use std::rc::{Rc, Weak};

use hidconn_kernel::{DeviceNode, NodeError};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, trace, warn};

/// Direction a notifier watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifierKind {
    Read,
    Write,
}

impl NotifierKind {
    fn poll_flags(self) -> PollFlags {
        match self {
            NotifierKind::Read => PollFlags::POLLIN,
            NotifierKind::Write => PollFlags::POLLOUT,
        }
    }
}

/// An open node plus the exclusive grab we may hold on it
///
/// Dropping the handle releases a still-held grab, then closes the node.
pub struct DeviceHandle {
    node: Box<dyn DeviceNode>,
    grab_held: Cell<bool>,
}

impl DeviceHandle {
    pub fn new(node: Box<dyn DeviceNode>) -> Self {
        Self {
            node,
            grab_held: Cell::new(false),
        }
    }

    pub fn node(&self) -> &dyn DeviceNode {
        self.node.as_ref()
    }

    pub fn fd(&self) -> RawFd {
        self.node.fd()
    }

    pub fn path(&self) -> &str {
        self.node.path()
    }

    /// Take the exclusive grab
    pub fn grab(&self) -> Result<(), NodeError> {
        self.node.set_grab(true)?;
        self.grab_held.set(true);
        Ok(())
    }

    pub fn is_grabbed(&self) -> bool {
        self.grab_held.get()
    }

    /// Release the grab if we hold it; no-op otherwise
    pub fn release_grab(&self) {
        if self.grab_held.replace(false) {
            match self.node.set_grab(false) {
                Ok(()) => debug!("Released grab on {}", self.path()),
                Err(e) => warn!("Cannot release grab on {}: {}", self.path(), e),
            }
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.release_grab();
    }
}

type Handler = Rc<dyn Fn(RawFd)>;

struct NotifierState {
    fd: RawFd,
    kind: NotifierKind,
    enabled: Cell<bool>,
    handler: RefCell<Option<Handler>>,
}

#[derive(Default)]
struct Registry {
    next_token: u64,
    entries: BTreeMap<u64, Weak<NotifierState>>,
}

/// Polls every enabled notifier and dispatches their handlers
///
/// Cloning yields another handle to the same reactor.
#[derive(Clone, Default)]
pub struct Reactor {
    registry: Rc<RefCell<Registry>>,
}

impl Reactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a notifier on `handle`; it starts enabled
    pub fn notifier(&self, handle: Rc<DeviceHandle>, kind: NotifierKind) -> SocketNotifier {
        let state = Rc::new(NotifierState {
            fd: handle.fd(),
            kind,
            enabled: Cell::new(true),
            handler: RefCell::new(None),
        });

        let token = {
            let mut registry = self.registry.borrow_mut();
            let token = registry.next_token;
            registry.next_token += 1;
            registry.entries.insert(token, Rc::downgrade(&state));
            token
        };
        trace!("Registered {:?} notifier on {} (fd {})", kind, handle.path(), state.fd);

        SocketNotifier {
            state,
            token,
            registry: Rc::downgrade(&self.registry),
            handle,
        }
    }

    /// Number of live registrations
    pub fn registered(&self) -> usize {
        self.registry.borrow().entries.len()
    }

    /// Wait up to `timeout_ms` for readiness and run the ready handlers
    ///
    /// Returns how many handlers ran. An interrupted wait counts as zero.
    pub fn poll_once(&self, timeout_ms: u16) -> io::Result<usize> {
        let watched: Vec<Rc<NotifierState>> = self
            .registry
            .borrow()
            .entries
            .values()
            .filter_map(Weak::upgrade)
            .filter(|s| s.enabled.get())
            .collect();

        let ready: Vec<Rc<NotifierState>> = {
            // Every fd belongs to a live notifier for the duration of poll()
            let mut fds: Vec<PollFd> = watched
                .iter()
                .map(|s| PollFd::new(unsafe { BorrowedFd::borrow_raw(s.fd) }, s.kind.poll_flags()))
                .collect();

            match poll(&mut fds, PollTimeout::from(timeout_ms)) {
                Ok(_) => {}
                Err(Errno::EINTR) => return Ok(0),
                Err(e) => return Err(io::Error::from(e)),
            }

            let mut ready = Vec::new();
            for (state, pfd) in watched.iter().zip(fds.iter()) {
                let revents = pfd.revents().unwrap_or(PollFlags::empty());
                if revents.contains(PollFlags::POLLNVAL) {
                    warn!("Descriptor {} is no longer valid, disabling notifier", state.fd);
                    state.enabled.set(false);
                    continue;
                }
                // Errors and hangups go to the handler so its read surfaces them
                let wanted = state.kind.poll_flags() | PollFlags::POLLERR | PollFlags::POLLHUP;
                if revents.intersects(wanted) {
                    ready.push(Rc::clone(state));
                }
            }
            ready
        };

        // Handlers may drop notifiers, including their own
        let mut dispatched = 0;
        for state in ready {
            if dispatch(&state) {
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }
}

fn dispatch(state: &NotifierState) -> bool {
    if !state.enabled.get() {
        return false;
    }
    let handler = state.handler.borrow().clone();
    match handler {
        Some(handler) => {
            handler(state.fd);
            true
        }
        None => false,
    }
}

/// A reactor registration bound to one descriptor
pub struct SocketNotifier {
    state: Rc<NotifierState>,
    token: u64,
    registry: Weak<RefCell<Registry>>,
    handle: Rc<DeviceHandle>,
}

impl SocketNotifier {
    pub fn fd(&self) -> RawFd {
        self.state.fd
    }

    pub fn kind(&self) -> NotifierKind {
        self.state.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled.get()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.enabled.set(enabled);
    }

    /// Handler run on readiness; replaces any previous one
    pub fn set_handler(&self, handler: impl Fn(RawFd) + 'static) {
        *self.state.handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Run the handler as the reactor would; does nothing while disabled
    pub fn activate(&self) -> bool {
        dispatch(&self.state)
    }

    pub fn handle(&self) -> &Rc<DeviceHandle> {
        &self.handle
    }
}

impl Drop for SocketNotifier {
    fn drop(&mut self) {
        // Last user of the descriptor: ungrab while it is still open
        if Rc::strong_count(&self.handle) == 1 {
            self.handle.release_grab();
        }
        self.state.enabled.set(false);
        self.state.handler.borrow_mut().take();
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().entries.remove(&self.token);
        }
        trace!("Dropped {:?} notifier on fd {}", self.state.kind, self.state.fd);
        // `handle` is released after this body; the node closes if it was the last one
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidconn_kernel::mock::{MockNodeSpec, MockOpener, Syscall};
    use hidconn_kernel::{DeviceOpener, OpenMode};

    const EVENT: &str = "/dev/input/event5";
    const HIDRAW: &str = "/dev/hidraw2";

    fn open(opener: &MockOpener, path: &str) -> Rc<DeviceHandle> {
        let node = opener.open(path, OpenMode::ReadOnly, false).unwrap();
        Rc::new(DeviceHandle::new(node))
    }

    #[test]
    fn test_drop_closes_descriptor_once() {
        let opener = MockOpener::new();
        opener.add(HIDRAW, MockNodeSpec::hidraw(0x046d, 0xc53e));
        let reactor = Reactor::new();

        let handle = open(&opener, HIDRAW);
        let read = reactor.notifier(Rc::clone(&handle), NotifierKind::Read);
        let write = reactor.notifier(handle, NotifierKind::Write);
        assert_eq!(reactor.registered(), 2);

        drop(read);
        assert_eq!(opener.log().closes(HIDRAW), 0);
        drop(write);
        assert_eq!(opener.log().closes(HIDRAW), 1);
        assert_eq!(reactor.registered(), 0);
    }

    #[test]
    fn test_grab_released_before_close() {
        let opener = MockOpener::new();
        opener.add(EVENT, MockNodeSpec::event(0x046d, 0xc53e));
        let reactor = Reactor::new();

        let handle = open(&opener, EVENT);
        handle.grab().unwrap();
        let notifier = reactor.notifier(handle, NotifierKind::Read);
        drop(notifier);

        let log = opener.log();
        assert_eq!(log.grabs(EVENT, false), 1);
        let ungrab = log
            .position(|c| matches!(c, Syscall::Grab { grab: false, .. }))
            .unwrap();
        let close = log.position(|c| matches!(c, Syscall::Close { .. })).unwrap();
        assert!(ungrab < close);
    }

    #[test]
    fn test_activate_respects_enabled() {
        let opener = MockOpener::new();
        opener.add(EVENT, MockNodeSpec::event(0x046d, 0xc53e));
        let reactor = Reactor::new();
        let notifier = reactor.notifier(open(&opener, EVENT), NotifierKind::Read);

        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        notifier.set_handler(move |_| counter.set(counter.get() + 1));

        assert!(notifier.activate());
        notifier.set_enabled(false);
        assert!(!notifier.activate());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_poll_dispatches_readable_pipe() {
        use std::io::Write;
        use std::os::unix::io::AsRawFd;
        use std::os::unix::net::UnixStream;

        // A real descriptor behind a minimal node
        struct PipeNode(UnixStream);
        impl DeviceNode for PipeNode {
            fn fd(&self) -> RawFd {
                self.0.as_raw_fd()
            }
            fn path(&self) -> &str {
                "pipe"
            }
            fn input_id(&self) -> Result<hidconn_kernel::ioctl::InputId, NodeError> {
                Err(NodeError::ioctl_raw("EVIOCGID", libc::ENOTTY))
            }
            fn event_bits(&self) -> Result<u64, NodeError> {
                Ok(0)
            }
            fn relative_bits(&self) -> Result<u64, NodeError> {
                Ok(0)
            }
            fn set_grab(&self, _: bool) -> Result<(), NodeError> {
                Ok(())
            }
            fn set_nonblocking(&self) -> Result<(), NodeError> {
                Ok(())
            }
            fn is_nonblocking(&self) -> Result<bool, NodeError> {
                Ok(false)
            }
            fn report_descriptor_size(&self) -> Result<usize, NodeError> {
                Ok(0)
            }
            fn report_descriptor(&self, _: usize) -> Result<Vec<u8>, NodeError> {
                Ok(Vec::new())
            }
            fn raw_info(&self) -> Result<hidconn_kernel::RawDeviceInfo, NodeError> {
                Ok(Default::default())
            }
            fn read(&self, _: &mut [u8]) -> Result<usize, NodeError> {
                Ok(0)
            }
            fn write(&self, _: &[u8]) -> Result<usize, NodeError> {
                Ok(0)
            }
        }

        let (reader, mut writer) = UnixStream::pair().unwrap();

        let reactor = Reactor::new();
        let handle = Rc::new(DeviceHandle::new(Box::new(PipeNode(reader))));
        let notifier = reactor.notifier(handle, NotifierKind::Read);
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        notifier.set_handler(move |_| counter.set(counter.get() + 1));

        assert_eq!(reactor.poll_once(0).unwrap(), 0);
        writer.write_all(b"x").unwrap();
        assert_eq!(reactor.poll_once(100).unwrap(), 1);
        assert_eq!(hits.get(), 1);

        notifier.set_enabled(false);
        assert_eq!(reactor.poll_once(0).unwrap(), 0);
    }
}
