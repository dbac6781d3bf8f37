//! Sub-device connections
//!
//! A physical device shows up as several kernel nodes. Each node we manage
//! gets a connection object ([`EventConnection`] for evdev nodes,
//! [`HidrawConnection`] for hidraw nodes) that owns the node through its
//! reactor notifiers, knows what the node can do ([`DeviceFlags`]) and
//! reports changes to whoever subscribed.
//!
//! Connections are only ever produced by their `create` factories, which
//! probe the node and return `None` instead of a half-initialised object.

mod event;
mod hidraw;

pub use event::EventConnection;
pub use hidraw::HidrawConnection;

use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use hidconn_kernel::NodeError;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::flags::DeviceFlags;
use crate::input_mapper::InputMapper;
use crate::reactor::{DeviceHandle, SocketNotifier};

/// Kind of kernel node behind a sub-device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// `/dev/input/eventN`
    Event,
    /// `/dev/hidrawN`
    Hidraw,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Event => write!(f, "event"),
            ConnectionType::Hidraw => write!(f, "hidraw"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionMode {
    ReadOnly,
    ReadWrite,
}

/// A node that discovery believes belongs to a physical device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubDeviceCandidate {
    pub device_file: String,
    pub kind: ConnectionType,
    /// Physical location as reported by the kernel, informational only
    pub phys: String,
}

impl SubDeviceCandidate {
    pub fn event(device_file: impl Into<String>) -> Self {
        Self {
            device_file: device_file.into(),
            kind: ConnectionType::Event,
            phys: String::new(),
        }
    }

    pub fn hidraw(device_file: impl Into<String>) -> Self {
        Self {
            device_file: device_file.into(),
            kind: ConnectionType::Hidraw,
            phys: String::new(),
        }
    }
}

/// Snapshot of a sub-device's static and probed properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubDeviceDetails {
    pub device_path: String,
    pub connection_type: ConnectionType,
    pub mode: ConnectionMode,
    pub flags: DeviceFlags,
    pub grabbed: bool,
}

/// Notifications a sub-device sends to its subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubDeviceEvent {
    /// Capability flags changed; carries the new value
    FlagsChanged(DeviceFlags),
    /// A read on the node failed with something other than `EAGAIN`
    SocketReadError(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Rc<dyn Fn(&SubDeviceEvent)>;

/// State shared by every sub-device kind
pub struct SubDeviceBase {
    path: String,
    connection_type: ConnectionType,
    mode: ConnectionMode,
    flags: Cell<DeviceFlags>,
    grabbed: bool,
    read_notifier: RefCell<Option<SocketNotifier>>,
    input_mapper: OnceCell<Rc<InputMapper>>,
    listeners: RefCell<Vec<(u64, Listener)>>,
    next_listener: Cell<u64>,
}

impl SubDeviceBase {
    pub(crate) fn new(
        path: impl Into<String>,
        connection_type: ConnectionType,
        mode: ConnectionMode,
        flags: DeviceFlags,
        grabbed: bool,
    ) -> Self {
        Self {
            path: path.into(),
            connection_type,
            mode,
            flags: Cell::new(flags),
            grabbed,
            read_notifier: RefCell::new(None),
            input_mapper: OnceCell::new(),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn flags(&self) -> DeviceFlags {
        self.flags.get()
    }

    /// Set or clear `mask`; subscribers hear about it only if the value changed
    pub fn set_flags(&self, mask: DeviceFlags, set: bool) -> DeviceFlags {
        let old = self.flags.get();
        let mut new = old;
        new.set(mask, set);
        if new != old {
            self.flags.set(new);
            trace!("Flags of {} changed: {:?} -> {:?}", self.path, old, new);
            self.emit(SubDeviceEvent::FlagsChanged(new));
        }
        new
    }

    pub(crate) fn subscribe(&self, callback: Box<dyn Fn(&SubDeviceEvent)>) -> SubscriptionId {
        let id = self.next_listener.get();
        self.next_listener.set(id + 1);
        self.listeners.borrow_mut().push((id, Rc::from(callback)));
        SubscriptionId(id)
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id.0);
        listeners.len() != before
    }

    pub(crate) fn emit(&self, event: SubDeviceEvent) {
        // Listeners may (un)subscribe while being called
        let listeners: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    pub(crate) fn set_read_notifier(&self, notifier: SocketNotifier) {
        *self.read_notifier.borrow_mut() = Some(notifier);
    }

    /// Read once from the node; `None` once the read notifier is gone
    pub(crate) fn read(&self, buf: &mut [u8]) -> Option<Result<usize, NodeError>> {
        let notifier = self.read_notifier.borrow();
        notifier.as_ref().map(|n| n.handle().node().read(buf))
    }

    pub(crate) fn read_notifier_enabled(&self) -> bool {
        self.read_notifier
            .borrow()
            .as_ref()
            .is_some_and(SocketNotifier::is_enabled)
    }

    pub(crate) fn set_read_notifier_enabled(&self, enabled: bool) {
        if let Some(notifier) = self.read_notifier.borrow().as_ref() {
            notifier.set_enabled(enabled);
        }
    }

    /// Drop the read notifier outside the borrow
    ///
    /// The notifier's drop releases the grab, then disables it, then closes
    /// the node if nothing else holds it.
    pub(crate) fn disconnect_read(&self) {
        let notifier = self.read_notifier.borrow_mut().take();
        if let Some(notifier) = notifier {
            drop(notifier);
            debug!("Released read notifier of {}", self.path);
        }
    }

    pub(crate) fn bind_input_mapper(&self, mapper: Rc<InputMapper>) {
        if self.input_mapper.set(mapper).is_err() {
            trace!("Input mapper of {} already bound", self.path);
        }
    }
}

/// Behaviour common to every kind of sub-device connection
pub trait SubDeviceConnection {
    fn base(&self) -> &SubDeviceBase;

    /// Whether the node is still being serviced
    fn is_connected(&self) -> bool {
        false
    }

    /// Stop servicing the node; releases the grab and closes it once unused
    ///
    /// Calling it again does nothing.
    fn disconnect(&self) {
        self.base().disconnect_read();
    }

    fn path(&self) -> &str {
        self.base().path()
    }

    fn connection_type(&self) -> ConnectionType {
        self.base().connection_type
    }

    fn mode(&self) -> ConnectionMode {
        self.base().mode
    }

    fn flags(&self) -> DeviceFlags {
        self.base().flags()
    }

    fn has_flags(&self, mask: DeviceFlags) -> bool {
        self.base().flags().contains(mask)
    }

    fn set_flags(&self, mask: DeviceFlags, set: bool) -> DeviceFlags {
        self.base().set_flags(mask, set)
    }

    /// Whether the exclusive grab was taken at creation
    fn is_grabbed(&self) -> bool {
        self.base().grabbed
    }

    fn details(&self) -> SubDeviceDetails {
        let base = self.base();
        SubDeviceDetails {
            device_path: base.path.clone(),
            connection_type: base.connection_type,
            mode: base.mode,
            flags: base.flags(),
            grabbed: base.grabbed,
        }
    }

    fn input_mapper(&self) -> Option<&Rc<InputMapper>> {
        self.base().input_mapper.get()
    }

    /// Pause or resume reading without giving up the node
    fn set_read_notifier_enabled(&self, enabled: bool) {
        self.base().set_read_notifier_enabled(enabled);
    }

    fn subscribe(&self, callback: Box<dyn Fn(&SubDeviceEvent)>) -> SubscriptionId {
        self.base().subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.base().unsubscribe(id)
    }
}

/// Put the node into non-blocking mode; true if `O_NONBLOCK` is now set
pub(crate) fn enable_nonblocking(handle: &DeviceHandle) -> bool {
    if let Err(e) = handle.node().set_nonblocking() {
        debug!("Cannot set O_NONBLOCK on {}: {}", handle.path(), e);
    }
    handle.node().is_nonblocking().unwrap_or(false)
}
