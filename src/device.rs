//! One physical device and its sub-device connections

use std::collections::BTreeMap;
use std::rc::Rc;

use hidconn_kernel::DeviceOpener;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::connection::{
    ConnectionType, EventConnection, HidrawConnection, SubDeviceCandidate, SubDeviceConnection,
    SubDeviceEvent, SubscriptionId,
};
use crate::flags::DeviceFlags;
use crate::identity::DeviceId;
use crate::input_mapper::{InputMapper, VirtualOutput};
use crate::reactor::Reactor;

/// Buffered device events per subscriber before the slowest one lags
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Device-level notifications, tagged with the device and sub-device path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    SubDeviceConnected {
        id: DeviceId,
        path: String,
    },
    SubDeviceDisconnected {
        id: DeviceId,
        path: String,
    },
    SubDeviceFlagsChanged {
        id: DeviceId,
        path: String,
        flags: DeviceFlags,
    },
    SubDeviceReadError {
        id: DeviceId,
        path: String,
        errno: i32,
    },
}

struct SubDeviceEntry {
    connection: Rc<dyn SubDeviceConnection>,
    subscription: SubscriptionId,
}

/// A physical device, made up of the kernel nodes we managed to connect
///
/// The device is the only strong owner of its sub-devices. Dropping it
/// disconnects every one of them.
pub struct DeviceConnection {
    id: DeviceId,
    name: String,
    input_mapper: Rc<InputMapper>,
    sub_devices: BTreeMap<String, SubDeviceEntry>,
    event_tx: broadcast::Sender<DeviceEvent>,
}

impl DeviceConnection {
    pub fn new(
        id: DeviceId,
        name: impl Into<String>,
        virtual_device: Option<Rc<dyn VirtualOutput>>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id,
            name: name.into(),
            input_mapper: Rc::new(InputMapper::new(virtual_device)),
            sub_devices: BTreeMap::new(),
            event_tx,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_mapper(&self) -> &Rc<InputMapper> {
        &self.input_mapper
    }

    /// Receive device events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_tx.subscribe()
    }

    /// Only Logitech devices speak HID++
    pub fn has_hidpp_support(&self) -> bool {
        self.id.has_hidpp_support()
    }

    /// Take ownership of a connected sub-device
    ///
    /// An existing sub-device with the same path is disconnected and
    /// replaced. `None` (a failed factory) and connections that are no
    /// longer connected are ignored.
    pub fn add_sub_device(&mut self, connection: Option<Rc<dyn SubDeviceConnection>>) {
        let Some(connection) = connection else {
            return;
        };
        let path = connection.path().to_string();
        if !connection.is_connected() {
            debug!("Not adding disconnected sub-device {} to {}", path, self.id);
            return;
        }
        connection
            .base()
            .bind_input_mapper(Rc::clone(&self.input_mapper));

        let tx = self.event_tx.clone();
        let id = self.id;
        let sub_path = path.clone();
        let subscription = connection.subscribe(Box::new(move |event| {
            let event = match *event {
                SubDeviceEvent::FlagsChanged(flags) => DeviceEvent::SubDeviceFlagsChanged {
                    id,
                    path: sub_path.clone(),
                    flags,
                },
                SubDeviceEvent::SocketReadError(errno) => DeviceEvent::SubDeviceReadError {
                    id,
                    path: sub_path.clone(),
                    errno,
                },
            };
            // No receivers is fine
            let _ = tx.send(event);
        }));

        let entry = SubDeviceEntry {
            connection: Rc::clone(&connection),
            subscription,
        };
        if let Some(previous) = self.sub_devices.insert(path.clone(), entry) {
            previous.connection.unsubscribe(previous.subscription);
            if !same_connection(&previous.connection, &connection) {
                debug!("Replacing sub-device {} of {}", path, self.id);
                previous.connection.disconnect();
            }
        }

        info!(
            "Connected sub-device: {} ({}) {}",
            path,
            self.id,
            connection.connection_type()
        );
        let _ = self.event_tx.send(DeviceEvent::SubDeviceConnected { id: self.id, path });
    }

    /// Disconnect and forget the sub-device at `path`
    ///
    /// Returns false if there was none.
    pub fn remove_sub_device(&mut self, path: &str) -> bool {
        let Some(entry) = self.sub_devices.remove(path) else {
            return false;
        };
        entry.connection.unsubscribe(entry.subscription);
        entry.connection.disconnect();
        debug!(
            "Disconnected sub-device: {} ({}) {}",
            path,
            self.id,
            entry.connection.connection_type()
        );
        let _ = self.event_tx.send(DeviceEvent::SubDeviceDisconnected {
            id: self.id,
            path: path.to_string(),
        });
        true
    }

    /// Probe `candidate` and add it on success
    ///
    /// Returns whether a sub-device was added. Failures only affect this
    /// candidate.
    pub fn connect_candidate(
        &mut self,
        candidate: &SubDeviceCandidate,
        opener: &dyn DeviceOpener,
        reactor: &Reactor,
    ) -> bool {
        let connection: Option<Rc<dyn SubDeviceConnection>> = match candidate.kind {
            ConnectionType::Event => EventConnection::create(candidate, self, opener, reactor)
                .map(|c| c as Rc<dyn SubDeviceConnection>),
            ConnectionType::Hidraw => HidrawConnection::create(candidate, self.id, opener, reactor)
                .map(|c| c as Rc<dyn SubDeviceConnection>),
        };
        let added = connection.is_some();
        self.add_sub_device(connection);
        added
    }

    /// Present and still connected
    pub fn has_sub_device(&self, path: &str) -> bool {
        self.sub_devices
            .get(path)
            .is_some_and(|entry| entry.connection.is_connected())
    }

    pub fn sub_device(&self, path: &str) -> Option<&Rc<dyn SubDeviceConnection>> {
        self.sub_devices.get(path).map(|entry| &entry.connection)
    }

    pub fn sub_devices(&self) -> impl Iterator<Item = (&str, &Rc<dyn SubDeviceConnection>)> {
        self.sub_devices
            .iter()
            .map(|(path, entry)| (path.as_str(), &entry.connection))
    }

    pub fn sub_device_count(&self) -> usize {
        self.sub_devices.len()
    }
}

impl Drop for DeviceConnection {
    fn drop(&mut self) {
        for (path, entry) in std::mem::take(&mut self.sub_devices) {
            entry.connection.unsubscribe(entry.subscription);
            entry.connection.disconnect();
            debug!("Disconnected sub-device {} of {}", path, self.id);
        }
    }
}

fn same_connection(a: &Rc<dyn SubDeviceConnection>, b: &Rc<dyn SubDeviceConnection>) -> bool {
    std::ptr::eq(
        Rc::as_ptr(a) as *const (),
        Rc::as_ptr(b) as *const (),
    )
}
