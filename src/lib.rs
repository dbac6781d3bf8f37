// hidconn - HID sub-device connection management
// Probes, grabs and services the evdev and hidraw nodes of physical devices

pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod flags;
pub mod identity;
pub mod input_mapper;
pub mod reactor;
pub mod virtual_device;

pub use config::{ConfigError, DeviceEntry, MonitorConfig, SubDeviceEntry};
pub use connection::{
    ConnectionMode, ConnectionType, EventConnection, HidrawConnection, SubDeviceCandidate,
    SubDeviceConnection, SubDeviceDetails, SubDeviceEvent, SubscriptionId,
};
pub use device::{DeviceConnection, DeviceEvent};
pub use error::ConnectionError;
pub use flags::DeviceFlags;
pub use identity::{hex_id, DeviceId, VENDOR_LOGITECH};
pub use input_mapper::{InputMapper, VirtualOutput};
pub use reactor::{DeviceHandle, NotifierKind, Reactor, SocketNotifier};
pub use virtual_device::{UinputOutput, VirtualDeviceError};

// Kernel node layer, re-exported for callers that open nodes themselves
pub use hidconn_kernel as kernel;
