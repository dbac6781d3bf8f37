//! Kernel node access for hidconn
//!
//! Thin layer over the two kinds of kernel nodes a HID device exposes:
//!
//! - evdev nodes (`/dev/input/eventN`): id, capability bitmasks, exclusive grab
//! - hidraw nodes (`/dev/hidrawN`): report descriptor, raw device info, byte I/O
//!
//! Everything above this crate talks to nodes through [`DeviceNode`] and
//! [`DeviceOpener`], so probing logic can run against the [`mock`] backend.

pub mod error;
pub mod ioctl;
pub mod kernel;
pub mod mock;
pub mod types;

pub use error::NodeError;
pub use kernel::{KernelDevice, KernelOpener};
pub use types::{InputEvent, OpenMode, RawDeviceInfo, INPUT_EVENT_SIZE};

use std::os::unix::io::RawFd;

use ioctl::InputId;

/// An open kernel device node
///
/// Dropping the node closes its descriptor.
pub trait DeviceNode {
    /// Underlying descriptor, for readiness polling
    fn fd(&self) -> RawFd;

    /// Path the node was opened from
    fn path(&self) -> &str;

    /// `EVIOCGID`
    fn input_id(&self) -> Result<InputId, NodeError>;

    /// `EVIOCGBIT(0)`: supported event types
    fn event_bits(&self) -> Result<u64, NodeError>;

    /// `EVIOCGBIT(EV_REL)`: supported relative axes
    fn relative_bits(&self) -> Result<u64, NodeError>;

    /// `EVIOCGRAB` with 1 (grab) or 0 (release)
    fn set_grab(&self, grab: bool) -> Result<(), NodeError>;

    /// Add `O_NONBLOCK` to the descriptor status flags
    fn set_nonblocking(&self) -> Result<(), NodeError>;

    /// Whether `O_NONBLOCK` is currently set
    fn is_nonblocking(&self) -> Result<bool, NodeError>;

    /// `HIDIOCGRDESCSIZE`
    fn report_descriptor_size(&self) -> Result<usize, NodeError>;

    /// `HIDIOCGRDESC`
    fn report_descriptor(&self, size: usize) -> Result<Vec<u8>, NodeError>;

    /// `HIDIOCGRAWINFO`
    fn raw_info(&self) -> Result<RawDeviceInfo, NodeError>;

    /// Single `read(2)`
    fn read(&self, buf: &mut [u8]) -> Result<usize, NodeError>;

    /// Single `write(2)`
    fn write(&self, data: &[u8]) -> Result<usize, NodeError>;
}

/// Opens device nodes by path
pub trait DeviceOpener {
    fn open(
        &self,
        path: &str,
        mode: OpenMode,
        nonblocking: bool,
    ) -> Result<Box<dyn DeviceNode>, NodeError>;
}
