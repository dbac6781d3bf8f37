//! evdev and hidraw ioctl definitions
//!
//! From linux/input.h:
//!   #define EVIOCGID          _IOR('E', 0x02, struct input_id)
//!   #define EVIOCGBIT(ev,len) _IOC(_IOC_READ, 'E', 0x20 + (ev), len)
//!   #define EVIOCGRAB         _IOW('E', 0x90, int)
//!
//! From linux/hidraw.h:
//!   #define HIDIOCGRDESCSIZE  _IOR('H', 0x01, int)
//!   #define HIDIOCGRDESC      _IOR('H', 0x02, struct hidraw_report_descriptor)
//!   #define HIDIOCGRAWINFO    _IOR('H', 0x03, struct hidraw_devinfo)

use nix::{ioctl_read, ioctl_read_buf, ioctl_write_int};

/// Event type codes (linux/input-event-codes.h)
pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const EV_REP: u16 = 0x14;

/// Relative axis codes
pub const REL_X: u16 = 0x00;
pub const REL_Y: u16 = 0x01;

/// Largest report descriptor hidraw will hand out
pub const HID_MAX_DESCRIPTOR_SIZE: usize = 4096;

const EVDEV_MAGIC: u8 = b'E';
const HIDRAW_MAGIC: u8 = b'H';

/// `struct input_id`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputId {
    pub bustype: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

/// `struct hidraw_devinfo`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct HidrawDevinfo {
    pub bustype: u32,
    pub vendor: i16,
    pub product: i16,
}

/// `struct hidraw_report_descriptor`
#[repr(C)]
pub struct HidrawReportDescriptor {
    pub size: u32,
    pub value: [u8; HID_MAX_DESCRIPTOR_SIZE],
}

impl HidrawReportDescriptor {
    pub fn with_size(size: usize) -> Self {
        Self {
            size: size.min(HID_MAX_DESCRIPTOR_SIZE) as u32,
            value: [0; HID_MAX_DESCRIPTOR_SIZE],
        }
    }
}

ioctl_read!(eviocgid, EVDEV_MAGIC, 0x02, InputId);
ioctl_read_buf!(eviocgbit_types, EVDEV_MAGIC, 0x20, libc::c_ulong);
ioctl_read_buf!(eviocgbit_rel, EVDEV_MAGIC, 0x22, libc::c_ulong);
ioctl_write_int!(eviocgrab, EVDEV_MAGIC, 0x90);

ioctl_read!(hidiocgrdescsize, HIDRAW_MAGIC, 0x01, libc::c_int);
ioctl_read!(hidiocgrdesc, HIDRAW_MAGIC, 0x02, HidrawReportDescriptor);
ioctl_read!(hidiocgrawinfo, HIDRAW_MAGIC, 0x03, HidrawDevinfo);

/// Bit `n` of a kernel capability bitmask
#[inline]
pub const fn bit(n: u16) -> u64 {
    1u64 << n
}
