//! Common types for kernel node access

use std::mem::size_of;

/// How a node is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// `O_RDONLY` (evdev nodes)
    ReadOnly,
    /// `O_RDWR` (hidraw nodes)
    ReadWrite,
}

/// Vendor/product info reported by `HIDIOCGRAWINFO`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawDeviceInfo {
    pub bustype: u32,
    pub vendor: u16,
    pub product: u16,
}

/// Size of one `struct input_event` record on this platform
pub const INPUT_EVENT_SIZE: usize = size_of::<libc::input_event>();

/// Offset of the `type` field, right after the timestamp
const INPUT_EVENT_TYPE_OFFSET: usize = size_of::<libc::timeval>();

/// One decoded evdev record (timestamp dropped)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub type_: u16,
    pub code: u16,
    pub value: i32,
}

impl InputEvent {
    pub const fn new(type_: u16, code: u16, value: i32) -> Self {
        Self { type_, code, value }
    }

    /// Decode one record; `None` if `record` is shorter than a full event
    pub fn parse(record: &[u8]) -> Option<Self> {
        if record.len() < INPUT_EVENT_SIZE {
            return None;
        }
        let o = INPUT_EVENT_TYPE_OFFSET;
        Some(Self {
            type_: u16::from_ne_bytes([record[o], record[o + 1]]),
            code: u16::from_ne_bytes([record[o + 2], record[o + 3]]),
            value: i32::from_ne_bytes([record[o + 4], record[o + 5], record[o + 6], record[o + 7]]),
        })
    }

    /// Decode every complete record in `buf`, ignoring a trailing partial one
    pub fn parse_records(buf: &[u8]) -> Vec<Self> {
        buf.chunks_exact(INPUT_EVENT_SIZE)
            .filter_map(Self::parse)
            .collect()
    }

    /// Encode as a kernel record with a zero timestamp
    pub fn to_record(&self) -> Vec<u8> {
        let mut record = vec![0u8; INPUT_EVENT_SIZE];
        let o = INPUT_EVENT_TYPE_OFFSET;
        record[o..o + 2].copy_from_slice(&self.type_.to_ne_bytes());
        record[o + 2..o + 4].copy_from_slice(&self.code.to_ne_bytes());
        record[o + 4..o + 8].copy_from_slice(&self.value.to_ne_bytes());
        record
    }
}
