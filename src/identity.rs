//! Physical device identity

use std::fmt;

/// Logitech vendor ID; the only vendor speaking HID++
pub const VENDOR_LOGITECH: u16 = 0x046d;

/// Vendor/product pair identifying one physical device
///
/// Ordered vendor first, then product, so it can key sorted maps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId {
    vendor_id: u16,
    product_id: u16,
}

impl DeviceId {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    pub const fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub const fn product_id(&self) -> u16 {
        self.product_id
    }

    /// Check a kernel-reported vendor/product pair against this identity
    #[inline]
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }

    /// HID++ is only spoken by Logitech devices
    #[inline]
    pub fn has_hidpp_support(&self) -> bool {
        self.vendor_id == VENDOR_LOGITECH
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Format a 16-bit id as `0x046d` for log lines
pub fn hex_id(id: u16) -> String {
    format!("0x{:04x}", id)
}
