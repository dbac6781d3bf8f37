//! Capability flags of a probed sub-device

use bitflags::bitflags;
use hidconn_kernel::ioctl::{bit, EV_KEY, EV_REL, EV_REP, EV_SYN, REL_X, REL_Y};

bitflags! {
    /// What a sub-device turned out to support when probed
    ///
    /// Derived from what the kernel reports for the node, not from the
    /// device class it was enumerated as.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceFlags: u32 {
        /// EV_SYN
        const SYN_EVENTS      = 1 << 0;
        /// EV_KEY
        const KEY_EVENTS      = 1 << 1;
        /// EV_REP
        const REP_EVENTS      = 1 << 2;
        /// EV_REL with both REL_X and REL_Y
        const RELATIVE_EVENTS = 1 << 3;
        /// Descriptor is in O_NONBLOCK mode
        const NON_BLOCKING    = 1 << 4;
        /// We hold the exclusive EVIOCGRAB
        const GRABBED         = 1 << 5;
        /// Device reports battery status
        const REPORT_BATTERY  = 1 << 6;
    }
}

impl DeviceFlags {
    /// Flags implied by the `EVIOCGBIT(0)` and `EVIOCGBIT(EV_REL)` masks
    ///
    /// Pointer motion needs both axes; a node with only REL_X (or only a
    /// wheel) does not count as a relative device.
    pub fn from_event_bits(event_bits: u64, relative_bits: u64) -> Self {
        let mut flags = DeviceFlags::empty();
        if event_bits & bit(EV_SYN) != 0 {
            flags |= DeviceFlags::SYN_EVENTS;
        }
        if event_bits & bit(EV_REP) != 0 {
            flags |= DeviceFlags::REP_EVENTS;
        }
        if event_bits & bit(EV_KEY) != 0 {
            flags |= DeviceFlags::KEY_EVENTS;
        }
        let rel_xy = bit(REL_X) | bit(REL_Y);
        if event_bits & bit(EV_REL) != 0 && relative_bits & rel_xy == rel_xy {
            flags |= DeviceFlags::RELATIVE_EVENTS;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_classes_map_directly() {
        let flags = DeviceFlags::from_event_bits(bit(EV_SYN) | bit(EV_KEY) | bit(EV_REP), 0);
        assert_eq!(
            flags,
            DeviceFlags::SYN_EVENTS | DeviceFlags::KEY_EVENTS | DeviceFlags::REP_EVENTS
        );
    }

    #[test]
    fn test_relative_needs_both_axes() {
        let ev = bit(EV_SYN) | bit(EV_REL);
        assert!(DeviceFlags::from_event_bits(ev, bit(REL_X) | bit(REL_Y))
            .contains(DeviceFlags::RELATIVE_EVENTS));
        assert!(!DeviceFlags::from_event_bits(ev, bit(REL_X))
            .contains(DeviceFlags::RELATIVE_EVENTS));
        assert!(!DeviceFlags::from_event_bits(ev, bit(REL_Y))
            .contains(DeviceFlags::RELATIVE_EVENTS));
    }

    #[test]
    fn test_relative_axes_ignored_without_ev_rel() {
        let flags = DeviceFlags::from_event_bits(bit(EV_KEY), bit(REL_X) | bit(REL_Y));
        assert_eq!(flags, DeviceFlags::KEY_EVENTS);
    }
}
