//! Real kernel nodes backed by `std::fs::File`

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tracing::debug;

use crate::error::NodeError;
use crate::ioctl::{self, HidrawDevinfo, HidrawReportDescriptor, InputId};
use crate::types::{OpenMode, RawDeviceInfo};
use crate::{DeviceNode, DeviceOpener};

/// Opens nodes under `/dev` with `open(2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelOpener;

impl DeviceOpener for KernelOpener {
    fn open(
        &self,
        path: &str,
        mode: OpenMode,
        nonblocking: bool,
    ) -> Result<Box<dyn DeviceNode>, NodeError> {
        let mut options = OpenOptions::new();
        options.read(true);
        if mode == OpenMode::ReadWrite {
            options.write(true);
        }
        if nonblocking {
            options.custom_flags(libc::O_NONBLOCK);
        }

        let file = options.open(path).map_err(|source| NodeError::Open {
            path: path.to_string(),
            source,
        })?;
        debug!("Opened {} ({:?}, fd {})", path, mode, file.as_raw_fd());

        Ok(Box::new(KernelDevice {
            file,
            path: path.to_string(),
        }))
    }
}

/// An open evdev or hidraw node
///
/// The descriptor is closed when this is dropped.
pub struct KernelDevice {
    file: File,
    path: String,
}

impl KernelDevice {
    fn status_flags(&self) -> Result<OFlag, NodeError> {
        let bits = fcntl(self.fd(), FcntlArg::F_GETFL).map_err(|e| NodeError::ioctl("F_GETFL", e))?;
        Ok(OFlag::from_bits_truncate(bits))
    }
}

impl DeviceNode for KernelDevice {
    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn input_id(&self) -> Result<InputId, NodeError> {
        let mut id = InputId::default();
        unsafe { ioctl::eviocgid(self.fd(), &mut id) }
            .map_err(|e| NodeError::ioctl("EVIOCGID", e))?;
        Ok(id)
    }

    fn event_bits(&self) -> Result<u64, NodeError> {
        let mut bits: [libc::c_ulong; 1] = [0];
        unsafe { ioctl::eviocgbit_types(self.fd(), &mut bits) }
            .map_err(|e| NodeError::ioctl("EVIOCGBIT", e))?;
        Ok(bits[0] as u64)
    }

    fn relative_bits(&self) -> Result<u64, NodeError> {
        let mut bits: [libc::c_ulong; 1] = [0];
        unsafe { ioctl::eviocgbit_rel(self.fd(), &mut bits) }
            .map_err(|e| NodeError::ioctl("EVIOCGBIT(EV_REL)", e))?;
        Ok(bits[0] as u64)
    }

    fn set_grab(&self, grab: bool) -> Result<(), NodeError> {
        unsafe { ioctl::eviocgrab(self.fd(), grab as _) }
            .map_err(|e| NodeError::ioctl("EVIOCGRAB", e))?;
        Ok(())
    }

    fn set_nonblocking(&self) -> Result<(), NodeError> {
        let flags = self.status_flags()?;
        fcntl(self.fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))
            .map_err(|e| NodeError::ioctl("F_SETFL", e))?;
        Ok(())
    }

    fn is_nonblocking(&self) -> Result<bool, NodeError> {
        Ok(self.status_flags()?.contains(OFlag::O_NONBLOCK))
    }

    fn report_descriptor_size(&self) -> Result<usize, NodeError> {
        let mut size: libc::c_int = 0;
        unsafe { ioctl::hidiocgrdescsize(self.fd(), &mut size) }
            .map_err(|e| NodeError::ioctl("HIDIOCGRDESCSIZE", e))?;
        Ok(size.max(0) as usize)
    }

    fn report_descriptor(&self, size: usize) -> Result<Vec<u8>, NodeError> {
        let mut desc = Box::new(HidrawReportDescriptor::with_size(size));
        unsafe { ioctl::hidiocgrdesc(self.fd(), &mut *desc) }
            .map_err(|e| NodeError::ioctl("HIDIOCGRDESC", e))?;
        Ok(desc.value[..desc.size as usize].to_vec())
    }

    fn raw_info(&self) -> Result<RawDeviceInfo, NodeError> {
        let mut info = HidrawDevinfo::default();
        unsafe { ioctl::hidiocgrawinfo(self.fd(), &mut info) }
            .map_err(|e| NodeError::ioctl("HIDIOCGRAWINFO", e))?;
        Ok(RawDeviceInfo {
            bustype: info.bustype,
            vendor: info.vendor as u16,
            product: info.product as u16,
        })
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, NodeError> {
        Ok((&self.file).read(buf)?)
    }

    fn write(&self, data: &[u8]) -> Result<usize, NodeError> {
        Ok((&self.file).write(data)?)
    }
}

impl Drop for KernelDevice {
    fn drop(&mut self) {
        debug!("Closing {} (fd {})", self.path, self.file.as_raw_fd());
    }
}
