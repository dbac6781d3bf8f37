//! Scriptable in-memory nodes for tests
//!
//! A [`MockOpener`] hands out [`MockNode`]s built from per-path
//! [`MockNodeSpec`]s and records every call in a shared [`SyscallLog`], so
//! tests can assert exactly how often a descriptor was grabbed, written or
//! closed.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::rc::Rc;

use crate::error::NodeError;
use crate::ioctl::{bit, InputId, EV_KEY, EV_REL, EV_SYN, REL_X, REL_Y};
use crate::types::{OpenMode, RawDeviceInfo};
use crate::{DeviceNode, DeviceOpener};

const FIRST_MOCK_FD: RawFd = 100;

/// One recorded call against a mock node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Syscall {
    Open { path: String, mode: OpenMode },
    Ioctl { path: String, name: &'static str },
    Grab { path: String, grab: bool },
    Read { path: String },
    Write { path: String, len: usize },
    Close { path: String },
}

/// Shared, ordered record of mock calls
#[derive(Debug, Clone, Default)]
pub struct SyscallLog {
    calls: Rc<RefCell<Vec<Syscall>>>,
}

impl SyscallLog {
    fn push(&self, call: Syscall) {
        self.calls.borrow_mut().push(call);
    }

    pub fn calls(&self) -> Vec<Syscall> {
        self.calls.borrow().clone()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn count(&self, pred: impl Fn(&Syscall) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    pub fn opens(&self, path: &str) -> usize {
        self.count(|c| matches!(c, Syscall::Open { path: p, .. } if p == path))
    }

    pub fn closes(&self, path: &str) -> usize {
        self.count(|c| matches!(c, Syscall::Close { path: p } if p == path))
    }

    pub fn grabs(&self, path: &str, grab: bool) -> usize {
        self.count(|c| matches!(c, Syscall::Grab { path: p, grab: g } if p == path && *g == grab))
    }

    pub fn writes(&self, path: &str) -> usize {
        self.count(|c| matches!(c, Syscall::Write { path: p, .. } if p == path))
    }

    pub fn reads(&self, path: &str) -> usize {
        self.count(|c| matches!(c, Syscall::Read { path: p } if p == path))
    }

    /// Position of the first call matching `pred`
    pub fn position(&self, pred: impl Fn(&Syscall) -> bool) -> Option<usize> {
        self.calls.borrow().iter().position(pred)
    }
}

/// Scripted read results: `Ok(bytes)` or `Err(errno)`
pub type ReadQueue = Rc<RefCell<VecDeque<Result<Vec<u8>, i32>>>>;

/// Behaviour of one mock node; `None` / `Some(errno)` fields script failures
#[derive(Debug, Clone)]
pub struct MockNodeSpec {
    pub open_errno: Option<i32>,
    pub input_id: Option<InputId>,
    pub event_bits: Option<u64>,
    pub relative_bits: Option<u64>,
    pub grab_errno: Option<i32>,
    pub nonblocking_supported: bool,
    pub descriptor_size: Option<usize>,
    pub descriptor: Option<Vec<u8>>,
    pub raw_info: Option<RawDeviceInfo>,
    /// `None` writes everything; `Some(Ok(n))` writes `n`; `Some(Err(e))` fails
    pub write_result: Option<Result<usize, i32>>,
    pub reads: ReadQueue,
}

impl Default for MockNodeSpec {
    fn default() -> Self {
        Self {
            open_errno: None,
            input_id: None,
            event_bits: None,
            relative_bits: None,
            grab_errno: None,
            nonblocking_supported: true,
            descriptor_size: None,
            descriptor: None,
            raw_info: None,
            write_result: None,
            reads: ReadQueue::default(),
        }
    }
}

impl MockNodeSpec {
    /// An evdev node for `vendor:product` supporting SYN and KEY events
    pub fn event(vendor: u16, product: u16) -> Self {
        Self {
            input_id: Some(InputId {
                bustype: 0x03,
                vendor,
                product,
                version: 0x0111,
            }),
            event_bits: Some(bit(EV_SYN) | bit(EV_KEY)),
            relative_bits: Some(0),
            ..Self::default()
        }
    }

    /// An evdev node that additionally reports REL_X and REL_Y motion
    pub fn pointer(vendor: u16, product: u16) -> Self {
        let mut spec = Self::event(vendor, product);
        spec.event_bits = spec.event_bits.map(|b| b | bit(EV_REL));
        spec.relative_bits = Some(bit(REL_X) | bit(REL_Y));
        spec
    }

    /// A hidraw node for `vendor:product` with a small report descriptor
    pub fn hidraw(vendor: u16, product: u16) -> Self {
        let descriptor = vec![0x06, 0x00, 0xff, 0x09, 0x01, 0xa1, 0x01, 0xc0];
        Self {
            descriptor_size: Some(descriptor.len()),
            descriptor: Some(descriptor),
            raw_info: Some(RawDeviceInfo {
                bustype: 0x03,
                vendor,
                product,
            }),
            ..Self::default()
        }
    }

    pub fn with_event_bits(mut self, bits: u64) -> Self {
        self.event_bits = Some(bits);
        self
    }

    pub fn with_relative_bits(mut self, bits: u64) -> Self {
        self.relative_bits = Some(bits);
        self
    }

    pub fn with_open_errno(mut self, errno: i32) -> Self {
        self.open_errno = Some(errno);
        self
    }

    pub fn with_grab_errno(mut self, errno: i32) -> Self {
        self.grab_errno = Some(errno);
        self
    }

    pub fn with_write_result(mut self, result: Result<usize, i32>) -> Self {
        self.write_result = Some(result);
        self
    }

    pub fn without_nonblocking(mut self) -> Self {
        self.nonblocking_supported = false;
        self
    }
}

/// Opener that serves [`MockNode`]s from registered specs
///
/// Paths without a spec fail with `ENOENT`.
#[derive(Debug, Default)]
pub struct MockOpener {
    specs: RefCell<HashMap<String, MockNodeSpec>>,
    log: SyscallLog,
    next_fd: Cell<RawFd>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self {
            next_fd: Cell::new(FIRST_MOCK_FD),
            ..Self::default()
        }
    }

    pub fn add(&self, path: &str, spec: MockNodeSpec) {
        self.specs.borrow_mut().insert(path.to_string(), spec);
    }

    pub fn log(&self) -> &SyscallLog {
        &self.log
    }

    /// Queue bytes for the next read on `path`
    pub fn queue_read(&self, path: &str, data: Vec<u8>) {
        self.queue(path, Ok(data));
    }

    /// Queue a failing read on `path`
    pub fn queue_read_error(&self, path: &str, errno: i32) {
        self.queue(path, Err(errno));
    }

    fn queue(&self, path: &str, result: Result<Vec<u8>, i32>) {
        if let Some(spec) = self.specs.borrow().get(path) {
            spec.reads.borrow_mut().push_back(result);
        }
    }
}

impl DeviceOpener for MockOpener {
    fn open(
        &self,
        path: &str,
        mode: OpenMode,
        nonblocking: bool,
    ) -> Result<Box<dyn DeviceNode>, NodeError> {
        let spec = self.specs.borrow().get(path).cloned();
        let spec = match spec {
            Some(spec) => spec,
            None => {
                return Err(NodeError::Open {
                    path: path.to_string(),
                    source: std::io::Error::from_raw_os_error(libc::ENOENT),
                })
            }
        };
        if let Some(errno) = spec.open_errno {
            return Err(NodeError::Open {
                path: path.to_string(),
                source: std::io::Error::from_raw_os_error(errno),
            });
        }

        self.log.push(Syscall::Open {
            path: path.to_string(),
            mode,
        });
        let fd = self.next_fd.get().max(FIRST_MOCK_FD);
        self.next_fd.set(fd + 1);

        Ok(Box::new(MockNode {
            path: path.to_string(),
            fd,
            nonblocking: Cell::new(nonblocking && spec.nonblocking_supported),
            spec,
            log: self.log.clone(),
        }))
    }
}

/// A node whose every call is answered from its [`MockNodeSpec`]
pub struct MockNode {
    path: String,
    fd: RawFd,
    nonblocking: Cell<bool>,
    spec: MockNodeSpec,
    log: SyscallLog,
}

impl MockNode {
    fn ioctl<T: Clone>(&self, name: &'static str, value: &Option<T>) -> Result<T, NodeError> {
        self.log.push(Syscall::Ioctl {
            path: self.path.clone(),
            name,
        });
        value
            .clone()
            .ok_or_else(|| NodeError::ioctl_raw(name, libc::ENOTTY))
    }
}

impl DeviceNode for MockNode {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn input_id(&self) -> Result<InputId, NodeError> {
        self.ioctl("EVIOCGID", &self.spec.input_id)
    }

    fn event_bits(&self) -> Result<u64, NodeError> {
        self.ioctl("EVIOCGBIT", &self.spec.event_bits)
    }

    fn relative_bits(&self) -> Result<u64, NodeError> {
        self.ioctl("EVIOCGBIT(EV_REL)", &self.spec.relative_bits)
    }

    fn set_grab(&self, grab: bool) -> Result<(), NodeError> {
        self.log.push(Syscall::Grab {
            path: self.path.clone(),
            grab,
        });
        match self.spec.grab_errno {
            Some(errno) if grab => Err(NodeError::ioctl_raw("EVIOCGRAB", errno)),
            _ => Ok(()),
        }
    }

    fn set_nonblocking(&self) -> Result<(), NodeError> {
        self.nonblocking.set(self.spec.nonblocking_supported);
        Ok(())
    }

    fn is_nonblocking(&self) -> Result<bool, NodeError> {
        Ok(self.nonblocking.get())
    }

    fn report_descriptor_size(&self) -> Result<usize, NodeError> {
        self.ioctl("HIDIOCGRDESCSIZE", &self.spec.descriptor_size)
    }

    fn report_descriptor(&self, size: usize) -> Result<Vec<u8>, NodeError> {
        let mut desc = self.ioctl("HIDIOCGRDESC", &self.spec.descriptor)?;
        desc.truncate(size);
        Ok(desc)
    }

    fn raw_info(&self) -> Result<RawDeviceInfo, NodeError> {
        self.ioctl("HIDIOCGRAWINFO", &self.spec.raw_info)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, NodeError> {
        self.log.push(Syscall::Read {
            path: self.path.clone(),
        });
        match self.spec.reads.borrow_mut().pop_front() {
            Some(Ok(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(Err(errno)) => Err(std::io::Error::from_raw_os_error(errno).into()),
            None => Err(std::io::Error::from_raw_os_error(libc::EAGAIN).into()),
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize, NodeError> {
        self.log.push(Syscall::Write {
            path: self.path.clone(),
            len: data.len(),
        });
        match self.spec.write_result {
            None => Ok(data.len()),
            Some(Ok(n)) => Ok(n.min(data.len())),
            Some(Err(errno)) => Err(std::io::Error::from_raw_os_error(errno).into()),
        }
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.log.push(Syscall::Close {
            path: self.path.clone(),
        });
    }
}
