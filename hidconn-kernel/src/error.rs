//! Kernel node error types

use std::io;

use thiserror::Error;

/// Errors from opening or talking to a kernel device node
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("ioctl {name} failed: {source}")]
    Ioctl {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NodeError {
    /// Build an ioctl error from a nix errno
    pub fn ioctl(name: &'static str, errno: nix::errno::Errno) -> Self {
        NodeError::Ioctl {
            name,
            source: io::Error::from(errno),
        }
    }

    /// Build an ioctl error from a raw errno value
    pub fn ioctl_raw(name: &'static str, errno: i32) -> Self {
        NodeError::Ioctl {
            name,
            source: io::Error::from_raw_os_error(errno),
        }
    }

    /// OS error number, if the failure came from a syscall
    pub fn errno(&self) -> Option<i32> {
        match self {
            NodeError::Open { source, .. } | NodeError::Ioctl { source, .. } => {
                source.raw_os_error()
            }
            NodeError::Io(source) => source.raw_os_error(),
        }
    }

    /// `EAGAIN`: a non-blocking descriptor has nothing for us yet
    pub fn is_would_block(&self) -> bool {
        self.errno() == Some(libc::EAGAIN)
    }
}
