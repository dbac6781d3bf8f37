//! Connection error types

use hidconn_kernel::NodeError;
use thiserror::Error;

/// Errors returned by operations on an established sub-device connection
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("{path} is not writable")]
    NotWritable { path: String },

    #[error("Write to {path} failed: {source}")]
    Write {
        path: String,
        #[source]
        source: NodeError,
    },
}

impl ConnectionError {
    /// OS error number of a failed write
    pub fn errno(&self) -> Option<i32> {
        match self {
            ConnectionError::NotWritable { .. } => None,
            ConnectionError::Write { source, .. } => source.errno(),
        }
    }
}
