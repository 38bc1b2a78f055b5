//! Error types shared by every stage of the recovery pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Broad classification of a [`DrillError`], used by the CLI to decide how
/// to report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid settings, unreadable or unsupported input
    Configuration,
    /// Short read or out-of-range seek on the virtual block stream
    Stream,
    /// Scan refused to start because a finished dataset already exists
    ScanInvariant,
    /// Export request cannot be satisfied
    Export,
    /// Checkpoint store could not be read or committed
    Store,
}

#[derive(Error, Debug)]
pub enum DrillError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unsupported device path {}: direct device access is not supported, image the disk to a file first", .0.display())]
    UnsupportedDevice(PathBuf),

    #[error("cannot read input {}: {source}", path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("short read: wanted {wanted} bytes at offset {offset}, stream ended after {got}")]
    ShortRead { offset: u64, wanted: usize, got: usize },

    #[error("seek to offset {offset} is beyond the end of the stream ({total} bytes)")]
    SeekOutOfRange { offset: u64, total: u64 },

    #[error("{0}")]
    ScanInvariant(String),

    #[error("export error: {0}")]
    Export(String),

    #[error("chunks are not linked yet, run `link` first")]
    NotLinked,

    #[error("store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl DrillError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DrillError::Config(_) | DrillError::UnsupportedDevice(_) | DrillError::Input { .. } => {
                ErrorKind::Configuration
            }
            DrillError::ShortRead { .. } | DrillError::SeekOutOfRange { .. } | DrillError::Io(_) => {
                ErrorKind::Stream
            }
            DrillError::ScanInvariant(_) => ErrorKind::ScanInvariant,
            DrillError::Export(_) | DrillError::NotLinked => ErrorKind::Export,
            DrillError::Store(_) | DrillError::Serde(_) => ErrorKind::Store,
        }
    }
}

pub type Result<T> = std::result::Result<T, DrillError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            DrillError::UnsupportedDevice(PathBuf::from(r"\\.\PhysicalDrive0")).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            DrillError::ShortRead { offset: 0, wanted: 2048, got: 12 }.kind(),
            ErrorKind::Stream
        );
        assert_eq!(DrillError::NotLinked.kind(), ErrorKind::Export);
        assert_eq!(
            DrillError::ScanInvariant("x".into()).kind(),
            ErrorKind::ScanInvariant
        );
    }
}
