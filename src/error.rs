//! Error types for capture operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::capture::DeviceState;

/// Result type alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Which half of the format negotiation exchange was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatStage {
    /// The set-format request.
    Set,
    /// The read-back of the format actually in effect.
    Get,
}

impl std::fmt::Display for FormatStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Set => f.write_str("VIDIOC_S_FMT"),
            Self::Get => f.write_str("VIDIOC_G_FMT"),
        }
    }
}

/// Error type for capture operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The device node could not be opened.
    #[error("cannot open {}: {source}", path.display())]
    Open {
        /// Path that was opened.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The device cannot report capabilities or cannot capture video.
    #[error("capability check failed: {0}")]
    Capability(String),

    /// The device reported no usable pixel formats.
    #[error("format enumeration failed: {0}")]
    Enumeration(String),

    /// The driver rejected format negotiation.
    #[error("format negotiation failed ({stage}): {source}")]
    Format {
        /// The rejected request.
        stage: FormatStage,
        /// Underlying driver error.
        #[source]
        source: io::Error,
    },

    /// The driver does not support memory-mapped streaming I/O.
    #[error("device does not support memory mapping")]
    UnsupportedMemoryModel,

    /// Buffer allocation or query failed.
    #[error("buffer setup failed: {0}")]
    Buffer(String),

    /// A kernel buffer could not be mapped into the process.
    #[error("failed to map buffer {index}: {reason}")]
    Map {
        /// Ring index of the buffer.
        index: u32,
        /// What went wrong.
        reason: String,
    },

    /// Enqueueing the ring or switching streaming on failed.
    #[error("failed to start stream: {0}")]
    StreamStart(#[source] io::Error),

    /// Switching streaming off failed.
    #[error("failed to stop stream: {0}")]
    StreamStop(#[source] io::Error),

    /// No filled buffer could be dequeued.
    #[error("failed to dequeue buffer: {0}")]
    Dequeue(#[source] io::Error),

    /// The captured frame could not be converted.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// A consumed buffer could not be handed back to the driver.
    #[error("failed to requeue buffer {index}: {source}")]
    Requeue {
        /// Ring index of the buffer.
        index: u32,
        /// Underlying driver error.
        #[source]
        source: io::Error,
    },

    /// An operation was called in a lifecycle state that does not allow it.
    #[error("{operation} is not allowed in state {state:?}")]
    InvalidState {
        /// Name of the rejected operation.
        operation: &'static str,
        /// State the device was in.
        state: DeviceState,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A captured picture does not show the expected test pattern.
    #[error("validation failed: {0}")]
    Validation(String),
}

impl Error {
    /// Whether this error is a dequeue that gave up after the configured timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Dequeue(err) if err.kind() == io::ErrorKind::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_detection() {
        let timeout = Error::Dequeue(io::Error::new(io::ErrorKind::TimedOut, "VIDIOC_DQBUF"));
        assert!(timeout.is_timeout());

        let other = Error::Dequeue(io::Error::from(io::ErrorKind::InvalidInput));
        assert!(!other.is_timeout());
        assert!(!Error::UnsupportedMemoryModel.is_timeout());
    }

    #[test]
    fn test_format_error_names_stage() {
        let err = Error::Format {
            stage: FormatStage::Get,
            source: io::Error::from(io::ErrorKind::InvalidInput),
        };
        assert!(err.to_string().contains("VIDIOC_G_FMT"));
    }
}
