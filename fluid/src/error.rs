//! Error taxonomy shared by sessions and host bridges.

use std::path::PathBuf;

use crate::envelope::{DecodeError, TaskKind};
use crate::tracker::TrackerError;

/// Failure to produce a usable binding from a native artifact.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to load service artifact {}: {source}", path.display())]
    ArtifactNotFound {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("service artifact {} is missing entry point(s): {}", path.display(), missing.join(", "))]
    IncompleteBinding {
        path: PathBuf,
        missing: Vec<&'static str>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FluidError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("not connected to a compute service")]
    NotConnected,

    #[error("session has been shut down")]
    Unbound,

    #[error("failed to connect to {endpoint}: status {code} ({detail})")]
    ConnectionError {
        endpoint: String,
        code: i32,
        detail: String,
    },

    #[error("service rejected {kind} task: status {code}")]
    SubmitRejected { kind: TaskKind, code: i32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("correlation id '{0}' is already outstanding")]
    DuplicateCorrelationId(String),

    #[error("malformed envelope: {0}")]
    Decode(#[from] DecodeError),

    #[error("service wrote a {len}-byte correlation id that is not valid UTF-8")]
    InvalidCorrelationId { len: usize },
}

impl From<TrackerError> for FluidError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::DuplicateCorrelationId(id) => Self::DuplicateCorrelationId(id),
        }
    }
}

pub type Result<T, E = FluidError> = std::result::Result<T, E>;

/// Stable numeric codes for the C ABI. Never renumber.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Ok = 0,
    ArtifactNotFound = 1,
    IncompleteBinding = 2,
    NotConnected = 3,
    Unbound = 4,
    ConnectionError = 5,
    SubmitRejected = 6,
    InvalidArgument = 7,
    DuplicateCorrelationId = 8,
    Decode = 9,
    /// Output buffer too small for the correlation id.
    BufferTooSmall = 10,
    NullPointer = 11,
    InvalidCorrelationId = 12,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<&LoadError> for ErrorCode {
    fn from(err: &LoadError) -> Self {
        match err {
            LoadError::ArtifactNotFound { .. } => Self::ArtifactNotFound,
            LoadError::IncompleteBinding { .. } => Self::IncompleteBinding,
        }
    }
}

impl From<&FluidError> for ErrorCode {
    fn from(err: &FluidError) -> Self {
        match err {
            FluidError::Load(load) => load.into(),
            FluidError::NotConnected => Self::NotConnected,
            FluidError::Unbound => Self::Unbound,
            FluidError::ConnectionError { .. } => Self::ConnectionError,
            FluidError::SubmitRejected { .. } => Self::SubmitRejected,
            FluidError::InvalidArgument(_) => Self::InvalidArgument,
            FluidError::DuplicateCorrelationId(_) => Self::DuplicateCorrelationId,
            FluidError::Decode(_) => Self::Decode,
            FluidError::InvalidCorrelationId { .. } => Self::InvalidCorrelationId,
        }
    }
}
