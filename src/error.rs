//! Error type for benchmark operations.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::retry::Transient;
use crate::stream::{BufferState, SessionState};
use crate::traits::PixFormat;

/// Error type for benchmark operations.
#[derive(Debug, Error)]
pub enum BenchError {
    /// A device-control request failed with a non-retryable error.
    #[error("{op} failed: {source}")]
    Io {
        /// Request that failed.
        op: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A request kept failing with its transient error for the whole wait budget.
    #[error("{op} still {kind} after {budget:?}: {source}")]
    RetryExhausted {
        /// Request that failed.
        op: &'static str,
        /// Transient condition that was being waited out.
        kind: Transient,
        /// Wait budget that was used up.
        budget: Duration,
        /// Last error returned by the device.
        #[source]
        source: io::Error,
    },

    /// A streaming-session operation was called in the wrong lifecycle state.
    #[error("{op} requires a {expected:?} session, found {found:?}")]
    InvalidState {
        /// Operation that was attempted.
        op: &'static str,
        /// State the operation requires.
        expected: SessionState,
        /// State the session was in.
        found: SessionState,
    },

    /// A pool buffer was not in the state an exchange step requires.
    #[error("buffer {index} is {found:?}, expected {expected:?}")]
    BufferState {
        /// Pool index.
        index: u32,
        /// State the step requires.
        expected: BufferState,
        /// State found; `None` when the index is outside the pool.
        found: Option<BufferState>,
    },

    /// Streaming was started before every buffer was handed to the device.
    #[error("stream start needs every buffer queued ({queued} of {total})")]
    PoolNotReady {
        /// Buffers queued to the device.
        queued: usize,
        /// Buffers in the pool.
        total: usize,
    },

    /// The device granted fewer buffers than the pool needs.
    #[error("device granted {granted} buffers, {requested} requested")]
    InsufficientBuffers {
        /// Buffers requested.
        requested: u32,
        /// Buffers granted by the device.
        granted: u32,
    },

    /// The device applied a different format than requested.
    #[error("requested {requested}, device applied {applied}")]
    ConfigurationSubstituted {
        /// Format requested.
        requested: PixFormat,
        /// Format read back from the device.
        applied: PixFormat,
    },

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Results could not be encoded for output.
    #[error("failed to encode results: {0}")]
    Report(#[from] serde_json::Error),
}

impl BenchError {
    /// Raw OS error code of the underlying device failure, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io { source, .. } | Self::RetryExhausted { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Whether this is the "index out of range" answer that ends an enumeration.
    pub fn is_end_of_enumeration(&self) -> bool {
        matches!(self, Self::Io { .. }) && self.raw_os_error() == Some(libc::EINVAL)
    }
}

/// Result type for benchmark operations.
pub type Result<T> = std::result::Result<T, BenchError>;
