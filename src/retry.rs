//! Bounded retry around device-control requests that may fail transiently.

use std::fmt;
use std::io;
use std::thread;
use std::time::Duration;

use log::trace;

use crate::error::{BenchError, Result};

/// Transient condition a request is allowed to wait out.
///
/// Configuration requests wait on [`Transient::Busy`], buffer dequeues on
/// [`Transient::NoFrame`]. The two are never interchangeable: a request only
/// retries on the one errno its kind names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transient {
    /// Device temporarily unavailable (`EBUSY`).
    Busy,
    /// No captured frame ready on a non-blocking dequeue (`EAGAIN`).
    NoFrame,
}

impl Transient {
    /// OS error code identifying this condition.
    pub const fn errno(self) -> i32 {
        match self {
            Self::Busy => libc::EBUSY,
            Self::NoFrame => libc::EAGAIN,
        }
    }

    fn matches(self, err: &io::Error) -> bool {
        err.raw_os_error() == Some(self.errno())
    }
}

impl fmt::Display for Transient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => f.write_str("busy"),
            Self::NoFrame => f.write_str("without a frame"),
        }
    }
}

/// Sleep quantum and total wait budget for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between attempts.
    pub quantum: Duration,
    /// Total time a single request may spend waiting.
    pub budget: Duration,
}

impl RetryPolicy {
    /// 10 ms between attempts, 10 s in total.
    pub const DEFAULT: Self = Self {
        quantum: Duration::from_millis(10),
        budget: Duration::from_millis(10_000),
    };
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Executes device-control requests, retrying one designated transient error.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryingClient {
    policy: RetryPolicy,
}

impl RetryingClient {
    /// Create a client with the given policy.
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The policy in use.
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `request`, retrying while it fails with `kind`'s errno and budget remains.
    ///
    /// Any other error is returned immediately as [`BenchError::Io`]. When the budget
    /// runs out the last transient error is returned as [`BenchError::RetryExhausted`].
    pub fn call<T, F>(&self, op: &'static str, kind: Transient, mut request: F) -> Result<T>
    where
        F: FnMut() -> io::Result<T>,
    {
        let RetryPolicy { quantum, budget } = self.policy;
        let mut remaining = budget;

        loop {
            match request() {
                Ok(value) => return Ok(value),
                Err(err) if kind.matches(&err) => {
                    if quantum.is_zero() || remaining < quantum {
                        return Err(BenchError::RetryExhausted {
                            op,
                            kind,
                            budget,
                            source: err,
                        });
                    }
                    trace!("{op} {kind}, retrying ({remaining:?} left)");
                    thread::sleep(quantum);
                    remaining -= quantum;
                }
                Err(source) => return Err(BenchError::Io { op, source }),
            }
        }
    }
}
