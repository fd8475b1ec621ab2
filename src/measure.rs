//! Wall-clock frame-rate measurement over a streaming session.

use std::time::{Duration, Instant};

use log::{debug, info};

use crate::error::Result;
use crate::stream::{StreamingSession, DEFAULT_BUFFER_COUNT};
use crate::traits::{FrameInterval, VideoDevice};

/// Length of one measurement window.
pub const DEFAULT_TEST_DURATION: Duration = Duration::from_secs(10);

/// Source of timestamps for the measurement loop.
pub trait Clock {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// The monotonic system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Result of one measurement loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Dequeue/re-enqueue cycles completed.
    pub frames: u64,
    /// Wall-clock time spent in the loop.
    pub elapsed: Duration,
    /// `frames / elapsed`.
    pub actual_fps: f64,
    /// Cycles where the device returned a buffer out of submission order.
    pub reordered: u64,
}

/// Runs the fixed-size frame-exchange loop.
#[derive(Debug, Clone)]
pub struct FpsMeasurer<C = SystemClock> {
    clock: C,
    duration: Duration,
    buffer_count: u32,
}

impl Default for FpsMeasurer {
    fn default() -> Self {
        Self::new(DEFAULT_TEST_DURATION, DEFAULT_BUFFER_COUNT)
    }
}

impl FpsMeasurer {
    /// Measurer on the system clock.
    pub const fn new(duration: Duration, buffer_count: u32) -> Self {
        Self::with_clock(SystemClock, duration, buffer_count)
    }
}

impl<C: Clock> FpsMeasurer<C> {
    /// Measurer on a custom clock.
    pub const fn with_clock(clock: C, duration: Duration, buffer_count: u32) -> Self {
        Self {
            clock,
            duration,
            buffer_count,
        }
    }

    /// Frames to exchange for `interval`: the requested rate times the window, rounded.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn target_frames(&self, interval: FrameInterval) -> u64 {
        (interval.fps() * self.duration.as_secs_f64()).round() as u64
    }

    /// Apply `interval`, bring up the buffer pool and time `target_frames` exchanges.
    ///
    /// `session` must be configured and not yet allocated: drivers refuse to change
    /// the frame period once buffers exist. The caller tears the session down.
    pub fn run<D: VideoDevice>(
        &self,
        session: &mut StreamingSession<'_, D>,
        interval: FrameInterval,
    ) -> Result<Measurement> {
        session.set_frame_interval(interval)?;
        session.allocate(self.buffer_count)?;
        session.start()?;

        let frames = self.target_frames(interval);
        debug!("Exchanging {frames} frames at {interval}");

        let mut reordered = 0;
        let start = self.clock.now();
        for ordinal in 0..frames {
            if !session.exchange(ordinal)?.in_order() {
                reordered += 1;
            }
        }
        let elapsed = self.clock.now().saturating_duration_since(start);

        #[allow(clippy::cast_precision_loss)]
        let actual_fps = if frames == 0 || elapsed.is_zero() {
            0.0
        } else {
            frames as f64 / elapsed.as_secs_f64()
        };

        info!("{frames} frames in {elapsed:?}: {actual_fps:.2} fps (requested {interval})");
        Ok(Measurement {
            frames,
            elapsed,
            actual_fps,
            reordered,
        })
    }
}
