//! Buffer pool and streaming-session lifecycle.
//!
//! A [`StreamingSession`] moves through `Idle -> Configured -> Streaming -> Idle`.
//! It owns every mapped buffer of its pool; [`StreamingSession::stop`] (also run on
//! drop) turns streaming off, releases the device-side buffers and unmaps each region
//! exactly once, whatever state the session was left in.

use log::{debug, warn};

use crate::error::{BenchError, Result};
use crate::retry::{RetryingClient, Transient};
use crate::traits::{BufferInfo, FrameInterval, MappedBuffer, PixFormat, VideoDevice};

/// Number of capture buffers kept in flight during a measurement.
pub const DEFAULT_BUFFER_COUNT: u32 = 10;

/// Lifecycle state of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing applied, no buffers.
    Idle,
    /// Format applied; frame interval and buffers may be set up.
    Configured,
    /// Device is capturing.
    Streaming,
}

/// Ownership state of a pool buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Held by the process, not yet handed to the device.
    Free,
    /// Handed to the capture pipeline.
    Queued,
    /// Returned by the device with a captured frame.
    Filled,
}

/// A device buffer mapped into the process.
#[derive(Debug)]
pub struct Buffer<M> {
    index: u32,
    length: u32,
    state: BufferState,
    mapping: M,
}

impl<M: MappedBuffer> Buffer<M> {
    /// Pool index.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Length reported by the device.
    pub const fn length(&self) -> u32 {
        self.length
    }

    /// Current ownership state.
    pub const fn state(&self) -> BufferState {
        self.state
    }

    /// Length of the mapped region.
    pub fn mapped_len(&self) -> usize {
        self.mapping.len()
    }
}

/// Fixed set of mapped capture buffers.
#[derive(Debug)]
pub struct BufferPool<M> {
    buffers: Vec<Buffer<M>>,
}

impl<M> Default for BufferPool<M> {
    fn default() -> Self {
        Self {
            buffers: Vec::new(),
        }
    }
}

impl<M: MappedBuffer> BufferPool<M> {
    /// Number of mapped buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no buffer is mapped.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffers in pool-index order.
    pub fn buffers(&self) -> &[Buffer<M>] {
        &self.buffers
    }

    /// State of buffer `index`, if it is part of the pool.
    pub fn state(&self, index: u32) -> Option<BufferState> {
        self.buffers.get(index as usize).map(Buffer::state)
    }

    /// Number of buffers in `state`.
    pub fn count(&self, state: BufferState) -> usize {
        self.buffers.iter().filter(|buf| buf.state == state).count()
    }

    fn push(&mut self, info: BufferInfo, mapping: M) {
        self.buffers.push(Buffer {
            index: info.index,
            length: info.length,
            state: BufferState::Free,
            mapping,
        });
    }

    fn require(&self, index: u32, expected: BufferState) -> Result<()> {
        match self.state(index) {
            Some(found) if found == expected => Ok(()),
            found => Err(BenchError::BufferState {
                index,
                expected,
                found,
            }),
        }
    }

    fn set(&mut self, index: u32, state: BufferState) {
        if let Some(buf) = self.buffers.get_mut(index as usize) {
            buf.state = state;
        }
    }

    fn transition(&mut self, index: u32, from: BufferState, to: BufferState) -> Result<()> {
        self.require(index, from)?;
        self.set(index, to);
        Ok(())
    }

    fn reclaim_all(&mut self) {
        for buf in &mut self.buffers {
            buf.state = BufferState::Free;
        }
    }

    /// Drop every mapping; returns how many regions were unmapped.
    fn unmap_all(&mut self) -> usize {
        let count = self.buffers.len();
        self.buffers.clear();
        count
    }
}

/// Outcome of one dequeue/re-enqueue cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    /// Round-robin slot for this cycle.
    pub slot: u32,
    /// Index the device reported on dequeue.
    pub reported: u32,
}

impl Exchange {
    /// Whether the device returned buffers in submission order for this cycle.
    pub const fn in_order(&self) -> bool {
        self.slot == self.reported
    }
}

/// Device plus buffer pool, driven through the streaming lifecycle.
pub struct StreamingSession<'d, D: VideoDevice> {
    device: &'d mut D,
    retry: RetryingClient,
    pool: BufferPool<D::Mapping>,
    state: SessionState,
    buffers_requested: bool,
}

impl<'d, D: VideoDevice> StreamingSession<'d, D> {
    /// Start an idle session on `device`.
    pub fn new(device: &'d mut D, retry: RetryingClient) -> Self {
        Self {
            device,
            retry,
            pool: BufferPool::default(),
            state: SessionState::Idle,
            buffers_requested: false,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// The buffer pool.
    pub const fn pool(&self) -> &BufferPool<D::Mapping> {
        &self.pool
    }

    fn require(&self, op: &'static str, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(BenchError::InvalidState {
                op,
                expected,
                found: self.state,
            })
        }
    }

    /// Apply `format` and read back what the device actually applied.
    pub fn configure(&mut self, format: &PixFormat) -> Result<PixFormat> {
        self.require("configure", SessionState::Idle)?;
        let retry = self.retry;

        retry.call("VIDIOC_S_FMT", Transient::Busy, || {
            self.device.set_format(format)
        })?;
        let applied = retry.call("VIDIOC_G_FMT", Transient::Busy, || self.device.format())?;

        self.state = SessionState::Configured;
        debug!("Configured {format}, device applied {applied}");
        Ok(applied)
    }

    /// Set the capture frame period. Must happen before buffers are allocated.
    pub fn set_frame_interval(&mut self, interval: FrameInterval) -> Result<()> {
        self.require("set_frame_interval", SessionState::Configured)?;
        let retry = self.retry;

        retry.call("VIDIOC_S_PARM", Transient::Busy, || {
            self.device.set_frame_interval(interval)
        })
    }

    /// Request, map and enqueue `count` buffers.
    ///
    /// On failure every buffer mapped so far is unmapped and the device-side
    /// request is released before the error is returned.
    pub fn allocate(&mut self, count: u32) -> Result<()> {
        self.require("allocate", SessionState::Configured)?;
        if self.buffers_requested {
            return Err(BenchError::InvalidState {
                op: "allocate",
                expected: SessionState::Configured,
                found: self.state,
            });
        }

        if let Err(err) = self.map_and_queue(count) {
            self.release_after_failure("allocate");
            return Err(err);
        }

        debug!("Mapped and queued {} buffers", self.pool.len());
        Ok(())
    }

    fn map_and_queue(&mut self, count: u32) -> Result<()> {
        let retry = self.retry;

        let granted = retry.call("VIDIOC_REQBUFS", Transient::Busy, || {
            self.device.request_buffers(count)
        })?;
        self.buffers_requested = true;
        if granted < count {
            return Err(BenchError::InsufficientBuffers {
                requested: count,
                granted,
            });
        }

        for index in 0..count {
            let info = retry.call("VIDIOC_QUERYBUF", Transient::Busy, || {
                self.device.query_buffer(index)
            })?;
            let mapping = self
                .device
                .map_buffer(&info)
                .map_err(|source| BenchError::Io { op: "mmap", source })?;

            self.pool.push(info, mapping);
            self.enqueue(index)?;
        }

        Ok(())
    }

    fn enqueue(&mut self, index: u32) -> Result<()> {
        self.pool.require(index, BufferState::Free)?;
        let retry = self.retry;

        retry.call("VIDIOC_QBUF", Transient::Busy, || {
            self.device.queue_buffer(index)
        })?;
        self.pool.set(index, BufferState::Queued);
        Ok(())
    }

    /// Turn streaming on. Every pool buffer must already be queued.
    pub fn start(&mut self) -> Result<()> {
        self.require("start", SessionState::Configured)?;

        let queued = self.pool.count(BufferState::Queued);
        if self.pool.is_empty() || queued != self.pool.len() {
            return Err(BenchError::PoolNotReady {
                queued,
                total: self.pool.len(),
            });
        }

        let retry = self.retry;
        if let Err(err) = retry.call("VIDIOC_STREAMON", Transient::Busy, || {
            self.device.stream_on()
        }) {
            self.release_after_failure("start");
            return Err(err);
        }

        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Dequeue one filled buffer and hand slot `ordinal % pool size` back to the device.
    ///
    /// Buffers are expected back in submission order. When the device reports a
    /// different index the reported buffer is recycled instead, since the round-robin
    /// slot is still owned by the device.
    pub fn exchange(&mut self, ordinal: u64) -> Result<Exchange> {
        self.require("exchange", SessionState::Streaming)?;
        if self.pool.is_empty() {
            return Err(BenchError::PoolNotReady {
                queued: 0,
                total: 0,
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let slot = (ordinal % self.pool.len() as u64) as u32;
        let retry = self.retry;

        let reported = retry.call("VIDIOC_DQBUF", Transient::NoFrame, || {
            self.device.dequeue_buffer()
        })?;
        self.pool
            .transition(reported, BufferState::Queued, BufferState::Filled)?;

        let recycled = if reported == slot {
            slot
        } else {
            warn!("Device returned buffer {reported} out of order, expected {slot}");
            reported
        };

        // Frames are not inspected; the buffer is free as soon as it is returned.
        self.pool
            .transition(recycled, BufferState::Filled, BufferState::Free)?;
        self.enqueue(recycled)?;

        Ok(Exchange { slot, reported })
    }

    /// Stop streaming, release device buffers and unmap the pool.
    ///
    /// Safe to call in any state and more than once. Every step is attempted even if
    /// an earlier one fails; the first failure is returned.
    pub fn stop(&mut self) -> Result<()> {
        let retry = self.retry;
        let mut first_err = None;

        if self.state == SessionState::Streaming {
            if let Err(err) = retry.call("VIDIOC_STREAMOFF", Transient::Busy, || {
                self.device.stream_off()
            }) {
                first_err.get_or_insert(err);
            }
            // Stream-off returns every buffer to the process.
            self.pool.reclaim_all();
        }

        if self.buffers_requested {
            if let Err(err) = retry.call("VIDIOC_REQBUFS", Transient::Busy, || {
                self.device.request_buffers(0).map(|_| ())
            }) {
                first_err.get_or_insert(err);
            }
            self.buffers_requested = false;
        }

        let unmapped = self.pool.unmap_all();
        if unmapped > 0 {
            debug!("Unmapped {unmapped} buffers");
        }
        self.state = SessionState::Idle;

        first_err.map_or(Ok(()), Err)
    }

    fn release_after_failure(&mut self, op: &str) {
        if let Err(err) = self.stop() {
            warn!("Cleanup after failed {op} also failed: {err}");
        }
    }
}

impl<D: VideoDevice> Drop for StreamingSession<'_, D> {
    fn drop(&mut self) {
        if self.state != SessionState::Idle || self.buffers_requested || !self.pool.is_empty() {
            self.release_after_failure("session");
        }
    }
}
