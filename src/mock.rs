//! Mock device implementation for testing without hardware.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::measure::Clock;
use crate::traits::{
    BufferInfo, DeviceCapabilities, DeviceProvider, FormatDescriptor, FourCC, FrameInterval,
    FrameIntervalEntry, FrameSize, MappedBuffer, PixFormat, Resolution, VideoDevice,
};

/// Device requests faults can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// Capability query.
    QueryCaps,
    /// Format enumeration.
    EnumFormat,
    /// Frame-size enumeration.
    EnumFrameSize,
    /// Frame-interval enumeration.
    EnumFrameInterval,
    /// Format read-back.
    GetFormat,
    /// Format set.
    SetFormat,
    /// Frame-interval set.
    SetInterval,
    /// Buffer request.
    ReqBufs,
    /// Buffer query.
    QueryBuf,
    /// Buffer mapping.
    Mmap,
    /// Buffer enqueue.
    Qbuf,
    /// Buffer dequeue.
    Dqbuf,
    /// Stream on.
    StreamOn,
    /// Stream off.
    StreamOff,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    op: MockOp,
    errno: i32,
    after: u32,
    remaining: u32,
}

/// What the mock saw, shared with the test after the device is borrowed away.
#[derive(Debug, Default)]
pub struct CallLog {
    /// Successful enqueues per buffer index.
    pub queued: BTreeMap<u32, u32>,
    /// Successful dequeues.
    pub dequeued: u32,
    /// Regions mapped.
    pub mapped: u32,
    /// Unmaps per buffer index.
    pub unmapped: BTreeMap<u32, u32>,
    /// Successful buffer requests, by requested count.
    pub buffer_requests: Vec<u32>,
    /// Frame intervals applied.
    pub intervals: Vec<FrameInterval>,
    /// Stream-on calls that succeeded.
    pub stream_on: u32,
    /// Stream-off calls that succeeded.
    pub stream_off: u32,
}

/// Format entry of the mock's capability table.
#[derive(Debug, Clone)]
pub struct MockFormat {
    fourcc: FourCC,
    description: String,
    sizes: Vec<(FrameSize, Vec<FrameIntervalEntry>)>,
}

impl MockFormat {
    /// A format with no frame sizes yet.
    pub fn new(fourcc: FourCC, description: &str) -> Self {
        Self {
            fourcc,
            description: description.to_owned(),
            sizes: Vec::new(),
        }
    }

    /// Add a frame size with discrete intervals.
    #[must_use]
    pub fn with_size(self, size: FrameSize, intervals: Vec<FrameInterval>) -> Self {
        let entries = intervals
            .into_iter()
            .map(FrameIntervalEntry::discrete)
            .collect();
        self.with_entries(size, entries)
    }

    /// Add a frame size with arbitrary interval entries.
    #[must_use]
    pub fn with_entries(mut self, size: FrameSize, intervals: Vec<FrameIntervalEntry>) -> Self {
        self.sizes.push((size, intervals));
        self
    }
}

/// Clock advanced by hand, or by the mock device once per delivered frame.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Cell<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// A clock standing at its origin.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Cell::new(Duration::ZERO),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }
}

impl Clock for Rc<ManualClock> {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }
}

/// Mapped region that records its unmap in the shared log.
#[derive(Debug)]
pub struct MockMapping {
    index: u32,
    len: usize,
    log: Rc<RefCell<CallLog>>,
}

impl MappedBuffer for MockMapping {
    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MockMapping {
    fn drop(&mut self) {
        *self.log.borrow_mut().unmapped.entry(self.index).or_insert(0) += 1;
    }
}

/// Mock device for testing without hardware.
///
/// Buffers come back in FIFO order unless reordering is enabled. An empty queue
/// answers a dequeue with `EAGAIN`, like a non-blocking device node.
pub struct MockDevice {
    capabilities: DeviceCapabilities,
    formats: Vec<MockFormat>,
    format: PixFormat,
    substitute: Option<PixFormat>,
    interval: FrameInterval,
    max_buffers: u32,
    buffer_count: u32,
    queue: VecDeque<u32>,
    streaming: bool,
    reorder: bool,
    faults: RefCell<Vec<Fault>>,
    calls: RefCell<HashMap<MockOp, u32>>,
    clock: Option<Rc<ManualClock>>,
    log: Rc<RefCell<CallLog>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// A capture device named "Android Webcam" advertising YUYV 640x480 at 30 and 15 fps.
    pub fn new() -> Self {
        Self {
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Android Webcam".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            formats: vec![MockFormat::new(FourCC::YUYV, "YUYV 4:2:2").with_size(
                FrameSize::discrete(640, 480),
                vec![FrameInterval::from_fps(30), FrameInterval::from_fps(15)],
            )],
            format: PixFormat::new(FourCC::YUYV, Resolution::new(640, 480)),
            substitute: None,
            interval: FrameInterval::from_fps(30),
            max_buffers: 32,
            buffer_count: 0,
            queue: VecDeque::new(),
            streaming: false,
            reorder: false,
            faults: RefCell::new(Vec::new()),
            calls: RefCell::new(HashMap::new()),
            clock: None,
            log: Rc::new(RefCell::new(CallLog::default())),
        }
    }

    /// Replace the card name.
    #[must_use]
    pub fn with_card(mut self, card: &str) -> Self {
        card.clone_into(&mut self.capabilities.card);
        self
    }

    /// Set the capabilities for this mock device.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Replace the capability table.
    #[must_use]
    pub fn with_formats(mut self, formats: Vec<MockFormat>) -> Self {
        self.formats = formats;
        self
    }

    /// Apply `format` whatever is requested.
    #[must_use]
    pub fn with_substitution(mut self, format: PixFormat) -> Self {
        self.substitute = Some(format);
        self
    }

    /// Grant at most `max` buffers.
    #[must_use]
    pub fn with_max_buffers(mut self, max: u32) -> Self {
        self.max_buffers = max;
        self
    }

    /// Return the second queued buffer first.
    #[must_use]
    pub fn with_reordering(mut self) -> Self {
        self.reorder = true;
        self
    }

    /// Advance `clock` by one frame period per delivered frame.
    #[must_use]
    pub fn with_clock(mut self, clock: Rc<ManualClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Fail `times` calls of `op` with `errno`, starting after `after` calls.
    #[must_use]
    pub fn fail(self, op: MockOp, errno: i32, after: u32, times: u32) -> Self {
        self.faults.borrow_mut().push(Fault {
            op,
            errno,
            after,
            remaining: times,
        });
        self
    }

    /// Shared call log.
    pub fn log(&self) -> Rc<RefCell<CallLog>> {
        Rc::clone(&self.log)
    }

    /// Number of calls made to `op`, including failed ones.
    pub fn calls(&self, op: MockOp) -> u32 {
        self.calls.borrow().get(&op).copied().unwrap_or(0)
    }

    /// Whether the device is capturing.
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn check(&self, op: MockOp) -> io::Result<()> {
        let call = {
            let mut calls = self.calls.borrow_mut();
            let count = calls.entry(op).or_insert(0);
            *count += 1;
            *count
        };

        let mut faults = self.faults.borrow_mut();
        let fault = faults
            .iter_mut()
            .find(|fault| fault.op == op && call > fault.after && fault.remaining > 0);
        match fault {
            Some(fault) => {
                fault.remaining -= 1;
                Err(io::Error::from_raw_os_error(fault.errno))
            }
            None => Ok(()),
        }
    }

    fn einval() -> io::Error {
        io::Error::from_raw_os_error(libc::EINVAL)
    }

    fn buffer_length(&self) -> u32 {
        self.format.width * self.format.height * 2
    }
}

impl VideoDevice for MockDevice {
    type Mapping = MockMapping;

    fn query_caps(&self) -> io::Result<DeviceCapabilities> {
        self.check(MockOp::QueryCaps)?;
        Ok(self.capabilities.clone())
    }

    fn enum_format(&self, index: u32) -> io::Result<FormatDescriptor> {
        self.check(MockOp::EnumFormat)?;
        let format = self.formats.get(index as usize).ok_or_else(Self::einval)?;
        Ok(FormatDescriptor {
            index,
            fourcc: format.fourcc,
            description: format.description.clone(),
        })
    }

    fn enum_frame_size(&self, fourcc: FourCC, index: u32) -> io::Result<FrameSize> {
        self.check(MockOp::EnumFrameSize)?;
        self.formats
            .iter()
            .find(|format| format.fourcc == fourcc)
            .and_then(|format| format.sizes.get(index as usize))
            .map(|(size, _)| *size)
            .ok_or_else(Self::einval)
    }

    fn enum_frame_interval(
        &self,
        fourcc: FourCC,
        resolution: Resolution,
        index: u32,
    ) -> io::Result<FrameIntervalEntry> {
        self.check(MockOp::EnumFrameInterval)?;
        self.formats
            .iter()
            .find(|format| format.fourcc == fourcc)
            .and_then(|format| {
                format
                    .sizes
                    .iter()
                    .find(|(size, _)| size.as_discrete() == Some(resolution))
            })
            .and_then(|(_, intervals)| intervals.get(index as usize))
            .copied()
            .ok_or_else(Self::einval)
    }

    fn format(&self) -> io::Result<PixFormat> {
        self.check(MockOp::GetFormat)?;
        Ok(self.format)
    }

    fn set_format(&mut self, format: &PixFormat) -> io::Result<()> {
        self.check(MockOp::SetFormat)?;
        if self.buffer_count > 0 {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        self.format = self.substitute.unwrap_or(*format);
        Ok(())
    }

    fn set_frame_interval(&mut self, interval: FrameInterval) -> io::Result<()> {
        self.check(MockOp::SetInterval)?;
        if self.streaming {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        self.interval = interval;
        self.log.borrow_mut().intervals.push(interval);
        Ok(())
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        self.check(MockOp::ReqBufs)?;
        if self.streaming {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        self.queue.clear();
        self.buffer_count = count.min(self.max_buffers);
        self.log.borrow_mut().buffer_requests.push(count);
        Ok(self.buffer_count)
    }

    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo> {
        self.check(MockOp::QueryBuf)?;
        if index >= self.buffer_count {
            return Err(Self::einval());
        }
        let length = self.buffer_length();
        Ok(BufferInfo {
            index,
            length,
            offset: index * length,
        })
    }

    fn map_buffer(&self, info: &BufferInfo) -> io::Result<Self::Mapping> {
        self.check(MockOp::Mmap)?;
        self.log.borrow_mut().mapped += 1;
        Ok(MockMapping {
            index: info.index,
            len: info.length as usize,
            log: Rc::clone(&self.log),
        })
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        self.check(MockOp::Qbuf)?;
        if index >= self.buffer_count || self.queue.contains(&index) {
            return Err(Self::einval());
        }
        self.queue.push_back(index);
        *self.log.borrow_mut().queued.entry(index).or_insert(0) += 1;
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> io::Result<u32> {
        self.check(MockOp::Dqbuf)?;
        if !self.streaming {
            return Err(Self::einval());
        }

        let position = usize::from(self.reorder && self.queue.len() > 1);
        let index = self
            .queue
            .remove(position)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EAGAIN))?;

        if let Some(clock) = &self.clock {
            let period = f64::from(self.interval.numerator) / f64::from(self.interval.denominator);
            clock.advance(Duration::from_secs_f64(period));
        }
        self.log.borrow_mut().dequeued += 1;
        Ok(index)
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.check(MockOp::StreamOn)?;
        if self.buffer_count == 0 {
            return Err(Self::einval());
        }
        self.streaming = true;
        self.log.borrow_mut().stream_on += 1;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.check(MockOp::StreamOff)?;
        self.streaming = false;
        self.queue.clear();
        self.log.borrow_mut().stream_off += 1;
        Ok(())
    }
}

/// Provider over a fixed list of mock nodes. Each device can be opened once.
#[derive(Default)]
pub struct MockProvider {
    nodes: Vec<PathBuf>,
    devices: RefCell<HashMap<PathBuf, MockDevice>>,
    opened: RefCell<Vec<PathBuf>>,
}

impl MockProvider {
    /// An empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; `None` makes opening it fail with `EACCES`.
    #[must_use]
    pub fn with_node(mut self, path: &str, device: Option<MockDevice>) -> Self {
        let path = PathBuf::from(path);
        if let Some(device) = device {
            self.devices.get_mut().insert(path.clone(), device);
        }
        self.nodes.push(path);
        self
    }

    /// Nodes opened so far, in order.
    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.borrow().clone()
    }
}

impl DeviceProvider for MockProvider {
    type Device = MockDevice;

    fn candidates(&self) -> io::Result<Vec<PathBuf>> {
        Ok(self.nodes.clone())
    }

    fn open(&self, path: &Path) -> io::Result<MockDevice> {
        self.opened.borrow_mut().push(path.to_path_buf());
        self.devices
            .borrow_mut()
            .remove(path)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EACCES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        let caps = device.query_caps().expect("query_caps should succeed");
        assert_eq!(caps.driver, "mock");
        assert!(caps.can_capture);
        assert!(caps.can_stream);
    }

    #[test]
    fn test_mock_enumeration_ends_with_einval() {
        let device = MockDevice::new();
        assert!(device.enum_format(0).is_ok());
        let err = device.enum_format(1).expect_err("index 1 is out of range");
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }

    #[test]
    fn test_mock_dequeue_is_fifo_and_non_blocking() {
        let mut device = MockDevice::new();
        device.request_buffers(3).expect("request_buffers should succeed");
        for index in 0..3 {
            device.queue_buffer(index).expect("queue_buffer should succeed");
        }
        device.stream_on().expect("stream_on should succeed");

        assert_eq!(device.dequeue_buffer().expect("dequeue"), 0);
        assert_eq!(device.dequeue_buffer().expect("dequeue"), 1);
        assert_eq!(device.dequeue_buffer().expect("dequeue"), 2);
        let err = device.dequeue_buffer().expect_err("queue is empty");
        assert_eq!(err.raw_os_error(), Some(libc::EAGAIN));
    }

    #[test]
    fn test_mock_faults_fire_after_count() {
        let device = MockDevice::new().fail(MockOp::QueryCaps, libc::EBUSY, 1, 2);
        assert!(device.query_caps().is_ok());
        assert!(device.query_caps().is_err());
        assert!(device.query_caps().is_err());
        assert!(device.query_caps().is_ok());
        assert_eq!(device.calls(MockOp::QueryCaps), 4);
    }

    #[test]
    fn test_mock_clock_advances_per_frame() {
        let clock = Rc::new(ManualClock::new());
        let start = clock.now();
        let mut device = MockDevice::new().with_clock(Rc::clone(&clock));
        device
            .set_frame_interval(FrameInterval::from_fps(20))
            .expect("set_frame_interval should succeed");
        device.request_buffers(1).expect("request_buffers should succeed");
        device.queue_buffer(0).expect("queue_buffer should succeed");
        device.stream_on().expect("stream_on should succeed");
        device.dequeue_buffer().expect("dequeue should succeed");

        assert_eq!(clock.now() - start, Duration::from_millis(50));
    }
}
