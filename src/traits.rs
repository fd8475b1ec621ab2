//! Core traits and types for the capture-device abstraction.
//!
//! [`VideoDevice`] is the seam between the benchmark and the kernel: every method
//! maps to exactly one device-control request and returns the raw [`io::Result`],
//! so the OS error code stays available for retry and enumeration decisions.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// Build a `FourCC` from the little-endian integer the kernel reports.
    #[must_use]
    pub const fn from_u32(code: u32) -> Self {
        Self(code.to_le_bytes())
    }

    /// The little-endian integer form used in kernel request structs.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// NV12 pixel format (4:2:0 semi-planar).
    pub const NV12: Self = Self::new(b"NV12");
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{}", char::from(byte))?;
        }
        Ok(())
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// One entry of the device's pixel-format enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatDescriptor {
    /// Enumeration index the entry was reported at.
    pub index: u32,
    /// Pixel format code.
    pub fourcc: FourCC,
    /// Human-readable description from the driver.
    pub description: String,
}

/// A fixed frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Resolution {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl Resolution {
    /// Create a new resolution.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Kind of a frame-size enumeration entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSizeKind {
    /// A single width/height pair.
    Discrete,
    /// A range with a fixed step.
    Stepwise,
    /// A range with step 1.
    Continuous,
}

/// One entry of the frame-size enumeration.
///
/// For stepwise and continuous entries `min` is the lower bound of the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    /// Entry kind.
    pub kind: FrameSizeKind,
    /// Discrete size, or the range minimum.
    pub min: Resolution,
}

impl FrameSize {
    /// A discrete frame size.
    #[must_use]
    pub const fn discrete(width: u32, height: u32) -> Self {
        Self {
            kind: FrameSizeKind::Discrete,
            min: Resolution::new(width, height),
        }
    }

    /// The resolution, if this entry is a single fixed size.
    #[must_use]
    pub fn as_discrete(&self) -> Option<Resolution> {
        (self.kind == FrameSizeKind::Discrete).then_some(self.min)
    }
}

/// Frame period as a fraction of a second; the rate is `denominator / numerator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FrameInterval {
    /// Numerator of the frame period.
    pub numerator: u32,
    /// Denominator of the frame period.
    pub denominator: u32,
}

impl FrameInterval {
    /// Create a new frame interval.
    #[must_use]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Interval for a whole number of frames per second.
    #[must_use]
    pub const fn from_fps(fps: u32) -> Self {
        Self::new(1, fps)
    }

    /// Frame rate in frames per second; zero for a degenerate interval.
    #[must_use]
    pub fn fps(&self) -> f64 {
        if self.numerator == 0 {
            return 0.0;
        }
        f64::from(self.denominator) / f64::from(self.numerator)
    }

    /// Frame rate rounded to the nearest whole frame.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn expected_fps(&self) -> u32 {
        self.fps().round() as u32
    }
}

impl fmt::Display for FrameInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Kind of a frame-interval enumeration entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameIntervalKind {
    /// A single interval.
    Discrete,
    /// A range with a fixed step.
    Stepwise,
    /// A range with arbitrary granularity.
    Continuous,
}

/// One entry of the frame-interval enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameIntervalEntry {
    /// Entry kind.
    pub kind: FrameIntervalKind,
    /// Discrete interval, or the range minimum.
    pub min: FrameInterval,
}

impl FrameIntervalEntry {
    /// A discrete interval entry.
    #[must_use]
    pub const fn discrete(interval: FrameInterval) -> Self {
        Self {
            kind: FrameIntervalKind::Discrete,
            min: interval,
        }
    }
}

/// Capture format applied to (or read back from) the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
}

impl PixFormat {
    /// Create a new format specification.
    #[must_use]
    pub const fn new(fourcc: FourCC, resolution: Resolution) -> Self {
        Self {
            width: resolution.width,
            height: resolution.height,
            fourcc,
        }
    }

    /// The frame size part of the format.
    #[must_use]
    pub const fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

impl fmt::Display for PixFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.fourcc, self.width, self.height)
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Location of a device-allocated buffer, as reported by the buffer query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Pool index.
    pub index: u32,
    /// Length of the buffer in bytes.
    pub length: u32,
    /// Offset to pass to the memory mapping.
    pub offset: u32,
}

/// A device buffer mapped into the process. Dropping it unmaps the region.
pub trait MappedBuffer {
    /// Length of the mapped region in bytes.
    fn len(&self) -> usize;

    /// Whether the mapped region is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Abstraction over the device-control requests the benchmark issues.
pub trait VideoDevice {
    /// Mapped buffer type returned by [`VideoDevice::map_buffer`].
    type Mapping: MappedBuffer;

    /// Query driver name, card name and capability flags.
    fn query_caps(&self) -> io::Result<DeviceCapabilities>;

    /// Pixel format at `index`; `EINVAL` past the last entry.
    fn enum_format(&self, index: u32) -> io::Result<FormatDescriptor>;

    /// Frame size at `index` for `fourcc`; `EINVAL` past the last entry.
    fn enum_frame_size(&self, fourcc: FourCC, index: u32) -> io::Result<FrameSize>;

    /// Frame interval at `index` for a format and size; `EINVAL` past the last entry.
    fn enum_frame_interval(
        &self,
        fourcc: FourCC,
        resolution: Resolution,
        index: u32,
    ) -> io::Result<FrameIntervalEntry>;

    /// Get current capture format.
    fn format(&self) -> io::Result<PixFormat>;

    /// Set capture format.
    fn set_format(&mut self, format: &PixFormat) -> io::Result<()>;

    /// Set the capture frame period.
    fn set_frame_interval(&mut self, interval: FrameInterval) -> io::Result<()>;

    /// Request `count` memory-mapped capture buffers; returns the count granted.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// Query length and offset of buffer `index`.
    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo>;

    /// Map a queried buffer read-only into the process.
    fn map_buffer(&self, info: &BufferInfo) -> io::Result<Self::Mapping>;

    /// Hand buffer `index` to the capture pipeline.
    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    /// Take a filled buffer back; returns the index the device reports.
    fn dequeue_buffer(&mut self) -> io::Result<u32>;

    /// Start capturing.
    fn stream_on(&mut self) -> io::Result<()>;

    /// Stop capturing and return all buffers to the process.
    fn stream_off(&mut self) -> io::Result<()>;
}

/// Source of candidate capture devices.
pub trait DeviceProvider {
    /// Device type opened by this provider.
    type Device: VideoDevice;

    /// Candidate device nodes in platform enumeration order.
    fn candidates(&self) -> io::Result<Vec<PathBuf>>;

    /// Open a candidate non-blocking.
    fn open(&self, path: &Path) -> io::Result<Self::Device>;
}
