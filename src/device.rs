//! V4L2 device implementation using the v4l crate.
//!
//! Capability queries, formats and stream parameters go through `v4l`'s safe API.
//! The index-based enumerations and buffer requests are issued one ioctl at a time
//! through `v4l::v4l2`, because the benchmark needs to see every individual errno
//! (busy, no frame yet, end of enumeration) rather than the collected results. Only
//! the functions issuing those calls allow `unsafe`.

use std::convert::TryFrom;
use std::fs;
use std::io;
use std::mem;
use std::os::raw::{c_int, c_void};
use std::path::{Path, PathBuf};
use std::ptr;

use log::warn;
use v4l::format::Description;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::v4l2;
use v4l::v4l_sys::{
    v4l2_buffer, v4l2_fmtdesc, v4l2_frmivalenum, v4l2_frmsizeenum, v4l2_requestbuffers,
};
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Fraction};

use crate::traits::{
    BufferInfo, DeviceCapabilities, DeviceProvider, FormatDescriptor, FourCC, FrameInterval,
    FrameIntervalEntry, FrameIntervalKind, FrameSize, FrameSizeKind, MappedBuffer, PixFormat,
    Resolution, VideoDevice,
};

const BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
const MEMORY_MMAP: u32 = 1;

// Shared by V4L2_FRMSIZE_TYPE_* and V4L2_FRMIVAL_TYPE_*
const ENUM_TYPE_DISCRETE: u32 = 1;
const ENUM_TYPE_CONTINUOUS: u32 = 2;

/// Issue one ioctl with a request struct living in a local variable.
macro_rules! ioctl {
    ($fd:expr, $request:ident, $arg:expr) => {
        // SAFETY: `$arg` is the zero-initialised request struct `$request` expects and
        // stays alive for the duration of the call.
        unsafe {
            v4l2::ioctl(
                $fd,
                v4l2::vidioc::$request,
                ptr::addr_of_mut!($arg).cast::<c_void>(),
            )
        }
    };
}

#[allow(unsafe_code)]
fn zeroed<T>() -> T {
    // SAFETY: only used for the plain-data kernel request structs, for which all-zero
    // bytes is the documented initial state.
    unsafe { mem::zeroed() }
}

#[allow(clippy::needless_pass_by_value)]
fn invalid_data(err: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

const fn enum_size_kind(kind: u32) -> FrameSizeKind {
    match kind {
        ENUM_TYPE_DISCRETE => FrameSizeKind::Discrete,
        ENUM_TYPE_CONTINUOUS => FrameSizeKind::Continuous,
        _ => FrameSizeKind::Stepwise,
    }
}

const fn enum_interval_kind(kind: u32) -> FrameIntervalKind {
    match kind {
        ENUM_TYPE_DISCRETE => FrameIntervalKind::Discrete,
        ENUM_TYPE_CONTINUOUS => FrameIntervalKind::Continuous,
        _ => FrameIntervalKind::Stepwise,
    }
}

/// A capture buffer mapped read-only into the process.
#[derive(Debug)]
pub struct V4l2Mapping {
    ptr: *mut c_void,
    len: usize,
}

impl MappedBuffer for V4l2Mapping {
    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for V4l2Mapping {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` come from a successful mmap and are unmapped only here.
        if let Err(err) = unsafe { v4l2::munmap(self.ptr, self.len) } {
            warn!("Failed to unmap capture buffer: {err}");
        }
    }
}

/// V4L2 device opened non-blocking.
pub struct V4l2Device {
    device: Device,
    path: PathBuf,
}

impl V4l2Device {
    /// Open a V4L2 device node (e.g., `/dev/video0`).
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let device = Device::with_path(&path)?;
        Ok(Self { device, path })
    }

    /// Node this device was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> c_int {
        self.device.handle().fd()
    }

    fn capture_buffer(index: u32) -> v4l2_buffer {
        let mut buf: v4l2_buffer = zeroed();
        buf.index = index;
        buf.type_ = BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = MEMORY_MMAP;
        buf
    }
}

impl VideoDevice for V4l2Device {
    type Mapping = V4l2Mapping;

    fn query_caps(&self) -> io::Result<DeviceCapabilities> {
        let caps = self.device.query_caps()?;

        Ok(DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        })
    }

    #[allow(unsafe_code)]
    fn enum_format(&self, index: u32) -> io::Result<FormatDescriptor> {
        let mut desc: v4l2_fmtdesc = zeroed();
        desc.index = index;
        desc.type_ = BUF_TYPE_VIDEO_CAPTURE;
        ioctl!(self.fd(), VIDIOC_ENUM_FMT, desc)?;

        let desc = Description::from(desc);
        Ok(FormatDescriptor {
            index,
            fourcc: FourCC::from(desc.fourcc),
            description: desc.description,
        })
    }

    #[allow(unsafe_code)]
    fn enum_frame_size(&self, fourcc: FourCC, index: u32) -> io::Result<FrameSize> {
        let mut size: v4l2_frmsizeenum = zeroed();
        size.index = index;
        size.pixel_format = fourcc.to_u32();
        ioctl!(self.fd(), VIDIOC_ENUM_FRAMESIZES, size)?;

        let kind = enum_size_kind(size.type_);
        let min = match FrameSizeEnum::try_from(size).map_err(invalid_data)? {
            FrameSizeEnum::Discrete(discrete) => Resolution::new(discrete.width, discrete.height),
            FrameSizeEnum::Stepwise(stepwise) => {
                Resolution::new(stepwise.min_width, stepwise.min_height)
            }
        };

        Ok(FrameSize { kind, min })
    }

    #[allow(unsafe_code)]
    fn enum_frame_interval(
        &self,
        fourcc: FourCC,
        resolution: Resolution,
        index: u32,
    ) -> io::Result<FrameIntervalEntry> {
        let mut ival: v4l2_frmivalenum = zeroed();
        ival.index = index;
        ival.pixel_format = fourcc.to_u32();
        ival.width = resolution.width;
        ival.height = resolution.height;
        ioctl!(self.fd(), VIDIOC_ENUM_FRAMEINTERVALS, ival)?;

        let kind = enum_interval_kind(ival.type_);
        let min = match FrameIntervalEnum::try_from(ival).map_err(invalid_data)? {
            FrameIntervalEnum::Discrete(fraction) => fraction,
            FrameIntervalEnum::Stepwise(stepwise) => stepwise.min,
        };

        Ok(FrameIntervalEntry {
            kind,
            min: FrameInterval::new(min.numerator, min.denominator),
        })
    }

    fn format(&self) -> io::Result<PixFormat> {
        let fmt = self.device.format()?;

        Ok(PixFormat {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
        })
    }

    fn set_format(&mut self, format: &PixFormat) -> io::Result<()> {
        let mut fmt = self.device.format()?;
        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();

        self.device.set_format(&fmt)?;
        Ok(())
    }

    fn set_frame_interval(&mut self, interval: FrameInterval) -> io::Result<()> {
        let params = Parameters::new(Fraction::new(interval.numerator, interval.denominator));
        self.device.set_params(&params)?;
        Ok(())
    }

    #[allow(unsafe_code)]
    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let mut req: v4l2_requestbuffers = zeroed();
        req.count = count;
        req.type_ = BUF_TYPE_VIDEO_CAPTURE;
        req.memory = MEMORY_MMAP;
        ioctl!(self.fd(), VIDIOC_REQBUFS, req)?;
        Ok(req.count)
    }

    #[allow(unsafe_code)]
    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo> {
        let mut buf = Self::capture_buffer(index);
        ioctl!(self.fd(), VIDIOC_QUERYBUF, buf)?;

        Ok(BufferInfo {
            index,
            length: buf.length,
            // SAFETY: MMAP buffers report their location in `offset`.
            offset: unsafe { buf.m.offset },
        })
    }

    #[allow(unsafe_code)]
    fn map_buffer(&self, info: &BufferInfo) -> io::Result<Self::Mapping> {
        let len = info.length as usize;

        // SAFETY: maps the region the driver reported for this buffer; the mapping is
        // released exactly once by `V4l2Mapping::drop`.
        #[allow(clippy::cast_possible_wrap)]
        let ptr = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                self.fd(),
                info.offset as libc::off_t,
            )
        }?;

        Ok(V4l2Mapping { ptr, len })
    }

    #[allow(unsafe_code)]
    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut buf = Self::capture_buffer(index);
        ioctl!(self.fd(), VIDIOC_QBUF, buf)
    }

    #[allow(unsafe_code)]
    fn dequeue_buffer(&mut self) -> io::Result<u32> {
        let mut buf = Self::capture_buffer(0);
        ioctl!(self.fd(), VIDIOC_DQBUF, buf)?;
        Ok(buf.index)
    }

    #[allow(unsafe_code)]
    fn stream_on(&mut self) -> io::Result<()> {
        let mut buf_type = BUF_TYPE_VIDEO_CAPTURE;
        ioctl!(self.fd(), VIDIOC_STREAMON, buf_type)
    }

    #[allow(unsafe_code)]
    fn stream_off(&mut self) -> io::Result<()> {
        let mut buf_type = BUF_TYPE_VIDEO_CAPTURE;
        ioctl!(self.fd(), VIDIOC_STREAMOFF, buf_type)
    }
}

/// Candidate V4L2 nodes in a device directory, e.g. `/dev/video*`.
#[derive(Debug, Clone)]
pub struct V4l2Provider {
    dir: PathBuf,
    prefix: String,
}

impl Default for V4l2Provider {
    fn default() -> Self {
        Self::new("/dev", "video")
    }
}

impl V4l2Provider {
    /// Nodes in `dir` named `prefix` followed by a number.
    pub fn new<P: AsRef<Path>>(dir: P, prefix: &str) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            prefix: prefix.to_owned(),
        }
    }
}

impl DeviceProvider for V4l2Provider {
    type Device = V4l2Device;

    /// Matching nodes ordered by their number.
    fn candidates(&self) -> io::Result<Vec<PathBuf>> {
        let mut nodes: Vec<(u32, PathBuf)> = fs::read_dir(&self.dir)?
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let number = name.to_str()?.strip_prefix(&self.prefix)?.parse().ok()?;
                Some((number, entry.path()))
            })
            .collect();
        nodes.sort_by_key(|(number, _)| *number);

        Ok(nodes.into_iter().map(|(_, path)| path).collect())
    }

    fn open(&self, path: &Path) -> io::Result<V4l2Device> {
        V4l2Device::open(path)
    }
}
