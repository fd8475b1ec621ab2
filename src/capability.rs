//! Capability enumeration: formats, then discrete resolutions, then frame intervals.

use std::fmt;
use std::iter::FusedIterator;

use log::debug;
use serde::Serialize;

use crate::error::Result;
use crate::retry::{RetryingClient, Transient};
use crate::traits::{
    FormatDescriptor, FourCC, FrameInterval, FrameIntervalKind, FrameSize, Resolution,
    VideoDevice,
};

/// Index-based device enumeration.
///
/// Queries index 0, 1, 2, ... and stops for good at the first "index out of range"
/// answer. Any other error is yielded once and also ends the sequence.
pub struct Enumeration<F> {
    query: F,
    next_index: u32,
    done: bool,
}

impl<F> Enumeration<F> {
    /// Start an enumeration at index 0.
    pub const fn new(query: F) -> Self {
        Self {
            query,
            next_index: 0,
            done: false,
        }
    }
}

impl<T, F> Iterator for Enumeration<F>
where
    F: FnMut(u32) -> Result<T>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match (self.query)(self.next_index) {
            Ok(entry) => {
                self.next_index += 1;
                Some(Ok(entry))
            }
            Err(err) if err.is_end_of_enumeration() => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl<T, F> FusedIterator for Enumeration<F> where F: FnMut(u32) -> Result<T> {}

/// Frame intervals advertised for one resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionCapabilities {
    /// Discrete frame size.
    pub resolution: Resolution,
    /// Intervals in device order.
    pub intervals: Vec<FrameInterval>,
}

/// Resolutions advertised for one pixel format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatCapabilities {
    /// The format entry.
    pub descriptor: FormatDescriptor,
    /// Discrete resolutions in device order.
    pub resolutions: Vec<ResolutionCapabilities>,
}

/// Everything the device advertises, in enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapabilityTree {
    /// Formats in device order.
    pub formats: Vec<FormatCapabilities>,
}

/// One (format, resolution, interval) combination to measure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// Pixel format entry.
    pub format: FormatDescriptor,
    /// Frame size.
    pub resolution: Resolution,
    /// Frame period.
    pub interval: FrameInterval,
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {} fps",
            self.format.fourcc,
            self.resolution,
            self.interval.fps()
        )
    }
}

impl CapabilityTree {
    /// Whether no format was found.
    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// All combinations, in the order they are tested.
    pub fn test_cases(&self) -> impl Iterator<Item = TestCase> + '_ {
        self.formats.iter().flat_map(|format| {
            format.resolutions.iter().flat_map(move |resolution| {
                resolution.intervals.iter().map(move |interval| TestCase {
                    format: format.descriptor.clone(),
                    resolution: resolution.resolution,
                    interval: *interval,
                })
            })
        })
    }
}

impl fmt::Display for CapabilityTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for format in &self.formats {
            let FormatDescriptor {
                fourcc,
                description,
                ..
            } = &format.descriptor;
            writeln!(f, "Format - {description} ({fourcc})")?;
            for resolution in &format.resolutions {
                writeln!(f, "-Resolution: {}", resolution.resolution)?;
                for interval in &resolution.intervals {
                    writeln!(f, "\t{description} ({fourcc}), {} fps", interval.fps())?;
                }
            }
        }
        Ok(())
    }
}

/// Walks a device's formats, resolutions and frame intervals.
pub struct CapabilityEnumerator<'d, D> {
    device: &'d D,
    retry: RetryingClient,
}

impl<'d, D: VideoDevice> CapabilityEnumerator<'d, D> {
    /// Create an enumerator over `device`.
    pub const fn new(device: &'d D, retry: RetryingClient) -> Self {
        Self { device, retry }
    }

    /// Pixel formats in device order.
    pub fn formats(&self) -> impl Iterator<Item = Result<FormatDescriptor>> + '_ {
        Enumeration::new(move |index: u32| {
            self.retry.call("VIDIOC_ENUM_FMT", Transient::Busy, || {
                self.device.enum_format(index)
            })
        })
    }

    /// Frame sizes advertised for `fourcc`, of every kind.
    pub fn frame_sizes(&self, fourcc: FourCC) -> impl Iterator<Item = Result<FrameSize>> + '_ {
        Enumeration::new(move |index: u32| {
            self.retry
                .call("VIDIOC_ENUM_FRAMESIZES", Transient::Busy, || {
                    self.device.enum_frame_size(fourcc, index)
                })
        })
    }

    /// Discrete frame intervals advertised for `fourcc` at `resolution`.
    ///
    /// Entries with a zero numerator or denominator have no frame rate and are dropped.
    pub fn frame_intervals(
        &self,
        fourcc: FourCC,
        resolution: Resolution,
    ) -> impl Iterator<Item = Result<FrameInterval>> + '_ {
        Enumeration::new(move |index: u32| {
            self.retry
                .call("VIDIOC_ENUM_FRAMEINTERVALS", Transient::Busy, || {
                    self.device.enum_frame_interval(fourcc, resolution, index)
                })
        })
        .filter_map(move |entry| match entry {
            Ok(entry) if entry.kind != FrameIntervalKind::Discrete => {
                debug!(
                    "Skipping {:?} interval range from {} for {fourcc} {resolution}",
                    entry.kind, entry.min
                );
                None
            }
            Ok(entry) if entry.min.numerator == 0 || entry.min.denominator == 0 => {
                debug!(
                    "Skipping degenerate interval {} for {fourcc} {resolution}",
                    entry.min
                );
                None
            }
            Ok(entry) => Some(Ok(entry.min)),
            Err(err) => Some(Err(err)),
        })
    }

    /// Whether the node answers format enumeration at all.
    ///
    /// Some devices expose extra nodes that report the capture capability but cannot
    /// enumerate capture formats.
    pub fn supports_enumeration(&self) -> bool {
        matches!(self.formats().next(), Some(Ok(_)))
    }

    /// Build the full capability tree.
    pub fn enumerate(&self) -> Result<CapabilityTree> {
        let mut tree = CapabilityTree::default();

        for descriptor in self.formats() {
            let descriptor = descriptor?;
            debug!(
                "Format {}: {} ({})",
                descriptor.index, descriptor.description, descriptor.fourcc
            );

            let mut resolutions = Vec::new();
            for size in self.frame_sizes(descriptor.fourcc) {
                let size = size?;
                let Some(resolution) = size.as_discrete() else {
                    debug!("Skipping {:?} frame size range from {}", size.kind, size.min);
                    continue;
                };

                let intervals = self
                    .frame_intervals(descriptor.fourcc, resolution)
                    .collect::<Result<Vec<_>>>()?;
                debug!("  {resolution}: {} intervals", intervals.len());

                resolutions.push(ResolutionCapabilities {
                    resolution,
                    intervals,
                });
            }

            tree.formats.push(FormatCapabilities {
                descriptor,
                resolutions,
            });
        }

        Ok(tree)
    }
}
