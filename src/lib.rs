//! Cam-FPS-Bench: frame-rate benchmark for V4L2 capture devices
//!
//! This library finds a capture device by card name, enumerates every advertised
//! (pixel format, resolution, frame interval) combination, streams each one through
//! memory-mapped buffers for a fixed window and checks the achieved frame rate
//! against the advertised one. Device access sits behind the [`VideoDevice`] trait so
//! the whole pipeline runs against mock devices in tests.

pub mod bench;
pub mod capability;
pub mod config;
pub mod device;
pub mod error;
pub mod measure;
pub mod retry;
pub mod selector;
pub mod stream;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use bench::{run, run_benchmark, FpsBackend, StreamingBackend};
pub use capability::{CapabilityEnumerator, CapabilityTree, TestCase};
pub use config::{BenchConfig, SubstitutionPolicy};
pub use device::{V4l2Device, V4l2Provider};
pub use error::{BenchError, Result};
pub use traits::{
    DeviceCapabilities, DeviceProvider, FourCC, FrameInterval, PixFormat, Resolution,
    VideoDevice,
};
pub use validation::{FpsResult, FpsValidator};
