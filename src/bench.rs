//! Benchmark driver: select the device, enumerate it, measure every combination.

use log::{error, info, warn};

use crate::capability::{CapabilityEnumerator, CapabilityTree, TestCase};
use crate::config::{BenchConfig, SubstitutionPolicy};
use crate::error::{BenchError, Result};
use crate::measure::{Clock, FpsMeasurer, SystemClock};
use crate::retry::RetryingClient;
use crate::selector::DeviceSelector;
use crate::stream::StreamingSession;
use crate::traits::{DeviceProvider, PixFormat, VideoDevice};
use crate::validation::FpsResult;

/// The two calls every capture backend provides to the benchmark.
pub trait FpsBackend {
    /// Formats, resolutions and frame intervals the device advertises.
    fn enumerate_capabilities(&mut self) -> Result<CapabilityTree>;

    /// Measure one combination. `None` means the combination was skipped.
    fn measure_fps(&mut self, case: &TestCase) -> Result<Option<FpsResult>>;
}

/// Backend driving a [`VideoDevice`] through memory-mapped streaming.
pub struct StreamingBackend<D, C = SystemClock> {
    device: D,
    retry: RetryingClient,
    measurer: FpsMeasurer<C>,
    on_substitution: SubstitutionPolicy,
}

impl<D: VideoDevice> StreamingBackend<D> {
    /// Backend on the system clock, configured from `config`.
    pub fn new(device: D, config: &BenchConfig) -> Self {
        Self::with_clock(device, config, SystemClock)
    }
}

impl<D: VideoDevice, C: Clock> StreamingBackend<D, C> {
    /// Backend on a custom clock.
    pub fn with_clock(device: D, config: &BenchConfig, clock: C) -> Self {
        Self {
            device,
            retry: RetryingClient::new(config.retry.policy()),
            measurer: FpsMeasurer::with_clock(clock, config.test_duration(), config.buffer_count),
            on_substitution: config.on_substitution,
        }
    }

    /// The underlying device.
    pub const fn device(&self) -> &D {
        &self.device
    }
}

impl<D: VideoDevice, C: Clock> FpsBackend for StreamingBackend<D, C> {
    fn enumerate_capabilities(&mut self) -> Result<CapabilityTree> {
        CapabilityEnumerator::new(&self.device, self.retry).enumerate()
    }

    fn measure_fps(&mut self, case: &TestCase) -> Result<Option<FpsResult>> {
        let mut session = StreamingSession::new(&mut self.device, self.retry);
        let outcome = measure_case(&self.measurer, self.on_substitution, &mut session, case);

        match (outcome, session.stop()) {
            (Ok(result), Ok(())) => Ok(result),
            (Ok(_), Err(teardown)) => Err(teardown),
            (Err(err), Err(teardown)) => {
                warn!("Teardown after failed measurement also failed: {teardown}");
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
        }
    }
}

fn measure_case<D: VideoDevice, C: Clock>(
    measurer: &FpsMeasurer<C>,
    on_substitution: SubstitutionPolicy,
    session: &mut StreamingSession<'_, D>,
    case: &TestCase,
) -> Result<Option<FpsResult>> {
    let requested = PixFormat::new(case.format.fourcc, case.resolution);
    let applied = session.configure(&requested)?;

    if applied != requested {
        match on_substitution {
            SubstitutionPolicy::Warn => {
                warn!("Requested {requested} but device applied {applied}; measuring anyway");
            }
            SubstitutionPolicy::Skip => {
                warn!("Requested {requested} but device applied {applied}; skipping");
                return Ok(None);
            }
            SubstitutionPolicy::Fail => {
                return Err(BenchError::ConfigurationSubstituted { requested, applied });
            }
        }
    }

    let measurement = measurer.run(session, case.interval)?;
    Ok(Some(FpsResult {
        expected_fps: case.interval.expected_fps(),
        actual_fps: measurement.actual_fps,
    }))
}

/// Measure every advertised combination in enumeration order.
///
/// The first fatal error ends the whole run. An empty capability tree yields an
/// empty result list.
pub fn run_benchmark<B: FpsBackend>(backend: &mut B) -> Result<Vec<FpsResult>> {
    let tree = backend.enumerate_capabilities()?;
    if tree.is_empty() {
        error!("Error retrieving formats and resolutions");
        return Ok(Vec::new());
    }
    info!("Device capabilities:\n{tree}");

    let mut results = Vec::new();
    for case in tree.test_cases() {
        info!("Testing {case}");
        if let Some(result) = backend.measure_fps(&case)? {
            info!(
                "Expected {} fps, measured {:.2} fps",
                result.expected_fps, result.actual_fps
            );
            results.push(result);
        }
    }

    Ok(results)
}

/// Select the device under test from `provider` and benchmark it.
///
/// Returns an empty list when no device qualifies.
pub fn run<P: DeviceProvider>(provider: &P, config: &BenchConfig) -> Result<Vec<FpsResult>> {
    let retry = RetryingClient::new(config.retry.policy());
    let Some(selected) = DeviceSelector::new(&config.device_name, retry).select(provider) else {
        error!("Supported device not found!");
        return Ok(Vec::new());
    };

    info!(
        "Benchmarking {} ({}, driver {})",
        selected.path.display(),
        selected.capabilities.card,
        selected.capabilities.driver
    );
    let mut backend = StreamingBackend::new(selected.device, config);
    run_benchmark(&mut backend)
}
