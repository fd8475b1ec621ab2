//! Tolerance check of achieved frame rates against advertised ones.

use log::error;
use serde::Serialize;

/// Default allowed relative deviation (15 percent).
pub const DEFAULT_TOLERANCE: f64 = 0.15;

/// Outcome of measuring one (format, resolution, interval) combination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FpsResult {
    /// Advertised frame rate, rounded to whole frames.
    pub expected_fps: u32,
    /// Achieved frame rate.
    pub actual_fps: f64,
}

impl FpsResult {
    /// Whether the achieved rate is within `tolerance` of the advertised one.
    pub fn within(&self, tolerance: f64) -> bool {
        let expected = f64::from(self.expected_fps);
        let max_diff = expected * tolerance;
        (expected - self.actual_fps).abs() <= max_diff
    }
}

/// Compares measured results against a tolerance ratio.
#[derive(Debug, Clone, Copy)]
pub struct FpsValidator {
    tolerance: f64,
}

impl Default for FpsValidator {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl FpsValidator {
    /// Validator with the given relative tolerance.
    pub const fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Results outside the tolerance, in input order.
    pub fn failures<'a>(&self, results: &'a [FpsResult]) -> Vec<&'a FpsResult> {
        results
            .iter()
            .filter(|result| !result.within(self.tolerance))
            .collect()
    }

    /// Whether every result is within tolerance. Each failure is logged.
    pub fn validate(&self, results: &[FpsResult]) -> bool {
        let failures = self.failures(results);
        for result in &failures {
            error!(
                "FPS is out of tolerance range! Tested: {} Actual FPS: {:.2}",
                result.expected_fps, result.actual_fps
            );
        }
        failures.is_empty()
    }

    /// Verdict for a whole run: an empty result list is a failure.
    pub fn accept_run(&self, results: &[FpsResult]) -> bool {
        if results.is_empty() {
            error!("No frame rates were measured");
            return false;
        }
        self.validate(results)
    }
}
