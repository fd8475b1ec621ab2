//! Benchmark configuration, loaded from TOML.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};
use crate::retry::RetryPolicy;

/// What to do when the device applies a different format than requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubstitutionPolicy {
    /// Log it and measure anyway.
    #[default]
    Warn,
    /// Log it and produce no result for the combination.
    Skip,
    /// Abort the run.
    Fail,
}

/// Retry timing for transient device errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Pause between attempts in milliseconds.
    pub quantum_ms: u64,
    /// Total wait per request in milliseconds.
    pub budget_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            quantum_ms: 10,
            budget_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// The policy these settings describe.
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            quantum: Duration::from_millis(self.quantum_ms),
            budget: Duration::from_millis(self.budget_ms),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Case-insensitive substring of the card name of the device under test.
    pub device_name: String,
    /// Directory holding the device nodes.
    pub device_dir: PathBuf,
    /// File-name prefix of candidate nodes.
    pub node_prefix: String,
    /// Measurement window per combination, in seconds.
    pub test_duration_secs: u64,
    /// Capture buffers kept in flight.
    pub buffer_count: u32,
    /// Transient-error retry timing.
    pub retry: RetryConfig,
    /// Allowed relative deviation of the achieved rate.
    pub tolerance: f64,
    /// Handling of device format substitution.
    pub on_substitution: SubstitutionPolicy,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            device_name: "android".to_owned(),
            device_dir: PathBuf::from("/dev"),
            node_prefix: "video".to_owned(),
            test_duration_secs: 10,
            buffer_count: 10,
            retry: RetryConfig::default(),
            tolerance: 0.15,
            on_substitution: SubstitutionPolicy::default(),
        }
    }
}

impl BenchConfig {
    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("cam-fps-bench.toml")
    }

    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| BenchError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from TOML file, or defaults if it does not exist.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| BenchError::Config(format!("Failed to read config file: {e}")))?;
        let config = Self::from_toml(&contents)?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Measurement window.
    pub const fn test_duration(&self) -> Duration {
        Duration::from_secs(self.test_duration_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() {
            return Err(BenchError::Config("device_name must not be empty".to_owned()));
        }
        if self.test_duration_secs == 0 {
            return Err(BenchError::Config(
                "test_duration_secs must be positive".to_owned(),
            ));
        }
        if self.buffer_count == 0 {
            return Err(BenchError::Config("buffer_count must be positive".to_owned()));
        }
        if self.retry.quantum_ms == 0 {
            return Err(BenchError::Config("retry.quantum_ms must be positive".to_owned()));
        }
        if !(0.0..=1.0).contains(&self.tolerance) {
            return Err(BenchError::Config(
                "tolerance must be between 0.0 and 1.0".to_owned(),
            ));
        }
        Ok(())
    }
}
