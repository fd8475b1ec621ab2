//! Discovery of the capture device under test.

use std::path::PathBuf;

use log::{debug, info, warn};

use crate::capability::CapabilityEnumerator;
use crate::retry::{RetryingClient, Transient};
use crate::traits::{DeviceCapabilities, DeviceProvider};

/// An opened device that passed selection.
///
/// The handle stays open for the whole run so a re-enumeration of device nodes
/// cannot swap the physical device mid-benchmark.
pub struct SelectedDevice<D> {
    /// Node the device was opened from.
    pub path: PathBuf,
    /// Open device handle.
    pub device: D,
    /// Capabilities reported at selection time.
    pub capabilities: DeviceCapabilities,
}

/// Picks the first candidate whose name matches and which can enumerate capture formats.
#[derive(Debug, Clone)]
pub struct DeviceSelector {
    name: String,
    retry: RetryingClient,
}

impl DeviceSelector {
    /// Select devices whose card name contains `name`, ignoring case.
    pub fn new(name: &str, retry: RetryingClient) -> Self {
        Self {
            name: name.to_lowercase(),
            retry,
        }
    }

    /// Whether reported capabilities identify a capture device with the target name.
    pub fn accepts(&self, capabilities: &DeviceCapabilities) -> bool {
        capabilities.can_capture && capabilities.card.to_lowercase().contains(&self.name)
    }

    /// Scan `provider`'s candidates in order and return the first that qualifies.
    ///
    /// `None` means no candidate qualified; that is not an error.
    pub fn select<P: DeviceProvider>(&self, provider: &P) -> Option<SelectedDevice<P::Device>> {
        let candidates = match provider.candidates() {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!("Failed to list capture devices: {err}");
                return None;
            }
        };

        candidates
            .into_iter()
            .find_map(|path| self.inspect(provider, path))
    }

    fn inspect<P: DeviceProvider>(
        &self,
        provider: &P,
        path: PathBuf,
    ) -> Option<SelectedDevice<P::Device>> {
        let device = match provider.open(&path) {
            Ok(device) => device,
            Err(err) => {
                debug!("Skipping {}: {err}", path.display());
                return None;
            }
        };

        let capabilities = match self
            .retry
            .call("VIDIOC_QUERYCAP", Transient::Busy, || device.query_caps())
        {
            Ok(capabilities) => capabilities,
            Err(err) => {
                debug!("Skipping {}: {err}", path.display());
                return None;
            }
        };

        if !self.accepts(&capabilities) {
            debug!(
                "Skipping {}: {:?} is not a capture device named {:?}",
                path.display(),
                capabilities.card,
                self.name
            );
            return None;
        }

        if !CapabilityEnumerator::new(&device, self.retry).supports_enumeration() {
            debug!("Skipping {}: no capture formats", path.display());
            return None;
        }

        info!("Selected {} ({})", path.display(), capabilities.card);
        Some(SelectedDevice {
            path,
            device,
            capabilities,
        })
    }
}
