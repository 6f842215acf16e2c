//! Capture-device signal probing.
//!
//! HDMI bridge chips (LT6911 and friends) report the upstream timing through
//! the V4L2 format; a dead input collapses to zero dimensions. Every call
//! hits the device so the result always reflects current state.

use std::path::Path;
use std::time::Duration;

use tracing::debug;
use v4l::video::Capture;

/// Result of one signal probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeResult {
    pub width: u32,
    pub height: u32,
    pub has_signal: bool,
}

impl ProbeResult {
    pub const NO_SIGNAL: ProbeResult = ProbeResult { width: 0, height: 0, has_signal: false };

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Upper bound on a single device query.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Probe the current resolution and signal presence of a capture device.
///
/// Missing device, unreadable format or a hung ioctl all degrade to
/// [`ProbeResult::NO_SIGNAL`]; probing is never fatal.
pub async fn probe_signal(device: &Path) -> ProbeResult {
    let path = device.to_path_buf();
    let blocking = tokio::task::spawn_blocking(move || probe_blocking(&path));

    match tokio::time::timeout(PROBE_TIMEOUT, blocking).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            debug!(error = %join_err, "Signal probe task failed");
            ProbeResult::NO_SIGNAL
        }
        Err(_) => {
            debug!(device = %device.display(), "Signal probe timed out");
            ProbeResult::NO_SIGNAL
        }
    }
}

fn probe_blocking(device: &Path) -> ProbeResult {
    let dev = match v4l::Device::with_path(device) {
        Ok(dev) => dev,
        Err(e) => {
            debug!(device = %device.display(), error = %e, "Device open failed");
            return ProbeResult::NO_SIGNAL;
        }
    };

    match dev.format() {
        Ok(fmt) if fmt.width > 0 && fmt.height > 0 => ProbeResult {
            width: fmt.width,
            height: fmt.height,
            has_signal: true,
        },
        Ok(_) => ProbeResult::NO_SIGNAL,
        Err(e) => {
            debug!(device = %device.display(), error = %e, "Format query failed");
            ProbeResult::NO_SIGNAL
        }
    }
}

/// A probe source the ingest supervisor can be tested against.
///
/// Production uses [`V4lProber`]; tests substitute scripted results.
#[async_trait::async_trait]
pub trait SignalProber: Send + Sync {
    async fn probe(&self, device: &Path) -> ProbeResult;
}

/// Probes real V4L2 devices.
pub struct V4lProber;

#[async_trait::async_trait]
impl SignalProber for V4lProber {
    async fn probe(&self, device: &Path) -> ProbeResult {
        probe_signal(device).await
    }
}
