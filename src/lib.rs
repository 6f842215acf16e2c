//! Multi-camera ingest, mixing and distribution engine for Rockchip
//! RK3588-class devices.
//!
//! Capture devices are owned exclusively by the [`ingest`] supervisor, which
//! publishes hardware-encoded streams to a local media server. Everything
//! else (recording, the live [`mixer`], remote viewers) subscribes to those
//! published streams and never touches a device. The [`mode`] manager
//! arbitrates between operating modes that share the capture hardware.

pub mod config;
pub mod error;
pub mod graphics;
pub mod ingest;
pub mod media;
pub mod mixer;
pub mod mode;
pub mod recording;
pub mod web;

pub use config::Config;
pub use error::{Error, Result};

/// Platform flags threaded through pipeline construction.
///
/// Test mode swaps hardware capture and encoding for `videotestsrc` +
/// software encoders so the whole control plane runs on a dev machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct Platform {
    pub test_mode: bool,
}
