use std::time::Duration;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error kinds surfaced by the engine.
///
/// Subsystems recover transient faults locally (restart, re-probe) and only
/// return these for conditions the caller has to act on. The web layer maps
/// each kind to a structured response body.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("no signal on camera '{0}'")]
    NoSignal(String),

    #[error("failed to build pipeline '{name}': {reason}")]
    PipelineConstruction { name: String, reason: String },

    #[error("pipeline '{name}' failed at runtime: {reason}")]
    PipelineRuntime { name: String, reason: String },

    #[error("resource contention: {0}")]
    ResourceContention(String),

    #[error("insufficient disk space: {free} bytes free, {required} required")]
    DiskExhausted { free: u64, required: u64 },

    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown {kind} '{id}'")]
    UnknownId { kind: &'static str, id: String },

    #[error("scene references unavailable sources: {}", missing.join(", "))]
    SourcesUnavailable { missing: Vec<String> },

    #[error("media server request failed: {0}")]
    MediaServer(String),

    #[error("external service '{unit}' failed: {reason}")]
    ExternalService { unit: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short machine-readable tag for structured API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ConfigInvalid(_) => "config_invalid",
            Error::DeviceUnavailable(_) => "device_unavailable",
            Error::NoSignal(_) => "no_signal",
            Error::PipelineConstruction { .. } => "pipeline_construction",
            Error::PipelineRuntime { .. } => "pipeline_runtime",
            Error::ResourceContention(_) => "resource_contention",
            Error::DiskExhausted { .. } => "disk_exhausted",
            Error::Timeout(..) => "timeout",
            Error::InvalidRequest(_) => "invalid_request",
            Error::UnknownId { .. } => "unknown_id",
            Error::SourcesUnavailable { .. } => "sources_unavailable",
            Error::MediaServer(_) => "media_server",
            Error::ExternalService { .. } => "external_service",
            Error::Io(_) => "io",
        }
    }

    pub fn pipeline_construction(name: impl Into<String>, reason: impl ToString) -> Self {
        Error::PipelineConstruction {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn pipeline_runtime(name: impl Into<String>, reason: impl ToString) -> Self {
        Error::PipelineRuntime {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<glib::Error> for Error {
    fn from(e: glib::Error) -> Self {
        Error::PipelineConstruction {
            name: "unnamed".into(),
            reason: e.to_string(),
        }
    }
}

impl From<glib::BoolError> for Error {
    fn from(e: glib::BoolError) -> Self {
        Error::PipelineConstruction {
            name: "unnamed".into(),
            reason: e.to_string(),
        }
    }
}

impl From<gstreamer::StateChangeError> for Error {
    fn from(e: gstreamer::StateChangeError) -> Self {
        Error::PipelineRuntime {
            name: "unnamed".into(),
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(Error::NoSignal("cam0".into()).kind(), "no_signal");
        assert_eq!(
            Error::DiskExhausted { free: 1, required: 2 }.kind(),
            "disk_exhausted"
        );
        assert_eq!(
            Error::SourcesUnavailable { missing: vec!["cam1".into()] }.kind(),
            "sources_unavailable"
        );
    }

    #[test]
    fn sources_unavailable_names_all_missing() {
        let e = Error::SourcesUnavailable {
            missing: vec!["cam1".into(), "slides".into()],
        };
        let msg = e.to_string();
        assert!(msg.contains("cam1"));
        assert!(msg.contains("slides"));
    }
}
