use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub mediamtx: MediamtxConfig,

    pub cameras: Vec<CameraSpec>,

    #[serde(default)]
    pub ingest: IngestConfig,

    pub recording: RecordingConfig,

    pub mixer: MixerConfig,

    #[serde(default)]
    pub reveal: RevealConfig,

    #[serde(default)]
    pub mode_manager: ModeManagerConfig,

    /// Reserved external trigger list, invoked on record start-all/stop-all.
    #[serde(default)]
    pub external_cameras: Vec<ExternalCamera>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Directory served at `/` for the web UI.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

/// Local media server endpoints. All traffic stays on loopback IPv4;
/// binding to the hostname form triggers address-family errors on
/// dual-stack kernels.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MediamtxConfig {
    #[serde(default = "default_mediamtx_host")]
    pub host: String,

    #[serde(default = "default_rtsp_port")]
    pub rtsp_port: u16,

    #[serde(default = "default_whep_port")]
    pub whep_port: u16,

    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Codecs the server's WebRTC distribution accepts. Ingest never emits
    /// a codec outside this set; anything else would be HLS-only.
    #[serde(default = "default_webrtc_codecs")]
    pub webrtc_codecs: Vec<Codec>,
}

impl MediamtxConfig {
    pub fn rtsp_url(&self, path: &str) -> String {
        format!("rtsp://{}:{}/{}", self.host, self.rtsp_port, path)
    }

    pub fn whep_url(&self, path: &str) -> String {
        format!("http://{}:{}/{}/whep", self.host, self.whep_port, path)
    }

    pub fn api_url(&self, endpoint: &str) -> String {
        format!("http://{}:{}{}", self.host, self.api_port, endpoint)
    }
}

/// Immutable per-camera capture spec. Fixed at startup for the lifetime of
/// the process.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CameraSpec {
    pub id: String,

    pub device: String,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_fps")]
    pub framerate: u32,

    /// Target bitrate in kbit/s.
    #[serde(default = "default_camera_bitrate")]
    pub bitrate: u32,

    #[serde(default)]
    pub codec: Codec,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Video codec selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    H264,
    H265,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::H264 => "h264",
            Codec::H265 => "h265",
        }
    }
}

/// Ingest supervisor tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct IngestConfig {
    /// Health loop cadence in seconds.
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,

    /// Pipeline considered stale after this many seconds without a buffer.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Consecutive probe cycles without signal before teardown.
    #[serde(default = "default_signal_loss_cycles")]
    pub signal_loss_cycles: u32,

    /// Restart attempts before a camera is surfaced as errored.
    #[serde(default = "default_max_restarts")]
    pub max_restart_attempts: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            health_interval_secs: default_health_interval(),
            stale_after_secs: default_stale_after(),
            signal_loss_cycles: default_signal_loss_cycles(),
            max_restart_attempts: default_max_restarts(),
        }
    }
}

/// Recording muxer + disk guard configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecordingConfig {
    pub recordings_root: PathBuf,

    pub sessions_dir: PathBuf,

    /// Use fragmented MP4 so an interrupted recording stays playable.
    #[serde(default)]
    pub fragmented: bool,

    /// Fragment duration in milliseconds when `fragmented` is set.
    #[serde(default = "default_fragment_duration")]
    pub fragment_duration_ms: u32,

    /// Hard minimum of free disk space in MiB. Below this recordings refuse
    /// to start and running recordings are stopped.
    #[serde(default = "default_min_disk")]
    pub min_disk_space_mb: u64,

    /// Early-warning threshold in MiB.
    #[serde(default = "default_warning_disk")]
    pub warning_disk_space_mb: u64,

    /// Disk guard sampling interval in seconds while a session is active.
    #[serde(default = "default_disk_poll")]
    pub disk_poll_secs: u64,
}

impl RecordingConfig {
    pub fn min_disk_bytes(&self) -> u64 {
        self.min_disk_space_mb * 1024 * 1024
    }

    pub fn warning_disk_bytes(&self) -> u64 {
        self.warning_disk_space_mb * 1024 * 1024
    }
}

/// Mixer composition + publish configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MixerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_width")]
    pub output_width: u32,

    #[serde(default = "default_height")]
    pub output_height: u32,

    #[serde(default = "default_fps")]
    pub framerate: u32,

    /// Program stream bitrate in kbit/s.
    #[serde(default = "default_mixer_bitrate")]
    pub output_bitrate: u32,

    #[serde(default)]
    pub output_codec: Codec,

    /// Accepted but not wired to a recorder; surfaced in status only.
    #[serde(default)]
    pub recording_enabled: bool,

    #[serde(default = "default_mixer_path")]
    pub media_server_path: String,

    pub scenes_dir: PathBuf,

    /// Program output considered stalled after this many seconds without a
    /// buffer while playing.
    #[serde(default = "default_mixer_stall")]
    pub stall_after_secs: u64,
}

/// Browser-to-video output configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RevealConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_fps")]
    pub framerate: u32,

    /// Publish bitrate in kbit/s.
    #[serde(default = "default_reveal_bitrate")]
    pub bitrate: u32,

    /// HTML-to-video source element.
    #[serde(default = "default_renderer")]
    pub renderer: String,
}

impl Default for RevealConfig {
    fn default() -> Self {
        RevealConfig {
            enabled: true,
            width: default_width(),
            height: default_height(),
            framerate: default_fps(),
            bitrate: default_reveal_bitrate(),
            renderer: default_renderer(),
        }
    }
}

/// Mode arbitration configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModeManagerConfig {
    #[serde(default)]
    pub default_mode: crate::mode::SystemMode,

    #[serde(default = "default_mode_state_file")]
    pub state_file: PathBuf,

    /// systemd unit template for the per-camera external publisher;
    /// `{camera}` is replaced by the camera id.
    #[serde(default = "default_service_template")]
    pub service_template: String,
}

impl Default for ModeManagerConfig {
    fn default() -> Self {
        ModeManagerConfig {
            default_mode: Default::default(),
            state_file: default_mode_state_file(),
            service_template: default_service_template(),
        }
    }
}

/// Reserved external recording trigger.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExternalCamera {
    pub id: String,
    pub trigger_url: String,
}

// Default value functions
fn default_listen() -> String { "0.0.0.0:8080".to_string() }
fn default_static_dir() -> PathBuf { PathBuf::from("web") }
fn default_mediamtx_host() -> String { "127.0.0.1".to_string() }
fn default_rtsp_port() -> u16 { 8554 }
fn default_whep_port() -> u16 { 8889 }
fn default_api_port() -> u16 { 9997 }
fn default_webrtc_codecs() -> Vec<Codec> { vec![Codec::H264] }
fn default_width() -> u32 { 1920 }
fn default_height() -> u32 { 1080 }
fn default_fps() -> u32 { 30 }
fn default_camera_bitrate() -> u32 { 6000 }
fn default_mixer_bitrate() -> u32 { 8000 }
fn default_reveal_bitrate() -> u32 { 4000 }
fn default_true() -> bool { true }
fn default_health_interval() -> u64 { 10 }
fn default_stale_after() -> u64 { 15 }
fn default_signal_loss_cycles() -> u32 { 2 }
fn default_max_restarts() -> u32 { 5 }
fn default_fragment_duration() -> u32 { 2000 }
fn default_min_disk() -> u64 { 500 }
fn default_warning_disk() -> u64 { 2000 }
fn default_disk_poll() -> u64 { 10 }
fn default_mixer_path() -> String { "mixer_program".to_string() }
fn default_mixer_stall() -> u64 { 5 }
fn default_renderer() -> String { "wpesrc".to_string() }
fn default_mode_state_file() -> PathBuf { PathBuf::from("/var/lib/r58-studio/mode.json") }
fn default_service_template() -> String { "vdo-publisher@{camera}.service".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: default_listen(),
            static_dir: default_static_dir(),
        }
    }
}

impl Default for MediamtxConfig {
    fn default() -> Self {
        MediamtxConfig {
            host: default_mediamtx_host(),
            rtsp_port: default_rtsp_port(),
            whep_port: default_whep_port(),
            api_port: default_api_port(),
            webrtc_codecs: default_webrtc_codecs(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        Ok(config)
    }

    /// Reject configurations the engine cannot safely start with.
    pub fn validate(&self) -> Result<()> {
        if self.cameras.is_empty() {
            return Err(Error::ConfigInvalid("no cameras configured".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for cam in &self.cameras {
            if cam.id.is_empty() {
                return Err(Error::ConfigInvalid("camera with empty id".into()));
            }
            if !seen.insert(cam.id.as_str()) {
                return Err(Error::ConfigInvalid(format!("duplicate camera id '{}'", cam.id)));
            }
            if crate::mixer::scene::RESERVED_SOURCE_IDS.contains(&cam.id.as_str()) {
                return Err(Error::ConfigInvalid(format!(
                    "camera id '{}' collides with a reserved publish path",
                    cam.id
                )));
            }
            if cam.framerate == 0 || cam.width == 0 || cam.height == 0 {
                return Err(Error::ConfigInvalid(format!(
                    "camera '{}' has a zero dimension or framerate",
                    cam.id
                )));
            }
        }

        if self.recording.warning_disk_space_mb < self.recording.min_disk_space_mb {
            return Err(Error::ConfigInvalid(
                "recording.warning-disk-space-mb must be >= min-disk-space-mb".into(),
            ));
        }

        if self.mixer.enabled && self.mixer.media_server_path.is_empty() {
            return Err(Error::ConfigInvalid("mixer.media-server-path is empty".into()));
        }

        Ok(())
    }

    /// Cameras the engine is allowed to touch.
    pub fn enabled_cameras(&self) -> impl Iterator<Item = &CameraSpec> {
        self.cameras.iter().filter(|c| c.enabled)
    }

    pub fn camera(&self, id: &str) -> Option<&CameraSpec> {
        self.cameras.iter().find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> String {
        r#"
            [[cameras]]
            id = "cam0"
            device = "/dev/video0"

            [[cameras]]
            id = "cam1"
            device = "/dev/video1"
            enabled = false

            [recording]
            recordings-root = "/tmp/rec"
            sessions-dir = "/tmp/sessions"

            [mixer]
            scenes-dir = "/tmp/scenes"
        "#
        .to_string()
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: Config = toml::from_str(&minimal_toml()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.mediamtx.rtsp_port, 8554);
        assert_eq!(config.cameras.len(), 2);
        assert_eq!(config.enabled_cameras().count(), 1);
        assert_eq!(config.cameras[0].framerate, 30);
        assert_eq!(config.cameras[0].codec, Codec::H264);
        assert_eq!(config.ingest.health_interval_secs, 10);
        assert_eq!(config.ingest.stale_after_secs, 15);
        assert_eq!(config.ingest.signal_loss_cycles, 2);
        assert_eq!(config.mixer.media_server_path, "mixer_program");
        assert_eq!(config.mixer.stall_after_secs, 5);
    }

    #[test]
    fn rejects_duplicate_camera_ids() {
        let mut config: Config = toml::from_str(&minimal_toml()).unwrap();
        config.cameras[1].id = "cam0".into();
        assert!(matches!(config.validate(), Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn rejects_reserved_camera_id() {
        let mut config: Config = toml::from_str(&minimal_toml()).unwrap();
        config.cameras[1].id = "mixer_program".into();
        assert!(matches!(config.validate(), Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn rejects_inverted_disk_thresholds() {
        let mut config: Config = toml::from_str(&minimal_toml()).unwrap();
        config.recording.min_disk_space_mb = 4000;
        config.recording.warning_disk_space_mb = 1000;
        assert!(matches!(config.validate(), Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn mediamtx_urls_use_loopback() {
        let config: Config = toml::from_str(&minimal_toml()).unwrap();
        assert_eq!(config.mediamtx.rtsp_url("cam0"), "rtsp://127.0.0.1:8554/cam0");
        assert_eq!(
            config.mediamtx.whep_url("mixer_program"),
            "http://127.0.0.1:8889/mixer_program/whep"
        );
        assert_eq!(
            config.mediamtx.api_url("/v3/paths/list"),
            "http://127.0.0.1:9997/v3/paths/list"
        );
    }
}
