//! System mode arbitration.
//!
//! The capture devices have exactly one owner at a time. In `recorder` mode
//! the ingest manager holds them; in `vdo_publisher` mode ingest is
//! suspended and per-camera external publisher services run instead. A
//! transition stops the outgoing side to completion before the incoming
//! side starts, then persists the selection so reboots restore it.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ModeManagerConfig;
use crate::error::{Error, Result};
use crate::ingest::IngestManager;
use crate::recording::RecordingSubscriber;
use crate::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SystemMode {
    #[default]
    Recorder,
    VdoPublisher,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub camera: String,
    pub unit: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModeStatus {
    pub mode: SystemMode,
    pub transitioning: bool,
    pub services: Vec<ServiceStatus>,
    pub last_error: Option<String>,
    pub updated_at: String,
}

/// Persisted shape of the mode state file.
#[derive(Debug, Serialize, Deserialize)]
struct ModeDocument {
    mode: SystemMode,
}

struct ModeState {
    mode: SystemMode,
    transitioning: bool,
    last_error: Option<String>,
}

pub struct ModeManager {
    cfg: ModeManagerConfig,
    platform: Platform,
    cameras: Vec<String>,
    ingest: Arc<IngestManager>,
    recording: Arc<RecordingSubscriber>,
    state: Mutex<ModeState>,
    /// Serializes transitions; reads never wait on this.
    transition: tokio::sync::Mutex<()>,
    /// Simulated unit set when running without systemd (test mode).
    fake_active: Mutex<HashSet<String>>,
}

const SERVICE_TIMEOUT: Duration = Duration::from_secs(10);

impl ModeManager {
    /// Restore the last persisted mode, falling back to the configured
    /// default when the state file is absent or unreadable.
    pub fn new(
        cfg: ModeManagerConfig,
        platform: Platform,
        cameras: Vec<String>,
        ingest: Arc<IngestManager>,
        recording: Arc<RecordingSubscriber>,
    ) -> Arc<Self> {
        let mode = read_state_file(&cfg.state_file).unwrap_or(cfg.default_mode);
        info!(?mode, "Mode manager initialized");
        Arc::new(ModeManager {
            cfg,
            platform,
            cameras,
            ingest,
            recording,
            state: Mutex::new(ModeState { mode, transitioning: false, last_error: None }),
            transition: tokio::sync::Mutex::new(()),
            fake_active: Mutex::new(HashSet::new()),
        })
    }

    pub fn get_mode(&self) -> SystemMode {
        self.state.lock().mode
    }

    /// Bring up the side the restored mode owns. Called once at boot.
    pub async fn resume(&self) {
        let _guard = self.transition.lock().await;
        match self.get_mode() {
            SystemMode::Recorder => {
                self.ingest.start_all().await;
            }
            SystemMode::VdoPublisher => {
                for camera in &self.cameras {
                    let unit = self.unit_for(camera);
                    if let Err(e) = self.unit_op("start", &unit).await {
                        warn!(unit = %unit, error = %e, "Publisher service failed to resume");
                    }
                }
            }
        }
    }

    pub async fn status(&self) -> ModeStatus {
        let (mode, transitioning, last_error) = {
            let state = self.state.lock();
            (state.mode, state.transitioning, state.last_error.clone())
        };
        let mut services = Vec::with_capacity(self.cameras.len());
        for camera in &self.cameras {
            let unit = self.unit_for(camera);
            let active = self.unit_active(&unit).await;
            services.push(ServiceStatus { camera: camera.clone(), unit, active });
        }
        ModeStatus { mode, transitioning, services, last_error, updated_at: Utc::now().to_rfc3339() }
    }

    /// Switch modes. The outgoing side is stopped to completion (device
    /// release confirmed) before the incoming side starts; any failure
    /// reverts to the previous mode and reports.
    pub async fn set_mode(&self, target: SystemMode) -> Result<ModeStatus> {
        let _guard = self.transition.lock().await;

        if self.state.lock().mode == target {
            return Ok(self.status().await);
        }
        self.state.lock().transitioning = true;

        let result = match target {
            SystemMode::VdoPublisher => self.enter_vdo_publisher().await,
            SystemMode::Recorder => self.enter_recorder().await,
        };

        let outcome = match result {
            Ok(()) => {
                {
                    let mut state = self.state.lock();
                    state.mode = target;
                    state.transitioning = false;
                    state.last_error = None;
                }
                self.persist(target)?;
                info!(?target, "Mode switched");
                Ok(self.status().await)
            }
            Err(e) => {
                {
                    let mut state = self.state.lock();
                    state.transitioning = false;
                    state.last_error = Some(e.to_string());
                }
                warn!(?target, error = %e, "Mode switch failed, previous mode kept");
                Err(e)
            }
        };
        outcome
    }

    async fn enter_vdo_publisher(&self) -> Result<()> {
        // Recording must not outlive the streams it subscribes to.
        self.recording.stop_all().await?;
        self.ingest.stop_all().await;

        let mut started: Vec<String> = Vec::new();
        for camera in &self.cameras {
            let unit = self.unit_for(camera);
            if let Err(e) = self.unit_op("start", &unit).await {
                // Revert: release the units we took, give devices back.
                for unit in &started {
                    let _ = self.unit_op("stop", unit).await;
                }
                self.ingest.start_all().await;
                return Err(e);
            }
            started.push(unit);
        }
        Ok(())
    }

    async fn enter_recorder(&self) -> Result<()> {
        let mut failures = Vec::new();
        for camera in &self.cameras {
            let unit = self.unit_for(camera);
            if let Err(e) = self.unit_op("stop", &unit).await {
                failures.push((unit, e));
            }
        }
        if let Some((unit, e)) = failures.into_iter().next() {
            // A publisher still holds its device; restarting ingest now
            // would contend for it. Keep vdo_publisher.
            for camera in &self.cameras {
                let _ = self.unit_op("start", &self.unit_for(camera)).await;
            }
            return Err(Error::ExternalService { unit, reason: e.to_string() });
        }

        // Confirm device release before ingest reopens anything.
        for camera in &self.cameras {
            let unit = self.unit_for(camera);
            if self.unit_active(&unit).await {
                return Err(Error::ExternalService {
                    unit,
                    reason: "still active after stop".into(),
                });
            }
        }

        self.ingest.start_all().await;
        Ok(())
    }

    fn unit_for(&self, camera: &str) -> String {
        self.cfg.service_template.replace("{camera}", camera)
    }

    async fn unit_op(&self, verb: &str, unit: &str) -> Result<()> {
        if self.platform.test_mode {
            let mut fake = self.fake_active.lock();
            match verb {
                "start" => {
                    fake.insert(unit.to_string());
                }
                "stop" => {
                    fake.remove(unit);
                }
                _ => {}
            }
            return Ok(());
        }

        let output = tokio::time::timeout(
            SERVICE_TIMEOUT,
            tokio::process::Command::new("systemctl").arg(verb).arg(unit).output(),
        )
        .await
        .map_err(|_| Error::Timeout(SERVICE_TIMEOUT, format!("systemctl {verb} {unit}")))??;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::ExternalService {
                unit: unit.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn unit_active(&self, unit: &str) -> bool {
        if self.platform.test_mode {
            return self.fake_active.lock().contains(unit);
        }
        tokio::time::timeout(
            SERVICE_TIMEOUT,
            tokio::process::Command::new("systemctl").arg("is-active").arg("--quiet").arg(unit).output(),
        )
        .await
        .ok()
        .and_then(|r| r.ok())
        .map(|o| o.status.success())
        .unwrap_or(false)
    }

    fn persist(&self, mode: SystemMode) -> Result<()> {
        if let Some(parent) = self.cfg.state_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&ModeDocument { mode })
            .map_err(|e| Error::InvalidRequest(format!("mode serialization: {e}")))?;
        std::fs::write(&self.cfg.state_file, json)?;
        Ok(())
    }
}

fn read_state_file(path: &Path) -> Option<SystemMode> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<ModeDocument>(&content) {
        Ok(doc) => Some(doc.mode),
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Mode state file unreadable, using default");
            None
        }
    }
}
