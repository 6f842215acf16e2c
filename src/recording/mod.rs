//! Recording sessions over published streams.
//!
//! Record pipelines subscribe to the media server, never to a capture
//! device; the ingest `is_streaming` predicate is the gate that keeps it
//! that way. A disk guard refuses to start below the hard minimum and stops
//! a running session that crosses it.

mod disk;
mod pipeline;
pub mod session;

pub use disk::{classify, free_space, DiskLevel};
pub use pipeline::RecordPipeline;
pub use session::{CameraRecordMeta, RecordOutcome, SessionMeta};

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{CameraSpec, ExternalCamera, RecordingConfig};
use crate::error::{Error, Result};
use crate::ingest::{BusEvent, BusEventKind, IngestManager};
use crate::media::builder::{self, RecordMuxOpts};
use crate::media::mediamtx::Mediamtx;

/// Per-camera recording status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Idle,
    Recording,
    Stopping,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CameraRecordSnapshot {
    pub id: String,
    pub status: RecordStatus,
    pub file: Option<PathBuf>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskStatus {
    pub free_mb: u64,
    pub level: DiskLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordingStatus {
    pub active_session: Option<String>,
    pub cameras: Vec<CameraRecordSnapshot>,
    pub disk: Option<DiskStatus>,
    pub updated_at: String,
}

/// Outcome map returned by a record-all request.
#[derive(Debug, Clone, Serialize)]
pub struct StartAllReport {
    pub session_id: Option<String>,
    pub cameras: BTreeMap<String, StartOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub result: StartResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartResult {
    Started,
    Failed,
}

/// External trigger dispatch record.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerState {
    pub id: String,
    pub trigger_url: String,
    pub last_event: Option<String>,
    pub last_result: Option<String>,
    pub last_fired: Option<String>,
}

struct RecordState {
    status: RecordStatus,
    pipeline: Option<RecordPipeline>,
    file: Option<PathBuf>,
    error: Option<String>,
    generation: u64,
}

struct RecordSlot {
    spec: CameraSpec,
    state: Mutex<RecordState>,
}

struct ActiveSession {
    meta: SessionMeta,
    warned: bool,
    degraded: bool,
}

pub struct RecordingSubscriber {
    cfg: RecordingConfig,
    slots: Vec<Arc<RecordSlot>>,
    by_id: HashMap<String, usize>,
    ingest: Arc<IngestManager>,
    mediamtx: Arc<Mediamtx>,
    session: Mutex<Option<ActiveSession>>,
    triggers: Mutex<Vec<TriggerState>>,
    http: reqwest::Client,
    bus_tx: UnboundedSender<BusEvent>,
    bus_rx: Mutex<Option<UnboundedReceiver<BusEvent>>>,
}

const STATE_CHANGE_TIMEOUT: Duration = Duration::from_secs(5);
const TRIGGER_TIMEOUT: Duration = Duration::from_secs(3);

impl RecordingSubscriber {
    pub fn new(
        cameras: Vec<CameraSpec>,
        cfg: RecordingConfig,
        external: Vec<ExternalCamera>,
        ingest: Arc<IngestManager>,
        mediamtx: Arc<Mediamtx>,
    ) -> Arc<Self> {
        let (bus_tx, bus_rx) = mpsc::unbounded_channel();
        let mut by_id = HashMap::new();
        let slots: Vec<Arc<RecordSlot>> = cameras
            .into_iter()
            .enumerate()
            .map(|(i, spec)| {
                by_id.insert(spec.id.clone(), i);
                Arc::new(RecordSlot {
                    spec,
                    state: Mutex::new(RecordState {
                        status: RecordStatus::Idle,
                        pipeline: None,
                        file: None,
                        error: None,
                        generation: 0,
                    }),
                })
            })
            .collect();

        let triggers = external
            .into_iter()
            .map(|t| TriggerState {
                id: t.id,
                trigger_url: t.trigger_url,
                last_event: None,
                last_result: None,
                last_fired: None,
            })
            .collect();

        let http = reqwest::Client::builder()
            .timeout(TRIGGER_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Arc::new(RecordingSubscriber {
            cfg,
            slots,
            by_id,
            ingest,
            mediamtx,
            session: Mutex::new(None),
            triggers: Mutex::new(triggers),
            http,
            bus_tx,
            bus_rx: Mutex::new(Some(bus_rx)),
        })
    }

    fn slot(&self, cam_id: &str) -> Result<&Arc<RecordSlot>> {
        self.by_id
            .get(cam_id)
            .map(|&i| &self.slots[i])
            .ok_or_else(|| Error::UnknownId { kind: "camera", id: cam_id.to_string() })
    }

    /// Start a session covering every enabled camera.
    ///
    /// A non-streaming camera yields `failed` in the report and the rest
    /// proceed. Calling with a session already active returns the current
    /// report without side effects.
    pub async fn start_all(&self) -> Result<StartAllReport> {
        if let Some(active) = self.session.lock().as_ref() {
            return Ok(self.report_for(&active.meta));
        }

        std::fs::create_dir_all(&self.cfg.recordings_root)?;
        self.check_disk_for_start()?;

        let mut meta = SessionMeta::new(Local::now());
        let mut outcomes = BTreeMap::new();

        let enabled: Vec<String> = self
            .slots
            .iter()
            .filter(|s| s.spec.enabled)
            .map(|s| s.spec.id.clone())
            .collect();
        for cam_id in enabled {
            match self.start_camera(&cam_id, &mut meta).await {
                Ok(()) => {
                    outcomes.insert(cam_id, StartOutcome { result: StartResult::Started, reason: None });
                }
                Err(e) => {
                    if let Ok(slot) = self.slot(&cam_id) {
                        let mut state = slot.state.lock();
                        state.status = RecordStatus::Failed;
                        state.error = Some(e.to_string());
                    }
                    outcomes.insert(
                        cam_id,
                        StartOutcome { result: StartResult::Failed, reason: Some(e.to_string()) },
                    );
                }
            }
        }

        let session_id = if meta.cameras.is_empty() {
            info!("No camera could start recording, session discarded");
            None
        } else {
            let id = meta.session_id.clone();
            info!(session = %id, cameras = meta.cameras.len(), "Recording session started");
            *self.session.lock() = Some(ActiveSession { meta, warned: false, degraded: false });
            self.fire_triggers("start").await;
            Some(id)
        };

        Ok(StartAllReport { session_id, cameras: outcomes })
    }

    /// Stop the active session, finalize every file and persist the session
    /// document. Safe to call twice; the second call is a no-op.
    pub async fn stop_all(&self) -> Result<Option<SessionMeta>> {
        let Some(mut active) = self.session.lock().take() else {
            return Ok(None);
        };

        let ids: Vec<String> = active.meta.cameras.keys().cloned().collect();
        for cam_id in ids {
            if let Ok(slot) = self.slot(&cam_id) {
                let slot = Arc::clone(slot);
                if let Some((outcome, error)) = self.stop_slot(&slot).await {
                    if let Some(entry) = active.meta.cameras.get_mut(&cam_id) {
                        entry.status = outcome;
                        entry.error = error;
                    }
                } else if let Some(entry) = active.meta.cameras.get_mut(&cam_id) {
                    // Stopped individually before the session ended.
                    if entry.status == RecordOutcome::Recording {
                        entry.status = self.outcome_of(&cam_id).unwrap_or(RecordOutcome::Failed);
                    }
                }
            }
        }

        active.meta.end_iso = Some(Local::now().to_rfc3339());
        active.meta.degraded = active.degraded;
        active.meta.save(&self.cfg.sessions_dir)?;
        info!(session = %active.meta.session_id, degraded = active.meta.degraded, "Recording session closed");

        self.fire_triggers("stop").await;
        Ok(Some(active.meta))
    }

    /// Start one camera, joining the active session or opening a new one.
    ///
    /// Gating failure (ingest not streaming) is reported as a `failed`
    /// snapshot, not an error.
    pub async fn start(&self, cam_id: &str) -> Result<CameraRecordSnapshot> {
        let slot = Arc::clone(self.slot(cam_id)?);
        if !slot.spec.enabled {
            return Err(Error::InvalidRequest(format!("camera '{cam_id}' is disabled")));
        }

        if slot.state.lock().status == RecordStatus::Recording {
            return Ok(self.snapshot_of(&slot));
        }

        std::fs::create_dir_all(&self.cfg.recordings_root)?;
        self.check_disk_for_start()?;

        let mut active = match self.session.lock().take() {
            Some(active) => active,
            None => ActiveSession {
                meta: SessionMeta::new(Local::now()),
                warned: false,
                degraded: false,
            },
        };

        if let Err(e) = self.start_camera(cam_id, &mut active.meta).await {
            if !active.meta.cameras.is_empty() {
                *self.session.lock() = Some(active);
            }
            let mut state = slot.state.lock();
            state.status = RecordStatus::Failed;
            state.error = Some(e.to_string());
            drop(state);
            return Ok(self.snapshot_of(&slot));
        }

        *self.session.lock() = Some(active);
        Ok(self.snapshot_of(&slot))
    }

    /// Stop one camera's recording. Idempotent; a stop that races a start
    /// wins.
    pub async fn stop(&self, cam_id: &str) -> Result<CameraRecordSnapshot> {
        let slot = Arc::clone(self.slot(cam_id)?);
        if let Some((outcome, error)) = self.stop_slot(&slot).await {
            if let Some(active) = self.session.lock().as_mut() {
                if let Some(entry) = active.meta.cameras.get_mut(cam_id) {
                    entry.status = outcome;
                    entry.error = error;
                }
            }
        }
        Ok(self.snapshot_of(&slot))
    }

    pub fn status(&self) -> RecordingStatus {
        let disk = free_space(&self.cfg.recordings_root).ok().map(|free| DiskStatus {
            free_mb: free / (1024 * 1024),
            level: classify(free, &self.cfg),
        });
        RecordingStatus {
            active_session: self.session.lock().as_ref().map(|a| a.meta.session_id.clone()),
            cameras: self.slots.iter().map(|s| self.snapshot_of(s)).collect(),
            disk,
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn current_session(&self) -> Option<SessionMeta> {
        self.session.lock().as_ref().map(|a| a.meta.clone())
    }

    pub fn sessions(&self) -> Vec<String> {
        SessionMeta::list(&self.cfg.sessions_dir)
    }

    pub fn session_meta(&self, session_id: &str) -> Result<SessionMeta> {
        SessionMeta::load(&self.cfg.sessions_dir, session_id)
    }

    pub fn trigger_status(&self) -> Vec<TriggerState> {
        self.triggers.lock().clone()
    }

    fn check_disk_for_start(&self) -> Result<()> {
        let free = free_space(&self.cfg.recordings_root)?;
        if classify(free, &self.cfg) == DiskLevel::Critical {
            return Err(Error::DiskExhausted { free, required: self.cfg.min_disk_bytes() });
        }
        Ok(())
    }

    /// Build and play one record pipeline; registers the camera in `meta`
    /// only on success.
    async fn start_camera(&self, cam_id: &str, meta: &mut SessionMeta) -> Result<()> {
        if !self.ingest.is_streaming(cam_id) {
            return Err(Error::InvalidRequest(format!("ingest for '{cam_id}' is not streaming")));
        }

        // Depayload what ingest actually publishes, never the camera's
        // stored preference.
        let published = self.ingest.published_codec(cam_id)?;
        let publish_path = self.ingest.publish_path(cam_id)?;

        let final_path = meta.output_path(&self.cfg.recordings_root, cam_id, "mp4");
        let part_path = final_path.with_extension("mp4.part");
        let launch = builder::record_subscribe(
            &self.mediamtx.subscribe_url(&publish_path),
            published,
            RecordMuxOpts {
                fragmented: self.cfg.fragmented,
                fragment_duration_ms: self.cfg.fragment_duration_ms,
            },
            &part_path,
        );

        let slot = Arc::clone(self.slot(cam_id)?);
        let generation = slot.state.lock().generation;

        let name = format!("record_{cam_id}");
        let bus_tx = self.bus_tx.clone();
        let final_clone = final_path.clone();
        let pipeline = tokio::task::spawn_blocking(move || {
            let p = RecordPipeline::new(&name, &launch, part_path, final_clone, bus_tx)?;
            p.start()?;
            Ok::<_, Error>(p)
        })
        .await
        .map_err(|e| Error::pipeline_construction(cam_id, e))??;

        if let Err(e) = crate::media::wait_for_state(
            pipeline.pipeline(),
            gstreamer::State::Playing,
            STATE_CHANGE_TIMEOUT,
        )
        .await
        {
            let _ = tokio::task::spawn_blocking(move || pipeline.finalize()).await;
            return Err(e);
        }

        let mut pipeline = Some(pipeline);
        let raced = {
            let mut state = slot.state.lock();
            if state.generation != generation {
                true
            } else {
                state.status = RecordStatus::Recording;
                state.file = Some(final_path.clone());
                state.error = None;
                state.pipeline = pipeline.take();
                false
            }
        };
        if raced {
            // A stop raced the startup; the stop wins.
            if let Some(p) = pipeline {
                let _ = tokio::task::spawn_blocking(move || p.finalize()).await;
            }
            return Err(Error::InvalidRequest(format!("recording of '{cam_id}' was stopped")));
        }

        meta.cameras.insert(
            cam_id.to_string(),
            CameraRecordMeta { file: final_path, status: RecordOutcome::Recording, error: None },
        );
        info!(camera = cam_id, "Recording");
        Ok(())
    }

    /// Ordered teardown of one slot. Returns `None` when nothing was
    /// running.
    async fn stop_slot(&self, slot: &Arc<RecordSlot>) -> Option<(RecordOutcome, Option<String>)> {
        let pipeline = {
            let mut state = slot.state.lock();
            state.generation += 1;
            match state.pipeline.take() {
                Some(p) => {
                    state.status = RecordStatus::Stopping;
                    p
                }
                None => return None,
            }
        };

        let cam_id = slot.spec.id.clone();
        let result = tokio::task::spawn_blocking(move || pipeline.finalize()).await;
        let (outcome, error) = match result {
            Ok(Ok(_path)) => (RecordOutcome::Completed, None),
            Ok(Err(e)) => (RecordOutcome::Failed, Some(e.to_string())),
            Err(e) => (RecordOutcome::Failed, Some(e.to_string())),
        };

        {
            let mut state = slot.state.lock();
            state.status = match outcome {
                RecordOutcome::Completed => RecordStatus::Completed,
                _ => RecordStatus::Failed,
            };
            state.error = error.clone();
        }
        info!(camera = %cam_id, outcome = ?outcome, "Recording stopped");
        Some((outcome, error))
    }

    fn outcome_of(&self, cam_id: &str) -> Option<RecordOutcome> {
        let slot = self.slot(cam_id).ok()?;
        let state = slot.state.lock();
        match state.status {
            RecordStatus::Completed => Some(RecordOutcome::Completed),
            RecordStatus::Failed => Some(RecordOutcome::Failed),
            _ => None,
        }
    }

    fn snapshot_of(&self, slot: &RecordSlot) -> CameraRecordSnapshot {
        let state = slot.state.lock();
        CameraRecordSnapshot {
            id: slot.spec.id.clone(),
            status: state.status,
            file: state.file.clone(),
            error: state.error.clone(),
        }
    }

    fn report_for(&self, meta: &SessionMeta) -> StartAllReport {
        let mut cameras = BTreeMap::new();
        for slot in self.slots.iter().filter(|s| s.spec.enabled) {
            let outcome = if meta.cameras.contains_key(&slot.spec.id) {
                StartOutcome { result: StartResult::Started, reason: None }
            } else {
                StartOutcome {
                    result: StartResult::Failed,
                    reason: slot.state.lock().error.clone(),
                }
            };
            cameras.insert(slot.spec.id.clone(), outcome);
        }
        StartAllReport { session_id: Some(meta.session_id.clone()), cameras }
    }

    /// Invoke the reserved external triggers; outcomes are logged and kept
    /// for the trigger-status endpoint, never propagated.
    async fn fire_triggers(&self, event: &str) {
        let targets: Vec<(String, String)> = self
            .triggers
            .lock()
            .iter()
            .map(|t| (t.id.clone(), t.trigger_url.clone()))
            .collect();

        for (id, url) in targets {
            let result = self
                .http
                .get(&url)
                .query(&[("event", event)])
                .send()
                .await
                .map(|r| r.status().to_string())
                .unwrap_or_else(|e| format!("error: {e}"));
            info!(trigger = %id, event, result = %result, "External trigger fired");

            let mut triggers = self.triggers.lock();
            if let Some(t) = triggers.iter_mut().find(|t| t.id == id) {
                t.last_event = Some(event.to_string());
                t.last_result = Some(result);
                t.last_fired = Some(Utc::now().to_rfc3339());
            }
        }
    }

    /// Supervisor: record-pipeline faults plus the disk guard.
    pub async fn run_supervisor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut bus_rx = self
            .bus_rx
            .lock()
            .take()
            .expect("recording supervisor started twice");
        let mut ticker = tokio::time::interval(Duration::from_secs(self.cfg.disk_poll_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(poll_secs = self.cfg.disk_poll_secs, "Recording supervisor running");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(event) = bus_rx.recv() => {
                    self.handle_bus_event(event).await;
                }
                _ = ticker.tick() => {
                    self.disk_guard_tick().await;
                }
            }
        }
        info!("Recording supervisor exited");
    }

    async fn handle_bus_event(&self, event: BusEvent) {
        let cam_id = match event.source.strip_prefix("record_") {
            Some(id) => id.to_string(),
            None => return,
        };
        let reason = match event.kind {
            BusEventKind::Error(e) => e,
            BusEventKind::Eos => return,
        };
        warn!(camera = %cam_id, reason = %reason, "Record pipeline fault, finalizing");

        if let Ok(slot) = self.slot(&cam_id) {
            let slot = Arc::clone(slot);
            if self.stop_slot(&slot).await.is_some() {
                let mut state = slot.state.lock();
                state.status = RecordStatus::Failed;
                state.error = Some(reason.clone());
            }
            if let Some(active) = self.session.lock().as_mut() {
                if let Some(entry) = active.meta.cameras.get_mut(&cam_id) {
                    entry.status = RecordOutcome::Failed;
                    entry.error = Some(reason);
                }
            }
        }
    }

    async fn disk_guard_tick(&self) {
        if self.session.lock().is_none() {
            return;
        }
        let free = match free_space(&self.cfg.recordings_root) {
            Ok(free) => free,
            Err(e) => {
                warn!(error = %e, "Disk probe failed");
                return;
            }
        };

        match classify(free, &self.cfg) {
            DiskLevel::Ok => {}
            DiskLevel::Warning => {
                let mut session = self.session.lock();
                if let Some(active) = session.as_mut() {
                    if !active.warned {
                        active.warned = true;
                        warn!(free_mb = free / (1024 * 1024), "Disk space below warning threshold");
                    }
                }
            }
            DiskLevel::Critical => {
                warn!(free_mb = free / (1024 * 1024), "Disk space below hard minimum, stopping session");
                if let Some(active) = self.session.lock().as_mut() {
                    active.degraded = true;
                }
                if let Err(e) = self.stop_all().await {
                    warn!(error = %e, "Forced session stop failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Codec, IngestConfig, MediamtxConfig};
    use crate::media::probe::{ProbeResult, SignalProber};
    use crate::Platform;
    use std::path::Path;

    struct NeverSignal;

    #[async_trait::async_trait]
    impl SignalProber for NeverSignal {
        async fn probe(&self, _device: &Path) -> ProbeResult {
            ProbeResult::NO_SIGNAL
        }
    }

    fn cam(id: &str, enabled: bool) -> CameraSpec {
        CameraSpec {
            id: id.into(),
            device: format!("/dev/video-{id}"),
            width: 1920,
            height: 1080,
            framerate: 30,
            bitrate: 6000,
            codec: Codec::H264,
            enabled,
        }
    }

    fn recording_cfg(root: &Path, sessions: &Path) -> RecordingConfig {
        toml::from_str(&format!(
            r#"
            recordings-root = "{}"
            sessions-dir = "{}"
            min-disk-space-mb = 0
            warning-disk-space-mb = 0
            "#,
            root.display(),
            sessions.display()
        ))
        .unwrap()
    }

    fn subscriber(cfg: RecordingConfig, cameras: Vec<CameraSpec>) -> Arc<RecordingSubscriber> {
        let mediamtx = Arc::new(Mediamtx::new(MediamtxConfig::default()));
        let ingest = IngestManager::new(
            cameras.clone(),
            IngestConfig::default(),
            Platform::default(),
            Arc::clone(&mediamtx),
            Arc::new(NeverSignal),
        );
        RecordingSubscriber::new(cameras, cfg, Vec::new(), ingest, mediamtx)
    }

    #[tokio::test]
    async fn start_all_fails_per_camera_when_ingest_not_streaming() {
        let root = tempfile::tempdir().unwrap();
        let sessions = tempfile::tempdir().unwrap();
        let sub = subscriber(
            recording_cfg(root.path(), sessions.path()),
            vec![cam("cam0", true), cam("cam1", true)],
        );

        let report = sub.start_all().await.unwrap();
        assert_eq!(report.session_id, None);
        assert_eq!(report.cameras.len(), 2);
        assert!(report.cameras.values().all(|o| o.result == StartResult::Failed));
        // No per-camera directories appear for failed cameras.
        assert!(!root.path().join("cam0").exists());
        assert!(!root.path().join("cam1").exists());
    }

    #[tokio::test]
    async fn per_camera_start_reports_failed_not_error_when_gated() {
        let root = tempfile::tempdir().unwrap();
        let sessions = tempfile::tempdir().unwrap();
        let sub = subscriber(recording_cfg(root.path(), sessions.path()), vec![cam("cam0", true)]);

        let snap = sub.start("cam0").await.unwrap();
        assert_eq!(snap.status, RecordStatus::Failed);
        assert!(snap.error.unwrap().contains("not streaming"));
    }

    #[tokio::test]
    async fn stop_all_without_session_is_a_noop_twice() {
        let root = tempfile::tempdir().unwrap();
        let sessions = tempfile::tempdir().unwrap();
        let sub = subscriber(recording_cfg(root.path(), sessions.path()), vec![cam("cam0", true)]);

        assert!(sub.stop_all().await.unwrap().is_none());
        assert!(sub.stop_all().await.unwrap().is_none());
        assert!(SessionMeta::list(sessions.path()).is_empty());
    }

    #[tokio::test]
    async fn start_refused_below_hard_disk_minimum() {
        let root = tempfile::tempdir().unwrap();
        let sessions = tempfile::tempdir().unwrap();
        let mut cfg = recording_cfg(root.path(), sessions.path());
        // Larger than any disk this test will ever run on.
        cfg.min_disk_space_mb = u64::MAX / (4 * 1024 * 1024);
        cfg.warning_disk_space_mb = cfg.min_disk_space_mb;
        let sub = subscriber(cfg, vec![cam("cam0", true)]);

        let err = sub.start_all().await.unwrap_err();
        assert!(matches!(err, Error::DiskExhausted { .. }));
    }

    #[tokio::test]
    async fn unknown_camera_rejected() {
        let root = tempfile::tempdir().unwrap();
        let sessions = tempfile::tempdir().unwrap();
        let sub = subscriber(recording_cfg(root.path(), sessions.path()), vec![cam("cam0", true)]);
        assert!(matches!(
            sub.start("ghost").await.unwrap_err(),
            Error::UnknownId { kind: "camera", .. }
        ));
    }

    #[tokio::test]
    async fn stop_on_idle_camera_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let sessions = tempfile::tempdir().unwrap();
        let sub = subscriber(recording_cfg(root.path(), sessions.path()), vec![cam("cam0", true)]);

        let first = sub.stop("cam0").await.unwrap();
        let second = sub.stop("cam0").await.unwrap();
        assert_eq!(first.status, RecordStatus::Idle);
        assert_eq!(second.status, RecordStatus::Idle);
    }
}
