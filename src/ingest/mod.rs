//! Always-on ingest supervision.
//!
//! One publish pipeline per enabled camera, owned exclusively here. A
//! background supervisor probes signal presence, rebuilds on resolution
//! drift or staleness and applies exponential backoff to failing cameras.
//! Everyone else (recording, mixer, viewers) consumes the published stream.

mod pipeline;

pub use pipeline::{BusEvent, BusEventKind, IngestPipeline};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{CameraSpec, Codec, IngestConfig};
use crate::error::{Error, Result};
use crate::media::builder;
use crate::media::mediamtx::Mediamtx;
use crate::media::probe::{ProbeResult, SignalProber};
use crate::Platform;

/// Per-camera ingest status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    Idle,
    Starting,
    Streaming,
    NoSignal,
    Error,
}

/// Value snapshot of one camera's state.
#[derive(Debug, Clone, Serialize)]
pub struct CameraSnapshot {
    pub id: String,
    pub enabled: bool,
    pub status: CameraStatus,
    pub streaming: bool,
    pub width: u32,
    pub height: u32,
    pub restart_attempts: u32,
    pub last_error: Option<String>,
    pub last_probe: Option<String>,
    pub publish_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestStatus {
    pub cameras: Vec<CameraSnapshot>,
    pub updated_at: String,
}

/// Mutable per-camera state, guarded by the slot lock.
struct CameraState {
    status: CameraStatus,
    detected: Option<(u32, u32)>,
    last_probe: Option<DateTime<Utc>>,
    restart_attempts: u32,
    signal_misses: u32,
    next_retry_at: Option<Instant>,
    last_error: Option<String>,
    pipeline: Option<IngestPipeline>,
    /// Bumped by every stop so an in-flight start can detect it lost.
    generation: u64,
}

impl CameraState {
    fn new() -> Self {
        CameraState {
            status: CameraStatus::Idle,
            detected: None,
            last_probe: None,
            restart_attempts: 0,
            signal_misses: 0,
            next_retry_at: None,
            last_error: None,
            pipeline: None,
            generation: 0,
        }
    }
}

struct CameraSlot {
    spec: CameraSpec,
    state: Mutex<CameraState>,
}

/// Supervisor owning every capture device.
pub struct IngestManager {
    slots: Vec<Arc<CameraSlot>>,
    by_id: HashMap<String, usize>,
    cfg: IngestConfig,
    platform: Platform,
    mediamtx: Arc<Mediamtx>,
    prober: Arc<dyn SignalProber>,
    bus_tx: UnboundedSender<BusEvent>,
    bus_rx: Mutex<Option<UnboundedReceiver<BusEvent>>>,
}

/// Base delay for the restart backoff; doubles per attempt, capped.
const RESTART_BACKOFF_BASE: Duration = Duration::from_secs(2);
const RESTART_BACKOFF_CAP: Duration = Duration::from_secs(60);
const STATE_CHANGE_TIMEOUT: Duration = Duration::from_secs(5);

impl IngestManager {
    pub fn new(
        cameras: Vec<CameraSpec>,
        cfg: IngestConfig,
        platform: Platform,
        mediamtx: Arc<Mediamtx>,
        prober: Arc<dyn SignalProber>,
    ) -> Arc<Self> {
        let (bus_tx, bus_rx) = mpsc::unbounded_channel();
        let mut by_id = HashMap::new();
        let slots: Vec<Arc<CameraSlot>> = cameras
            .into_iter()
            .enumerate()
            .map(|(i, spec)| {
                by_id.insert(spec.id.clone(), i);
                Arc::new(CameraSlot { spec, state: Mutex::new(CameraState::new()) })
            })
            .collect();

        Arc::new(IngestManager {
            slots,
            by_id,
            cfg,
            platform,
            mediamtx,
            prober,
            bus_tx,
            bus_rx: Mutex::new(Some(bus_rx)),
        })
    }

    fn slot(&self, cam_id: &str) -> Result<&Arc<CameraSlot>> {
        self.by_id
            .get(cam_id)
            .map(|&i| &self.slots[i])
            .ok_or_else(|| Error::UnknownId { kind: "camera", id: cam_id.to_string() })
    }

    /// The gate the recording subscriber checks before touching a stream.
    pub fn is_streaming(&self, cam_id: &str) -> bool {
        self.slot(cam_id)
            .map(|s| s.state.lock().status == CameraStatus::Streaming)
            .unwrap_or(false)
    }

    /// The codec actually published for a camera. Recording must depayload
    /// this, not the camera's stored preference, which the media server's
    /// WebRTC codec set may have overridden.
    pub fn published_codec(&self, cam_id: &str) -> Result<Codec> {
        let slot = self.slot(cam_id)?;
        Ok(self.effective_codec(&slot.spec))
    }

    fn effective_codec(&self, spec: &CameraSpec) -> Codec {
        if self.mediamtx.supports_codec(spec.codec) {
            spec.codec
        } else {
            Codec::H264
        }
    }

    pub fn publish_path(&self, cam_id: &str) -> Result<String> {
        self.slot(cam_id).map(|s| s.spec.id.clone())
    }

    /// Start every enabled camera. Per-camera failures are surfaced in
    /// status; one camera failing never affects the others.
    pub async fn start_all(&self) {
        for slot in self.slots.iter().filter(|s| s.spec.enabled) {
            if let Err(e) = self.start(&slot.spec.id).await {
                warn!(camera = %slot.spec.id, error = %e, "Ingest start failed");
            }
        }
    }

    pub async fn stop_all(&self) {
        for slot in self.slots.iter().filter(|s| s.spec.enabled) {
            if let Err(e) = self.stop(&slot.spec.id).await {
                warn!(camera = %slot.spec.id, error = %e, "Ingest stop failed");
            }
        }
    }

    /// Start one camera's publish pipeline.
    ///
    /// No signal is not an error: the camera is reported `no_signal` and the
    /// supervisor keeps probing. Construction failures surface as `error`.
    pub async fn start(&self, cam_id: &str) -> Result<CameraSnapshot> {
        let slot = Arc::clone(self.slot(cam_id)?);
        if !slot.spec.enabled {
            return Err(Error::InvalidRequest(format!("camera '{cam_id}' is disabled")));
        }

        let generation = {
            let mut state = slot.state.lock();
            if state.pipeline.is_some() && state.status == CameraStatus::Streaming {
                None
            } else {
                state.status = CameraStatus::Starting;
                Some(state.generation)
            }
        };
        let Some(generation) = generation else {
            debug!(camera = cam_id, "Ingest already streaming");
            return Ok(self.snapshot_of(&slot));
        };

        let probe = self.probe_camera(&slot).await;
        {
            let mut state = slot.state.lock();
            state.last_probe = Some(Utc::now());
            if probe.has_signal {
                state.detected = Some(probe.resolution());
            }
        }
        if !probe.has_signal {
            {
                let mut state = slot.state.lock();
                state.status = CameraStatus::NoSignal;
                state.pipeline = None;
            }
            info!(camera = cam_id, "No signal at start, supervisor will keep probing");
            return Ok(self.snapshot_of(&slot));
        }

        match self.build_and_play(&slot, probe.resolution()).await {
            Ok(pipeline) => {
                let raced = {
                    let mut state = slot.state.lock();
                    if state.generation != generation {
                        // A stop raced us; the stop wins.
                        Some(pipeline)
                    } else {
                        state.pipeline = Some(pipeline);
                        state.status = CameraStatus::Streaming;
                        state.restart_attempts = 0;
                        state.signal_misses = 0;
                        state.next_retry_at = None;
                        state.last_error = None;
                        None
                    }
                };
                if let Some(pipeline) = raced {
                    pipeline.stop();
                } else {
                    info!(camera = cam_id, width = probe.width, height = probe.height, "Ingest streaming");
                }
                Ok(self.snapshot_of(&slot))
            }
            Err(e) => {
                let mut state = slot.state.lock();
                state.status = CameraStatus::Error;
                state.last_error = Some(e.to_string());
                state.pipeline = None;
                error!(camera = cam_id, error = %e, "Ingest pipeline construction failed");
                Err(e)
            }
        }
    }

    /// Stop one camera and release its device. Idempotent.
    pub async fn stop(&self, cam_id: &str) -> Result<CameraSnapshot> {
        let slot = Arc::clone(self.slot(cam_id)?);
        let pipeline = {
            let mut state = slot.state.lock();
            state.generation += 1;
            state.status = CameraStatus::Idle;
            state.restart_attempts = 0;
            state.signal_misses = 0;
            state.next_retry_at = None;
            state.pipeline.take()
        };
        if let Some(pipeline) = pipeline {
            tokio::task::spawn_blocking(move || pipeline.stop())
                .await
                .map_err(|e| Error::pipeline_runtime(cam_id, e))?;
            info!(camera = cam_id, "Ingest stopped");
        }
        Ok(self.snapshot_of(&slot))
    }

    /// Consistent by-value status of all cameras, config order.
    pub fn status(&self) -> IngestStatus {
        IngestStatus {
            cameras: self.slots.iter().map(|s| self.snapshot_of(s)).collect(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    fn snapshot_of(&self, slot: &CameraSlot) -> CameraSnapshot {
        let state = slot.state.lock();
        let (width, height) = state.detected.unwrap_or((0, 0));
        CameraSnapshot {
            id: slot.spec.id.clone(),
            enabled: slot.spec.enabled,
            status: state.status,
            streaming: state.status == CameraStatus::Streaming,
            width,
            height,
            restart_attempts: state.restart_attempts,
            last_error: state.last_error.clone(),
            last_probe: state.last_probe.map(|t| t.to_rfc3339()),
            publish_path: slot.spec.id.clone(),
        }
    }

    async fn probe_camera(&self, slot: &CameraSlot) -> ProbeResult {
        if self.platform.test_mode {
            // Test rigs have no capture hardware; pretend the configured
            // timing is present so pipelines can run on videotestsrc.
            return ProbeResult {
                width: slot.spec.width,
                height: slot.spec.height,
                has_signal: true,
            };
        }
        self.prober.probe(&PathBuf::from(&slot.spec.device)).await
    }

    async fn build_and_play(&self, slot: &CameraSlot, working: (u32, u32)) -> Result<IngestPipeline> {
        let publish_codec = self.effective_codec(&slot.spec);
        if publish_codec != slot.spec.codec {
            info!(
                camera = %slot.spec.id,
                preference = slot.spec.codec.as_str(),
                publishing = publish_codec.as_str(),
                "Camera codec preference outside the WebRTC set, overriding"
            );
        }
        let launch = builder::ingest_publish(
            &slot.spec,
            working,
            publish_codec,
            &self.mediamtx.publish_url(&slot.spec.id),
            self.platform,
        );
        let name = format!("ingest_{}", slot.spec.id);
        let bus_tx = self.bus_tx.clone();

        let pipeline = tokio::task::spawn_blocking(move || {
            let pipeline = IngestPipeline::new(&name, &launch, working, bus_tx)?;
            pipeline.start()?;
            Ok::<_, Error>(pipeline)
        })
        .await
        .map_err(|e| Error::pipeline_construction(&slot.spec.id, e))??;

        if let Err(e) =
            crate::media::wait_for_state(pipeline.pipeline(), gstreamer::State::Playing, STATE_CHANGE_TIMEOUT)
                .await
        {
            pipeline.stop();
            return Err(e);
        }
        Ok(pipeline)
    }

    /// Run the health loop until shutdown. One task per process.
    pub async fn run_supervisor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut bus_rx = self
            .bus_rx
            .lock()
            .take()
            .expect("ingest supervisor started twice");
        let mut ticker = tokio::time::interval(Duration::from_secs(self.cfg.health_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval_secs = self.cfg.health_interval_secs, "Ingest supervisor running");
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
                    self.health_cycle().await;
                }
            }
        }
        info!("Ingest supervisor exited");
    }

    async fn handle_bus_event(&self, event: BusEvent) {
        let cam_id = match event.source.strip_prefix("ingest_") {
            Some(id) => id.to_string(),
            None => return,
        };
        let reason = match event.kind {
            BusEventKind::Error(e) => e,
            BusEventKind::Eos => "unexpected end of stream".to_string(),
        };
        warn!(camera = %cam_id, reason = %reason, "Ingest pipeline reported a fault");
        if let Ok(slot) = self.slot(&cam_id) {
            let slot = Arc::clone(slot);
            self.fail_pipeline(&slot, reason).await;
        }
    }

    /// Tear a faulted pipeline down and schedule a backoff restart.
    async fn fail_pipeline(&self, slot: &Arc<CameraSlot>, reason: String) {
        let (pipeline, exhausted) = {
            let mut state = slot.state.lock();
            if state.status == CameraStatus::Idle {
                // Manually stopped while the fault was in flight; stop wins.
                return;
            }
            state.last_error = Some(reason);
            state.restart_attempts += 1;
            let exhausted = state.restart_attempts > self.cfg.max_restart_attempts;
            state.status = CameraStatus::Error;
            state.next_retry_at = if exhausted {
                None
            } else {
                let backoff = RESTART_BACKOFF_BASE
                    .saturating_mul(1 << (state.restart_attempts - 1).min(5))
                    .min(RESTART_BACKOFF_CAP);
                Some(Instant::now() + backoff)
            };
            (state.pipeline.take(), exhausted)
        };
        if let Some(p) = pipeline {
            let _ = tokio::task::spawn_blocking(move || p.stop()).await;
        }
        if exhausted {
            error!(camera = %slot.spec.id, "Restart attempts exhausted, camera stays errored");
        }
    }

    /// One pass over every enabled camera. Disabled cameras are never
    /// probed, opened or monitored.
    pub(crate) async fn health_cycle(&self) {
        for slot in self.slots.iter().filter(|s| s.spec.enabled) {
            let slot = Arc::clone(slot);
            self.check_camera(&slot).await;
        }
    }

    async fn check_camera(&self, slot: &Arc<CameraSlot>) {
        // Manually stopped cameras are left alone until started again.
        if slot.state.lock().status == CameraStatus::Idle {
            return;
        }

        let probe = self.probe_camera(slot).await;
        let action = {
            let mut state = slot.state.lock();
            state.last_probe = Some(Utc::now());
            if probe.has_signal {
                state.detected = Some(probe.resolution());
                state.signal_misses = 0;
            } else {
                state.signal_misses += 1;
            }
            let observation = state.pipeline.as_ref().map(|p| PipelineObservation {
                working: p.working_resolution(),
                buffer_age_secs: p.seconds_since_last_buffer(),
                pipeline_age_secs: p.age_secs(),
            });
            decide_action(state.signal_misses, observation.as_ref(), &probe, &self.cfg)
        };

        match action {
            HealthAction::None => {}
            HealthAction::TearDownNoSignal => {
                info!(camera = %slot.spec.id, "Signal lost, tearing ingest down");
                let pipeline = {
                    let mut state = slot.state.lock();
                    state.status = CameraStatus::NoSignal;
                    state.next_retry_at = None;
                    state.pipeline.take()
                };
                if let Some(p) = pipeline {
                    let _ = tokio::task::spawn_blocking(move || p.stop()).await;
                }
            }
            HealthAction::Restart(reason) => {
                info!(camera = %slot.spec.id, reason = %reason, "Rebuilding ingest pipeline");
                match reason {
                    // Staleness counts against the retry budget; the restart
                    // itself happens on a later tick once the backoff is due.
                    RestartReason::Stale => {
                        self.fail_pipeline(slot, "no frames within staleness threshold".into())
                            .await;
                    }
                    RestartReason::ResolutionDrift => {
                        let pipeline = slot.state.lock().pipeline.take();
                        if let Some(p) = pipeline {
                            let _ = tokio::task::spawn_blocking(move || p.stop()).await;
                        }
                        if let Err(e) = self.start(&slot.spec.id).await {
                            warn!(camera = %slot.spec.id, error = %e, "Rebuild failed");
                        }
                    }
                }
            }
            HealthAction::TryStart => {
                self.try_scheduled_restart(slot).await;
            }
        }
    }

    async fn try_scheduled_restart(&self, slot: &Arc<CameraSlot>) {
        let due = {
            let state = slot.state.lock();
            if state.restart_attempts > self.cfg.max_restart_attempts {
                false
            } else {
                state.next_retry_at.map(|t| Instant::now() >= t).unwrap_or(true)
            }
        };
        if due {
            if let Err(e) = self.start(&slot.spec.id).await {
                warn!(camera = %slot.spec.id, error = %e, "Scheduled restart failed");
            }
        }
    }
}

/// Why a running pipeline is being replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestartReason {
    ResolutionDrift,
    Stale,
}

impl std::fmt::Display for RestartReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartReason::ResolutionDrift => write!(f, "resolution drift"),
            RestartReason::Stale => write!(f, "stale output"),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum HealthAction {
    None,
    TearDownNoSignal,
    Restart(RestartReason),
    TryStart,
}

/// What the supervisor observed about a running pipeline this pass.
#[derive(Debug, Clone, Copy)]
struct PipelineObservation {
    working: (u32, u32),
    buffer_age_secs: Option<u64>,
    pipeline_age_secs: u64,
}

/// Pure decision for one health pass; all state mutation stays in the
/// caller.
fn decide_action(
    signal_misses: u32,
    pipeline: Option<&PipelineObservation>,
    probe: &ProbeResult,
    cfg: &IngestConfig,
) -> HealthAction {
    if !probe.has_signal {
        if pipeline.is_some() && signal_misses >= cfg.signal_loss_cycles {
            return HealthAction::TearDownNoSignal;
        }
        return HealthAction::None;
    }

    match pipeline {
        None => HealthAction::TryStart,
        Some(observation) => {
            if observation.working != probe.resolution() {
                return HealthAction::Restart(RestartReason::ResolutionDrift);
            }
            let stale = match observation.buffer_age_secs {
                Some(age) => age >= cfg.stale_after_secs,
                // Nothing produced yet: stale once the pipeline has had a
                // full staleness window to warm up.
                None => observation.pipeline_age_secs >= cfg.stale_after_secs,
            };
            if stale {
                HealthAction::Restart(RestartReason::Stale)
            } else {
                HealthAction::None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediamtxConfig;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;

    /// Prober that records every probed device and returns scripted results.
    struct MockProber {
        probed: StdMutex<Vec<String>>,
        result: ProbeResult,
    }

    impl MockProber {
        fn no_signal() -> Arc<Self> {
            Arc::new(MockProber { probed: StdMutex::new(Vec::new()), result: ProbeResult::NO_SIGNAL })
        }

        fn probed_devices(&self) -> Vec<String> {
            self.probed.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl SignalProber for MockProber {
        async fn probe(&self, device: &Path) -> ProbeResult {
            self.probed.lock().unwrap().push(device.display().to_string());
            self.result
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

    fn manager(prober: Arc<MockProber>, cameras: Vec<CameraSpec>) -> Arc<IngestManager> {
        IngestManager::new(
            cameras,
            IngestConfig::default(),
            Platform::default(),
            Arc::new(Mediamtx::new(MediamtxConfig::default())),
            prober,
        )
    }

    #[tokio::test]
    async fn disabled_cameras_are_never_probed() {
        let prober = MockProber::no_signal();
        let mgr = manager(
            Arc::clone(&prober),
            vec![cam("cam0", true), cam("cam1", false), cam("cam2", true), cam("cam3", false)],
        );
        mgr.start_all().await;

        // Two full health cycles, per the supervision contract.
        mgr.health_cycle().await;
        mgr.health_cycle().await;

        let probed = prober.probed_devices();
        assert!(!probed.is_empty());
        assert!(probed.iter().all(|d| d == "/dev/video-cam0" || d == "/dev/video-cam2"));
    }

    #[tokio::test]
    async fn start_without_signal_reports_no_signal() {
        let prober = MockProber::no_signal();
        let mgr = manager(Arc::clone(&prober), vec![cam("cam0", true)]);

        let snap = mgr.start("cam0").await.unwrap();
        assert_eq!(snap.status, CameraStatus::NoSignal);
        assert!(!snap.streaming);
        assert!(!mgr.is_streaming("cam0"));
    }

    #[tokio::test]
    async fn start_on_disabled_camera_is_rejected_without_touching_it() {
        let prober = MockProber::no_signal();
        let mgr = manager(Arc::clone(&prober), vec![cam("cam1", false)]);

        let err = mgr.start("cam1").await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
        assert!(prober.probed_devices().is_empty());
    }

    #[tokio::test]
    async fn unknown_camera_is_a_structured_error() {
        let prober = MockProber::no_signal();
        let mgr = manager(prober, vec![cam("cam0", true)]);
        let err = mgr.start("nope").await.unwrap_err();
        assert!(matches!(err, Error::UnknownId { kind: "camera", .. }));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let prober = MockProber::no_signal();
        let mgr = manager(prober, vec![cam("cam0", true)]);
        mgr.stop("cam0").await.unwrap();
        let snap = mgr.stop("cam0").await.unwrap();
        assert_eq!(snap.status, CameraStatus::Idle);
    }

    #[tokio::test]
    async fn h265_preference_publishes_h264_when_webrtc_set_excludes_it() {
        let prober = MockProber::no_signal();
        let mut camera = cam("cam0", true);
        camera.codec = Codec::H265;
        // Default MediaMTX config accepts H.264 only over WebRTC.
        let mgr = manager(prober, vec![camera]);
        assert_eq!(mgr.published_codec("cam0").unwrap(), Codec::H264);
    }

    #[tokio::test]
    async fn h265_preference_survives_when_webrtc_set_allows_it() {
        let prober = MockProber::no_signal();
        let mut camera = cam("cam0", true);
        camera.codec = Codec::H265;
        let mut mtx_cfg = MediamtxConfig::default();
        mtx_cfg.webrtc_codecs = vec![Codec::H264, Codec::H265];
        let mgr = IngestManager::new(
            vec![camera],
            IngestConfig::default(),
            Platform::default(),
            Arc::new(Mediamtx::new(mtx_cfg)),
            prober,
        );
        assert_eq!(mgr.published_codec("cam0").unwrap(), Codec::H265);
    }

    #[tokio::test]
    async fn status_lists_all_cameras_in_config_order() {
        let prober = MockProber::no_signal();
        let mgr = manager(prober, vec![cam("cam0", true), cam("cam1", false)]);
        let status = mgr.status();
        assert_eq!(status.cameras.len(), 2);
        assert_eq!(status.cameras[0].id, "cam0");
        assert_eq!(status.cameras[1].id, "cam1");
        assert!(!status.cameras[1].enabled);
    }

    mod health_decisions {
        use super::*;

        fn signal(w: u32, h: u32) -> ProbeResult {
            ProbeResult { width: w, height: h, has_signal: true }
        }

        fn healthy_observation() -> PipelineObservation {
            PipelineObservation { working: (1920, 1080), buffer_age_secs: Some(1), pipeline_age_secs: 120 }
        }

        #[test]
        fn unchanged_resolution_never_restarts() {
            let cfg = IngestConfig::default();
            let obs = healthy_observation();
            for _cycle in 0..5 {
                let action = decide_action(0, Some(&obs), &signal(1920, 1080), &cfg);
                assert_eq!(action, HealthAction::None);
            }
        }

        #[test]
        fn changed_resolution_restarts_exactly_as_drift() {
            let cfg = IngestConfig::default();
            let obs = healthy_observation();
            let action = decide_action(0, Some(&obs), &signal(1280, 720), &cfg);
            assert_eq!(action, HealthAction::Restart(RestartReason::ResolutionDrift));
        }

        #[test]
        fn signal_loss_tears_down_only_after_two_cycles() {
            let cfg = IngestConfig::default();
            let obs = healthy_observation();
            assert_eq!(
                decide_action(1, Some(&obs), &ProbeResult::NO_SIGNAL, &cfg),
                HealthAction::None
            );
            assert_eq!(
                decide_action(2, Some(&obs), &ProbeResult::NO_SIGNAL, &cfg),
                HealthAction::TearDownNoSignal
            );
        }

        #[test]
        fn signal_loss_without_pipeline_keeps_probing_quietly() {
            let cfg = IngestConfig::default();
            assert_eq!(decide_action(9, None, &ProbeResult::NO_SIGNAL, &cfg), HealthAction::None);
        }

        #[test]
        fn stale_output_restarts() {
            let cfg = IngestConfig::default();
            let obs = PipelineObservation {
                buffer_age_secs: Some(cfg.stale_after_secs),
                ..healthy_observation()
            };
            assert_eq!(
                decide_action(0, Some(&obs), &signal(1920, 1080), &cfg),
                HealthAction::Restart(RestartReason::Stale)
            );
        }

        #[test]
        fn silent_pipeline_gets_a_warmup_window() {
            let cfg = IngestConfig::default();
            let young = PipelineObservation {
                buffer_age_secs: None,
                pipeline_age_secs: cfg.stale_after_secs - 1,
                ..healthy_observation()
            };
            assert_eq!(decide_action(0, Some(&young), &signal(1920, 1080), &cfg), HealthAction::None);

            let old = PipelineObservation {
                buffer_age_secs: None,
                pipeline_age_secs: cfg.stale_after_secs,
                ..healthy_observation()
            };
            assert_eq!(
                decide_action(0, Some(&old), &signal(1920, 1080), &cfg),
                HealthAction::Restart(RestartReason::Stale)
            );
        }

        #[test]
        fn signal_present_without_pipeline_tries_to_start() {
            let cfg = IngestConfig::default();
            assert_eq!(decide_action(0, None, &signal(1920, 1080), &cfg), HealthAction::TryStart);
        }
    }
}
