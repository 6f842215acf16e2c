//! Browser-rendered graphics outputs.
//!
//! Two fixed outputs, `slides` and `slides_overlay`, each an independent
//! HTML-to-video pipeline published to the media server. They run
//! simultaneously; stopping one never touches the other.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::RevealConfig;
use crate::error::{Error, Result};
use crate::ingest::{BusEvent, BusEventKind, IngestPipeline};
use crate::media::builder;
use crate::media::mediamtx::Mediamtx;
use crate::mixer::scene::{SLIDES, SLIDES_OVERLAY};
use crate::Platform;

/// The only two output ids.
pub const OUTPUT_IDS: [&str; 2] = [SLIDES, SLIDES_OVERLAY];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevealStatus {
    Idle,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevealSnapshot {
    pub id: String,
    pub status: RevealStatus,
    pub presentation_id: Option<String>,
    pub url: Option<String>,
    pub mediamtx_path: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevealReport {
    pub enabled: bool,
    pub outputs: Vec<RevealSnapshot>,
    pub updated_at: String,
}

struct RevealState {
    status: RevealStatus,
    presentation: Option<String>,
    url: Option<String>,
    pipeline: Option<IngestPipeline>,
    last_error: Option<String>,
    generation: u64,
}

struct RevealSlot {
    id: &'static str,
    state: Mutex<RevealState>,
}

pub struct RevealManager {
    cfg: RevealConfig,
    platform: Platform,
    mediamtx: Arc<Mediamtx>,
    outputs: Vec<Arc<RevealSlot>>,
    bus_tx: UnboundedSender<BusEvent>,
    bus_rx: Mutex<Option<UnboundedReceiver<BusEvent>>>,
}

const STATE_CHANGE_TIMEOUT: Duration = Duration::from_secs(10);

impl RevealManager {
    pub fn new(cfg: RevealConfig, platform: Platform, mediamtx: Arc<Mediamtx>) -> Arc<Self> {
        let (bus_tx, bus_rx) = mpsc::unbounded_channel();
        let outputs = OUTPUT_IDS
            .iter()
            .map(|&id| {
                Arc::new(RevealSlot {
                    id,
                    state: Mutex::new(RevealState {
                        status: RevealStatus::Idle,
                        presentation: None,
                        url: None,
                        pipeline: None,
                        last_error: None,
                        generation: 0,
                    }),
                })
            })
            .collect();
        Arc::new(RevealManager { cfg, platform, mediamtx, outputs, bus_tx, bus_rx: Mutex::new(Some(bus_rx)) })
    }

    fn slot(&self, output_id: &str) -> Result<&Arc<RevealSlot>> {
        self.outputs
            .iter()
            .find(|s| s.id == output_id)
            .ok_or_else(|| Error::UnknownId { kind: "reveal output", id: output_id.to_string() })
    }

    /// The mixer's liveness check for `slides`/`slides_overlay` sources.
    pub fn is_running(&self, output_id: &str) -> bool {
        self.slot(output_id)
            .map(|s| s.state.lock().status == RevealStatus::Running)
            .unwrap_or(false)
    }

    /// Start (or retarget) one output at a presentation URL.
    pub async fn start(&self, output_id: &str, presentation_id: &str, url: &str) -> Result<RevealSnapshot> {
        if !self.cfg.enabled {
            return Err(Error::InvalidRequest("reveal outputs are disabled".into()));
        }
        let slot = Arc::clone(self.slot(output_id)?);

        let already_running = {
            let state = slot.state.lock();
            state.status == RevealStatus::Running && state.url.as_deref() == Some(url)
        };
        if already_running {
            return Ok(self.snapshot_of(&slot));
        }

        // Retargeting replaces the pipeline; never two publishers per path.
        self.stop(output_id).await?;

        let generation = {
            let mut state = slot.state.lock();
            state.status = RevealStatus::Starting;
            state.presentation = Some(presentation_id.to_string());
            state.url = Some(url.to_string());
            state.generation
        };

        let launch = builder::reveal_publish(
            &self.cfg,
            url,
            &self.mediamtx.publish_url(output_id),
            self.platform,
        );
        let name = format!("reveal_{output_id}");
        let bus_tx = self.bus_tx.clone();
        let size = (self.cfg.width, self.cfg.height);

        let built = tokio::task::spawn_blocking(move || {
            let p = IngestPipeline::new(&name, &launch, size, bus_tx)?;
            p.start()?;
            Ok::<_, Error>(p)
        })
        .await
        .map_err(|e| Error::pipeline_construction(output_id, e))?;

        let pipeline = match built {
            Ok(p) => p,
            Err(e) => {
                let mut state = slot.state.lock();
                state.status = RevealStatus::Idle;
                state.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        if let Err(e) = crate::media::wait_for_state(
            pipeline.pipeline(),
            gstreamer::State::Playing,
            STATE_CHANGE_TIMEOUT,
        )
        .await
        {
            pipeline.stop();
            let mut state = slot.state.lock();
            state.status = RevealStatus::Idle;
            state.last_error = Some(e.to_string());
            return Err(e);
        }

        {
            let mut state = slot.state.lock();
            if state.generation != generation {
                drop(state);
                pipeline.stop();
                return Ok(self.snapshot_of(&slot));
            }
            state.pipeline = Some(pipeline);
            state.status = RevealStatus::Running;
            state.last_error = None;
        }
        info!(output = output_id, presentation = presentation_id, "Reveal output running");
        Ok(self.snapshot_of(&slot))
    }

    /// Stop one output. Idempotent; the sibling output is untouched.
    pub async fn stop(&self, output_id: &str) -> Result<RevealSnapshot> {
        let slot = Arc::clone(self.slot(output_id)?);
        let pipeline = {
            let mut state = slot.state.lock();
            state.generation += 1;
            match state.pipeline.take() {
                Some(p) => {
                    state.status = RevealStatus::Stopping;
                    Some(p)
                }
                None => {
                    state.status = RevealStatus::Idle;
                    None
                }
            }
        };
        let Some(pipeline) = pipeline else {
            return Ok(self.snapshot_of(&slot));
        };

        tokio::task::spawn_blocking(move || pipeline.stop())
            .await
            .map_err(|e| Error::pipeline_runtime(output_id, e))?;

        let mut state = slot.state.lock();
        state.status = RevealStatus::Idle;
        drop(state);
        info!(output = output_id, "Reveal output stopped");
        Ok(self.snapshot_of(&slot))
    }

    pub async fn stop_all(&self) {
        for id in OUTPUT_IDS {
            if let Err(e) = self.stop(id).await {
                warn!(output = id, error = %e, "Reveal stop failed");
            }
        }
    }

    pub fn status(&self) -> RevealReport {
        RevealReport {
            enabled: self.cfg.enabled,
            outputs: self.outputs.iter().map(|s| self.snapshot_of(s)).collect(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    fn snapshot_of(&self, slot: &RevealSlot) -> RevealSnapshot {
        let state = slot.state.lock();
        RevealSnapshot {
            id: slot.id.to_string(),
            status: state.status,
            presentation_id: state.presentation.clone(),
            url: state.url.clone(),
            mediamtx_path: slot.id.to_string(),
            last_error: state.last_error.clone(),
        }
    }

    /// Fault watcher: a crashed renderer drops its output back to idle.
    pub async fn run_supervisor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut bus_rx = self
            .bus_rx
            .lock()
            .take()
            .expect("reveal supervisor started twice");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(event) = bus_rx.recv() => {
                    let Some(output_id) = event.source.strip_prefix("reveal_").map(str::to_owned) else {
                        continue;
                    };
                    let reason = match event.kind {
                        BusEventKind::Error(e) => e,
                        BusEventKind::Eos => "renderer ended the stream".to_string(),
                    };
                    warn!(output = %output_id, reason = %reason, "Reveal pipeline fault");
                    if let Err(e) = self.stop(&output_id).await {
                        warn!(output = %output_id, error = %e, "Fault cleanup failed");
                    }
                    if let Ok(slot) = self.slot(&output_id) {
                        slot.state.lock().last_error = Some(reason);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediamtxConfig;

    fn manager(enabled: bool) -> Arc<RevealManager> {
        let cfg = RevealConfig { enabled, ..Default::default() };
        RevealManager::new(cfg, Platform::default(), Arc::new(Mediamtx::new(MediamtxConfig::default())))
    }

    #[tokio::test]
    async fn status_lists_exactly_the_two_fixed_outputs() {
        let mgr = manager(true);
        let report = mgr.status();
        let ids: Vec<&str> = report.outputs.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec![SLIDES, SLIDES_OVERLAY]);
        assert!(report.outputs.iter().all(|o| o.status == RevealStatus::Idle));
        assert_eq!(report.outputs[0].mediamtx_path, SLIDES);
        assert_eq!(report.outputs[1].mediamtx_path, SLIDES_OVERLAY);
    }

    #[tokio::test]
    async fn unknown_output_is_rejected() {
        let mgr = manager(true);
        assert!(matches!(
            mgr.stop("slides_extra").await.unwrap_err(),
            Error::UnknownId { kind: "reveal output", .. }
        ));
    }

    #[tokio::test]
    async fn disabled_reveal_refuses_start() {
        let mgr = manager(false);
        let err = mgr.start(SLIDES, "deck", "http://127.0.0.1/deck").await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn stop_on_idle_output_is_idempotent() {
        let mgr = manager(true);
        let a = mgr.stop(SLIDES).await.unwrap();
        let b = mgr.stop(SLIDES).await.unwrap();
        assert_eq!(a.status, RevealStatus::Idle);
        assert_eq!(b.status, RevealStatus::Idle);
        assert!(!mgr.is_running(SLIDES));
    }
}
