//! Live compositor.
//!
//! One pipeline multiplexes published camera streams and the two graphics
//! outputs into a single H.264 program stream re-published to the media
//! server. The pipeline's source set is the union of the sources referenced
//! by the program and preview scenes, so scene changes inside that superset
//! are pure pad-property updates; only growing the superset rebuilds.

pub mod overlay;
pub mod scene;
pub mod transition;

pub use overlay::OverlayManager;
pub use scene::{Scene, SceneStore};
pub use transition::TransitionKind;

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_video as gst_video;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{CameraSpec, Codec, MixerConfig};
use crate::error::{Error, Result};
use crate::graphics::RevealManager;
use crate::ingest::{BusEvent, BusEventKind, IngestManager};
use crate::media::builder;
use crate::media::mediamtx::Mediamtx;
use crate::mixer::scene::{Crop, SLIDES, SLIDES_OVERLAY};
use crate::mixer::transition::{lerp, placement_for, PadPlacement};
use crate::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Null,
    Paused,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MixerHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// How the last accepted scene change was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneChange {
    PadUpdate,
    Rebuild,
    CutFallbackRebuild,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionInfo {
    pub kind: TransitionKind,
    pub duration_ms: u64,
    pub target: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MixerStatus {
    pub enabled: bool,
    pub state: PipelineState,
    pub program: Option<String>,
    pub preview: Option<String>,
    pub transition: Option<TransitionInfo>,
    pub health: MixerHealth,
    pub last_change: Option<SceneChange>,
    pub last_error: Option<String>,
    pub recording_enabled: bool,
    pub media_server_path: String,
    pub updated_at: String,
}

struct SourceBranch {
    bin: gst::Bin,
    pad: gst::Pad,
    applied: PadPlacement,
    alive: bool,
}

/// The compositor graph and its per-source branches.
struct MixerPipeline {
    pipeline: gst::Pipeline,
    compositor: gst::Element,
    branches: HashMap<String, SourceBranch>,
    out: (u32, u32),
    last_buffer: Arc<Mutex<Option<Instant>>>,
    built_at: Instant,
}

impl MixerPipeline {
    /// Build the full graph for `sources`. Blocking; run on the pool.
    fn build(
        cfg: &MixerConfig,
        platform: Platform,
        sources: &[(String, Codec)],
        overlays: Arc<OverlayManager>,
        mediamtx: &Mediamtx,
        bus_tx: UnboundedSender<BusEvent>,
    ) -> Result<Self> {
        crate::media::ensure_gst()?;
        let name = "mixer";
        let pipeline = gst::Pipeline::builder().name(name).build();
        let out = (cfg.output_width, cfg.output_height);

        let compositor = gst::ElementFactory::make("compositor")
            .name("mix")
            .property_from_str("background", "black")
            .build()
            .map_err(|e| Error::pipeline_construction(name, e))?;

        let caps = gst::Caps::builder("video/x-raw")
            .field("width", out.0 as i32)
            .field("height", out.1 as i32)
            .field("framerate", gst::Fraction::new(cfg.framerate as i32, 1))
            .build();
        let capsfilter = gst::ElementFactory::make("capsfilter")
            .property("caps", &caps)
            .build()
            .map_err(|e| Error::pipeline_construction(name, e))?;

        let overlaycomp = gst::ElementFactory::make("overlaycomposition")
            .build()
            .map_err(|e| Error::pipeline_construction(name, e))?;
        Self::connect_overlay(&overlaycomp, overlays);

        let tail = gst::parse::bin_from_description(
            &builder::mixer_publish_tail(cfg, &mediamtx.publish_url(&cfg.media_server_path), platform),
            true,
        )
        .map_err(|e| Error::pipeline_construction(name, e))?;

        pipeline
            .add_many([&compositor, &capsfilter, &overlaycomp, tail.upcast_ref()])
            .map_err(|e| Error::pipeline_construction(name, e))?;
        gst::Element::link_many([&compositor, &capsfilter, &overlaycomp, tail.upcast_ref()])
            .map_err(|e| Error::pipeline_construction(name, e))?;

        // Program-output liveness is observed right before the publish sink.
        let last_buffer: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        let progress = pipeline
            .by_name(builder::PROGRESS_ELEMENT)
            .and_then(|e| e.static_pad("src"))
            .ok_or_else(|| Error::pipeline_construction(name, "progress element missing"))?;
        {
            let last_buffer = Arc::clone(&last_buffer);
            progress.add_probe(gst::PadProbeType::BUFFER, move |_, _| {
                *last_buffer.lock() = Some(Instant::now());
                gst::PadProbeReturn::Ok
            });
        }

        let bus = pipeline
            .bus()
            .ok_or_else(|| Error::pipeline_construction(name, "pipeline has no bus"))?;
        bus.set_sync_handler(move |_, msg| {
            if let gst::MessageView::Error(err) = msg.view() {
                let path = err.src().map(|s| s.path_string().to_string()).unwrap_or_default();
                let _ = bus_tx.send(BusEvent {
                    source: format!("mixer:{path}"),
                    kind: BusEventKind::Error(err.error().to_string()),
                });
            }
            gst::BusSyncReply::Pass
        });

        let mut built = MixerPipeline {
            pipeline,
            compositor,
            branches: HashMap::new(),
            out,
            last_buffer,
            built_at: Instant::now(),
        };
        for (source_id, codec) in sources {
            built.add_branch(source_id, *codec, platform, mediamtx)?;
        }
        Ok(built)
    }

    fn connect_overlay(overlaycomp: &gst::Element, overlays: Arc<OverlayManager>) {
        let video_info: Arc<Mutex<Option<gst_video::VideoInfo>>> = Arc::new(Mutex::new(None));

        let info_for_caps = Arc::clone(&video_info);
        overlaycomp.connect("caps-changed", false, move |values| {
            if let Ok(caps) = values[1].get::<gst::Caps>() {
                *info_for_caps.lock() = gst_video::VideoInfo::from_caps(&caps).ok();
            }
            None
        });

        overlaycomp.connect("draw", false, move |values| {
            let sample = values[1].get::<gst::Sample>().ok()?;
            let info = video_info.lock().clone()?;
            let pts = sample.buffer().and_then(|b| b.pts())?;
            let composition = overlays.draw(pts, info.width(), info.height())?;
            Some(composition.to_value())
        });
    }

    /// Subscribe a source and register its compositor pad, parked hidden.
    fn add_branch(
        &mut self,
        source_id: &str,
        codec: Codec,
        platform: Platform,
        mediamtx: &Mediamtx,
    ) -> Result<()> {
        let desc = builder::mixer_subscribe(&mediamtx.subscribe_url(source_id), codec, platform);
        let bin = gst::parse::bin_from_description(&desc, true)
            .map_err(|e| Error::pipeline_construction(source_id, e))?;
        bin.set_property("name", format!("src_{source_id}"));

        self.pipeline
            .add(&bin)
            .map_err(|e| Error::pipeline_construction(source_id, e))?;
        let src_pad = bin
            .static_pad("src")
            .ok_or_else(|| Error::pipeline_construction(source_id, "branch bin has no src pad"))?;
        let pad = self
            .compositor
            .request_pad_simple("sink_%u")
            .ok_or_else(|| Error::pipeline_construction(source_id, "compositor refused a pad"))?;
        src_pad
            .link(&pad)
            .map_err(|e| Error::pipeline_construction(source_id, format!("pad link: {e:?}")))?;
        bin.sync_state_with_parent()
            .map_err(|e| Error::pipeline_construction(source_id, e))?;

        let hidden = PadPlacement::hidden(self.out);
        apply_to_pad(&pad, &hidden);
        self.branches.insert(
            source_id.to_string(),
            SourceBranch { bin, pad, applied: hidden, alive: true },
        );
        debug!(source = source_id, "Mixer branch added");
        Ok(())
    }

    fn has_sources(&self, wanted: &BTreeSet<String>) -> bool {
        wanted.iter().all(|s| self.branches.contains_key(s))
    }

    /// Apply a scene as one batch of pad updates; sources outside the scene
    /// are parked transparent.
    fn apply_scene(&mut self, scene: &Scene) {
        let placements = scene_placements(scene, self.out);
        for (source_id, branch) in self.branches.iter_mut() {
            let placement = placements
                .get(source_id.as_str())
                .copied()
                .unwrap_or_else(|| PadPlacement::hidden(self.out));
            apply_to_pad(&branch.pad, &placement);
            apply_crop(&branch.bin, scene.slot_for(source_id).and_then(|s| s.crop));
            branch.applied = placement;
        }
    }

    fn start(&self) -> Result<()> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| Error::pipeline_runtime("mixer", e))?;
        Ok(())
    }

    fn stop(&self) {
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
        crate::media::force_null(&self.pipeline);
    }

    fn seconds_since_last_buffer(&self) -> u64 {
        self.last_buffer
            .lock()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or_else(|| self.built_at.elapsed().as_secs())
    }
}

impl Drop for MixerPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn apply_to_pad(pad: &gst::Pad, p: &PadPlacement) {
    pad.set_property("xpos", p.xpos);
    pad.set_property("ypos", p.ypos);
    pad.set_property("width", p.width);
    pad.set_property("height", p.height);
    pad.set_property("alpha", p.alpha);
    pad.set_property("zorder", p.zorder);
}

fn apply_crop(bin: &gst::Bin, crop: Option<Crop>) {
    if let Some(el) = bin.by_name(builder::CROP_ELEMENT) {
        let c = crop.unwrap_or_default();
        el.set_property("left", c.left as i32);
        el.set_property("right", c.right as i32);
        el.set_property("top", c.top as i32);
        el.set_property("bottom", c.bottom as i32);
    }
}

/// Pixel placements for a scene, with the overlay source forced on top.
fn scene_placements(scene: &Scene, out: (u32, u32)) -> HashMap<&str, PadPlacement> {
    let mut placements: HashMap<&str, PadPlacement> = scene
        .slots
        .iter()
        .map(|slot| (slot.source.as_str(), placement_for(slot, out)))
        .collect();
    if placements.contains_key(SLIDES_OVERLAY) {
        let top = placements.values().map(|p| p.zorder).max().unwrap_or(0) + 1;
        if let Some(p) = placements.get_mut(SLIDES_OVERLAY) {
            p.zorder = top;
        }
    }
    placements
}

/// Union of sources referenced by the program and preview scenes.
fn superset_of(program: &Scene, preview: Option<&Scene>) -> BTreeSet<String> {
    let mut set: BTreeSet<String> = program.sources().iter().map(|s| s.to_string()).collect();
    if let Some(preview) = preview {
        set.extend(preview.sources().iter().map(|s| s.to_string()));
    }
    set
}

struct ActiveTransition {
    kind: TransitionKind,
    target: String,
    abort: Arc<AtomicBool>,
}

struct MixerInner {
    pipeline: Option<MixerPipeline>,
    state: PipelineState,
    program: Option<String>,
    preview: Option<String>,
    transition: Option<ActiveTransition>,
    health: MixerHealth,
    last_change: Option<SceneChange>,
    last_error: Option<String>,
}

pub struct MixerCore {
    cfg: MixerConfig,
    platform: Platform,
    camera_codecs: HashMap<String, Codec>,
    scenes: Arc<SceneStore>,
    ingest: Arc<IngestManager>,
    reveal: Arc<RevealManager>,
    overlays: Arc<OverlayManager>,
    mediamtx: Arc<Mediamtx>,
    /// Shared with transition tasks; everything long-running copies handles
    /// out and never holds this across an await.
    inner: Arc<Mutex<MixerInner>>,
    bus_tx: UnboundedSender<BusEvent>,
    bus_rx: Mutex<Option<UnboundedReceiver<BusEvent>>>,
}

const START_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TICK: Duration = Duration::from_secs(1);

impl MixerCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: MixerConfig,
        platform: Platform,
        cameras: &[CameraSpec],
        scenes: Arc<SceneStore>,
        ingest: Arc<IngestManager>,
        reveal: Arc<RevealManager>,
        overlays: Arc<OverlayManager>,
        mediamtx: Arc<Mediamtx>,
    ) -> Arc<Self> {
        let (bus_tx, bus_rx) = mpsc::unbounded_channel();
        // Subscribe branches must decode what ingest actually publishes,
        // which the media server's WebRTC set may have overridden.
        let camera_codecs = cameras
            .iter()
            .filter(|c| c.enabled)
            .map(|c| {
                let codec = if mediamtx.supports_codec(c.codec) { c.codec } else { Codec::H264 };
                (c.id.clone(), codec)
            })
            .collect();
        Arc::new(MixerCore {
            cfg,
            platform,
            camera_codecs,
            scenes,
            ingest,
            reveal,
            overlays,
            mediamtx,
            inner: Arc::new(Mutex::new(MixerInner {
                pipeline: None,
                state: PipelineState::Null,
                program: None,
                preview: None,
                transition: None,
                health: MixerHealth::Healthy,
                last_change: None,
                last_error: None,
            })),
            bus_tx,
            bus_rx: Mutex::new(Some(bus_rx)),
        })
    }

    /// Every source a scene references must be live before it may reach the
    /// compositor; missing sources are named, never silently substituted.
    pub fn validate_sources(&self, scene: &Scene) -> Result<()> {
        let mut missing = Vec::new();
        for source in scene.sources() {
            let live = if source == SLIDES || source == SLIDES_OVERLAY {
                self.reveal.is_running(source)
            } else if self.camera_codecs.contains_key(source) {
                self.ingest.is_streaming(source)
            } else {
                false
            };
            if !live {
                missing.push(source.to_string());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::SourcesUnavailable { missing })
        }
    }

    fn source_codec(&self, source: &str) -> Codec {
        // Reveal outputs always publish H.264.
        self.camera_codecs.get(source).copied().unwrap_or(Codec::H264)
    }

    fn sources_with_codecs(&self, superset: &BTreeSet<String>) -> Vec<(String, Codec)> {
        superset.iter().map(|s| (s.clone(), self.source_codec(s))).collect()
    }

    /// Start the composition pipeline on the current (or first) scene.
    pub async fn start(&self) -> Result<MixerStatus> {
        if !self.cfg.enabled {
            return Err(Error::InvalidRequest("mixer is disabled".into()));
        }
        if self.inner.lock().pipeline.is_some() {
            debug!("Mixer already running");
            return Ok(self.status());
        }

        let program_id = {
            let inner = self.inner.lock();
            inner
                .program
                .clone()
                .or_else(|| inner.preview.clone())
                .or_else(|| self.scenes.first_id())
                .ok_or_else(|| Error::InvalidRequest("no scenes available".into()))?
        };
        let program = self.scenes.get(&program_id)?;
        self.validate_sources(&program)?;

        // Preview sources join the superset only while they are live.
        let preview_scene = {
            let preview_id = self.inner.lock().preview.clone();
            preview_id
                .and_then(|id| self.scenes.get(&id).ok())
                .filter(|s| self.validate_sources(s).is_ok())
        };
        let superset = superset_of(&program, preview_scene.as_deref());

        let pipeline = self.build_pipeline(&superset, &program).await?;
        if let Err(e) =
            crate::media::wait_for_state(&pipeline.pipeline, gst::State::Playing, START_TIMEOUT).await
        {
            pipeline.stop();
            self.inner.lock().last_error = Some(e.to_string());
            return Err(e);
        }

        {
            let mut inner = self.inner.lock();
            inner.pipeline = Some(pipeline);
            inner.state = PipelineState::Playing;
            inner.program = Some(program_id.clone());
            inner.health = MixerHealth::Healthy;
            inner.last_error = None;
        }
        info!(program = %program_id, "Mixer playing");
        Ok(self.status())
    }

    async fn build_pipeline(&self, superset: &BTreeSet<String>, program: &Scene) -> Result<MixerPipeline> {
        let cfg = self.cfg.clone();
        let platform = self.platform;
        let sources = self.sources_with_codecs(superset);
        let overlays = Arc::clone(&self.overlays);
        let mediamtx = Arc::clone(&self.mediamtx);
        let bus_tx = self.bus_tx.clone();
        let program = program.clone();

        tokio::task::spawn_blocking(move || {
            let mut pipeline = MixerPipeline::build(&cfg, platform, &sources, overlays, &mediamtx, bus_tx)?;
            pipeline.apply_scene(&program);
            pipeline.start()?;
            Ok::<_, Error>(pipeline)
        })
        .await
        .map_err(|e| Error::pipeline_construction("mixer", e))?
    }

    /// Stop and drop the pipeline. Idempotent.
    pub async fn stop(&self) -> Result<MixerStatus> {
        let pipeline = {
            let mut inner = self.inner.lock();
            if let Some(t) = inner.transition.take() {
                t.abort.store(true, Ordering::Relaxed);
            }
            inner.state = PipelineState::Null;
            inner.pipeline.take()
        };
        if let Some(pipeline) = pipeline {
            tokio::task::spawn_blocking(move || drop(pipeline))
                .await
                .map_err(|e| Error::pipeline_runtime("mixer", e))?;
            info!("Mixer stopped");
        }
        Ok(self.status())
    }

    /// Select the preview scene, growing the superset when needed.
    ///
    /// Re-selecting the current preview is a no-op; a preview whose sources
    /// are all inside the running superset costs nothing. Only a preview
    /// referencing a new source rebuilds, which is reported in status.
    pub async fn set_scene(&self, scene_id: &str) -> Result<MixerStatus> {
        let preview = self.scenes.get(scene_id)?;
        self.validate_sources(&preview)?;

        enum Plan {
            Selected,
            Rebuild(Scene),
        }

        let plan = {
            let mut guard = self.inner.lock();
            if guard.transition.is_some() {
                return Err(Error::InvalidRequest("transition in progress".into()));
            }
            let inner = &mut *guard;
            match &inner.pipeline {
                None => {
                    inner.preview = Some(scene_id.to_string());
                    Plan::Selected
                }
                Some(pipeline) => {
                    if inner.preview.as_deref() == Some(scene_id) {
                        Plan::Selected
                    } else {
                        let program_scene =
                            inner.program.as_ref().and_then(|id| self.scenes.get(id).ok());
                        let superset = match &program_scene {
                            Some(p) => superset_of(p, Some(&preview)),
                            None => preview.sources().iter().map(|s| s.to_string()).collect(),
                        };
                        let needs_rebuild = !pipeline.has_sources(&superset);
                        inner.preview = Some(scene_id.to_string());
                        if needs_rebuild {
                            match program_scene {
                                Some(p) => Plan::Rebuild((*p).clone()),
                                None => {
                                    return Err(Error::InvalidRequest(
                                        "mixer running without a program scene".into(),
                                    ))
                                }
                            }
                        } else {
                            inner.last_change = Some(SceneChange::PadUpdate);
                            Plan::Selected
                        }
                    }
                }
            }
        };

        if let Plan::Rebuild(program) = plan {
            self.rebuild(program, Some((*preview).clone()), SceneChange::Rebuild).await?;
        }
        Ok(self.status())
    }

    /// Replace the running pipeline with one covering the new superset.
    /// The only scene change that may briefly interrupt the program stream.
    async fn rebuild(&self, program: Scene, preview: Option<Scene>, change: SceneChange) -> Result<()> {
        info!(program = %program.id, change = ?change, "Rebuilding mixer superset");
        let superset = superset_of(&program, preview.as_ref());
        let new_pipeline = self.build_pipeline(&superset, &program).await?;

        if let Err(e) =
            crate::media::wait_for_state(&new_pipeline.pipeline, gst::State::Playing, START_TIMEOUT).await
        {
            new_pipeline.stop();
            self.inner.lock().last_error = Some(e.to_string());
            return Err(e);
        }

        let old = {
            let mut inner = self.inner.lock();
            let old = inner.pipeline.replace(new_pipeline);
            inner.state = PipelineState::Playing;
            inner.program = Some(program.id.clone());
            inner.last_change = Some(change);
            old
        };
        if let Some(old) = old {
            let _ = tokio::task::spawn_blocking(move || drop(old)).await;
        }
        Ok(())
    }

    /// Promote preview to program with the requested transition.
    pub async fn take(&self, kind: TransitionKind) -> Result<MixerStatus> {
        let (target_id, target_scene) = {
            let inner = self.inner.lock();
            if inner.pipeline.is_none() {
                return Err(Error::InvalidRequest("mixer is not running".into()));
            }
            if inner.transition.is_some() {
                return Err(Error::InvalidRequest("transition in progress".into()));
            }
            let target = inner
                .preview
                .clone()
                .ok_or_else(|| Error::InvalidRequest("no preview scene selected".into()))?;
            (target.clone(), self.scenes.get(&target)?)
        };
        self.validate_sources(&target_scene)?;

        // The superset normally already covers the preview; a take that
        // still references an unknown branch falls back to cut-plus-rebuild
        // and says so in status.
        let in_superset = {
            let inner = self.inner.lock();
            let wanted: BTreeSet<String> =
                target_scene.sources().iter().map(|s| s.to_string()).collect();
            inner
                .pipeline
                .as_ref()
                .map(|p| p.has_sources(&wanted))
                .unwrap_or(false)
        };
        if !in_superset {
            warn!(scene = %target_id, "Take outside superset, falling back to cut with rebuild");
            self.rebuild((*target_scene).clone(), None, SceneChange::CutFallbackRebuild)
                .await?;
            return Ok(self.status());
        }

        match kind {
            TransitionKind::Cut => {
                let mut inner = self.inner.lock();
                if let Some(pipeline) = inner.pipeline.as_mut() {
                    pipeline.apply_scene(&target_scene);
                }
                inner.program = Some(target_id.clone());
                inner.last_change = Some(SceneChange::PadUpdate);
                info!(scene = %target_id, "Cut");
            }
            TransitionKind::Mix | TransitionKind::Auto => {
                let abort = Arc::new(AtomicBool::new(false));
                let steps = {
                    let mut guard = self.inner.lock();
                    let inner = &mut *guard;
                    let pipeline = inner
                        .pipeline
                        .as_mut()
                        .ok_or_else(|| Error::InvalidRequest("mixer is not running".into()))?;
                    let placements = scene_placements(&target_scene, pipeline.out);
                    let out = pipeline.out;
                    let steps: Vec<(gst::Pad, PadPlacement, PadPlacement)> = pipeline
                        .branches
                        .iter_mut()
                        .map(|(id, branch)| {
                            let to = placements
                                .get(id.as_str())
                                .copied()
                                .unwrap_or_else(|| PadPlacement::hidden(out));
                            let from = branch.applied;
                            branch.applied = to;
                            apply_crop(&branch.bin, target_scene.slot_for(id).and_then(|s| s.crop));
                            (branch.pad.clone(), from, to)
                        })
                        .collect();
                    inner.transition = Some(ActiveTransition {
                        kind,
                        target: target_id.clone(),
                        abort: Arc::clone(&abort),
                    });
                    inner.last_change = Some(SceneChange::PadUpdate);
                    steps
                };
                info!(scene = %target_id, kind = ?kind, "Transition started");
                self.spawn_transition(kind, steps, abort, target_id.clone());
            }
        }
        Ok(self.status())
    }

    /// Drive MIX/AUTO as timed pad-property updates on a detached task.
    fn spawn_transition(
        &self,
        kind: TransitionKind,
        steps: Vec<(gst::Pad, PadPlacement, PadPlacement)>,
        abort: Arc<AtomicBool>,
        target: String,
    ) {
        let framerate = self.cfg.framerate.max(1);
        let frames = kind.frames(framerate).max(1);
        let frame_duration = Duration::from_millis(1000 / framerate as u64);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            for i in 1..=frames {
                if abort.load(Ordering::Relaxed) {
                    return;
                }
                let t = f64::from(i) / f64::from(frames);
                for (pad, from, to) in &steps {
                    apply_to_pad(pad, &lerp(from, to, t));
                }
                if i < frames {
                    tokio::time::sleep(frame_duration).await;
                }
            }
            let mut guard = inner.lock();
            guard.program = Some(target);
            guard.transition = None;
        });
    }

    pub fn status(&self) -> MixerStatus {
        let inner = self.inner.lock();
        MixerStatus {
            enabled: self.cfg.enabled,
            state: inner.state,
            program: inner.program.clone(),
            preview: inner.preview.clone(),
            transition: inner.transition.as_ref().map(|t| TransitionInfo {
                kind: t.kind,
                duration_ms: t.kind.duration().as_millis() as u64,
                target: t.target.clone(),
            }),
            health: inner.health,
            last_change: inner.last_change,
            last_error: inner.last_error.clone(),
            recording_enabled: self.cfg.recording_enabled,
            media_server_path: self.cfg.media_server_path.clone(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    /// Health watcher and branch fault handling.
    pub async fn run_supervisor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut bus_rx = self
            .bus_rx
            .lock()
            .take()
            .expect("mixer supervisor started twice");
        let mut ticker = tokio::time::interval(HEALTH_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

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
                    self.health_tick();
                }
            }
        }
        info!("Mixer supervisor exited");
    }

    fn health_tick(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(pipeline) = &inner.pipeline else {
            return;
        };
        if inner.state != PipelineState::Playing {
            return;
        }
        let stalled = pipeline.seconds_since_last_buffer() >= self.cfg.stall_after_secs;
        let degraded = pipeline.branches.values().any(|b| !b.alive);
        inner.health = if stalled {
            MixerHealth::Unhealthy
        } else if degraded {
            MixerHealth::Degraded
        } else {
            MixerHealth::Healthy
        };
    }

    /// A faulted source branch degrades the program instead of killing it;
    /// the branch is rebuilt in place while the rest keeps compositing.
    async fn handle_bus_event(&self, event: BusEvent) {
        let path = match event.source.strip_prefix("mixer:") {
            Some(p) => p.to_string(),
            None => return,
        };
        let reason = match event.kind {
            BusEventKind::Error(e) => e,
            BusEventKind::Eos => return,
        };

        let branch_id = {
            let inner = self.inner.lock();
            inner.pipeline.as_ref().and_then(|p| {
                p.branches
                    .keys()
                    .find(|id| path.contains(&format!("src_{id}")))
                    .cloned()
            })
        };

        match branch_id {
            Some(source_id) => {
                warn!(source = %source_id, reason = %reason, "Mixer source faulted, restarting branch");
                {
                    let mut inner = self.inner.lock();
                    inner.health = MixerHealth::Degraded;
                    if let Some(p) = inner.pipeline.as_mut() {
                        if let Some(b) = p.branches.get_mut(&source_id) {
                            b.alive = false;
                        }
                    }
                }
                self.restart_branch(&source_id).await;
            }
            None => {
                warn!(path = %path, reason = %reason, "Mixer pipeline error");
                let mut inner = self.inner.lock();
                inner.health = MixerHealth::Unhealthy;
                inner.last_error = Some(reason);
            }
        }
    }

    async fn restart_branch(&self, source_id: &str) {
        let handles = {
            let inner = self.inner.lock();
            inner.pipeline.as_ref().and_then(|p| {
                p.branches
                    .get(source_id)
                    .map(|b| (p.pipeline.clone(), b.bin.clone(), b.pad.clone(), b.applied))
            })
        };
        let Some((pipeline, old_bin, pad, applied)) = handles else {
            return;
        };

        let desc = builder::mixer_subscribe(
            &self.mediamtx.subscribe_url(source_id),
            self.source_codec(source_id),
            self.platform,
        );
        let sid = source_id.to_string();
        let pad_for_link = pad.clone();
        let rebuilt = tokio::task::spawn_blocking(move || -> Result<gst::Bin> {
            let _ = old_bin.set_state(gst::State::Null);
            if let Some(src) = old_bin.static_pad("src") {
                let _ = src.unlink(&pad_for_link);
            }
            pipeline
                .remove(&old_bin)
                .map_err(|e| Error::pipeline_runtime(&sid, e))?;

            let bin = gst::parse::bin_from_description(&desc, true)
                .map_err(|e| Error::pipeline_construction(&sid, e))?;
            bin.set_property("name", format!("src_{sid}"));
            pipeline.add(&bin).map_err(|e| Error::pipeline_construction(&sid, e))?;
            bin.static_pad("src")
                .ok_or_else(|| Error::pipeline_construction(&sid, "branch bin has no src pad"))?
                .link(&pad_for_link)
                .map_err(|e| Error::pipeline_construction(&sid, format!("pad link: {e:?}")))?;
            bin.sync_state_with_parent()
                .map_err(|e| Error::pipeline_construction(&sid, e))?;
            Ok(bin)
        })
        .await;

        match rebuilt {
            Ok(Ok(bin)) => {
                let mut inner = self.inner.lock();
                let Some(p) = inner.pipeline.as_mut() else {
                    // Mixer stopped while the branch was rebuilding.
                    return;
                };
                apply_to_pad(&pad, &applied);
                if let Some(branch) = p.branches.get_mut(source_id) {
                    branch.bin = bin;
                    branch.alive = true;
                }
                info!(source = source_id, "Mixer branch restarted");
            }
            Ok(Err(e)) => {
                warn!(source = source_id, error = %e, "Branch restart failed");
                self.inner.lock().last_error = Some(e.to_string());
            }
            Err(e) => {
                warn!(source = source_id, error = %e, "Branch restart task failed");
            }
        }
    }
}
