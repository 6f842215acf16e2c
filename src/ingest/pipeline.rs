//! Publish-pipeline wrapper for one camera.

use std::sync::Arc;
use std::time::Instant;

use gstreamer as gst;
use gstreamer::prelude::*;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::error::{Error, Result};
use crate::media::builder;

/// Bus message forwarded out of the streaming threads.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub source: String,
    pub kind: BusEventKind,
}

#[derive(Debug, Clone)]
pub enum BusEventKind {
    Error(String),
    Eos,
}

/// A running publish pipeline and the observation hooks around it.
pub struct IngestPipeline {
    name: String,
    pipeline: gst::Pipeline,
    working: (u32, u32),
    created_at: Instant,
    last_buffer: Arc<Mutex<Option<Instant>>>,
}

impl IngestPipeline {
    /// Parse a launch description and wire up progress and bus forwarding.
    ///
    /// Bus errors and EOS are pushed into `bus_tx` from the streaming
    /// thread via a sync handler; the supervisor selects on the receiving
    /// end instead of needing a GLib main loop.
    pub fn new(
        name: &str,
        launch: &str,
        working: (u32, u32),
        bus_tx: UnboundedSender<BusEvent>,
    ) -> Result<Self> {
        crate::media::ensure_gst()?;
        debug!(pipeline = name, launch, "Building pipeline");

        let pipeline = gst::parse::launch(launch)
            .map_err(|e| Error::pipeline_construction(name, e))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| Error::pipeline_construction(name, "parsed element is not a pipeline"))?;

        let last_buffer: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));

        // Buffer progress is observed on the parser's src pad, right before
        // the publish sink.
        let progress = pipeline
            .by_name(builder::PROGRESS_ELEMENT)
            .ok_or_else(|| Error::pipeline_construction(name, "progress element missing"))?;
        let progress_pad = progress
            .static_pad("src")
            .ok_or_else(|| Error::pipeline_construction(name, "progress element has no src pad"))?;
        {
            let last_buffer = Arc::clone(&last_buffer);
            progress_pad.add_probe(gst::PadProbeType::BUFFER, move |_, _| {
                *last_buffer.lock() = Some(Instant::now());
                gst::PadProbeReturn::Ok
            });
        }

        let bus = pipeline
            .bus()
            .ok_or_else(|| Error::pipeline_construction(name, "pipeline has no bus"))?;
        let source = name.to_string();
        bus.set_sync_handler(move |_, msg| {
            use gst::MessageView;
            match msg.view() {
                MessageView::Error(err) => {
                    let _ = bus_tx.send(BusEvent {
                        source: source.clone(),
                        kind: BusEventKind::Error(err.error().to_string()),
                    });
                    gst::BusSyncReply::Drop
                }
                MessageView::Eos(_) => {
                    let _ = bus_tx.send(BusEvent { source: source.clone(), kind: BusEventKind::Eos });
                    gst::BusSyncReply::Drop
                }
                _ => gst::BusSyncReply::Pass,
            }
        });

        Ok(IngestPipeline {
            name: name.to_string(),
            pipeline,
            working,
            created_at: Instant::now(),
            last_buffer,
        })
    }

    pub fn start(&self) -> Result<()> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| Error::pipeline_runtime(&self.name, e))?;
        Ok(())
    }

    pub fn stop(&self) {
        crate::media::force_null(&self.pipeline);
    }

    pub fn pipeline(&self) -> &gst::Pipeline {
        &self.pipeline
    }

    /// Resolution this pipeline was built for.
    pub fn working_resolution(&self) -> (u32, u32) {
        self.working
    }

    /// Seconds since the last buffer passed the progress probe, if any
    /// buffer has been seen at all.
    pub fn seconds_since_last_buffer(&self) -> Option<u64> {
        self.last_buffer.lock().map(|t| t.elapsed().as_secs())
    }

    /// Whether any buffer has reached the publish sink yet.
    pub fn has_produced(&self) -> bool {
        self.last_buffer.lock().is_some()
    }

    /// Seconds since this pipeline was built.
    pub fn age_secs(&self) -> u64 {
        self.created_at.elapsed().as_secs()
    }
}

impl Drop for IngestPipeline {
    fn drop(&mut self) {
        debug!(pipeline = %self.name, "Dropping pipeline");
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
        crate::media::force_null(&self.pipeline);
    }
}
