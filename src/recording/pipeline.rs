//! Record pipeline wrapper: subscribe, mux, finalize.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ingest::{BusEvent, BusEventKind};

/// Bounded wait for the muxer to finalize after EOS. MP4 needs the moov
/// atom written before the file is playable.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RecordPipeline {
    name: String,
    pipeline: gst::Pipeline,
    /// File the pipeline writes into; renamed to `final_path` on success.
    part_path: PathBuf,
    final_path: PathBuf,
}

impl RecordPipeline {
    pub fn new(
        name: &str,
        launch: &str,
        part_path: PathBuf,
        final_path: PathBuf,
        bus_tx: UnboundedSender<BusEvent>,
    ) -> Result<Self> {
        crate::media::ensure_gst()?;
        debug!(pipeline = name, launch, "Building record pipeline");

        if let Some(parent) = part_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let pipeline = gst::parse::launch(launch)
            .map_err(|e| Error::pipeline_construction(name, e))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| Error::pipeline_construction(name, "parsed element is not a pipeline"))?;

        // Runtime faults (rtsp drop, muxer failure) are forwarded to the
        // subscriber's supervisor; EOS is consumed during finalize via
        // timed_pop_filtered, so only errors go through the channel.
        let bus = pipeline
            .bus()
            .ok_or_else(|| Error::pipeline_construction(name, "pipeline has no bus"))?;
        let source = name.to_string();
        bus.set_sync_handler(move |_, msg| {
            if let gst::MessageView::Error(err) = msg.view() {
                let _ = bus_tx.send(BusEvent {
                    source: source.clone(),
                    kind: BusEventKind::Error(err.error().to_string()),
                });
            }
            gst::BusSyncReply::Pass
        });

        Ok(RecordPipeline {
            name: name.to_string(),
            pipeline,
            part_path,
            final_path,
        })
    }

    pub fn start(&self) -> Result<()> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| Error::pipeline_runtime(&self.name, e))?;
        Ok(())
    }

    pub fn pipeline(&self) -> &gst::Pipeline {
        &self.pipeline
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Ordered teardown: EOS into the sources, bounded wait for the muxer
    /// to see it through, NULL, then rename the part file into place.
    ///
    /// Blocking; callers run this on the blocking pool.
    pub fn finalize(self) -> Result<PathBuf> {
        info!(pipeline = %self.name, "Finalizing recording");

        // pipeline.send_event(Eos) does not reliably reach live sources;
        // push EOS into each source element so it propagates to the muxer.
        let mut eos_sent = 0u32;
        for src in self.pipeline.iterate_sources().into_iter().flatten() {
            src.send_event(gst::event::Eos::new());
            eos_sent += 1;
        }
        if eos_sent == 0 {
            self.pipeline.send_event(gst::event::Eos::new());
        }

        let outcome = match self.pipeline.bus() {
            Some(bus) => {
                bus.unset_sync_handler();
                match bus.timed_pop_filtered(
                    gst::ClockTime::from_seconds(FINALIZE_TIMEOUT.as_secs()),
                    &[gst::MessageType::Eos, gst::MessageType::Error],
                ) {
                    Some(msg) => match msg.view() {
                        gst::MessageView::Eos(_) => Ok(()),
                        gst::MessageView::Error(err) => Err(Error::pipeline_runtime(
                            &self.name,
                            format!("error during finalize: {}", err.error()),
                        )),
                        _ => Ok(()),
                    },
                    None => Err(Error::Timeout(
                        FINALIZE_TIMEOUT,
                        format!("muxer finalization of '{}'", self.name),
                    )),
                }
            }
            None => Ok(()),
        };

        crate::media::force_null(&self.pipeline);

        match outcome {
            Ok(()) => {
                std::fs::rename(&self.part_path, &self.final_path)?;
                info!(pipeline = %self.name, path = %self.final_path.display(), "Recording saved");
                Ok(self.final_path.clone())
            }
            Err(e) => {
                warn!(pipeline = %self.name, error = %e, "Recording did not finalize cleanly");
                Err(e)
            }
        }
    }
}

impl Drop for RecordPipeline {
    fn drop(&mut self) {
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
        crate::media::force_null(&self.pipeline);
    }
}
