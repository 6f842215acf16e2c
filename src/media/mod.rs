pub mod builder;
pub mod mediamtx;
pub mod probe;

use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use once_cell::sync::OnceCell;
use tracing::warn;

use crate::error::{Error, Result};

static GST_INIT: OnceCell<()> = OnceCell::new();

/// Process-wide one-time GStreamer initialization. Pipeline constructors
/// call this so library users and tests need no init ceremony.
pub fn ensure_gst() -> Result<()> {
    GST_INIT
        .get_or_try_init(|| {
            gst::init().map_err(|e| Error::PipelineConstruction {
                name: "gstreamer".into(),
                reason: e.to_string(),
            })
        })
        .map(|_| ())
}

/// Bounded wait for a pipeline to settle into `target`.
///
/// `set_state` frequently returns `Async` for live pipelines; this blocks on
/// the state query with a deadline instead of trusting the return value.
/// Runs on the blocking pool so the control task never stalls on GStreamer.
pub async fn wait_for_state(
    pipeline: &gst::Pipeline,
    target: gst::State,
    timeout: Duration,
) -> Result<()> {
    let pipeline = pipeline.clone();
    let name = pipeline.name().to_string();

    let reached = tokio::task::spawn_blocking(move || {
        let (res, current, _pending) =
            pipeline.state(Some(gst::ClockTime::from_mseconds(timeout.as_millis() as u64)));
        match res {
            Ok(_) => current == target,
            Err(_) => false,
        }
    })
    .await
    .map_err(|e| Error::pipeline_runtime(name.clone(), e))?;

    if reached {
        Ok(())
    } else {
        Err(Error::Timeout(timeout, format!("state change of pipeline '{name}'")))
    }
}

/// Force a pipeline to NULL, logging instead of failing. Used on teardown
/// paths where the pipeline may already be dead.
pub fn force_null(pipeline: &gst::Pipeline) {
    if let Err(e) = pipeline.set_state(gst::State::Null) {
        warn!(pipeline = %pipeline.name(), error = %e, "Failed to null pipeline");
    }
}
