//! Pure pipeline-description builders.
//!
//! Every function maps `(camera spec, role, platform)` to a launch
//! description; ids and endpoint URLs are substituted by the caller and no
//! global state is touched. Supervisors own parsing and lifecycle.

use std::path::Path;

use crate::config::{CameraSpec, Codec, MixerConfig, RevealConfig};
use crate::Platform;

/// Element names injected into launch strings so supervisors can look the
/// elements up after parsing.
pub const PROGRESS_ELEMENT: &str = "progress";
pub const PUBLISH_SINK: &str = "publish";
pub const RECORD_MUX: &str = "mux";
pub const RECORD_SINK: &str = "filesink";
pub const CROP_ELEMENT: &str = "crop";

/// Muxer options for record-role pipelines.
#[derive(Debug, Clone, Copy)]
pub struct RecordMuxOpts {
    pub fragmented: bool,
    pub fragment_duration_ms: u32,
}

/// Hardware encoder chain for the RK3588 (Rockchip MPP).
///
/// The exact rate-control parameterization matters: explicit qp bounds,
/// gop pinned to the framerate and cbr with an explicit bps. Leaner forms
/// (defaults, vbr) have produced rkvenc kernel faults on this SoC under
/// sustained load. Test mode substitutes a software encoder.
fn encoder_chain(codec: Codec, bitrate_kbps: u32, framerate: u32, platform: Platform) -> String {
    if platform.test_mode {
        // x264enc expects kbit/s.
        return format!(
            "x264enc speed-preset=ultrafast tune=zerolatency bitrate={kbps} key-int-max={gop} \
             ! {parse} name={progress} config-interval=-1",
            kbps = bitrate_kbps,
            gop = framerate,
            parse = parser_for(codec),
            progress = PROGRESS_ELEMENT,
        );
    }

    let encoder = match codec {
        Codec::H264 => "mpph264enc",
        Codec::H265 => "mpph265enc",
    };
    format!(
        "{encoder} rc-mode=cbr bps={bps} gop={gop} qp-init=26 qp-min=10 qp-max=48 \
         ! {parse} name={progress} config-interval=-1",
        bps = bitrate_kbps as u64 * 1000,
        gop = framerate,
        parse = parser_for(codec),
        progress = PROGRESS_ELEMENT,
    )
}

fn parser_for(codec: Codec) -> &'static str {
    match codec {
        Codec::H264 => "h264parse",
        Codec::H265 => "h265parse",
    }
}

fn depayloader_for(codec: Codec) -> &'static str {
    match codec {
        Codec::H264 => "rtph264depay",
        Codec::H265 => "rtph265depay",
    }
}

fn decoder_for(codec: Codec, platform: Platform) -> &'static str {
    if platform.test_mode {
        match codec {
            Codec::H264 => "avdec_h264",
            Codec::H265 => "avdec_h265",
        }
    } else {
        // Rockchip MPP decoder handles both codecs.
        "mppvideodec"
    }
}

/// Capture chain for an ingest pipeline.
///
/// The source negotiates its native format with the device (no forced pixel
/// format); videoconvert/videoscale/videorate bring it to the working
/// resolution and framerate afterwards.
fn capture_chain(cam: &CameraSpec, working: (u32, u32), platform: Platform) -> String {
    let source = if platform.test_mode {
        "videotestsrc is-live=true pattern=smpte".to_string()
    } else {
        format!("v4l2src device={}", cam.device)
    };
    format!(
        "{source} \
         ! queue max-size-buffers=4 leaky=downstream \
         ! videoconvert ! videoscale ! videorate \
         ! video/x-raw,width={w},height={h},framerate={fps}/1",
        w = working.0,
        h = working.1,
        fps = cam.framerate,
    )
}

/// Always-on publish pipeline: capture, hardware encode, RTSP-publish.
///
/// `publish_codec` is what ingest actually emits, which the caller derives
/// from the media server's codec-support set; it can differ from the
/// camera's stored preference. `rtspclientsink` payloads internally; no
/// rtp*pay element goes in front of it. `publish_url` must use loopback
/// IPv4.
pub fn ingest_publish(
    cam: &CameraSpec,
    working: (u32, u32),
    publish_codec: Codec,
    publish_url: &str,
    platform: Platform,
) -> String {
    format!(
        "{capture} ! {encode} \
         ! {sink} name={sink_name} location={url} protocols=tcp latency=0",
        capture = capture_chain(cam, working, platform),
        encode = encoder_chain(publish_codec, cam.bitrate, cam.framerate, platform),
        sink = "rtspclientsink",
        sink_name = PUBLISH_SINK,
        url = publish_url,
    )
}

/// Record pipeline: subscribe to the published stream and mux to MP4.
///
/// `published_codec` is the codec ingest actually publishes, which is not
/// necessarily the camera's configured preference; depayloading by
/// preference instead has produced unreadable files in the field.
pub fn record_subscribe(
    subscribe_url: &str,
    published_codec: Codec,
    opts: RecordMuxOpts,
    output: &Path,
) -> String {
    let mux = if opts.fragmented {
        format!(
            "mp4mux name={} fragment-duration={}",
            RECORD_MUX, opts.fragment_duration_ms
        )
    } else {
        format!("mp4mux name={RECORD_MUX}")
    };
    format!(
        "rtspsrc location={url} protocols=tcp latency=100 \
         ! {depay} ! {parse} name={progress} \
         ! {mux} \
         ! filesink name={sink} location={loc}",
        url = subscribe_url,
        depay = depayloader_for(published_codec),
        parse = parser_for(published_codec),
        progress = PROGRESS_ELEMENT,
        sink = RECORD_SINK,
        loc = output.display(),
    )
}

/// Mixer source branch: subscribe and decode to raw frames.
///
/// Parsed as a bin whose single unlinked src pad (the trailing queue) is
/// ghosted and linked to a compositor sink pad by the mixer. The named
/// videocrop is driven per-scene.
pub fn mixer_subscribe(subscribe_url: &str, published_codec: Codec, platform: Platform) -> String {
    format!(
        "rtspsrc location={url} protocols=tcp latency=50 \
         ! {depay} ! {parse} ! {decode} \
         ! videoconvert ! videocrop name={crop} ! videoscale \
         ! queue max-size-buffers=4 leaky=downstream",
        url = subscribe_url,
        depay = depayloader_for(published_codec),
        parse = parser_for(published_codec),
        decode = decoder_for(published_codec, platform),
        crop = CROP_ELEMENT,
    )
}

/// Program output tail for the mixer: encode and re-publish.
pub fn mixer_publish_tail(cfg: &MixerConfig, publish_url: &str, platform: Platform) -> String {
    format!(
        "videoconvert ! {encode} \
         ! rtspclientsink name={sink} location={url} protocols=tcp latency=0",
        encode = encoder_chain(cfg.output_codec, cfg.output_bitrate, cfg.framerate, platform),
        sink = PUBLISH_SINK,
        url = publish_url,
    )
}

/// Browser-rendered graphics output: HTML page to encoded publish.
pub fn reveal_publish(
    cfg: &RevealConfig,
    page_url: &str,
    publish_url: &str,
    platform: Platform,
) -> String {
    let source = if platform.test_mode {
        // No browser engine on CI machines; a moving pattern keeps the
        // downstream behavior (caps, timestamps) identical.
        "videotestsrc is-live=true pattern=ball".to_string()
    } else {
        format!("{renderer} location={url}", renderer = cfg.renderer, url = page_url)
    };
    format!(
        "{source} \
         ! video/x-raw,width={w},height={h},framerate={fps}/1 \
         ! videoconvert \
         ! {encode} \
         ! rtspclientsink name={sink} location={publish} protocols=tcp latency=0",
        w = cfg.width,
        h = cfg.height,
        fps = cfg.framerate,
        encode = encoder_chain(Codec::H264, cfg.bitrate, cfg.framerate, platform),
        sink = PUBLISH_SINK,
        publish = publish_url,
    )
}
