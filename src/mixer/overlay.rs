//! Cairo broadcast graphics drawn inside the mixer pipeline.
//!
//! The manager owns a set of overlay elements mutated through the API and
//! rasterizes them once per composited frame from the overlaycomposition
//! draw callback. Animation timing uses the frame's presentation timestamp,
//! never wall time, so output stays deterministic under pipeline stalls.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use gstreamer as gst;
use gstreamer_video as gst_video;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Enter/exit animation length in PTS milliseconds.
const ANIMATION_MS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationPhase {
    Hidden,
    Entering,
    Visible,
    Exiting,
}

/// Color with straight (non-premultiplied) components in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    #[serde(default = "opaque")]
    pub a: f64,
}

fn opaque() -> f64 {
    1.0
}

impl Rgba {
    pub const WHITE: Rgba = Rgba { r: 1.0, g: 1.0, b: 1.0, a: 1.0 };
}

fn default_accent() -> Rgba {
    Rgba { r: 0.86, g: 0.24, b: 0.18, a: 1.0 }
}

fn default_background() -> Rgba {
    Rgba { r: 0.08, g: 0.08, b: 0.10, a: 0.85 }
}

fn default_speed() -> f64 {
    120.0
}

fn default_scale() -> f64 {
    1.0
}

/// Presentation data per overlay variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum OverlayKind {
    LowerThird {
        title: String,
        #[serde(default)]
        subtitle: Option<String>,
        #[serde(default = "default_accent")]
        accent: Rgba,
        #[serde(default = "default_background")]
        background: Rgba,
    },
    Scoreboard {
        home: String,
        away: String,
        #[serde(default)]
        home_score: u32,
        #[serde(default)]
        away_score: u32,
        #[serde(default = "default_background")]
        background: Rgba,
    },
    Ticker {
        text: String,
        /// Scroll speed in pixels per second of PTS time.
        #[serde(default = "default_speed")]
        speed: f64,
        #[serde(default = "default_background")]
        background: Rgba,
    },
    Timer {
        /// Count down from this many seconds; counts up when absent.
        #[serde(default)]
        countdown_secs: Option<u64>,
        #[serde(default = "default_background")]
        background: Rgba,
    },
    Logo {
        path: PathBuf,
        /// Normalized top-left placement.
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
        #[serde(default = "default_scale")]
        scale: f64,
    },
}

impl OverlayKind {
    pub fn variant_name(&self) -> &'static str {
        match self {
            OverlayKind::LowerThird { .. } => "lower_third",
            OverlayKind::Scoreboard { .. } => "scoreboard",
            OverlayKind::Ticker { .. } => "ticker",
            OverlayKind::Timer { .. } => "timer",
            OverlayKind::Logo { .. } => "logo",
        }
    }
}

/// Request body for element creation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateElement {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub kind: OverlayKind,
    /// Created elements animate in immediately unless explicitly hidden.
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

/// API view of one element.
#[derive(Debug, Clone, Serialize)]
pub struct ElementSnapshot {
    pub id: String,
    #[serde(flatten)]
    pub kind: OverlayKind,
    pub phase: AnimationPhase,
}

/// Decoded logo pixels kept beside the element.
///
/// cairo surfaces are not Send; this wrapper is only ever touched from the
/// draw callback while the manager lock is held, which serializes access.
struct LogoSurface(cairo::ImageSurface);

// SAFETY: access is confined to the draw callback under the manager's
// mutex; the surface is never shared across threads concurrently.
unsafe impl Send for LogoSurface {}

struct Element {
    id: String,
    kind: OverlayKind,
    phase: AnimationPhase,
    phase_start: Option<gst::ClockTime>,
    timer_base: Option<gst::ClockTime>,
    logo: Option<LogoSurface>,
}

pub struct OverlayManager {
    elements: Mutex<BTreeMap<String, Element>>,
    counter: AtomicU64,
}

impl Default for OverlayManager {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayManager {
    pub fn new() -> Self {
        OverlayManager { elements: Mutex::new(BTreeMap::new()), counter: AtomicU64::new(0) }
    }

    pub fn list(&self) -> Vec<ElementSnapshot> {
        self.elements.lock().values().map(snapshot).collect()
    }

    pub fn get(&self, id: &str) -> Result<ElementSnapshot> {
        self.elements
            .lock()
            .get(id)
            .map(snapshot)
            .ok_or_else(|| Error::UnknownId { kind: "overlay element", id: id.to_string() })
    }

    pub fn create(&self, req: CreateElement) -> Result<ElementSnapshot> {
        let id = req
            .id
            .unwrap_or_else(|| format!("{}_{}", req.kind.variant_name(), self.counter.fetch_add(1, Ordering::Relaxed)));

        let logo = load_logo(&req.kind)?;

        let mut elements = self.elements.lock();
        if elements.contains_key(&id) {
            return Err(Error::InvalidRequest(format!("overlay element '{id}' already exists")));
        }
        let element = Element {
            id: id.clone(),
            kind: req.kind,
            phase: if req.visible { AnimationPhase::Entering } else { AnimationPhase::Hidden },
            phase_start: None,
            timer_base: None,
            logo,
        };
        let snap = snapshot(&element);
        elements.insert(id, element);
        Ok(snap)
    }

    /// Replace an element's presentation data. The variant must match; the
    /// animation phase is preserved.
    pub fn update(&self, id: &str, kind: OverlayKind) -> Result<ElementSnapshot> {
        let logo = load_logo(&kind)?;
        let mut elements = self.elements.lock();
        let element = elements
            .get_mut(id)
            .ok_or_else(|| Error::UnknownId { kind: "overlay element", id: id.to_string() })?;
        if element.kind.variant_name() != kind.variant_name() {
            return Err(Error::InvalidRequest(format!(
                "element '{id}' is a {}, not a {}",
                element.kind.variant_name(),
                kind.variant_name()
            )));
        }
        element.kind = kind;
        if logo.is_some() {
            element.logo = logo;
        }
        Ok(snapshot(element))
    }

    pub fn show(&self, id: &str) -> Result<ElementSnapshot> {
        self.set_phase(id, true)
    }

    pub fn hide(&self, id: &str) -> Result<ElementSnapshot> {
        self.set_phase(id, false)
    }

    fn set_phase(&self, id: &str, visible: bool) -> Result<ElementSnapshot> {
        let mut elements = self.elements.lock();
        let element = elements
            .get_mut(id)
            .ok_or_else(|| Error::UnknownId { kind: "overlay element", id: id.to_string() })?;
        element.phase = match (visible, element.phase) {
            (true, AnimationPhase::Hidden | AnimationPhase::Exiting) => AnimationPhase::Entering,
            (true, keep) => keep,
            (false, AnimationPhase::Visible | AnimationPhase::Entering) => AnimationPhase::Exiting,
            (false, keep) => keep,
        };
        element.phase_start = None;
        if !visible {
            element.timer_base = None;
        }
        Ok(snapshot(element))
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.elements
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::UnknownId { kind: "overlay element", id: id.to_string() })
    }

    pub fn clear(&self) {
        self.elements.lock().clear();
    }

    /// Rasterize all non-hidden elements for one frame.
    ///
    /// Called from the streaming thread; returns `None` when nothing is
    /// visible so the frame passes through untouched.
    pub fn draw(
        &self,
        pts: gst::ClockTime,
        canvas_w: u32,
        canvas_h: u32,
    ) -> Option<gst_video::VideoOverlayComposition> {
        let mut elements = self.elements.lock();
        let mut rects = Vec::new();

        for element in elements.values_mut() {
            let Some(alpha) = advance_phase(element, pts) else { continue };
            match render_element(element, pts, alpha, canvas_w, canvas_h) {
                Ok(Some(rect)) => rects.push(rect),
                Ok(None) => {}
                Err(e) => warn!(element = %element.id, error = %e, "Overlay render failed"),
            }
        }

        if rects.is_empty() {
            return None;
        }
        gst_video::VideoOverlayComposition::new(rects.iter()).ok()
    }
}

fn snapshot(element: &Element) -> ElementSnapshot {
    ElementSnapshot { id: element.id.clone(), kind: element.kind.clone(), phase: element.phase }
}

fn load_logo(kind: &OverlayKind) -> Result<Option<LogoSurface>> {
    let OverlayKind::Logo { path, .. } = kind else {
        return Ok(None);
    };
    let mut file = std::fs::File::open(path)
        .map_err(|e| Error::InvalidRequest(format!("logo '{}' unreadable: {e}", path.display())))?;
    let surface = cairo::ImageSurface::create_from_png(&mut file)
        .map_err(|e| Error::InvalidRequest(format!("logo '{}' is not a PNG: {e}", path.display())))?;
    Ok(Some(LogoSurface(surface)))
}

/// Drive the phase state machine for one frame; returns the element's
/// effective alpha, or `None` while hidden.
fn advance_phase(element: &mut Element, pts: gst::ClockTime) -> Option<f64> {
    let start = *element.phase_start.get_or_insert(pts);
    let elapsed_ms = pts.mseconds().saturating_sub(start.mseconds());
    let t = (elapsed_ms as f64 / ANIMATION_MS as f64).min(1.0);

    match element.phase {
        AnimationPhase::Hidden => None,
        AnimationPhase::Visible => Some(1.0),
        AnimationPhase::Entering => {
            if t >= 1.0 {
                element.phase = AnimationPhase::Visible;
                element.phase_start = Some(pts);
            }
            Some(t)
        }
        AnimationPhase::Exiting => {
            if t >= 1.0 {
                element.phase = AnimationPhase::Hidden;
                element.phase_start = None;
                return None;
            }
            Some(1.0 - t)
        }
    }
}

/// Geometry of one rendered overlay box on the canvas.
struct BBox {
    x: i32,
    y: i32,
    w: i32,
    h: i32,
}

fn render_element(
    element: &mut Element,
    pts: gst::ClockTime,
    alpha: f64,
    canvas_w: u32,
    canvas_h: u32,
) -> Result<Option<gst_video::VideoOverlayRectangle>> {
    let cw = canvas_w as f64;
    let ch = canvas_h as f64;

    let bbox = match &element.kind {
        OverlayKind::LowerThird { .. } => BBox {
            x: (cw * 0.05) as i32,
            y: (ch * 0.76) as i32,
            w: (cw * 0.52) as i32,
            h: (ch * 0.14) as i32,
        },
        OverlayKind::Scoreboard { .. } => BBox {
            x: (cw * 0.34) as i32,
            y: (ch * 0.03) as i32,
            w: (cw * 0.32) as i32,
            h: (ch * 0.09) as i32,
        },
        OverlayKind::Ticker { .. } => BBox {
            x: 0,
            y: (ch * 0.93) as i32,
            w: cw as i32,
            h: (ch * 0.07) as i32,
        },
        OverlayKind::Timer { .. } => BBox {
            x: (cw * 0.86) as i32,
            y: (ch * 0.03) as i32,
            w: (cw * 0.11) as i32,
            h: (ch * 0.07) as i32,
        },
        OverlayKind::Logo { x, y, scale, .. } => {
            let surface = element.logo.as_ref();
            let (lw, lh) = surface
                .map(|s| (s.0.width() as f64 * scale, s.0.height() as f64 * scale))
                .unwrap_or((0.0, 0.0));
            BBox { x: (x * cw) as i32, y: (y * ch) as i32, w: lw.max(1.0) as i32, h: lh.max(1.0) as i32 }
        }
    };

    if bbox.w <= 0 || bbox.h <= 0 {
        return Ok(None);
    }

    let surface = cairo::ImageSurface::create(cairo::Format::ARgb32, bbox.w, bbox.h)
        .map_err(|e| Error::InvalidRequest(format!("surface allocation failed: {e}")))?;
    let cr = cairo::Context::new(&surface)
        .map_err(|e| Error::InvalidRequest(format!("cairo context failed: {e}")))?;

    // Draw at full opacity into a group, then composite the group with the
    // animation alpha.
    cr.push_group();
    draw_kind(&cr, element, pts, bbox.w as f64, bbox.h as f64);
    cr.pop_group_to_source().ok();
    cr.paint_with_alpha(alpha).ok();
    drop(cr);

    let stride = surface.stride();
    let width = surface.width() as u32;
    let height = surface.height() as u32;
    let data = surface
        .take_data()
        .map_err(|e| Error::InvalidRequest(format!("surface data not exclusive: {e}")))?;

    let mut buffer = gst::Buffer::from_mut_slice(data);
    gst_video::VideoMeta::add_full(
        buffer.get_mut().expect("fresh buffer is writable"),
        gst_video::VideoFrameFlags::empty(),
        gst_video::VideoFormat::Bgra,
        width,
        height,
        &[0],
        &[stride],
    )
    .map_err(|e| Error::InvalidRequest(format!("video meta: {e}")))?;

    Ok(Some(gst_video::VideoOverlayRectangle::new_raw(
        &buffer,
        bbox.x,
        bbox.y,
        width,
        height,
        gst_video::VideoOverlayFormatFlags::PREMULTIPLIED_ALPHA,
    )))
}

fn set_color(cr: &cairo::Context, c: &Rgba) {
    cr.set_source_rgba(c.r, c.g, c.b, c.a);
}

fn draw_kind(cr: &cairo::Context, element: &mut Element, pts: gst::ClockTime, w: f64, h: f64) {
    match &mut element.kind {
        OverlayKind::LowerThird { title, subtitle, accent, background } => {
            set_color(cr, background);
            cr.rectangle(0.0, 0.0, w, h);
            cr.fill().ok();
            set_color(cr, accent);
            cr.rectangle(0.0, 0.0, w * 0.012, h);
            cr.fill().ok();

            set_color(cr, &Rgba::WHITE);
            cr.select_font_face("Sans", cairo::FontSlant::Normal, cairo::FontWeight::Bold);
            cr.set_font_size(h * 0.38);
            cr.move_to(w * 0.04, h * 0.45);
            cr.show_text(title).ok();
            if let Some(subtitle) = subtitle {
                cr.select_font_face("Sans", cairo::FontSlant::Normal, cairo::FontWeight::Normal);
                cr.set_font_size(h * 0.26);
                cr.move_to(w * 0.04, h * 0.82);
                cr.show_text(subtitle).ok();
            }
        }
        OverlayKind::Scoreboard { home, away, home_score, away_score, background } => {
            set_color(cr, background);
            cr.rectangle(0.0, 0.0, w, h);
            cr.fill().ok();
            set_color(cr, &Rgba::WHITE);
            cr.select_font_face("Sans", cairo::FontSlant::Normal, cairo::FontWeight::Bold);
            cr.set_font_size(h * 0.45);
            let text = format!("{home} {home_score} - {away_score} {away}");
            let extents = cr.text_extents(&text).ok();
            let tx = extents.map(|e| (w - e.width()) / 2.0).unwrap_or(w * 0.1);
            cr.move_to(tx.max(4.0), h * 0.65);
            cr.show_text(&text).ok();
        }
        OverlayKind::Ticker { text, speed, background } => {
            set_color(cr, background);
            cr.rectangle(0.0, 0.0, w, h);
            cr.fill().ok();
            set_color(cr, &Rgba::WHITE);
            cr.select_font_face("Sans", cairo::FontSlant::Normal, cairo::FontWeight::Normal);
            cr.set_font_size(h * 0.5);
            let text_w = cr.text_extents(text).map(|e| e.width()).unwrap_or(w);
            let span = w + text_w;
            let offset = (pts.mseconds() as f64 / 1000.0 * *speed) % span;
            cr.move_to(w - offset, h * 0.68);
            cr.show_text(text).ok();
        }
        OverlayKind::Timer { countdown_secs, background } => {
            let base = *element_timer_base(&mut element.timer_base, pts);
            let elapsed = pts.seconds().saturating_sub(base.seconds());
            let shown = match countdown_secs {
                Some(total) => total.saturating_sub(elapsed),
                None => elapsed,
            };
            set_color(cr, background);
            cr.rectangle(0.0, 0.0, w, h);
            cr.fill().ok();
            set_color(cr, &Rgba::WHITE);
            cr.select_font_face("Monospace", cairo::FontSlant::Normal, cairo::FontWeight::Bold);
            cr.set_font_size(h * 0.6);
            cr.move_to(w * 0.12, h * 0.72);
            cr.show_text(&format!("{:02}:{:02}", shown / 60, shown % 60)).ok();
        }
        OverlayKind::Logo { .. } => {
            if let Some(LogoSurface(surface)) = &element.logo {
                let sx = w / surface.width() as f64;
                let sy = h / surface.height() as f64;
                cr.scale(sx, sy);
                cr.set_source_surface(surface, 0.0, 0.0).ok();
                cr.paint().ok();
            }
        }
    }
}

fn element_timer_base<'a>(
    base: &'a mut Option<gst::ClockTime>,
    pts: gst::ClockTime,
) -> &'a gst::ClockTime {
    base.get_or_insert(pts)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rendering builds gst buffers and metas, which need the library
    /// initialized even without any pipeline.
    fn gst_init() {
        crate::media::ensure_gst().unwrap();
    }

    fn lower_third(title: &str) -> CreateElement {
        CreateElement {
            id: None,
            kind: OverlayKind::LowerThird {
                title: title.into(),
                subtitle: Some("speaker".into()),
                accent: default_accent(),
                background: default_background(),
            },
            visible: true,
        }
    }

    fn ms(v: u64) -> gst::ClockTime {
        gst::ClockTime::from_mseconds(v)
    }

    #[test]
    fn create_assigns_variant_prefixed_ids() {
        let mgr = OverlayManager::new();
        let a = mgr.create(lower_third("A")).unwrap();
        let b = mgr.create(lower_third("B")).unwrap();
        assert!(a.id.starts_with("lower_third_"));
        assert_ne!(a.id, b.id);
        assert_eq!(mgr.list().len(), 2);
    }

    #[test]
    fn duplicate_explicit_id_is_rejected() {
        let mgr = OverlayManager::new();
        let mut req = lower_third("A");
        req.id = Some("lt1".into());
        mgr.create(req.clone()).unwrap();
        assert!(matches!(mgr.create(req), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn update_rejects_variant_change() {
        let mgr = OverlayManager::new();
        let el = mgr.create(lower_third("A")).unwrap();
        let err = mgr
            .update(&el.id, OverlayKind::Ticker { text: "x".into(), speed: 100.0, background: default_background() })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn phase_machine_enters_then_becomes_visible_on_pts() {
        gst_init();
        let mgr = OverlayManager::new();
        let el = mgr.create(lower_third("A")).unwrap();
        assert_eq!(el.phase, AnimationPhase::Entering);

        // Half way through the enter animation.
        mgr.draw(ms(0), 1920, 1080);
        mgr.draw(ms(ANIMATION_MS / 2), 1920, 1080);
        assert_eq!(mgr.get(&el.id).unwrap().phase, AnimationPhase::Entering);

        // Past the animation window the element settles.
        mgr.draw(ms(ANIMATION_MS + 40), 1920, 1080);
        assert_eq!(mgr.get(&el.id).unwrap().phase, AnimationPhase::Visible);
    }

    #[test]
    fn hide_exits_then_hides_and_draw_returns_none_when_empty() {
        gst_init();
        let mgr = OverlayManager::new();
        let el = mgr.create(lower_third("A")).unwrap();
        mgr.draw(ms(0), 1920, 1080);
        mgr.draw(ms(ANIMATION_MS + 40), 1920, 1080);

        mgr.hide(&el.id).unwrap();
        assert_eq!(mgr.get(&el.id).unwrap().phase, AnimationPhase::Exiting);

        mgr.draw(ms(ANIMATION_MS + 50), 1920, 1080);
        mgr.draw(ms(2 * ANIMATION_MS + 100), 1920, 1080);
        assert_eq!(mgr.get(&el.id).unwrap().phase, AnimationPhase::Hidden);

        // Nothing visible: the frame passes through untouched.
        assert!(mgr.draw(ms(3 * ANIMATION_MS), 1920, 1080).is_none());
    }

    #[test]
    fn show_is_idempotent_while_visible() {
        gst_init();
        let mgr = OverlayManager::new();
        let el = mgr.create(lower_third("A")).unwrap();
        mgr.draw(ms(0), 1920, 1080);
        mgr.draw(ms(ANIMATION_MS + 40), 1920, 1080);
        let snap = mgr.show(&el.id).unwrap();
        assert_eq!(snap.phase, AnimationPhase::Visible);
    }

    #[test]
    fn delete_and_clear() {
        let mgr = OverlayManager::new();
        let el = mgr.create(lower_third("A")).unwrap();
        mgr.create(lower_third("B")).unwrap();
        mgr.delete(&el.id).unwrap();
        assert!(matches!(mgr.delete(&el.id), Err(Error::UnknownId { .. })));
        mgr.clear();
        assert!(mgr.list().is_empty());
    }

    #[test]
    fn draw_rasterizes_one_rectangle_per_visible_element() {
        gst_init();
        let mgr = OverlayManager::new();
        mgr.create(lower_third("A")).unwrap();
        mgr.create(CreateElement {
            id: None,
            kind: OverlayKind::Scoreboard {
                home: "HOME".into(),
                away: "AWAY".into(),
                home_score: 2,
                away_score: 1,
                background: default_background(),
            },
            visible: true,
        })
        .unwrap();
        mgr.create(CreateElement {
            id: None,
            kind: OverlayKind::Timer { countdown_secs: Some(90), background: default_background() },
            visible: true,
        })
        .unwrap();

        let composition = mgr.draw(ms(100), 1920, 1080).expect("visible elements draw");
        assert_eq!(composition.n_rectangles(), 3);
    }

    #[test]
    fn ticker_scroll_position_follows_pts_not_wall_time() {
        gst_init();
        let mgr = OverlayManager::new();
        mgr.create(CreateElement {
            id: Some("tick".into()),
            kind: OverlayKind::Ticker { text: "breaking".into(), speed: 100.0, background: default_background() },
            visible: true,
        })
        .unwrap();

        // Drawing the same PTS twice must be deterministic regardless of
        // how much wall time passes between calls.
        assert!(mgr.draw(ms(500), 1280, 720).is_some());
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(mgr.draw(ms(500), 1280, 720).is_some());
    }

    #[test]
    fn missing_logo_file_is_rejected_at_create() {
        let mgr = OverlayManager::new();
        let err = mgr
            .create(CreateElement {
                id: None,
                kind: OverlayKind::Logo { path: "/no/such/logo.png".into(), x: 0.8, y: 0.05, scale: 1.0 },
                visible: true,
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn kind_serialization_uses_variant_tags() {
        let json = serde_json::json!({
            "variant": "ticker",
            "text": "breaking",
            "speed": 90.0,
        });
        let kind: OverlayKind = serde_json::from_value(json).unwrap();
        assert_eq!(kind.variant_name(), "ticker");
        let back = serde_json::to_value(&kind).unwrap();
        assert_eq!(back["variant"], "ticker");
        assert_eq!(back["text"], "breaking");
    }
}
