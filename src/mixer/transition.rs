//! Transition kinds and the pad-placement math behind them.
//!
//! A transition never rebuilds anything; it is a timed sequence of
//! compositor pad-property updates computed here and applied by the core.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::scene::Slot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    #[default]
    Cut,
    Mix,
    Auto,
}

impl TransitionKind {
    pub fn duration(&self) -> Duration {
        match self {
            TransitionKind::Cut => Duration::ZERO,
            TransitionKind::Mix => Duration::from_millis(500),
            TransitionKind::Auto => Duration::from_millis(1000),
        }
    }

    /// Number of property-update steps at the given frame rate.
    pub fn frames(&self, framerate: u32) -> u32 {
        (self.duration().as_millis() as u64 * framerate as u64 / 1000) as u32
    }
}

/// Concrete compositor pad properties for one source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PadPlacement {
    pub xpos: i32,
    pub ypos: i32,
    pub width: i32,
    pub height: i32,
    pub alpha: f64,
    pub zorder: u32,
}

impl PadPlacement {
    /// Fully transparent, parked behind everything. Geometry keeps the full
    /// frame so a later fade-in has sane dimensions.
    pub fn hidden(out: (u32, u32)) -> Self {
        PadPlacement { xpos: 0, ypos: 0, width: out.0 as i32, height: out.1 as i32, alpha: 0.0, zorder: 0 }
    }
}

/// Map a normalized slot onto output pixels.
pub fn placement_for(slot: &Slot, out: (u32, u32)) -> PadPlacement {
    PadPlacement {
        xpos: (slot.x * out.0 as f64).round() as i32,
        ypos: (slot.y * out.1 as f64).round() as i32,
        width: (slot.w * out.0 as f64).round() as i32,
        height: (slot.h * out.1 as f64).round() as i32,
        alpha: slot.alpha,
        // zorder 0 is reserved for hidden pads.
        zorder: slot.z + 1,
    }
}

/// Linear interpolation between two placements at t in [0, 1].
///
/// Geometry and alpha interpolate; zorder snaps to the target at the
/// halfway point so a crossfade re-stacks mid-way instead of flickering.
pub fn lerp(from: &PadPlacement, to: &PadPlacement, t: f64) -> PadPlacement {
    let t = t.clamp(0.0, 1.0);
    let mix_i = |a: i32, b: i32| a + ((b - a) as f64 * t).round() as i32;
    PadPlacement {
        xpos: mix_i(from.xpos, to.xpos),
        ypos: mix_i(from.ypos, to.ypos),
        width: mix_i(from.width, to.width),
        height: mix_i(from.height, to.height),
        alpha: from.alpha + (to.alpha - from.alpha) * t,
        zorder: if t < 0.5 { from.zorder } else { to.zorder },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn slot(x: f64, y: f64, w: f64, h: f64) -> Slot {
        Slot { source: "cam0".into(), x, y, w, h, z: 0, alpha: 1.0, crop: None }
    }

    #[rstest]
    #[case(TransitionKind::Cut, 0)]
    #[case(TransitionKind::Mix, 15)]
    #[case(TransitionKind::Auto, 30)]
    fn frame_counts_at_30fps(#[case] kind: TransitionKind, #[case] expected: u32) {
        assert_eq!(kind.frames(30), expected);
    }

    #[rstest]
    #[case(25, 12, 25)]
    #[case(60, 30, 60)]
    fn frame_counts_scale_with_framerate(#[case] fps: u32, #[case] mix: u32, #[case] auto: u32) {
        assert_eq!(TransitionKind::Mix.frames(fps), mix);
        assert_eq!(TransitionKind::Auto.frames(fps), auto);
    }

    #[test]
    fn placement_maps_normalized_quadrant() {
        let p = placement_for(&slot(0.5, 0.5, 0.5, 0.5), (1920, 1080));
        assert_eq!((p.xpos, p.ypos, p.width, p.height), (960, 540, 960, 540));
        assert_eq!(p.alpha, 1.0);
        assert!(p.zorder >= 1);
    }

    #[test]
    fn lerp_hits_both_endpoints() {
        let from = PadPlacement::hidden((1920, 1080));
        let to = placement_for(&slot(0.0, 0.0, 1.0, 1.0), (1920, 1080));
        assert_eq!(lerp(&from, &to, 0.0), PadPlacement { zorder: from.zorder, ..from });
        assert_eq!(lerp(&from, &to, 1.0), to);
    }

    #[test]
    fn lerp_midpoint_blends_alpha_and_snaps_zorder() {
        let from = PadPlacement { xpos: 0, ypos: 0, width: 100, height: 100, alpha: 0.0, zorder: 1 };
        let to = PadPlacement { xpos: 100, ypos: 0, width: 200, height: 100, alpha: 1.0, zorder: 5 };
        let mid = lerp(&from, &to, 0.5);
        assert_eq!(mid.xpos, 50);
        assert_eq!(mid.width, 150);
        assert!((mid.alpha - 0.5).abs() < f64::EPSILON);
        assert_eq!(mid.zorder, 5);
    }

    #[test]
    fn lerp_clamps_t() {
        let from = PadPlacement::hidden((640, 480));
        let to = placement_for(&slot(0.0, 0.0, 1.0, 1.0), (640, 480));
        assert_eq!(lerp(&from, &to, 2.0), to);
    }
}
