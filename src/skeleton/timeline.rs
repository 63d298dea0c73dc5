use super::raw::{RawCurve, RawRotateFrame, RawVectorFrame};
use macroquad::logging::warn;

/// Easing between two neighboring keyframes. Bezier curves are baked into a
/// 16 sample lookup grid once at load time; playback only ever lerps inside
/// the grid.
#[derive(Clone, Copy, PartialEq, Debug)]
pub(crate) enum TweenEasing {
    Linear,
    Stepped,
    Bezier(BezierLut),
}

impl TweenEasing {
    pub(crate) fn interpolate(&self, a: f32, b: f32, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        let t = match self {
            TweenEasing::Stepped => 0.0,
            TweenEasing::Linear => t,
            TweenEasing::Bezier(lut) => lut.sample(t),
        };
        a + (b - a) * t
    }
}

/// Eased y values sampled over a uniform x grid of 16 points.
#[derive(Clone, Copy, PartialEq, Debug)]
pub(crate) struct BezierLut([u8; 16]);

impl BezierLut {
    /// Handles are in the unit box: (0,0) and (1,1) are the keyframe
    /// endpoints. Overshooting y handles are clamped by the 8-bit grid.
    pub(crate) fn bake(handle_0_x: f32, handle_0_y: f32, handle_1_x: f32, handle_1_y: f32) -> Self {
        let mut samples = [0u8; 16];
        samples[15] = 255;
        for i in 1..15 {
            let x = i as f32 / 15.0;
            let t = solve_t(x, handle_0_x, handle_1_x);
            samples[i] = (cubic_resolve(t, 0.0, handle_0_y, handle_1_y, 1.0) * 255.0)
                .clamp(0.0, 255.0) as u8;
        }
        Self(samples)
    }

    fn sample(&self, x: f32) -> f32 {
        let region = x * 15.0;
        let alpha = region.fract();
        let region = region.trunc() as usize;
        if region >= 15 {
            return 1.0;
        }
        let left = self.0[region] as f32 / 255.0;
        let right = self.0[region + 1] as f32 / 255.0;
        left + (right - left) * alpha
    }
}

// x(t) is monotone for handles inside the unit box, so a plain bisection
// inverts it.
fn solve_t(x: f32, handle_0_x: f32, handle_1_x: f32) -> f32 {
    let (mut lo, mut hi) = (0.0f32, 1.0f32);
    for _ in 0..24 {
        let mid = (lo + hi) * 0.5;
        if cubic_resolve(mid, 0.0, handle_0_x, handle_1_x, 1.0) < x {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (lo + hi) * 0.5
}

fn cubic_resolve(t: f32, k1: f32, k2: f32, k3: f32, k4: f32) -> f32 {
    let (a, b, c) = (k1 + (k2 - k1) * t, k2 + (k3 - k2) * t, k3 + (k4 - k3) * t);
    let (d, e) = (a + (b - a) * t, b + (c - b) * t);
    d + (e - d) * t
}

#[derive(Clone, Debug)]
pub(crate) struct ScalarKey {
    pub time: f32,
    pub value: f32,
    pub easing: TweenEasing,
}

#[derive(Clone, Debug)]
pub(crate) struct VectorKey {
    pub time: f32,
    pub x: f32,
    pub y: f32,
    pub easing_x: TweenEasing,
    pub easing_y: TweenEasing,
}

#[derive(Clone, Debug)]
pub(crate) enum Keyframes {
    /// Rotation offsets in radians, added onto the setup pose.
    Rotate(Vec<ScalarKey>),
    /// Translation offsets, added onto the setup pose.
    Translate(Vec<VectorKey>),
    /// Scale factors, multiplied onto the setup pose.
    Scale(Vec<VectorKey>),
}

#[derive(Clone, Debug)]
pub(crate) struct BoneTimeline {
    pub bone: usize,
    pub keys: Keyframes,
}

#[derive(Clone, Debug)]
pub struct Animation {
    pub name: String,
    pub duration: f32,
    pub(crate) timelines: Vec<BoneTimeline>,
}

/// Outside the keyed range the nearest key wins; no extrapolation.
pub(crate) fn sample_scalar(keys: &[ScalarKey], time: f32) -> f32 {
    match keys {
        [] => 0.0,
        [only] => only.value,
        [first, ..] if time <= first.time => first.value,
        _ => {
            for pair in keys.windows(2) {
                let (left, right) = (&pair[0], &pair[1]);
                if time < right.time {
                    let span = right.time - left.time;
                    let alpha = if span > 0.0 { (time - left.time) / span } else { 1.0 };
                    return left.easing.interpolate(left.value, right.value, alpha);
                }
            }
            keys[keys.len() - 1].value
        }
    }
}

pub(crate) fn sample_vector(keys: &[VectorKey], time: f32) -> (f32, f32) {
    match keys {
        [] => (0.0, 0.0),
        [only] => (only.x, only.y),
        [first, ..] if time <= first.time => (first.x, first.y),
        _ => {
            for pair in keys.windows(2) {
                let (left, right) = (&pair[0], &pair[1]);
                if time < right.time {
                    let span = right.time - left.time;
                    let alpha = if span > 0.0 { (time - left.time) / span } else { 1.0 };
                    return (
                        left.easing_x.interpolate(left.x, right.x, alpha),
                        left.easing_y.interpolate(left.y, right.y, alpha),
                    );
                }
            }
            let last = &keys[keys.len() - 1];
            (last.x, last.y)
        }
    }
}

pub(crate) fn compile_rotate_frames(frames: &[RawRotateFrame]) -> Vec<ScalarKey> {
    let mut keys = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
        let easing = match frames.get(i + 1) {
            Some(next) => easing_between(&frame.curve, 0, frame.time, frame.value, next.time, next.value),
            None => TweenEasing::Linear,
        };
        keys.push(ScalarKey {
            time: frame.time,
            value: frame.value.to_radians(),
            easing,
        });
    }
    keys
}

/// `neutral` is the value an absent component stands for: 0 for translate
/// frames, 1 for scale frames.
pub(crate) fn compile_vector_frames(frames: &[RawVectorFrame], neutral: f32) -> Vec<VectorKey> {
    let mut keys = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
        let x = frame.x.unwrap_or(neutral);
        let y = frame.y.unwrap_or(neutral);
        let (easing_x, easing_y) = match frames.get(i + 1) {
            Some(next) => (
                easing_between(&frame.curve, 0, frame.time, x, next.time, next.x.unwrap_or(neutral)),
                easing_between(&frame.curve, 1, frame.time, y, next.time, next.y.unwrap_or(neutral)),
            ),
            None => (TweenEasing::Linear, TweenEasing::Linear),
        };
        keys.push(VectorKey { time: frame.time, x, y, easing_x, easing_y });
    }
    keys
}

// The export stores bezier handles in absolute time/value coordinates, one
// 4-tuple per curve component. The LUT wants them normalized to the span
// between the two keys.
fn easing_between(
    curve: &Option<RawCurve>,
    component: usize,
    time_0: f32,
    value_0: f32,
    time_1: f32,
    value_1: f32,
) -> TweenEasing {
    let curve = match curve {
        None => return TweenEasing::Linear,
        Some(it) => it,
    };
    match curve {
        RawCurve::Named(name) => {
            if name == "stepped" {
                TweenEasing::Stepped
            } else {
                warn!("unknown curve `{}` treated as linear", name);
                TweenEasing::Linear
            }
        }
        RawCurve::Handles(values) => {
            let offset = component * 4;
            let handles = if values.len() >= offset + 4 {
                &values[offset..offset + 4]
            } else if values.len() >= 4 {
                &values[0..4]
            } else {
                return TweenEasing::Linear;
            };
            let span_t = time_1 - time_0;
            let span_v = value_1 - value_0;
            if span_t <= 0.0 {
                return TweenEasing::Stepped;
            }
            if span_v == 0.0 {
                // constant between equal keys, any easing yields the same
                return TweenEasing::Linear;
            }
            let x1 = ((handles[0] - time_0) / span_t).clamp(0.0, 1.0);
            let y1 = ((handles[1] - value_0) / span_v).clamp(0.0, 1.0);
            let x2 = ((handles[2] - time_0) / span_t).clamp(0.0, 1.0);
            let y2 = ((handles[3] - value_0) / span_v).clamp(0.0, 1.0);
            TweenEasing::Bezier(BezierLut::bake(x1, y1, x2, y2))
        }
    }
}
