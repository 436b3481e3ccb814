//! Strip modifier stack: color operations run after preprocessing.
//!
//! # Modifier Types
//!
//! | Type | Parameters | Description |
//! |------|------------|-------------|
//! | **BrightContrast** | `bright: -100..100`, `contrast: -100..100` | Linear levels |
//! | **HueSaturation** | `hue_shift: -180..180`, `saturation`, `value` | HSV space |
//! | **ColorBalance** | `lift`, `gamma`, `gain` per RGB | Lift/gamma/gain grading |
//!
//! Each modifier returns `None` when it would not change the frame, so the
//! stack only produces a new buffer when something actually ran.

use serde::{Deserialize, Serialize};

use super::color::{hsv_to_rgb, map_rgb, rgb_to_hsv};
use super::frame::Frame;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ModifierKind {
    BrightContrast {
        bright: f32,
        contrast: f32,
    },
    HueSaturation {
        hue_shift: f32,
        saturation: f32,
        value: f32,
    },
    ColorBalance {
        lift: [f32; 3],
        gamma: [f32; 3],
        gain: [f32; 3],
    },
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modifier {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub kind: ModifierKind,
}

impl Modifier {
    pub fn new(name: &str, kind: ModifierKind) -> Self {
        Self { name: name.to_string(), enabled: true, kind }
    }

    /// Apply to `frame`; `None` if the modifier is a no-op.
    pub fn apply(&self, frame: &Frame) -> Option<Frame> {
        if !self.enabled {
            return None;
        }
        match self.kind {
            ModifierKind::BrightContrast { bright, contrast } => bright_contrast(frame, bright, contrast),
            ModifierKind::HueSaturation { hue_shift, saturation, value } => {
                hue_saturation(frame, hue_shift, saturation, value)
            }
            ModifierKind::ColorBalance { lift, gamma, gain } => color_balance(frame, lift, gamma, gain),
        }
    }
}

/// Run the stack in order. `None` when no modifier produced a new frame.
pub fn apply_stack(frame: &Frame, modifiers: &[Modifier]) -> Option<Frame> {
    let mut result: Option<Frame> = None;
    for modifier in modifiers {
        let current = result.as_ref().unwrap_or(frame);
        if let Some(next) = modifier.apply(current) {
            result = Some(next);
        }
    }
    result
}

fn bright_contrast(frame: &Frame, bright: f32, contrast: f32) -> Option<Frame> {
    if bright.abs() < 1e-4 && contrast.abs() < 1e-4 {
        return None;
    }
    let brightness = bright / 100.0;
    let delta = contrast / 200.0;
    let (a, b) = if contrast > 0.0 {
        let a = 1.0 / (1.0 - delta * 2.0).max(f32::EPSILON);
        (a, a * (brightness - delta))
    } else {
        let delta = -delta;
        let a = (1.0 - delta * 2.0).max(0.0);
        (a, a * brightness + delta)
    };

    let mut out = frame.clone();
    map_rgb(&mut out, |rgb| rgb.map(|v| a * v + b));
    Some(out)
}

fn hue_saturation(frame: &Frame, hue_shift: f32, saturation: f32, value: f32) -> Option<Frame> {
    if hue_shift.abs() < 0.01 && (saturation - 1.0).abs() < 0.001 && (value - 1.0).abs() < 0.001 {
        return None;
    }
    let mut out = frame.clone();
    map_rgb(&mut out, |[r, g, b]| {
        let (h, s, v) = rgb_to_hsv(r, g, b);
        let (r, g, b) = hsv_to_rgb(
            (h + hue_shift).rem_euclid(360.0),
            (s * saturation).clamp(0.0, 1.0),
            v * value,
        );
        [r, g, b]
    });
    Some(out)
}

fn color_balance(frame: &Frame, lift: [f32; 3], gamma: [f32; 3], gain: [f32; 3]) -> Option<Frame> {
    if lift == [1.0; 3] && gamma == [1.0; 3] && gain == [1.0; 3] {
        return None;
    }
    // lift 1 = neutral, pulls shadows towards (2 - lift)
    let lift = lift.map(|l| 2.0 - l);
    let inv_gamma = gamma.map(|g| if g > 0.0 { 1.0 / g } else { 1e6 });

    let mut out = frame.clone();
    map_rgb(&mut out, |rgb| {
        let mut result = [0.0; 3];
        for c in 0..3 {
            let x = (((rgb[c] - 1.0) * lift[c]) + 1.0) * gain[c];
            result[c] = x.max(0.0).powf(inv_gamma[c]);
        }
        result
    });
    Some(out)
}
