//! Effects: blend, transition and generator strip types.
//!
//! # Architecture
//!
//! ```text
//! EffectType (serialized, with parameters)
//!   └── handle() -> EffectKind (enum_dispatch over EffectHandle)
//!         ├── early_out(fac)      which inputs are needed
//!         ├── default_fac()       fade curve for transitions
//!         ├── execute()           single-call effects (Single)
//!         └── init_execution() + execute_slice()   row-band effects (Threaded)
//! ```
//!
//! The stack compositor reuses the same handles for strip blend modes:
//! `EffectType::for_blend(mode)`.
//!
//! # Effect Types
//!
//! | Type | Inputs | Mode | Early out |
//! |------|--------|------|-----------|
//! | Cross, GammaCross | 2 | Threaded | fade 0 -> input 1, 1 -> input 2 |
//! | Add, Subtract, Multiply, ColorMix | 2 | Threaded | fac 0 -> input 1 |
//! | AlphaOver, AlphaUnder, OverDrop | 2 | Threaded | fac 0 -> input 2 |
//! | GaussianBlur | 1 | Threaded | zero size -> input 1 |
//! | Color | 0 | Single | no input |
//! | Speed | 1 | Single | always renders |
//! | Replace | 2 | Single | input 2 |
//!
//! Pixel math works on premultiplied float RGBA; byte buffers are
//! premultiplied on read and un-premultiplied on write.

pub mod blend;
pub mod blur;
pub mod generator;
pub mod speed;
pub mod transition;

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

use super::frame::{f32_to_u8, Frame, PixelBuffer};
use super::strip::{BlendMode, Strip};

pub use blend::{Add, AlphaOver, AlphaUnder, ColorMix, ColorMixBlend, Multiply, OverDrop, Subtract};
pub use blur::GaussianBlur;
pub use generator::{Replace, SolidColor, Unsupported};
pub use speed::{Speed, SpeedMode};
pub use transition::{Cross, GammaCross};

/// Which inputs an effect needs at a given factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyOut {
    /// Generator: render without inputs
    NoInput,
    DoEffect,
    /// Pass input 1 through unchanged
    UseInput1,
    /// Pass input 2 through unchanged
    UseInput2,
}

impl EarlyOut {
    /// Same classification with inputs 1 and 2 exchanged.
    pub fn swapped(self) -> Self {
        match self {
            EarlyOut::UseInput1 => EarlyOut::UseInput2,
            EarlyOut::UseInput2 => EarlyOut::UseInput1,
            other => other,
        }
    }
}

/// Calling convention of an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Single,
    Threaded,
    /// Neither convention: renders blank
    Unsupported,
}

/// Inputs of one effect evaluation.
#[derive(Debug, Clone)]
pub struct EffectArgs<'a> {
    pub strip: &'a Strip,
    pub frame: f32,
    pub fac: f32,
    /// Render rect (output size)
    pub rect: (usize, usize),
    pub inputs: [Option<&'a Frame>; 3],
}

impl<'a> EffectArgs<'a> {
    pub fn input(&self, i: usize) -> Option<&'a Frame> {
        self.inputs.get(i).copied().flatten()
    }

    /// True when any present input holds float pixels.
    pub fn any_float(&self) -> bool {
        self.inputs.iter().flatten().any(|f| f.is_float())
    }
}

/// Mutable row band of an effect output.
pub enum SliceData<'a> {
    U8(&'a mut [u8]),
    F32(&'a mut [f32]),
}

pub struct OutputSlice<'a> {
    pub width: usize,
    /// First output row covered by `data`
    pub start_line: usize,
    pub data: SliceData<'a>,
}

impl OutputSlice<'_> {
    pub fn rows(&self) -> usize {
        let len = match &self.data {
            SliceData::U8(d) => d.len(),
            SliceData::F32(d) => d.len(),
        };
        len / (self.width * 4).max(1)
    }
}

/// Capability set of one effect type.
#[enum_dispatch]
pub trait EffectHandle {
    fn num_inputs(&self) -> usize;

    fn early_out(&self, fac: f32) -> EarlyOut;

    /// Factor used when the strip asks for the default fade.
    fn default_fac(&self, _strip: &Strip, _frame: f32) -> f32 {
        1.0
    }

    fn exec_mode(&self) -> ExecMode;

    /// Single-call execution.
    fn execute(&self, _args: &EffectArgs) -> Option<Frame> {
        None
    }

    /// Allocate the output of a threaded execution.
    fn init_execution(&self, args: &EffectArgs) -> Frame {
        if args.any_float() {
            Frame::new_float(args.rect.0, args.rect.1)
        } else {
            Frame::new(args.rect.0, args.rect.1)
        }
    }

    /// Fill one row band of the output.
    fn execute_slice(&self, _args: &EffectArgs, _out: OutputSlice) {}
}

/// Dispatch table entry per effect type.
#[enum_dispatch(EffectHandle)]
#[derive(Debug, Clone)]
pub enum EffectKind {
    Cross(Cross),
    GammaCross(GammaCross),
    Add(Add),
    Subtract(Subtract),
    Multiply(Multiply),
    AlphaOver(AlphaOver),
    AlphaUnder(AlphaUnder),
    OverDrop(OverDrop),
    ColorMix(ColorMix),
    Color(SolidColor),
    Speed(Speed),
    GaussianBlur(GaussianBlur),
    Replace(Replace),
    Unsupported(Unsupported),
}

/// Serialized effect type with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EffectType {
    Cross,
    GammaCross,
    Add,
    Subtract,
    Multiply,
    AlphaOver,
    AlphaUnder,
    OverDrop,
    ColorMix {
        blend: ColorMixBlend,
        #[serde(default = "default_factor")]
        factor: f32,
    },
    Color {
        color: [f32; 4],
    },
    Speed {
        #[serde(default)]
        mode: SpeedMode,
        #[serde(default)]
        interpolate: bool,
    },
    GaussianBlur {
        size_x: f32,
        size_y: f32,
    },
    Replace,
    /// Types this build cannot evaluate
    #[serde(other)]
    Unknown,
}

fn default_factor() -> f32 {
    1.0
}

impl EffectType {
    pub fn handle(&self) -> EffectKind {
        match self {
            EffectType::Cross => Cross.into(),
            EffectType::GammaCross => GammaCross.into(),
            EffectType::Add => Add.into(),
            EffectType::Subtract => Subtract.into(),
            EffectType::Multiply => Multiply.into(),
            EffectType::AlphaOver => AlphaOver.into(),
            EffectType::AlphaUnder => AlphaUnder.into(),
            EffectType::OverDrop => OverDrop.into(),
            EffectType::ColorMix { blend, factor } => ColorMix { blend: *blend, factor: *factor }.into(),
            EffectType::Color { color } => SolidColor { color: *color }.into(),
            EffectType::Speed { mode, interpolate } => Speed { mode: *mode, interpolate: *interpolate }.into(),
            EffectType::GaussianBlur { size_x, size_y } => {
                GaussianBlur { size_x: *size_x, size_y: *size_y }.into()
            }
            EffectType::Replace => Replace.into(),
            EffectType::Unknown => Unsupported.into(),
        }
    }

    /// Effect evaluating a strip's blend mode against the strips below.
    pub fn for_blend(mode: BlendMode) -> EffectType {
        let mix = |blend| EffectType::ColorMix { blend, factor: 1.0 };
        match mode {
            BlendMode::Replace => EffectType::Replace,
            BlendMode::Cross => EffectType::Cross,
            BlendMode::Add => EffectType::Add,
            BlendMode::Subtract => EffectType::Subtract,
            BlendMode::AlphaOver => EffectType::AlphaOver,
            BlendMode::AlphaUnder => EffectType::AlphaUnder,
            BlendMode::GammaCross => EffectType::GammaCross,
            BlendMode::Multiply => EffectType::Multiply,
            BlendMode::OverDrop => EffectType::OverDrop,
            BlendMode::Screen => mix(ColorMixBlend::Screen),
            BlendMode::Lighten => mix(ColorMixBlend::Lighten),
            BlendMode::Darken => mix(ColorMixBlend::Darken),
            BlendMode::Difference => mix(ColorMixBlend::Difference),
            BlendMode::Overlay => mix(ColorMixBlend::Overlay),
            BlendMode::Divide => mix(ColorMixBlend::Divide),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            EffectType::Cross => "Cross",
            EffectType::GammaCross => "Gamma Cross",
            EffectType::Add => "Add",
            EffectType::Subtract => "Subtract",
            EffectType::Multiply => "Multiply",
            EffectType::AlphaOver => "Alpha Over",
            EffectType::AlphaUnder => "Alpha Under",
            EffectType::OverDrop => "Over Drop",
            EffectType::ColorMix { .. } => "Color Mix",
            EffectType::Color { .. } => "Color",
            EffectType::Speed { .. } => "Speed",
            EffectType::GaussianBlur { .. } => "Gaussian Blur",
            EffectType::Replace => "Replace",
            EffectType::Unknown => "Unknown",
        }
    }
}

/// Fade from 0 at the left handle to 1 at the right handle.
pub(crate) fn fade_fac(strip: &Strip, frame: f32) -> f32 {
    let len = (strip.right_handle() - strip.left_handle()) as f32;
    if len <= 0.0 {
        return 1.0;
    }
    ((frame - strip.left_handle() as f32) / len).clamp(0.0, 1.0)
}

#[inline]
fn premultiply(px: [f32; 4]) -> [f32; 4] {
    [px[0] * px[3], px[1] * px[3], px[2] * px[3], px[3]]
}

#[inline]
pub(crate) fn unpremultiply(px: [f32; 4]) -> [f32; 4] {
    if px[3] <= 0.0 {
        return [0.0; 4];
    }
    let inv = 1.0 / px[3];
    [px[0] * inv, px[1] * inv, px[2] * inv, px[3]]
}

/// Read premultiplied float RGBA at a linear pixel index.
#[inline]
pub(crate) fn read_premul(frame: Option<&Frame>, idx: usize) -> [f32; 4] {
    match frame {
        Some(f) => match f.buffer() {
            PixelBuffer::U8(_) => premultiply(f.buffer().pixel(idx)),
            PixelBuffer::F32(_) => f.buffer().pixel(idx),
        },
        None => [0.0; 4],
    }
}

/// Run a per-pixel kernel `f(input1, input2, pixel_index)` over a row band.
pub(crate) fn pixelwise_slice<F>(args: &EffectArgs, out: OutputSlice, f: F)
where
    F: Fn([f32; 4], [f32; 4], usize) -> [f32; 4],
{
    let a = args.input(0);
    let b = args.input(1);
    let base = out.start_line * out.width;
    match out.data {
        SliceData::F32(data) => {
            for (i, px) in data.chunks_exact_mut(4).enumerate() {
                let idx = base + i;
                px.copy_from_slice(&f(read_premul(a, idx), read_premul(b, idx), idx));
            }
        }
        SliceData::U8(data) => {
            for (i, px) in data.chunks_exact_mut(4).enumerate() {
                let idx = base + i;
                let result = unpremultiply(f(read_premul(a, idx), read_premul(b, idx), idx));
                for c in 0..4 {
                    px[c] = f32_to_u8(result[c]);
                }
            }
        }
    }
}

/// Evaluate a threaded effect on the calling thread (one slice).
pub fn execute_whole<H: EffectHandle + ?Sized>(handle: &H, args: &EffectArgs) -> Frame {
    let mut out = handle.init_execution(args);
    let width = out.width();
    let data = match out.buffer_mut() {
        PixelBuffer::U8(d) => SliceData::U8(d.as_mut_slice()),
        PixelBuffer::F32(d) => SliceData::F32(d.as_mut_slice()),
    };
    handle.execute_slice(args, OutputSlice { width, start_line: 0, data });
    out
}
