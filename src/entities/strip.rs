//! Strip: one timeline entity producing or transforming image content.
//!
//! # Time model
//!
//! ```text
//!   start                         start + len
//!     |<========= content =========>|
//!  |<-- left_handle      right_handle -->|
//!  hold frames (before/after content) repeat the first/last content frame
//! ```
//!
//! - `start` - timeline frame of the first content frame
//! - `len` - content length in frames
//! - `startofs` / `endofs` - handle offsets; negative values extend into holds
//! - `anim_startofs` - frames skipped at the head of the source media

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::effects::EffectType;
use super::modifiers::Modifier;
use super::timeline::Timeline;
use super::transform::{StripCrop, StripTransform};

/// How a strip is combined with the strips below it.
///
/// Every mode except `Replace` is evaluated by the matching blend effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Replace,
    Cross,
    Add,
    Subtract,
    AlphaOver,
    AlphaUnder,
    GammaCross,
    Multiply,
    OverDrop,
    Screen,
    Lighten,
    Darken,
    Difference,
    Overlay,
    Divide,
}

impl BlendMode {
    /// Blend modes whose effect takes (foreground, background) instead of
    /// (background, foreground).
    pub fn swaps_inputs(self) -> bool {
        matches!(self, BlendMode::AlphaOver | BlendMode::AlphaUnder | BlendMode::OverDrop)
    }
}

/// Stereo pair packed in a single source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StereoLayout {
    #[default]
    SideBySide,
    TopBottom,
}

/// Where a multi-view strip finds its views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ViewsFormat {
    /// One file per view, named with the view suffix
    #[default]
    Individual,
    /// Left/right packed into one file
    Stereo3d(StereoLayout),
}

/// Proxy resolution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProxySize {
    P25,
    P50,
    P75,
    P100,
}

impl ProxySize {
    pub fn percent(self) -> u32 {
        match self {
            ProxySize::P25 => 25,
            ProxySize::P50 => 50,
            ProxySize::P75 => 75,
            ProxySize::P100 => 100,
        }
    }

    /// Largest first.
    pub const DESCENDING: [ProxySize; 4] = [ProxySize::P100, ProxySize::P75, ProxySize::P50, ProxySize::P25];
}

/// Built proxies of a strip.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub sizes: Vec<ProxySize>,
    /// Proxy root; `None` lets the backend look next to the source
    pub dir: Option<PathBuf>,
}

/// Strip content by type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StripKind {
    /// One file per frame slot
    Image { dir: PathBuf, files: Vec<String> },
    /// Single-file movie
    Movie {
        path: PathBuf,
        #[serde(default)]
        stream: usize,
    },
    /// Tracked movie clip
    MovieClip {
        clip: String,
        #[serde(default)]
        undistorted: bool,
        #[serde(default)]
        stabilized: bool,
    },
    Mask { mask: String },
    /// Another scene's camera view, or its own strips when `use_strips` is set
    Scene {
        scene: Uuid,
        #[serde(default)]
        camera: Option<String>,
        #[serde(default)]
        use_strips: bool,
    },
    Meta { timeline: Timeline },
    Effect {
        effect: EffectType,
        #[serde(default)]
        inputs: Vec<Uuid>,
    },
    Sound,
}

impl StripKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            StripKind::Image { .. } => "Image",
            StripKind::Movie { .. } => "Movie",
            StripKind::MovieClip { .. } => "MovieClip",
            StripKind::Mask { .. } => "Mask",
            StripKind::Scene { .. } => "Scene",
            StripKind::Meta { .. } => "Meta",
            StripKind::Effect { .. } => "Effect",
            StripKind::Sound => "Sound",
        }
    }
}

/// Boolean strip options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StripFlags {
    pub mute: bool,
    pub reverse: bool,
    pub filter_y: bool,
    pub flip_x: bool,
    pub flip_y: bool,
    pub make_float: bool,
    pub use_default_fade: bool,
    pub use_views: bool,
    pub use_proxy: bool,
}

/// Set once thumbnail generation failed for the strip.
#[derive(Debug, Default)]
pub struct ThumbnailSkip(AtomicBool);

impl ThumbnailSkip {
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::Relaxed);
    }
}

impl Clone for ThumbnailSkip {
    fn clone(&self) -> Self {
        Self(AtomicBool::new(self.get()))
    }
}

/// Timeline strip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strip {
    pub uuid: Uuid,
    pub name: String,
    pub kind: StripKind,
    /// Stacking lane, 1 is the bottom
    pub channel: i32,
    pub start: i32,
    pub len: i32,
    #[serde(default)]
    pub startofs: i32,
    #[serde(default)]
    pub endofs: i32,
    #[serde(default)]
    pub anim_startofs: i32,
    #[serde(default)]
    pub anim_endofs: i32,
    #[serde(default = "default_one")]
    pub strobe: f32,
    #[serde(default)]
    pub flags: StripFlags,
    #[serde(default)]
    pub transform: StripTransform,
    #[serde(default)]
    pub crop: StripCrop,
    #[serde(default)]
    pub blend_mode: BlendMode,
    /// 0-100
    #[serde(default = "default_opacity")]
    pub blend_opacity: f32,
    #[serde(default = "default_one")]
    pub mul: f32,
    #[serde(default = "default_one")]
    pub saturation: f32,
    /// Static effect factor, used when no animation curve drives it
    #[serde(default = "default_one")]
    pub effect_fader: f32,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    #[serde(default)]
    pub views_format: ViewsFormat,
    #[serde(default)]
    pub proxy: Option<ProxySettings>,
    #[serde(skip)]
    pub skip_thumbnails: ThumbnailSkip,
}

fn default_one() -> f32 {
    1.0
}

fn default_opacity() -> f32 {
    100.0
}

impl Strip {
    pub fn new(name: &str, kind: StripKind, channel: i32, start: i32, len: i32) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            kind,
            channel,
            start,
            len,
            startofs: 0,
            endofs: 0,
            anim_startofs: 0,
            anim_endofs: 0,
            strobe: 1.0,
            flags: StripFlags::default(),
            transform: StripTransform::default(),
            crop: StripCrop::default(),
            blend_mode: BlendMode::Replace,
            blend_opacity: 100.0,
            mul: 1.0,
            saturation: 1.0,
            effect_fader: 1.0,
            modifiers: Vec::new(),
            views_format: ViewsFormat::Individual,
            proxy: None,
            skip_thumbnails: ThumbnailSkip::default(),
        }
    }

    /// Builder-style blend setup.
    pub fn with_blend(mut self, mode: BlendMode, opacity: f32) -> Self {
        self.blend_mode = mode;
        self.blend_opacity = opacity;
        self
    }

    /// First rendered timeline frame.
    pub fn left_handle(&self) -> i32 {
        self.start + self.startofs
    }

    /// One past the last rendered timeline frame.
    pub fn right_handle(&self) -> i32 {
        self.start + self.len - self.endofs
    }

    pub fn content_end(&self) -> i32 {
        self.start + self.len
    }

    pub fn has_right_still_frames(&self) -> bool {
        self.right_handle() > self.content_end()
    }

    pub fn intersects(&self, frame: f32) -> bool {
        self.left_handle() as f32 <= frame && frame < self.right_handle() as f32
    }

    pub fn is_effect(&self) -> bool {
        matches!(self.kind, StripKind::Effect { .. })
    }

    pub fn is_sound(&self) -> bool {
        matches!(self.kind, StripKind::Sound)
    }

    pub fn effect_inputs(&self) -> &[Uuid] {
        match &self.kind {
            StripKind::Effect { inputs, .. } => inputs,
            _ => &[],
        }
    }

    /// Map a timeline frame to a content frame index.
    ///
    /// Hold frames clamp to the first/last content frame; reversed strips
    /// count from the end; strobe holds every Nth frame. Returns -1 for
    /// strips without content.
    pub fn give_frame_index(&self, frame: f32) -> f32 {
        let sta = self.start as f32;
        let end = (self.start + self.len - 1) as f32;
        if self.len <= 0 || end < sta {
            return -1.0;
        }

        let mut index = if self.flags.reverse { end - frame } else { frame - sta };
        index = index.clamp(0.0, end - sta);

        let strobe = self.strobe.max(1.0);
        if strobe > 1.0 {
            index -= index % strobe;
        }
        index
    }

    /// Effective multiply factor: `mul`, folded with opacity for replace blending.
    pub fn effective_mul(&self) -> f32 {
        if self.blend_mode == BlendMode::Replace {
            self.mul * self.blend_opacity / 100.0
        } else {
            self.mul
        }
    }

    pub fn has_proxy(&self, size: ProxySize) -> bool {
        self.flags.use_proxy && self.proxy.as_ref().is_some_and(|p| p.sizes.contains(&size))
    }
}
