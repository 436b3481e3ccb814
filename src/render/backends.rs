//! File based media collaborators.
//!
//! Images load through the `image` crate. Without a video decoder in the
//! stack, a movie path names a frame sequence: either a directory of
//! image files or a glob pattern (`shot/frame_*.png`), frames in sorted
//! order. Proxies live at `<proxy_dir>/proxy_<pct>/...`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::entities::frame::{Frame, FrameError};
use crate::entities::scene::Scene;
use crate::entities::strip::{ProxySize, Strip, StripKind};
use crate::entities::traits::{
    ClipBackend, MaskRasterizer, MediaBackend, MovieDecoder, ProxyBackend, SceneRenderer,
};
use crate::paths::{proxy_image_path, proxy_movie_frame_path};

const IMAGE_EXTS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "tga", "bmp", "hdr"];

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTS.contains(&e.to_lowercase().as_str()))
}

/// Expand a glob pattern into a sorted list of image paths.
fn glob_frames(pattern: &str) -> Result<Vec<PathBuf>, FrameError> {
    let mut paths = Vec::new();
    for entry in glob::glob(pattern)
        .map_err(|e| FrameError::Io(format!("Glob error for pattern {}: {}", pattern, e)))?
    {
        match entry {
            Ok(path) if is_image_file(&path) => paths.push(path),
            Ok(_) => {}
            Err(e) => return Err(FrameError::Io(format!("Glob entry error: {}", e))),
        }
    }
    paths.sort();
    Ok(paths)
}

/// Movie decoder over an ordered list of frame files.
pub struct FrameSequenceDecoder {
    frames: Vec<PathBuf>,
}

impl FrameSequenceDecoder {
    pub fn open(path: &Path) -> Result<Self, FrameError> {
        let pattern = if path.is_dir() {
            path.join("*").to_string_lossy().into_owned()
        } else {
            path.to_string_lossy().into_owned()
        };
        let frames = glob_frames(&pattern)?;
        if frames.is_empty() {
            return Err(FrameError::Io(format!("No frames found for movie {}", path.display())));
        }
        Ok(Self { frames })
    }
}

impl MovieDecoder for FrameSequenceDecoder {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn decode(&mut self, frame_index: usize) -> Option<Frame> {
        let path = self.frames.get(frame_index)?;
        match Frame::load(path) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("Movie frame {} unreadable: {}", path.display(), e);
                None
            }
        }
    }
}

/// Images and frame-sequence movies from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileMediaBackend;

impl MediaBackend for FileMediaBackend {
    fn load_image(&self, path: &Path) -> Option<Frame> {
        match Frame::load(path) {
            Ok(frame) => Some(frame),
            Err(e) => {
                debug!("Image {} not loaded: {}", path.display(), e);
                None
            }
        }
    }

    fn open_movie(&self, path: &Path, stream: usize) -> Option<Box<dyn MovieDecoder>> {
        if stream != 0 {
            warn!("Movie {}: stream {} not available, frame sequences have one", path.display(), stream);
            return None;
        }
        match FrameSequenceDecoder::open(path) {
            Ok(decoder) => Some(Box::new(decoder)),
            Err(e) => {
                debug!("Movie {} not opened: {}", path.display(), e);
                None
            }
        }
    }
}

/// Proxies built next to the source media.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileProxyBackend;

impl FileProxyBackend {
    /// Proxy root of `strip`: the configured dir, else the source's dir.
    fn proxy_dir(strip: &Strip, source: &Path) -> Option<PathBuf> {
        strip
            .proxy
            .as_ref()
            .and_then(|p| p.dir.clone())
            .or_else(|| source.parent().map(Path::to_path_buf))
    }
}

impl ProxyBackend for FileProxyBackend {
    fn fetch_proxy(&self, strip: &Strip, frame_index: i32, _view_id: usize, size: ProxySize) -> Option<Frame> {
        let path = match &strip.kind {
            StripKind::Image { dir, files } => {
                let file = files.get(usize::try_from(frame_index).ok()?)?;
                let source = dir.join(file);
                proxy_image_path(&Self::proxy_dir(strip, &source)?, size.percent(), &source)?
            }
            StripKind::Movie { path, .. } => {
                proxy_movie_frame_path(&Self::proxy_dir(strip, path)?, size.percent(), path, frame_index)?
            }
            _ => return None,
        };
        if !path.exists() {
            trace!("No proxy at {}", path.display());
            return None;
        }
        Frame::load(&path).ok()
    }
}

/// Collaborator for builds without a clip tracker.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullClipBackend;

impl ClipBackend for NullClipBackend {
    fn fetch_clip(&self, clip: &str, _frame: i32, _proxy: Option<ProxySize>, _u: bool, _s: bool) -> Option<Frame> {
        trace!("No clip backend for {}", clip);
        None
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullMaskRasterizer;

impl MaskRasterizer for NullMaskRasterizer {
    fn rasterize(&self, mask: &str, _frame: f32, _width: usize, _height: usize) -> Option<Vec<f32>> {
        trace!("No mask rasterizer for {}", mask);
        None
    }
}

/// Scene strips render nothing without a 3D renderer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSceneRenderer;

impl SceneRenderer for NullSceneRenderer {
    fn render_viewport(&self, _scene: &Scene, _camera: Option<&str>, _size: (usize, usize), _view: usize) -> Option<Frame> {
        None
    }

    fn render_offline(&self, _scene: &Scene, _camera: Option<&str>, _size: (usize, usize)) -> Option<Vec<Frame>> {
        None
    }

    fn last_result(&self, _scene: &Scene, _view_id: usize) -> Option<Frame> {
        None
    }

    fn reevaluate(&self, _scene: &Scene) {}
}

/// Collaborators the pipeline pulls source pixels from.
#[derive(Clone)]
pub struct Backends {
    pub media: Arc<dyn MediaBackend>,
    pub proxy: Arc<dyn ProxyBackend>,
    pub clips: Arc<dyn ClipBackend>,
    pub masks: Arc<dyn MaskRasterizer>,
    pub scenes: Arc<dyn SceneRenderer>,
}

impl Backends {
    /// Disk media and proxies; clips, masks and 3D scenes unavailable.
    pub fn files() -> Self {
        Self {
            media: Arc::new(FileMediaBackend),
            proxy: Arc::new(FileProxyBackend),
            clips: Arc::new(NullClipBackend),
            masks: Arc::new(NullMaskRasterizer),
            scenes: Arc::new(NullSceneRenderer),
        }
    }

    pub fn with_media(mut self, media: Arc<dyn MediaBackend>) -> Self {
        self.media = media;
        self
    }

    pub fn with_proxy(mut self, proxy: Arc<dyn ProxyBackend>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_clips(mut self, clips: Arc<dyn ClipBackend>) -> Self {
        self.clips = clips;
        self
    }

    pub fn with_masks(mut self, masks: Arc<dyn MaskRasterizer>) -> Self {
        self.masks = masks;
        self
    }

    pub fn with_scenes(mut self, scenes: Arc<dyn SceneRenderer>) -> Self {
        self.scenes = scenes;
        self
    }
}

impl Default for Backends {
    fn default() -> Self {
        Self::files()
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}
