//! Scenes, their per-render frame state, and animation curves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::timeline::Editing;

/// Shading used when a scene strip is drawn in preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PreviewType {
    Wireframe,
    #[default]
    Solid,
    Material,
    /// Full render engine, same as final output
    Render,
}

/// One view of a multi-view scene (e.g. "left" with suffix "_L").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneView {
    pub name: String,
    pub suffix: String,
}

/// Linear keyframe curve.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FCurve {
    /// (frame, value) pairs, sorted by frame
    pub keys: Vec<[f32; 2]>,
}

impl FCurve {
    pub fn new(mut keys: Vec<[f32; 2]>) -> Self {
        keys.sort_by(|a, b| a[0].total_cmp(&b[0]));
        Self { keys }
    }

    /// Value at `frame`: linear between keys, constant outside.
    pub fn evaluate(&self, frame: f32) -> Option<f32> {
        let first = self.keys.first()?;
        let last = self.keys.last()?;
        if frame <= first[0] {
            return Some(first[1]);
        }
        if frame >= last[0] {
            return Some(last[1]);
        }
        let i = self.keys.partition_point(|k| k[0] <= frame);
        let [f0, v0] = self.keys[i - 1];
        let [f1, v1] = self.keys[i];
        let t = if f1 > f0 { (frame - f0) / (f1 - f0) } else { 0.0 };
        Some(v0 + (v1 - v0) * t)
    }
}

/// Curve bound to one strip property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveBinding {
    pub strip: Uuid,
    pub property: String,
    pub curve: FCurve,
}

/// Animation data of a scene.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnimCurves {
    #[serde(default)]
    pub bindings: Vec<CurveBinding>,
}

impl AnimCurves {
    pub fn find(&self, strip: Uuid, property: &str) -> Option<&FCurve> {
        self.bindings
            .iter()
            .find(|b| b.strip == strip && b.property == property)
            .map(|b| &b.curve)
    }

    pub fn bind(&mut self, strip: Uuid, property: &str, curve: FCurve) {
        self.bindings.retain(|b| !(b.strip == strip && b.property == property));
        self.bindings.push(CurveBinding { strip, property: property.to_string(), curve });
    }
}

/// Mutable per-scene evaluation state, touched when the scene is rendered
/// from a scene strip.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameState {
    pub cfra: i32,
    pub subframe: f32,
    /// Sequencer output enabled for this scene's own render
    pub do_sequencer: bool,
}

impl Default for FrameState {
    fn default() -> Self {
        Self { cfra: 1, subframe: 0.0, do_sequencer: true }
    }
}

fn default_size_percent() -> u32 {
    100
}

fn default_efra() -> i32 {
    250
}

fn default_sfra() -> i32 {
    1
}

/// Renderable scene: output size, frame range, strips, camera.
#[derive(Debug, Serialize, Deserialize)]
pub struct Scene {
    pub uuid: Uuid,
    pub name: String,
    pub width: usize,
    pub height: usize,
    #[serde(default = "default_size_percent")]
    pub size_percent: u32,
    #[serde(default = "default_sfra")]
    pub sfra: i32,
    #[serde(default = "default_efra")]
    pub efra: i32,
    #[serde(default)]
    pub editing: Editing,
    #[serde(default)]
    pub camera: Option<String>,
    #[serde(default)]
    pub use_compositor: bool,
    #[serde(default)]
    pub use_multiview: bool,
    #[serde(default)]
    pub views: Vec<SceneView>,
    #[serde(default)]
    pub preview_type: PreviewType,
    #[serde(default)]
    pub anim: AnimCurves,
    #[serde(skip)]
    state: Mutex<FrameState>,
}

impl Scene {
    pub fn new(name: &str, width: usize, height: usize) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            width,
            height,
            size_percent: 100,
            sfra: 1,
            efra: 250,
            editing: Editing::default(),
            camera: None,
            use_compositor: false,
            use_multiview: false,
            views: Vec::new(),
            preview_type: PreviewType::Solid,
            anim: AnimCurves::default(),
            state: Mutex::new(FrameState::default()),
        }
    }

    /// Lock the frame state. Poisoned locks are recovered.
    pub fn frame_state(&self) -> MutexGuard<'_, FrameState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn has_strips(&self) -> bool {
        !self.editing.timeline.strips.is_empty()
    }

    /// Number of views rendered for this scene.
    pub fn num_views(&self) -> usize {
        if self.use_multiview { self.views.len().max(1) } else { 1 }
    }

    pub fn view_suffix(&self, view_id: usize) -> Option<&str> {
        if !self.use_multiview {
            return None;
        }
        self.views.get(view_id).map(|v| v.suffix.as_str())
    }

    /// Output size scaled by `size_percent`.
    pub fn render_size(&self) -> (usize, usize) {
        (
            self.width * self.size_percent as usize / 100,
            self.height * self.size_percent as usize / 100,
        )
    }
}

/// Scenes by id, shared read-only during rendering.
#[derive(Debug, Clone, Default)]
pub struct SceneRegistry {
    scenes: HashMap<Uuid, Arc<Scene>>,
}

impl SceneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, scene: Scene) -> Arc<Scene> {
        let scene = Arc::new(scene);
        self.scenes.insert(scene.uuid, Arc::clone(&scene));
        scene
    }

    pub fn get(&self, uuid: Uuid) -> Option<Arc<Scene>> {
        self.scenes.get(&uuid).cloned()
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fcurve_linear_and_constant() {
        let c = FCurve::new(vec![[10.0, 1.0], [0.0, 0.0]]);
        assert_eq!(c.evaluate(-5.0), Some(0.0));
        assert_eq!(c.evaluate(5.0), Some(0.5));
        assert_eq!(c.evaluate(20.0), Some(1.0));
        assert_eq!(FCurve::default().evaluate(1.0), None);
    }

    #[test]
    fn test_anim_bind_replaces() {
        let id = Uuid::new_v4();
        let mut anim = AnimCurves::default();
        anim.bind(id, "effect_fader", FCurve::new(vec![[0.0, 0.2]]));
        anim.bind(id, "effect_fader", FCurve::new(vec![[0.0, 0.7]]));
        assert_eq!(anim.bindings.len(), 1);
        assert_eq!(anim.find(id, "effect_fader").and_then(|c| c.evaluate(3.0)), Some(0.7));
        assert!(anim.find(id, "mul").is_none());
    }

    #[test]
    fn test_scene_views() {
        let mut s = Scene::new("s", 1920, 1080);
        assert_eq!(s.num_views(), 1);
        assert_eq!(s.view_suffix(0), None);
        s.use_multiview = true;
        s.views = vec![
            SceneView { name: "left".into(), suffix: "_L".into() },
            SceneView { name: "right".into(), suffix: "_R".into() },
        ];
        assert_eq!(s.num_views(), 2);
        assert_eq!(s.view_suffix(1), Some("_R"));
        s.size_percent = 50;
        assert_eq!(s.render_size(), (960, 540));
    }

    #[test]
    fn test_frame_state_default() {
        let s = Scene::new("s", 4, 4);
        let state = s.frame_state();
        assert!(state.do_sequencer);
        assert_eq!(state.cfra, 1);
    }
}
