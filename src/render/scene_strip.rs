//! Scene strips: another scene's camera or compositor output.

use log::{debug, trace};
use uuid::Uuid;

use crate::entities::context::{CacheTier, RenderContext, RenderState};
use crate::entities::frame::Frame;
use crate::entities::scene::{FrameState, PreviewType, Scene};
use crate::entities::strip::Strip;
use crate::entities::traits::SceneRenderer;

use super::stack::RenderPass;

/// Moves a scene to a render frame and restores its frame state on drop.
///
/// Sequencer output of the scene is disabled while the guard lives. When
/// the frame changed, the scene is re-evaluated after the restore.
pub struct SceneFrameGuard<'a> {
    scene: &'a Scene,
    renderer: &'a dyn SceneRenderer,
    saved: FrameState,
    changed: bool,
}

impl<'a> SceneFrameGuard<'a> {
    pub fn enter(scene: &'a Scene, renderer: &'a dyn SceneRenderer, frame: f32) -> Self {
        let mut state = scene.frame_state();
        let saved = state.clone();
        state.cfra = frame.floor() as i32;
        state.subframe = frame - frame.floor();
        state.do_sequencer = false;
        let changed = state.cfra != saved.cfra || state.subframe != saved.subframe;
        drop(state);
        trace!("Scene {} moved to frame {}", scene.name, frame);
        Self { scene, renderer, saved, changed }
    }
}

impl Drop for SceneFrameGuard<'_> {
    fn drop(&mut self) {
        *self.scene.frame_state() = self.saved.clone();
        if self.changed {
            self.renderer.reevaluate(self.scene);
        }
    }
}

impl RenderPass<'_> {
    /// Render `scene_id` at the strip's frame through the scene renderer.
    ///
    /// No data when the scene is missing, is an ancestor of this render,
    /// or has neither a camera nor a compositor.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn render_scene_strip(
        &self,
        ctx: &RenderContext,
        state: &RenderState,
        strip: &Strip,
        scene_id: Uuid,
        camera_override: Option<&str>,
        frame_index: f32,
        frame: f32,
    ) -> Option<Frame> {
        let Some(scene) = ctx.scenes.get(scene_id) else {
            debug!("Strip {}: scene {} not found", strip.name, scene_id);
            return None;
        };
        if scene.uuid == ctx.scene.uuid || state.contains(scene.uuid) {
            trace!("Strip {}: scene {} already being rendered", strip.name, scene.name);
            return None;
        }
        let camera = camera_override.or(scene.camera.as_deref());
        if !scene.use_compositor && camera.is_none() {
            debug!("Strip {}: scene {} has no camera", strip.name, scene.name);
            return None;
        }

        let target_frame = frame_index + scene.sfra as f32 + strip.anim_startofs as f32;
        let renderer = self.engine.backends.scenes.as_ref();
        let _guard = SceneFrameGuard::enter(&scene, renderer, target_frame);

        let is_preview = !ctx.for_render && ctx.scene.preview_type != PreviewType::Render;
        if is_preview && camera.is_some() && ctx.env.main_thread {
            return renderer.render_viewport(&scene, camera, ctx.rect(), ctx.view_id);
        }

        let env = ctx.env;
        let views: Vec<Option<Frame>> = if !env.main_thread || !env.is_rendering || env.is_background || ctx.for_render {
            renderer
                .render_offline(&scene, camera, scene.render_size())?
                .into_iter()
                .map(Some)
                .collect()
        } else {
            // A final render owns the renderer; reuse its last result
            (0..scene.num_views()).map(|view_id| renderer.last_result(&scene, view_id)).collect()
        };

        for (view_id, view) in views.iter().enumerate() {
            if view_id == ctx.view_id {
                continue;
            }
            if let Some(image) = view {
                let mut local = ctx.clone();
                local.view_id = view_id;
                self.engine.cache_put(&local, strip.uuid, frame, CacheTier::Raw, image);
            }
        }
        views.into_iter().nth(ctx.view_id).flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::RecordingSceneRenderer;

    #[test]
    fn test_guard_restores_and_reevaluates() {
        let scene = Scene::new("inner", 4, 4);
        let renderer = RecordingSceneRenderer::default();
        let before = scene.frame_state().clone();
        {
            let _guard = SceneFrameGuard::enter(&scene, &renderer, 12.25);
            let state = scene.frame_state().clone();
            assert_eq!(state.cfra, 12);
            assert!((state.subframe - 0.25).abs() < 1e-6);
            assert!(!state.do_sequencer);
        }
        assert_eq!(*scene.frame_state(), before);
        assert_eq!(renderer.reevaluations(), 1);
    }

    /// Restored on unwinding too.
    #[test]
    fn test_guard_restores_on_panic() {
        let scene = Scene::new("inner", 4, 4);
        let renderer = RecordingSceneRenderer::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = SceneFrameGuard::enter(&scene, &renderer, 40.0);
            panic!("render failed");
        }));
        assert!(result.is_err());
        assert_eq!(scene.frame_state().cfra, 1);
        assert!(scene.frame_state().do_sequencer);
    }

    #[test]
    fn test_same_frame_skips_reevaluation() {
        let scene = Scene::new("inner", 4, 4);
        let renderer = RecordingSceneRenderer::default();
        drop(SceneFrameGuard::enter(&scene, &renderer, 1.0));
        assert_eq!(renderer.reevaluations(), 0);
    }
}
