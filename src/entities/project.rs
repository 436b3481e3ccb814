//! Project: the unit of serialization.
//!
//! Holds every scene of a document and the id of the one to render.
//! Saved and loaded as JSON via `Project::to_json` / `Project::from_json`.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::scene::{Scene, SceneRegistry};

#[derive(Debug, Serialize, Deserialize)]
pub struct Project {
    pub scenes: Vec<Scene>,
    /// Scene rendered by default (first scene when absent)
    #[serde(default)]
    pub active: Option<Uuid>,
}

impl Project {
    pub fn new(scenes: Vec<Scene>) -> Self {
        let active = scenes.first().map(|s| s.uuid);
        Self { scenes, active }
    }

    /// Serialize project to JSON file.
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Serialize project")?;
        let path = path.as_ref();
        fs::write(path, json).with_context(|| format!("Write project {}", path.display()))?;
        Ok(())
    }

    /// Load a project and check every timeline in it.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Read project {}", path.display()))?;
        let project: Project = serde_json::from_str(&json)
            .with_context(|| format!("Parse project {}", path.display()))?;

        for scene in &project.scenes {
            scene
                .editing
                .timeline
                .validate()
                .map_err(|e| anyhow!("Scene '{}': {}", scene.name, e))?;
        }
        info!("Loaded project {} ({} scenes)", path.display(), project.scenes.len());
        Ok(project)
    }

    /// Move scenes into a registry, returning it with the active scene.
    pub fn into_registry(self) -> Result<(SceneRegistry, Arc<Scene>)> {
        let active = self
            .active
            .or_else(|| self.scenes.first().map(|s| s.uuid))
            .ok_or_else(|| anyhow!("Project has no scenes"))?;

        let mut registry = SceneRegistry::new();
        for scene in self.scenes {
            registry.insert(scene);
        }
        let scene = registry
            .get(active)
            .ok_or_else(|| anyhow!("Active scene {} not found", active))?;
        Ok((registry, scene))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::strip::{Strip, StripKind};
    use crate::entities::effects::EffectType;

    #[test]
    fn test_json_roundtrip_keeps_active() {
        let mut main = Scene::new("Main", 64, 36);
        main.editing.timeline.add_strip(Strip::new(
            "color",
            StripKind::Effect { effect: EffectType::Color { color: [1.0, 0.0, 0.0, 1.0] }, inputs: vec![] },
            1,
            1,
            10,
        )).unwrap();
        let other = Scene::new("Other", 8, 8);
        let other_id = other.uuid;
        let mut project = Project::new(vec![main, other]);
        project.active = Some(other_id);

        let path = std::env::temp_dir().join(format!("seqrender-project-{}.json", Uuid::new_v4()));
        project.to_json(&path).unwrap();
        let loaded = Project::from_json(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let (registry, active) = loaded.into_registry().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(active.name, "Other");
    }

    #[test]
    fn test_empty_project_has_no_active() {
        assert!(Project::new(Vec::new()).into_registry().is_err());
    }
}
