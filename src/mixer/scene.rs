//! Scene definitions and the on-disk scene store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Reveal output ids; the only non-camera sources a scene may reference.
pub const SLIDES: &str = "slides";
pub const SLIDES_OVERLAY: &str = "slides_overlay";

/// Publish paths owned by the engine itself; cameras may not claim them.
pub const RESERVED_SOURCE_IDS: &[&str] = &[SLIDES, SLIDES_OVERLAY, "mixer_program"];

/// Declarative layout mapping sources to normalized placements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,

    pub width: u32,
    pub height: u32,

    pub slots: Vec<Slot>,
}

/// One placed source within a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub source: String,

    /// Normalized placement, all in [0, 1] of the output frame.
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,

    #[serde(default)]
    pub z: u32,

    #[serde(default = "default_alpha")]
    pub alpha: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<Crop>,
}

/// Pixel crop applied to the source before scaling into its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Crop {
    #[serde(default)]
    pub left: u32,
    #[serde(default)]
    pub right: u32,
    #[serde(default)]
    pub top: u32,
    #[serde(default)]
    pub bottom: u32,
}

fn default_alpha() -> f64 {
    1.0
}

impl Scene {
    /// Schema validation; a scene that fails here never enters the store.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidRequest("scene with empty id".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidRequest(format!("scene '{}' has a zero output dimension", self.id)));
        }
        if self.slots.is_empty() {
            return Err(Error::InvalidRequest(format!("scene '{}' has no slots", self.id)));
        }

        let mut seen = std::collections::HashSet::new();
        for slot in &self.slots {
            if slot.source.is_empty() {
                return Err(Error::InvalidRequest(format!("scene '{}' has a slot without a source", self.id)));
            }
            // Compositor pads are registered per source; a layout placing
            // the same source twice is rejected rather than guessed at.
            if !seen.insert(slot.source.as_str()) {
                return Err(Error::InvalidRequest(format!(
                    "scene '{}' references source '{}' more than once",
                    self.id, slot.source
                )));
            }
            for (name, v) in [("x", slot.x), ("y", slot.y), ("w", slot.w), ("h", slot.h), ("alpha", slot.alpha)] {
                if !(0.0..=1.0).contains(&v) {
                    return Err(Error::InvalidRequest(format!(
                        "scene '{}', source '{}': {name}={v} outside [0, 1]",
                        self.id, slot.source
                    )));
                }
            }
        }
        Ok(())
    }

    /// Source ids referenced by this scene, slot order.
    pub fn sources(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.source.as_str()).collect()
    }

    pub fn slot_for(&self, source: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.source == source)
    }
}

/// Loads and serves scene definitions from a directory.
pub struct SceneStore {
    dir: PathBuf,
    scenes: RwLock<BTreeMap<String, Arc<Scene>>>,
}

impl SceneStore {
    /// Load every scene under `dir`. A missing directory yields an empty
    /// store; per-file schema violations are skipped with a warning.
    pub fn load(dir: impl Into<PathBuf>) -> Self {
        let store = SceneStore { dir: dir.into(), scenes: RwLock::new(BTreeMap::new()) };
        store.reload();
        store
    }

    /// Re-scan the scene directory.
    pub fn reload(&self) {
        let mut scenes = BTreeMap::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Scene directory unreadable");
                *self.scenes.write() = scenes;
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            // Hidden and metadata files (.DS_Store, editor droppings) are
            // not scenes.
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            match Self::load_file(&path) {
                Ok(scene) => {
                    debug!(scene = %scene.id, file = %name, "Scene loaded");
                    scenes.insert(scene.id.clone(), Arc::new(scene));
                }
                Err(e) => {
                    warn!(file = %name, error = %e, "Scene rejected");
                }
            }
        }
        *self.scenes.write() = scenes;
    }

    fn load_file(path: &Path) -> Result<Scene> {
        let content = std::fs::read_to_string(path)?;
        let scene: Scene = serde_json::from_str(&content)
            .map_err(|e| Error::InvalidRequest(format!("scene schema violation: {e}")))?;
        scene.validate()?;
        Ok(scene)
    }

    pub fn list(&self) -> Vec<Arc<Scene>> {
        self.scenes.read().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Result<Arc<Scene>> {
        self.scenes
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownId { kind: "scene", id: id.to_string() })
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.read().is_empty()
    }

    /// First scene id in lexical order, the default program at mixer start.
    pub fn first_id(&self) -> Option<String> {
        self.scenes.read().keys().next().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene_json(id: &str, sources: &[&str]) -> String {
        let slots: Vec<String> = sources
            .iter()
            .map(|s| format!(r#"{{"source":"{s}","x":0.0,"y":0.0,"w":0.5,"h":0.5,"z":1}}"#))
            .collect();
        format!(
            r#"{{"id":"{id}","width":1920,"height":1080,"slots":[{}]}}"#,
            slots.join(",")
        )
    }

    #[test]
    fn loads_valid_scenes_and_skips_hidden_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("quad.json"), scene_json("quad", &["cam0", "cam1"])).unwrap();
        std::fs::write(dir.path().join(".DS_Store"), "junk").unwrap();
        std::fs::write(dir.path().join(".hidden.json"), "junk").unwrap();
        std::fs::write(dir.path().join("readme.txt"), "not a scene").unwrap();

        let store = SceneStore::load(dir.path());
        let scenes = store.list();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].id, "quad");
        assert_eq!(scenes[0].sources(), vec!["cam0", "cam1"]);
    }

    #[test]
    fn rejects_schema_violations_without_dropping_valid_scenes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.json"), scene_json("good", &["cam0"])).unwrap();
        std::fs::write(
            dir.path().join("bad.json"),
            r#"{"id":"bad","width":1920,"height":1080,"slots":[{"source":"cam0","x":1.5,"y":0,"w":1,"h":1}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("worse.json"), "{ not json").unwrap();

        let store = SceneStore::load(dir.path());
        assert_eq!(store.list().len(), 1);
        assert!(store.get("good").is_ok());
        assert!(matches!(store.get("bad"), Err(Error::UnknownId { kind: "scene", .. })));
    }

    #[test]
    fn duplicate_source_in_one_scene_is_rejected() {
        let scene: Scene =
            serde_json::from_str(&scene_json("dup", &["cam0", "cam0"])).unwrap();
        assert!(scene.validate().is_err());
    }

    #[test]
    fn missing_directory_is_an_empty_store() {
        let store = SceneStore::load("/nonexistent/scenes");
        assert!(store.is_empty());
        assert!(store.first_id().is_none());
    }

    #[test]
    fn scene_serialization_round_trips() {
        let scene: Scene = serde_json::from_str(&scene_json("quad", &["cam0", "cam1"])).unwrap();
        let json = serde_json::to_string(&scene).unwrap();
        let back: Scene = serde_json::from_str(&json).unwrap();
        assert_eq!(scene, back);
    }

    #[test]
    fn alpha_defaults_to_opaque() {
        let scene: Scene = serde_json::from_str(&scene_json("s", &["cam0"])).unwrap();
        assert_eq!(scene.slots[0].alpha, 1.0);
        assert!(scene.slots[0].crop.is_none());
    }
}
