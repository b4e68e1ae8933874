//! Mesh scene and blend-shape channel resolution

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::lipsync::LipSyncFrame;
use crate::{Error, Result};

/// Mesh the head rig exports its face morphs on
pub const HEAD_MESH: &str = "Wolf3D_Head";

/// Exact mouth channel names, checked first
const MOUTH_EXACT: &[&str] = &["mouthOpen", "JawOpen", "jawOpen"];

/// Exact smile channel names, checked first
const SMILE_EXACT: &[&str] = &["mouthSmile", "smile", "smileLeft", "smileRight"];

/// Case-insensitive mouth candidates
const MOUTH_CANDIDATES: &[&str] = &["mouthopen", "jawopen", "vrc.v_aa", "viseme_aa", "open"];

/// Case-insensitive smile candidates
const SMILE_CANDIDATES: &[&str] = &["mouthsmile", "smile", "smileleft", "smileright"];

/// Name fragments of meshes that stay visible
const HEAD_PARTS: &[&str] = &["head", "hair", "teeth", "brow", "lash", "eye"];

/// One mesh with named morph targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    /// Mesh name as exported by the model
    pub name: String,

    /// Morph target names, in influence order
    #[serde(default)]
    pub morph_targets: Vec<String>,

    /// Influence per morph target, each in [0, 1]
    #[serde(default)]
    pub influences: Vec<f32>,

    /// Drawn by the renderer
    #[serde(default = "default_visible")]
    pub visible: bool,
}

const fn default_visible() -> bool {
    true
}

impl Mesh {
    /// A visible mesh with all influences at 0
    #[must_use]
    pub fn new(name: impl Into<String>, morph_targets: &[&str]) -> Self {
        Self {
            name: name.into(),
            morph_targets: morph_targets.iter().map(ToString::to_string).collect(),
            influences: vec![0.0; morph_targets.len()],
            visible: true,
        }
    }

    /// True if this mesh carries any morph targets
    #[must_use]
    pub fn has_morphs(&self) -> bool {
        !self.morph_targets.is_empty()
    }

    /// Influence of a morph target, 0 when out of range
    #[must_use]
    pub fn influence(&self, index: usize) -> f32 {
        self.influences.get(index).copied().unwrap_or(0.0)
    }

    /// Influence of a morph target by name
    #[must_use]
    pub fn influence_by_name(&self, name: &str) -> Option<f32> {
        let index = self.morph_targets.iter().position(|t| t == name)?;
        Some(self.influence(index))
    }

    fn set_influence(&mut self, index: usize, value: f32) {
        if let Some(slot) = self.influences.get_mut(index) {
            *slot = value.clamp(0.0, 1.0);
        }
    }

    fn mouth_index(&self) -> Option<usize> {
        resolve_channel(&self.morph_targets, MOUTH_EXACT, MOUTH_CANDIDATES)
    }

    fn smile_index(&self) -> Option<usize> {
        resolve_channel(&self.morph_targets, SMILE_EXACT, SMILE_CANDIDATES)
    }
}

/// A loaded model: a flat list of meshes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Meshes in model order
    pub meshes: Vec<Mesh>,
}

impl Scene {
    /// Build a scene and normalise its influence arrays
    #[must_use]
    pub fn new(meshes: Vec<Mesh>) -> Self {
        let mut scene = Self { meshes };
        scene.normalise();
        scene
    }

    /// Load a scene manifest from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not a valid manifest
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let scene: Self = serde_json::from_str(&contents)
            .map_err(|e| Error::Scene(format!("{}: {e}", path.display())))?;

        if scene.meshes.is_empty() {
            return Err(Error::Scene(format!("{}: no meshes", path.display())));
        }

        tracing::debug!(path = %path.display(), meshes = scene.meshes.len(), "scene loaded");
        Ok(Self::new(scene.meshes))
    }

    /// Built-in half-body head rig with the usual face morphs
    #[must_use]
    pub fn default_head() -> Self {
        Self::new(vec![
            Mesh::new(
                HEAD_MESH,
                &[
                    "mouthOpen",
                    "mouthSmile",
                    "eyesClosed",
                    "eyesLookUp",
                    "eyesLookDown",
                    "viseme_aa",
                    "viseme_O",
                ],
            ),
            Mesh::new("Wolf3D_Teeth", &["mouthOpen", "mouthSmile"]),
            Mesh::new("Wolf3D_Hair", &[]),
            Mesh::new("EyeLeft", &["eyesClosed"]),
            Mesh::new("EyeRight", &["eyesClosed"]),
            Mesh::new("Wolf3D_Body", &[]),
            Mesh::new("Wolf3D_Outfit_Top", &[]),
        ])
    }

    /// Show head parts only
    pub fn hide_non_head_parts(&mut self) {
        for mesh in &mut self.meshes {
            let name = mesh.name.to_lowercase();
            mesh.visible = HEAD_PARTS.iter().any(|part| name.contains(part));
        }
    }

    /// Mesh by name
    #[must_use]
    pub fn mesh(&self, name: &str) -> Option<&Mesh> {
        self.meshes.iter().find(|m| m.name == name)
    }

    /// Names of visible meshes
    #[must_use]
    pub fn visible_meshes(&self) -> Vec<&str> {
        self.meshes
            .iter()
            .filter(|m| m.visible)
            .map(|m| m.name.as_str())
            .collect()
    }

    fn normalise(&mut self) {
        for mesh in &mut self.meshes {
            mesh.influences.resize(mesh.morph_targets.len(), 0.0);
            for value in &mut mesh.influences {
                *value = value.clamp(0.0, 1.0);
            }
        }
    }
}

/// Where lip-sync writes inside a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendShapeBinding {
    /// Index into `Scene::meshes`
    pub mesh: usize,
    /// Mouth-open morph index
    pub mouth: usize,
    /// Smile morph index, if the mesh has one
    pub smile: Option<usize>,
}

impl BlendShapeBinding {
    /// Pick the mesh and channels lip-sync drives
    ///
    /// Prefers the head mesh, then any mesh with a mouth channel, then the
    /// first morph target of the first morph-capable mesh. `None` when no
    /// mesh has morph targets.
    #[must_use]
    pub fn resolve(scene: &Scene) -> Option<Self> {
        let bind = |mesh: usize, mouth: usize| Self {
            mesh,
            mouth,
            smile: scene.meshes[mesh].smile_index(),
        };

        let head = scene
            .meshes
            .iter()
            .position(|m| m.name == HEAD_MESH && m.has_morphs());

        if let Some(index) = head
            && let Some(mouth) = scene.meshes[index].mouth_index()
        {
            return Some(bind(index, mouth));
        }

        if let Some((index, mouth)) = scene
            .meshes
            .iter()
            .enumerate()
            .find_map(|(i, m)| m.mouth_index().map(|mouth| (i, mouth)))
        {
            return Some(bind(index, mouth));
        }

        let fallback = head.or_else(|| scene.meshes.iter().position(Mesh::has_morphs))?;
        tracing::debug!(
            mesh = %scene.meshes[fallback].name,
            "no mouth channel found, driving first morph target"
        );
        Some(bind(fallback, 0))
    }

    /// Write a frame's channel values into the bound mesh
    pub fn apply(&self, scene: &mut Scene, frame: &LipSyncFrame) {
        let Some(mesh) = scene.meshes.get_mut(self.mesh) else {
            return;
        };
        mesh.set_influence(self.mouth, frame.mouth);
        if let Some(smile) = self.smile
            && smile != self.mouth
        {
            mesh.set_influence(smile, frame.smile);
        }
    }
}

fn resolve_channel(targets: &[String], exact: &[&str], candidates: &[&str]) -> Option<usize> {
    if let Some(index) = exact
        .iter()
        .find_map(|name| targets.iter().position(|t| t == name))
    {
        return Some(index);
    }

    let lowered: Vec<String> = targets.iter().map(|t| t.to_lowercase()).collect();
    candidates.iter().find_map(|candidate| {
        let suffix = format!(".{candidate}");
        lowered.iter().position(|name| {
            name == candidate
                || name.ends_with(&suffix)
                || (candidate.contains("open") && name.contains("mouth") && name.contains("open"))
        })
    })
}
