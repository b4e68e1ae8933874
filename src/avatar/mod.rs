//! Talking head view
//!
//! An [`AvatarView`] binds a scene to the shared audio sink. Each frame it
//! follows sink identity changes, samples its analysis tap, and writes the
//! lip-sync channels into the bound mesh. Mounting and unmounting a view
//! never starts, stops, or disposes audio.

mod animator;
mod scene;
mod sway;

use std::f32::consts::{FRAC_PI_2, FRAC_PI_3};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::broadcast::{self, error::TryRecvError};

pub use animator::Animator;
pub use scene::{BlendShapeBinding, HEAD_MESH, Mesh, Scene};
pub use sway::{HeadPose, HeadSway};

use crate::analysis::{AnalysisRegistry, AnalysisTap};
use crate::audio::{AudioSink, MascotAudio, SinkEvent, SinkId};
use crate::lipsync::{LipSyncConfig, LipSyncDriver, LipSyncFrame};

/// Avatar configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AvatarSettings {
    /// Animation frame rate
    pub fps: u32,

    /// Scene manifest; the built-in head is used when unset
    pub scene: Option<PathBuf>,
}

impl Default for AvatarSettings {
    fn default() -> Self {
        Self {
            fps: 60,
            scene: None,
        }
    }
}

impl AvatarSettings {
    /// Load the configured scene, falling back to the built-in head
    ///
    /// # Errors
    ///
    /// Returns error if a configured manifest cannot be loaded
    pub fn load_scene(&self) -> crate::Result<Scene> {
        self.scene
            .as_deref()
            .map_or_else(|| Ok(Scene::default_head()), Scene::from_json_file)
    }
}

/// Fixed framing camera with a limited orbit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Eye position in scene units
    pub position: [f32; 3],
    /// Point the camera looks at
    pub target: [f32; 3],
    /// Vertical field of view in degrees
    pub fov: f32,
    /// Lowest orbit polar angle in radians
    pub min_polar: f32,
    /// Highest orbit polar angle in radians
    pub max_polar: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: [0.0, 0.85, 1.1],
            target: [0.0, 0.7, 0.0],
            fov: 22.0,
            min_polar: FRAC_PI_3,
            max_polar: FRAC_PI_2,
        }
    }
}

impl Camera {
    /// Clamp a requested orbit polar angle; pan and zoom are not supported
    #[must_use]
    pub fn clamp_polar(&self, polar: f32) -> f32 {
        polar.clamp(self.min_polar, self.max_polar)
    }
}

/// What a renderer needs for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderState {
    /// Idle sway of the head group
    pub head: HeadPose,
    /// Mouth-open influence in [0, 1]
    pub mouth: f32,
    /// Smile influence in [0, 1]
    pub smile: f32,
    /// Audio was playing this frame
    pub active: bool,
    /// Sink the view is bound to
    pub sink: Option<SinkId>,
}

/// A mounted avatar bound to the shared audio sink
pub struct AvatarView {
    audio: Arc<MascotAudio>,
    registry: Arc<AnalysisRegistry>,
    events: broadcast::Receiver<SinkEvent>,
    sink: Option<Arc<AudioSink>>,
    tap: AnalysisTap,
    scene: Scene,
    binding: Option<BlendShapeBinding>,
    driver: LipSyncDriver,
    sway: HeadSway,
    camera: Camera,
}

impl std::fmt::Debug for AvatarView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarView")
            .field("sink", &self.sink.as_ref().map(|s| s.id()))
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

impl AvatarView {
    /// Mount a view and bind to the current sink if there is one
    #[must_use]
    pub fn mount(
        audio: Arc<MascotAudio>,
        registry: Arc<AnalysisRegistry>,
        mut scene: Scene,
        lipsync: LipSyncConfig,
    ) -> Self {
        let events = audio.subscribe();
        scene.hide_non_head_parts();

        let binding = BlendShapeBinding::resolve(&scene);
        if binding.is_none() {
            tracing::debug!("scene has no morph targets, lip-sync disabled");
        }

        let mut view = Self {
            audio,
            registry,
            events,
            sink: None,
            tap: AnalysisTap::silent(),
            scene,
            binding,
            driver: LipSyncDriver::new(lipsync),
            sway: HeadSway::new(),
            camera: Camera::default(),
        };

        if let Some(sink) = view.audio.current() {
            view.bind(sink);
        }
        view
    }

    /// Advance one frame
    pub fn frame(&mut self, delta: Duration) -> RenderState {
        self.sync_sink();

        let head = self.sway.advance(delta);

        let lip = match &self.binding {
            Some(binding) => {
                let frame = self.driver.update(self.sink.as_deref(), &mut self.tap);
                binding.apply(&mut self.scene, &frame);
                frame
            }
            None => LipSyncFrame::default(),
        };

        RenderState {
            head,
            mouth: lip.mouth,
            smile: lip.smile,
            active: lip.active,
            sink: self.bound_sink(),
        }
    }

    /// Sink this view currently reads from
    #[must_use]
    pub fn bound_sink(&self) -> Option<SinkId> {
        self.sink.as_ref().map(|s| s.id())
    }

    #[must_use]
    pub const fn scene(&self) -> &Scene {
        &self.scene
    }

    #[must_use]
    pub const fn binding(&self) -> Option<BlendShapeBinding> {
        self.binding
    }

    #[must_use]
    pub const fn camera(&self) -> &Camera {
        &self.camera
    }

    /// True if the view's tap reads a live analyser
    #[must_use]
    pub const fn is_tapped(&self) -> bool {
        !self.tap.is_silent()
    }

    fn sync_sink(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(SinkEvent::Published(sink)) => self.bind(sink),
                Ok(SinkEvent::Disposed(id)) => {
                    if self.bound_sink() == Some(id) {
                        self.unbind();
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "sink events lagged, resyncing");
                    match self.audio.current() {
                        Some(sink) if !sink.is_torn_down() => self.bind(sink),
                        _ => self.unbind(),
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    fn bind(&mut self, sink: Arc<AudioSink>) {
        if self.bound_sink() == Some(sink.id()) {
            return;
        }
        self.unbind();

        self.tap = self.registry.attach(&sink);
        tracing::debug!(sink = %sink.id(), tapped = !self.tap.is_silent(), "avatar bound to sink");
        self.sink = Some(sink);
    }

    fn unbind(&mut self) {
        let tap = std::mem::replace(&mut self.tap, AnalysisTap::silent());
        self.registry.detach(tap);
        if let Some(sink) = self.sink.take() {
            tracing::debug!(sink = %sink.id(), "avatar unbound from sink");
        }
    }
}

impl Drop for AvatarView {
    fn drop(&mut self) {
        self.unbind();
    }
}
