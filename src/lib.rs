//! panolayer composites an animated stack of image layers onto a canvas.
//!
//! A scene is one background layer (flat or 360° panorama) plus foreground layers with
//! keyframed transforms, bezier path animation, masks and a keyframed camera. Each frame is
//! evaluated once into a backend-neutral [`FramePlan`] and executed by either the software
//! compositor (`vello_cpu`) or, with the `gpu` feature, the wgpu compositor.
//!
//! - Load a [`SceneDocument`] and wrap it in a [`Scene`]
//! - Create a [`FrameOrchestrator`], feed its [`ImageStore`] and call `initialize`
//! - Render frames with [`FrameOrchestrator::render_frame`] and read them back
#![forbid(unsafe_code)]

mod foundation;

pub mod animation;
pub mod assets;
pub mod compile;
pub mod config;
pub mod eval;
pub mod panorama;
pub mod perf;
pub mod render;
pub mod scene;
pub mod session;

pub use crate::foundation::core::{Affine, BezPath, Canvas, Point, Rect, Rgba, Vec2};
pub use crate::foundation::error::{PanoError, PanoResult};

pub use crate::assets::{decode::ImageRgba, store::ImageStore};
pub use crate::compile::plan::{FramePlan, build_frame_plan};
pub use crate::config::{BackendPreference, RendererConfig};
pub use crate::perf::{PerformanceMonitor, PerformanceStats};
pub use crate::render::{
    BackendKind, Compositor, FrameOutcome, FrameRGBA, OverlayKind, create_compositor,
    cpu::SoftwareCompositor, texture_cache::CacheStats,
};
pub use crate::scene::{
    model::{BackgroundMode, Layer, LayerAttr, LayerRole},
    project::Project,
    store::{EditorModes, Scene, SceneDocument, SceneEvent},
};
pub use crate::session::{
    orchestrator::{FrameOrchestrator, FrameReport},
    scheduler::{Playback, RedrawScheduler},
};

#[cfg(feature = "gpu")]
pub use crate::render::gpu::GpuCompositor;
