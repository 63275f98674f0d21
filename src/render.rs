pub mod blur;
pub mod composite;
pub mod cpu;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod matte;
pub mod overlay;
pub mod texture_cache;
pub mod transient;

use crate::{
    assets::decode::unpremultiply_rgba8_in_place,
    compile::plan::FramePlan,
    config::RendererConfig,
    foundation::{
        core::Rgba,
        error::{PanoError, PanoResult},
    },
    perf::PerformanceStats,
    render::texture_cache::CacheStats,
};

/// A read-back frame, row-major RGBA8.
#[derive(Clone, Debug)]
pub struct FrameRGBA {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub premultiplied: bool,
}

impl FrameRGBA {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.data.get(i..i + 4).map(|p| [p[0], p[1], p[2], p[3]])
    }

    /// Source-over `top` onto this frame. Both must be premultiplied and the same size.
    pub fn composite_over(&mut self, top: &FrameRGBA) -> PanoResult<()> {
        if !self.premultiplied || !top.premultiplied {
            return Err(PanoError::evaluation("composite_over expects premultiplied frames"));
        }
        if self.width != top.width || self.height != top.height {
            return Err(PanoError::evaluation("composite_over frame size mismatch"));
        }
        composite::over_in_place(&mut self.data, &top.data, 1.0)
    }

    /// Straight-alpha image for encoding.
    pub fn to_rgba_image(&self) -> PanoResult<image::RgbaImage> {
        let mut data = self.data.clone();
        if self.premultiplied {
            unpremultiply_rgba8_in_place(&mut data);
        }
        image::RgbaImage::from_raw(self.width, self.height, data)
            .ok_or_else(|| PanoError::evaluation("frame buffer does not match its dimensions"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Cpu,
    Gpu,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
        })
    }
}

/// Full-canvas tint drawn over a finished frame while an editor mode is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayKind {
    Mask,
    Extract,
    Path,
}

impl OverlayKind {
    pub fn color(self) -> Rgba {
        match self {
            Self::Mask => Rgba::new(1.0, 0.0, 0.0, 0.5),
            Self::Extract => Rgba::new(0.0, 0.0, 0.0, 0.6),
            Self::Path => Rgba::new(0.0, 0.5, 1.0, 0.8),
        }
    }
}

/// What a compositor did with a plan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    pub drawn: usize,
    pub culled: usize,
    /// Layers dropped because a backend resource could not be created.
    pub failed: usize,
}

/// A backend that executes [`FramePlan`]s.
///
/// Per-layer failures are logged and counted in [`FrameOutcome::failed`]; only frame-level
/// failures (target allocation, device loss) are returned as errors.
pub trait Compositor {
    fn kind(&self) -> BackendKind;

    fn render_frame(&mut self, plan: &FramePlan) -> PanoResult<FrameOutcome>;

    /// Tint the last rendered frame.
    fn draw_overlay(&mut self, overlay: OverlayKind) -> PanoResult<()>;

    fn read_frame(&mut self) -> PanoResult<FrameRGBA>;

    fn resize_render_targets(&mut self, width: u32, height: u32) -> PanoResult<()>;

    fn performance_stats(&self) -> PerformanceStats;

    fn cache_stats(&self) -> CacheStats;

    /// Drop cached resources for a removed layer and its image.
    fn release_layer(&mut self, layer_id: &str, image_key: Option<&str>);

    /// Release every device resource. Safe to call more than once.
    fn cleanup(&mut self);
}

pub fn create_compositor(
    kind: BackendKind,
    config: &RendererConfig,
) -> PanoResult<Box<dyn Compositor>> {
    match kind {
        BackendKind::Cpu => Ok(Box::new(cpu::SoftwareCompositor::new(config.clone()))),
        #[cfg(feature = "gpu")]
        BackendKind::Gpu => Ok(Box::new(gpu::GpuCompositor::new(config.clone())?)),
        #[cfg(not(feature = "gpu"))]
        BackendKind::Gpu => Err(PanoError::gpu(
            "gpu backend requires the `gpu` feature",
        )),
    }
}
