use std::{str::FromStr, time::Duration};

use crate::foundation::{
    core::{Canvas, Rgba},
    error::{PanoError, PanoResult},
};

/// Which compositor the orchestrator should try first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendPreference {
    Cpu,
    Gpu,
    /// GPU when it initializes, software otherwise.
    #[default]
    Auto,
}

impl FromStr for BackendPreference {
    type Err = PanoError;

    fn from_str(s: &str) -> PanoResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            "auto" => Ok(Self::Auto),
            other => Err(PanoError::validation(format!(
                "unknown backend '{other}' (expected cpu, gpu or auto)"
            ))),
        }
    }
}

/// Renderer tuning. `Default` gives the documented values; [`RendererConfig::from_env`]
/// overlays `PANOLAYER_*` variables on top.
#[derive(Clone, Debug, PartialEq)]
pub struct RendererConfig {
    pub backend: BackendPreference,
    /// Main surface clear color (straight alpha).
    pub clear_color: Rgba,
    pub texture_cache_capacity: usize,
    pub props_cache_capacity: usize,
    /// Longer side of the software panorama preview raster.
    pub pano_preview_max: u32,
    /// Apply the camera rotation matrix to GPU vertex positions.
    pub advanced_transforms: bool,
    /// Frames slower than this count as dropped.
    pub frame_budget: Duration,
    pub perf_samples: usize,
    /// Projection size overriding the project's `width`/`height`. Set by
    /// [`crate::FrameOrchestrator::resize`].
    pub render_size: Option<Canvas>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            clear_color: Rgba::new(0.0, 0.0, 0.0, 1.0),
            texture_cache_capacity: 100,
            props_cache_capacity: 100,
            pano_preview_max: 1024,
            advanced_transforms: false,
            frame_budget: Duration::from_micros(16_670),
            perf_samples: 60,
            render_size: None,
        }
    }
}

impl RendererConfig {
    /// Defaults overlaid with environment overrides. Unparseable or zero values are ignored.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    pub(crate) fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("PANOLAYER_BACKEND") {
            match v.parse() {
                Ok(b) => self.backend = b,
                Err(e) => tracing::warn!(error = %e, "ignoring PANOLAYER_BACKEND"),
            }
        }
        if let Some(n) = positive(&lookup, "PANOLAYER_TEXTURE_CACHE_CAPACITY") {
            self.texture_cache_capacity = n;
        }
        if let Some(n) = positive(&lookup, "PANOLAYER_PROPS_CACHE_CAPACITY") {
            self.props_cache_capacity = n;
        }
        if let Some(n) = positive(&lookup, "PANOLAYER_PANO_PREVIEW_MAX") {
            self.pano_preview_max = n;
        }
        if let Some(v) = lookup("PANOLAYER_ADVANCED_TRANSFORMS") {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => self.advanced_transforms = true,
                "0" | "false" | "off" | "no" => self.advanced_transforms = false,
                _ => tracing::warn!(value = %v, "ignoring PANOLAYER_ADVANCED_TRANSFORMS"),
            }
        }
        self
    }

    pub fn clear_rgba8_premul(&self) -> [u8; 4] {
        let [r, g, b, a] = self.clear_color.premultiplied();
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(r), q(g), q(b), q(a)]
    }
}

fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    lookup(name)
        .and_then(|v| v.trim().parse::<T>().ok())
        .filter(|n| *n > T::default())
}
