use crate::{
    assets::store::ImageStore,
    compile::plan::{FramePlan, build_frame_plan},
    config::{BackendPreference, RendererConfig},
    eval::props::{PropsCacheStats, PropsResolver},
    foundation::{
        core::Canvas,
        error::{PanoError, PanoResult},
    },
    perf::{PerformanceMonitor, PerformanceStats},
    render::{
        BackendKind, Compositor, FrameOutcome, FrameRGBA, OverlayKind, create_compositor,
        matte::{MatteOptions, render_matte},
        overlay::{InteractionSurface, OverlayRequest},
        texture_cache::CacheStats,
    },
    scene::{
        model::Layer,
        store::{Scene, SubscriptionId},
    },
    session::scheduler::{Playback, RedrawScheduler},
};

/// What happened to one frame. Per-layer problems end up here, never as errors.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub time: f64,
    /// `None` when nothing was rendered.
    pub backend: Option<BackendKind>,
    pub drawn: usize,
    pub skipped: usize,
    pub culled: usize,
    pub failed: usize,
    /// Images a drawable layer is still waiting for.
    pub pending: usize,
    /// An interaction overlay was drawn.
    pub overlay: bool,
}

/// Owns the compositors and drives one frame at a time.
///
/// The preferred backend is tried once in [`FrameOrchestrator::initialize`]. A GPU that
/// fails to come up is never retried; frames whose images are still decoding go to the
/// software compositor for that frame only.
pub struct FrameOrchestrator {
    config: RendererConfig,
    primary: Option<Box<dyn Compositor>>,
    software: Option<Box<dyn Compositor>>,
    gpu_failed: bool,
    last_backend: Option<BackendKind>,
    images: ImageStore,
    props: PropsResolver,
    interaction: InteractionSurface,
    overlay_frame: Option<FrameRGBA>,
    tint: Option<OverlayKind>,
    scheduler: RedrawScheduler,
    /// Every rendered frame, whichever compositor drew it.
    perf: PerformanceMonitor,
}

impl std::fmt::Debug for FrameOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameOrchestrator")
            .field("backend", &self.active_backend())
            .field("gpu_failed", &self.gpu_failed)
            .field("last_backend", &self.last_backend)
            .field("images", &self.images.len())
            .field("tint", &self.tint)
            .finish()
    }
}

impl FrameOrchestrator {
    pub fn new(config: RendererConfig) -> Self {
        Self {
            props: PropsResolver::new(config.props_cache_capacity),
            perf: PerformanceMonitor::new(config.perf_samples, config.frame_budget),
            config,
            primary: None,
            software: None,
            gpu_failed: false,
            last_backend: None,
            images: ImageStore::new(),
            interaction: InteractionSurface::new(),
            overlay_frame: None,
            tint: None,
            scheduler: RedrawScheduler::new(),
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.software.is_some()
    }

    /// Bring up the compositors. The GPU is attempted at most once per orchestrator.
    pub fn initialize(&mut self) -> PanoResult<BackendKind> {
        if self.software.is_none() {
            self.software = Some(create_compositor(BackendKind::Cpu, &self.config)?);
        }
        let wants_gpu = matches!(
            self.config.backend,
            BackendPreference::Gpu | BackendPreference::Auto
        );
        if wants_gpu && self.primary.is_none() && !self.gpu_failed {
            match create_compositor(BackendKind::Gpu, &self.config) {
                Ok(c) => self.primary = Some(c),
                Err(e) => {
                    self.gpu_failed = true;
                    tracing::warn!(error = %e, "gpu compositor unavailable, using software");
                }
            }
        }
        let kind = self.active_backend().unwrap_or(BackendKind::Cpu);
        tracing::info!(backend = %kind, "renderer initialized");
        Ok(kind)
    }

    /// Initialize with a host-built primary compositor instead of probing for a GPU.
    pub fn initialize_with(&mut self, primary: Box<dyn Compositor>) -> PanoResult<BackendKind> {
        if self.software.is_none() {
            self.software = Some(create_compositor(BackendKind::Cpu, &self.config)?);
        }
        let kind = primary.kind();
        if let Some(mut old) = self.primary.replace(primary) {
            old.cleanup();
        }
        tracing::info!(backend = %kind, "renderer initialized with host compositor");
        Ok(kind)
    }

    /// Backend used for frames whose images are all ready.
    pub fn active_backend(&self) -> Option<BackendKind> {
        self.primary
            .as_ref()
            .or(self.software.as_ref())
            .map(|c| c.kind())
    }

    pub fn gpu_failed(&self) -> bool {
        self.gpu_failed
    }

    pub fn last_backend(&self) -> Option<BackendKind> {
        self.last_backend
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut ImageStore {
        &mut self.images
    }

    pub fn scheduler(&self) -> RedrawScheduler {
        self.scheduler.clone()
    }

    /// Request a redraw whenever `scene` changes.
    pub fn attach(&self, scene: &mut Scene) -> SubscriptionId {
        let redraw = self.scheduler.clone();
        scene.subscribe(move |_| {
            redraw.request();
        })
    }

    /// Full-canvas tint applied by the compositor after each frame.
    pub fn set_tint(&mut self, tint: Option<OverlayKind>) {
        self.tint = tint;
        self.scheduler.request();
    }

    /// Drain finished image decodes; any completion schedules a redraw.
    pub fn poll_images(&mut self) -> Vec<String> {
        let done = self.images.poll();
        if !done.is_empty() {
            tracing::debug!(count = done.len(), "images ready");
            self.scheduler.request();
        }
        done
    }

    pub fn plan(&mut self, scene: &Scene, time: f64) -> FramePlan {
        build_frame_plan(
            scene.document(),
            time,
            &self.images,
            &mut self.props,
            &self.config,
        )
    }

    fn compositor_for(&mut self, kind: BackendKind) -> Option<&mut Box<dyn Compositor>> {
        match self.primary.as_mut() {
            Some(p) if p.kind() == kind => Some(p),
            _ => self.software.as_mut().filter(|s| s.kind() == kind),
        }
    }

    /// Render `scene` at `time`. Failures are logged and reported, never returned.
    pub fn render_frame(&mut self, scene: &Scene, time: f64) -> FrameReport {
        if !self.is_initialized() {
            tracing::warn!("renderer not initialized, skipping frame");
            return FrameReport {
                time,
                ..FrameReport::default()
            };
        }

        let plan = self.plan(scene, time);
        let use_software = plan.has_pending_images() && self.primary.is_some();
        if use_software {
            tracing::debug!(
                pending = plan.pending_images.len(),
                "images still loading, software compositor for this frame"
            );
        }
        let compositor = if use_software {
            self.software.as_mut()
        } else {
            self.primary.as_mut().or(self.software.as_mut())
        };
        let Some(compositor) = compositor else {
            return FrameReport {
                time,
                ..FrameReport::default()
            };
        };

        let kind = compositor.kind();
        self.perf.start_frame();
        let outcome = match compositor.render_frame(&plan) {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(backend = %kind, error = %e, "frame failed");
                FrameOutcome {
                    failed: plan.draw_count(),
                    ..FrameOutcome::default()
                }
            }
        };
        if let Some(tint) = self.tint
            && let Err(e) = compositor.draw_overlay(tint)
        {
            tracing::warn!(error = %e, "tint overlay failed");
        }
        self.perf.end_frame();
        self.last_backend = Some(kind);

        let request = OverlayRequest {
            modes: scene.modes(),
            selected: scene.selected_layer(),
        };
        self.overlay_frame = if request.is_empty() {
            None
        } else {
            match self.interaction.draw(&plan, request) {
                Ok(f) => Some(f),
                Err(e) => {
                    tracing::warn!(error = %e, "interaction overlay failed");
                    None
                }
            }
        };

        FrameReport {
            time,
            backend: Some(kind),
            drawn: outcome.drawn,
            skipped: plan.skipped.len(),
            culled: outcome.culled,
            failed: outcome.failed,
            pending: plan.pending_images.len(),
            overlay: self.overlay_frame.is_some(),
        }
    }

    /// Advance playback, pick up decoded images and render if anything asked for a redraw.
    pub fn tick(&mut self, scene: &mut Scene, playback: &mut Playback, dt: f64) -> Option<FrameReport> {
        if playback.playing {
            let t = playback.advance(dt);
            scene.set_current_time(t);
            self.scheduler.request();
        }
        self.poll_images();
        if !self.scheduler.take() {
            return None;
        }
        Some(self.render_frame(scene, scene.current_time()))
    }

    /// The last rendered frame, without the interaction overlay.
    pub fn read_frame(&mut self) -> PanoResult<FrameRGBA> {
        let kind = self
            .last_backend
            .ok_or_else(|| PanoError::evaluation("no frame rendered yet"))?;
        self.compositor_for(kind)
            .ok_or_else(|| PanoError::evaluation("compositor released"))?
            .read_frame()
    }

    pub fn overlay_frame(&self) -> Option<&FrameRGBA> {
        self.overlay_frame.as_ref()
    }

    /// The last rendered frame with the interaction overlay on top.
    pub fn composited_frame(&mut self) -> PanoResult<FrameRGBA> {
        let mut frame = self.read_frame()?;
        if let Some(overlay) = &self.overlay_frame {
            frame.composite_over(overlay)?;
        }
        Ok(frame)
    }

    /// Foreground coverage matte using the project's expansion and feather.
    pub fn render_matte(&mut self, scene: &Scene, time: f64) -> PanoResult<image::GrayImage> {
        let project = *scene.project();
        let plan = self.plan(scene, time);
        render_matte(
            plan,
            MatteOptions {
                expansion: project.mask_expansion,
                feather: project.mask_feather,
            },
            &self.config,
        )
    }

    /// Remove a layer and drop everything cached for it.
    pub fn remove_layer(&mut self, scene: &mut Scene, id: &str) -> Option<Layer> {
        let removed = scene.remove_layer(id)?;
        for c in self.primary.iter_mut().chain(self.software.iter_mut()) {
            c.release_layer(id, removed.image());
        }
        self.props.forget_layer(id);
        self.scheduler.request();
        Some(removed)
    }

    /// Change the projection size. Later plans use `width`x`height` instead of the project's
    /// size until the next resize.
    pub fn resize(&mut self, width: u32, height: u32) -> PanoResult<()> {
        let canvas = Canvas::new(width, height)?;
        for c in self.primary.iter_mut().chain(self.software.iter_mut()) {
            c.resize_render_targets(width, height)?;
        }
        self.config.render_size = Some(canvas);
        self.scheduler.request();
        Ok(())
    }

    /// Frame timings across both compositors, including software fallback frames.
    pub fn performance_stats(&self) -> PerformanceStats {
        self.perf.stats()
    }

    /// Texture cache of the compositor that drew the last frame.
    pub fn cache_stats(&self) -> CacheStats {
        let last = self.last_backend.and_then(|kind| {
            self.primary
                .iter()
                .chain(self.software.iter())
                .find(|c| c.kind() == kind)
        });
        last.or(self.primary.as_ref())
            .or(self.software.as_ref())
            .map(|c| c.cache_stats())
            .unwrap_or_default()
    }

    pub fn props_stats(&self) -> PropsCacheStats {
        self.props.stats()
    }

    /// Release every compositor. Rendering is a no-op until [`Self::initialize`] runs again.
    pub fn cleanup(&mut self) {
        for c in self.primary.iter_mut().chain(self.software.iter_mut()) {
            c.cleanup();
        }
        self.primary = None;
        self.software = None;
        self.last_backend = None;
        self.overlay_frame = None;
        self.interaction.release();
        self.props.clear();
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{
        assets::decode::ImageRgba,
        compile::plan::FramePlan,
        scene::{project::Project, store::SceneDocument},
    };

    #[derive(Default)]
    struct Calls {
        frames: usize,
        released: Vec<(String, Option<String>)>,
    }

    /// Pretends to be a GPU backend and records what it was asked to do.
    struct FakeGpu(Rc<RefCell<Calls>>);

    impl Compositor for FakeGpu {
        fn kind(&self) -> BackendKind {
            BackendKind::Gpu
        }

        fn render_frame(&mut self, plan: &FramePlan) -> PanoResult<FrameOutcome> {
            self.0.borrow_mut().frames += 1;
            Ok(FrameOutcome {
                drawn: plan.draw_count(),
                ..FrameOutcome::default()
            })
        }

        fn draw_overlay(&mut self, _overlay: OverlayKind) -> PanoResult<()> {
            Ok(())
        }

        fn read_frame(&mut self) -> PanoResult<FrameRGBA> {
            Err(PanoError::gpu("fake"))
        }

        fn resize_render_targets(&mut self, _width: u32, _height: u32) -> PanoResult<()> {
            Ok(())
        }

        fn performance_stats(&self) -> PerformanceStats {
            PerformanceStats::default()
        }

        fn cache_stats(&self) -> CacheStats {
            CacheStats {
                size: 7,
                ..CacheStats::default()
            }
        }

        fn release_layer(&mut self, layer_id: &str, image_key: Option<&str>) {
            self.0
                .borrow_mut()
                .released
                .push((layer_id.to_owned(), image_key.map(str::to_owned)));
        }

        fn cleanup(&mut self) {}
    }

    fn scene() -> Scene {
        Scene::new(SceneDocument {
            project: Project {
                width: 16,
                height: 16,
                ..Project::default()
            },
            layers: vec![
                Layer::foreground("a").with_image("red"),
                Layer::foreground("b").with_image("slow"),
            ],
            ..SceneDocument::default()
        })
    }

    fn cpu_config() -> RendererConfig {
        RendererConfig {
            backend: BackendPreference::Cpu,
            ..RendererConfig::default()
        }
    }

    #[test]
    fn uninitialized_render_is_a_noop() {
        let mut o = FrameOrchestrator::new(cpu_config());
        let report = o.render_frame(&scene(), 0.0);
        assert_eq!(report.backend, None);
        assert!(o.read_frame().is_err());
    }

    #[test]
    fn pending_images_fall_back_to_software_for_one_frame() {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let mut o = FrameOrchestrator::new(cpu_config());
        o.initialize_with(Box::new(FakeGpu(calls.clone()))).unwrap();
        o.images_mut()
            .insert_ready("red", ImageRgba::solid(4, 4, [255, 0, 0, 255]).unwrap());
        o.images_mut().mark_loading("slow");

        let s = scene();
        let report = o.render_frame(&s, 0.0);
        assert_eq!(report.backend, Some(BackendKind::Cpu));
        assert_eq!((report.drawn, report.pending), (1, 1));
        assert_eq!(calls.borrow().frames, 0);

        o.images_mut()
            .insert_ready("slow", ImageRgba::solid(4, 4, [0, 255, 0, 255]).unwrap());
        let report = o.render_frame(&s, 0.0);
        assert_eq!(report.backend, Some(BackendKind::Gpu));
        assert_eq!(report.drawn, 2);
        assert_eq!(calls.borrow().frames, 1);
    }

    #[test]
    fn stats_cover_software_fallback_frames() {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let mut o = FrameOrchestrator::new(cpu_config());
        o.initialize_with(Box::new(FakeGpu(calls.clone()))).unwrap();
        o.images_mut()
            .insert_ready("red", ImageRgba::solid(4, 4, [255, 0, 0, 255]).unwrap());
        o.images_mut().mark_loading("slow");

        let s = scene();
        assert_eq!(o.render_frame(&s, 0.0).backend, Some(BackendKind::Cpu));
        assert_eq!(o.performance_stats().total_frames, 1);
        assert_eq!(o.cache_stats().size, 1);

        o.images_mut()
            .insert_ready("slow", ImageRgba::solid(4, 4, [0, 255, 0, 255]).unwrap());
        assert_eq!(o.render_frame(&s, 0.0).backend, Some(BackendKind::Gpu));
        assert_eq!(o.performance_stats().total_frames, 2);
        assert_eq!(o.cache_stats().size, 7);
    }

    #[test]
    fn resize_changes_the_projection_size() {
        let mut o = FrameOrchestrator::new(cpu_config());
        o.initialize().unwrap();
        o.images_mut()
            .insert_ready("red", ImageRgba::solid(4, 4, [255, 0, 0, 255]).unwrap());
        o.images_mut()
            .insert_ready("slow", ImageRgba::solid(4, 4, [0, 255, 0, 255]).unwrap());
        let s = scene();

        o.resize(64, 32).unwrap();
        assert!(o.scheduler().is_pending());
        let plan = o.plan(&s, 0.0);
        assert_eq!((plan.canvas.width, plan.canvas.height), (64, 32));
        let center = plan.foreground[0].placement.center;
        assert_eq!((center.x, center.y), (32.0, 16.0));

        o.render_frame(&s, 0.0);
        let frame = o.read_frame().unwrap();
        assert_eq!((frame.width, frame.height), (64, 32));
        assert_eq!(frame.pixel(32, 16), Some([0, 255, 0, 255]));

        assert!(o.resize(0, 10).is_err());
        assert_eq!(o.config().render_size, Canvas::new(64, 32).ok());
    }

    #[test]
    fn removing_a_layer_releases_it_everywhere() {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let mut o = FrameOrchestrator::new(cpu_config());
        o.initialize_with(Box::new(FakeGpu(calls.clone()))).unwrap();
        let mut s = scene();
        assert!(o.remove_layer(&mut s, "a").is_some());
        assert!(o.remove_layer(&mut s, "a").is_none());
        assert_eq!(
            calls.borrow().released,
            vec![("a".to_owned(), Some("red".to_owned()))]
        );
        assert!(o.scheduler().is_pending());
    }

    #[test]
    fn tick_renders_only_when_a_redraw_is_pending() {
        let mut o = FrameOrchestrator::new(cpu_config());
        assert_eq!(o.initialize().unwrap(), BackendKind::Cpu);
        let mut s = scene();
        o.attach(&mut s);
        let mut playback = Playback::new(s.project().duration);

        assert!(o.tick(&mut s, &mut playback, 0.1).is_none());
        s.set_current_time(1.0);
        let report = o.tick(&mut s, &mut playback, 0.1).unwrap();
        assert_eq!(report.time, 1.0);
        assert!(o.tick(&mut s, &mut playback, 0.1).is_none());

        playback.play();
        let report = o.tick(&mut s, &mut playback, 0.5).unwrap();
        assert_eq!(report.time, 0.5);
    }

    #[test]
    fn cleanup_is_idempotent_and_disables_rendering() {
        let mut o = FrameOrchestrator::new(cpu_config());
        o.initialize().unwrap();
        o.cleanup();
        o.cleanup();
        assert!(!o.is_initialized());
        assert_eq!(o.render_frame(&scene(), 0.0).backend, None);
    }
}
