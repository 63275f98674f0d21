use std::{collections::HashMap, sync::Arc};

use crate::{
    compile::plan::{BackgroundDraw, FramePlan, ImageRef, LayerDraw, PanoramaDraw, is_culled},
    config::RendererConfig,
    foundation::{
        core::{Affine, BezPath, Canvas, Point, Rgba},
        error::{PanoError, PanoResult},
    },
    panorama::{RemapCache, RemapKey, preview_size},
    perf::{PerformanceMonitor, PerformanceStats},
    render::{
        BackendKind, Compositor, FrameOutcome, FrameRGBA, OverlayKind, composite,
        texture_cache::{CacheStats, Releasable, TextureCache},
    },
};

/// A premultiplied image wrapped as a vello_cpu paint.
#[derive(Clone)]
pub(crate) struct CpuImage {
    paint: vello_cpu::Image,
    width: f64,
    height: f64,
}

impl std::fmt::Debug for CpuImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl CpuImage {
    pub(crate) fn from_premul(rgba8_premul: &[u8], width: u32, height: u32) -> PanoResult<Self> {
        let pixmap = image_premul_bytes_to_pixmap(rgba8_premul, width, height)?;
        Ok(Self {
            paint: vello_cpu::Image {
                image: vello_cpu::ImageSource::Pixmap(Arc::new(pixmap)),
                sampler: vello_cpu::peniko::ImageSampler::default(),
            },
            width: f64::from(width),
            height: f64::from(height),
        })
    }
}

impl Releasable for CpuImage {
    // The pixmap is freed when the last paint clone drops.
    fn release_resource(&mut self) {}
}

struct MaskedEntry {
    image_gen: u64,
    mask_gen: u64,
    image: CpuImage,
}

struct PanoRaster {
    key: RemapKey,
    source_gen: u64,
    image: CpuImage,
}

/// An RGBA8 premultiplied raster of a fixed size.
pub(crate) struct CpuSurface {
    width: u16,
    height: u16,
    pixmap: vello_cpu::Pixmap,
}

impl CpuSurface {
    pub(crate) fn new(width: u32, height: u32) -> PanoResult<Self> {
        let (w, h) = surface_dims(width, height)?;
        Ok(Self {
            width: w,
            height: h,
            pixmap: vello_cpu::Pixmap::new(w, h),
        })
    }

    pub(crate) fn matches(&self, width: u32, height: u32) -> bool {
        u32::from(self.width) == width && u32::from(self.height) == height
    }

    pub(crate) fn context(&self) -> vello_cpu::RenderContext {
        vello_cpu::RenderContext::new(self.width, self.height)
    }

    pub(crate) fn clear(&mut self, rgba: [u8; 4]) {
        composite::fill_in_place(self.pixmap.data_as_u8_slice_mut(), rgba);
    }

    pub(crate) fn data(&self) -> &[u8] {
        self.pixmap.data_as_u8_slice()
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        self.pixmap.data_as_u8_slice_mut()
    }

    /// Replace this surface's contents with `ctx` rasterized over transparent.
    pub(crate) fn render_from(&mut self, ctx: &mut vello_cpu::RenderContext) {
        ctx.flush();
        self.clear([0, 0, 0, 0]);
        ctx.render_to_pixmap(&mut self.pixmap);
    }

    /// Rasterize `ctx` into a transparent scratch and source-over it onto this surface.
    pub(crate) fn composite_context(
        &mut self,
        ctx: &mut vello_cpu::RenderContext,
        scratch: &mut CpuSurface,
    ) -> PanoResult<()> {
        scratch.render_from(ctx);
        composite::over_in_place(self.data_mut(), scratch.data(), 1.0)
    }

    pub(crate) fn to_frame(&self) -> FrameRGBA {
        FrameRGBA {
            width: u32::from(self.width),
            height: u32::from(self.height),
            data: self.data().to_vec(),
            premultiplied: true,
        }
    }
}

fn surface_dims(width: u32, height: u32) -> PanoResult<(u16, u16)> {
    if width == 0 || height == 0 {
        return Err(PanoError::validation("render target width/height must be > 0"));
    }
    let w: u16 = width
        .try_into()
        .map_err(|_| PanoError::evaluation("render target width exceeds u16"))?;
    let h: u16 = height
        .try_into()
        .map_err(|_| PanoError::evaluation("render target height exceeds u16"))?;
    Ok((w, h))
}

/// Software compositor on `vello_cpu`.
///
/// Layers are drawn as image-filled rects under the shared placement affine. Masks are
/// applied in pixel space (destination-in) and cached per layer until either source image
/// changes. The panorama background is gathered through a cached remap table into a preview
/// raster, then drawn through the camera viewport.
pub struct SoftwareCompositor {
    config: RendererConfig,
    target: CpuSurface,
    scratch: CpuSurface,
    textures: TextureCache<CpuImage>,
    masked: HashMap<String, MaskedEntry>,
    mask_builds: u64,
    remap: RemapCache,
    pano: Option<PanoRaster>,
    perf: PerformanceMonitor,
}

impl std::fmt::Debug for SoftwareCompositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareCompositor")
            .field("width", &self.target.width)
            .field("height", &self.target.height)
            .field("textures", &self.textures.stats())
            .field("masked", &self.masked.len())
            .finish()
    }
}

impl SoftwareCompositor {
    pub fn new(config: RendererConfig) -> Self {
        let target = CpuSurface {
            width: 1,
            height: 1,
            pixmap: vello_cpu::Pixmap::new(1, 1),
        };
        let scratch = CpuSurface {
            width: 1,
            height: 1,
            pixmap: vello_cpu::Pixmap::new(1, 1),
        };
        Self {
            textures: TextureCache::new(config.texture_cache_capacity),
            perf: PerformanceMonitor::new(config.perf_samples, config.frame_budget),
            config,
            target,
            scratch,
            masked: HashMap::new(),
            mask_builds: 0,
            remap: RemapCache::default(),
            pano: None,
        }
    }

    /// Number of masked rasters built so far.
    pub fn mask_builds(&self) -> u64 {
        self.mask_builds
    }

    /// Number of panorama remap tables built so far.
    pub fn remap_builds(&self) -> u64 {
        self.remap.builds()
    }

    fn ensure_target(&mut self, canvas: Canvas) -> PanoResult<()> {
        if !self.target.matches(canvas.width, canvas.height) {
            self.target = CpuSurface::new(canvas.width, canvas.height)?;
        }
        if !self.scratch.matches(canvas.width, canvas.height) {
            self.scratch = CpuSurface::new(canvas.width, canvas.height)?;
        }
        Ok(())
    }

    fn layer_paint(&mut self, d: &LayerDraw, refs: &mut Vec<String>) -> PanoResult<CpuImage> {
        if let Some(mask) = &d.mask {
            return self.masked_paint(d, mask);
        }
        let img = self
            .textures
            .load(&d.image.key, &d.image.image, |img| {
                CpuImage::from_premul(img.data(), img.width(), img.height())
            })?
            .clone();
        refs.push(d.image.key.clone());
        Ok(img)
    }

    fn masked_paint(&mut self, d: &LayerDraw, mask: &ImageRef) -> PanoResult<CpuImage> {
        let image_gen = d.image.image.generation();
        let mask_gen = mask.image.generation();
        if let Some(e) = self.masked.get(&d.layer_id)
            && e.image_gen == image_gen
            && e.mask_gen == mask_gen
        {
            return Ok(e.image.clone());
        }

        let mut px = d.image.image.data().to_vec();
        composite::destination_in_in_place(&mut px, mask.image.data())?;
        let image = CpuImage::from_premul(&px, d.image.image.width(), d.image.image.height())?;
        self.mask_builds += 1;
        tracing::debug!(layer = %d.layer_id, "built masked layer raster");
        self.masked.insert(
            d.layer_id.clone(),
            MaskedEntry {
                image_gen,
                mask_gen,
                image: image.clone(),
            },
        );
        Ok(image)
    }

    fn draw_layer(
        &mut self,
        ctx: &mut vello_cpu::RenderContext,
        d: &LayerDraw,
        refs: &mut Vec<String>,
    ) -> PanoResult<()> {
        let paint = self.layer_paint(d, refs)?;
        draw_image(ctx, &paint, d.placement.transform, d.opacity);
        Ok(())
    }

    fn draw_panorama(
        &mut self,
        ctx: &mut vello_cpu::RenderContext,
        p: &PanoramaDraw,
        canvas: Canvas,
    ) -> PanoResult<()> {
        let src = &p.flat.image.image;
        let (pw, ph) = preview_size(canvas.width, canvas.height, self.config.pano_preview_max);
        let key = RemapKey::new(pw, ph, src.width(), src.height(), &p.view);
        let stale = self
            .pano
            .as_ref()
            .is_none_or(|r| r.key != key || r.source_gen != src.generation());
        if stale {
            let table = self.remap.get_or_build(key)?;
            let raster = table.apply(src.data())?;
            self.pano = Some(PanoRaster {
                key,
                source_gen: src.generation(),
                image: CpuImage::from_premul(&raster, pw, ph)?,
            });
        }
        let raster = self
            .pano
            .as_ref()
            .ok_or_else(|| PanoError::evaluation("panorama raster missing"))?;
        let to_viewport = Affine::scale_non_uniform(
            f64::from(canvas.width) / f64::from(pw),
            f64::from(canvas.height) / f64::from(ph),
        );
        draw_image(
            ctx,
            &raster.image,
            p.viewport.transform * to_viewport,
            p.flat.opacity,
        );
        Ok(())
    }

    fn draw_background(
        &mut self,
        ctx: &mut vello_cpu::RenderContext,
        bg: &BackgroundDraw,
        canvas: Canvas,
        refs: &mut Vec<String>,
    ) -> PanoResult<()> {
        match bg {
            BackgroundDraw::Flat(d) => self.draw_layer(ctx, d, refs),
            BackgroundDraw::Panorama(p) => match self.draw_panorama(ctx, p, canvas) {
                Ok(()) => Ok(()),
                Err(e) => {
                    tracing::warn!(
                        layer = %p.flat.layer_id,
                        error = %e,
                        "panorama projection failed, drawing flat background"
                    );
                    self.draw_layer(ctx, &p.flat, refs)
                }
            },
        }
    }
}

fn tally(outcome: &mut FrameOutcome, layer_id: &str, result: PanoResult<()>) {
    match result {
        Ok(()) => outcome.drawn += 1,
        Err(e) => {
            outcome.failed += 1;
            tracing::warn!(layer = layer_id, error = %e, "skipping layer");
        }
    }
}

impl Compositor for SoftwareCompositor {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    #[tracing::instrument(level = "debug", skip_all, fields(time = plan.time))]
    fn render_frame(&mut self, plan: &FramePlan) -> PanoResult<FrameOutcome> {
        self.perf.start_frame();
        self.ensure_target(plan.canvas)?;
        self.target.clear(plan.clear);

        let mut ctx = self.target.context();
        let mut outcome = FrameOutcome::default();
        let mut refs = Vec::new();

        if let Some(bg) = &plan.background {
            let r = self.draw_background(&mut ctx, bg, plan.canvas, &mut refs);
            tally(&mut outcome, &bg.layer().layer_id, r);
        }
        for d in &plan.foreground {
            if is_culled(d, plan.canvas) {
                outcome.culled += 1;
                continue;
            }
            let r = self.draw_layer(&mut ctx, d, &mut refs);
            tally(&mut outcome, &d.layer_id, r);
        }

        let composited = self.target.composite_context(&mut ctx, &mut self.scratch);
        for key in &refs {
            self.textures.release(key);
        }
        self.masked
            .retain(|id, _| plan.foreground.iter().any(|d| d.layer_id == *id));
        composited?;

        self.perf.end_frame();
        tracing::debug!(
            drawn = outcome.drawn,
            culled = outcome.culled,
            failed = outcome.failed,
            "software frame rendered"
        );
        Ok(outcome)
    }

    fn draw_overlay(&mut self, overlay: OverlayKind) -> PanoResult<()> {
        let px = premul_rgba8_from(overlay.color());
        for d in self.target.data_mut().chunks_exact_mut(4) {
            let out = composite::over([d[0], d[1], d[2], d[3]], px, 1.0);
            d.copy_from_slice(&out);
        }
        Ok(())
    }

    fn read_frame(&mut self) -> PanoResult<FrameRGBA> {
        Ok(self.target.to_frame())
    }

    fn resize_render_targets(&mut self, width: u32, height: u32) -> PanoResult<()> {
        // Surfaces follow the plan canvas on the next frame.
        Canvas::new(width, height).map(drop)
    }

    fn performance_stats(&self) -> PerformanceStats {
        self.perf.stats()
    }

    fn cache_stats(&self) -> CacheStats {
        self.textures.stats()
    }

    fn release_layer(&mut self, layer_id: &str, image_key: Option<&str>) {
        self.masked.remove(layer_id);
        if let Some(key) = image_key {
            self.textures.evict(key);
        }
    }

    fn cleanup(&mut self) {
        self.textures.cleanup();
        self.masked.clear();
        self.remap.clear();
        self.pano = None;
    }
}

pub(crate) fn premul_rgba8_from(c: Rgba) -> [u8; 4] {
    let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let [r, g, b, a] = c.premultiplied();
    [q(r), q(g), q(b), q(a)]
}

pub(crate) fn color_to_cpu(c: Rgba) -> vello_cpu::peniko::Color {
    let [r, g, b, a] = c.to_rgba8();
    vello_cpu::peniko::Color::from_rgba8(r, g, b, a)
}

pub(crate) fn affine_to_cpu(a: Affine) -> vello_cpu::kurbo::Affine {
    vello_cpu::kurbo::Affine::new(a.as_coeffs())
}

pub(crate) fn point_to_cpu(p: Point) -> vello_cpu::kurbo::Point {
    vello_cpu::kurbo::Point::new(p.x, p.y)
}

pub(crate) fn bezpath_to_cpu(path: &BezPath) -> vello_cpu::kurbo::BezPath {
    use kurbo::PathEl;

    let mut out = vello_cpu::kurbo::BezPath::new();
    for &el in path.elements() {
        match el {
            PathEl::MoveTo(p) => out.move_to(point_to_cpu(p)),
            PathEl::LineTo(p) => out.line_to(point_to_cpu(p)),
            PathEl::QuadTo(p1, p2) => out.quad_to(point_to_cpu(p1), point_to_cpu(p2)),
            PathEl::CurveTo(p1, p2, p3) => {
                out.curve_to(point_to_cpu(p1), point_to_cpu(p2), point_to_cpu(p3));
            }
            PathEl::ClosePath => out.close_path(),
        }
    }
    out
}

/// Fill the image rect of `image` under `transform`.
pub(crate) fn draw_image(
    ctx: &mut vello_cpu::RenderContext,
    image: &CpuImage,
    transform: Affine,
    opacity: f32,
) {
    if opacity <= 0.0 {
        return;
    }
    ctx.set_transform(affine_to_cpu(transform));
    ctx.set_paint_transform(vello_cpu::kurbo::Affine::IDENTITY);
    ctx.set_paint(image.paint.clone());
    if opacity < 1.0 {
        ctx.push_opacity_layer(opacity);
    }
    ctx.fill_rect(&vello_cpu::kurbo::Rect::new(0.0, 0.0, image.width, image.height));
    if opacity < 1.0 {
        ctx.pop_layer();
    }
}

fn image_premul_bytes_to_pixmap(
    rgba8_premul: &[u8],
    width: u32,
    height: u32,
) -> PanoResult<vello_cpu::Pixmap> {
    let w: u16 = width
        .try_into()
        .map_err(|_| PanoError::resource("image width exceeds u16"))?;
    let h: u16 = height
        .try_into()
        .map_err(|_| PanoError::resource("image height exceeds u16"))?;
    if rgba8_premul.len() != width as usize * height as usize * 4 {
        return Err(PanoError::resource("image byte length mismatch"));
    }

    let mut may_have_opacities = false;
    let pixels = rgba8_premul
        .chunks_exact(4)
        .map(|px| {
            may_have_opacities |= px[3] != 255;
            vello_cpu::peniko::color::PremulRgba8 {
                r: px[0],
                g: px[1],
                b: px[2],
                a: px[3],
            }
        })
        .collect();

    Ok(vello_cpu::Pixmap::from_parts_with_opacity(
        pixels,
        w,
        h,
        may_have_opacities,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assets::{decode::ImageRgba, store::ImageStore},
        compile::plan::build_frame_plan,
        eval::props::PropsResolver,
        scene::{
            model::{Layer, LayerAttr},
            project::Project,
            store::SceneDocument,
        },
    };

    fn small_doc(layers: Vec<Layer>) -> SceneDocument {
        SceneDocument {
            project: Project {
                width: 8,
                height: 8,
                ..Project::default()
            },
            layers,
            ..SceneDocument::default()
        }
    }

    fn render(doc: &SceneDocument, images: &ImageStore) -> (SoftwareCompositor, FrameOutcome) {
        let cfg = RendererConfig::default();
        let plan = build_frame_plan(doc, 0.0, images, &mut PropsResolver::default(), &cfg);
        let mut c = SoftwareCompositor::new(cfg);
        let out = c.render_frame(&plan).unwrap();
        (c, out)
    }

    #[test]
    fn empty_scene_clears_to_opaque_black() {
        let (mut c, out) = render(&small_doc(vec![]), &ImageStore::new());
        assert_eq!(out, FrameOutcome::default());
        let f = c.read_frame().unwrap();
        assert_eq!((f.width, f.height), (8, 8));
        assert!(f.data.chunks_exact(4).all(|p| p == [0, 0, 0, 255]));
    }

    #[test]
    fn opaque_foreground_covers_its_rect() {
        let mut images = ImageStore::new();
        images.insert_ready("red", ImageRgba::solid(4, 4, [255, 0, 0, 255]).unwrap());
        let (mut c, out) = render(&small_doc(vec![Layer::foreground("a").with_image("red")]), &images);
        assert_eq!(out.drawn, 1);
        let f = c.read_frame().unwrap();
        assert_eq!(f.pixel(4, 4), Some([255, 0, 0, 255]));
        assert_eq!(f.pixel(0, 0), Some([0, 0, 0, 255]));
        assert_eq!(c.cache_stats().total_ref_count, 0);
        assert_eq!(c.cache_stats().size, 1);
    }

    #[test]
    fn mask_is_a_true_destination_in() {
        let mut images = ImageStore::new();
        images.insert_ready("white", ImageRgba::solid(8, 8, [255, 255, 255, 255]).unwrap());
        let mut mask = vec![0u8; 8 * 8 * 4];
        for y in 0..8 {
            for x in 0..4 {
                let i = (y * 8 + x) * 4;
                mask[i..i + 4].copy_from_slice(&[255, 255, 255, 255]);
            }
        }
        images.insert_ready("left", ImageRgba::from_premul(8, 8, mask).unwrap());
        let doc = small_doc(vec![Layer::foreground("a").with_image("white").with_mask("left")]);

        let cfg = RendererConfig::default();
        let mut props = PropsResolver::default();
        let mut c = SoftwareCompositor::new(cfg.clone());
        let plan = build_frame_plan(&doc, 0.0, &images, &mut props, &cfg);
        c.render_frame(&plan).unwrap();
        let f = c.read_frame().unwrap();
        assert_eq!(f.pixel(1, 4), Some([255, 255, 255, 255]));
        assert_eq!(f.pixel(6, 4), Some([0, 0, 0, 255]));

        c.render_frame(&plan).unwrap();
        assert_eq!(c.mask_builds(), 1);
    }

    #[test]
    fn overlay_tints_the_frame() {
        let (mut c, _) = render(&small_doc(vec![]), &ImageStore::new());
        c.draw_overlay(OverlayKind::Extract).unwrap();
        let f = c.read_frame().unwrap();
        assert_eq!(f.pixel(0, 0), Some([0, 0, 0, 255]));

        c.draw_overlay(OverlayKind::Mask).unwrap();
        let f = c.read_frame().unwrap();
        let [r, g, _, a] = f.pixel(3, 3).unwrap();
        assert!(r > 100 && g == 0 && a == 255);
    }

    #[test]
    fn invisible_layers_are_culled() {
        let mut images = ImageStore::new();
        images.insert_ready("red", ImageRgba::solid(4, 4, [255, 0, 0, 255]).unwrap());
        let doc = small_doc(vec![
            Layer::foreground("a")
                .with_image("red")
                .with_attr(LayerAttr::Opacity, 0.0),
        ]);
        let (_, out) = render(&doc, &images);
        assert_eq!((out.drawn, out.culled), (0, 1));
    }

    #[test]
    fn cleanup_is_idempotent() {
        let mut images = ImageStore::new();
        images.insert_ready("red", ImageRgba::solid(2, 2, [255, 0, 0, 255]).unwrap());
        let (mut c, _) = render(&small_doc(vec![Layer::foreground("a").with_image("red")]), &images);
        c.cleanup();
        c.cleanup();
        assert_eq!(c.cache_stats().size, 0);
    }
}
