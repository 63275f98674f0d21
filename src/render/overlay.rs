//! Editor guides drawn on a separate transparent surface, cleared every frame.

use crate::{
    animation::bezier::{BezierPoint, end_tangent, to_bez_path},
    compile::plan::{FramePlan, LayerDraw},
    foundation::{
        core::{BezPath, Canvas, Point, Rect, Rgba, Vec2},
        error::PanoResult,
    },
    render::{
        FrameRGBA, composite,
        cpu::{CpuImage, CpuSurface, affine_to_cpu, bezpath_to_cpu, color_to_cpu, draw_image},
    },
    scene::{model::Layer, store::EditorModes},
};

const fn rgb8(r: u8, g: u8, b: u8) -> Rgba {
    Rgba::new(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, 1.0)
}

const PATH_COLOR: Rgba = rgb8(0xff, 0x6b, 0x6b);
const FIRST_POINT_COLOR: Rgba = rgb8(0x4e, 0xcd, 0xc4);
const MID_POINT_COLOR: Rgba = rgb8(0xff, 0xe6, 0x6d);
const SELECTION_COLOR: Rgba = rgb8(0x3a, 0x7b, 0xc8);
const MASK_SIZE_COLOR: Rgba = rgb8(0x3a, 0xc8, 0x8e);
const WHITE: Rgba = rgb8(0xff, 0xff, 0xff);

const MARKER_RADIUS: f64 = 6.0;
const ARROW_LENGTH: f64 = 18.0;
const HANDLE_SIZE: f64 = 8.0;
const GUIDE_WIDTH: f64 = 2.0;
const DASH: [f64; 2] = [5.0, 5.0];

/// What the editor wants drawn on top of the composited frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct OverlayRequest<'a> {
    pub modes: EditorModes,
    pub selected: Option<&'a Layer>,
}

impl OverlayRequest<'_> {
    pub fn is_empty(&self) -> bool {
        self.selected.is_none() && !self.modes.extract
    }
}

struct Surfaces {
    main: CpuSurface,
    scratch: CpuSurface,
    tint: CpuSurface,
}

impl Surfaces {
    fn new(canvas: Canvas) -> PanoResult<Self> {
        Ok(Self {
            main: CpuSurface::new(canvas.width, canvas.height)?,
            scratch: CpuSurface::new(canvas.width, canvas.height)?,
            tint: CpuSurface::new(canvas.width, canvas.height)?,
        })
    }
}

/// Transparent vello_cpu surface for selection borders, path guides and mode tints.
#[derive(Default)]
pub struct InteractionSurface {
    surfaces: Option<Surfaces>,
}

impl std::fmt::Debug for InteractionSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionSurface")
            .field("allocated", &self.surfaces.is_some())
            .finish()
    }
}

impl InteractionSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure(&mut self, canvas: Canvas) -> PanoResult<&mut Surfaces> {
        let s = match self.surfaces.take() {
            Some(s) if s.main.matches(canvas.width, canvas.height) => s,
            _ => Surfaces::new(canvas)?,
        };
        Ok(self.surfaces.insert(s))
    }

    /// Drop the backing rasters.
    pub fn release(&mut self) {
        self.surfaces = None;
    }

    /// Clear the surface and draw every guide `request` asks for.
    pub fn draw(&mut self, plan: &FramePlan, request: OverlayRequest<'_>) -> PanoResult<FrameRGBA> {
        let canvas = plan.canvas;
        let Surfaces {
            main,
            scratch,
            tint,
        } = self.ensure(canvas)?;
        main.clear([0, 0, 0, 0]);

        if request.modes.extract {
            let mut ctx = main.context();
            ctx.set_paint(color_to_cpu(Rgba::new(0.0, 0.0, 0.0, 0.6)));
            ctx.fill_rect(&rect_to_cpu(canvas.rect()));
            main.composite_context(&mut ctx, scratch)?;
        }

        let selected = request.selected.and_then(|layer| {
            let draw = find_draw(plan, layer.id());
            if draw.is_none() {
                tracing::debug!(layer = layer.id(), "selected layer not drawn this frame");
            }
            draw.map(|d| (layer, d))
        });

        if let Some((_, draw)) = selected
            && request.modes.mask
        {
            mask_tint(main, scratch, tint, draw)?;
        }

        if let Some((layer, draw)) = selected {
            let mut ctx = main.context();
            selection_border(&mut ctx, draw);
            if draw.props.mask_size > 0.0 {
                mask_size_guide(&mut ctx, draw);
            }
            if request.modes.path {
                path_guide(&mut ctx, layer.bezier_path(), canvas);
            }
            main.composite_context(&mut ctx, scratch)?;
        }

        Ok(main.to_frame())
    }
}

fn find_draw<'p>(plan: &'p FramePlan, layer_id: &str) -> Option<&'p LayerDraw> {
    plan.foreground
        .iter()
        .find(|d| d.layer_id == layer_id)
        .or_else(|| {
            plan.background
                .as_ref()
                .map(|b| b.layer())
                .filter(|d| d.layer_id == layer_id)
        })
}

fn rect_to_cpu(r: Rect) -> vello_cpu::kurbo::Rect {
    vello_cpu::kurbo::Rect::new(r.x0, r.y0, r.x1, r.y1)
}

fn polygon(points: &[Point]) -> BezPath {
    let mut path = BezPath::new();
    if let Some((first, rest)) = points.split_first() {
        path.move_to(*first);
        for p in rest {
            path.line_to(*p);
        }
        path.close_path();
    }
    path
}

fn stroke(ctx: &mut vello_cpu::RenderContext, path: &BezPath, color: Rgba, dashed: bool) {
    let mut s = vello_cpu::kurbo::Stroke::new(GUIDE_WIDTH);
    if dashed {
        s = s.with_dashes(0.0, DASH);
    }
    ctx.set_stroke(s);
    ctx.set_paint(color_to_cpu(color));
    ctx.stroke_path(&bezpath_to_cpu(path));
}

/// Red tint over the layer rect with the mask's opaque area punched out.
fn mask_tint(
    main: &mut CpuSurface,
    scratch: &mut CpuSurface,
    tint: &mut CpuSurface,
    draw: &LayerDraw,
) -> PanoResult<()> {
    let mut ctx = main.context();
    ctx.set_transform(affine_to_cpu(draw.placement.transform));
    ctx.set_paint(color_to_cpu(Rgba::new(1.0, 0.0, 0.0, 0.3)));
    ctx.push_opacity_layer(0.5);
    ctx.fill_rect(&rect_to_cpu(draw.placement.image_rect()));
    ctx.pop_layer();
    tint.render_from(&mut ctx);

    if let Some(mask) = &draw.mask {
        let paint =
            CpuImage::from_premul(mask.image.data(), mask.image.width(), mask.image.height())?;
        let mut mctx = main.context();
        draw_image(&mut mctx, &paint, draw.placement.transform, 1.0);
        scratch.render_from(&mut mctx);
        composite::destination_out_in_place(tint.data_mut(), scratch.data())?;
    }
    composite::over_in_place(main.data_mut(), tint.data(), 1.0)
}

fn selection_border(ctx: &mut vello_cpu::RenderContext, draw: &LayerDraw) {
    ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
    let corners = draw.placement.corners();
    let color = SELECTION_COLOR;
    stroke(ctx, &polygon(&corners), color, false);

    ctx.set_paint(color_to_cpu(color));
    let half = HANDLE_SIZE / 2.0;
    for c in corners {
        ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
            c.x - half,
            c.y - half,
            c.x + half,
            c.y + half,
        ));
    }
}

/// Dashed rect of the extract region, centred on the layer pivot in image space.
fn mask_size_guide(ctx: &mut vello_cpu::RenderContext, draw: &LayerDraw) {
    let p = &draw.placement;
    let (w, h) = (p.image_width, p.image_height);
    let pivot = Point::new(
        w / 2.0 + draw.props.anchor_x * w,
        h / 2.0 + draw.props.anchor_y * h,
    );
    let half = Vec2::new(w * draw.props.mask_size / 2.0, h * draw.props.mask_size / 2.0);
    let local = Rect::from_points(pivot - half, pivot + half);
    let corners = [
        Point::new(local.x0, local.y0),
        Point::new(local.x1, local.y0),
        Point::new(local.x1, local.y1),
        Point::new(local.x0, local.y1),
    ]
    .map(|c| p.transform * c);

    ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
    stroke(ctx, &polygon(&corners), MASK_SIZE_COLOR, true);
}

/// Dashed motion path with point markers and an arrowhead at the end.
fn path_guide(ctx: &mut vello_cpu::RenderContext, points: &[BezierPoint], canvas: Canvas) {
    if points.is_empty() {
        return;
    }
    let origin = canvas.center().to_vec2();
    ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);

    if points.len() >= 2 {
        stroke(ctx, &to_bez_path(points, origin), PATH_COLOR, true);
    }

    let last = points.len() - 1;
    for (i, bp) in points.iter().enumerate() {
        let fill = match i {
            0 => FIRST_POINT_COLOR,
            i if i == last => PATH_COLOR,
            _ => MID_POINT_COLOR,
        };
        let circle = kurbo::Circle::new(bp.point() + origin, MARKER_RADIUS);
        let path = kurbo::Shape::to_path(&circle, 0.1);
        ctx.set_paint(color_to_cpu(fill));
        ctx.fill_path(&bezpath_to_cpu(&path));
        stroke(ctx, &path, WHITE, false);
    }

    if let Some(tangent) = end_tangent(points, 0.99)
        && tangent.hypot2() > 0.0
    {
        let tip = points[last].point() + origin;
        let angle = tangent.y.atan2(tangent.x);
        let mut arrow = BezPath::new();
        for side in [-1.0, 1.0] {
            let a = angle + side * std::f64::consts::FRAC_PI_6;
            arrow.move_to(tip);
            arrow.line_to(tip - Vec2::new(a.cos(), a.sin()) * ARROW_LENGTH);
        }
        stroke(ctx, &arrow, PATH_COLOR, false);
    }
}
