use std::sync::Arc;

use crate::{
    assets::{
        decode::ImageRgba,
        store::{ImageSlot, ImageStore},
    },
    config::RendererConfig,
    eval::{
        camera::CameraRig,
        placement::{Placement, background_placement, foreground_placement, panorama_viewport},
        props::{LayerProps, PropsResolver},
    },
    foundation::core::Canvas,
    panorama::PanoView,
    scene::{model::Layer, store::SceneDocument},
};

/// Layers at or below this opacity are not drawn.
pub const MIN_VISIBLE_OPACITY: f64 = 0.001;
/// Layers scaled below this are not drawn.
pub const MIN_VISIBLE_SCALE: f64 = 0.001;
/// Off-screen margin as a multiple of the larger on-screen side.
pub const CULL_MARGIN_FACTOR: f64 = 1.5;

const IDENTITY3: [[f32; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// A decoded image together with the key it was requested under.
#[derive(Clone, Debug)]
pub struct ImageRef {
    pub key: String,
    pub image: Arc<ImageRgba>,
}

/// One textured quad, fully evaluated.
#[derive(Clone, Debug)]
pub struct LayerDraw {
    pub layer_id: String,
    pub props: LayerProps,
    pub placement: Placement,
    pub image: ImageRef,
    pub mask: Option<ImageRef>,
    /// Layer opacity in `0..=1`.
    pub opacity: f32,
}

impl LayerDraw {
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct PanoramaDraw {
    pub view: PanoView,
    /// Viewport raster placement on the canvas.
    pub viewport: Placement,
    /// The same layer as a flat background, used when the projection cannot run.
    pub flat: LayerDraw,
}

#[derive(Clone, Debug)]
pub enum BackgroundDraw {
    Flat(LayerDraw),
    Panorama(PanoramaDraw),
}

impl BackgroundDraw {
    pub fn layer(&self) -> &LayerDraw {
        match self {
            Self::Flat(d) => d,
            Self::Panorama(p) => &p.flat,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NoImage,
    /// Image (or its mask) is still decoding.
    Loading(String),
    Failed { key: String, error: String },
    EmptyImage,
    /// A second background layer; only the first one is drawn.
    ExtraBackground,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedLayer {
    pub layer_id: String,
    pub reason: SkipReason,
}

/// Backend-neutral description of one frame.
#[derive(Clone, Debug)]
pub struct FramePlan {
    pub canvas: Canvas,
    pub time: f64,
    /// Premultiplied RGBA8 clear color.
    pub clear: [u8; 4],
    pub rig: CameraRig,
    /// Row-major rotation applied to GPU vertex positions.
    pub vertex_rotation: [[f32; 3]; 3],
    pub background: Option<BackgroundDraw>,
    /// Foreground layers in list order.
    pub foreground: Vec<LayerDraw>,
    pub skipped: Vec<SkippedLayer>,
    /// Keys still decoding that a drawable layer needs.
    pub pending_images: Vec<String>,
}

impl FramePlan {
    pub fn has_pending_images(&self) -> bool {
        !self.pending_images.is_empty()
    }

    pub fn draw_count(&self) -> usize {
        self.foreground.len() + usize::from(self.background.is_some())
    }

    /// Drop the background and keep only the foreground stack.
    pub fn without_background(mut self) -> Self {
        self.background = None;
        self
    }
}

enum Lookup {
    Ready(ImageRef),
    Skip(SkipReason),
}

fn lookup(images: &ImageStore, key: &str) -> Lookup {
    match images.state(key) {
        Some(ImageSlot::Ready(img)) if img.is_empty() => Lookup::Skip(SkipReason::EmptyImage),
        Some(ImageSlot::Ready(img)) => Lookup::Ready(ImageRef {
            key: key.to_owned(),
            image: img.clone(),
        }),
        Some(ImageSlot::Loading) => Lookup::Skip(SkipReason::Loading(key.to_owned())),
        Some(ImageSlot::Failed(e)) => Lookup::Skip(SkipReason::Failed {
            key: key.to_owned(),
            error: e.clone(),
        }),
        None => Lookup::Skip(SkipReason::Failed {
            key: key.to_owned(),
            error: "image was never requested".to_owned(),
        }),
    }
}

/// Resolve the image and optional mask of `layer`, or why it cannot be drawn.
fn layer_images(
    layer: &Layer,
    images: &ImageStore,
) -> Result<(ImageRef, Option<ImageRef>), SkipReason> {
    let key = layer.image().ok_or(SkipReason::NoImage)?;
    let image = match lookup(images, key) {
        Lookup::Ready(r) => r,
        Lookup::Skip(reason) => return Err(reason),
    };
    let mask = match layer.mask() {
        None => None,
        Some(mk) => match lookup(images, mk) {
            Lookup::Ready(m)
                if m.image.width() == image.image.width()
                    && m.image.height() == image.image.height() =>
            {
                Some(m)
            }
            Lookup::Ready(m) => {
                tracing::warn!(
                    layer = layer.id(),
                    mask = %m.key,
                    "mask size differs from image, drawing unmasked"
                );
                None
            }
            Lookup::Skip(SkipReason::Loading(k)) => return Err(SkipReason::Loading(k)),
            Lookup::Skip(reason) => {
                tracing::warn!(layer = layer.id(), ?reason, "mask unavailable, drawing unmasked");
                None
            }
        },
    };
    Ok((image, mask))
}

fn opacity_of(props: &LayerProps) -> f32 {
    if props.opacity.is_nan() {
        return 0.0;
    }
    props.opacity.clamp(0.0, 1.0) as f32
}

/// Evaluate `doc` at `time` into a [`FramePlan`]. The camera is resolved once here.
#[tracing::instrument(level = "debug", skip_all, fields(time = time))]
pub fn build_frame_plan(
    doc: &SceneDocument,
    time: f64,
    images: &ImageStore,
    props: &mut PropsResolver,
    config: &RendererConfig,
) -> FramePlan {
    let canvas = config.render_size.unwrap_or_else(|| doc.project.canvas());
    let duration = doc.project.duration;
    let rig = CameraRig::resolve(&doc.camera, time, f64::from(canvas.width));
    let vertex_rotation = if config.advanced_transforms && rig.enabled() {
        rig.rotation_matrix()
    } else {
        IDENTITY3
    };

    let mut plan = FramePlan {
        canvas,
        time,
        clear: config.clear_rgba8_premul(),
        rig,
        vertex_rotation,
        background: None,
        foreground: Vec::new(),
        skipped: Vec::new(),
        pending_images: Vec::new(),
    };

    for layer in &doc.layers {
        if layer.is_background() && plan.background.is_some() {
            plan.skip(layer, SkipReason::ExtraBackground);
            continue;
        }
        let (image, mask) = match layer_images(layer, images) {
            Ok(found) => found,
            Err(reason) => {
                plan.skip(layer, reason);
                continue;
            }
        };
        let p = props.resolve(layer, time, duration);
        let (w, h) = (f64::from(image.image.width()), f64::from(image.image.height()));
        let opacity = opacity_of(&p);

        if layer.is_background() {
            let flat = LayerDraw {
                layer_id: layer.id().to_owned(),
                props: p,
                placement: background_placement(&p, layer.bg_mode(), w, h, &rig, canvas),
                image,
                mask: None,
                opacity,
            };
            plan.background = Some(if rig.panorama() {
                BackgroundDraw::Panorama(PanoramaDraw {
                    view: PanoView::from_rig(&rig, canvas.aspect()),
                    viewport: panorama_viewport(&rig, canvas),
                    flat,
                })
            } else {
                BackgroundDraw::Flat(flat)
            });
        } else {
            plan.foreground.push(LayerDraw {
                layer_id: layer.id().to_owned(),
                props: p,
                placement: foreground_placement(&p, w, h, &rig, canvas),
                image,
                mask,
                opacity,
            });
        }
    }

    tracing::debug!(
        drawn = plan.draw_count(),
        skipped = plan.skipped.len(),
        pending = plan.pending_images.len(),
        "frame plan built"
    );
    plan
}

impl FramePlan {
    fn skip(&mut self, layer: &Layer, reason: SkipReason) {
        match &reason {
            SkipReason::Loading(key) => {
                if !self.pending_images.contains(key) {
                    self.pending_images.push(key.clone());
                }
            }
            SkipReason::Failed { key, error } => {
                tracing::warn!(layer = layer.id(), key = %key, error = %error, "skipping layer");
            }
            SkipReason::EmptyImage | SkipReason::ExtraBackground => {
                tracing::debug!(layer = layer.id(), ?reason, "skipping layer");
            }
            SkipReason::NoImage => {}
        }
        self.skipped.push(SkippedLayer {
            layer_id: layer.id().to_owned(),
            reason,
        });
    }
}

/// True when a foreground draw contributes nothing visible.
pub fn is_culled(draw: &LayerDraw, canvas: Canvas) -> bool {
    if f64::from(draw.opacity) <= MIN_VISIBLE_OPACITY || draw.props.scale.abs() < MIN_VISIBLE_SCALE
    {
        return true;
    }
    let margin = CULL_MARGIN_FACTOR * draw.placement.on_screen_extent();
    let c = draw.placement.center;
    let (w, h) = (f64::from(canvas.width), f64::from(canvas.height));
    c.x < -margin || c.x > w + margin || c.y < -margin || c.y > h + margin
}

/// Indices of visible foreground draws, unmasked first, each group in list order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batches {
    pub unmasked: Vec<usize>,
    pub masked: Vec<usize>,
    pub culled: usize,
}

impl Batches {
    pub fn draw_order(&self) -> impl Iterator<Item = usize> + '_ {
        self.unmasked.iter().chain(self.masked.iter()).copied()
    }

    pub fn len(&self) -> usize {
        self.unmasked.len() + self.masked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn cull_and_batch(foreground: &[LayerDraw], canvas: Canvas) -> Batches {
    let mut out = Batches::default();
    for (i, d) in foreground.iter().enumerate() {
        if is_culled(d, canvas) {
            out.culled += 1;
        } else if d.is_masked() {
            out.masked.push(i);
        } else {
            out.unmasked.push(i);
        }
    }
    out
}
