//! Foreground alpha matte: every foreground layer over transparent, expanded and feathered.

use crate::{
    compile::plan::FramePlan,
    config::RendererConfig,
    foundation::error::{PanoError, PanoResult},
    render::{
        Compositor,
        blur::{blur_alpha8, default_sigma},
        composite,
        cpu::SoftwareCompositor,
    },
};

/// Matte post-processing parameters, usually taken from the project.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MatteOptions {
    /// Pixels to grow (positive) or shrink (negative) the matte by.
    pub expansion: i32,
    /// Gaussian feather radius in pixels.
    pub feather: u32,
}

/// Render the foreground of `plan` into an 8-bit coverage matte.
#[tracing::instrument(level = "debug", skip_all, fields(time = plan.time))]
pub fn render_matte(
    plan: FramePlan,
    options: MatteOptions,
    config: &RendererConfig,
) -> PanoResult<image::GrayImage> {
    let mut plan = plan.without_background();
    plan.clear = [0, 0, 0, 0];

    let mut compositor = SoftwareCompositor::new(config.clone());
    let outcome = compositor.render_frame(&plan)?;
    let frame = compositor.read_frame()?;
    compositor.cleanup();

    let (w, h) = (frame.width, frame.height);
    let mut alpha = composite::extract_alpha(&frame.data);
    alpha = expand(&alpha, w, h, options.expansion);
    if options.feather > 0 {
        alpha = blur_alpha8(&alpha, w, h, options.feather, default_sigma(options.feather))?;
    }
    tracing::debug!(
        layers = outcome.drawn,
        expansion = options.expansion,
        feather = options.feather,
        "matte rendered"
    );

    image::GrayImage::from_raw(w, h, alpha)
        .ok_or_else(|| PanoError::evaluation("matte buffer does not match its dimensions"))
}

/// Dilate (`n > 0`) or erode (`n < 0`) with a 3x3 window, `|n|` times.
pub fn expand(alpha: &[u8], width: u32, height: u32, n: i32) -> Vec<u8> {
    let mut cur = alpha.to_vec();
    for _ in 0..n.unsigned_abs() {
        cur = if n > 0 {
            window3(&cur, width, height, u8::max)
        } else {
            window3(&cur, width, height, u8::min)
        };
    }
    cur
}

fn window3(src: &[u8], width: u32, height: u32, pick: fn(u8, u8) -> u8) -> Vec<u8> {
    let (w, h) = (width as i64, height as i64);
    let mut out = src.to_vec();
    for y in 0..h {
        for x in 0..w {
            let mut acc = src[(y * w + x) as usize];
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (sx, sy) = (x + dx, y + dy);
                    if sx < 0 || sy < 0 || sx >= w || sy >= h {
                        continue;
                    }
                    acc = pick(acc, src[(sy * w + sx) as usize]);
                }
            }
            out[(y * w + x) as usize] = acc;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assets::{decode::ImageRgba, store::ImageStore},
        compile::plan::build_frame_plan,
        eval::props::PropsResolver,
        scene::{model::Layer, project::Project, store::SceneDocument},
    };

    fn dot() -> Vec<u8> {
        let mut a = vec![0u8; 25];
        a[12] = 255;
        a
    }

    #[test]
    fn dilation_grows_by_one_pixel_per_step() {
        let out = expand(&dot(), 5, 5, 1);
        assert_eq!(out.iter().filter(|&&v| v == 255).count(), 9);
        let out = expand(&dot(), 5, 5, 2);
        assert!(out.iter().all(|&v| v == 255));
    }

    #[test]
    fn erosion_removes_isolated_pixels() {
        assert!(expand(&dot(), 5, 5, -1).iter().all(|&v| v == 0));
        assert_eq!(expand(&dot(), 5, 5, 0), dot());
    }

    fn scene_plan(images: &ImageStore) -> FramePlan {
        let doc = SceneDocument {
            project: Project {
                width: 16,
                height: 16,
                ..Project::default()
            },
            layers: vec![
                Layer::background("bg").with_image("bg"),
                Layer::foreground("fg").with_image("fg"),
            ],
            ..SceneDocument::default()
        };
        build_frame_plan(
            &doc,
            0.0,
            images,
            &mut PropsResolver::default(),
            &RendererConfig::default(),
        )
    }

    fn images() -> ImageStore {
        let mut images = ImageStore::new();
        images.insert_ready("bg", ImageRgba::solid(16, 16, [0, 0, 255, 255]).unwrap());
        images.insert_ready("fg", ImageRgba::solid(8, 8, [255, 0, 0, 255]).unwrap());
        images
    }

    #[test]
    fn matte_covers_foreground_only() {
        let images = images();
        let m = render_matte(scene_plan(&images), MatteOptions::default(), &RendererConfig::default())
            .unwrap();
        assert_eq!(m.dimensions(), (16, 16));
        assert_eq!(m.get_pixel(8, 8).0, [255]);
        assert_eq!(m.get_pixel(0, 0).0, [0]);
    }

    #[test]
    fn feather_softens_the_edge() {
        let images = images();
        let opts = MatteOptions {
            expansion: 0,
            feather: 2,
        };
        let m = render_matte(scene_plan(&images), opts, &RendererConfig::default()).unwrap();
        let edge = m.get_pixel(4, 8).0[0];
        assert!(edge > 0 && edge < 255, "edge {edge}");
        assert_eq!(m.get_pixel(8, 8).0, [255]);
    }
}
