//! Screen placement shared by every backend.
//!
//! Each function maps image pixel space (`0..w`, `0..h`) to canvas pixel space. The software
//! compositor feeds the affine straight to the rasterizer; the GPU compositor transforms the
//! four image corners into normalized device coordinates.

use crate::{
    eval::{
        camera::{CameraRig, depth_mul},
        props::LayerProps,
    },
    foundation::{
        core::{Affine, Canvas, Point, Rect, Vec2},
        math::{deg_to_rad, positive_or},
    },
    scene::model::BackgroundMode,
};

/// Where one layer lands on the canvas.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    /// Image pixel space to canvas pixel space.
    pub transform: Affine,
    pub image_width: f64,
    pub image_height: f64,
    /// Canvas-space pivot of the layer.
    pub center: Point,
    /// Uniform on-screen scale applied to the image (background uses the x factor).
    pub scale: f64,
}

impl Placement {
    pub fn image_rect(&self) -> Rect {
        Rect::new(0.0, 0.0, self.image_width, self.image_height)
    }

    /// Canvas-space corners in TL, TR, BR, BL order.
    pub fn corners(&self) -> [Point; 4] {
        let (w, h) = (self.image_width, self.image_height);
        [
            self.transform * Point::new(0.0, 0.0),
            self.transform * Point::new(w, 0.0),
            self.transform * Point::new(w, h),
            self.transform * Point::new(0.0, h),
        ]
    }

    /// Larger on-screen side length of the unrotated image.
    pub fn on_screen_extent(&self) -> f64 {
        self.image_width.max(self.image_height) * self.scale.abs()
    }
}

/// Non-uniform scale approximating an out-of-plane rotation about X and Y.
pub fn tilt_affine(props: &LayerProps, w: f64, h: f64) -> Affine {
    if props.rotation_x == 0.0 && props.rotation_y == 0.0 {
        return Affine::IDENTITY;
    }
    let perspective = positive_or(props.perspective, 1000.0);
    let (sin_x, cos_x) = deg_to_rad(props.rotation_x).sin_cos();
    let (sin_y, cos_y) = deg_to_rad(props.rotation_y).sin_cos();
    let denom = 1.0 + (sin_y * w / 2.0 + sin_x * h / 2.0) / perspective;
    if !denom.is_finite() || denom <= 0.01 {
        return Affine::IDENTITY;
    }
    let z = 1.0 / denom;
    Affine::new([cos_y * z, sin_x * sin_y * z, 0.0, cos_x * z, 0.0, 0.0])
}

/// Placement of a foreground layer of `w`x`h` pixels.
pub fn foreground_placement(
    props: &LayerProps,
    w: f64,
    h: f64,
    rig: &CameraRig,
    canvas: Canvas,
) -> Placement {
    let depth = depth_mul(props.z);
    let cam_mul = rig.camera_scale();
    let pos = Vec2::new(props.x, props.y) - rig.follow_shift();
    let center = canvas.center() + (pos + rig.offset() * rig.parallax(depth)) * cam_mul;
    let scale = props.scale * cam_mul * depth;

    let anchor = Vec2::new(-w / 2.0 - props.anchor_x * w, -h / 2.0 - props.anchor_y * h);
    let transform = Affine::translate(center.to_vec2())
        * tilt_affine(props, w, h)
        * Affine::rotate(deg_to_rad(props.effective_rotation()))
        * Affine::scale(scale)
        * Affine::translate(anchor);

    Placement {
        transform,
        image_width: w,
        image_height: h,
        center,
        scale,
    }
}

/// Per-axis scale fitting an `iw`x`ih` background into the canvas.
pub fn background_base_scale(mode: BackgroundMode, canvas: Canvas, iw: f64, ih: f64) -> Vec2 {
    let sx = f64::from(canvas.width) / iw;
    let sy = f64::from(canvas.height) / ih;
    let (bx, by) = match mode {
        BackgroundMode::Fit => (sx.min(sy), sx.min(sy)),
        BackgroundMode::Fill => (sx.max(sy), sx.max(sy)),
        BackgroundMode::Stretch => (sx, sy),
    };
    Vec2::new(positive_or(bx, 1.0), positive_or(by, 1.0))
}

/// Placement of a flat (non-panorama) background image.
pub fn background_placement(
    props: &LayerProps,
    mode: BackgroundMode,
    w: f64,
    h: f64,
    rig: &CameraRig,
    canvas: Canvas,
) -> Placement {
    let depth = depth_mul(props.z);
    let cam_mul = rig.camera_scale();
    let pos = Vec2::new(props.x, props.y) - rig.background_orbit_shift(props.z);
    let center = canvas.center() + (pos + rig.offset() * rig.parallax(depth)) * cam_mul;

    let base = background_base_scale(mode, canvas, w, h);
    let k = props.scale * cam_mul * depth;
    let (sx, sy) = (base.x * k, base.y * k);

    let transform = Affine::translate(center.to_vec2())
        * Affine::rotate(deg_to_rad(props.effective_rotation()))
        * Affine::scale_non_uniform(sx, sy)
        * Affine::translate(Vec2::new(-w / 2.0, -h / 2.0));

    Placement {
        transform,
        image_width: w,
        image_height: h,
        center,
        scale: sx,
    }
}

/// Where the panorama viewport raster lands: a canvas-sized rect scaled by the camera zoom
/// and shifted by the camera offset.
///
/// Maps viewport space (`0..W`, `0..H`) to canvas space.
pub fn panorama_viewport(rig: &CameraRig, canvas: Canvas) -> Placement {
    let cam_mul = rig.camera_scale();
    let center = canvas.center() + rig.offset() * cam_mul;
    let (w, h) = (f64::from(canvas.width), f64::from(canvas.height));
    let transform = Affine::translate(center.to_vec2())
        * Affine::scale(cam_mul)
        * Affine::translate(Vec2::new(-w / 2.0, -h / 2.0));
    Placement {
        transform,
        image_width: w,
        image_height: h,
        center,
        scale: cam_mul,
    }
}

/// Canvas pixel position to normalized device coordinates (y up).
pub fn to_ndc(p: Point, canvas: Canvas) -> [f32; 2] {
    let w = f64::from(canvas.width);
    let h = f64::from(canvas.height);
    [(p.x / w * 2.0 - 1.0) as f32, (1.0 - p.y / h * 2.0) as f32]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::camera::{CameraState, Vec3};

    fn canvas() -> Canvas {
        Canvas::new(1280, 720).unwrap()
    }

    fn still_rig() -> CameraRig {
        CameraRig::new(CameraState::default(), 1280.0)
    }

    fn near(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9
    }

    #[test]
    fn fit_background_scales_twice_and_centers() {
        let props = LayerProps::default();
        let p = background_placement(&props, BackgroundMode::Fit, 640.0, 360.0, &still_rig(), canvas());
        assert_eq!(p.scale, 2.0);
        let [tl, _, br, _] = p.corners();
        assert!(near(tl, Point::new(0.0, 0.0)));
        assert!(near(br, Point::new(1280.0, 720.0)));
    }

    #[test]
    fn foreground_at_origin_is_unscaled_and_centered() {
        let props = LayerProps::default();
        let p = foreground_placement(&props, 200.0, 100.0, &still_rig(), canvas());
        assert_eq!(p.scale, 1.0);
        let [tl, _, br, _] = p.corners();
        assert!(near(tl, Point::new(540.0, 310.0)));
        assert!(near(br, Point::new(740.0, 410.0)));
    }

    #[test]
    fn base_scale_modes() {
        let c = canvas();
        assert_eq!(background_base_scale(BackgroundMode::Fit, c, 1280.0, 1440.0), Vec2::new(0.5, 0.5));
        assert_eq!(background_base_scale(BackgroundMode::Fill, c, 1280.0, 1440.0), Vec2::new(1.0, 1.0));
        assert_eq!(background_base_scale(BackgroundMode::Stretch, c, 640.0, 720.0), Vec2::new(2.0, 1.0));
        assert_eq!(background_base_scale(BackgroundMode::Fit, c, 0.0, 0.0), Vec2::new(1.0, 1.0));
    }

    #[test]
    fn anchor_moves_pivot() {
        let props = LayerProps {
            anchor_x: 0.5,
            ..LayerProps::default()
        };
        let p = foreground_placement(&props, 100.0, 100.0, &still_rig(), canvas());
        let [tl, ..] = p.corners();
        assert!(near(tl, Point::new(640.0 - 100.0, 310.0)));
    }

    #[test]
    fn camera_zoom_and_offset_apply_with_parallax() {
        let rig = CameraRig::new(
            CameraState {
                enabled: true,
                position: Vec3 {
                    x: 100.0,
                    y: 0.0,
                    z: -500.0,
                },
                ..CameraState::default()
            },
            1280.0,
        );
        let props = LayerProps {
            z: 1000.0,
            ..LayerProps::default()
        };
        let p = foreground_placement(&props, 10.0, 10.0, &rig, canvas());
        // cameraScale 2, depthMul 0.5: offset 100 * 0.5 * 2
        assert!(near(p.center, Point::new(740.0, 360.0)));
        assert!((p.scale - 1.0).abs() < 1e-12);
    }

    #[test]
    fn tilt_is_identity_without_out_of_plane_rotation() {
        assert_eq!(tilt_affine(&LayerProps::default(), 10.0, 10.0), Affine::IDENTITY);
        let tilted = LayerProps {
            rotation_y: 60.0,
            ..LayerProps::default()
        };
        let a = tilt_affine(&tilted, 200.0, 100.0).as_coeffs();
        assert!(a[0] < 0.5 && a[0] > 0.0);
        assert_eq!(a[2], 0.0);
    }

    #[test]
    fn ndc_maps_canvas_corners() {
        let c = canvas();
        assert_eq!(to_ndc(Point::new(0.0, 0.0), c), [-1.0, 1.0]);
        assert_eq!(to_ndc(Point::new(1280.0, 720.0), c), [1.0, -1.0]);
        assert_eq!(to_ndc(Point::new(640.0, 360.0), c), [0.0, 0.0]);
    }
}
