//! Equirectangular panorama projection.
//!
//! The ray math lives here twice: as Rust functions used by the software remap table and as
//! WGSL functions used by the GPU fragment shader. Both follow the same sequence of steps:
//! NDC to view ray, yaw (Y) then pitch (X) then roll (Z), then longitude/latitude to UV.

use std::{f64::consts::PI, sync::Arc};

use crate::{
    eval::camera::CameraRig,
    foundation::{
        error::{PanoError, PanoResult},
        math::deg_to_rad,
    },
};

/// View parameters for one panorama frame. Angles in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PanoView {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    /// Vertical field of view, already clamped.
    pub fov: f64,
    /// Output `width / height`.
    pub aspect: f64,
}

impl PanoView {
    pub fn from_rig(rig: &CameraRig, aspect: f64) -> Self {
        let r = rig.state.rotation;
        Self {
            yaw: r.yaw,
            pitch: r.pitch,
            roll: r.roll,
            fov: rig.fov_clamped(),
            aspect,
        }
    }

    fn tan_half_fov(&self) -> f64 {
        (deg_to_rad(self.fov) / 2.0).tan()
    }
}

/// Unit view ray through an NDC position (`ny` grows downward, like screen rows).
pub fn view_ray(nx: f64, ny: f64, view: &PanoView) -> [f64; 3] {
    let t = view.tan_half_fov();
    normalize([nx * t * view.aspect, -ny * t, 1.0])
}

fn normalize(v: [f64; 3]) -> [f64; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len == 0.0 {
        return [0.0, 0.0, 1.0];
    }
    [v[0] / len, v[1] / len, v[2] / len]
}

/// Rotate a ray by yaw about Y, then pitch about X, then roll about Z.
pub fn rotate_ray(v: [f64; 3], view: &PanoView) -> [f64; 3] {
    let [mut x, mut y, mut z] = v;

    let (sy, cy) = deg_to_rad(view.yaw).sin_cos();
    (x, z) = (cy * x + sy * z, -sy * x + cy * z);

    let (sp, cp) = deg_to_rad(view.pitch).sin_cos();
    (y, z) = (cp * y - sp * z, sp * y + cp * z);

    let (sr, cr) = deg_to_rad(view.roll).sin_cos();
    (x, y) = (cr * x - sr * y, sr * x + cr * y);

    [x, y, z]
}

/// Longitude in radians of a ray, `atan2(x, z)`.
pub fn longitude(ray: [f64; 3]) -> f64 {
    ray[0].atan2(ray[2])
}

/// Equirectangular texture coordinate of a unit ray.
pub fn ray_to_uv(ray: [f64; 3]) -> (f64, f64) {
    let lon = longitude(ray);
    let lat = ray[1].clamp(-1.0, 1.0).asin();
    (lon / (2.0 * PI) + 0.5, 0.5 - lat / PI)
}

/// Inverse of [`ray_to_uv`].
pub fn uv_to_ray(u: f64, v: f64) -> [f64; 3] {
    let lon = (u - 0.5) * 2.0 * PI;
    let lat = (0.5 - v) * PI;
    [lat.cos() * lon.sin(), lat.sin(), lat.cos() * lon.cos()]
}

/// Full projection of an NDC position to source UV.
pub fn project_ndc(nx: f64, ny: f64, view: &PanoView) -> (f64, f64) {
    ray_to_uv(rotate_ray(view_ray(nx, ny, view), view))
}

/// Texel for a UV: `u` wraps around the width, `v` clamps to the height.
pub fn uv_to_texel(u: f64, v: f64, src_w: u32, src_h: u32) -> (u32, u32) {
    let w = i64::from(src_w.max(1));
    let h = i64::from(src_h.max(1));
    let ui = ((u * w as f64).floor() as i64).rem_euclid(w);
    let vi = ((v * h as f64).floor() as i64).clamp(0, h - 1);
    (ui as u32, vi as u32)
}

/// Remap raster size for a canvas, capped at `max_side` on the longer edge.
pub fn preview_size(canvas_w: u32, canvas_h: u32, max_side: u32) -> (u32, u32) {
    let longest = f64::from(canvas_w.max(canvas_h));
    let scale_down = (longest / f64::from(max_side.max(1))).max(1.0);
    if scale_down <= 1.01 {
        return (canvas_w.max(1), canvas_h.max(1));
    }
    let shrink = |c: u32| ((f64::from(c) / scale_down).round() as u32).max(1);
    (shrink(canvas_w), shrink(canvas_h))
}

/// Everything a remap table depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RemapKey {
    pub out_w: u32,
    pub out_h: u32,
    pub src_w: u32,
    pub src_h: u32,
    yaw: u64,
    pitch: u64,
    roll: u64,
    fov: u64,
    aspect: u64,
}

impl RemapKey {
    pub fn new(out_w: u32, out_h: u32, src_w: u32, src_h: u32, view: &PanoView) -> Self {
        Self {
            out_w,
            out_h,
            src_w,
            src_h,
            yaw: view.yaw.to_bits(),
            pitch: view.pitch.to_bits(),
            roll: view.roll.to_bits(),
            fov: view.fov.to_bits(),
            aspect: view.aspect.to_bits(),
        }
    }

    fn view(&self) -> PanoView {
        PanoView {
            yaw: f64::from_bits(self.yaw),
            pitch: f64::from_bits(self.pitch),
            roll: f64::from_bits(self.roll),
            fov: f64::from_bits(self.fov),
            aspect: f64::from_bits(self.aspect),
        }
    }
}

/// Per-output-pixel source texel index.
#[derive(Debug)]
pub struct RemapTable {
    key: RemapKey,
    indices: Vec<u32>,
}

impl RemapTable {
    pub fn build(key: RemapKey) -> PanoResult<Self> {
        if key.out_w == 0 || key.out_h == 0 || key.src_w == 0 || key.src_h == 0 {
            return Err(PanoError::validation("panorama remap needs non-zero sizes"));
        }
        let len = (key.out_w as usize)
            .checked_mul(key.out_h as usize)
            .ok_or_else(|| PanoError::evaluation("panorama remap size overflow"))?;
        (key.src_w as usize)
            .checked_mul(key.src_h as usize)
            .filter(|&n| u32::try_from(n).is_ok())
            .ok_or_else(|| PanoError::evaluation("panorama source too large for remap"))?;

        let view = key.view();
        let mut indices = Vec::with_capacity(len);
        let (ow, oh) = (f64::from(key.out_w), f64::from(key.out_h));
        for y in 0..key.out_h {
            let ny = (f64::from(y) + 0.5) / oh * 2.0 - 1.0;
            for x in 0..key.out_w {
                let nx = (f64::from(x) + 0.5) / ow * 2.0 - 1.0;
                let (u, v) = project_ndc(nx, ny, &view);
                let (ui, vi) = uv_to_texel(u, v, key.src_w, key.src_h);
                indices.push(vi * key.src_w + ui);
            }
        }
        Ok(Self { key, indices })
    }

    pub fn key(&self) -> &RemapKey {
        &self.key
    }

    /// Gather premultiplied RGBA8 texels from `src` into an `out_w`x`out_h` raster.
    pub fn apply(&self, src: &[u8]) -> PanoResult<Vec<u8>> {
        let expected = self.key.src_w as usize * self.key.src_h as usize * 4;
        if src.len() != expected {
            return Err(PanoError::evaluation(
                "panorama source does not match remap table size",
            ));
        }
        let mut out = Vec::with_capacity(self.indices.len() * 4);
        for &i in &self.indices {
            let o = i as usize * 4;
            out.extend_from_slice(&src[o..o + 4]);
        }
        Ok(out)
    }
}

/// Single-entry cache: any key change rebuilds the table.
#[derive(Debug, Default)]
pub struct RemapCache {
    table: Option<Arc<RemapTable>>,
    builds: u64,
}

impl RemapCache {
    pub fn get_or_build(&mut self, key: RemapKey) -> PanoResult<Arc<RemapTable>> {
        if let Some(t) = &self.table
            && t.key == key
        {
            return Ok(t.clone());
        }
        let table = Arc::new(RemapTable::build(key)?);
        self.builds += 1;
        tracing::debug!(
            out_w = key.out_w,
            out_h = key.out_h,
            src_w = key.src_w,
            src_h = key.src_h,
            "rebuilt panorama remap table"
        );
        self.table = Some(table.clone());
        Ok(table)
    }

    /// Number of table builds so far.
    pub fn builds(&self) -> u64 {
        self.builds
    }

    pub fn clear(&mut self) {
        self.table = None;
    }
}

/// WGSL twin of [`view_ray`], [`rotate_ray`] and [`ray_to_uv`]. Angles are radians.
pub const PANORAMA_RAY_WGSL: &str = r#"
const PANO_PI: f32 = 3.141592653589793;

fn pano_view_ray(ndc: vec2<f32>, tan_half: f32, aspect: f32) -> vec3<f32> {
  return normalize(vec3<f32>(ndc.x * tan_half * aspect, -ndc.y * tan_half, 1.0));
}

fn pano_rotate_ray(v: vec3<f32>, yaw: f32, pitch: f32, roll: f32) -> vec3<f32> {
  var r = v;
  let cy = cos(yaw);
  let sy = sin(yaw);
  r = vec3<f32>(cy * r.x + sy * r.z, r.y, -sy * r.x + cy * r.z);
  let cp = cos(pitch);
  let sp = sin(pitch);
  r = vec3<f32>(r.x, cp * r.y - sp * r.z, sp * r.y + cp * r.z);
  let cr = cos(roll);
  let sr = sin(roll);
  r = vec3<f32>(cr * r.x - sr * r.y, sr * r.x + cr * r.y, r.z);
  return r;
}

fn pano_ray_to_uv(r: vec3<f32>) -> vec2<f32> {
  let lon = atan2(r.x, r.z);
  let lat = asin(clamp(r.y, -1.0, 1.0));
  return vec2<f32>(lon / (2.0 * PANO_PI) + 0.5, 0.5 - lat / PANO_PI);
}
"#;
