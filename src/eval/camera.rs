use crate::{
    animation::keyframes::interpolate,
    foundation::{core::Vec2, math::deg_to_rad},
    scene::camera::{CameraAttr, CameraSettings, CameraState},
};

pub const MIN_FOV_DEG: f64 = 10.0;
pub const MAX_FOV_DEG: f64 = 170.0;
pub const MIN_CAMERA_SCALE: f64 = 0.2;
pub const MAX_CAMERA_SCALE: f64 = 4.0;

/// Resolve every camera attribute at `time`, falling back to the static field.
pub fn resolve_camera(settings: &CameraSettings, time: f64) -> CameraState {
    let mut state = settings.base;
    for attr in CameraAttr::ALL {
        if let Some(track) = settings.tracks.get(&attr) {
            let v = interpolate(track.keys(), time, attr.get(&settings.base));
            attr.set(&mut state, v);
        }
    }
    state
}

/// `1 / max(0.1, 1 + z * 0.001)`: distance-based size factor of a layer.
pub fn depth_mul(layer_z: f64) -> f64 {
    1.0 / (1.0 + layer_z * 0.001).max(0.1)
}

/// Camera state for one frame with the factors both backends derive from it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraRig {
    pub state: CameraState,
    pub screen_width: f64,
}

impl CameraRig {
    pub fn new(state: CameraState, screen_width: f64) -> Self {
        Self {
            state,
            screen_width,
        }
    }

    pub fn resolve(settings: &CameraSettings, time: f64, screen_width: f64) -> Self {
        Self::new(resolve_camera(settings, time), screen_width)
    }

    pub fn enabled(&self) -> bool {
        self.state.enabled
    }

    pub fn panorama(&self) -> bool {
        self.state.panorama
    }

    /// Zoom from camera distance, or 1 when the camera is disabled.
    pub fn camera_scale(&self) -> f64 {
        if !self.state.enabled {
            return 1.0;
        }
        let s = 1.0 / (1.0 + self.state.position.z * 0.001);
        if s.is_nan() {
            return MAX_CAMERA_SCALE;
        }
        s.clamp(MIN_CAMERA_SCALE, MAX_CAMERA_SCALE)
    }

    pub fn fov_clamped(&self) -> f64 {
        if self.state.fov.is_nan() {
            return 90.0;
        }
        self.state.fov.clamp(MIN_FOV_DEG, MAX_FOV_DEG)
    }

    /// Screen-space camera offset: offset plus position when enabled, none otherwise.
    pub fn offset(&self) -> Vec2 {
        if !self.state.enabled {
            return Vec2::ZERO;
        }
        Vec2::new(
            self.state.offset.x + self.state.position.x,
            self.state.offset.y + self.state.position.y,
        )
    }

    /// Parallax weight on the camera offset for a layer at depth factor `depth_mul`.
    pub fn parallax(&self, depth_mul: f64) -> f64 {
        if self.state.enabled { depth_mul } else { 1.0 }
    }

    /// Shift subtracted from foreground positions so they track the orbiting background.
    pub fn follow_shift(&self) -> Vec2 {
        let r = self.state.rotation;
        let active = self.state.enabled || self.state.panorama;
        if !active || (r.yaw == 0.0 && r.pitch == 0.0) {
            return Vec2::ZERO;
        }
        let move_scale = self.screen_width / (2.0 * (deg_to_rad(self.fov_clamped()) / 2.0).tan());
        Vec2::new(
            deg_to_rad(r.yaw).tan() * move_scale,
            deg_to_rad(r.pitch).tan() * move_scale,
        )
    }

    /// Shift of a flat (non-panorama) background while the camera orbits.
    pub fn background_orbit_shift(&self, layer_z: f64) -> Vec2 {
        let r = self.state.rotation;
        if !self.state.enabled || (r.yaw == 0.0 && r.pitch == 0.0) {
            return Vec2::ZERO;
        }
        let depth = (layer_z + 1000.0) * 0.3;
        Vec2::new(
            deg_to_rad(r.yaw).tan() * depth,
            deg_to_rad(r.pitch).tan() * depth,
        )
    }

    /// Row-major 3x3 yaw/pitch/roll rotation used by the advanced-transform vertex path.
    pub fn rotation_matrix(&self) -> [[f32; 3]; 3] {
        let r = self.state.rotation;
        let (sy, cy) = deg_to_rad(r.yaw).sin_cos();
        let (sp, cp) = deg_to_rad(r.pitch).sin_cos();
        let (sr, cr) = deg_to_rad(r.roll).sin_cos();
        [
            [
                (cr * cy + sr * sp * sy) as f32,
                (sr * cp) as f32,
                (-cr * sy + sr * sp * cy) as f32,
            ],
            [
                (-sr * cy + cr * sp * sy) as f32,
                (cr * cp) as f32,
                (sr * sy + cr * sp * cy) as f32,
            ],
            [(cp * sy) as f32, (-sp) as f32, (cp * cy) as f32],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::camera::CameraRotation;

    fn rig(state: CameraState) -> CameraRig {
        CameraRig::new(state, 1280.0)
    }

    #[test]
    fn camera_scale_is_bounded() {
        for z in [-5000.0, -999.0, -800.0, -1.0, 0.0, 1.0, 250.0, 1e6, f64::MAX] {
            let s = rig(CameraState {
                enabled: true,
                position: crate::scene::camera::Vec3 { x: 0.0, y: 0.0, z },
                ..CameraState::default()
            })
            .camera_scale();
            assert!((MIN_CAMERA_SCALE..=MAX_CAMERA_SCALE).contains(&s), "z={z} s={s}");
        }
    }

    #[test]
    fn disabled_camera_has_unit_scale_and_no_offset() {
        let r = rig(CameraState {
            enabled: false,
            position: crate::scene::camera::Vec3 {
                x: 10.0,
                y: 10.0,
                z: 500.0,
            },
            ..CameraState::default()
        });
        assert_eq!(r.camera_scale(), 1.0);
        assert_eq!(r.offset(), Vec2::ZERO);
        assert_eq!(r.parallax(0.5), 1.0);
    }

    #[test]
    fn depth_mul_bounds() {
        for z in [0.0, 1.0, 10.0, 500.0, 1e9] {
            let d = depth_mul(z);
            assert!(d > 0.0 && d <= 1.0, "z={z} d={d}");
        }
        for z in [-500.0, -899.0, -900.0, -999.0, -1e9] {
            assert!(depth_mul(z) <= 10.0);
        }
        assert_eq!(depth_mul(-1e9), 10.0);
    }

    #[test]
    fn keyframed_camera_resolves_per_attr() {
        let mut settings = CameraSettings::default();
        settings.base.rotation.pitch = 12.0;
        settings.add_keyframe(CameraAttr::CamYaw, 0.0, 0.0);
        settings.add_keyframe(CameraAttr::CamYaw, 2.0, 90.0);
        let s = resolve_camera(&settings, 1.0);
        assert_eq!(s.rotation.yaw, 45.0);
        assert_eq!(s.rotation.pitch, 12.0);
        assert_eq!(s.fov, 90.0);
    }

    #[test]
    fn follow_shift_uses_screen_width_and_fov() {
        let r = rig(CameraState {
            panorama: true,
            rotation: CameraRotation {
                yaw: 45.0,
                pitch: 0.0,
                roll: 0.0,
            },
            fov: 90.0,
            ..CameraState::default()
        });
        let s = r.follow_shift();
        assert!((s.x - 640.0).abs() < 1e-9);
        assert!(s.y.abs() < 1e-12);

        let idle = rig(CameraState {
            rotation: CameraRotation {
                yaw: 45.0,
                pitch: 0.0,
                roll: 0.0,
            },
            ..CameraState::default()
        });
        assert_eq!(idle.follow_shift(), Vec2::ZERO);
    }

    #[test]
    fn fov_is_clamped() {
        let wide = rig(CameraState {
            fov: 400.0,
            ..CameraState::default()
        });
        assert_eq!(wide.fov_clamped(), MAX_FOV_DEG);
        let narrow = rig(CameraState {
            fov: 1.0,
            ..CameraState::default()
        });
        assert_eq!(narrow.fov_clamped(), MIN_FOV_DEG);
    }

    #[test]
    fn zero_rotation_matrix_is_identity() {
        let m = rig(CameraState::default()).rotation_matrix();
        assert_eq!(m, [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
    }
}
