use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::animation::keyframes::Track;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraOffset {
    pub x: f64,
    pub y: f64,
}

/// Camera orientation in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraRotation {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

/// Concrete camera for one instant.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraState {
    pub enabled: bool,
    pub position: Vec3,
    pub offset: CameraOffset,
    pub rotation: CameraRotation,
    /// Vertical field of view in degrees.
    pub fov: f64,
    pub panorama: bool,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            enabled: false,
            position: Vec3::default(),
            offset: CameraOffset::default(),
            rotation: CameraRotation::default(),
            fov: 90.0,
            panorama: false,
        }
    }
}

/// Keyframeable camera attribute (project-level track names).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraAttr {
    CamPosX,
    CamPosY,
    CamPosZ,
    CamOffsetX,
    CamOffsetY,
    CamYaw,
    CamPitch,
    CamRoll,
    CamFov,
}

impl CameraAttr {
    pub const ALL: [CameraAttr; 9] = [
        CameraAttr::CamPosX,
        CameraAttr::CamPosY,
        CameraAttr::CamPosZ,
        CameraAttr::CamOffsetX,
        CameraAttr::CamOffsetY,
        CameraAttr::CamYaw,
        CameraAttr::CamPitch,
        CameraAttr::CamRoll,
        CameraAttr::CamFov,
    ];

    fn slot(self, state: &mut CameraState) -> &mut f64 {
        match self {
            CameraAttr::CamPosX => &mut state.position.x,
            CameraAttr::CamPosY => &mut state.position.y,
            CameraAttr::CamPosZ => &mut state.position.z,
            CameraAttr::CamOffsetX => &mut state.offset.x,
            CameraAttr::CamOffsetY => &mut state.offset.y,
            CameraAttr::CamYaw => &mut state.rotation.yaw,
            CameraAttr::CamPitch => &mut state.rotation.pitch,
            CameraAttr::CamRoll => &mut state.rotation.roll,
            CameraAttr::CamFov => &mut state.fov,
        }
    }

    pub fn get(self, state: &CameraState) -> f64 {
        let mut copy = *state;
        *self.slot(&mut copy)
    }

    pub fn set(self, state: &mut CameraState, value: f64) {
        *self.slot(state) = value;
    }
}

/// Project camera: static fields plus optional keyframe tracks per attribute.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    #[serde(flatten)]
    pub base: CameraState,
    pub tracks: BTreeMap<CameraAttr, Track>,
}

impl CameraSettings {
    pub fn add_keyframe(&mut self, attr: CameraAttr, time: f64, value: f64) {
        self.tracks.entry(attr).or_default().insert(time, value);
    }

    pub fn remove_keyframe(&mut self, attr: CameraAttr, time: f64) -> bool {
        let removed = self
            .tracks
            .get_mut(&attr)
            .is_some_and(|t| t.remove_at(time));
        self.tracks.retain(|_, t| !t.is_empty());
        removed
    }

    pub(crate) fn normalize(&mut self) {
        for track in self.tracks.values_mut() {
            track.normalize();
        }
        self.tracks.retain(|_, t| !t.is_empty());
    }
}
