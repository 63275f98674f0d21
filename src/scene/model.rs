use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::animation::{bezier::BezierPoint, keyframes::Track};

/// Whether a layer is the scene backdrop or a composited cut-out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerRole {
    Background,
    Foreground,
}

/// How a background image is scaled onto the canvas.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundMode {
    #[default]
    Fit,
    Fill,
    Stretch,
}

/// Keyframeable numeric layer attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LayerAttr {
    #[serde(rename = "x")]
    X,
    #[serde(rename = "y")]
    Y,
    #[serde(rename = "z")]
    Z,
    #[serde(rename = "scale")]
    Scale,
    #[serde(rename = "rotation")]
    Rotation,
    #[serde(rename = "rotationX")]
    RotationX,
    #[serde(rename = "rotationY")]
    RotationY,
    #[serde(rename = "rotationZ")]
    RotationZ,
    #[serde(rename = "opacity")]
    Opacity,
    #[serde(rename = "anchorX")]
    AnchorX,
    #[serde(rename = "anchorY")]
    AnchorY,
    #[serde(rename = "perspective")]
    Perspective,
    #[serde(rename = "mask_size")]
    MaskSize,
}

impl LayerAttr {
    pub const ALL: [LayerAttr; 13] = [
        LayerAttr::X,
        LayerAttr::Y,
        LayerAttr::Z,
        LayerAttr::Scale,
        LayerAttr::Rotation,
        LayerAttr::RotationX,
        LayerAttr::RotationY,
        LayerAttr::RotationZ,
        LayerAttr::Opacity,
        LayerAttr::AnchorX,
        LayerAttr::AnchorY,
        LayerAttr::Perspective,
        LayerAttr::MaskSize,
    ];

    pub fn default_value(self) -> f64 {
        match self {
            LayerAttr::Scale | LayerAttr::Opacity => 1.0,
            LayerAttr::Perspective => 1000.0,
            _ => 0.0,
        }
    }
}

/// Static (un-animated) attribute values of a layer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerAttrs {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub scale: f64,
    pub rotation: f64,
    #[serde(rename = "rotationX")]
    pub rotation_x: f64,
    #[serde(rename = "rotationY")]
    pub rotation_y: f64,
    #[serde(rename = "rotationZ")]
    pub rotation_z: f64,
    pub opacity: f64,
    #[serde(rename = "anchorX")]
    pub anchor_x: f64,
    #[serde(rename = "anchorY")]
    pub anchor_y: f64,
    pub perspective: f64,
    pub mask_size: f64,
}

impl Default for LayerAttrs {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            scale: 1.0,
            rotation: 0.0,
            rotation_x: 0.0,
            rotation_y: 0.0,
            rotation_z: 0.0,
            opacity: 1.0,
            anchor_x: 0.0,
            anchor_y: 0.0,
            perspective: 1000.0,
            mask_size: 0.0,
        }
    }
}

impl LayerAttrs {
    pub fn get(&self, attr: LayerAttr) -> f64 {
        match attr {
            LayerAttr::X => self.x,
            LayerAttr::Y => self.y,
            LayerAttr::Z => self.z,
            LayerAttr::Scale => self.scale,
            LayerAttr::Rotation => self.rotation,
            LayerAttr::RotationX => self.rotation_x,
            LayerAttr::RotationY => self.rotation_y,
            LayerAttr::RotationZ => self.rotation_z,
            LayerAttr::Opacity => self.opacity,
            LayerAttr::AnchorX => self.anchor_x,
            LayerAttr::AnchorY => self.anchor_y,
            LayerAttr::Perspective => self.perspective,
            LayerAttr::MaskSize => self.mask_size,
        }
    }

    pub fn set(&mut self, attr: LayerAttr, value: f64) {
        let slot = match attr {
            LayerAttr::X => &mut self.x,
            LayerAttr::Y => &mut self.y,
            LayerAttr::Z => &mut self.z,
            LayerAttr::Scale => &mut self.scale,
            LayerAttr::Rotation => &mut self.rotation,
            LayerAttr::RotationX => &mut self.rotation_x,
            LayerAttr::RotationY => &mut self.rotation_y,
            LayerAttr::RotationZ => &mut self.rotation_z,
            LayerAttr::Opacity => &mut self.opacity,
            LayerAttr::AnchorX => &mut self.anchor_x,
            LayerAttr::AnchorY => &mut self.anchor_y,
            LayerAttr::Perspective => &mut self.perspective,
            LayerAttr::MaskSize => &mut self.mask_size,
        };
        *slot = value;
    }
}

static NEXT_LAYER_VERSION: AtomicU64 = AtomicU64::new(1);

fn next_version() -> u64 {
    NEXT_LAYER_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// One image layer of the composition.
///
/// Every mutator moves [`Layer::version`] to a fresh process-unique value, which downstream
/// caches use to detect edits. Two distinct layers never share a version, even with the same id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Layer {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    role: LayerRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(default, rename = "customMask", skip_serializing_if = "Option::is_none")]
    mask: Option<String>,
    #[serde(flatten)]
    attrs: LayerAttrs,
    #[serde(default)]
    keyframes: BTreeMap<LayerAttr, Track>,
    #[serde(default, rename = "bezierPath")]
    bezier_path: Vec<BezierPoint>,
    #[serde(default, rename = "usePathAnimation")]
    use_path_animation: bool,
    #[serde(default)]
    bg_mode: BackgroundMode,
    #[serde(skip, default = "next_version")]
    version: u64,
}

impl PartialEq for Layer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.role == other.role
            && self.image == other.image
            && self.mask == other.mask
            && self.attrs == other.attrs
            && self.keyframes == other.keyframes
            && self.bezier_path == other.bezier_path
            && self.use_path_animation == other.use_path_animation
            && self.bg_mode == other.bg_mode
    }
}

impl Layer {
    pub fn new(id: impl Into<String>, role: LayerRole) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            role,
            image: None,
            mask: None,
            attrs: LayerAttrs::default(),
            keyframes: BTreeMap::new(),
            bezier_path: Vec::new(),
            use_path_animation: false,
            bg_mode: BackgroundMode::Fit,
            version: next_version(),
        }
    }

    pub fn foreground(id: impl Into<String>) -> Self {
        Self::new(id, LayerRole::Foreground)
    }

    pub fn background(id: impl Into<String>) -> Self {
        Self::new(id, LayerRole::Background)
    }

    pub fn with_image(mut self, key: impl Into<String>) -> Self {
        self.set_image(Some(key.into()));
        self
    }

    pub fn with_mask(mut self, key: impl Into<String>) -> Self {
        self.set_mask(Some(key.into()));
        self
    }

    pub fn with_attr(mut self, attr: LayerAttr, value: f64) -> Self {
        self.set_attr(attr, value);
        self
    }

    pub fn with_bg_mode(mut self, mode: BackgroundMode) -> Self {
        self.set_bg_mode(mode);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> LayerRole {
        self.role
    }

    pub fn is_background(&self) -> bool {
        self.role == LayerRole::Background
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    pub fn mask(&self) -> Option<&str> {
        self.mask.as_deref()
    }

    pub fn attrs(&self) -> &LayerAttrs {
        &self.attrs
    }

    pub fn attr(&self, attr: LayerAttr) -> f64 {
        self.attrs.get(attr)
    }

    pub fn track(&self, attr: LayerAttr) -> Option<&Track> {
        self.keyframes.get(&attr)
    }

    pub fn tracks(&self) -> impl Iterator<Item = (LayerAttr, &Track)> {
        self.keyframes.iter().map(|(a, t)| (*a, t))
    }

    /// `true` when at least one attribute has a non-empty track.
    pub fn has_keyframes(&self) -> bool {
        self.keyframes.values().any(|t| !t.is_empty())
    }

    pub fn bezier_path(&self) -> &[BezierPoint] {
        &self.bezier_path
    }

    pub fn use_path_animation(&self) -> bool {
        self.use_path_animation
    }

    /// Path animation is active only with the flag set and at least two points.
    pub fn path_animation_active(&self) -> bool {
        self.use_path_animation && self.bezier_path.len() >= 2
    }

    pub fn bg_mode(&self) -> BackgroundMode {
        self.bg_mode
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn touch(&mut self) {
        self.version = next_version();
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    pub fn set_image(&mut self, key: Option<String>) {
        self.image = key;
        self.touch();
    }

    pub fn set_mask(&mut self, key: Option<String>) {
        self.mask = key;
        self.touch();
    }

    pub fn set_attr(&mut self, attr: LayerAttr, value: f64) {
        self.attrs.set(attr, value);
        self.touch();
    }

    pub fn set_bg_mode(&mut self, mode: BackgroundMode) {
        self.bg_mode = mode;
        self.touch();
    }

    /// Write one keyframe. A sample already at `time` is replaced.
    pub fn add_keyframe(&mut self, attr: LayerAttr, time: f64, value: f64) {
        self.keyframes.entry(attr).or_default().insert(time, value);
        self.touch();
    }

    pub fn remove_keyframe(&mut self, attr: LayerAttr, time: f64) -> bool {
        let removed = self
            .keyframes
            .get_mut(&attr)
            .is_some_and(|t| t.remove_at(time));
        if removed {
            self.keyframes.retain(|_, t| !t.is_empty());
            self.touch();
        }
        removed
    }

    pub fn clear_keyframes(&mut self) {
        self.keyframes.clear();
        self.touch();
    }

    pub fn set_bezier_path(&mut self, points: Vec<BezierPoint>) {
        self.bezier_path = points;
        self.touch();
    }

    pub fn set_use_path_animation(&mut self, on: bool) {
        self.use_path_animation = on;
        self.touch();
    }

    /// Move the static position by a screen-space delta.
    pub fn drag_by(&mut self, dx: f64, dy: f64) {
        self.attrs.x += dx;
        self.attrs.y += dy;
        self.touch();
    }

    pub(crate) fn normalize(&mut self) {
        for track in self.keyframes.values_mut() {
            track.normalize();
        }
        self.keyframes.retain(|_, t| !t.is_empty());
        self.touch();
    }
}
