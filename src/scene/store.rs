use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    animation::keyframes::interpolate,
    foundation::error::{PanoError, PanoResult},
    scene::{
        camera::CameraSettings,
        model::{Layer, LayerAttr},
        project::Project,
    },
};

/// Serializable scene contents: project settings, camera and layer stack.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneDocument {
    pub project: Project,
    pub camera: CameraSettings,
    pub layers: Vec<Layer>,
}

impl SceneDocument {
    pub fn from_json_str(s: &str) -> PanoResult<Self> {
        let mut doc: Self = serde_json::from_str(s)?;
        doc.normalize();
        doc.validate()?;
        Ok(doc)
    }

    pub fn from_json_path(path: &Path) -> PanoResult<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read scene json '{}'", path.display()))?;
        Self::from_json_str(&s)
    }

    pub fn validate(&self) -> PanoResult<()> {
        self.project.validate()?;
        let mut seen = std::collections::HashSet::new();
        for l in &self.layers {
            if l.id().is_empty() {
                return Err(PanoError::validation("layer id must be non-empty"));
            }
            if !seen.insert(l.id()) {
                return Err(PanoError::validation(format!(
                    "duplicate layer id '{}'",
                    l.id()
                )));
            }
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.camera.normalize();
        for l in &mut self.layers {
            l.normalize();
        }
    }
}

/// Editor tool overlays shown on the interaction surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EditorModes {
    pub path: bool,
    pub mask: bool,
    pub extract: bool,
}

/// Change notification delivered to scene observers.
#[derive(Clone, Debug, PartialEq)]
pub enum SceneEvent {
    LayerAdded { id: String },
    LayerRemoved { id: String },
    LayerChanged { id: String, version: u64 },
    SelectionChanged { id: Option<String> },
    TimeChanged { time: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Box<dyn FnMut(&SceneEvent)>;

/// Mutable scene with change notification.
///
/// External animation tooling binds through [`Scene::subscribe`] and
/// [`Scene::read_property`]; the scene never depends on such tooling.
pub struct Scene {
    doc: SceneDocument,
    current_time: f64,
    selected: Option<usize>,
    modes: EditorModes,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("doc", &self.doc)
            .field("current_time", &self.current_time)
            .field("selected", &self.selected)
            .field("modes", &self.modes)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Scene {
    pub fn new(doc: SceneDocument) -> Self {
        Self {
            doc,
            current_time: 0.0,
            selected: None,
            modes: EditorModes::default(),
            observers: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn document(&self) -> &SceneDocument {
        &self.doc
    }

    pub fn project(&self) -> &Project {
        &self.doc.project
    }

    pub fn camera(&self) -> &CameraSettings {
        &self.doc.camera
    }

    pub fn camera_mut(&mut self) -> &mut CameraSettings {
        &mut self.doc.camera
    }

    pub fn layers(&self) -> &[Layer] {
        &self.doc.layers
    }

    pub fn layer(&self, id: &str) -> Option<&Layer> {
        self.doc.layers.iter().find(|l| l.id() == id)
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn modes(&self) -> EditorModes {
        self.modes
    }

    pub fn set_modes(&mut self, modes: EditorModes) {
        self.modes = modes;
    }

    pub fn selected_layer(&self) -> Option<&Layer> {
        self.selected.and_then(|i| self.doc.layers.get(i))
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&SceneEvent) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sid, _)| *sid != id);
        self.observers.len() != before
    }

    fn emit(&mut self, event: SceneEvent) {
        for (_, observer) in &mut self.observers {
            observer(&event);
        }
    }

    /// Resolved value of one attribute, ignoring path animation.
    pub fn read_property(&self, layer_id: &str, attr: LayerAttr, time: f64) -> Option<f64> {
        let layer = self.layer(layer_id)?;
        let fallback = layer.attr(attr);
        Some(match layer.track(attr) {
            Some(track) => interpolate(track.keys(), time, fallback),
            None => fallback,
        })
    }

    pub fn add_layer(&mut self, layer: Layer) -> PanoResult<()> {
        if self.layer(layer.id()).is_some() {
            return Err(PanoError::validation(format!(
                "duplicate layer id '{}'",
                layer.id()
            )));
        }
        let id = layer.id().to_owned();
        self.doc.layers.push(layer);
        self.emit(SceneEvent::LayerAdded { id });
        Ok(())
    }

    /// Remove a layer, returning it so callers can release its GPU texture.
    pub fn remove_layer(&mut self, id: &str) -> Option<Layer> {
        let idx = self.doc.layers.iter().position(|l| l.id() == id)?;
        let removed = self.doc.layers.remove(idx);
        self.selected = match self.selected {
            Some(s) if s == idx => None,
            Some(s) if s > idx => Some(s - 1),
            other => other,
        };
        self.emit(SceneEvent::LayerRemoved { id: id.to_owned() });
        Some(removed)
    }

    pub fn select_layer(&mut self, id: Option<&str>) -> bool {
        let idx = match id {
            Some(id) => match self.doc.layers.iter().position(|l| l.id() == id) {
                Some(i) => Some(i),
                None => return false,
            },
            None => None,
        };
        self.selected = idx;
        self.emit(SceneEvent::SelectionChanged {
            id: id.map(str::to_owned),
        });
        true
    }

    /// Apply `f` to a layer and notify observers.
    pub fn update_layer(&mut self, id: &str, f: impl FnOnce(&mut Layer)) -> bool {
        let Some(layer) = self.doc.layers.iter_mut().find(|l| l.id() == id) else {
            return false;
        };
        f(layer);
        let event = SceneEvent::LayerChanged {
            id: id.to_owned(),
            version: layer.version(),
        };
        self.emit(event);
        true
    }

    pub fn set_layer_attr(&mut self, id: &str, attr: LayerAttr, value: f64) -> bool {
        self.update_layer(id, |l| l.set_attr(attr, value))
    }

    pub fn drag_layer(&mut self, id: &str, dx: f64, dy: f64) -> bool {
        self.update_layer(id, |l| l.drag_by(dx, dy))
    }

    pub fn add_keyframe(&mut self, id: &str, attr: LayerAttr, time: f64, value: f64) -> bool {
        let time = self.doc.project.clamp_time(time);
        self.update_layer(id, |l| l.add_keyframe(attr, time, value))
    }

    pub fn delete_keyframe(&mut self, id: &str, attr: LayerAttr, time: f64) -> bool {
        let mut removed = false;
        self.update_layer(id, |l| removed = l.remove_keyframe(attr, time));
        removed
    }

    /// Snapshot every attribute's current resolved value as a keyframe at `time`.
    pub fn add_keyframes_at(&mut self, id: &str, time: f64) -> bool {
        let time = self.doc.project.clamp_time(time);
        let Some(values) = self.layer(id).map(|_| {
            LayerAttr::ALL.map(|a| (a, self.read_property(id, a, time).unwrap_or_default()))
        }) else {
            return false;
        };
        self.update_layer(id, |l| {
            for (attr, value) in values {
                l.add_keyframe(attr, time, value);
            }
        })
    }

    pub fn clear_all_keyframes(&mut self, id: &str) -> bool {
        self.update_layer(id, Layer::clear_keyframes)
    }

    pub fn set_current_time(&mut self, t: f64) -> f64 {
        self.current_time = self.doc.project.clamp_time(t);
        let time = self.current_time;
        self.emit(SceneEvent::TimeChanged { time });
        time
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::scene::model::LayerRole;

    fn scene_with(ids: &[&str]) -> Scene {
        let mut s = Scene::new(SceneDocument::default());
        for id in ids {
            s.add_layer(Layer::foreground(*id)).unwrap();
        }
        s
    }

    #[test]
    fn duplicate_layer_ids_are_rejected() {
        let mut s = scene_with(&["a"]);
        assert!(s.add_layer(Layer::foreground("a")).is_err());
    }

    #[test]
    fn observers_see_changes_until_unsubscribed() {
        let mut s = scene_with(&["a"]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let sub = s.subscribe(move |e| sink.borrow_mut().push(e.clone()));

        s.set_layer_attr("a", LayerAttr::X, 4.0);
        s.set_current_time(99.0);
        assert!(s.unsubscribe(sub));
        s.drag_layer("a", 1.0, 1.0);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert!(matches!(&seen[0], SceneEvent::LayerChanged { id, .. } if id == "a"));
        assert_eq!(seen[1], SceneEvent::TimeChanged { time: 5.0 });
    }

    #[test]
    fn add_keyframes_at_snapshots_every_attr() {
        let mut s = scene_with(&["a"]);
        s.set_layer_attr("a", LayerAttr::Scale, 2.0);
        assert!(s.add_keyframes_at("a", 1.0));
        let l = s.layer("a").unwrap();
        for attr in LayerAttr::ALL {
            assert_eq!(l.track(attr).unwrap().len(), 1);
        }
        assert_eq!(l.track(LayerAttr::Scale).unwrap().keys()[0].value, 2.0);
    }

    #[test]
    fn keyframe_at_same_time_is_replaced() {
        let mut s = scene_with(&["a"]);
        s.add_keyframe("a", LayerAttr::X, 1.0, 10.0);
        s.add_keyframe("a", LayerAttr::X, 1.0, 20.0);
        assert_eq!(s.read_property("a", LayerAttr::X, 1.0), Some(20.0));
        assert!(s.delete_keyframe("a", LayerAttr::X, 1.0));
        assert_eq!(s.read_property("a", LayerAttr::X, 1.0), Some(0.0));
    }

    #[test]
    fn removing_layer_fixes_selection() {
        let mut s = scene_with(&["a", "b", "c"]);
        assert!(s.select_layer(Some("c")));
        let removed = s.remove_layer("a").unwrap();
        assert_eq!(removed.role(), LayerRole::Foreground);
        assert_eq!(s.selected_layer().unwrap().id(), "c");
        s.remove_layer("c");
        assert!(s.selected_layer().is_none());
        assert!(!s.select_layer(Some("zzz")));
    }

    #[test]
    fn document_json_validates_ids() {
        let json = r#"{"layers":[{"id":"a","type":"foreground"},{"id":"a","type":"background"}]}"#;
        assert!(SceneDocument::from_json_str(json).is_err());
    }
}
