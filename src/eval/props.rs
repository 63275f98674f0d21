use std::collections::{HashMap, VecDeque};

use crate::{
    animation::{bezier, keyframes::interpolate},
    scene::model::{Layer, LayerAttr},
};

/// Fully resolved transform attributes of one layer at one instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerProps {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub scale: f64,
    pub rotation: f64,
    pub rotation_x: f64,
    pub rotation_y: f64,
    pub rotation_z: f64,
    pub opacity: f64,
    pub anchor_x: f64,
    pub anchor_y: f64,
    pub perspective: f64,
    pub mask_size: f64,
}

impl Default for LayerProps {
    fn default() -> Self {
        let mut p = Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            scale: 0.0,
            rotation: 0.0,
            rotation_x: 0.0,
            rotation_y: 0.0,
            rotation_z: 0.0,
            opacity: 0.0,
            anchor_x: 0.0,
            anchor_y: 0.0,
            perspective: 0.0,
            mask_size: 0.0,
        };
        for attr in LayerAttr::ALL {
            p.set(attr, attr.default_value());
        }
        p
    }
}

impl LayerProps {
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

    fn set(&mut self, attr: LayerAttr, v: f64) {
        match attr {
            LayerAttr::X => self.x = v,
            LayerAttr::Y => self.y = v,
            LayerAttr::Z => self.z = v,
            LayerAttr::Scale => self.scale = v,
            LayerAttr::Rotation => self.rotation = v,
            LayerAttr::RotationX => self.rotation_x = v,
            LayerAttr::RotationY => self.rotation_y = v,
            LayerAttr::RotationZ => self.rotation_z = v,
            LayerAttr::Opacity => self.opacity = v,
            LayerAttr::AnchorX => self.anchor_x = v,
            LayerAttr::AnchorY => self.anchor_y = v,
            LayerAttr::Perspective => self.perspective = v,
            LayerAttr::MaskSize => self.mask_size = v,
        }
    }

    /// In-plane rotation in degrees: `rotationZ` when set, `rotation` otherwise.
    pub fn effective_rotation(&self) -> f64 {
        if self.rotation_z != 0.0 {
            self.rotation_z
        } else {
            self.rotation
        }
    }
}

/// Resolve a layer's props without caching.
pub fn resolve_layer_props(layer: &Layer, time: f64, duration: f64) -> LayerProps {
    let mut props = LayerProps::default();
    for attr in LayerAttr::ALL {
        let fallback = layer.attr(attr);
        let v = match layer.track(attr) {
            Some(track) => interpolate(track.keys(), time, fallback),
            None => fallback,
        };
        props.set(attr, v);
    }
    if layer.path_animation_active()
        && let Some(p) = bezier::evaluate(layer.bezier_path(), time, duration)
    {
        props.x = p.x;
        props.y = p.y;
    }
    props
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PropsKey {
    layer: String,
    time_bits: u64,
}

#[derive(Clone, Copy, Debug)]
struct CachedProps {
    version: u64,
    props: LayerProps,
}

/// Resolver hit/miss counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PropsCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Per-(layer, time) resolver with a bounded FIFO cache.
///
/// Only layers without tracks or path animation are cached, and an entry is valid only while
/// the layer's version matches the one it was computed from.
#[derive(Debug)]
pub struct PropsResolver {
    capacity: usize,
    entries: HashMap<PropsKey, CachedProps>,
    order: VecDeque<PropsKey>,
    hits: u64,
    misses: u64,
}

impl Default for PropsResolver {
    fn default() -> Self {
        Self::new(100)
    }
}

impl PropsResolver {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn resolve(&mut self, layer: &Layer, time: f64, duration: f64) -> LayerProps {
        let cacheable = !layer.has_keyframes() && !layer.path_animation_active();
        if !cacheable {
            self.misses += 1;
            return resolve_layer_props(layer, time, duration);
        }

        let key = PropsKey {
            layer: layer.id().to_owned(),
            time_bits: (time + 0.0).to_bits(),
        };
        if let Some(hit) = self.entries.get(&key)
            && hit.version == layer.version()
        {
            self.hits += 1;
            return hit.props;
        }

        self.misses += 1;
        let props = resolve_layer_props(layer, time, duration);
        let fresh = CachedProps {
            version: layer.version(),
            props,
        };
        if self.entries.insert(key.clone(), fresh).is_none() {
            self.order.push_back(key);
            while self.order.len() > self.capacity {
                if let Some(old) = self.order.pop_front() {
                    self.entries.remove(&old);
                }
            }
        }
        props
    }

    /// Drop every cached entry belonging to `layer_id`.
    pub fn forget_layer(&mut self, layer_id: &str) {
        self.entries.retain(|k, _| k.layer != layer_id);
        self.order.retain(|k| k.layer != layer_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn stats(&self) -> PropsCacheStats {
        PropsCacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::bezier::BezierPoint;

    #[test]
    fn keyframed_x_resolves_at_midpoint() {
        let mut l = Layer::foreground("fg");
        l.add_keyframe(LayerAttr::X, 0.0, 0.0);
        l.add_keyframe(LayerAttr::X, 1.0, 100.0);
        let p = resolve_layer_props(&l, 0.5, 5.0);
        assert_eq!(p.x, 50.0);
        assert_eq!(p.scale, 1.0);
        assert_eq!(p.opacity, 1.0);
        assert_eq!(p.perspective, 1000.0);
    }

    #[test]
    fn path_animation_overrides_position() {
        let mut l = Layer::foreground("fg").with_attr(LayerAttr::X, 999.0);
        l.add_keyframe(LayerAttr::Y, 0.0, 500.0);
        l.set_bezier_path(vec![BezierPoint::new(0.0, 0.0), BezierPoint::new(100.0, 40.0)]);
        l.set_use_path_animation(true);
        let p = resolve_layer_props(&l, 2.5, 5.0);
        assert!((p.x - 50.0).abs() < 1e-9);
        assert!((p.y - 20.0).abs() < 1e-9);
    }

    #[test]
    fn static_layers_hit_the_cache() {
        let mut r = PropsResolver::default();
        let l = Layer::foreground("fg").with_attr(LayerAttr::X, 7.0);
        let a = r.resolve(&l, 1.0, 5.0);
        let b = r.resolve(&l, 1.0, 5.0);
        assert_eq!(a, b);
        assert_eq!(r.stats().hits, 1);
        assert_eq!(r.stats().misses, 1);
    }

    #[test]
    fn static_edit_invalidates_cached_props() {
        let mut r = PropsResolver::default();
        let mut l = Layer::foreground("fg");
        assert_eq!(r.resolve(&l, 0.0, 5.0).x, 0.0);
        l.set_attr(LayerAttr::X, 42.0);
        assert_eq!(r.resolve(&l, 0.0, 5.0).x, 42.0);
        assert_eq!(r.stats().hits, 0);
    }

    #[test]
    fn replacement_layer_with_same_id_resolves_fresh() {
        let mut r = PropsResolver::default();
        let mut old = Layer::foreground("fg");
        old.set_attr(LayerAttr::X, 5.0);
        assert_eq!(r.resolve(&old, 0.0, 5.0).x, 5.0);

        let mut new = Layer::foreground("fg");
        new.set_attr(LayerAttr::X, 99.0);
        assert_eq!(r.resolve(&new, 0.0, 5.0).x, 99.0);
        assert_eq!(r.stats().hits, 0);
    }

    #[test]
    fn reloaded_document_resolves_fresh() {
        use crate::scene::store::SceneDocument;

        let load = |x: f64| {
            let json = format!(r#"{{ "layers": [{{ "id": "fg", "type": "foreground", "x": {x} }}] }}"#);
            SceneDocument::from_json_str(&json).unwrap()
        };
        let mut r = PropsResolver::default();
        assert_eq!(r.resolve(&load(0.0).layers[0], 0.0, 5.0).x, 0.0);
        assert_eq!(r.resolve(&load(300.0).layers[0], 0.0, 5.0).x, 300.0);
    }

    #[test]
    fn animated_layers_bypass_the_cache() {
        let mut r = PropsResolver::default();
        let mut l = Layer::foreground("fg");
        l.add_keyframe(LayerAttr::Opacity, 0.0, 0.0);
        l.add_keyframe(LayerAttr::Opacity, 2.0, 1.0);
        r.resolve(&l, 1.0, 5.0);
        r.resolve(&l, 1.0, 5.0);
        assert_eq!(r.stats().hits, 0);
        assert_eq!(r.stats().entries, 0);
    }

    #[test]
    fn cache_is_bounded_fifo() {
        let mut r = PropsResolver::new(3);
        let l = Layer::foreground("fg");
        for i in 0..5 {
            r.resolve(&l, f64::from(i), 5.0);
        }
        assert_eq!(r.stats().entries, 3);
        r.resolve(&l, 0.0, 5.0);
        assert_eq!(r.stats().hits, 0);
        r.resolve(&l, 4.0, 5.0);
        assert_eq!(r.stats().hits, 1);
    }

    #[test]
    fn effective_rotation_prefers_z() {
        let mut p = LayerProps {
            rotation: 10.0,
            ..LayerProps::default()
        };
        assert_eq!(p.effective_rotation(), 10.0);
        p.rotation_z = -30.0;
        assert_eq!(p.effective_rotation(), -30.0);
    }
}
