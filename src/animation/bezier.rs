use serde::{Deserialize, Serialize};

use crate::foundation::core::{BezPath, Point, Vec2};

/// Anchor of a path with optional explicit control handles.
///
/// Coordinates are relative to the canvas center. `cp1` is the handle entering this point and
/// `cp2` the handle leaving it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BezierPoint {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cp1x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cp1y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cp2x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cp2y: Option<f64>,
}

impl BezierPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            ..Self::default()
        }
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Control polygon `[p0, c1, c2, p1]` of the segment between two anchors.
///
/// Missing handles sit at one third and two thirds of the chord.
pub fn segment_controls(from: &BezierPoint, to: &BezierPoint) -> [Point; 4] {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    let c1 = Point::new(
        from.cp2x.unwrap_or(from.x + dx / 3.0),
        from.cp2y.unwrap_or(from.y + dy / 3.0),
    );
    let c2 = Point::new(
        to.cp1x.unwrap_or(from.x + dx * 2.0 / 3.0),
        to.cp1y.unwrap_or(from.y + dy * 2.0 / 3.0),
    );
    [from.point(), c1, c2, to.point()]
}

fn cubic(c: &[Point; 4], t: f64) -> Point {
    let mt = 1.0 - t;
    let a = mt * mt * mt;
    let b = 3.0 * mt * mt * t;
    let d = 3.0 * mt * t * t;
    let e = t * t * t;
    Point::new(
        a * c[0].x + b * c[1].x + d * c[2].x + e * c[3].x,
        a * c[0].y + b * c[1].y + d * c[2].y + e * c[3].y,
    )
}

fn cubic_derivative(c: &[Point; 4], t: f64) -> Vec2 {
    let mt = 1.0 - t;
    let d0 = c[1] - c[0];
    let d1 = c[2] - c[1];
    let d2 = c[3] - c[2];
    d0 * (3.0 * mt * mt) + d1 * (6.0 * mt * t) + d2 * (3.0 * t * t)
}

/// Active segment index and local parameter for a normalized path parameter.
fn locate(len: usize, t: f64) -> (usize, f64) {
    let n = (len - 1) as f64;
    let scaled = t * n;
    let seg = scaled.floor().clamp(0.0, n - 1.0);
    (seg as usize, scaled - seg)
}

/// Position along `points` at `time` of a `duration`-long animation.
///
/// The path is split into equal-duration segments. Parameters outside `[0, 1]` extrapolate the
/// first or last segment's cubic. Returns `None` for paths shorter than two points.
pub fn evaluate(points: &[BezierPoint], time: f64, duration: f64) -> Option<Point> {
    if points.len() < 2 {
        return None;
    }
    if !(duration.is_finite() && duration > 0.0) {
        return Some(points[0].point());
    }
    let (seg, local) = locate(points.len(), time / duration);
    let controls = segment_controls(&points[seg], &points[seg + 1]);
    Some(cubic(&controls, local))
}

/// Tangent of the final segment at local parameter `t`.
pub fn end_tangent(points: &[BezierPoint], t: f64) -> Option<Vec2> {
    let [.., from, to] = points else {
        return None;
    };
    Some(cubic_derivative(&segment_controls(from, to), t))
}

/// Whole path as a kurbo path, translated by `origin`.
pub fn to_bez_path(points: &[BezierPoint], origin: Vec2) -> BezPath {
    let mut path = BezPath::new();
    let Some(first) = points.first() else {
        return path;
    };
    path.move_to(first.point() + origin);
    for pair in points.windows(2) {
        let [_, c1, c2, p1] = segment_controls(&pair[0], &pair[1]);
        path.curve_to(c1 + origin, c2 + origin, p1 + origin);
    }
    path
}
