use crate::foundation::error::{PanoError, PanoResult};

pub use kurbo::{Affine, BezPath, Point, Rect, Vec2};

/// Output canvas dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Canvas {
    /// Create a validated canvas with both sides non-zero.
    pub fn new(width: u32, height: u32) -> PanoResult<Self> {
        if width == 0 || height == 0 {
            return Err(PanoError::validation("canvas width/height must be > 0"));
        }
        Ok(Self { width, height })
    }

    /// Canvas center in pixel space.
    pub fn center(self) -> Point {
        Point::new(f64::from(self.width) / 2.0, f64::from(self.height) / 2.0)
    }

    /// `width / height`.
    pub fn aspect(self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }

    /// Whole-canvas rectangle.
    pub fn rect(self) -> Rect {
        Rect::new(0.0, 0.0, f64::from(self.width), f64::from(self.height))
    }
}

/// Straight (non-premultiplied) RGBA color in `0..=1`.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Parse `#rrggbb` with an explicit alpha.
    pub fn from_hex(hex: &str, a: f32) -> PanoResult<Self> {
        let s = hex.trim_start_matches('#');
        if s.len() != 6 {
            return Err(PanoError::validation(format!("invalid hex color '{hex}'")));
        }
        let channel = |i: usize| -> PanoResult<f32> {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map(|v| f32::from(v) / 255.0)
                .map_err(|_| PanoError::validation(format!("invalid hex color '{hex}'")))
        };
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?, a))
    }

    pub fn premultiplied(self) -> [f32; 4] {
        [self.r * self.a, self.g * self.a, self.b * self.a, self.a]
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canvas_rejects_zero_sides() {
        assert!(Canvas::new(0, 10).is_err());
        assert!(Canvas::new(10, 0).is_err());
        let c = Canvas::new(1280, 720).unwrap();
        assert_eq!(c.center(), Point::new(640.0, 360.0));
    }

    #[test]
    fn hex_colors_parse() {
        let c = Rgba::from_hex("#3a7bc8", 1.0).unwrap();
        assert_eq!(c.to_rgba8(), [0x3a, 0x7b, 0xc8, 255]);
        assert!(Rgba::from_hex("#abc", 1.0).is_err());
    }
}
