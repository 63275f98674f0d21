use serde::{Deserialize, Serialize};

use crate::foundation::{
    core::Canvas,
    error::{PanoError, PanoResult},
};

/// Project-wide output settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Seconds.
    pub duration: f64,
    /// Signed pixel count used when building the foreground matte.
    pub mask_expansion: i32,
    /// Feather radius in pixels for the foreground matte.
    pub mask_feather: u32,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30.0,
            duration: 5.0,
            mask_expansion: 0,
            mask_feather: 0,
        }
    }
}

impl Project {
    pub fn validate(&self) -> PanoResult<()> {
        Canvas::new(self.width, self.height)?;
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(PanoError::validation("project fps must be > 0"));
        }
        if !(self.duration.is_finite() && self.duration > 0.0) {
            return Err(PanoError::validation("project duration must be > 0"));
        }
        Ok(())
    }

    pub fn canvas(&self) -> Canvas {
        Canvas {
            width: self.width,
            height: self.height,
        }
    }

    pub fn total_frames(&self) -> u64 {
        (self.duration * self.fps).round().max(0.0) as u64
    }

    pub fn clamp_time(&self, t: f64) -> f64 {
        if t.is_nan() {
            return 0.0;
        }
        t.clamp(0.0, self.duration.max(0.0))
    }

    pub fn frame_at(&self, t: f64) -> u64 {
        (self.clamp_time(t) * self.fps).floor() as u64
    }

    pub fn time_of_frame(&self, frame: u64) -> f64 {
        self.clamp_time(frame as f64 / self.fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_720p_five_seconds() {
        let p = Project::default();
        assert_eq!((p.width, p.height), (1280, 720));
        assert_eq!(p.total_frames(), 150);
        p.validate().unwrap();
    }

    #[test]
    fn time_is_clamped_into_duration() {
        let p = Project::default();
        assert_eq!(p.clamp_time(-1.0), 0.0);
        assert_eq!(p.clamp_time(9.0), 5.0);
        assert_eq!(p.clamp_time(f64::NAN), 0.0);
        assert_eq!(p.frame_at(1.0), 30);
        assert_eq!(p.time_of_frame(45), 1.5);
    }

    #[test]
    fn validate_rejects_degenerate_projects() {
        let p = Project {
            fps: 0.0,
            ..Project::default()
        };
        assert!(p.validate().is_err());
        let p = Project {
            width: 0,
            ..Project::default()
        };
        assert!(p.validate().is_err());
    }
}
