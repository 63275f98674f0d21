use std::{cell::Cell, rc::Rc};

/// Coalescing redraw flag.
///
/// Clones share the same flag, so observers and image-load completion can each hold one and
/// request redraws; any number of requests before the next [`RedrawScheduler::take`] yield
/// a single frame.
#[derive(Clone, Debug, Default)]
pub struct RedrawScheduler {
    pending: Rc<Cell<bool>>,
    coalesced: Rc<Cell<u64>>,
}

impl RedrawScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a redraw. Returns `false` when one was already pending.
    pub fn request(&self) -> bool {
        if self.pending.replace(true) {
            self.coalesced.set(self.coalesced.get() + 1);
            return false;
        }
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get()
    }

    /// Consume the pending redraw, if any.
    pub fn take(&self) -> bool {
        self.pending.replace(false)
    }

    /// Requests that were folded into an already pending redraw.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.get()
    }
}

/// Timeline transport.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Playback {
    pub time: f64,
    pub playing: bool,
    pub looping: bool,
    duration: f64,
}

impl Playback {
    pub fn new(duration: f64) -> Self {
        Self {
            time: 0.0,
            playing: false,
            looping: false,
            duration: duration.max(0.0),
        }
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: f64) {
        self.duration = duration.max(0.0);
        self.time = self.time.min(self.duration);
    }

    pub fn play(&mut self) {
        if !self.looping && self.time >= self.duration {
            self.time = 0.0;
        }
        self.playing = true;
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn toggle(&mut self) {
        if self.playing {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn seek(&mut self, t: f64) -> f64 {
        self.time = if t.is_finite() {
            t.clamp(0.0, self.duration)
        } else {
            0.0
        };
        self.time
    }

    /// Move the playhead by `dt` seconds while playing.
    ///
    /// Past the end the playhead wraps to 0 when looping, otherwise it stops at the end.
    pub fn advance(&mut self, dt: f64) -> f64 {
        if !self.playing || !dt.is_finite() || dt <= 0.0 {
            return self.time;
        }
        let next = self.time + dt;
        if next >= self.duration {
            if self.looping {
                self.time = 0.0;
            } else {
                self.time = self.duration;
                self.playing = false;
            }
        } else {
            self.time = next;
        }
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_coalesce_until_taken() {
        let s = RedrawScheduler::new();
        let handle = s.clone();
        assert!(s.request());
        assert!(!handle.request());
        assert!(!s.request());
        assert_eq!(s.coalesced(), 2);

        assert!(handle.take());
        assert!(!s.take());
        assert!(handle.request());
    }

    #[test]
    fn looping_wraps_to_start() {
        let mut p = Playback::new(2.0);
        p.looping = true;
        p.play();
        assert_eq!(p.advance(1.5), 1.5);
        assert_eq!(p.advance(0.6), 0.0);
        assert!(p.playing);
    }

    #[test]
    fn non_looping_stops_at_end() {
        let mut p = Playback::new(2.0);
        p.play();
        assert_eq!(p.advance(5.0), 2.0);
        assert!(!p.playing);
        assert_eq!(p.advance(1.0), 2.0);

        p.play();
        assert_eq!(p.time, 0.0);
    }

    #[test]
    fn paused_playback_does_not_move() {
        let mut p = Playback::new(2.0);
        assert_eq!(p.advance(1.0), 0.0);
        assert_eq!(p.seek(9.0), 2.0);
        assert_eq!(p.seek(f64::NAN), 0.0);
    }
}
