use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// Rolling frame-time statistics. Times are in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub fps: f64,
    pub frame_time: f64,
    pub avg_frame_time: f64,
    pub min_frame_time: f64,
    pub max_frame_time: f64,
    pub total_frames: u64,
    pub dropped_frames: u64,
}

/// Ring buffer of recent frame durations.
#[derive(Debug)]
pub struct PerformanceMonitor {
    samples: VecDeque<Duration>,
    max_samples: usize,
    budget: Duration,
    started: Option<Instant>,
    total_frames: u64,
    dropped_frames: u64,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(60, Duration::from_micros(16_670))
    }
}

impl PerformanceMonitor {
    pub fn new(max_samples: usize, budget: Duration) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
            budget,
            started: None,
            total_frames: 0,
            dropped_frames: 0,
        }
    }

    pub fn start_frame(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Close the frame opened by [`PerformanceMonitor::start_frame`]. No-op without one.
    pub fn end_frame(&mut self) {
        if let Some(t0) = self.started.take() {
            self.record_frame(t0.elapsed());
        }
    }

    pub fn record_frame(&mut self, dt: Duration) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(dt);
        self.total_frames += 1;
        if dt > self.budget {
            self.dropped_frames += 1;
        }
    }

    pub fn stats(&self) -> PerformanceStats {
        let Some(last) = self.samples.back() else {
            return PerformanceStats::default();
        };
        let ms: Vec<f64> = self.samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        let avg = ms.iter().sum::<f64>() / ms.len() as f64;
        let min = ms.iter().copied().fold(f64::INFINITY, f64::min);
        let max = ms.iter().copied().fold(0.0, f64::max);
        let fps = if avg > 0.0 { 1000.0 / avg } else { 0.0 };

        PerformanceStats {
            fps: round_to(fps, 1),
            frame_time: round_to(last.as_secs_f64() * 1000.0, 2),
            avg_frame_time: round_to(avg, 2),
            min_frame_time: round_to(min, 2),
            max_frame_time: round_to(max, 2),
            total_frames: self.total_frames,
            dropped_frames: self.dropped_frames,
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.started = None;
        self.total_frames = 0;
        self.dropped_frames = 0;
    }

    pub fn formatted(&self) -> String {
        let s = self.stats();
        format!(
            "FPS: {} | Frame: {}ms | Avg: {}ms | Dropped: {}",
            s.fps, s.frame_time, s.avg_frame_time, s.dropped_frames
        )
    }

    pub fn is_performance_good(&self) -> bool {
        self.stats().fps >= 55.0
    }

    pub fn is_performance_acceptable(&self) -> bool {
        self.stats().fps >= 30.0
    }
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let k = 10f64.powi(decimals);
    (v * k).round() / k
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: f64) -> Duration {
        Duration::from_micros((v * 1000.0).round() as u64)
    }

    #[test]
    fn empty_monitor_reports_zeroes() {
        let m = PerformanceMonitor::default();
        assert_eq!(m.stats(), PerformanceStats::default());
        assert!(!m.is_performance_acceptable());
    }

    #[test]
    fn stats_are_rounded_and_drops_counted() {
        let mut m = PerformanceMonitor::default();
        m.record_frame(ms(10.0));
        m.record_frame(ms(20.0));
        m.record_frame(ms(12.5));

        let s = m.stats();
        assert_eq!(s.total_frames, 3);
        assert_eq!(s.dropped_frames, 1);
        assert_eq!(s.frame_time, 12.5);
        assert_eq!(s.min_frame_time, 10.0);
        assert_eq!(s.max_frame_time, 20.0);
        assert_eq!(s.avg_frame_time, 14.17);
        assert_eq!(s.fps, 70.6);
        assert_eq!(
            m.formatted(),
            "FPS: 70.6 | Frame: 12.5ms | Avg: 14.17ms | Dropped: 1"
        );
    }

    #[test]
    fn window_keeps_latest_samples_but_counts_all_frames() {
        let mut m = PerformanceMonitor::new(2, Duration::from_millis(100));
        m.record_frame(ms(50.0));
        m.record_frame(ms(10.0));
        m.record_frame(ms(10.0));
        let s = m.stats();
        assert_eq!(s.max_frame_time, 10.0);
        assert_eq!(s.total_frames, 3);
        assert!(m.is_performance_good());

        m.reset();
        assert_eq!(m.stats().total_frames, 0);
    }

    #[test]
    fn thirty_fps_is_acceptable_not_good() {
        let mut m = PerformanceMonitor::default();
        m.record_frame(ms(33.0));
        assert!(m.is_performance_acceptable());
        assert!(!m.is_performance_good());
    }
}
