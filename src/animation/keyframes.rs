use serde::{Deserialize, Serialize};

/// One time/value sample of a numeric track.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Seconds from the start of the project.
    pub time: f64,
    pub value: f64,
}

impl Keyframe {
    pub fn new(time: f64, value: f64) -> Self {
        Self { time, value }
    }
}

/// Sample an unordered list of keyframes at `time`.
///
/// Empty input yields `default`. Queries before the first or after the last sample clamp to the
/// end values; there is no extrapolation.
pub fn interpolate(samples: &[Keyframe], time: f64, default: f64) -> f64 {
    match samples.len() {
        0 => default,
        1 => samples[0].value,
        _ => {
            if samples.windows(2).all(|w| w[0].time <= w[1].time) {
                sample_sorted(samples, time)
            } else {
                let mut sorted = samples.to_vec();
                sorted.sort_by(|a, b| a.time.total_cmp(&b.time));
                sample_sorted(&sorted, time)
            }
        }
    }
}

fn sample_sorted(keys: &[Keyframe], time: f64) -> f64 {
    let first = keys[0];
    let last = keys[keys.len() - 1];
    if time <= first.time {
        return first.value;
    }
    if time >= last.time {
        return last.value;
    }

    let idx = keys.partition_point(|k| k.time <= time);
    let a = keys[idx - 1];
    let b = keys[idx];
    let span = b.time - a.time;
    if span <= 0.0 {
        return a.value;
    }
    a.value + (b.value - a.value) * (time - a.time) / span
}

/// Keyframe track kept sorted by time with unique times.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Track {
    keys: Vec<Keyframe>,
}

impl Track {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from arbitrary samples. Later duplicates of the same time win.
    pub fn from_samples(samples: impl IntoIterator<Item = Keyframe>) -> Self {
        let mut track = Self::new();
        for k in samples {
            track.insert(k.time, k.value);
        }
        track
    }

    /// Insert a sample, replacing any sample at exactly the same time.
    pub fn insert(&mut self, time: f64, value: f64) {
        self.keys.retain(|k| k.time != time);
        let idx = self.keys.partition_point(|k| k.time < time);
        self.keys.insert(idx, Keyframe { time, value });
    }

    /// Remove the sample at exactly `time`. Returns whether one was removed.
    pub fn remove_at(&mut self, time: f64) -> bool {
        let before = self.keys.len();
        self.keys.retain(|k| k.time != time);
        self.keys.len() != before
    }

    pub fn sample(&self, time: f64, default: f64) -> f64 {
        if self.keys.is_empty() {
            return default;
        }
        sample_sorted(&self.keys, time)
    }

    pub fn keys(&self) -> &[Keyframe] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Restore ordering and time uniqueness after deserializing untrusted data.
    pub(crate) fn normalize(&mut self) {
        let keys = std::mem::take(&mut self.keys);
        *self = Self::from_samples(keys);
    }
}
