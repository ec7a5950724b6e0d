//! Progress sinks and helpers that shape raw operation progress
//! into what callers see.

use std::sync::Arc;

/// Receives completion ratio in `[0, 1]`.
pub type Progress = Arc<dyn Fn(f32) + Send + Sync>;

/// Receives completion ratio together with total download size in bytes.
pub type ByteProgress = Arc<dyn Fn(f32, u64) + Send + Sync>;

/// Receives `true` when a real download starts and `false` when it ends.
pub type Toggle = Arc<dyn Fn(bool) + Send + Sync>;

/// Rescales raw download progress that starts at `floor` into `[0, 1]`.
///
/// The external service reports dependency downloads
/// with a non-zero starting percentage.
pub fn rescale(raw: f32, floor: f32) -> f32 {
    if floor >= 1.0 {
        return if raw >= 1.0 { 1.0 } else { 0.0 };
    }
    clamp01((raw - floor) / (1.0 - floor))
}

fn clamp01(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.max(0.0).min(1.0)
    }
}

/// Forwards progress to an optional sink, mapped into sub-range
/// `[start, end]` and never decreasing.
#[derive(Clone)]
pub(crate) struct Reporter {
    sink: Option<Progress>,
    start: f32,
    end: f32,
    last: f32,
}

impl Reporter {
    pub(crate) fn new(sink: Option<Progress>) -> Self {
        Reporter::ranged(sink, 0.0, 1.0)
    }

    pub(crate) fn ranged(sink: Option<Progress>, start: f32, end: f32) -> Self {
        Reporter {
            sink,
            start,
            end,
            last: 0.0,
        }
    }

    /// Reports local ratio in `[0, 1]`.
    pub(crate) fn report(&mut self, ratio: f32) {
        let ratio = clamp01(ratio).max(self.last);
        self.last = ratio;
        if let Some(sink) = &self.sink {
            sink(self.start + (self.end - self.start) * ratio);
        }
    }

    pub(crate) fn finish(&mut self) {
        self.report(1.0);
    }
}

/// Wraps a sink so that values land in `[start, end]` of it.
pub(crate) fn sub_range(sink: Option<Progress>, start: f32, end: f32) -> Option<Progress> {
    let sink = sink?;
    Some(Arc::new(move |ratio: f32| {
        sink(start + (end - start) * clamp01(ratio))
    }))
}
