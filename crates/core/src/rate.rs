use std::{
    collections::{HashMap, VecDeque},
    time::Instant,
};

/// Samples kept per source.
pub const DEFAULT_WINDOW: usize = 60;

/// Sliding-window throughput estimator keyed by source id.
///
/// Each source keeps the monotonic timestamps of its last `capacity` frames;
/// fps is the number of intervals in the window over its span.
#[derive(Debug)]
pub struct RateEstimator {
    capacity: usize,
    windows: HashMap<u32, VecDeque<Instant>>,
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl RateEstimator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            windows: HashMap::new(),
        }
    }

    /// Record a frame from `source_id` seen at `at` and return the updated fps.
    ///
    /// Returns 0 with fewer than two samples or a non-positive span. Samples
    /// that arrive out of order are kept as-is.
    pub fn record(&mut self, source_id: u32, at: Instant) -> f64 {
        let window = self
            .windows
            .entry(source_id)
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(at);

        if window.len() < 2 {
            return 0.0;
        }
        let span = at.saturating_duration_since(window[0]).as_secs_f64();
        if span > 0.0 {
            (window.len() - 1) as f64 / span
        } else {
            0.0
        }
    }

    pub fn window(&self, source_id: u32) -> Option<&VecDeque<Instant>> {
        self.windows.get(&source_id)
    }

    pub fn sources(&self) -> usize {
        self.windows.len()
    }
}
