//! Sliding-window frame rate estimation

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Width of the averaging window
pub const FPS_WINDOW: Duration = Duration::from_secs(2);

const MIN_SPAN_SECS: f64 = 0.001;

/// Frame rate over the arrivals seen in the last [`FPS_WINDOW`].
///
/// Not synchronized; the owner keeps it behind the same lock as the frame state.
#[derive(Debug, Default)]
pub struct FpsEstimator {
    arrivals: VecDeque<Instant>,
}

impl FpsEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a frame arrival and prunes samples that fell out of the window
    pub fn record(&mut self, at: Instant) {
        self.arrivals.push_back(at);

        while let Some(&oldest) = self.arrivals.front() {
            if at.saturating_duration_since(oldest) >= FPS_WINDOW {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }
    }

    /// Frames per second, or 0.0 with fewer than two samples
    pub fn current_fps(&self) -> f64 {
        let (Some(first), Some(last)) = (self.arrivals.front(), self.arrivals.back()) else {
            return 0.0;
        };
        if self.arrivals.len() < 2 {
            return 0.0;
        }

        let span = last.saturating_duration_since(*first).as_secs_f64();
        (self.arrivals.len() - 1) as f64 / span.max(MIN_SPAN_SECS)
    }

    pub fn clear(&mut self) {
        self.arrivals.clear();
    }

    pub fn len(&self) -> usize {
        self.arrivals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrivals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    #[test]
    fn test_empty_and_single_sample() {
        let mut fps = FpsEstimator::new();
        assert_eq!(fps.current_fps(), 0.0);

        fps.record(Instant::now());
        assert_eq!(fps.current_fps(), 0.0);
    }

    #[test]
    fn test_five_fps() {
        let base = Instant::now();
        let mut fps = FpsEstimator::new();
        for i in 0..6 {
            fps.record(at(base, i * 200));
        }

        assert!((fps.current_fps() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_old_samples_are_pruned() {
        let base = Instant::now();
        let mut fps = FpsEstimator::new();

        // Slow burst that ages out
        for i in 0..3 {
            fps.record(at(base, i * 1000));
        }
        // 10 fps for one second, well after the window
        for i in 0..11 {
            fps.record(at(base, 10_000 + i * 100));
        }

        assert_eq!(fps.len(), 11);
        assert!((fps.current_fps() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_identical_timestamps_do_not_divide_by_zero() {
        let base = Instant::now();
        let mut fps = FpsEstimator::new();
        fps.record(base);
        fps.record(base);

        assert!(fps.current_fps().is_finite());
    }

    #[test]
    fn test_clear() {
        let base = Instant::now();
        let mut fps = FpsEstimator::new();
        fps.record(base);
        fps.record(at(base, 100));
        fps.clear();

        assert!(fps.is_empty());
        assert_eq!(fps.current_fps(), 0.0);
    }
}
