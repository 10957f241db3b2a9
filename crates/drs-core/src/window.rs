//! Bounded sliding windows of recent metric samples
//!
//! Each window is written by exactly one sampling loop and read by the
//! request-serving path, so the deque sits behind a mutex. Averages are
//! recomputed from the stored samples on every call.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// FIFO window holding up to `capacity` samples of `W` values each
#[derive(Debug)]
pub struct MetricWindow<const W: usize> {
    samples: Mutex<VecDeque<[f64; W]>>,
    capacity: usize,
}

/// Window of single-valued samples (cpu%, mem%)
pub type ScalarWindow = MetricWindow<1>;

/// Window of paired samples (net in/out, io read/write)
pub type PairWindow = MetricWindow<2>;

impl<const W: usize> MetricWindow<W> {
    /// Create a window; a zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<[f64; W]>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a sample, evicting the oldest first when full.
    /// Returns the window length after the push.
    pub fn push(&self, sample: [f64; W]) -> usize {
        let mut samples = self.lock();
        while samples.len() >= self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
        samples.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the samples, oldest first
    pub fn snapshot(&self) -> Vec<[f64; W]> {
        self.lock().iter().copied().collect()
    }

    /// Mean of the `k` most recent samples, element-wise.
    ///
    /// Uses every stored sample when fewer than `k` are present and returns
    /// `None` when the window is empty or `k` is zero.
    pub fn average(&self, k: usize) -> Option<[f64; W]> {
        let samples = self.lock();
        let take = k.min(samples.len());
        if take == 0 {
            return None;
        }

        let mut sum = [0.0; W];
        for sample in samples.iter().rev().take(take) {
            for (acc, v) in sum.iter_mut().zip(sample) {
                *acc += v;
            }
        }
        for acc in sum.iter_mut() {
            *acc /= take as f64;
        }
        Some(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_window_never_exceeds_capacity() {
        let window = ScalarWindow::new(10);
        for i in 0..37 {
            let len = window.push([i as f64]);
            assert!(len <= 10);
        }
        assert_eq!(window.len(), 10);
    }

    #[test]
    fn test_overflow_keeps_most_recent_in_order() {
        let window = ScalarWindow::new(10);
        for i in 0..15 {
            window.push([i as f64]);
        }
        let contents: Vec<f64> = window.snapshot().iter().map(|s| s[0]).collect();
        let expected: Vec<f64> = (5..15).map(|i| i as f64).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_average_of_most_recent() {
        let window = ScalarWindow::new(10);
        for v in [10.0, 20.0, 30.0, 50.0] {
            window.push([v]);
        }
        assert_eq!(window.average(2), Some([40.0]));
        assert_eq!(window.average(4), Some([27.5]));
        // Recomputed each call, no drift
        window.push([0.0]);
        assert_eq!(window.average(2), Some([25.0]));
        assert_eq!(window.average(2), Some([25.0]));
    }

    #[test]
    fn test_average_paired_samples() {
        let window = PairWindow::new(10);
        window.push([1.0, 100.0]);
        window.push([3.0, 300.0]);
        window.push([5.0, 500.0]);
        assert_eq!(window.average(2), Some([4.0, 400.0]));
    }

    #[test]
    fn test_average_with_fewer_samples_than_requested() {
        let window = ScalarWindow::new(10);
        assert_eq!(window.average(2), None);
        window.push([7.0]);
        assert_eq!(window.average(2), Some([7.0]));
        assert_eq!(window.average(0), None);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let window = ScalarWindow::new(0);
        window.push([1.0]);
        window.push([2.0]);
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.snapshot(), vec![[2.0]]);
    }

    #[test]
    fn test_concurrent_writer_and_readers() {
        let window = Arc::new(ScalarWindow::new(10));
        let writer = {
            let window = Arc::clone(&window);
            std::thread::spawn(move || {
                for i in 0..1000 {
                    window.push([i as f64]);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let window = Arc::clone(&window);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        assert!(window.len() <= 10);
                        if let Some([avg]) = window.average(2) {
                            assert!((0.0..1000.0).contains(&avg));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        let contents: Vec<f64> = window.snapshot().iter().map(|s| s[0]).collect();
        assert_eq!(contents, (990..1000).map(|i| i as f64).collect::<Vec<_>>());
    }
}
