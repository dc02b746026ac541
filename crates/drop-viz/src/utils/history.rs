//! Fixed-capacity history buffer backing every rolling statistic in the crate.
//!
//! The core runs for unbounded session lengths, so nothing may grow without
//! limit: pushing into a full buffer evicts the oldest sample first.

use std::collections::VecDeque;

/// Bounded ring of `f32` samples, oldest-first.
#[derive(Clone, Debug)]
pub struct History {
    buf: VecDeque<f32>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Append a sample, evicting the oldest when full.
    pub fn push(&mut self, value: f32) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Sample at `idx`, oldest-first.
    pub fn get(&self, idx: usize) -> Option<f32> {
        self.buf.get(idx).copied()
    }

    pub fn latest(&self) -> Option<f32> {
        self.buf.back().copied()
    }

    /// Sample `n` frames ago (`nth_back(0)` is the latest).
    pub fn nth_back(&self, n: usize) -> Option<f32> {
        if n < self.buf.len() {
            self.buf.get(self.buf.len() - 1 - n).copied()
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.buf.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.buf.iter().copied().collect()
    }

    pub fn mean(&self) -> f32 {
        if self.buf.is_empty() {
            return 0.0;
        }
        self.buf.iter().sum::<f32>() / self.buf.len() as f32
    }

    /// Mean over the last `frames` samples.
    pub fn recent_mean(&self, frames: usize) -> f32 {
        let n = frames.min(self.buf.len());
        if n == 0 {
            return 0.0;
        }
        self.buf.iter().rev().take(n).sum::<f32>() / n as f32
    }

    pub fn variance(&self) -> f32 {
        if self.buf.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        self.buf.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / self.buf.len() as f32
    }

    pub fn median(&self) -> f32 {
        if self.buf.is_empty() {
            return 0.0;
        }
        let mut sorted = self.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 1 {
            sorted[mid]
        } else {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        }
    }

    /// Least-squares slope over the last `window` samples (per-frame units).
    pub fn slope(&self, window: usize) -> f32 {
        let n = window.min(self.buf.len());
        if n < 2 {
            return 0.0;
        }
        let start = self.buf.len() - n;
        let (mut sum_x, mut sum_y, mut sum_xy, mut sum_x2) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
        for i in 0..n {
            let x = i as f32;
            let y = self.buf[start + i];
            sum_x += x;
            sum_y += y;
            sum_xy += x * y;
            sum_x2 += x * x;
        }
        let nf = n as f32;
        let denom = nf * sum_x2 - sum_x * sum_x;
        if denom.abs() < f32::EPSILON {
            0.0
        } else {
            (nf * sum_xy - sum_x * sum_y) / denom
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_push() {
        let mut h = History::new(3);
        for i in 0..10 {
            h.push(i as f32);
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.to_vec(), vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_nth_back() {
        let mut h = History::new(4);
        for v in [1.0, 2.0, 3.0, 4.0] {
            h.push(v);
        }
        assert_eq!(h.nth_back(0), Some(4.0));
        assert_eq!(h.nth_back(3), Some(1.0));
        assert_eq!(h.nth_back(4), None);
    }

    #[test]
    fn test_median_and_variance() {
        let mut h = History::new(8);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            h.push(v);
        }
        assert_eq!(h.median(), 3.0);
        assert!((h.variance() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_slope_rising() {
        let mut h = History::new(32);
        for i in 0..30 {
            h.push(i as f32 * 0.01);
        }
        let slope = h.slope(30);
        assert!((slope - 0.01).abs() < 1e-4);
    }

    #[test]
    fn test_slope_flat() {
        let mut h = History::new(32);
        for _ in 0..30 {
            h.push(0.5);
        }
        assert!(h.slope(30).abs() < 1e-6);
    }
}
