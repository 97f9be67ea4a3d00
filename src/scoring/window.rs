//! Fixed-capacity FIFO of recent feature vectors used as retraining data.

use std::collections::VecDeque;

use crate::types::FeatureVector;

#[derive(Debug, Clone)]
pub struct RollingWindow {
    buf: VecDeque<FeatureVector>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one vector, evicting the oldest when full.
    pub fn push(&mut self, v: FeatureVector) {
        if self.buf.len() >= self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(v);
    }

    pub fn extend<I: IntoIterator<Item = FeatureVector>>(&mut self, vectors: I) {
        for v in vectors {
            self.push(v);
        }
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

    /// Contents oldest-first as one contiguous slice.
    pub fn as_slice(&mut self) -> &[FeatureVector] {
        self.buf.make_contiguous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overfill_keeps_last_capacity_in_order() {
        let mut w = RollingWindow::new(5);
        w.extend((0..8).map(|i| vec![f64::from(i)]));

        assert_eq!(w.len(), 5);
        let kept: Vec<f64> = w.as_slice().iter().map(|v| v[0]).collect();
        assert_eq!(kept, vec![3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut w = RollingWindow::new(3);
        for i in 0..100 {
            w.push(vec![f64::from(i)]);
            assert!(w.len() <= w.capacity());
        }
        assert_eq!(w.as_slice().first(), Some(&vec![97.0]));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut w = RollingWindow::new(0);
        w.push(vec![1.0]);
        w.push(vec![2.0]);
        assert_eq!(w.len(), 1);
        assert_eq!(w.as_slice(), &[vec![2.0]]);
    }
}
