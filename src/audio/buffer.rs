//! # Rolling Sample Buffer
//!
//! Accumulates one channel's samples between scoring calls so the detector can
//! always hand the newest fixed-length window to the speech scorer, no matter
//! how large the capture collaborator's frames are.
//!
//! ## Memory Management:
//! - Bounded: once `max_samples` is reached the oldest samples are discarded
//! - Cleared by the detector whenever its channel falls silent, so a new
//!   utterance is never scored against audio from the previous one
//!
//! Owned by exactly one detector task, so unlike a buffer shared between a
//! socket and a worker it needs no `Arc<Mutex<>>`.

use std::collections::VecDeque;

/// Bounded FIFO of normalized `f32` samples.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<f32>,
    max_samples: usize,
}

impl SampleWindow {
    /// Create a buffer holding at most `max_samples` samples.
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Append a frame, dropping the oldest samples beyond capacity.
    pub fn extend(&mut self, frame: &[f32]) {
        // Only the tail of an oversized frame can survive anyway
        let start = frame.len().saturating_sub(self.max_samples);
        self.samples.extend(&frame[start..]);

        let overflow = self.samples.len().saturating_sub(self.max_samples);
        if overflow > 0 {
            self.samples.drain(..overflow);
        }
    }

    /// Copy of the newest `window` samples, or `None` until that many have
    /// accumulated.
    pub fn latest(&self, window: usize) -> Option<Vec<f32>> {
        if window == 0 || self.samples.len() < window {
            return None;
        }
        let start = self.samples.len() - window;
        Some(self.samples.range(start..).copied().collect())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_waits_for_full_window() {
        let mut buffer = SampleWindow::new(16);
        buffer.extend(&[0.1, 0.2, 0.3]);
        assert_eq!(buffer.latest(4), None);

        buffer.extend(&[0.4, 0.5]);
        assert_eq!(buffer.latest(4), Some(vec![0.2, 0.3, 0.4, 0.5]));
    }

    #[test]
    fn test_capacity_is_bounded() {
        let mut buffer = SampleWindow::new(4);
        for i in 0..10 {
            buffer.extend(&[i as f32]);
        }
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.latest(4), Some(vec![6.0, 7.0, 8.0, 9.0]));

        let big: Vec<f32> = (0..100).map(|i| i as f32).collect();
        buffer.extend(&big);
        assert_eq!(buffer.latest(4), Some(vec![96.0, 97.0, 98.0, 99.0]));
    }

    #[test]
    fn test_clear() {
        let mut buffer = SampleWindow::new(32000);
        buffer.extend(&vec![0.0; 16000]);
        assert_eq!(buffer.len(), 16000);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.latest(1), None);
    }
}
