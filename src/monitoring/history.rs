// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

use std::collections::VecDeque;

/// Maximum number of load samples kept per sample run
pub const HISTORY_CAPACITY: usize = 100;

/// Bounded FIFO of per-tick load percentages
#[derive(Debug, Clone, Default)]
pub struct RollingHistory {
    samples: VecDeque<f64>,
}

impl RollingHistory {
    pub fn new() -> Self {
        Self { samples: VecDeque::with_capacity(HISTORY_CAPACITY) }
    }

    /// Append a sample, evicting the oldest once over capacity
    pub fn push(&mut self, sample: f64) {
        self.samples.push_back(sample);
        if self.samples.len() > HISTORY_CAPACITY {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Arithmetic mean, or None when nothing has been recorded
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Samples in arrival order
    pub fn samples(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }
}
