// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Rolling histories feeding the trigger forecasts.

use std::collections::VecDeque;
use std::time::Duration;

/// Durations of recent soft collections and their running mean.
///
/// The average always equals the arithmetic mean of the retained samples.
/// Once full, each new sample evicts the oldest one and the mean is updated
/// incrementally instead of being recomputed.
#[derive(Debug, Clone)]
pub struct SoftGcHistory {
    samples: VecDeque<f64>,
    capacity: usize,
    average: f64,
}

impl SoftGcHistory {
    /// Creates an empty history retaining up to `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            average: 0.0,
        }
    }

    /// Records the duration of a soft collection.
    pub fn add(&mut self, duration: Duration) {
        self.add_secs(duration.as_secs_f64());
    }

    /// Records a duration given in seconds.
    pub fn add_secs(&mut self, secs: f64) {
        if self.samples.len() == self.capacity {
            if let Some(oldest) = self.samples.pop_front() {
                self.samples.push_back(secs);
                self.average += (secs - oldest) / self.capacity as f64;
                return;
            }
        }
        self.samples.push_back(secs);
        let count = self.samples.len() as f64;
        self.average += (secs - self.average) / count;
    }

    /// Mean of the retained samples in seconds, `0.0` when empty.
    pub fn average_secs(&self) -> f64 {
        self.average
    }

    /// The number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if no sample has been recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The maximum number of retained samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retained samples, oldest first, in seconds.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

/// Recent used-memory samples, used to judge how much a collection should free.
#[derive(Debug, Clone)]
pub struct UsedMemoryHistory {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl UsedMemoryHistory {
    /// Creates an empty history retaining up to `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Records a used-memory sample in bytes.
    pub fn push(&mut self, used: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(used);
    }

    /// Difference between the largest and smallest retained sample.
    pub fn spread(&self) -> u64 {
        let min = self.samples.iter().copied().min().unwrap_or(0);
        let max = self.samples.iter().copied().max().unwrap_or(0);
        max - min
    }

    /// The number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` if no sample has been recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
