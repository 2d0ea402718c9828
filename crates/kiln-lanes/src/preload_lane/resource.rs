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

//! Admission control for in-flight preloads.
//!
//! The number of preload requests in flight is the sole gate of the kick pump.
//! It is only ever changed through [`PreloadResource`], an RAII guard that
//! increments the shared counter when acquired and decrements it when dropped,
//! so a preloader can never leak a slot and starve the pump.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The shared in-flight preload counter and its limit.
#[derive(Debug, Clone)]
pub struct PreloadBudget {
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
}

impl PreloadBudget {
    /// Creates a budget allowing `max_in_flight` concurrent preloads.
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight,
        }
    }

    /// The number of preload resources currently allocated.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// The configured limit.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Returns `true` if another preload may start.
    pub fn has_headroom(&self) -> bool {
        self.in_flight() < self.max_in_flight
    }

    /// Allocates one preload resource. Admission is checked by the caller; the
    /// guard itself always succeeds so that blocking requests can exceed the
    /// budget.
    pub fn acquire(&self) -> PreloadResource {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        PreloadResource {
            in_flight: self.in_flight.clone(),
        }
    }
}

/// One allocated preload slot, released on drop.
#[derive(Debug)]
pub struct PreloadResource {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for PreloadResource {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_tracks_in_flight_count() {
        let budget = PreloadBudget::new(2);
        assert!(budget.has_headroom());

        let first = budget.acquire();
        let second = budget.acquire();
        assert_eq!(budget.in_flight(), 2);
        assert!(!budget.has_headroom());

        drop(first);
        assert_eq!(budget.in_flight(), 1);
        assert!(budget.has_headroom());

        let clone = budget.clone();
        drop(second);
        assert_eq!(clone.in_flight(), 0);
    }
}
