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

//! sysinfo-based implementation of the MemoryStats trait.

use std::sync::Mutex;

use kiln_core::memory::{MemoryPressure, MemorySnapshot, MemoryStats};
use sysinfo::System;

/// Available-physical ratio below which pressure is reported as `Warning`.
const WARNING_AVAILABLE_RATIO: f64 = 0.15;
/// Available-physical ratio below which pressure is reported as `Critical`.
const CRITICAL_AVAILABLE_RATIO: f64 = 0.05;

/// Derives a pressure level from the fraction of physical memory still available.
pub fn pressure_from_ratio(available_ratio: f64) -> MemoryPressure {
    if available_ratio < CRITICAL_AVAILABLE_RATIO {
        MemoryPressure::Critical
    } else if available_ratio < WARNING_AVAILABLE_RATIO {
        MemoryPressure::Warning
    } else {
        MemoryPressure::Nominal
    }
}

/// A memory sampler that uses the `sysinfo` crate.
///
/// Virtual memory is approximated as physical memory plus swap.
pub struct SysinfoMemoryStats {
    system: Mutex<System>,
}

impl SysinfoMemoryStats {
    /// Creates a new sampler.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoMemoryStats {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStats for SysinfoMemoryStats {
    fn snapshot(&self) -> MemorySnapshot {
        let Ok(mut system) = self.system.lock() else {
            return MemorySnapshot::default();
        };
        system.refresh_memory();

        let total_physical = system.total_memory();
        let available_physical = system.available_memory();
        let used_physical = total_physical.saturating_sub(available_physical);
        let total_swap = system.total_swap();
        let free_swap = system.free_swap();

        let mut snapshot = MemorySnapshot {
            available_physical,
            available_virtual: available_physical + free_swap,
            used_physical,
            used_virtual: used_physical + system.used_swap(),
            total_physical,
            total_virtual: total_physical + total_swap,
            pressure: MemoryPressure::Unknown,
        };
        if total_physical > 0 {
            snapshot.pressure = pressure_from_ratio(snapshot.available_physical_ratio());
        }
        snapshot
    }
}
