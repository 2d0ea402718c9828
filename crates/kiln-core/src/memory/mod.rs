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

//! Provides the interface for querying process and system memory statistics.
//!
//! The GC trigger heuristics never talk to the operating system directly. They
//! read a [`MemorySnapshot`] from a [`MemoryStats`] provider once per tick, which
//! keeps the heuristics deterministic under test and lets `kiln-infra` supply
//! the real numbers through `sysinfo`.

use serde::{Deserialize, Serialize};

/// Bytes in one mebibyte.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// The operating system's view of how close it is to running out of memory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum MemoryPressure {
    /// The platform does not report pressure.
    #[default]
    Unknown,
    /// No pressure.
    Nominal,
    /// The OS is starting to reclaim memory.
    Warning,
    /// The OS is about to fail allocations or kill processes.
    Critical,
}

/// A point-in-time view of memory availability, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Physical memory the process could still allocate.
    pub available_physical: u64,
    /// Virtual memory (physical plus swap/commit) the process could still allocate.
    pub available_virtual: u64,
    /// Physical memory in use.
    pub used_physical: u64,
    /// Virtual memory in use.
    pub used_virtual: u64,
    /// Total physical memory installed.
    pub total_physical: u64,
    /// Total virtual memory (physical plus swap/commit limit).
    pub total_virtual: u64,
    /// OS-reported pressure level.
    pub pressure: MemoryPressure,
}

impl MemorySnapshot {
    /// Available physical memory in megabytes.
    pub fn available_physical_mb(&self) -> f64 {
        self.available_physical as f64 / BYTES_PER_MB as f64
    }

    /// Used physical memory in megabytes.
    pub fn used_physical_mb(&self) -> f64 {
        self.used_physical as f64 / BYTES_PER_MB as f64
    }

    /// Used virtual memory in megabytes.
    pub fn used_virtual_mb(&self) -> f64 {
        self.used_virtual as f64 / BYTES_PER_MB as f64
    }

    /// Fraction of physical memory still available, in `[0, 1]`.
    pub fn available_physical_ratio(&self) -> f64 {
        if self.total_physical == 0 {
            return 1.0;
        }
        self.available_physical as f64 / self.total_physical as f64
    }
}

/// A source of memory snapshots.
pub trait MemoryStats: Send + Sync {
    /// Samples current memory availability.
    fn snapshot(&self) -> MemorySnapshot;
}

/// Converts a megabyte setting into bytes.
pub fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(BYTES_PER_MB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_levels_are_ordered() {
        assert!(MemoryPressure::Critical > MemoryPressure::Warning);
        assert!(MemoryPressure::Warning > MemoryPressure::Nominal);
        assert!(MemoryPressure::Nominal > MemoryPressure::Unknown);
    }

    #[test]
    fn snapshot_ratios() {
        let snapshot = MemorySnapshot {
            available_physical: 2 * BYTES_PER_MB,
            total_physical: 8 * BYTES_PER_MB,
            used_physical: 6 * BYTES_PER_MB,
            ..Default::default()
        };
        assert_eq!(snapshot.available_physical_ratio(), 0.25);
        assert_eq!(snapshot.used_physical_mb(), 6.0);
        assert_eq!(MemorySnapshot::default().available_physical_ratio(), 1.0);
        assert_eq!(mb_to_bytes(3), 3 * BYTES_PER_MB);
    }
}
