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

//! Trigger signal evaluation.
//!
//! Each signal is an independent yes/no answer computed from one memory
//! snapshot plus the controller's forecasts. Combining them into a decision,
//! including cooldown suppression, is the job of the
//! [`GcTriggerController`](crate::GcTriggerController).

use std::time::Duration;

use kiln_core::config::{GcTriggerConfig, TriggerPolicy};
use kiln_core::gc::CollectionKind;
use kiln_core::memory::{mb_to_bytes, MemorySnapshot};
use serde::Serialize;

/// The result of one trigger evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GcDecision {
    /// Keep cooking.
    None,
    /// Run a soft collection.
    Soft,
    /// Run a full collection.
    Full,
}

impl GcDecision {
    /// The collection kind to run, if any.
    pub fn kind(self) -> Option<CollectionKind> {
        match self {
            GcDecision::None => None,
            GcDecision::Soft => Some(CollectionKind::Soft),
            GcDecision::Full => Some(CollectionKind::Full),
        }
    }
}

/// Which independent trigger conditions fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TriggerSignals {
    /// Available physical or virtual memory is below its floor.
    pub min_free: bool,
    /// Used physical or virtual memory is above its ceiling.
    pub max_used: bool,
    /// The OS pressure level reached the configured threshold.
    pub pressure: bool,
    /// The object table is close to capacity.
    pub object_table: bool,
    /// Enough packages were processed since the last collection.
    pub packages_between_gc: bool,
    /// Available physical memory fell below the current soft-GC target.
    pub soft_numerator: bool,
    /// Enough time passed that a soft collection fits the time budget.
    pub soft_time_budget: bool,
}

impl TriggerSignals {
    /// The min-free and max-used signals combined under `policy`.
    pub fn memory_limits(&self, policy: TriggerPolicy) -> bool {
        match policy {
            TriggerPolicy::And => self.min_free && self.max_used,
            TriggerPolicy::Or => self.min_free || self.max_used,
        }
    }

    /// Returns `true` if the process is running out of memory or object slots.
    pub fn out_of_memory(&self, policy: TriggerPolicy) -> bool {
        self.memory_limits(policy) || self.pressure || self.object_table
    }

    /// Returns `true` if any signal fired.
    pub fn any(&self) -> bool {
        self.min_free
            || self.max_used
            || self.pressure
            || self.object_table
            || self.packages_between_gc
            || self.soft_numerator
            || self.soft_time_budget
    }
}

/// Everything signal evaluation reads besides the configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalInputs {
    /// Current memory availability.
    pub snapshot: MemorySnapshot,
    /// Live objects in the collector's object table.
    pub live_objects: u64,
    /// Object-table capacity; `0` means unbounded.
    pub object_capacity: u64,
    /// Units of forward progress since the last collection.
    pub packages_since_gc: u64,
    /// Wall-clock time since the last collection ended.
    pub time_since_last_gc: Duration,
    /// Mean duration of recent soft collections, in seconds.
    pub average_soft_gc_secs: f64,
    /// Current soft-GC target numerator.
    pub soft_gc_numerator: u32,
}

/// The soft-GC target in bytes: `total × numerator / denominator`.
pub fn soft_gc_target_bytes(total_physical: u64, numerator: u32, denominator: u32) -> u64 {
    if denominator == 0 {
        return 0;
    }
    (total_physical as u128 * numerator as u128 / denominator as u128) as u64
}

/// Evaluates every trigger signal independently.
pub fn evaluate_signals(config: &GcTriggerConfig, inputs: &SignalInputs) -> TriggerSignals {
    let snapshot = &inputs.snapshot;

    let below = |available: u64, floor_mb: u64| floor_mb > 0 && available < mb_to_bytes(floor_mb);
    let above = |used: u64, ceiling_mb: u64| ceiling_mb > 0 && used > mb_to_bytes(ceiling_mb);

    let min_free = below(snapshot.available_physical, config.min_free_physical_mb)
        || below(snapshot.available_virtual, config.min_free_virtual_mb);
    let max_used = above(snapshot.used_physical, config.max_used_physical_mb)
        || above(snapshot.used_virtual, config.max_used_virtual_mb);

    let pressure = config
        .memory_pressure_trigger
        .is_some_and(|threshold| snapshot.pressure >= threshold);

    let object_table = config.object_table_trigger_fraction > 0.0
        && inputs.object_capacity > 0
        && inputs.live_objects as f64
            > config.object_table_trigger_fraction * inputs.object_capacity as f64;

    let packages_between_gc = config.packages_between_gc > 0
        && inputs.packages_since_gc >= config.packages_between_gc as u64;

    let soft_numerator = inputs.soft_gc_numerator > 0
        && snapshot.available_physical
            < soft_gc_target_bytes(
                snapshot.total_physical,
                inputs.soft_gc_numerator,
                config.soft_gc_denominator,
            );

    let fraction = config.soft_gc_time_fraction_budget;
    let soft_time_budget = fraction > 0.0
        && fraction < 1.0
        && inputs.time_since_last_gc.as_secs_f64() * fraction / (1.0 - fraction)
            >= inputs.average_soft_gc_secs;

    TriggerSignals {
        min_free,
        max_used,
        pressure,
        object_table,
        packages_between_gc,
        soft_numerator,
        soft_time_budget,
    }
}

/// Steps the soft-GC numerator down until its target is below `available`.
///
/// Returns the new numerator; `0` means no further targets remain.
pub fn next_soft_gc_numerator(
    numerator: u32,
    denominator: u32,
    total_physical: u64,
    available_physical: u64,
) -> u32 {
    let mut numerator = numerator;
    while numerator > 0 {
        numerator -= 1;
        if soft_gc_target_bytes(total_physical, numerator, denominator) < available_physical {
            break;
        }
    }
    numerator
}
