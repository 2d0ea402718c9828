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

use kiln_core::gc::CollectionKind;
use kiln_telemetry::{CounterHandle, GaugeHandle, HistogramHandle, MetricsRegistry, MetricsResult};

const NAMESPACE: &str = "scheduler";
const DURATION_BUCKETS_MS: [f64; 6] = [1.0, 5.0, 25.0, 100.0, 500.0, 2500.0];

/// Handles to every metric the scheduler records.
#[derive(Debug, Clone)]
pub struct SchedulerMetrics {
    /// Packages handed to the loader successfully.
    pub packages_loaded: CounterHandle,
    /// Loader invocations that returned an error.
    pub load_failures: CounterHandle,
    /// Preloads issued by the kick pump.
    pub preloads_kicked: CounterHandle,
    /// Soft collection passes.
    pub soft_collections: CounterHandle,
    /// Full collection passes, diagnostic follow-ups included.
    pub full_collections: CounterHandle,
    /// Collection pass durations.
    pub collection_ms: HistogramHandle,
    /// Whole-tick durations.
    pub tick_ms: HistogramHandle,
    /// Preload resources held at the end of the last pump.
    pub in_flight_preloads: GaugeHandle,
}

impl SchedulerMetrics {
    /// Registers (or re-attaches to) the scheduler metrics in `registry`.
    pub fn register(registry: &MetricsRegistry) -> MetricsResult<Self> {
        Ok(Self {
            packages_loaded: registry.register_counter(
                NAMESPACE,
                "packages_loaded",
                "Packages handed to the loader successfully",
            )?,
            load_failures: registry.register_counter(
                NAMESPACE,
                "load_failures",
                "Loader invocations that failed",
            )?,
            preloads_kicked: registry.register_counter(
                NAMESPACE,
                "preloads_kicked",
                "Preloads issued by the kick pump",
            )?,
            soft_collections: registry.register_counter(
                NAMESPACE,
                "soft_collections",
                "Soft collection passes",
            )?,
            full_collections: registry.register_counter(
                NAMESPACE,
                "full_collections",
                "Full collection passes",
            )?,
            collection_ms: registry.register_histogram(
                NAMESPACE,
                "collection_ms",
                "Collection pass duration",
                "ms",
                DURATION_BUCKETS_MS.to_vec(),
            )?,
            tick_ms: registry.register_histogram(
                NAMESPACE,
                "tick_ms",
                "Scheduler tick duration",
                "ms",
                DURATION_BUCKETS_MS.to_vec(),
            )?,
            in_flight_preloads: registry.register_gauge(
                NAMESPACE,
                "in_flight_preloads",
                "Preload resources currently held",
                "",
            )?,
        })
    }

    pub(crate) fn count(handle: &CounterHandle, amount: u64) {
        if amount == 0 {
            return;
        }
        if let Err(e) = handle.increment_by(amount) {
            log::warn!("CookScheduler: failed to record {}: {}", handle.id(), e);
        }
    }

    pub(crate) fn count_collection(&self, kind: CollectionKind) {
        let handle = match kind {
            CollectionKind::Soft => &self.soft_collections,
            CollectionKind::Full => &self.full_collections,
        };
        Self::count(handle, 1);
    }

    pub(crate) fn set_in_flight(&self, in_flight: usize) {
        if let Err(e) = self.in_flight_preloads.set(in_flight as f64) {
            log::warn!("CookScheduler: failed to record in-flight preloads: {}", e);
        }
    }
}
