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

use std::time::Instant;

use kiln_control::{GcTriggerController, PipelinePackages};
use kiln_core::package::PackageTable;
use kiln_core::KilnConfig;
use kiln_lanes::preload_lane::LoadQueue;

/// Everything the scheduler mutates across ticks.
///
/// The context is passed explicitly into every tick; the scheduler itself
/// only holds capabilities and configuration.
pub struct SchedulerContext {
    /// Identities of every package seen so far.
    pub packages: PackageTable,
    /// The staged preload pipeline.
    pub queue: LoadQueue,
    /// The GC trigger controller.
    pub trigger: GcTriggerController,
    /// Packages the rest of the cook is working on. `loading` is refreshed
    /// from the load queue before each collection; callers own `requested`
    /// and `saving`.
    pub pipeline: PipelinePackages,
}

impl SchedulerContext {
    /// Creates an empty context whose GC clocks start at `now`.
    pub fn new(config: &KilnConfig, now: Instant) -> Self {
        Self {
            packages: PackageTable::new(),
            queue: LoadQueue::new(config.preload.clone()),
            trigger: GcTriggerController::new(config.gc.clone(), now),
            pipeline: PipelinePackages::default(),
        }
    }

    /// Returns `true` once no package is left in load state.
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn refresh_loading(&mut self) {
        self.pipeline.loading = self
            .queue
            .packages_in_load_state()
            .map(|package| self.packages.name(package).to_owned())
            .collect();
    }
}
