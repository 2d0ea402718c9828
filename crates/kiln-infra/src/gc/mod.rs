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

//! A collector that reclaims resident packages.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use kiln_core::gc::{CollectionKind, CollectionStats, Collector, KeepAliveSet, ObjectClassCount};
use kiln_core::io::ResourceManager;

use crate::io::FileResourceManager;

/// Treats each resident package as one object and evicts every resident
/// package outside the keep-alive set.
///
/// Pinned packages model objects held by roots the cook does not control:
/// they survive every pass. A pass run with history records why each
/// survivor was kept, so [`Collector::reference_chain`] can answer.
pub struct ResidencyCollector {
    resources: Arc<FileResourceManager>,
    object_capacity: u64,
    pinned: BTreeSet<String>,
    history: Option<AHashMap<String, Vec<String>>>,
}

impl ResidencyCollector {
    /// Creates a collector over `resources` with the given object-table capacity (`0` = unbounded).
    pub fn new(resources: Arc<FileResourceManager>, object_capacity: u64) -> Self {
        Self {
            resources,
            object_capacity,
            pinned: BTreeSet::new(),
            history: None,
        }
    }

    /// Keeps `package` resident across every pass.
    pub fn pin(&mut self, package: impl Into<String>) {
        self.pinned.insert(package.into());
    }
}

impl Collector for ResidencyCollector {
    fn run_pass(
        &mut self,
        kind: CollectionKind,
        keep_alive: &KeepAliveSet,
        with_history: bool,
    ) -> CollectionStats {
        let started = Instant::now();
        let resident = self.resources.resident_packages();
        let objects_before = resident.len() as u64;
        let memory_before = self.resources.resident_bytes();

        let mut history = AHashMap::new();
        let mut evicted = 0usize;
        for package in resident {
            if self.pinned.contains(&package) {
                history.insert(package.clone(), vec!["<pinned root>".to_owned(), package]);
            } else if keep_alive.contains(&package) {
                history.insert(package.clone(), vec!["<keep-alive set>".to_owned(), package]);
            } else if self.resources.evict(&package) {
                evicted += 1;
            }
        }
        self.history = with_history.then_some(history);

        let stats = CollectionStats {
            duration: started.elapsed(),
            objects_before,
            objects_after: self.resources.resident_packages().len() as u64,
            memory_before,
            memory_after: self.resources.resident_bytes(),
        };
        log::debug!(
            "ResidencyCollector: {:?} pass evicted {} packages ({} bytes) in {:?}",
            kind,
            evicted,
            stats.memory_freed(),
            stats.duration
        );
        stats
    }

    fn live_object_count(&self) -> u64 {
        self.resources.resident_packages().len() as u64
    }

    fn object_capacity(&self) -> u64 {
        self.object_capacity
    }

    fn object_histogram(&self) -> Vec<ObjectClassCount> {
        let resident = self.resources.resident_packages();
        let pinned = resident.iter().filter(|p| self.pinned.contains(*p)).count() as u64;
        let mut histogram = vec![
            ObjectClassCount {
                class_name: "Package".to_owned(),
                count: resident.len() as u64 - pinned,
            },
            ObjectClassCount {
                class_name: "PinnedPackage".to_owned(),
                count: pinned,
            },
        ];
        histogram.retain(|row| row.count > 0);
        histogram.sort_by(|a, b| b.count.cmp(&a.count));
        histogram
    }

    fn reference_chain(&self, package: &str) -> Option<Vec<String>> {
        self.history.as_ref()?.get(package).cloned()
    }
}
