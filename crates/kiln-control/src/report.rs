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

//! Diagnostic report for collections that failed to relieve memory pressure.

use kiln_core::gc::{CollectionKind, CollectionStats, ObjectClassCount};
use kiln_core::memory::MemorySnapshot;
use serde::Serialize;

use crate::analysis::TriggerSignals;

/// A package that survived a pass expected to free it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetainedPackage {
    /// The package name.
    pub name: String,
    /// Referencers keeping it alive, root first, when the pass recorded history.
    pub reference_chain: Option<Vec<String>>,
}

/// Everything known about an out-of-memory collection that freed too little.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GcDiagnosticReport {
    /// The pass kind.
    pub kind: CollectionKind,
    /// The signals that triggered the collection cycle.
    pub signals: TriggerSignals,
    /// Pass statistics.
    pub stats: CollectionStats,
    /// Memory after the pass.
    pub memory_after: MemorySnapshot,
    /// Spread of recent used-memory samples the pass was measured against.
    pub used_memory_spread: u64,
    /// Largest object classes after the pass.
    pub object_histogram: Vec<ObjectClassCount>,
    /// Packages that should have been freed but were not.
    pub retained: Vec<RetainedPackage>,
}

impl GcDiagnosticReport {
    /// Renders the report as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Logs a human-readable summary at warning level.
    pub fn log_summary(&self) {
        log::warn!(
            "GcTrigger: {:?} collection freed {} MB (recent spread {} MB) after {:?}",
            self.kind,
            self.stats.memory_freed() / kiln_core::memory::BYTES_PER_MB,
            self.used_memory_spread / kiln_core::memory::BYTES_PER_MB,
            self.stats.duration
        );
        for class in self.object_histogram.iter().take(10) {
            log::warn!("GcTrigger:   {:>10} {}", class.count, class.class_name);
        }
        for retained in &self.retained {
            match &retained.reference_chain {
                Some(chain) => log::warn!(
                    "GcTrigger:   '{}' retained via {}",
                    retained.name,
                    chain.join(" -> ")
                ),
                None => log::warn!("GcTrigger:   '{}' retained (no reference history)", retained.name),
            }
        }
    }
}
