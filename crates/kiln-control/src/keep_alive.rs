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

//! Keep-alive set computation for collection passes.

use std::collections::{BTreeSet, VecDeque};

use kiln_core::gc::{CollectionKind, KeepAliveSet};
use kiln_core::io::ResourceManager;
use kiln_core::registry::DependencyRegistry;

/// Packages the cook pipeline is working on, by name.
#[derive(Debug, Clone, Default)]
pub struct PipelinePackages {
    /// Packages requested but not yet in load state.
    pub requested: BTreeSet<String>,
    /// Packages in load state.
    pub loading: BTreeSet<String>,
    /// Packages being saved.
    pub saving: BTreeSet<String>,
}

impl PipelinePackages {
    /// Every pipeline package, deduplicated, in name order.
    pub fn all(&self) -> BTreeSet<&str> {
        self.requested
            .iter()
            .chain(&self.loading)
            .chain(&self.saving)
            .map(String::as_str)
            .collect()
    }
}

/// What one collection pass must keep, and what it is expected to free.
#[derive(Debug, Clone)]
pub struct KeepAlivePlan {
    /// The pass kind the plan was computed for.
    pub kind: CollectionKind,
    /// Packages the pass must not reclaim.
    pub keep_alive: KeepAliveSet,
    /// Resident packages outside the keep-alive set. Only soft passes record these.
    pub expected_freed: Vec<String>,
}

/// Computes the keep-alive set for a pass of `kind`.
///
/// Every pass keeps the pipeline packages and their transitive hard
/// dependencies, since a package still in load state may rely on an import
/// that was already resident when its imports were gathered. A soft pass also
/// records the remaining resident packages as expected to be freed.
pub fn plan_keep_alive(
    kind: CollectionKind,
    pipeline: &PipelinePackages,
    registry: &dyn DependencyRegistry,
    resources: &dyn ResourceManager,
) -> KeepAlivePlan {
    let mut keep_alive = KeepAliveSet::new();
    let roots = pipeline.all();
    for &package in &roots {
        keep_alive.insert(package);
    }

    let mut frontier: VecDeque<String> = roots.iter().map(|p| p.to_string()).collect();
    while let Some(package) = frontier.pop_front() {
        for dependency in registry.hard_dependencies(&package) {
            if keep_alive.insert(dependency.as_str()) {
                frontier.push_back(dependency);
            }
        }
    }

    let mut expected_freed = Vec::new();
    if kind == CollectionKind::Soft {
        expected_freed = resources
            .resident_packages()
            .into_iter()
            .filter(|package| !keep_alive.contains(package))
            .collect();
        expected_freed.sort();
    }

    log::debug!(
        "GcTrigger: {:?} pass keeps {} packages alive, expects {} to be freed",
        kind,
        keep_alive.len(),
        expected_freed.len()
    );
    KeepAlivePlan {
        kind,
        keep_alive,
        expected_freed,
    }
}

/// Packages the plan expected to be freed that are still resident.
pub fn still_resident(plan: &KeepAlivePlan, resources: &dyn ResourceManager) -> Vec<String> {
    plan.expected_freed
        .iter()
        .filter(|package| resources.is_resident(package))
        .cloned()
        .collect()
}
