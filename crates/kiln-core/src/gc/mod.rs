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

//! The garbage-collection capability consumed by the trigger controller.
//!
//! The collector's mark/sweep mechanics are opaque here. The scheduler only
//! decides *when* to collect and *what must survive*, then asks the collector
//! to run a pass restricted by a [`KeepAliveSet`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The kind of collection pass to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    /// A partial pass that only reclaims packages outside the keep-alive set.
    Soft,
    /// A full reachability pass.
    Full,
}

/// Packages a collection pass must not reclaim, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeepAliveSet {
    packages: BTreeSet<Arc<str>>,
}

impl KeepAliveSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `package`, returning `true` if it was not present yet.
    pub fn insert(&mut self, package: impl Into<Arc<str>>) -> bool {
        self.packages.insert(package.into())
    }

    /// Returns `true` if `package` must be kept.
    pub fn contains(&self, package: &str) -> bool {
        self.packages.contains(package)
    }

    /// The number of packages kept alive.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Returns `true` if nothing is kept alive.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Iterates the kept packages in name order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(|name| name.as_ref())
    }
}

/// What a collection pass observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionStats {
    /// Wall-clock duration of the pass.
    pub duration: Duration,
    /// Live objects before the pass.
    pub objects_before: u64,
    /// Live objects after the pass.
    pub objects_after: u64,
    /// Used memory before the pass, in bytes.
    pub memory_before: u64,
    /// Used memory after the pass, in bytes.
    pub memory_after: u64,
}

impl CollectionStats {
    /// Bytes reclaimed by the pass.
    pub fn memory_freed(&self) -> u64 {
        self.memory_before.saturating_sub(self.memory_after)
    }

    /// Objects reclaimed by the pass.
    pub fn objects_freed(&self) -> u64 {
        self.objects_before.saturating_sub(self.objects_after)
    }
}

/// One row of an object-count histogram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectClassCount {
    /// The object class name.
    pub class_name: String,
    /// How many live objects of that class exist.
    pub count: u64,
}

/// Runs collection passes and answers diagnostic queries about the object graph.
pub trait Collector: Send {
    /// Runs one collection pass that must not reclaim anything in `keep_alive`.
    ///
    /// `with_history` asks the collector to record a reference-history snapshot
    /// during the pass, which is more expensive but allows
    /// [`reference_chain`](Self::reference_chain) to answer afterwards.
    fn run_pass(
        &mut self,
        kind: CollectionKind,
        keep_alive: &KeepAliveSet,
        with_history: bool,
    ) -> CollectionStats;

    /// The number of live objects in the object table.
    fn live_object_count(&self) -> u64;

    /// The capacity of the object table. `0` means unbounded.
    fn object_capacity(&self) -> u64 {
        0
    }

    /// The live-object histogram, largest classes first.
    fn object_histogram(&self) -> Vec<ObjectClassCount> {
        Vec::new()
    }

    /// The chain of referencers keeping `package` alive, root first, if known.
    fn reference_chain(&self, _package: &str) -> Option<Vec<String>> {
        None
    }
}
