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

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use kiln_agents::{CookScheduler, SchedulerCapabilities, SchedulerContext};
use kiln_core::gc::CollectionKind;
use kiln_core::io::{InlineDispatcher, ResourceManager};
use kiln_core::memory::{mb_to_bytes, MemorySnapshot, MemoryStats};
use kiln_core::package::Urgency;
use kiln_core::KilnConfig;
use kiln_infra::{
    FilePackageLoader, FileResourceManager, ManifestDependencyRegistry, ManifestEntry,
    ResidencyCollector,
};
use kiln_telemetry::{MetricId, MetricsRegistry};

// --- TEST FIXTURES ---

struct FixedMemory(Mutex<MemorySnapshot>);

impl FixedMemory {
    fn new(used_mb: u64, available_mb: u64) -> Self {
        Self(Mutex::new(snapshot(used_mb, available_mb)))
    }

    fn set(&self, used_mb: u64, available_mb: u64) {
        *self.0.lock().unwrap() = snapshot(used_mb, available_mb);
    }
}

impl MemoryStats for FixedMemory {
    fn snapshot(&self) -> MemorySnapshot {
        *self.0.lock().unwrap()
    }
}

fn snapshot(used_mb: u64, available_mb: u64) -> MemorySnapshot {
    MemorySnapshot {
        available_physical: mb_to_bytes(available_mb),
        available_virtual: mb_to_bytes(available_mb),
        used_physical: mb_to_bytes(used_mb),
        used_virtual: mb_to_bytes(used_mb),
        total_physical: mb_to_bytes(16 * 1024),
        total_virtual: mb_to_bytes(16 * 1024),
        ..Default::default()
    }
}

struct Cook {
    _dir: tempfile::TempDir,
    resources: Arc<FileResourceManager>,
    memory: Arc<FixedMemory>,
    metrics: MetricsRegistry,
    scheduler: CookScheduler,
    ctx: SchedulerContext,
}

/// Writes one file per `(name, imports)` entry and wires a scheduler over them.
/// Names listed in `missing` get a manifest entry but no file.
fn cook(
    packages: &[(&str, &[&str])],
    missing: &[&str],
    pinned: &[&str],
    config: KilnConfig,
) -> Cook {
    let dir = tempfile::tempdir().unwrap();
    let mut entries = Vec::new();
    for (name, imports) in packages {
        let file = format!("{}.pkg", name.to_lowercase());
        if !missing.contains(name) {
            std::fs::write(dir.path().join(&file), name.as_bytes()).unwrap();
        }
        entries.push(ManifestEntry {
            name: name.to_string(),
            path: Path::new(&file).to_path_buf(),
            imports: imports.iter().map(|i| i.to_string()).collect(),
        });
    }

    let resources = Arc::new(FileResourceManager::new(dir.path()));
    let memory = Arc::new(FixedMemory::new(1024, 8 * 1024));
    let mut collector = ResidencyCollector::new(resources.clone(), 0);
    for package in pinned {
        collector.pin(*package);
        resources.mark_resident(package, 64);
    }
    let shared: Arc<dyn ResourceManager> = resources.clone();
    let caps = SchedulerCapabilities {
        registry: Arc::new(ManifestDependencyRegistry::from_entries(entries)),
        resources: shared,
        dispatcher: Arc::new(InlineDispatcher),
        memory: memory.clone(),
    };
    let metrics = MetricsRegistry::new();
    let scheduler = CookScheduler::new(
        caps,
        Box::new(collector),
        Box::new(FilePackageLoader::new(resources.clone())),
        config.scheduler.clone(),
        &metrics,
    )
    .unwrap();
    let ctx = SchedulerContext::new(&config, Instant::now());

    Cook {
        _dir: dir,
        resources,
        memory,
        metrics,
        scheduler,
        ctx,
    }
}

impl Cook {
    fn counter(&self, name: &str) -> u64 {
        self.metrics
            .get_metric(&MetricId::new("scheduler", name))
            .unwrap()
            .value
            .as_counter()
            .unwrap()
    }

    fn run_until_drained(&mut self) -> Vec<kiln_agents::TickReport> {
        let mut reports = Vec::new();
        for _ in 0..100 {
            let report = self.scheduler.tick(&mut self.ctx);
            assert!(!report.stalled, "scheduler stalled: {report:?}");
            reports.push(report);
            if self.ctx.is_drained() {
                return reports;
            }
        }
        panic!("load queue never drained");
    }
}

fn gc_disabled() -> KilnConfig {
    let mut config = KilnConfig::default();
    config.gc.memory_pressure_trigger = None;
    config
}

// --- TESTS ---

#[test]
fn test_tick_loads_root_and_imports_until_drained() {
    // --- 1. ARRANGE ---
    let mut cook = cook(
        &[
            ("Map", &["Rock", "Tree"]),
            ("Rock", &[]),
            ("Tree", &["Leaf"]),
            ("Leaf", &[]),
        ],
        &[],
        &[],
        gc_disabled(),
    );
    cook.scheduler
        .request(&mut cook.ctx, "Map", Urgency::Normal)
        .unwrap();

    // --- 2. ACT ---
    let reports = cook.run_until_drained();

    // --- 3. ASSERT ---
    assert_eq!(reports.iter().map(|r| r.progress).sum::<u64>(), 1);
    assert!(reports.iter().all(|r| r.collection.is_none()));
    assert_eq!(
        cook.resources.resident_packages(),
        vec!["Leaf", "Map", "Rock", "Tree"]
    );
    assert_eq!(cook.resources.pending_handles(), 0, "every warmed handle is consumed");
    assert_eq!(cook.counter("packages_loaded"), 4);
    assert_eq!(cook.counter("preloads_kicked"), 4);
    assert_eq!(cook.ctx.queue.stage_counts().preloaders, 0);
}

#[test]
fn test_loads_per_tick_caps_load_attempts() {
    // --- 1. ARRANGE ---
    let mut config = gc_disabled();
    config.scheduler.loads_per_tick = 2;
    let mut cook = cook(
        &[("A", &[]), ("B", &[]), ("C", &[]), ("D", &[]), ("E", &[])],
        &[],
        &[],
        config,
    );
    for name in ["A", "B", "C", "D", "E"] {
        cook.scheduler
            .request(&mut cook.ctx, name, Urgency::Normal)
            .unwrap();
    }

    // --- 2. ACT ---
    let reports = cook.run_until_drained();

    // --- 3. ASSERT ---
    let progress: Vec<u64> = reports.iter().map(|r| r.progress).collect();
    assert_eq!(progress, vec![2, 2, 1]);
    assert_eq!(cook.counter("packages_loaded"), 5);
}

#[test]
fn test_missing_package_file_is_logged_and_skipped() {
    // --- 1. ARRANGE ---
    let mut cook = cook(&[("Ghost", &[]), ("Real", &[])], &["Ghost"], &[], gc_disabled());
    cook.scheduler
        .request(&mut cook.ctx, "Ghost", Urgency::Normal)
        .unwrap();
    cook.scheduler
        .request(&mut cook.ctx, "Real", Urgency::Normal)
        .unwrap();

    // --- 2. ACT ---
    cook.run_until_drained();

    // --- 3. ASSERT ---
    assert_eq!(cook.counter("load_failures"), 1);
    assert_eq!(cook.counter("packages_loaded"), 1);
    assert_eq!(cook.resources.resident_packages(), vec!["Real"]);
}

#[test]
fn test_zero_loads_per_tick_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let resources = Arc::new(FileResourceManager::new(dir.path()));
    let shared: Arc<dyn ResourceManager> = resources.clone();
    let caps = SchedulerCapabilities {
        registry: Arc::new(ManifestDependencyRegistry::from_entries(Vec::new())),
        resources: shared,
        dispatcher: Arc::new(InlineDispatcher),
        memory: Arc::new(FixedMemory::new(1024, 8 * 1024)),
    };
    let mut config = KilnConfig::default().scheduler;
    config.loads_per_tick = 0;

    let result = CookScheduler::new(
        caps,
        Box::new(ResidencyCollector::new(resources.clone(), 0)),
        Box::new(FilePackageLoader::new(resources)),
        config,
        &MetricsRegistry::new(),
    );

    let err = result.err().expect("a zero load budget can never make progress");
    assert!(err.to_string().contains("loads_per_tick"));
}

#[test]
fn test_unknown_package_request_is_rejected() {
    let mut cook = cook(&[("A", &[])], &[], &[], gc_disabled());
    let err = cook
        .scheduler
        .request(&mut cook.ctx, "Nope", Urgency::High)
        .unwrap_err();
    assert!(err.to_string().contains("Nope"));
    assert!(cook.ctx.is_drained());
}

#[test]
fn test_cancel_releases_pending_preloads() {
    // --- 1. ARRANGE ---
    let mut cook = cook(&[("A", &["B"]), ("B", &[])], &[], &[], gc_disabled());
    cook.scheduler
        .request(&mut cook.ctx, "A", Urgency::Normal)
        .unwrap();

    // --- 2. ACT ---
    cook.scheduler.cancel(&mut cook.ctx, "A");
    let report = cook.scheduler.tick(&mut cook.ctx);

    // --- 3. ASSERT ---
    assert_eq!(report.progress, 0);
    assert!(!report.stalled);
    assert!(cook.ctx.is_drained());
    assert_eq!(report.stages.preloaders, 0);
    assert!(cook.resources.resident_packages().is_empty());
}

#[test]
fn test_packages_between_gc_runs_full_collection() {
    // --- 1. ARRANGE ---
    let mut config = gc_disabled();
    config.gc.packages_between_gc = 1;
    let mut cook = cook(&[("A", &[])], &[], &[], config);
    cook.scheduler
        .request(&mut cook.ctx, "A", Urgency::Normal)
        .unwrap();

    // --- 2. ACT ---
    let report = cook.scheduler.tick(&mut cook.ctx);

    // --- 3. ASSERT ---
    assert_eq!(report.progress, 1);
    assert_eq!(report.collection, Some(CollectionKind::Full));
    assert!(!report.follow_up);
    assert!(cook.resources.resident_packages().is_empty(), "A left the pipeline and was collected");
    assert_eq!(cook.counter("full_collections"), 1);
    assert_eq!(cook.ctx.trigger.packages_since_gc(), 0);
    assert!(!cook.ctx.trigger.is_gc_in_progress());
}

#[test]
fn test_collection_keeps_packages_in_the_pipeline() {
    // --- 1. ARRANGE ---
    let mut config = gc_disabled();
    config.gc.packages_between_gc = 1;
    let mut cook = cook(&[("A", &[]), ("Saved", &[])], &[], &[], config);
    cook.resources.mark_resident("Saved", 10);
    cook.ctx.pipeline.saving.insert("Saved".to_owned());
    cook.scheduler
        .request(&mut cook.ctx, "A", Urgency::Normal)
        .unwrap();

    // --- 2. ACT ---
    let report = cook.scheduler.tick(&mut cook.ctx);

    // --- 3. ASSERT ---
    assert_eq!(report.collection, Some(CollectionKind::Full));
    assert_eq!(cook.resources.resident_packages(), vec!["Saved"]);
}

#[test]
fn test_full_collection_keeps_imports_of_packages_still_loading() {
    // --- 1. ARRANGE ---
    let mut config = gc_disabled();
    config.gc.packages_between_gc = 1;
    config.scheduler.loads_per_tick = 1;
    let mut cook = cook(
        &[("A", &["Shared"]), ("C", &["Shared"]), ("Shared", &[])],
        &[],
        &[],
        config,
    );
    // Already resident, so neither root requests a load of it.
    cook.resources.mark_resident("Shared", 8);
    for name in ["A", "C"] {
        cook.scheduler
            .request(&mut cook.ctx, name, Urgency::Normal)
            .unwrap();
    }

    // --- 2. ACT ---
    let first = cook.scheduler.tick(&mut cook.ctx);

    // --- 3. ASSERT ---
    assert_eq!(first.progress, 1);
    assert_eq!(first.collection, Some(CollectionKind::Full));
    assert_eq!(cook.ctx.pipeline.loading.len(), 1, "one root is still loading");
    assert_eq!(
        cook.resources.resident_packages(),
        vec!["Shared"],
        "the loaded root is collected, its still-needed import is not"
    );

    let second = cook.scheduler.tick(&mut cook.ctx);
    assert_eq!(second.progress, 1);
    assert!(cook.ctx.is_drained());
    assert_eq!(cook.counter("packages_loaded"), 2);
    assert_eq!(cook.counter("load_failures"), 0);
}

#[test]
fn test_out_of_memory_collection_emits_diagnostic_report() {
    // --- 1. ARRANGE ---
    let mut config = gc_disabled();
    config.gc.min_free_physical_mb = 1024;
    let mut cook = cook(&[("A", &[])], &[], &["Stuck"], config);
    let start = Instant::now();

    // A healthy tick first so the used-memory history has a spread.
    let calm = cook.scheduler.tick_at(&mut cook.ctx, start);
    assert_eq!(calm.collection, None);

    // --- 2. ACT ---
    cook.memory.set(3 * 1024, 512);
    let report = cook
        .scheduler
        .tick_at(&mut cook.ctx, start + Duration::from_secs(1));

    // --- 3. ASSERT ---
    assert_eq!(report.collection, Some(CollectionKind::Full));
    assert!(report.follow_up, "too little was freed, history pass expected");
    assert_eq!(cook.counter("full_collections"), 2);

    let reports = cook.scheduler.diagnostic_reports();
    assert_eq!(reports.len(), 1);
    let retained = &reports[0].retained;
    assert_eq!(retained.len(), 1);
    assert_eq!(retained[0].name, "Stuck");
    assert_eq!(
        retained[0].reference_chain,
        Some(vec!["<pinned root>".to_owned(), "Stuck".to_owned()])
    );
    assert!(reports[0].to_json().unwrap().contains("Stuck"));
}

#[test]
fn test_memory_trigger_respects_cooldown() {
    // --- 1. ARRANGE ---
    let mut config = gc_disabled();
    config.gc.min_free_physical_mb = 1024;
    config.gc.gc_cooldown_secs = 60.0;
    let mut cook = cook(&[("A", &[])], &[], &[], config);
    cook.memory.set(4 * 1024, 512);
    let start = Instant::now();

    // --- 2. ACT ---
    let first = cook.scheduler.tick_at(&mut cook.ctx, start);
    let during = cook
        .scheduler
        .tick_at(&mut cook.ctx, start + Duration::from_secs(10));
    let after = cook
        .scheduler
        .tick_at(&mut cook.ctx, start + Duration::from_secs(61));

    // --- 3. ASSERT ---
    assert_eq!(first.collection, Some(CollectionKind::Full));
    assert_eq!(during.collection, None);
    assert_eq!(after.collection, Some(CollectionKind::Full));
}
