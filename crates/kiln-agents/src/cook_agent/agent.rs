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

//! The scheduler tick.
//!
//! One tick runs, in order:
//!
//! 1. the preload pumps, until none of them makes progress;
//! 2. up to `loads_per_tick` loads of packages that are ready for load;
//! 3. the GC trigger, and the collection it asks for, if any.

use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use kiln_control::{plan_keep_alive, CollectionOutcome, CollectionResults, GcDiagnosticReport};
use kiln_core::config::SchedulerConfig;
use kiln_core::gc::{CollectionKind, Collector};
use kiln_core::io::{IoDispatcher, ResourceManager};
use kiln_core::loader::PackageLoader;
use kiln_core::memory::MemoryStats;
use kiln_core::package::{PackageId, PackageTable, Urgency};
use kiln_core::registry::DependencyRegistry;
use kiln_lanes::preload_lane::{PreloadEnv, StageCounts};
use kiln_telemetry::{MetricsRegistry, ScopedMetricTimer};

use super::context::SchedulerContext;
use super::metrics::SchedulerMetrics;

/// The shared external capabilities the scheduler consumes.
#[derive(Clone)]
pub struct SchedulerCapabilities {
    /// Hard dependencies and package paths.
    pub registry: Arc<dyn DependencyRegistry>,
    /// File access, handle hand-off and residency.
    pub resources: Arc<dyn ResourceManager>,
    /// Runs preload I/O.
    pub dispatcher: Arc<dyn IoDispatcher>,
    /// Memory sampling for the GC trigger.
    pub memory: Arc<dyn MemoryStats>,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Load attempts made this tick.
    pub progress: u64,
    /// Pump rounds run.
    pub pump_rounds: usize,
    /// The collection run this tick, if any.
    pub collection: Option<CollectionKind>,
    /// A diagnostic full pass with history followed the collection.
    pub follow_up: bool,
    /// Nothing moved, nothing is in flight and packages are still waiting.
    pub stalled: bool,
    /// Stage sizes at the end of the tick.
    pub stages: StageCounts,
}

/// Drives the preload lane, the loader and the GC trigger, one tick at a time.
pub struct CookScheduler {
    caps: SchedulerCapabilities,
    collector: Box<dyn Collector>,
    loader: Box<dyn PackageLoader>,
    config: SchedulerConfig,
    metrics: SchedulerMetrics,
    reports: Vec<GcDiagnosticReport>,
}

impl CookScheduler {
    /// Creates a scheduler and registers its metrics in `metrics`.
    ///
    /// # Errors
    /// Fails if `config` has a zero tick budget or the metrics clash with
    /// already registered ones.
    pub fn new(
        caps: SchedulerCapabilities,
        collector: Box<dyn Collector>,
        loader: Box<dyn PackageLoader>,
        config: SchedulerConfig,
        metrics: &MetricsRegistry,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            caps,
            collector,
            loader,
            config,
            metrics: SchedulerMetrics::register(metrics)?,
            reports: Vec::new(),
        })
    }

    /// The metric handles this scheduler records into.
    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }

    /// Diagnostic reports emitted by out-of-memory collections so far.
    pub fn diagnostic_reports(&self) -> &[GcDiagnosticReport] {
        &self.reports
    }

    /// Puts the package named `name` into load state.
    ///
    /// # Errors
    /// Fails if the registry does not know the package.
    pub fn request(
        &self,
        ctx: &mut SchedulerContext,
        name: &str,
        urgency: Urgency,
    ) -> anyhow::Result<PackageId> {
        let path = self
            .caps
            .registry
            .package_path(name)
            .ok_or_else(|| anyhow!("package '{name}' is not in the dependency registry"))?;
        let package = ctx.packages.intern(name, path);
        ctx.queue.enqueue(package, urgency);
        Ok(package)
    }

    /// Removes `name` from load state, cancelling preloads only it needed.
    pub fn cancel(&self, ctx: &mut SchedulerContext, name: &str) {
        let Some(package) = ctx.packages.lookup(name) else {
            return;
        };
        let env = self.env(&mut ctx.packages);
        ctx.queue.leave_load_state(package, &env);
    }

    /// Runs one tick at the current time.
    pub fn tick(&mut self, ctx: &mut SchedulerContext) -> TickReport {
        self.tick_at(ctx, Instant::now())
    }

    /// Runs one tick, using `now` for the GC trigger's clocks.
    pub fn tick_at(&mut self, ctx: &mut SchedulerContext, now: Instant) -> TickReport {
        let tick_ms = self.metrics.tick_ms.clone();
        let _timer = ScopedMetricTimer::new(&tick_ms);

        let (pump_rounds, pumped) = self.pump(ctx);
        let progress = self.load_ready(ctx);
        ctx.trigger.record_progress(progress);
        let (collection, follow_up) = self.collect_if_needed(ctx, now);

        let stalled = !pumped
            && progress == 0
            && collection.is_none()
            && !ctx.queue.has_outstanding_io()
            && !ctx.queue.is_empty();
        if stalled {
            log::warn!(
                "CookScheduler: no forward progress with {} packages in load state",
                ctx.queue.stage_counts().load_state
            );
        }

        TickReport {
            progress,
            pump_rounds,
            collection,
            follow_up,
            stalled,
            stages: ctx.queue.stage_counts(),
        }
    }

    fn env<'a>(&'a self, packages: &'a mut PackageTable) -> PreloadEnv<'a> {
        PreloadEnv {
            packages,
            registry: &*self.caps.registry,
            resources: &self.caps.resources,
            dispatcher: &*self.caps.dispatcher,
        }
    }

    fn pump(&self, ctx: &mut SchedulerContext) -> (usize, bool) {
        let SchedulerContext { packages, queue, .. } = ctx;
        let mut env = self.env(packages);

        let mut rounds = 0;
        let mut kicked = 0;
        let mut any = false;
        while rounds < self.config.max_pump_iterations {
            rounds += 1;
            let mut progress = queue.pump_try_start_inbox_package(&mut env);
            if queue.pump_try_kick_preload(&env) {
                kicked += 1;
                progress = true;
            }
            progress |= queue.pump_loads_is_ready_to_leave_preload(&env);
            if !progress {
                break;
            }
            any = true;
        }
        if rounds == self.config.max_pump_iterations {
            log::debug!("CookScheduler: pump limit of {rounds} rounds reached");
        }

        SchedulerMetrics::count(&self.metrics.preloads_kicked, kicked);
        self.metrics.set_in_flight(queue.in_flight_preloads());
        (rounds, any)
    }

    fn load_ready(&mut self, ctx: &mut SchedulerContext) -> u64 {
        let mut attempts = 0;
        while attempts < self.config.loads_per_tick as u64 {
            let Some(package) = ctx.queue.pop_ready_for_load() else {
                break;
            };
            self.load_with_imports(ctx, package);

            let env = self.env(&mut ctx.packages);
            ctx.queue.mark_load_attempt_complete(package, &env);
            ctx.queue.leave_load_state(package, &env);
            attempts += 1;
        }
        attempts
    }

    /// Loads `package` and every unloaded import it requested, leaves first,
    /// consuming the warmed handles the preloads registered.
    fn load_with_imports(&mut self, ctx: &SchedulerContext, package: PackageId) {
        let mut order: Vec<(u64, PackageId)> = match ctx.queue.preloader(package) {
            Some(preloader) => preloader
                .requested_loads()
                .iter()
                .map(|&id| {
                    let requested = &ctx.queue.arena()[id];
                    (requested.rank().unwrap_or(u64::MAX), requested.package())
                })
                .collect(),
            None => vec![(u64::MAX, package)],
        };
        order.sort_unstable();

        for (_, id) in order {
            let identity = ctx.packages.identity(id);
            if self.caps.resources.is_resident(identity.name()) {
                continue;
            }
            let handle = self.caps.resources.take_preloaded_handle(identity.path());
            match self.loader.load_package(identity, handle) {
                Ok(()) => SchedulerMetrics::count(&self.metrics.packages_loaded, 1),
                Err(e) => {
                    log::warn!("CookScheduler: failed to load '{}': {}", identity.name(), e);
                    SchedulerMetrics::count(&self.metrics.load_failures, 1);
                }
            }
        }
    }

    fn collect_if_needed(
        &mut self,
        ctx: &mut SchedulerContext,
        now: Instant,
    ) -> (Option<CollectionKind>, bool) {
        let snapshot = self.caps.memory.snapshot();
        ctx.trigger.validate_against(&snapshot);
        let decision = ctx.trigger.evaluate(
            &snapshot,
            self.collector.live_object_count(),
            self.collector.object_capacity(),
            now,
        );
        let Some(kind) = decision.kind() else {
            return (None, false);
        };

        ctx.refresh_loading();
        let outcome = self.run_collection(ctx, kind, false, now);
        if outcome.follow_up {
            log::info!("CookScheduler: running a diagnostic full collection with history");
            self.run_collection(ctx, CollectionKind::Full, true, now);
        }
        ctx.trigger.on_evaluate_results_complete();
        (Some(kind), outcome.follow_up)
    }

    fn run_collection(
        &mut self,
        ctx: &mut SchedulerContext,
        kind: CollectionKind,
        with_history: bool,
        now: Instant,
    ) -> CollectionOutcome {
        let plan = plan_keep_alive(
            kind,
            &ctx.pipeline,
            &*self.caps.registry,
            &*self.caps.resources,
        );

        ctx.trigger.on_start_collect_garbage(kind, with_history);
        let stats = {
            let _timer = ScopedMetricTimer::new(&self.metrics.collection_ms);
            self.collector.run_pass(kind, &plan.keep_alive, with_history)
        };
        ctx.trigger.on_end_collect_garbage();
        self.metrics.count_collection(kind);

        let memory_after = self.caps.memory.snapshot();
        let results = CollectionResults {
            stats: &stats,
            memory_after: &memory_after,
            plan: &plan,
            resources: &*self.caps.resources,
            collector: &*self.collector,
        };
        let mut outcome = ctx
            .trigger
            .evaluate_garbage_collection_results(&results, now);
        if let Some(report) = outcome.report.take() {
            self.reports.push(report);
        }
        outcome
    }
}
