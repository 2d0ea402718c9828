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

//! The garbage-collection trigger controller.
//!
//! One collection cycle runs through:
//!
//! ```text
//! evaluate -> on_start_collect_garbage -> (pass) -> on_end_collect_garbage
//!          -> evaluate_garbage_collection_results -> [follow-up pass]
//!          -> on_evaluate_results_complete
//! ```
//!
//! The controller owns every piece of cross-tick state (histories, cooldown,
//! soft-GC target, diagnostic requests); nothing lives in globals.

use std::time::Instant;

use kiln_core::config::GcTriggerConfig;
use kiln_core::gc::{CollectionKind, CollectionStats, Collector};
use kiln_core::io::ResourceManager;
use kiln_core::memory::{mb_to_bytes, MemorySnapshot};

use crate::analysis::{
    evaluate_signals, next_soft_gc_numerator, GcDecision, SignalInputs, TriggerSignals,
};
use crate::history::{SoftGcHistory, UsedMemoryHistory};
use crate::keep_alive::{still_resident, KeepAlivePlan};
use crate::report::{GcDiagnosticReport, RetainedPackage};

/// What a finished pass produced, handed to
/// [`GcTriggerController::evaluate_garbage_collection_results`].
pub struct CollectionResults<'a> {
    /// Statistics reported by the collector.
    pub stats: &'a CollectionStats,
    /// Memory sampled right after the pass.
    pub memory_after: &'a MemorySnapshot,
    /// The keep-alive plan the pass ran with.
    pub plan: &'a KeepAlivePlan,
    /// Residency queries.
    pub resources: &'a dyn ResourceManager,
    /// Diagnostic queries.
    pub collector: &'a dyn Collector,
}

/// Post-collection bookkeeping results.
#[derive(Debug, Default)]
pub struct CollectionOutcome {
    /// Emitted when an out-of-memory collection freed too little.
    pub report: Option<GcDiagnosticReport>,
    /// A follow-up full pass with reference history was requested.
    pub follow_up: bool,
    /// Packages expected to be freed that survived the pass.
    pub still_resident: Vec<String>,
}

/// Decides when and how to collect, and learns from each collection.
#[derive(Debug)]
pub struct GcTriggerController {
    config: GcTriggerConfig,
    soft_history: SoftGcHistory,
    used_memory: UsedMemoryHistory,
    soft_gc_numerator: u32,
    created_at: Instant,
    last_gc_end: Instant,
    last_soft_gc: Option<Instant>,
    last_full_gc: Option<Instant>,
    cooldown_logged_for: Option<Instant>,
    packages_since_gc: u64,
    budget_warned: bool,
    cycle_signals: TriggerSignals,

    gc_in_progress: bool,
    current_gc_has_history: bool,
    current_gc_is_full: bool,
    request_gc_with_history: bool,
    request_full_gc: bool,
}

impl GcTriggerController {
    /// Creates a controller whose clocks start at `now`.
    pub fn new(config: GcTriggerConfig, now: Instant) -> Self {
        Self {
            soft_history: SoftGcHistory::new(config.soft_gc_history_len),
            used_memory: UsedMemoryHistory::new(config.memory_history_len),
            soft_gc_numerator: config.soft_gc_start_numerator,
            created_at: now,
            last_gc_end: now,
            last_soft_gc: None,
            last_full_gc: None,
            cooldown_logged_for: None,
            packages_since_gc: 0,
            budget_warned: false,
            cycle_signals: TriggerSignals::default(),
            gc_in_progress: false,
            current_gc_has_history: false,
            current_gc_is_full: false,
            request_gc_with_history: false,
            request_full_gc: false,
            config,
        }
    }

    /// The trigger settings.
    pub fn config(&self) -> &GcTriggerConfig {
        &self.config
    }

    /// Durations of recent soft collections.
    pub fn soft_history(&self) -> &SoftGcHistory {
        &self.soft_history
    }

    /// The current soft-GC target numerator. `0` once every target is used up.
    pub fn soft_gc_numerator(&self) -> u32 {
        self.soft_gc_numerator
    }

    /// Units of forward progress since the last collection.
    pub fn packages_since_gc(&self) -> u64 {
        self.packages_since_gc
    }

    /// Returns `true` between `on_start_collect_garbage` and `on_evaluate_results_complete`.
    pub fn is_gc_in_progress(&self) -> bool {
        self.gc_in_progress
    }

    /// Returns `true` if the pass in flight is a full collection.
    pub fn current_gc_is_full(&self) -> bool {
        self.current_gc_is_full
    }

    /// Returns `true` if the pass in flight records reference history.
    pub fn current_gc_has_history(&self) -> bool {
        self.current_gc_has_history
    }

    /// Counts `units` of forward progress toward the packages-between-GC signal.
    pub fn record_progress(&mut self, units: u64) {
        self.packages_since_gc += units;
    }

    /// Warns (once) if a configured ceiling can never be reached on this machine.
    ///
    /// Returns `false` if some threshold is unreachable.
    pub fn validate_against(&mut self, snapshot: &MemorySnapshot) -> bool {
        let mut problems = Vec::new();
        let config = &self.config;
        if config.max_used_physical_mb > 0
            && snapshot.total_physical > 0
            && mb_to_bytes(config.max_used_physical_mb) > snapshot.total_physical
        {
            problems.push(format!(
                "max_used_physical_mb={} exceeds total physical memory ({} MB)",
                config.max_used_physical_mb,
                snapshot.total_physical / kiln_core::memory::BYTES_PER_MB
            ));
        }
        if config.max_used_virtual_mb > 0
            && snapshot.total_virtual > 0
            && mb_to_bytes(config.max_used_virtual_mb) > snapshot.total_virtual
        {
            problems.push(format!(
                "max_used_virtual_mb={} exceeds total virtual memory ({} MB)",
                config.max_used_virtual_mb,
                snapshot.total_virtual / kiln_core::memory::BYTES_PER_MB
            ));
        }
        if config.min_free_physical_mb > 0
            && snapshot.total_physical > 0
            && mb_to_bytes(config.min_free_physical_mb) >= snapshot.total_physical
        {
            problems.push(format!(
                "min_free_physical_mb={} is not below total physical memory",
                config.min_free_physical_mb
            ));
        }

        if !problems.is_empty() && !self.budget_warned {
            self.budget_warned = true;
            for problem in &problems {
                log::warn!("GcTrigger: {problem}; the trigger will never fire as configured");
            }
        }
        problems.is_empty()
    }

    /// Samples the trigger signals and decides whether to collect now.
    ///
    /// Memory-based triggers are suppressed for `gc_cooldown` after a full
    /// collection; the suppression is logged once per cooldown window.
    /// Every memory trigger inside the window is suppressed, not only the first.
    /// Time-budget soft triggers are exempt from the cooldown but honour the
    /// soft-GC minimum period.
    pub fn evaluate(
        &mut self,
        snapshot: &MemorySnapshot,
        live_objects: u64,
        object_capacity: u64,
        now: Instant,
    ) -> GcDecision {
        self.used_memory.push(snapshot.used_physical);
        if self.gc_in_progress {
            return GcDecision::None;
        }

        let inputs = SignalInputs {
            snapshot: *snapshot,
            live_objects,
            object_capacity,
            packages_since_gc: self.packages_since_gc,
            time_since_last_gc: now.saturating_duration_since(self.last_gc_end),
            average_soft_gc_secs: self.soft_history.average_secs(),
            soft_gc_numerator: self.soft_gc_numerator,
        };
        let signals = evaluate_signals(&self.config, &inputs);
        let policy = self.config.min_free_max_used_policy;

        let in_cooldown = self
            .last_full_gc
            .is_some_and(|last| now.saturating_duration_since(last) < self.config.gc_cooldown());
        let memory_full = signals.memory_limits(policy) || signals.pressure;

        if in_cooldown
            && (memory_full || signals.soft_numerator)
            && self.cooldown_logged_for != self.last_full_gc
        {
            self.cooldown_logged_for = self.last_full_gc;
            log::info!(
                "GcTrigger: memory trigger suppressed, within {:.0}s of the last full collection",
                self.config.gc_cooldown_secs
            );
        }

        let full = (memory_full && !in_cooldown) || signals.object_table || signals.packages_between_gc;

        let min_period = self.config.soft_gc_min_period();
        let period_elapsed = |since: Instant| now.saturating_duration_since(since) >= min_period;
        let numerator_soft = signals.soft_numerator
            && !in_cooldown
            && self.last_soft_gc.map_or(true, period_elapsed);
        let budget_soft = signals.soft_time_budget
            && period_elapsed(self.last_soft_gc.unwrap_or(self.created_at));

        let decision = if full {
            GcDecision::Full
        } else if numerator_soft || budget_soft {
            GcDecision::Soft
        } else {
            GcDecision::None
        };

        if decision != GcDecision::None {
            self.cycle_signals = signals;
            log::info!(
                "GcTrigger: {:?} collection triggered ({:.0} MB available, {} packages since last GC, signals {:?})",
                decision,
                snapshot.available_physical_mb(),
                self.packages_since_gc,
                signals
            );
        }
        decision
    }

    /// Marks the start of a collection pass.
    pub fn on_start_collect_garbage(&mut self, kind: CollectionKind, with_history: bool) {
        self.gc_in_progress = true;
        self.current_gc_is_full = kind == CollectionKind::Full;
        self.current_gc_has_history = with_history;
        log::debug!("GcTrigger: starting {kind:?} pass (history: {with_history})");
    }

    /// Asks for a follow-up pass that records reference history.
    ///
    /// Accepted only while a collection is in progress.
    pub fn request_gc_with_history(&mut self) -> bool {
        if !self.gc_in_progress {
            log::debug!("GcTrigger: history collection requested outside a collection, ignored");
            return false;
        }
        self.request_gc_with_history = true;
        true
    }

    /// Asks for a follow-up full pass.
    ///
    /// Accepted only while a collection is in progress.
    pub fn request_full_gc(&mut self) -> bool {
        if !self.gc_in_progress {
            log::debug!("GcTrigger: full collection requested outside a collection, ignored");
            return false;
        }
        self.request_full_gc = true;
        true
    }

    /// Marks the end of the pass itself. The cycle stays open until
    /// [`on_evaluate_results_complete`](Self::on_evaluate_results_complete).
    pub fn on_end_collect_garbage(&mut self) {
        log::debug!(
            "GcTrigger: {} pass finished",
            if self.current_gc_is_full { "full" } else { "soft" }
        );
    }

    /// Updates forecasts from a finished pass and decides on diagnostics.
    pub fn evaluate_garbage_collection_results(
        &mut self,
        results: &CollectionResults<'_>,
        now: Instant,
    ) -> CollectionOutcome {
        let kind = if self.current_gc_is_full {
            CollectionKind::Full
        } else {
            CollectionKind::Soft
        };
        let stats = results.stats;
        let after = results.memory_after;
        let policy = self.config.min_free_max_used_policy;

        match kind {
            CollectionKind::Soft => {
                self.soft_history.add(stats.duration);
                self.last_soft_gc = Some(now);
            }
            CollectionKind::Full => self.last_full_gc = Some(now),
        }
        self.last_gc_end = now;
        self.packages_since_gc = 0;

        if kind == CollectionKind::Soft && self.cycle_signals.soft_numerator {
            let next = next_soft_gc_numerator(
                self.soft_gc_numerator,
                self.config.soft_gc_denominator,
                after.total_physical,
                after.available_physical,
            );
            log::debug!(
                "GcTrigger: soft target numerator {} -> {}",
                self.soft_gc_numerator,
                next
            );
            self.soft_gc_numerator = next;
        }

        let still_resident = still_resident(results.plan, results.resources);
        for package in &still_resident {
            log::warn!("GcTrigger: '{package}' survived a soft collection that should have freed it");
        }

        if kind == CollectionKind::Soft {
            let inputs = SignalInputs {
                snapshot: *after,
                ..SignalInputs::default()
            };
            let after_signals = evaluate_signals(&self.config, &inputs);
            if after_signals.memory_limits(policy) || after_signals.pressure {
                log::info!("GcTrigger: soft collection did not relieve memory limits");
                self.request_full_gc();
            }
        }

        let mut report = None;
        let spread = self.used_memory.spread();
        let freed_too_little = (stats.memory_freed() as f64)
            < self.config.oom_report_fraction * spread as f64;
        if kind == CollectionKind::Full && self.cycle_signals.out_of_memory(policy) && freed_too_little {
            if self.current_gc_has_history {
                report = Some(self.build_report(results, spread));
            } else {
                log::info!(
                    "GcTrigger: full collection freed only {} bytes, collecting reference history",
                    stats.memory_freed()
                );
                self.request_gc_with_history();
            }
        }

        let follow_up =
            (self.request_full_gc || self.request_gc_with_history) && !self.current_gc_has_history;
        self.request_full_gc = false;
        self.request_gc_with_history = false;

        CollectionOutcome {
            report,
            follow_up,
            still_resident,
        }
    }

    fn build_report(&self, results: &CollectionResults<'_>, spread: u64) -> GcDiagnosticReport {
        let retained = results
            .resources
            .resident_packages()
            .into_iter()
            .filter(|package| !results.plan.keep_alive.contains(package))
            .map(|name| RetainedPackage {
                reference_chain: results.collector.reference_chain(&name),
                name,
            })
            .collect();
        let report = GcDiagnosticReport {
            kind: CollectionKind::Full,
            signals: self.cycle_signals,
            stats: *results.stats,
            memory_after: *results.memory_after,
            used_memory_spread: spread,
            object_histogram: results.collector.object_histogram(),
            retained,
        };
        report.log_summary();
        report
    }

    /// Closes the collection cycle.
    pub fn on_evaluate_results_complete(&mut self) {
        self.gc_in_progress = false;
        self.current_gc_is_full = false;
        self.current_gc_has_history = false;
        self.request_full_gc = false;
        self.request_gc_with_history = false;
        self.cycle_signals = TriggerSignals::default();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io::Read;
    use std::path::Path;
    use std::time::Duration;

    use kiln_core::gc::{KeepAliveSet, ObjectClassCount};
    use kiln_core::io::{IoError, PreloadHandle};
    use kiln_core::memory::{MemoryPressure, BYTES_PER_MB};

    use super::*;

    const GB: u64 = 1024 * BYTES_PER_MB;

    struct Resident(HashSet<String>);

    impl ResourceManager for Resident {
        fn open_for_read(&self, path: &Path) -> Result<Box<dyn Read + Send>, IoError> {
            Err(IoError::NotFound {
                path: path.to_path_buf(),
            })
        }

        fn register_preloaded_handle(&self, _path: &Path, _handle: PreloadHandle) -> bool {
            false
        }

        fn take_preloaded_handle(&self, _path: &Path) -> Option<PreloadHandle> {
            None
        }

        fn is_resident(&self, package: &str) -> bool {
            self.0.contains(package)
        }

        fn resident_packages(&self) -> Vec<String> {
            self.0.iter().cloned().collect()
        }

        fn async_load(&self, _package: &str, _handle: PreloadHandle) -> Result<(), IoError> {
            Ok(())
        }
    }

    struct Diagnostics;

    impl Collector for Diagnostics {
        fn run_pass(
            &mut self,
            _kind: CollectionKind,
            _keep_alive: &KeepAliveSet,
            _with_history: bool,
        ) -> CollectionStats {
            CollectionStats::default()
        }

        fn live_object_count(&self) -> u64 {
            0
        }

        fn object_histogram(&self) -> Vec<ObjectClassCount> {
            vec![ObjectClassCount {
                class_name: "Mesh".into(),
                count: 7,
            }]
        }

        fn reference_chain(&self, package: &str) -> Option<Vec<String>> {
            Some(vec!["Root".into(), package.into()])
        }
    }

    fn snapshot(available: u64) -> MemorySnapshot {
        MemorySnapshot {
            available_physical: available,
            available_virtual: available,
            used_physical: 16 * GB - available,
            used_virtual: 16 * GB - available,
            total_physical: 16 * GB,
            total_virtual: 16 * GB,
            pressure: MemoryPressure::Nominal,
        }
    }

    fn plan(kind: CollectionKind, expected_freed: &[&str]) -> KeepAlivePlan {
        KeepAlivePlan {
            kind,
            keep_alive: KeepAliveSet::new(),
            expected_freed: expected_freed.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Runs one pass of `kind` and evaluates it.
    fn run_pass(
        controller: &mut GcTriggerController,
        kind: CollectionKind,
        with_history: bool,
        freed: u64,
        after: &MemorySnapshot,
        resident: &Resident,
        now: Instant,
    ) -> CollectionOutcome {
        controller.on_start_collect_garbage(kind, with_history);
        controller.on_end_collect_garbage();
        let stats = CollectionStats {
            duration: Duration::from_millis(250),
            memory_before: after.used_physical + freed,
            memory_after: after.used_physical,
            ..CollectionStats::default()
        };
        let plan = plan(kind, &[]);
        let results = CollectionResults {
            stats: &stats,
            memory_after: after,
            plan: &plan,
            resources: resident,
            collector: &Diagnostics,
        };
        controller.evaluate_garbage_collection_results(&results, now)
    }

    fn low_memory_config() -> GcTriggerConfig {
        GcTriggerConfig {
            min_free_physical_mb: 2048,
            gc_cooldown_secs: 60.0,
            ..GcTriggerConfig::default()
        }
    }

    #[test]
    fn cooldown_suppresses_memory_triggers() {
        let t0 = Instant::now();
        let mut controller = GcTriggerController::new(low_memory_config(), t0);
        let resident = Resident(HashSet::new());
        let low = snapshot(GB);

        assert_eq!(controller.evaluate(&low, 0, 0, t0), GcDecision::Full);
        run_pass(&mut controller, CollectionKind::Full, false, GB, &low, &resident, t0);
        controller.on_evaluate_results_complete();

        let t1 = t0 + Duration::from_secs(10);
        assert_eq!(controller.evaluate(&low, 0, 0, t1), GcDecision::None);
        assert_eq!(controller.cooldown_logged_for, controller.last_full_gc);

        let t2 = t0 + Duration::from_secs(61);
        assert_eq!(controller.evaluate(&low, 0, 0, t2), GcDecision::Full);
    }

    #[test]
    fn object_table_ignores_cooldown() {
        let t0 = Instant::now();
        let mut controller = GcTriggerController::new(low_memory_config(), t0);
        let resident = Resident(HashSet::new());
        let plenty = snapshot(8 * GB);

        assert_eq!(controller.evaluate(&plenty, 95, 100, t0), GcDecision::Full);
        run_pass(&mut controller, CollectionKind::Full, false, 0, &plenty, &resident, t0);
        controller.on_evaluate_results_complete();
        assert_eq!(
            controller.evaluate(&plenty, 95, 100, t0 + Duration::from_secs(1)),
            GcDecision::Full
        );
    }

    #[test]
    fn requests_are_only_accepted_during_a_collection() {
        let t0 = Instant::now();
        let mut controller = GcTriggerController::new(GcTriggerConfig::default(), t0);
        assert!(!controller.request_full_gc());
        assert!(!controller.request_gc_with_history());

        controller.on_start_collect_garbage(CollectionKind::Soft, false);
        assert!(controller.is_gc_in_progress());
        assert!(controller.request_full_gc());
        controller.on_end_collect_garbage();
        assert!(controller.request_gc_with_history());
        controller.on_evaluate_results_complete();
        assert!(!controller.is_gc_in_progress());
        assert!(!controller.request_full_gc());
    }

    #[test]
    fn numerator_steps_down_after_soft_collection() {
        let t0 = Instant::now();
        let config = GcTriggerConfig {
            soft_gc_start_numerator: 3,
            soft_gc_denominator: 16,
            ..GcTriggerConfig::default()
        };
        let mut controller = GcTriggerController::new(config, t0);
        let resident = Resident(HashSet::new());

        // 2 GB available, target 3/16 of 16 GB = 3 GB.
        assert_eq!(controller.evaluate(&snapshot(2 * GB), 0, 0, t0), GcDecision::Soft);
        let after = snapshot(5 * GB / 2);
        let outcome = run_pass(&mut controller, CollectionKind::Soft, false, GB / 2, &after, &resident, t0);
        controller.on_evaluate_results_complete();

        assert_eq!(controller.soft_gc_numerator(), 2);
        assert!(!outcome.follow_up);
        assert_eq!(controller.soft_history().len(), 1);
    }

    #[test]
    fn time_budget_soft_gc_respects_min_period() {
        let t0 = Instant::now();
        let config = GcTriggerConfig {
            soft_gc_time_fraction_budget: 0.5,
            soft_gc_min_period_secs: 30.0,
            ..GcTriggerConfig::default()
        };
        let mut controller = GcTriggerController::new(config, t0);
        let plenty = snapshot(8 * GB);

        assert_eq!(
            controller.evaluate(&plenty, 0, 0, t0 + Duration::from_secs(10)),
            GcDecision::None
        );
        assert_eq!(
            controller.evaluate(&plenty, 0, 0, t0 + Duration::from_secs(31)),
            GcDecision::Soft
        );
    }

    #[test]
    fn packages_between_gc_counts_progress() {
        let t0 = Instant::now();
        let config = GcTriggerConfig {
            packages_between_gc: 3,
            ..GcTriggerConfig::default()
        };
        let mut controller = GcTriggerController::new(config, t0);
        let resident = Resident(HashSet::new());
        let plenty = snapshot(8 * GB);

        controller.record_progress(2);
        assert_eq!(controller.evaluate(&plenty, 0, 0, t0), GcDecision::None);
        controller.record_progress(1);
        assert_eq!(controller.evaluate(&plenty, 0, 0, t0), GcDecision::Full);

        run_pass(&mut controller, CollectionKind::Full, false, 0, &plenty, &resident, t0);
        controller.on_evaluate_results_complete();
        assert_eq!(controller.packages_since_gc(), 0);
    }

    #[test]
    fn ineffective_oom_collection_produces_report_after_history_pass() {
        let t0 = Instant::now();
        let mut controller = GcTriggerController::new(low_memory_config(), t0);
        let resident = Resident(HashSet::from(["Leaked".to_string()]));

        // Used memory swings by 4 GB before memory runs out.
        controller.evaluate(&snapshot(5 * GB), 0, 0, t0);
        let low = snapshot(GB);
        assert_eq!(controller.evaluate(&low, 0, 0, t0), GcDecision::Full);

        let first = run_pass(&mut controller, CollectionKind::Full, false, 0, &low, &resident, t0);
        assert!(first.follow_up);
        assert!(first.report.is_none());

        let second = run_pass(&mut controller, CollectionKind::Full, true, 0, &low, &resident, t0);
        assert!(!second.follow_up);
        let report = second.report.expect("report after the history pass");
        assert_eq!(report.used_memory_spread, 4 * GB);
        assert_eq!(report.retained.len(), 1);
        assert_eq!(
            report.retained[0].reference_chain.as_deref(),
            Some(&["Root".to_string(), "Leaked".to_string()][..])
        );
        controller.on_evaluate_results_complete();
    }

    #[test]
    fn soft_collection_that_leaves_limits_exceeded_requests_full_follow_up() {
        let t0 = Instant::now();
        let config = GcTriggerConfig {
            soft_gc_start_numerator: 4,
            soft_gc_denominator: 16,
            max_used_physical_mb: 12 * 1024 + 768,
            ..GcTriggerConfig::default()
        };
        let mut controller = GcTriggerController::new(config, t0);
        let resident = Resident(HashSet::from(["Stale".to_string()]));

        // 3.5 GB available: below the 4 GB soft target, within the 12.75 GB ceiling.
        let before = snapshot(7 * GB / 2);
        assert_eq!(controller.evaluate(&before, 0, 0, t0), GcDecision::Soft);

        controller.on_start_collect_garbage(CollectionKind::Soft, false);
        controller.on_end_collect_garbage();
        let after = snapshot(3 * GB);
        let stats = CollectionStats::default();
        let plan = plan(CollectionKind::Soft, &["Stale", "Gone"]);
        let results = CollectionResults {
            stats: &stats,
            memory_after: &after,
            plan: &plan,
            resources: &resident,
            collector: &Diagnostics,
        };
        let outcome = controller.evaluate_garbage_collection_results(&results, t0);

        assert_eq!(outcome.still_resident, vec!["Stale".to_string()]);
        assert!(outcome.follow_up, "13 GB used is above the 12.75 GB ceiling");
        controller.on_evaluate_results_complete();
    }

    #[test]
    fn unreachable_ceiling_is_reported() {
        let t0 = Instant::now();
        let config = GcTriggerConfig {
            max_used_physical_mb: 64 * 1024,
            ..GcTriggerConfig::default()
        };
        let mut controller = GcTriggerController::new(config, t0);
        assert!(!controller.validate_against(&snapshot(8 * GB)));
        assert!(!controller.validate_against(&snapshot(8 * GB)));
        assert!(controller.budget_warned);

        let mut sane = GcTriggerController::new(low_memory_config(), t0);
        assert!(sane.validate_against(&snapshot(8 * GB)));
    }
}
