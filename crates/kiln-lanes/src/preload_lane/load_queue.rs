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

//! The staged load queue and its pumps.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use ahash::AHashMap;
use kiln_core::config::PreloadConfig;
use kiln_core::io::{IoDispatcher, ResourceManager};
use kiln_core::package::{PackageId, PackageTable, Urgency};
use kiln_core::registry::DependencyRegistry;

use super::import_walker::{
    walk_imports, AllActivePreloadsReady, CollectUnloadedImports, ImportGatherer,
};
use super::preloader::{
    PreloadContext, Preloader, PreloaderArena, PreloaderId, PreloaderState, VisitState,
};
use super::priority_queue::PriorityQueue;
use super::resource::PreloadBudget;

/// The external capabilities borrowed by the pumps for one tick.
pub struct PreloadEnv<'a> {
    /// Package identities. New imports are interned here.
    pub packages: &'a mut PackageTable,
    /// Source of hard dependencies.
    pub registry: &'a dyn DependencyRegistry,
    /// File access, handle hand-off and residency.
    pub resources: &'a Arc<dyn ResourceManager>,
    /// Runs preload I/O.
    pub dispatcher: &'a dyn IoDispatcher,
}

/// A snapshot of a pending preloader's scheduling key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KickEntry {
    /// The pending preloader.
    pub id: PreloaderId,
    /// Its urgency when queued.
    pub urgency: Urgency,
    /// Its leaf-to-root rank.
    pub rank: Option<u64>,
}

impl KickEntry {
    fn of(preloader: &Preloader) -> Self {
        Self {
            id: preloader.id(),
            urgency: preloader.urgency(),
            rank: preloader.rank(),
        }
    }
}

fn kick_order(a: &KickEntry, b: &KickEntry) -> bool {
    if a.urgency != b.urgency {
        return a.urgency > b.urgency;
    }
    let (rank_a, rank_b) = (a.rank.unwrap_or(u64::MAX), b.rank.unwrap_or(u64::MAX));
    if rank_a != rank_b {
        return rank_a < rank_b;
    }
    a.id < b.id
}

/// Number of entries in each stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounts {
    /// Packages waiting in the inbox.
    pub inbox: usize,
    /// Preloaders waiting for an I/O slot.
    pub pending_kick: usize,
    /// Preloaders with an issued preload.
    pub active_preload: usize,
    /// Packages ready to be deserialized, not yet handed out.
    pub ready_for_load: usize,
    /// Packages currently in load state.
    pub load_state: usize,
    /// Live preloaders.
    pub preloaders: usize,
}

type KickQueue = PriorityQueue<KickEntry, fn(&KickEntry, &KickEntry) -> bool>;

/// Moves packages from request to "bytes resident" through four stages.
///
/// ```text
/// enqueue -> Inbox -> PendingKick -> ActivePreload -> ReadyForLoad -> load
/// ```
///
/// Each pump performs at most one unit of work and reports whether it made
/// progress; the scheduler keeps pumping until none does. All mutation happens
/// on the caller's thread. I/O completion is only observed when polled.
pub struct LoadQueue {
    arena: PreloaderArena,
    inbox: VecDeque<PackageId>,
    pending_kick: KickQueue,
    active_preload: BTreeSet<PreloaderId>,
    ready_for_load: VecDeque<PreloaderId>,
    handed_out: BTreeSet<PreloaderId>,
    load_state: BTreeMap<PackageId, PreloaderId>,
    budget: PreloadBudget,
    config: PreloadConfig,
}

impl LoadQueue {
    /// Creates an empty queue.
    pub fn new(config: PreloadConfig) -> Self {
        Self {
            arena: PreloaderArena::new(),
            inbox: VecDeque::new(),
            pending_kick: PriorityQueue::new(kick_order as fn(&KickEntry, &KickEntry) -> bool),
            active_preload: BTreeSet::new(),
            ready_for_load: VecDeque::new(),
            handed_out: BTreeSet::new(),
            load_state: BTreeMap::new(),
            budget: PreloadBudget::new(config.max_concurrent_preloads),
            config,
        }
    }

    /// The preload settings this queue runs with.
    pub fn config(&self) -> &PreloadConfig {
        &self.config
    }

    /// Read access to every preloader.
    pub fn arena(&self) -> &PreloaderArena {
        &self.arena
    }

    fn context<'b>(&self, env: &'b PreloadEnv<'_>) -> PreloadContext<'b> {
        PreloadContext {
            packages: &*env.packages,
            resources: env.resources,
            dispatcher: env.dispatcher,
            budget: self.budget.clone(),
            mode: self.config.mode,
        }
    }

    /// Puts `package` into load state.
    ///
    /// Enqueuing a package already in load state only raises its urgency.
    pub fn enqueue(&mut self, package: PackageId, urgency: Urgency) {
        if self.load_state.contains_key(&package) {
            self.set_urgency(package, urgency);
            return;
        }
        let id = self.arena.find_or_create(package);
        self.arena.add_slot_ref(id);
        self.load_state.insert(package, id);

        let preloader = &mut self.arena[id];
        preloader.urgency = preloader.urgency.max(urgency);
        preloader.flags.in_inbox = true;
        self.inbox.push_back(package);
        log::trace!("LoadQueue: {package} entered the inbox ({urgency:?})");
    }

    /// Returns `true` if `package` is in load state.
    pub fn contains(&self, package: PackageId) -> bool {
        self.load_state.contains_key(&package)
    }

    /// Packages currently in load state.
    pub fn packages_in_load_state(&self) -> impl Iterator<Item = PackageId> + '_ {
        self.load_state.keys().copied()
    }

    /// Takes one package out of the inbox and decides how it preloads.
    pub fn pump_try_start_inbox_package(&mut self, env: &mut PreloadEnv<'_>) -> bool {
        let Some(package) = self.inbox.pop_front() else {
            return false;
        };
        let Some(&id) = self.load_state.get(&package) else {
            return true;
        };
        self.arena[id].flags.in_inbox = false;

        let preloader = &self.arena[id];
        let flags = preloader.flags;
        let trivial =
            flags.preload_attempted && flags.imports_gathered && preloader.unloaded_imports.is_empty();
        // A zero in-flight budget could never kick anything.
        let bypass = !self.config.enabled
            || self.config.max_concurrent_preloads == 0
            || preloader.urgency == Urgency::Blocking
            || trivial
            || env.resources.is_resident(env.packages.name(package));

        let requested = if bypass || !self.config.allow_import_preloading {
            vec![id]
        } else {
            let mut visitor = CollectUnloadedImports::default();
            let mut gatherer = ImportGatherer {
                registry: env.registry,
                resources: &**env.resources,
                packages: &mut *env.packages,
            };
            walk_imports(&mut self.arena, id, &mut visitor, Some(&mut gatherer));
            visitor.collected
        };

        let ctx = self.context(env);
        self.set_requested_loads(id, requested, bypass, &ctx);
        if bypass {
            log::debug!("LoadQueue: {package} bypasses preloading");
            self.move_to(id, PreloaderState::ReadyForLoad, &ctx);
        }
        true
    }

    fn set_requested_loads(
        &mut self,
        id: PreloaderId,
        requested: Vec<PreloaderId>,
        bypass: bool,
        ctx: &PreloadContext<'_>,
    ) {
        let urgency = self.arena[id].urgency;
        for &entry in &requested {
            self.arena[entry].ref_count_from_requested_loads += 1;
            self.arena.assign_rank(entry);
            self.raise_urgency(entry, urgency);
            if self.arena[entry].state == PreloaderState::Inactive && !(bypass && entry == id) {
                self.move_to(entry, PreloaderState::PendingKick, ctx);
            }
        }

        let previous = std::mem::replace(&mut self.arena[id].requested_loads, requested);
        self.arena[id].flags.requested_loads_initialized = true;
        for entry in previous {
            self.release_requested_load(entry, ctx);
        }
    }

    fn release_requested_load(&mut self, id: PreloaderId, ctx: &PreloadContext<'_>) {
        let preloader = &mut self.arena[id];
        debug_assert!(preloader.ref_count_from_requested_loads > 0);
        preloader.ref_count_from_requested_loads =
            preloader.ref_count_from_requested_loads.saturating_sub(1);
        if preloader.ref_count_from_requested_loads == 0 {
            self.move_to(id, PreloaderState::Inactive, ctx);
            self.arena.try_free(id);
        }
    }

    /// Issues the best pending preload if the in-flight budget allows it.
    pub fn pump_try_kick_preload(&mut self, env: &PreloadEnv<'_>) -> bool {
        if !self.budget.has_headroom() {
            return false;
        }
        let Some(id) = self.pending_kick.peek().map(|entry| entry.id) else {
            return false;
        };
        let ctx = self.context(env);
        self.move_to(id, PreloaderState::ActivePreload, &ctx);
        self.arena[id].try_preload(&ctx);
        log::trace!(
            "LoadQueue: kicked preload of {} ({} in flight)",
            self.arena[id].package(),
            self.budget.in_flight()
        );
        true
    }

    /// Polls outstanding preloads and promotes load-state packages whose
    /// reachable active preloads have all finished.
    pub fn pump_loads_is_ready_to_leave_preload(&mut self, env: &PreloadEnv<'_>) -> bool {
        let ctx = self.context(env);
        let mut progress = false;

        let in_flight: Vec<PreloaderId> = self
            .active_preload
            .iter()
            .copied()
            .filter(|&id| self.arena[id].is_preload_in_flight())
            .collect();
        for id in in_flight {
            if self.arena[id].try_preload(&ctx) {
                progress = true;
            }
        }

        let candidates: Vec<PreloaderId> = self
            .load_state
            .values()
            .copied()
            .filter(|&id| {
                let preloader = &self.arena[id];
                preloader.state == PreloaderState::ActivePreload && !preloader.flags.in_inbox
            })
            .collect();
        for id in candidates {
            let mut visitor = AllActivePreloadsReady::new(&ctx);
            if walk_imports(&mut self.arena, id, &mut visitor, None) {
                log::trace!("LoadQueue: {} is ready for load", self.arena[id].package());
                self.move_to(id, PreloaderState::ReadyForLoad, &ctx);
                progress = true;
            }
        }
        progress
    }

    /// Hands out the next package ready for deserialization.
    ///
    /// The preloader stays in `ReadyForLoad` until
    /// [`mark_load_attempt_complete`](Self::mark_load_attempt_complete) or
    /// [`leave_load_state`](Self::leave_load_state) is called.
    pub fn pop_ready_for_load(&mut self) -> Option<PackageId> {
        let id = self.ready_for_load.pop_front()?;
        self.handed_out.insert(id);
        Some(self.arena[id].package())
    }

    /// Records that `package` has been loaded (or its load failed).
    pub fn mark_load_attempt_complete(&mut self, package: PackageId, env: &PreloadEnv<'_>) {
        let Some(&id) = self.load_state.get(&package) else {
            log::warn!("LoadQueue: load completed for {package}, which is not in load state");
            return;
        };
        self.arena[id].flags.load_attempted = true;
        let ctx = self.context(env);
        self.move_to(id, PreloaderState::Inactive, &ctx);
    }

    /// Removes `package` from load state, releasing everything it requested.
    ///
    /// Preloads only this package needed are cancelled; in-flight reads are
    /// flushed before their preloader is torn down.
    pub fn leave_load_state(&mut self, package: PackageId, env: &PreloadEnv<'_>) {
        let Some(id) = self.load_state.remove(&package) else {
            return;
        };
        let ctx = self.context(env);

        if self.arena[id].flags.in_inbox {
            self.inbox.retain(|&queued| queued != package);
            self.arena[id].flags.in_inbox = false;
        }

        let requested = std::mem::take(&mut self.arena[id].requested_loads);
        self.arena[id].flags.requested_loads_initialized = false;
        for entry in requested {
            self.release_requested_load(entry, &ctx);
        }

        let preloader = &self.arena[id];
        if preloader.state == PreloaderState::ReadyForLoad
            && preloader.ref_count_from_requested_loads > 0
        {
            self.move_to(id, PreloaderState::ActivePreload, &ctx);
        }
        self.arena.release_slot_ref(id);
    }

    /// Raises the urgency of `package` and everything it requested.
    ///
    /// Urgency never decreases. Pending entries are re-sorted; a package already
    /// ready for load moves to the front of the ready queue.
    pub fn set_urgency(&mut self, package: PackageId, urgency: Urgency) {
        let Some(&id) = self.load_state.get(&package) else {
            return;
        };
        self.raise_urgency(id, urgency);
        let requested = self.arena[id].requested_loads.clone();
        for entry in requested {
            self.raise_urgency(entry, urgency);
        }
    }

    fn raise_urgency(&mut self, id: PreloaderId, urgency: Urgency) {
        let preloader = &mut self.arena[id];
        if urgency <= preloader.urgency {
            return;
        }
        preloader.urgency = urgency;
        let state = preloader.state;
        match state {
            PreloaderState::PendingKick => {
                self.pending_kick.remove_where(|entry| entry.id == id);
                self.pending_kick.push(KickEntry::of(&self.arena[id]));
            }
            PreloaderState::ReadyForLoad => {
                if let Some(position) = self.ready_for_load.iter().position(|&queued| queued == id) {
                    self.ready_for_load.remove(position);
                    self.ready_for_load.push_front(id);
                }
            }
            PreloaderState::Inactive | PreloaderState::ActivePreload => {}
        }
    }

    /// Returns `false` if `package` needs no load, advancing its preload otherwise.
    pub fn needs_load(&mut self, package: PackageId, env: &PreloadEnv<'_>) -> bool {
        let ctx = self.context(env);
        match self.arena.find(package) {
            Some(id) => self.arena[id].needs_load(&ctx),
            None => !env.resources.is_resident(env.packages.name(package)),
        }
    }

    /// The preloader serving `package`, if any.
    pub fn preloader(&self, package: PackageId) -> Option<&Preloader> {
        self.arena.find(package).map(|id| &self.arena[id])
    }

    /// The stage of the preloader serving `package`, if any.
    pub fn state_of(&self, package: PackageId) -> Option<PreloaderState> {
        self.preloader(package).map(Preloader::state)
    }

    /// Current stage sizes.
    pub fn stage_counts(&self) -> StageCounts {
        StageCounts {
            inbox: self.inbox.len(),
            pending_kick: self.pending_kick.len(),
            active_preload: self.active_preload.len(),
            ready_for_load: self.ready_for_load.len(),
            load_state: self.load_state.len(),
            preloaders: self.arena.len(),
        }
    }

    /// Preload resources currently held.
    pub fn in_flight_preloads(&self) -> usize {
        self.budget.in_flight()
    }

    /// Returns `true` if any active preload still has I/O outstanding.
    pub fn has_outstanding_io(&self) -> bool {
        self.active_preload
            .iter()
            .any(|&id| self.arena[id].is_preload_in_flight())
    }

    /// Returns `true` if no package is in load state.
    pub fn is_empty(&self) -> bool {
        self.load_state.is_empty()
    }

    fn move_to(&mut self, id: PreloaderId, to: PreloaderState, ctx: &PreloadContext<'_>) {
        let from = self.arena[id].state;
        if from == to {
            return;
        }
        match from {
            PreloaderState::Inactive => {}
            PreloaderState::PendingKick => {
                self.pending_kick.remove_where(|entry| entry.id == id);
            }
            PreloaderState::ActivePreload => {
                self.active_preload.remove(&id);
            }
            PreloaderState::ReadyForLoad => {
                self.ready_for_load.retain(|&queued| queued != id);
                self.handed_out.remove(&id);
            }
        }

        self.arena[id].state = to;
        match to {
            PreloaderState::Inactive => {
                let imports = self.arena[id].on_exit_active(ctx);
                for import in imports {
                    self.arena.release_slot_ref(import);
                }
            }
            PreloaderState::PendingKick => self.pending_kick.push(KickEntry::of(&self.arena[id])),
            PreloaderState::ActivePreload => {
                self.active_preload.insert(id);
            }
            PreloaderState::ReadyForLoad => self.ready_for_load.push_back(id),
        }
    }

    /// Checks the structural invariants of the queue.
    ///
    /// Every non-inactive preloader is referenced by some requested-load list,
    /// no traversal flag is left set, stage containers agree with preloader
    /// states, and each reference count equals the number of requested-load
    /// entries pointing at it.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut expected_refs: AHashMap<PreloaderId, u32> = AHashMap::new();
        for (_, preloader) in self.arena.iter() {
            for &entry in &preloader.requested_loads {
                if !self.arena.contains(entry) {
                    return Err(format!("{:?} requests a freed preloader {entry:?}", preloader.id()));
                }
                *expected_refs.entry(entry).or_default() += 1;
            }
        }

        for (id, preloader) in self.arena.iter() {
            let refs = preloader.ref_count_from_requested_loads;
            if preloader.state != PreloaderState::Inactive && refs == 0 {
                return Err(format!("{id:?} is {:?} with no references", preloader.state));
            }
            if refs != expected_refs.get(&id).copied().unwrap_or(0) {
                return Err(format!("{id:?} reference count {refs} disagrees with requested loads"));
            }
            if preloader.visit_state != VisitState::Unvisited {
                return Err(format!("{id:?} has a stale visit flag"));
            }

            let in_pending = self.pending_kick.contains_where(|entry| entry.id == id);
            let in_active = self.active_preload.contains(&id);
            let in_ready = self.ready_for_load.contains(&id) || self.handed_out.contains(&id);
            let expected = (
                preloader.state == PreloaderState::PendingKick,
                preloader.state == PreloaderState::ActivePreload,
                preloader.state == PreloaderState::ReadyForLoad,
            );
            if (in_pending, in_active, in_ready) != expected {
                return Err(format!(
                    "{id:?} is {:?} but container membership is pending={in_pending} active={in_active} ready={in_ready}",
                    preloader.state
                ));
            }
            if preloader.flags.in_inbox != self.inbox.contains(&preloader.package()) {
                return Err(format!("{id:?} inbox flag disagrees with the inbox"));
            }
        }

        if self.pending_kick.len() + self.active_preload.len() + self.ready_for_load.len()
            + self.handed_out.len()
            > self.arena.len()
        {
            return Err("a preloader appears in more than one container".to_owned());
        }
        Ok(())
    }
}
