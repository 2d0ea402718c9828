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

//! Per-package preload state and the arena that owns it.
//!
//! A [`Preloader`] tracks one package's journey through the preload lane. The
//! [`PreloaderArena`] stores preloaders in slots addressed by [`PreloaderId`];
//! edges between preloaders (imports, requested loads) are id lists, and
//! lifetimes are plain integer counts on the slot.
//!
//! A slot stays alive while either of its two counts is non-zero:
//! - `slot_refs`: the owning package is in load state, or another preloader
//!   lists it among its unloaded imports;
//! - `ref_count_from_requested_loads`: some package in load state needs it to
//!   finish preloading first.

use std::ops::{Index, IndexMut};
use std::path::Path;
use std::sync::Arc;

use ahash::AHashMap;
use kiln_core::io::{
    async_load_job, read_file_job, IoDispatcher, IoResult, IoTicket, PreloadMode, ResourceManager,
};
use kiln_core::package::{PackageId, PackageTable, Urgency};

use super::resource::{PreloadBudget, PreloadResource};

/// Index of a preloader slot in its [`PreloaderArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PreloaderId(u32);

impl PreloaderId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The pipeline stage of a preloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreloaderState {
    /// Not part of any active preload.
    Inactive,
    /// Waiting in the priority queue for an I/O slot.
    PendingKick,
    /// Preload issued; waiting for it and for active imports to finish.
    ActivePreload,
    /// Bytes resident; the owning package may be deserialized.
    ReadyForLoad,
}

/// Scratch marker used by a single import-graph traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VisitState {
    /// Not seen by the current traversal.
    #[default]
    Unvisited,
    /// On the traversal stack.
    InProgress,
    /// Fully explored (or deliberately not explored).
    Visited,
}

/// Lifecycle flags of a preloader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloaderFlags {
    /// `unloaded_imports` has been populated from the dependency registry.
    pub imports_gathered: bool,
    /// Preload work for this node has finished (success, failure or skip).
    pub preload_attempted: bool,
    /// A warmed handle (or async load) was produced.
    pub preloaded: bool,
    /// The real load has been attempted.
    pub load_attempted: bool,
    /// The owning package is waiting in the inbox.
    pub in_inbox: bool,
    /// `requested_loads` has been computed for the owning package.
    pub requested_loads_initialized: bool,
}

enum PreloadIo {
    Idle,
    InFlight {
        ticket: IoTicket,
        mode: PreloadMode,
        _resource: PreloadResource,
    },
}

/// The capabilities a preloader needs to issue and poll its I/O.
pub struct PreloadContext<'a> {
    /// Package identities (names and paths).
    pub packages: &'a PackageTable,
    /// File access and handle hand-off.
    pub resources: &'a Arc<dyn ResourceManager>,
    /// Runs I/O jobs off the scheduler thread.
    pub dispatcher: &'a dyn IoDispatcher,
    /// The shared in-flight counter.
    pub budget: PreloadBudget,
    /// How preloads are issued.
    pub mode: PreloadMode,
}

/// One package's preload state.
pub struct Preloader {
    id: PreloaderId,
    package: PackageId,
    pub(crate) state: PreloaderState,
    pub(crate) visit_state: VisitState,
    pub(crate) unloaded_imports: Vec<PreloaderId>,
    pub(crate) requested_loads: Vec<PreloaderId>,
    pub(crate) ref_count_from_requested_loads: u32,
    slot_refs: u32,
    rank: Option<u64>,
    pub(crate) urgency: Urgency,
    pub(crate) flags: PreloaderFlags,
    io: PreloadIo,
    handle_registered: bool,
}

impl Preloader {
    fn new(id: PreloaderId, package: PackageId) -> Self {
        Self {
            id,
            package,
            state: PreloaderState::Inactive,
            visit_state: VisitState::Unvisited,
            unloaded_imports: Vec::new(),
            requested_loads: Vec::new(),
            ref_count_from_requested_loads: 0,
            slot_refs: 0,
            rank: None,
            urgency: Urgency::Normal,
            flags: PreloaderFlags::default(),
            io: PreloadIo::Idle,
            handle_registered: false,
        }
    }

    /// This preloader's slot.
    pub fn id(&self) -> PreloaderId {
        self.id
    }

    /// The package this preloader serves.
    pub fn package(&self) -> PackageId {
        self.package
    }

    /// The current pipeline stage.
    pub fn state(&self) -> PreloaderState {
        self.state
    }

    /// The traversal scratch marker.
    pub fn visit_state(&self) -> VisitState {
        self.visit_state
    }

    /// Imports discovered for this package that still need loading.
    pub fn unloaded_imports(&self) -> &[PreloaderId] {
        &self.unloaded_imports
    }

    /// Root-to-leaf list of preloaders that must finish before this package loads.
    pub fn requested_loads(&self) -> &[PreloaderId] {
        &self.requested_loads
    }

    /// Number of `requested_loads` entries (across all packages) pointing here.
    pub fn ref_count_from_requested_loads(&self) -> u32 {
        self.ref_count_from_requested_loads
    }

    /// Leaf-to-root rank, assigned the first time the node joins a requested-load list.
    pub fn rank(&self) -> Option<u64> {
        self.rank
    }

    /// The caller-declared urgency.
    pub fn urgency(&self) -> Urgency {
        self.urgency
    }

    /// Lifecycle flags.
    pub fn flags(&self) -> PreloaderFlags {
        self.flags
    }

    /// Returns `true` while a preload request is outstanding.
    pub fn is_preload_in_flight(&self) -> bool {
        matches!(self.io, PreloadIo::InFlight { .. })
    }

    /// Strict scheduling order: higher urgency first, then lower rank, then lower id.
    pub fn is_higher_priority_than(&self, other: &Preloader) -> bool {
        if self.urgency != other.urgency {
            return self.urgency > other.urgency;
        }
        let (own, theirs) = (
            self.rank.unwrap_or(u64::MAX),
            other.rank.unwrap_or(u64::MAX),
        );
        if own != theirs {
            return own < theirs;
        }
        self.id < other.id
    }

    /// Advances this node's own preload as far as possible without blocking.
    ///
    /// Returns `true` once preload work for this node alone is finished, whether
    /// it succeeded, failed or turned out to be unnecessary, and `false` if the
    /// caller must poll again. Finished nodes return `true` immediately without
    /// touching the resource manager again.
    ///
    /// Under [`Urgency::Blocking`] the call waits for the file handle to be
    /// opened, but never for the read to complete.
    pub fn try_preload(&mut self, ctx: &PreloadContext<'_>) -> bool {
        if self.flags.preload_attempted {
            return true;
        }

        let identity = ctx.packages.identity(self.package);
        if matches!(self.io, PreloadIo::Idle) {
            if self.flags.load_attempted || ctx.resources.is_resident(identity.name()) {
                self.flags.preload_attempted = true;
                return true;
            }
            if identity.path().as_os_str().is_empty() {
                log::warn!(
                    "Preloader: '{}' has no backing file, skipping preload",
                    identity.name()
                );
                self.flags.preload_attempted = true;
                return true;
            }

            let path = identity.path().to_path_buf();
            let job = match ctx.mode {
                PreloadMode::FileHandle => read_file_job(ctx.resources.clone(), path.clone()),
                PreloadMode::AsyncLoad => {
                    async_load_job(ctx.resources.clone(), identity.shared_name(), path.clone())
                }
            };
            let resource = ctx.budget.acquire();
            let ticket = ctx.dispatcher.dispatch(path, job);
            log::trace!("Preloader: issued {:?} preload for '{}'", ctx.mode, identity.name());
            self.io = PreloadIo::InFlight {
                ticket,
                mode: ctx.mode,
                _resource: resource,
            };
        }

        let blocking = self.urgency == Urgency::Blocking;
        let (result, mode) = match &mut self.io {
            PreloadIo::InFlight { ticket, mode, .. } => {
                if blocking {
                    ticket.wait_opened();
                }
                match ticket.try_finish() {
                    Some(result) => (result, *mode),
                    None => return false,
                }
            }
            PreloadIo::Idle => return false,
        };

        self.finish_preload(result, mode, ctx);
        true
    }

    /// Returns `false` if the package was already loaded or is resident.
    ///
    /// Otherwise this advances the preload without blocking, as a side effect,
    /// and returns `true`. Callers must tolerate the state change.
    pub fn needs_load(&mut self, ctx: &PreloadContext<'_>) -> bool {
        if self.flags.load_attempted {
            return false;
        }
        if ctx
            .resources
            .is_resident(ctx.packages.name(self.package))
        {
            return false;
        }
        self.try_preload(ctx);
        true
    }

    fn finish_preload(&mut self, result: IoResult, mode: PreloadMode, ctx: &PreloadContext<'_>) {
        // Dropping the in-flight state releases the budget slot.
        self.io = PreloadIo::Idle;
        self.flags.preload_attempted = true;

        let identity = ctx.packages.identity(self.package);
        match result {
            Ok(handle) => match mode {
                PreloadMode::FileHandle => {
                    let size = handle.len();
                    if ctx
                        .resources
                        .register_preloaded_handle(identity.path(), handle)
                    {
                        self.flags.preloaded = true;
                        self.handle_registered = true;
                        log::trace!(
                            "Preloader: warmed '{}' ({} bytes)",
                            identity.name(),
                            size
                        );
                    } else {
                        log::warn!(
                            "Preloader: a preloaded handle for '{}' is already registered, loading without preload",
                            identity.path().display()
                        );
                    }
                }
                PreloadMode::AsyncLoad => {
                    self.flags.preloaded = true;
                }
            },
            Err(err) => {
                log::warn!(
                    "Preloader: preload of '{}' failed ({}), continuing without preload",
                    identity.name(),
                    err
                );
            }
        }
    }

    /// Releases everything the node holds while active. In-flight I/O is
    /// flushed first so no request outlives its owner. Returns the imports
    /// whose slot references the caller must release.
    pub(crate) fn on_exit_active(&mut self, ctx: &PreloadContext<'_>) -> Vec<PreloaderId> {
        if let PreloadIo::InFlight { ticket, .. } = &mut self.io {
            log::debug!(
                "Preloader: flushing in-flight preload of '{}'",
                ctx.packages.name(self.package)
            );
            let _ = ticket.wait_finished();
        }
        self.io = PreloadIo::Idle;

        if self.handle_registered && !self.flags.load_attempted {
            let path: &Path = ctx.packages.identity(self.package).path();
            let _ = ctx.resources.take_preloaded_handle(path);
        }
        self.handle_registered = false;
        if !self.flags.load_attempted {
            self.flags.preload_attempted = false;
            self.flags.preloaded = false;
        }

        self.flags.imports_gathered = false;
        std::mem::take(&mut self.unloaded_imports)
    }
}

/// Slot storage for every preloader in the pipeline.
#[derive(Default)]
pub struct PreloaderArena {
    slots: Vec<Option<Preloader>>,
    free: Vec<u32>,
    by_package: AHashMap<PackageId, PreloaderId>,
    next_rank: u64,
}

impl PreloaderArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the preloader serving `package`, if one exists.
    pub fn find(&self, package: PackageId) -> Option<PreloaderId> {
        self.by_package.get(&package).copied()
    }

    /// Returns the preloader serving `package`, creating an unreferenced one if needed.
    ///
    /// A freshly created slot is reclaimed by the next [`try_free`](Self::try_free)
    /// unless the caller takes a reference first.
    pub fn find_or_create(&mut self, package: PackageId) -> PreloaderId {
        if let Some(id) = self.find(package) {
            return id;
        }
        let id = match self.free.pop() {
            Some(index) => {
                let id = PreloaderId(index);
                self.slots[index as usize] = Some(Preloader::new(id, package));
                id
            }
            None => {
                let id = PreloaderId(self.slots.len() as u32);
                self.slots.push(Some(Preloader::new(id, package)));
                id
            }
        };
        self.by_package.insert(package, id);
        id
    }

    /// Returns the preloader at `id`, if the slot is live.
    pub fn get(&self, id: PreloaderId) -> Option<&Preloader> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    /// Returns `true` if `id` addresses a live slot.
    pub fn contains(&self, id: PreloaderId) -> bool {
        self.get(id).is_some()
    }

    /// The number of live preloaders.
    pub fn len(&self) -> usize {
        self.by_package.len()
    }

    /// Returns `true` if no preloader is alive.
    pub fn is_empty(&self) -> bool {
        self.by_package.is_empty()
    }

    /// Iterates every live preloader.
    pub fn iter(&self) -> impl Iterator<Item = (PreloaderId, &Preloader)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|p| (PreloaderId(index as u32), p)))
    }

    /// Adds a slot reference to `id`.
    pub fn add_slot_ref(&mut self, id: PreloaderId) {
        self[id].slot_refs += 1;
    }

    /// Drops a slot reference from `id` and reclaims it if nothing else holds it.
    pub fn release_slot_ref(&mut self, id: PreloaderId) {
        let preloader = &mut self[id];
        debug_assert!(preloader.slot_refs > 0, "slot reference underflow");
        preloader.slot_refs = preloader.slot_refs.saturating_sub(1);
        self.try_free(id);
    }

    /// Assigns the next leaf-to-root rank to `id` unless it already has one.
    pub fn assign_rank(&mut self, id: PreloaderId) {
        if self[id].rank.is_none() {
            let rank = self.next_rank;
            self.next_rank += 1;
            self[id].rank = Some(rank);
        }
    }

    /// Forces every live node back to [`VisitState::Unvisited`].
    pub(crate) fn reset_visit_states(&mut self) {
        for preloader in self.slots.iter_mut().flatten() {
            preloader.visit_state = VisitState::Unvisited;
        }
    }

    /// Reclaims `id` if it is no longer referenced, cascading through its imports.
    pub fn try_free(&mut self, id: PreloaderId) {
        let mut worklist = vec![id];
        while let Some(candidate) = worklist.pop() {
            let Some(preloader) = self.get(candidate) else {
                continue;
            };
            if preloader.slot_refs > 0 || preloader.ref_count_from_requested_loads > 0 {
                continue;
            }
            debug_assert_eq!(preloader.state, PreloaderState::Inactive);
            debug_assert!(!preloader.is_preload_in_flight());

            let Some(freed) = self.slots[candidate.index()].take() else {
                continue;
            };
            self.by_package.remove(&freed.package);
            self.free.push(candidate.0);

            for import in freed.unloaded_imports {
                if let Some(imported) = self.slots[import.index()].as_mut() {
                    imported.slot_refs = imported.slot_refs.saturating_sub(1);
                    worklist.push(import);
                }
            }
        }
    }
}

impl Index<PreloaderId> for PreloaderArena {
    type Output = Preloader;

    fn index(&self, id: PreloaderId) -> &Self::Output {
        match self.slots.get(id.index()).and_then(Option::as_ref) {
            Some(preloader) => preloader,
            None => panic!("stale preloader id {id:?}"),
        }
    }
}

impl IndexMut<PreloaderId> for PreloaderArena {
    fn index_mut(&mut self, id: PreloaderId) -> &mut Self::Output {
        match self.slots.get_mut(id.index()).and_then(Option::as_mut) {
            Some(preloader) => preloader,
            None => panic!("stale preloader id {id:?}"),
        }
    }
}
