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

//! Depth-first traversal over the import graph of preloaders.

use kiln_core::io::ResourceManager;
use kiln_core::package::PackageTable;
use kiln_core::registry::DependencyRegistry;

use super::preloader::{PreloadContext, Preloader, PreloaderArena, PreloaderId, PreloaderState, VisitState};

/// Callbacks driving one [`walk_imports`] traversal.
pub trait ImportVisitor {
    /// Returns `false` to mark the node visited without reporting or exploring it.
    fn should_keep(&mut self, preloader: &Preloader) -> bool;

    /// Called once per kept node, root first. Returning `false` aborts the walk.
    fn report_and_continue(&mut self, arena: &mut PreloaderArena, id: PreloaderId) -> bool;

    /// Called in post-order once every import of a kept node has been explored.
    fn on_finished(&mut self, _arena: &mut PreloaderArena, _id: PreloaderId) {}
}

/// Populates `unloaded_imports` from the dependency registry during a walk.
pub struct ImportGatherer<'a> {
    /// Source of hard dependencies and backing paths.
    pub registry: &'a dyn DependencyRegistry,
    /// Answers residency queries.
    pub resources: &'a dyn ResourceManager,
    /// Interns newly discovered packages.
    pub packages: &'a mut PackageTable,
}

impl ImportGatherer<'_> {
    fn gather(&mut self, arena: &mut PreloaderArena, id: PreloaderId) {
        let name = self.packages.name(arena[id].package()).to_owned();
        for dependency in self.registry.hard_dependencies(&name) {
            if dependency == name || self.resources.is_resident(&dependency) {
                continue;
            }
            let package = match self.packages.lookup(&dependency) {
                Some(package) => package,
                None => {
                    let path = self.registry.package_path(&dependency).unwrap_or_default();
                    self.packages.intern(&dependency, path)
                }
            };
            let import = arena.find_or_create(package);
            if arena[import].flags.load_attempted {
                arena.try_free(import);
                continue;
            }
            if arena[id].unloaded_imports.contains(&import) {
                continue;
            }
            arena.add_slot_ref(import);
            arena[id].unloaded_imports.push(import);
        }
        arena[id].flags.imports_gathered = true;
        log::trace!(
            "ImportWalker: gathered {} unloaded imports for '{}'",
            arena[id].unloaded_imports.len(),
            name
        );
    }
}

enum Entered {
    Skipped,
    Aborted,
    Explore,
}

/// Walks the imports reachable from `root`.
///
/// Nodes already in progress or visited are skipped without being reported
/// again, so each node is reported at most once even across cycles. Every node
/// touched by the walk is back to [`VisitState::Unvisited`] when this returns,
/// including on abort. Returns `false` if a report aborted the traversal.
pub fn walk_imports(
    arena: &mut PreloaderArena,
    root: PreloaderId,
    visitor: &mut dyn ImportVisitor,
    mut gatherer: Option<&mut ImportGatherer<'_>>,
) -> bool {
    if arena[root].visit_state != VisitState::Unvisited {
        debug_assert!(false, "import walk entered with a stale visit flag on {root:?}");
        log::error!("ImportWalker: stale visit flag on {root:?}, resetting traversal state");
        arena.reset_visit_states();
    }

    let mut touched = Vec::new();
    let mut stack: Vec<(PreloaderId, usize)> = Vec::new();
    let mut completed = true;

    match enter(arena, root, visitor, gatherer.as_deref_mut(), &mut touched) {
        Entered::Explore => stack.push((root, 0)),
        Entered::Skipped => {}
        Entered::Aborted => completed = false,
    }

    while completed {
        let Some(&(id, next)) = stack.last() else {
            break;
        };
        match arena[id].unloaded_imports.get(next).copied() {
            Some(child) => {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                if arena[child].visit_state != VisitState::Unvisited {
                    continue;
                }
                match enter(arena, child, visitor, gatherer.as_deref_mut(), &mut touched) {
                    Entered::Explore => stack.push((child, 0)),
                    Entered::Skipped => {}
                    Entered::Aborted => completed = false,
                }
            }
            None => {
                stack.pop();
                arena[id].visit_state = VisitState::Visited;
                visitor.on_finished(arena, id);
            }
        }
    }

    for id in touched {
        if arena.contains(id) {
            arena[id].visit_state = VisitState::Unvisited;
        }
    }
    completed
}

fn enter(
    arena: &mut PreloaderArena,
    id: PreloaderId,
    visitor: &mut dyn ImportVisitor,
    gatherer: Option<&mut ImportGatherer<'_>>,
    touched: &mut Vec<PreloaderId>,
) -> Entered {
    touched.push(id);
    if !visitor.should_keep(&arena[id]) {
        arena[id].visit_state = VisitState::Visited;
        return Entered::Skipped;
    }
    arena[id].visit_state = VisitState::InProgress;
    if !visitor.report_and_continue(arena, id) {
        return Entered::Aborted;
    }
    if let Some(gatherer) = gatherer {
        if !arena[id].flags.imports_gathered {
            gatherer.gather(arena, id);
        }
    }
    Entered::Explore
}

/// Collects every reachable node, root first, and ranks them leaf to root.
#[derive(Debug, Default)]
pub struct CollectUnloadedImports {
    /// Reported nodes in root-to-leaf order.
    pub collected: Vec<PreloaderId>,
}

impl ImportVisitor for CollectUnloadedImports {
    fn should_keep(&mut self, _preloader: &Preloader) -> bool {
        true
    }

    fn report_and_continue(&mut self, _arena: &mut PreloaderArena, id: PreloaderId) -> bool {
        self.collected.push(id);
        true
    }

    fn on_finished(&mut self, arena: &mut PreloaderArena, id: PreloaderId) {
        arena.assign_rank(id);
    }
}

/// Succeeds only if every reachable active node has finished its own preload.
///
/// A reachable node still waiting for its kick counts as a blocker.
pub struct AllActivePreloadsReady<'c, 'a> {
    ctx: &'c PreloadContext<'a>,
}

impl<'c, 'a> AllActivePreloadsReady<'c, 'a> {
    /// Polls preloads through `ctx`.
    pub fn new(ctx: &'c PreloadContext<'a>) -> Self {
        Self { ctx }
    }
}

impl ImportVisitor for AllActivePreloadsReady<'_, '_> {
    fn should_keep(&mut self, preloader: &Preloader) -> bool {
        matches!(
            preloader.state(),
            PreloaderState::ActivePreload | PreloaderState::PendingKick
        )
    }

    fn report_and_continue(&mut self, arena: &mut PreloaderArena, id: PreloaderId) -> bool {
        match arena[id].state() {
            PreloaderState::PendingKick => false,
            _ => arena[id].try_preload(self.ctx),
        }
    }
}
