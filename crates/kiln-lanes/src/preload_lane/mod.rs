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

//! The preload lane.
//!
//! Packages enter the [`LoadQueue`] inbox, get their transitive imports
//! discovered by the [`walk_imports`] traversal, wait in a priority queue for
//! an I/O slot, preload, and finally become ready for load. Every preloader
//! lives in a [`PreloaderArena`] and refers to other preloaders by
//! [`PreloaderId`], so cyclic import graphs need no shared-ownership tricks.

mod import_walker;
mod load_queue;
mod preloader;
mod priority_queue;
mod resource;

pub use import_walker::{walk_imports, AllActivePreloadsReady, CollectUnloadedImports, ImportGatherer, ImportVisitor};
pub use load_queue::{KickEntry, LoadQueue, PreloadEnv, StageCounts};
pub use preloader::{
    PreloadContext, Preloader, PreloaderArena, PreloaderFlags, PreloaderId, PreloaderState,
    VisitState,
};
pub use priority_queue::PriorityQueue;
pub use resource::{PreloadBudget, PreloadResource};
