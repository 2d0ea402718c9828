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

//! # Kiln Core
//!
//! Foundational crate containing the capability traits, package identities and
//! configuration types shared by every layer of the cook scheduler.
//!
//! Nothing in here performs scheduling itself. The traits describe the external
//! collaborators the scheduler consumes (dependency registry, resource manager,
//! I/O dispatcher, collector, memory statistics, package loader), and the
//! concrete implementations live in `kiln-infra`.

#![warn(missing_docs)]

pub mod config;
pub mod gc;
pub mod io;
pub mod loader;
pub mod memory;
pub mod package;
pub mod registry;
pub mod utils;

pub use config::KilnConfig;
pub use package::{PackageId, PackageIdentity, PackageTable, Urgency};
pub use utils::timer::Stopwatch;
