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

//! # Kiln Infra
//!
//! Concrete implementations of the capability traits declared in `kiln-core`:
//! a worker-pool I/O dispatcher, a filesystem-backed resource manager, a
//! `sysinfo` memory sampler, a RON dependency manifest, a residency collector
//! and a file package loader. The scheduler itself only sees the traits.

#![warn(missing_docs)]

pub mod gc;
pub mod io;
pub mod loader;
pub mod platform;
pub mod registry;

pub use gc::ResidencyCollector;
pub use io::{FileResourceManager, ThreadPoolDispatcher};
pub use loader::FilePackageLoader;
pub use platform::SysinfoMemoryStats;
pub use registry::{ManifestDependencyRegistry, ManifestEntry};
