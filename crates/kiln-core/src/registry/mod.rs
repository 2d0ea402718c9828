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

//! The dependency registry capability.

use std::path::PathBuf;

/// Answers dependency questions about packages by name.
///
/// Implementations are expected to be cheap to query; the scheduler asks for
/// a package's hard dependencies at most once per activation.
pub trait DependencyRegistry: Send + Sync {
    /// Returns the ordered hard dependencies of `package`.
    ///
    /// Unknown packages have no dependencies.
    fn hard_dependencies(&self, package: &str) -> Vec<String>;

    /// Returns the file backing `package`, if the registry knows it.
    fn package_path(&self, package: &str) -> Option<PathBuf>;
}
