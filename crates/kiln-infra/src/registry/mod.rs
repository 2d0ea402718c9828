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

//! A dependency registry loaded from a RON manifest.
//!
//! ```ron
//! (
//!     packages: [
//!         (name: "Level", path: "maps/level.pkg", imports: ["Mesh"]),
//!         (name: "Mesh", path: "meshes/mesh.pkg"),
//!     ],
//! )
//! ```

use std::path::{Path, PathBuf};

use ahash::AHashMap;
use anyhow::Context;
use kiln_core::registry::DependencyRegistry;
use serde::Deserialize;

/// One package listed in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestEntry {
    /// The package name.
    pub name: String,
    /// The backing file, relative to the content root.
    pub path: PathBuf,
    /// Hard imports, in order.
    #[serde(default)]
    pub imports: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    packages: Vec<ManifestEntry>,
}

/// Dependency registry backed by an in-memory manifest.
#[derive(Debug, Default)]
pub struct ManifestDependencyRegistry {
    entries: AHashMap<String, ManifestEntry>,
    order: Vec<String>,
}

impl ManifestDependencyRegistry {
    /// Builds a registry from explicit entries. Later duplicates replace earlier ones.
    pub fn from_entries(entries: impl IntoIterator<Item = ManifestEntry>) -> Self {
        let mut registry = Self::default();
        for entry in entries {
            if registry.entries.contains_key(&entry.name) {
                log::warn!("Manifest: duplicate package '{}', keeping the last entry", entry.name);
            } else {
                registry.order.push(entry.name.clone());
            }
            registry.entries.insert(entry.name.clone(), entry);
        }
        registry
    }

    /// Parses a RON manifest.
    pub fn from_ron_str(source: &str) -> anyhow::Result<Self> {
        let manifest: Manifest = ron::from_str(source).context("invalid package manifest")?;
        Ok(Self::from_entries(manifest.packages))
    }

    /// Loads a RON manifest from disk.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest '{}'", path.display()))?;
        let registry = Self::from_ron_str(&source)
            .with_context(|| format!("failed to parse manifest '{}'", path.display()))?;
        log::info!("Manifest: loaded {} packages from '{}'", registry.len(), path.display());
        Ok(registry)
    }

    /// Package names in manifest order.
    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Looks up one entry.
    pub fn entry(&self, package: &str) -> Option<&ManifestEntry> {
        self.entries.get(package)
    }

    /// The number of packages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the manifest lists no package.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DependencyRegistry for ManifestDependencyRegistry {
    fn hard_dependencies(&self, package: &str) -> Vec<String> {
        self.entries
            .get(package)
            .map(|entry| entry.imports.clone())
            .unwrap_or_default()
    }

    fn package_path(&self, package: &str) -> Option<PathBuf> {
        self.entries.get(package).map(|entry| entry.path.clone())
    }
}
