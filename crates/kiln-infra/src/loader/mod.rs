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

//! A package loader that reads package files from disk.

use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use kiln_core::io::{PreloadHandle, ResourceManager};
use kiln_core::loader::PackageLoader;
use kiln_core::package::PackageIdentity;

use crate::io::FileResourceManager;

/// "Deserializes" a package by making its bytes resident.
///
/// Warmed handles are used as-is; otherwise the file is read synchronously.
pub struct FilePackageLoader {
    resources: Arc<FileResourceManager>,
    loaded: u64,
    preloaded_hits: u64,
}

impl FilePackageLoader {
    /// Creates a loader that records residency in `resources`.
    pub fn new(resources: Arc<FileResourceManager>) -> Self {
        Self {
            resources,
            loaded: 0,
            preloaded_hits: 0,
        }
    }

    /// Packages loaded so far.
    pub fn loaded(&self) -> u64 {
        self.loaded
    }

    /// Loads that reused a warmed handle.
    pub fn preloaded_hits(&self) -> u64 {
        self.preloaded_hits
    }

    fn read(&self, package: &PackageIdentity) -> anyhow::Result<u64> {
        let mut reader = self
            .resources
            .open_for_read(package.path())
            .with_context(|| format!("failed to open package '{}'", package.name()))?;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read package '{}'", package.name()))?;
        Ok(bytes.len() as u64)
    }
}

impl PackageLoader for FilePackageLoader {
    fn load_package(
        &mut self,
        package: &PackageIdentity,
        preloaded: Option<PreloadHandle>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let size = match preloaded {
            Some(handle) => {
                self.preloaded_hits += 1;
                handle.len() as u64
            }
            None => self.read(package)?,
        };
        self.resources.mark_resident(package.name(), size);
        self.loaded += 1;
        log::trace!("FilePackageLoader: loaded '{}' ({} bytes)", package.name(), size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_with_and_without_preload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.pkg"), b"alpha").unwrap();
        let resources = Arc::new(FileResourceManager::new(dir.path()));
        let mut loader = FilePackageLoader::new(resources.clone());

        let a = PackageIdentity::new("A", "a.pkg");
        loader.load_package(&a, None).unwrap();
        let b = PackageIdentity::new("B", "b.pkg");
        loader
            .load_package(&b, Some(PreloadHandle::new("b.pkg", b"bravo!".to_vec())))
            .unwrap();

        assert_eq!(loader.loaded(), 2);
        assert_eq!(loader.preloaded_hits(), 1);
        assert_eq!(resources.resident_bytes(), 11);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = FilePackageLoader::new(Arc::new(FileResourceManager::new(dir.path())));
        let err = loader
            .load_package(&PackageIdentity::new("Ghost", "ghost.pkg"), None)
            .unwrap_err();
        assert!(err.to_string().contains("Ghost"));
    }
}
