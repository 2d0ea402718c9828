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

//! A `std::fs`-backed resource manager.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ahash::AHashMap;
use kiln_core::io::{IoError, PreloadHandle, ResourceManager};

/// Serves package files from a content root and tracks which packages are
/// resident in memory.
///
/// Relative package paths are resolved against the root; preloaded handles
/// are keyed by the path exactly as the preloader requested it.
#[derive(Debug)]
pub struct FileResourceManager {
    root: PathBuf,
    handles: Mutex<AHashMap<PathBuf, PreloadHandle>>,
    resident: Mutex<AHashMap<String, u64>>,
}

impl FileResourceManager {
    /// Creates a manager serving files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            handles: Mutex::new(AHashMap::new()),
            resident: Mutex::new(AHashMap::new()),
        }
    }

    /// The content root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a package path against the content root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Records `package` as resident, occupying `bytes`.
    pub fn mark_resident(&self, package: &str, bytes: u64) {
        self.resident
            .lock()
            .unwrap()
            .insert(package.to_owned(), bytes);
    }

    /// Forgets `package`, returning `true` if it was resident.
    pub fn evict(&self, package: &str) -> bool {
        self.resident.lock().unwrap().remove(package).is_some()
    }

    /// Bytes held by resident packages.
    pub fn resident_bytes(&self) -> u64 {
        self.resident.lock().unwrap().values().sum()
    }

    /// The number of warmed handles waiting to be consumed.
    pub fn pending_handles(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}

impl ResourceManager for FileResourceManager {
    fn open_for_read(&self, path: &Path) -> Result<Box<dyn Read + Send>, IoError> {
        let resolved = self.resolve(path);
        match File::open(&resolved) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(IoError::NotFound { path: resolved }),
            Err(source) => Err(IoError::Open {
                path: resolved,
                source,
            }),
        }
    }

    fn register_preloaded_handle(&self, path: &Path, handle: PreloadHandle) -> bool {
        let mut handles = self.handles.lock().unwrap();
        if handles.contains_key(path) {
            return false;
        }
        handles.insert(path.to_path_buf(), handle);
        true
    }

    fn take_preloaded_handle(&self, path: &Path) -> Option<PreloadHandle> {
        self.handles.lock().unwrap().remove(path)
    }

    fn is_resident(&self, package: &str) -> bool {
        self.resident.lock().unwrap().contains_key(package)
    }

    fn resident_packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = self.resident.lock().unwrap().keys().cloned().collect();
        packages.sort();
        packages
    }

    fn async_load(&self, package: &str, handle: PreloadHandle) -> Result<(), IoError> {
        log::trace!("FileResourceManager: '{package}' loaded asynchronously ({} bytes)", handle.len());
        self.mark_resident(package, handle.len() as u64);
        Ok(())
    }
}
