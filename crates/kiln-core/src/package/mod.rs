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

//! Package identities and the interning table that hands them out.
//!
//! A package is a named, file-backed unit of loadable data. Every layer of the
//! scheduler refers to packages through a compact [`PackageId`]; the table maps
//! the id back to the immutable [`PackageIdentity`] (name plus backing path).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;

/// A compact handle to an interned package identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(u32);

impl PackageId {
    /// Returns the raw index of this id inside its [`PackageTable`].
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkg#{}", self.0)
    }
}

/// The immutable identity of a package: its unique name and the file backing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageIdentity {
    name: Arc<str>,
    path: PathBuf,
}

impl PackageIdentity {
    /// Creates a new identity.
    pub fn new(name: impl Into<Arc<str>>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// The unique package name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A cheap shared copy of the package name.
    pub fn shared_name(&self) -> Arc<str> {
        self.name.clone()
    }

    /// The file backing this package.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Interns package names into [`PackageId`]s.
///
/// Identities are immutable once assigned: interning an already known name
/// returns the existing id and keeps the original path.
#[derive(Debug, Default)]
pub struct PackageTable {
    identities: Vec<PackageIdentity>,
    by_name: AHashMap<Arc<str>, PackageId>,
}

impl PackageTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `name`, recording `path` as its backing file if the name is new.
    pub fn intern(&mut self, name: &str, path: impl Into<PathBuf>) -> PackageId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }

        let id = PackageId(self.identities.len() as u32);
        let identity = PackageIdentity::new(name, path);
        self.by_name.insert(identity.shared_name(), id);
        self.identities.push(identity);
        id
    }

    /// Returns the id of an already interned name.
    pub fn lookup(&self, name: &str) -> Option<PackageId> {
        self.by_name.get(name).copied()
    }

    /// Returns the identity behind `id`.
    ///
    /// # Panics
    /// Panics if `id` was produced by a different table.
    pub fn identity(&self, id: PackageId) -> &PackageIdentity {
        &self.identities[id.index()]
    }

    /// Shorthand for `identity(id).name()`.
    pub fn name(&self, id: PackageId) -> &str {
        self.identity(id).name()
    }

    /// The number of interned packages.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Returns `true` if nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// Caller-declared urgency of a load request. Higher wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Urgency {
    /// Regular background cooking.
    #[default]
    Normal,
    /// Requested ahead of the regular queue, e.g. by a dependent save.
    High,
    /// The caller is waiting synchronously on this package.
    Blocking,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_returns_stable_ids() {
        let mut table = PackageTable::new();
        let a = table.intern("/Game/A", "content/a.pkg");
        let b = table.intern("/Game/B", "content/b.pkg");
        assert_ne!(a, b);
        assert_eq!(table.intern("/Game/A", "elsewhere.pkg"), a);
        assert_eq!(table.identity(a).path(), Path::new("content/a.pkg"));
        assert_eq!(table.lookup("/Game/B"), Some(b));
        assert_eq!(table.lookup("/Game/C"), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn urgency_orders_blocking_highest() {
        assert!(Urgency::Blocking > Urgency::High);
        assert!(Urgency::High > Urgency::Normal);
        assert_eq!(Urgency::default(), Urgency::Normal);
    }
}
