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

//! The deserialization capability invoked once a package is ready for load.

use crate::io::PreloadHandle;
use crate::package::PackageIdentity;

/// Performs the real load of a package whose bytes have been warmed.
///
/// This is the "Data Plane" of the cook: everything before it only exists to
/// make sure the bytes are resident by the time it runs.
pub trait PackageLoader {
    /// Loads `package`. `preloaded` carries the warmed handle when the
    /// preloader managed to produce one; implementations must still be able to
    /// load without it.
    ///
    /// # Errors
    /// Returns an error if the package could not be deserialized. The scheduler
    /// logs it and moves on.
    fn load_package(
        &mut self,
        package: &PackageIdentity,
        preloaded: Option<PreloadHandle>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
