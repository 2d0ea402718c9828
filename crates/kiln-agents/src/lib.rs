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

//! # Kiln Agents
//!
//! Agents own the per-tick decisions of the cook. The [`CookScheduler`] drives
//! the preload lane, hands ready packages to the loader and asks the GC trigger
//! controller whether this tick should pause for a collection.

#![warn(missing_docs)]

pub mod cook_agent;

pub use cook_agent::{
    CookScheduler, SchedulerCapabilities, SchedulerContext, SchedulerMetrics, TickReport,
};
