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

//! # Kiln Control
//!
//! Decides when the cook pauses forward progress to reclaim memory.
//!
//! The [`GcTriggerController`] samples memory and object-table signals once per
//! tick, picks between a cheap soft collection and an expensive full one, and
//! after each pass updates the forecasts that drive the next decision.

#![warn(missing_docs)]

pub mod analysis;
pub mod history;
pub mod keep_alive;
pub mod report;
pub mod trigger;

pub use analysis::{GcDecision, SignalInputs, TriggerSignals};
pub use history::{SoftGcHistory, UsedMemoryHistory};
pub use keep_alive::{plan_keep_alive, still_resident, KeepAlivePlan, PipelinePackages};
pub use report::{GcDiagnosticReport, RetainedPackage};
pub use trigger::{CollectionOutcome, CollectionResults, GcTriggerController};
