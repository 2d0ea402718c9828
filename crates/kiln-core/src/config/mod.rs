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

//! Configuration for the preload scheduler and the GC trigger heuristics.
//!
//! Every section deserializes with `#[serde(default)]`, so a config file only
//! needs to mention the options it overrides. Memory thresholds are expressed
//! in megabytes and `0` disables the corresponding trigger.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::io::PreloadMode;
use crate::memory::MemoryPressure;

/// An error raised while loading or validating a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config '{path}': {source}")]
    Read {
        /// The config path.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid RON for [`KilnConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    /// A value is outside its valid range.
    #[error("invalid config value for `{option}`: {reason}")]
    Invalid {
        /// The offending option.
        option: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// How the min-free and max-used memory triggers combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerPolicy {
    /// Collect when either trigger fires.
    #[default]
    Or,
    /// Collect only when both triggers fire.
    And,
}

/// Settings for the package preloader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Master switch. When off, every package bypasses preloading.
    pub enabled: bool,
    /// Whether a package's imports are preloaded along with it.
    pub allow_import_preloading: bool,
    /// Maximum number of preload requests in flight at once.
    pub max_concurrent_preloads: usize,
    /// How preloads are issued.
    pub mode: PreloadMode,
}

impl PreloadConfig {
    /// Rejects a zero in-flight budget while preloading is on; nothing could
    /// ever be kicked.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.max_concurrent_preloads == 0 {
            return Err(ConfigError::Invalid {
                option: "max_concurrent_preloads",
                reason: "must be at least 1 while preloading is enabled".into(),
            });
        }
        Ok(())
    }
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_import_preloading: true,
            max_concurrent_preloads: 32,
            mode: PreloadMode::FileHandle,
        }
    }
}

/// Settings for the adaptive garbage-collection trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcTriggerConfig {
    /// Collect when available physical memory drops below this many MB.
    pub min_free_physical_mb: u64,
    /// Collect when available virtual memory drops below this many MB.
    pub min_free_virtual_mb: u64,
    /// Collect when used physical memory rises above this many MB.
    pub max_used_physical_mb: u64,
    /// Collect when used virtual memory rises above this many MB.
    pub max_used_virtual_mb: u64,
    /// How the min-free and max-used triggers combine.
    pub min_free_max_used_policy: TriggerPolicy,
    /// Collect when the OS reports at least this pressure level. `None` disables it.
    pub memory_pressure_trigger: Option<MemoryPressure>,
    /// Numerator of the first soft-GC target fraction of total physical memory. `0` disables it.
    pub soft_gc_start_numerator: u32,
    /// Denominator of the soft-GC target fraction; also the step granularity.
    pub soft_gc_denominator: u32,
    /// Fraction of wall-clock time soft collections may consume. `0` disables periodic soft GC.
    pub soft_gc_time_fraction_budget: f64,
    /// Minimum seconds between two soft collections.
    pub soft_gc_min_period_secs: f64,
    /// Collect after this many packages have been processed since the last collection. `0` disables it.
    pub packages_between_gc: u32,
    /// Seconds after a full collection during which memory triggers are suppressed.
    pub gc_cooldown_secs: f64,
    /// Number of soft-GC durations averaged for the time-budget forecast.
    pub soft_gc_history_len: usize,
    /// Collect when live objects exceed this fraction of the object table. `0` disables it.
    pub object_table_trigger_fraction: f64,
    /// Emit a diagnostic report when an out-of-memory collection frees less than
    /// this fraction of the recent used-memory spread.
    pub oom_report_fraction: f64,
    /// Number of used-memory samples kept for the spread computation.
    pub memory_history_len: usize,
}

impl Default for GcTriggerConfig {
    fn default() -> Self {
        Self {
            min_free_physical_mb: 0,
            min_free_virtual_mb: 0,
            max_used_physical_mb: 0,
            max_used_virtual_mb: 0,
            min_free_max_used_policy: TriggerPolicy::Or,
            memory_pressure_trigger: Some(MemoryPressure::Critical),
            soft_gc_start_numerator: 0,
            soft_gc_denominator: 10,
            soft_gc_time_fraction_budget: 0.0,
            soft_gc_min_period_secs: 30.0,
            packages_between_gc: 0,
            gc_cooldown_secs: 60.0,
            soft_gc_history_len: 5,
            object_table_trigger_fraction: 0.9,
            oom_report_fraction: 0.5,
            memory_history_len: 10,
        }
    }
}

impl GcTriggerConfig {
    /// The cooldown window after a full collection.
    pub fn gc_cooldown(&self) -> Duration {
        saturating_secs(self.gc_cooldown_secs)
    }

    /// The minimum period between soft collections.
    pub fn soft_gc_min_period(&self) -> Duration {
        saturating_secs(self.soft_gc_min_period_secs)
    }

    /// Checks value ranges that would otherwise produce nonsensical forecasts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_secs("gc_cooldown_secs", self.gc_cooldown_secs)?;
        check_secs("soft_gc_min_period_secs", self.soft_gc_min_period_secs)?;
        if !(0.0..1.0).contains(&self.soft_gc_time_fraction_budget) {
            return Err(ConfigError::Invalid {
                option: "soft_gc_time_fraction_budget",
                reason: format!("{} is not in [0, 1)", self.soft_gc_time_fraction_budget),
            });
        }
        if self.soft_gc_start_numerator > 0 && self.soft_gc_denominator == 0 {
            return Err(ConfigError::Invalid {
                option: "soft_gc_denominator",
                reason: "must be non-zero when soft_gc_start_numerator is set".into(),
            });
        }
        if self.soft_gc_start_numerator > self.soft_gc_denominator {
            return Err(ConfigError::Invalid {
                option: "soft_gc_start_numerator",
                reason: format!(
                    "{} exceeds the denominator {}",
                    self.soft_gc_start_numerator, self.soft_gc_denominator
                ),
            });
        }
        if self.soft_gc_history_len == 0 {
            return Err(ConfigError::Invalid {
                option: "soft_gc_history_len",
                reason: "must hold at least one sample".into(),
            });
        }
        Ok(())
    }
}

/// Negative values clamp to zero, values too large for a [`Duration`] to `Duration::MAX`.
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

fn check_secs(option: &'static str, secs: f64) -> Result<(), ConfigError> {
    if secs < 0.0 || Duration::try_from_secs_f64(secs).is_err() {
        return Err(ConfigError::Invalid {
            option,
            reason: format!("{secs} is not a finite, non-negative number of seconds"),
        });
    }
    Ok(())
}

/// Settings for the scheduler tick itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum ReadyForLoad packages handed to the loader per tick.
    pub loads_per_tick: usize,
    /// Upper bound on pump calls per tick.
    pub max_pump_iterations: usize,
}

impl SchedulerConfig {
    /// Rejects budgets under which a tick could never make progress.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loads_per_tick == 0 {
            return Err(ConfigError::Invalid {
                option: "loads_per_tick",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_pump_iterations == 0 {
            return Err(ConfigError::Invalid {
                option: "max_pump_iterations",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            loads_per_tick: 8,
            max_pump_iterations: 10_000,
        }
    }
}

/// The complete configuration of a cook session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    /// Preloader settings.
    pub preload: PreloadConfig,
    /// GC trigger settings.
    pub gc: GcTriggerConfig,
    /// Scheduler tick settings.
    pub scheduler: SchedulerConfig,
}

impl KilnConfig {
    /// Parses a RON document.
    pub fn from_ron_str(source: &str) -> Result<Self, ConfigError> {
        let config: KilnConfig = ron::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.preload.validate()?;
        self.gc.validate()?;
        self.scheduler.validate()
    }

    /// Reads and parses a RON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = KilnConfig::from_ron_str("()").unwrap();
        assert_eq!(config, KilnConfig::default());
        assert_eq!(config.preload.max_concurrent_preloads, 32);
        assert_eq!(config.gc.soft_gc_history_len, 5);
    }

    #[test]
    fn partial_override() {
        let config = KilnConfig::from_ron_str(
            r#"(
                preload: (max_concurrent_preloads: 4, mode: AsyncLoad),
                gc: (min_free_physical_mb: 512, min_free_max_used_policy: And),
            )"#,
        )
        .unwrap();
        assert_eq!(config.preload.max_concurrent_preloads, 4);
        assert_eq!(config.preload.mode, PreloadMode::AsyncLoad);
        assert!(config.preload.allow_import_preloading);
        assert_eq!(config.gc.min_free_physical_mb, 512);
        assert_eq!(config.gc.min_free_max_used_policy, TriggerPolicy::And);
    }

    #[test]
    fn invalid_time_fraction_is_rejected() {
        let err = KilnConfig::from_ron_str("(gc: (soft_gc_time_fraction_budget: 1.0))").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                option: "soft_gc_time_fraction_budget",
                ..
            }
        ));
    }

    fn rejected_option(source: &str) -> &'static str {
        match KilnConfig::from_ron_str(source) {
            Err(ConfigError::Invalid { option, .. }) => option,
            other => panic!("expected {source} to be rejected, got {other:?}"),
        }
    }

    #[test]
    fn zero_preload_budget_is_rejected_while_enabled() {
        assert_eq!(
            rejected_option("(preload: (max_concurrent_preloads: 0))"),
            "max_concurrent_preloads"
        );
        let disabled =
            KilnConfig::from_ron_str("(preload: (enabled: false, max_concurrent_preloads: 0))");
        assert!(disabled.is_ok());
    }

    #[test]
    fn zero_scheduler_budgets_are_rejected() {
        assert_eq!(
            rejected_option("(scheduler: (loads_per_tick: 0))"),
            "loads_per_tick"
        );
        assert_eq!(
            rejected_option("(scheduler: (max_pump_iterations: 0))"),
            "max_pump_iterations"
        );
    }

    #[test]
    fn out_of_range_durations_are_rejected() {
        assert_eq!(
            rejected_option("(gc: (soft_gc_min_period_secs: 1e30))"),
            "soft_gc_min_period_secs"
        );
        assert_eq!(
            rejected_option("(gc: (gc_cooldown_secs: -1.0))"),
            "gc_cooldown_secs"
        );

        let mut config = GcTriggerConfig::default();
        config.gc_cooldown_secs = f64::INFINITY;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                option: "gc_cooldown_secs",
                ..
            })
        ));
        config.gc_cooldown_secs = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duration_accessors_saturate_instead_of_panicking() {
        let config = GcTriggerConfig {
            gc_cooldown_secs: f64::INFINITY,
            soft_gc_min_period_secs: -5.0,
            ..GcTriggerConfig::default()
        };
        assert_eq!(config.gc_cooldown(), Duration::MAX);
        assert_eq!(config.soft_gc_min_period(), Duration::ZERO);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "(scheduler: (loads_per_tick: 2))").unwrap();
        let config = KilnConfig::load(file.path()).unwrap();
        assert_eq!(config.scheduler.loads_per_tick, 2);

        let missing = KilnConfig::load(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
