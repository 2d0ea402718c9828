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

//! The `kiln` binary: cooks every requested package of a manifest.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use kiln_agents::{CookScheduler, SchedulerCapabilities, SchedulerContext};
use kiln_core::io::ResourceManager;
use kiln_core::package::Urgency;
use kiln_core::KilnConfig;
use kiln_infra::{
    FilePackageLoader, FileResourceManager, ManifestDependencyRegistry, ResidencyCollector,
    SysinfoMemoryStats, ThreadPoolDispatcher,
};
use kiln_telemetry::MetricsRegistry;

/// Sleep between ticks that made no progress while reads are in flight.
const IDLE_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum UrgencyArg {
    Normal,
    High,
    Blocking,
}

impl From<UrgencyArg> for Urgency {
    fn from(value: UrgencyArg) -> Self {
        match value {
            UrgencyArg::Normal => Urgency::Normal,
            UrgencyArg::High => Urgency::High,
            UrgencyArg::Blocking => Urgency::Blocking,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "kiln", version, about = "Preloads and loads packages, collecting garbage as memory demands")]
struct Cli {
    /// Package manifest (RON).
    #[arg(short, long)]
    manifest: PathBuf,

    /// Content root the manifest paths are relative to. Defaults to the manifest's directory.
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Scheduler configuration (RON). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Packages to cook. Every manifest package when empty.
    packages: Vec<String>,

    /// Urgency of the requested packages.
    #[arg(long, value_enum, default_value_t = UrgencyArg::Normal)]
    urgency: UrgencyArg,

    /// Background I/O worker threads.
    #[arg(long, default_value_t = 4)]
    io_threads: usize,

    /// Give up after this many ticks.
    #[arg(long, default_value_t = 1_000_000)]
    max_ticks: u64,

    /// Write the final metrics snapshot to this file as JSON.
    #[arg(long)]
    metrics_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    kiln_telemetry::init_logging("info");
    run(Cli::parse())
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => KilnConfig::load(path)
            .with_context(|| format!("failed to load config '{}'", path.display()))?,
        None => KilnConfig::default(),
    };
    let registry = Arc::new(ManifestDependencyRegistry::load(&cli.manifest)?);
    let root = cli
        .root
        .clone()
        .unwrap_or_else(|| content_root_of(&cli.manifest));

    let resources = Arc::new(FileResourceManager::new(root));
    let dispatcher = ThreadPoolDispatcher::new(cli.io_threads)
        .context("failed to start the I/O worker pool")?;
    log::info!(
        "kiln: {} packages in manifest, {} I/O workers, content root '{}'",
        registry.len(),
        dispatcher.worker_count(),
        resources.root().display()
    );

    let shared: Arc<dyn ResourceManager> = resources.clone();
    let caps = SchedulerCapabilities {
        registry: registry.clone(),
        resources: shared,
        dispatcher: Arc::new(dispatcher),
        memory: Arc::new(SysinfoMemoryStats::new()),
    };
    let metrics = MetricsRegistry::new();
    let mut scheduler = CookScheduler::new(
        caps,
        Box::new(ResidencyCollector::new(resources.clone(), 0)),
        Box::new(FilePackageLoader::new(resources.clone())),
        config.scheduler.clone(),
        &metrics,
    )?;
    let mut ctx = SchedulerContext::new(&config, Instant::now());

    let requested: Vec<String> = if cli.packages.is_empty() {
        registry.package_names().map(str::to_owned).collect()
    } else {
        cli.packages.clone()
    };
    for name in &requested {
        scheduler.request(&mut ctx, name, cli.urgency.into())?;
    }

    let started = Instant::now();
    let mut ticks = 0u64;
    while !ctx.is_drained() {
        if ticks == cli.max_ticks {
            bail!("gave up after {ticks} ticks with packages still in load state");
        }
        let report = scheduler.tick(&mut ctx);
        ticks += 1;
        if report.stalled {
            bail!(
                "the scheduler stalled with {} packages in load state",
                report.stages.load_state
            );
        }
        if report.progress == 0 && ctx.queue.has_outstanding_io() {
            std::thread::sleep(IDLE_WAIT);
        }
    }

    let m = scheduler.metrics();
    log::info!(
        "kiln: cooked {} requested packages in {:.2?} over {} ticks: {} loaded, {} failed, {} preloads, {} soft / {} full collections, {} bytes resident",
        requested.len(),
        started.elapsed(),
        ticks,
        m.packages_loaded.get().unwrap_or_default(),
        m.load_failures.get().unwrap_or_default(),
        m.preloads_kicked.get().unwrap_or_default(),
        m.soft_collections.get().unwrap_or_default(),
        m.full_collections.get().unwrap_or_default(),
        resources.resident_bytes()
    );
    for report in scheduler.diagnostic_reports() {
        report.log_summary();
    }

    if let Some(path) = &cli.metrics_out {
        let json = metrics
            .snapshot_json()
            .context("failed to serialize metrics")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write metrics to '{}'", path.display()))?;
    }
    Ok(())
}

fn content_root_of(manifest: &Path) -> PathBuf {
    manifest
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
