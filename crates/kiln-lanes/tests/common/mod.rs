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

//! In-memory fakes shared by the preload lane integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use kiln_core::config::PreloadConfig;
use kiln_core::io::{
    io_request, IoCompletion, IoDispatcher, IoError, IoJob, IoTicket, OpenSignal, PreloadHandle,
    ResourceManager,
};
use kiln_core::package::{PackageId, PackageTable, Urgency};
use kiln_core::registry::DependencyRegistry;
use kiln_lanes::preload_lane::{LoadQueue, PreloadEnv};

/// Dependency registry backed by a fixed edge list.
#[derive(Default)]
pub struct MapRegistry {
    edges: HashMap<String, Vec<String>>,
}

impl MapRegistry {
    pub fn new(edges: &[(&str, &[&str])]) -> Self {
        Self {
            edges: edges
                .iter()
                .map(|(name, deps)| (name.to_string(), deps.iter().map(|d| d.to_string()).collect()))
                .collect(),
        }
    }
}

impl DependencyRegistry for MapRegistry {
    fn hard_dependencies(&self, package: &str) -> Vec<String> {
        self.edges.get(package).cloned().unwrap_or_default()
    }

    fn package_path(&self, package: &str) -> Option<PathBuf> {
        Some(path_of(package))
    }
}

pub fn path_of(package: &str) -> PathBuf {
    PathBuf::from(format!("{package}.pkg"))
}

/// Resource manager serving files from memory.
#[derive(Default)]
pub struct MemoryResources {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    handles: Mutex<HashMap<PathBuf, PreloadHandle>>,
    resident: Mutex<HashSet<String>>,
    pub registrations: Mutex<usize>,
    pub async_loads: Mutex<Vec<String>>,
}

impl MemoryResources {
    pub fn with_files(names: &[&str]) -> Self {
        let resources = Self::default();
        for name in names {
            resources.add_file(name);
        }
        resources
    }

    pub fn add_file(&self, name: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path_of(name), name.as_bytes().to_vec());
    }

    pub fn make_resident(&self, name: &str) {
        self.resident.lock().unwrap().insert(name.to_owned());
    }

    pub fn registered_handles(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    pub fn registration_count(&self) -> usize {
        *self.registrations.lock().unwrap()
    }
}

impl ResourceManager for MemoryResources {
    fn open_for_read(&self, path: &Path) -> Result<Box<dyn Read + Send>, IoError> {
        match self.files.lock().unwrap().get(path) {
            Some(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            None => Err(IoError::NotFound {
                path: path.to_path_buf(),
            }),
        }
    }

    fn register_preloaded_handle(&self, path: &Path, handle: PreloadHandle) -> bool {
        let mut handles = self.handles.lock().unwrap();
        if handles.contains_key(path) {
            return false;
        }
        handles.insert(path.to_path_buf(), handle);
        *self.registrations.lock().unwrap() += 1;
        true
    }

    fn take_preloaded_handle(&self, path: &Path) -> Option<PreloadHandle> {
        self.handles.lock().unwrap().remove(path)
    }

    fn is_resident(&self, package: &str) -> bool {
        self.resident.lock().unwrap().contains(package)
    }

    fn resident_packages(&self) -> Vec<String> {
        self.resident.lock().unwrap().iter().cloned().collect()
    }

    fn async_load(&self, package: &str, _handle: PreloadHandle) -> Result<(), IoError> {
        self.async_loads.lock().unwrap().push(package.to_owned());
        self.make_resident(package);
        Ok(())
    }
}

/// Holds every dispatched job until the test releases it.
pub struct ManualDispatcher {
    tx: Sender<(IoCompletion, IoJob)>,
    rx: Receiver<(IoCompletion, IoJob)>,
    dispatched: Mutex<Vec<PathBuf>>,
}

impl Default for ManualDispatcher {
    fn default() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            dispatched: Mutex::new(Vec::new()),
        }
    }
}

impl ManualDispatcher {
    /// Runs the oldest held job. Returns `false` if none was held.
    pub fn complete_one(&self) -> bool {
        match self.rx.try_recv() {
            Ok((completion, job)) => {
                completion.run(job);
                true
            }
            Err(_) => false,
        }
    }

    /// Runs every held job.
    pub fn complete_all(&self) -> usize {
        let mut count = 0;
        while self.complete_one() {
            count += 1;
        }
        count
    }

    pub fn held(&self) -> usize {
        self.rx.len()
    }

    /// Paths in dispatch order.
    pub fn dispatched(&self) -> Vec<PathBuf> {
        self.dispatched.lock().unwrap().clone()
    }
}

impl IoDispatcher for ManualDispatcher {
    fn dispatch(&self, path: PathBuf, job: IoJob) -> IoTicket {
        let (completion, ticket) = io_request(path.clone());
        self.dispatched.lock().unwrap().push(path);
        self.tx.send((completion, job)).unwrap();
        ticket
    }
}

/// Runs each job on its own thread. The worker reports the handle opened
/// right away, then holds the read until [`release`](Self::release).
pub struct GatedDispatcher {
    gate_tx: Sender<()>,
    gate_rx: Receiver<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for GatedDispatcher {
    fn default() -> Self {
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        Self {
            gate_tx,
            gate_rx,
            workers: Mutex::new(Vec::new()),
        }
    }
}

impl GatedDispatcher {
    /// Lets every held read proceed and waits for the workers to finish.
    pub fn release(&self) {
        let workers: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for _ in &workers {
            self.gate_tx.send(()).unwrap();
        }
        for worker in workers {
            worker.join().unwrap();
        }
    }
}

impl IoDispatcher for GatedDispatcher {
    fn dispatch(&self, path: PathBuf, job: IoJob) -> IoTicket {
        let (completion, ticket) = io_request(path);
        let gate = self.gate_rx.clone();
        let worker = std::thread::spawn(move || {
            completion.run(Box::new(move |signal: &mut OpenSignal| {
                signal.opened();
                let _ = gate.recv();
                job(signal)
            }));
        });
        self.workers.lock().unwrap().push(worker);
        ticket
    }
}

/// A load queue together with the capabilities it pumps against.
pub struct Harness {
    pub packages: PackageTable,
    pub registry: MapRegistry,
    pub memory: Arc<MemoryResources>,
    pub resources: Arc<dyn ResourceManager>,
    pub dispatcher: ManualDispatcher,
    pub queue: LoadQueue,
}

impl Harness {
    pub fn new(edges: &[(&str, &[&str])], config: PreloadConfig) -> Self {
        // Only packages listed as edge sources get a backing file.
        let names: Vec<&str> = edges.iter().map(|(name, _)| *name).collect();
        let memory = Arc::new(MemoryResources::with_files(&names));
        let resources: Arc<dyn ResourceManager> = memory.clone();
        Self {
            packages: PackageTable::new(),
            registry: MapRegistry::new(edges),
            memory,
            resources,
            dispatcher: ManualDispatcher::default(),
            queue: LoadQueue::new(config),
        }
    }

    pub fn package(&mut self, name: &str) -> PackageId {
        self.packages.intern(name, path_of(name))
    }

    pub fn enqueue(&mut self, name: &str, urgency: Urgency) -> PackageId {
        let package = self.package(name);
        self.queue.enqueue(package, urgency);
        package
    }

    pub fn start_inbox(&mut self) -> bool {
        let mut env = PreloadEnv {
            packages: &mut self.packages,
            registry: &self.registry,
            resources: &self.resources,
            dispatcher: &self.dispatcher,
        };
        self.queue.pump_try_start_inbox_package(&mut env)
    }

    pub fn kick(&mut self) -> bool {
        let env = PreloadEnv {
            packages: &mut self.packages,
            registry: &self.registry,
            resources: &self.resources,
            dispatcher: &self.dispatcher,
        };
        self.queue.pump_try_kick_preload(&env)
    }

    pub fn poll_ready(&mut self) -> bool {
        let env = PreloadEnv {
            packages: &mut self.packages,
            registry: &self.registry,
            resources: &self.resources,
            dispatcher: &self.dispatcher,
        };
        self.queue.pump_loads_is_ready_to_leave_preload(&env)
    }

    /// Runs all three pumps until none makes progress, checking invariants
    /// after every step.
    pub fn pump_until_idle(&mut self) {
        loop {
            let mut progress = self.start_inbox();
            self.assert_invariants();
            progress |= self.kick();
            self.assert_invariants();
            progress |= self.poll_ready();
            self.assert_invariants();
            if !progress {
                break;
            }
        }
    }

    pub fn mark_loaded(&mut self, package: PackageId) {
        let env = PreloadEnv {
            packages: &mut self.packages,
            registry: &self.registry,
            resources: &self.resources,
            dispatcher: &self.dispatcher,
        };
        self.queue.mark_load_attempt_complete(package, &env);
    }

    pub fn leave(&mut self, package: PackageId) {
        let env = PreloadEnv {
            packages: &mut self.packages,
            registry: &self.registry,
            resources: &self.resources,
            dispatcher: &self.dispatcher,
        };
        self.queue.leave_load_state(package, &env);
    }

    pub fn needs_load(&mut self, package: PackageId) -> bool {
        let env = PreloadEnv {
            packages: &mut self.packages,
            registry: &self.registry,
            resources: &self.resources,
            dispatcher: &self.dispatcher,
        };
        self.queue.needs_load(package, &env)
    }

    pub fn id(&self, name: &str) -> PackageId {
        self.packages.lookup(name).unwrap()
    }

    pub fn assert_invariants(&self) {
        if let Err(violation) = self.queue.check_invariants() {
            panic!("load queue invariant violated: {violation}");
        }
    }
}
