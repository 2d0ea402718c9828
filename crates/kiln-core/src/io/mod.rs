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

//! File I/O capabilities consumed by the preloader.
//!
//! Preloading never blocks the scheduler thread. A preload is expressed as an
//! [`IoJob`] handed to an [`IoDispatcher`], which runs it somewhere else and
//! returns an [`IoTicket`]. The scheduler polls the ticket on its own schedule;
//! there is no completion callback that could mutate scheduler state behind
//! its back.
//!
//! A ticket reports two milestones: the handle being *opened* and the read
//! being *finished*. Blocking-urgency requests wait for the first one only.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An error raised while opening or reading a package file.
#[derive(Debug, Error)]
pub enum IoError {
    /// The package has no backing file.
    #[error("package file '{path}' not found")]
    NotFound {
        /// The path that was requested.
        path: PathBuf,
    },
    /// The file exists but could not be opened.
    #[error("failed to open '{path}': {source}")]
    Open {
        /// The path that failed to open.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// The file was opened but reading it failed.
    #[error("failed to read '{path}': {source}")]
    Read {
        /// The path that failed to read.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// The worker dropped the request without reporting a result.
    #[error("I/O request for '{path}' was dropped before completing")]
    Disconnected {
        /// The path of the abandoned request.
        path: PathBuf,
    },
}

/// How a preloader warms its package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PreloadMode {
    /// Read the file into a buffer and hand the warmed handle to the resource
    /// manager for the deserializer to pick up.
    #[default]
    FileHandle,
    /// Issue a full asynchronous load; the package is resident once it completes.
    AsyncLoad,
}

/// A warmed package file. The buffer is owned by the handle, never by the
/// collected object graph, so a collection cannot invalidate it.
#[derive(Debug, Clone)]
pub struct PreloadHandle {
    path: PathBuf,
    bytes: Arc<[u8]>,
}

impl PreloadHandle {
    /// Wraps bytes read from `path`.
    pub fn new(path: impl Into<PathBuf>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            path: path.into(),
            bytes: bytes.into(),
        }
    }

    /// The file this handle was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The warmed file contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The size of the warmed buffer in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` for an empty file.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The result a finished [`IoJob`] produces.
pub type IoResult = Result<PreloadHandle, IoError>;

/// A unit of background I/O. The job calls [`OpenSignal::opened`] as soon as its
/// handle is initialized, then performs the read.
pub type IoJob = Box<dyn FnOnce(&mut OpenSignal) -> IoResult + Send + 'static>;

/// Worker-side notifier for the "handle opened" milestone.
#[derive(Debug)]
pub struct OpenSignal {
    tx: Option<Sender<()>>,
}

impl OpenSignal {
    /// Reports that the handle has been opened. Only the first call has an effect.
    pub fn opened(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Worker-side half of an I/O request.
#[derive(Debug)]
pub struct IoCompletion {
    signal: OpenSignal,
    finished_tx: Sender<IoResult>,
}

impl IoCompletion {
    /// Runs `job` to completion and publishes its result.
    ///
    /// The opened milestone is always published, even when the job fails before
    /// opening, so a blocking waiter can never hang on a failed request.
    pub fn run(self, job: IoJob) {
        let mut signal = self.signal;
        let result = job(&mut signal);
        signal.opened();
        let _ = self.finished_tx.send(result);
    }
}

/// Scheduler-side half of an I/O request, polled without blocking.
#[derive(Debug)]
pub struct IoTicket {
    path: PathBuf,
    opened_rx: Receiver<()>,
    finished_rx: Receiver<IoResult>,
    opened: bool,
    finished: bool,
}

/// Creates the two halves of one I/O request for `path`.
pub fn io_request(path: impl Into<PathBuf>) -> (IoCompletion, IoTicket) {
    let (opened_tx, opened_rx) = crossbeam_channel::bounded(1);
    let (finished_tx, finished_rx) = crossbeam_channel::bounded(1);
    let completion = IoCompletion {
        signal: OpenSignal {
            tx: Some(opened_tx),
        },
        finished_tx,
    };
    let ticket = IoTicket {
        path: path.into(),
        opened_rx,
        finished_rx,
        opened: false,
        finished: false,
    };
    (completion, ticket)
}

impl IoTicket {
    /// The path this request reads.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Polls the opened milestone without blocking.
    pub fn is_opened(&mut self) -> bool {
        if !self.opened {
            match self.opened_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => self.opened = true,
                Err(TryRecvError::Empty) => {}
            }
        }
        self.opened
    }

    /// Blocks until the handle is opened (or the request is abandoned).
    /// Does not wait for the read to finish.
    pub fn wait_opened(&mut self) {
        if !self.opened {
            let _ = self.opened_rx.recv();
            self.opened = true;
        }
    }

    /// Returns `true` once [`try_finish`](Self::try_finish) or
    /// [`wait_finished`](Self::wait_finished) has yielded the result.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Polls for the final result without blocking. Yields it exactly once.
    pub fn try_finish(&mut self) -> Option<IoResult> {
        if self.finished {
            return None;
        }
        match self.finished_rx.try_recv() {
            Ok(result) => {
                self.opened = true;
                self.finished = true;
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.opened = true;
                self.finished = true;
                Some(Err(IoError::Disconnected {
                    path: self.path.clone(),
                }))
            }
        }
    }

    /// Blocks until this request completes. Used to flush in-flight I/O before
    /// tearing down its owner.
    pub fn wait_finished(&mut self) -> Option<IoResult> {
        if self.finished {
            return None;
        }
        self.opened = true;
        self.finished = true;
        Some(self.finished_rx.recv().unwrap_or_else(|_| {
            Err(IoError::Disconnected {
                path: self.path.clone(),
            })
        }))
    }
}

/// Runs I/O jobs off the scheduler thread.
pub trait IoDispatcher: Send + Sync {
    /// Queues `job` for `path` and returns the ticket to poll.
    fn dispatch(&self, path: PathBuf, job: IoJob) -> IoTicket;
}

/// Runs every job synchronously on the calling thread.
///
/// Useful for single-threaded cooks and deterministic tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl IoDispatcher for InlineDispatcher {
    fn dispatch(&self, path: PathBuf, job: IoJob) -> IoTicket {
        let (completion, ticket) = io_request(path);
        completion.run(job);
        ticket
    }
}

/// File access and warmed-handle hand-off between the preloader and the
/// deserializer.
pub trait ResourceManager: Send + Sync {
    /// Opens `path` for reading.
    fn open_for_read(&self, path: &Path) -> Result<Box<dyn Read + Send>, IoError>;

    /// Hands a warmed handle over so the deserializer can reuse it.
    ///
    /// Returns `false` if a handle is already registered for `path`.
    fn register_preloaded_handle(&self, path: &Path, handle: PreloadHandle) -> bool;

    /// Removes and returns the handle registered for `path`.
    fn take_preloaded_handle(&self, path: &Path) -> Option<PreloadHandle>;

    /// Returns `true` if `package` is loaded in memory.
    fn is_resident(&self, package: &str) -> bool;

    /// Lists every package currently loaded in memory.
    fn resident_packages(&self) -> Vec<String>;

    /// Completes an asynchronous load of `package` from its warmed bytes,
    /// making it resident. Called from an I/O worker.
    fn async_load(&self, package: &str, handle: PreloadHandle) -> Result<(), IoError>;
}

/// Builds the job that opens and reads `path` through `resources`.
pub fn read_file_job(resources: Arc<dyn ResourceManager>, path: PathBuf) -> IoJob {
    Box::new(move |signal: &mut OpenSignal| {
        let mut reader = resources.open_for_read(&path)?;
        signal.opened();
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|source| IoError::Read {
                path: path.clone(),
                source,
            })?;
        Ok(PreloadHandle::new(path, bytes))
    })
}

/// Builds the job that reads `path` and completes an asynchronous load of `package`.
pub fn async_load_job(
    resources: Arc<dyn ResourceManager>,
    package: Arc<str>,
    path: PathBuf,
) -> IoJob {
    let read = read_file_job(resources.clone(), path);
    Box::new(move |signal: &mut OpenSignal| {
        let handle = read(signal)?;
        resources.async_load(&package, handle.clone())?;
        Ok(handle)
    })
}
