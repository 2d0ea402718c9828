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

//! A fixed-size worker pool running I/O jobs.

use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use kiln_core::io::{io_request, IoCompletion, IoDispatcher, IoJob, IoTicket};

type Request = (IoCompletion, IoJob);

/// Runs I/O jobs on a pool of named worker threads.
///
/// Jobs are taken from a shared queue in submission order. Dropping the pool
/// lets the workers drain the queue, then joins them.
pub struct ThreadPoolDispatcher {
    sender: Option<Sender<Request>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPoolDispatcher {
    /// Spawns `threads` workers (at least one).
    ///
    /// # Errors
    /// Returns an error if the OS refuses to spawn a thread.
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Request>();
        let mut workers = Vec::new();
        for index in 0..threads.max(1) {
            let receiver: Receiver<Request> = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("kiln-io-{index}"))
                .spawn(move || {
                    while let Ok((completion, job)) = receiver.recv() {
                        completion.run(job);
                    }
                })?;
            workers.push(handle);
        }
        log::debug!("ThreadPoolDispatcher: started {} I/O workers", workers.len());
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// The number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl IoDispatcher for ThreadPoolDispatcher {
    fn dispatch(&self, path: PathBuf, job: IoJob) -> IoTicket {
        let (completion, ticket) = io_request(path);
        let request = (completion, job);
        let rejected = match &self.sender {
            Some(sender) => sender.send(request).err().map(|err| err.into_inner()),
            None => Some(request),
        };
        if let Some((completion, job)) = rejected {
            log::warn!("ThreadPoolDispatcher: no worker available, running job inline");
            completion.run(job);
        }
        ticket
    }
}

impl Drop for ThreadPoolDispatcher {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("ThreadPoolDispatcher: an I/O worker panicked");
            }
        }
    }
}
