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

use super::Task;
use crossbeam_channel::Sender;
use std::fmt;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

/// A fixed set of worker threads fed through a channel.
///
/// Dropping the pool closes the channel and joins the workers.
pub struct ThreadPool {
    name: String,
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawns `size` workers named `{name}-{index}`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if a worker thread cannot be spawned.
    pub fn new(name: impl Into<String>, size: usize) -> io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = crossbeam_channel::unbounded::<Task>();
        let mut workers = Vec::with_capacity(size.max(1));
        for index in 0..size.max(1) {
            let receiver = receiver.clone();
            let worker_name = format!("{name}-{index}");
            let handle = thread::Builder::new()
                .name(worker_name.clone())
                .spawn(move || {
                    log::debug!("Worker '{worker_name}' started.");
                    while let Ok(task) = receiver.recv() {
                        if catch_unwind(AssertUnwindSafe(task)).is_err() {
                            log::warn!("Task panicked on worker '{worker_name}'.");
                        }
                    }
                    log::debug!("Worker '{worker_name}' stopped.");
                })?;
            workers.push(handle);
        }
        log::info!("Thread pool '{}' started with {} workers.", name, workers.len());
        Ok(Self {
            name,
            sender: Some(sender),
            workers,
        })
    }

    /// Hands a task to the next free worker.
    pub fn submit(&self, task: Task) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(task).is_err() {
            log::error!("Thread pool '{}' rejected a task: workers gone.", self.name);
        }
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.sender.take();
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // The last reference may be released by one of our own workers.
            if worker.thread().id() == current {
                continue;
            }
            let _ = worker.join();
        }
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.name)
            .field("size", &self.workers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_drop_waits_for_submitted_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = ThreadPool::new("test-pool", 3).unwrap();
        assert_eq!(pool.size(), 3);
        for _ in 0..50 {
            let c = Arc::clone(&counter);
            pool.submit(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }
}
