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

//! The lock-free task queue shared by both executor flavours.

use super::Task;
use crossbeam_channel::{Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
}

/// A non-zero token unique to the calling thread.
pub(crate) fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|t| *t)
}

/// A multi-producer queue drained by at most one thread at a time.
///
/// Tasks travel through a channel, which gives the draining thread a
/// happens-before view of everything the submitting thread wrote.
pub(crate) struct TaskQueue {
    name: String,
    sender: Sender<Task>,
    receiver: Receiver<Task>,
    /// Token of the draining thread, 0 when idle.
    owner: AtomicU64,
}

impl TaskQueue {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            name: name.into(),
            sender,
            receiver,
            owner: AtomicU64::new(0),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn push(&self, task: Task) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        if self.sender.send(task).is_err() {
            log::error!("Executor '{}' dropped a task: queue closed.", self.name);
        }
    }

    pub(crate) fn is_owned_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == current_thread_token()
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.receiver.is_empty()
    }

    /// Drains the queue if ownership can be claimed.
    ///
    /// After releasing ownership the queue is checked again, so a task pushed
    /// by another thread between the last poll and the release is not lost.
    pub(crate) fn drain(&self) {
        let me = current_thread_token();
        loop {
            if self
                .owner
                .compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            while let Ok(task) = self.receiver.try_recv() {
                self.run(task);
            }
            self.owner.store(0, Ordering::Release);
            if self.receiver.is_empty() {
                return;
            }
        }
    }

    /// Runs a task, logging instead of unwinding if it panics.
    pub(crate) fn run(&self, task: Task) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            log::warn!("Task panicked in executor '{}': {}", self.name, message);
        }
    }
}
