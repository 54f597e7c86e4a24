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

//! Executors that serialize all mutations of one component.
//!
//! Every component owns one executor. Any thread may hand it a task; exactly
//! one thread at a time drains the queue, and a thread that is already
//! draining runs further tasks for the same executor inline, so callbacks can
//! re-enter their own component synchronously.
//!
//! - [`SerialExecutor`] drains on whichever calling thread claims ownership.
//! - [`DispatchExecutor`] drains on a shared [`ThreadPool`], and can still be
//!   asked to run synchronously when teardown must not be deferred.

mod dispatch;
mod pool;
mod queue;
mod serial;

pub use dispatch::DispatchExecutor;
pub use pool::ThreadPool;
pub use serial::SerialExecutor;

use crate::error::ExecutorError;
use std::time::Duration;

/// A unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Serializes tasks for a single component.
pub trait Executor: Send + Sync {
    /// Enqueues a task without attempting to run it.
    fn schedule(&self, task: Task);

    /// Drains the queue if no other thread is currently doing so.
    fn run_pending(&self);

    /// Runs a task inline if the calling thread already owns the executor,
    /// otherwise enqueues it and triggers execution.
    fn execute(&self, task: Task);

    /// Like [`Executor::execute`], but `use_pool = false` asks the executor to
    /// try running on the calling thread instead of handing off.
    fn execute_with(&self, task: Task, use_pool: bool) {
        let _ = use_pool;
        self.execute(task);
    }

    /// Returns `true` if the calling thread is currently draining this executor.
    fn is_current_thread_owner(&self) -> bool;

    /// Returns `true` if this executor hands work to a thread pool.
    fn is_dispatching(&self) -> bool {
        false
    }
}

/// Runs `f` on `executor` and blocks until it produced its result.
///
/// If the calling thread already owns the executor, `f` runs inline.
///
/// # Errors
///
/// [`ExecutorError::Timeout`] if the result is not available within
/// `timeout`, [`ExecutorError::Disconnected`] if the task panicked.
pub fn execute_and_wait<R, F>(
    executor: &dyn Executor,
    f: F,
    timeout: Duration,
) -> Result<R, ExecutorError>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    if executor.is_current_thread_owner() {
        return Ok(f());
    }
    let (tx, rx) = crossbeam_channel::bounded(1);
    executor.execute(Box::new(move || {
        let _ = tx.send(f());
    }));
    rx.recv_timeout(timeout).map_err(|e| match e {
        crossbeam_channel::RecvTimeoutError::Timeout => ExecutorError::Timeout,
        crossbeam_channel::RecvTimeoutError::Disconnected => ExecutorError::Disconnected,
    })
}
