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

use super::pool::ThreadPool;
use super::queue::TaskQueue;
use super::{Executor, Task};
use std::fmt;
use std::sync::{Arc, Weak};

/// A serial queue whose draining is handed to a shared [`ThreadPool`].
///
/// Different components sharing one pool run in parallel while each
/// component's own tasks stay serialized. [`Executor::execute_with`] with
/// `use_pool = false` drains on the calling thread instead, which the
/// component stop path needs while its host is shutting down.
pub struct DispatchExecutor {
    queue: TaskQueue,
    pool: Arc<ThreadPool>,
    self_ref: Weak<DispatchExecutor>,
}

impl DispatchExecutor {
    /// Creates an executor dispatching to `pool`.
    pub fn new(name: impl Into<String>, pool: Arc<ThreadPool>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|self_ref| Self {
            queue: TaskQueue::new(name),
            pool,
            self_ref: self_ref.clone(),
        })
    }

    fn dispatch(&self) {
        let me = self.self_ref.clone();
        self.pool.submit(Box::new(move || {
            if let Some(executor) = me.upgrade() {
                executor.queue.drain();
            }
        }));
    }
}

impl Executor for DispatchExecutor {
    fn schedule(&self, task: Task) {
        self.queue.push(task);
    }

    fn run_pending(&self) {
        self.dispatch();
    }

    fn execute(&self, task: Task) {
        self.execute_with(task, true);
    }

    fn execute_with(&self, task: Task, use_pool: bool) {
        if self.queue.is_owned_by_current_thread() {
            self.queue.run(task);
            return;
        }
        self.queue.push(task);
        if use_pool {
            self.dispatch();
        } else {
            self.queue.drain();
        }
    }

    fn is_current_thread_owner(&self) -> bool {
        self.queue.is_owned_by_current_thread()
    }

    fn is_dispatching(&self) -> bool {
        true
    }
}

impl fmt::Debug for DispatchExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchExecutor")
            .field("name", &self.queue.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::execute_and_wait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    fn pool() -> Arc<ThreadPool> {
        Arc::new(ThreadPool::new("dispatch-test", 4).unwrap())
    }

    #[test]
    fn test_tasks_run_on_pool_in_order() {
        let executor = DispatchExecutor::new("dispatch", pool());
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let o = Arc::clone(&order);
            executor.execute(Box::new(move || o.lock().unwrap().push(i)));
        }
        let done = execute_and_wait(executor.as_ref(), || (), Duration::from_secs(5));
        assert!(done.is_ok());
        assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_synchronous_path_runs_on_caller_thread() {
        let executor = DispatchExecutor::new("dispatch", pool());
        let caller = thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));
        let r = Arc::clone(&ran_on);
        executor.execute_with(
            Box::new(move || *r.lock().unwrap() = Some(thread::current().id())),
            false,
        );
        assert_eq!(*ran_on.lock().unwrap(), Some(caller));
    }

    #[test]
    fn test_wait_times_out_when_blocked() {
        let executor = DispatchExecutor::new("dispatch", pool());
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        executor.execute(Box::new(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }));
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let result = execute_and_wait(
            executor.as_ref(),
            move || c.fetch_add(1, Ordering::SeqCst),
            Duration::from_millis(50),
        );
        assert_eq!(result, Err(crate::error::ExecutorError::Timeout));
        release_tx.send(()).unwrap();
    }
}
