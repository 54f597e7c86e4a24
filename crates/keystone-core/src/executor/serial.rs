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

use super::queue::TaskQueue;
use super::{Executor, Task};
use std::fmt;

/// Runs tasks one at a time on whichever submitting thread claims the queue.
///
/// # Example
///
/// ```rust
/// use keystone_core::executor::{Executor, SerialExecutor};
/// use std::sync::{Arc, Mutex};
///
/// let executor = Arc::new(SerialExecutor::new("example"));
/// let log = Arc::new(Mutex::new(Vec::new()));
///
/// let (e, l) = (Arc::clone(&executor), Arc::clone(&log));
/// executor.execute(Box::new(move || {
///     l.lock().unwrap().push("outer");
///     let l2 = Arc::clone(&l);
///     // Re-entrant submission runs inline.
///     e.execute(Box::new(move || l2.lock().unwrap().push("inner")));
///     l.lock().unwrap().push("after");
/// }));
///
/// assert_eq!(*log.lock().unwrap(), vec!["outer", "inner", "after"]);
/// ```
pub struct SerialExecutor {
    queue: TaskQueue,
}

impl SerialExecutor {
    /// Creates an idle executor; `name` appears in log messages.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            queue: TaskQueue::new(name),
        }
    }

    /// The name given at construction.
    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// Returns `true` if tasks are waiting to be drained.
    pub fn has_pending(&self) -> bool {
        self.queue.has_pending()
    }
}

impl Executor for SerialExecutor {
    fn schedule(&self, task: Task) {
        self.queue.push(task);
    }

    fn run_pending(&self) {
        self.queue.drain();
    }

    fn execute(&self, task: Task) {
        if self.queue.is_owned_by_current_thread() {
            self.queue.run(task);
        } else {
            self.queue.push(task);
            self.queue.drain();
        }
    }

    fn is_current_thread_owner(&self) -> bool {
        self.queue.is_owned_by_current_thread()
    }
}

impl fmt::Debug for SerialExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialExecutor")
            .field("name", &self.queue.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;

    #[test]
    fn test_schedule_does_not_run() {
        let executor = SerialExecutor::new("test");
        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        executor.schedule(Box::new(move || r.store(true, Ordering::SeqCst)));
        assert!(!ran.load(Ordering::SeqCst));
        assert!(executor.has_pending());

        executor.run_pending();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_reentrant_execute_runs_inline() {
        let executor = Arc::new(SerialExecutor::new("test"));
        let order = Arc::new(Mutex::new(Vec::new()));

        let (e, o) = (Arc::clone(&executor), Arc::clone(&order));
        executor.execute(Box::new(move || {
            o.lock().unwrap().push(1);
            let o2 = Arc::clone(&o);
            e.execute(Box::new(move || o2.lock().unwrap().push(2)));
            o.lock().unwrap().push(3);
        }));

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_scheduled_from_task_runs_after_it() {
        let executor = Arc::new(SerialExecutor::new("test"));
        let order = Arc::new(Mutex::new(Vec::new()));

        let (e, o) = (Arc::clone(&executor), Arc::clone(&order));
        executor.execute(Box::new(move || {
            let o2 = Arc::clone(&o);
            e.schedule(Box::new(move || o2.lock().unwrap().push("scheduled")));
            o.lock().unwrap().push("task");
        }));

        assert_eq!(*order.lock().unwrap(), vec!["task", "scheduled"]);
    }

    #[test]
    fn test_panicking_task_does_not_stop_the_drain() {
        let executor = SerialExecutor::new("test");
        let counter = Arc::new(AtomicUsize::new(0));

        executor.schedule(Box::new(|| panic!("boom")));
        let c = Arc::clone(&counter);
        executor.schedule(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        executor.run_pending();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!executor.has_pending());
    }

    #[test]
    fn test_tasks_never_overlap_across_threads() {
        let executor = Arc::new(SerialExecutor::new("test"));
        let inside = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (executor, inside, overlaps, total, barrier) = (
                    Arc::clone(&executor),
                    Arc::clone(&inside),
                    Arc::clone(&overlaps),
                    Arc::clone(&total),
                    Arc::clone(&barrier),
                );
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..200 {
                        let (inside, overlaps, total) =
                            (Arc::clone(&inside), Arc::clone(&overlaps), Arc::clone(&total));
                        executor.execute(Box::new(move || {
                            if inside.swap(true, Ordering::SeqCst) {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            total.fetch_add(1, Ordering::SeqCst);
                            inside.store(false, Ordering::SeqCst);
                        }));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(total.load(Ordering::SeqCst), 1600);
    }
}
