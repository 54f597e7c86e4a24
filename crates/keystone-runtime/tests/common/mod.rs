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

//! Shared fixtures for the runtime integration tests.

#![allow(dead_code)]

use keystone_core::{ComponentState, Properties};
use keystone_infra::{BundleContext, Framework};
use keystone_runtime::{
    CallbackResult, Component, ComponentInstance, ComponentStateListener, DependencyManager,
    Injection, InstanceFactory, Invocation,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A framework, the context of a `test` bundle and a manager for it.
pub fn setup() -> (Arc<Framework>, Arc<BundleContext>, Arc<DependencyManager>) {
    init_logger();
    let framework = Framework::new();
    let context = framework.bundle_context("test");
    let manager = DependencyManager::new(Arc::clone(&context));
    (framework, context, manager)
}

// --- Ensure: records steps from any thread and waits for them ---
#[derive(Default)]
pub struct Ensure {
    steps: Mutex<Vec<String>>,
    signal: Condvar,
}

impl Ensure {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn step(&self, step: impl Into<String>) {
        self.steps.lock().unwrap().push(step.into());
        self.signal.notify_all();
    }

    pub fn steps(&self) -> Vec<String> {
        self.steps.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.steps.lock().unwrap().clear();
    }

    pub fn count(&self, step: &str) -> usize {
        self.steps.lock().unwrap().iter().filter(|s| *s == step).count()
    }

    /// Blocks until `step` was recorded; returns `false` on timeout.
    pub fn wait_for(&self, step: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut steps = self.steps.lock().unwrap();
        while !steps.iter().any(|s| s == step) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            steps = self.signal.wait_timeout(steps, deadline - now).unwrap().0;
        }
        true
    }
}

// --- Probe: a component instance recording every callback it gets ---
pub struct Probe {
    name: String,
    ensure: Arc<Ensure>,
    failing: Option<String>,
    injected: Mutex<HashMap<String, Injection>>,
}

impl Probe {
    pub fn new(name: &str, ensure: &Arc<Ensure>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ensure: Arc::clone(ensure),
            failing: None,
            injected: Mutex::new(HashMap::new()),
        })
    }

    /// A probe whose callback `method` fails after recording.
    pub fn failing(name: &str, ensure: &Arc<Ensure>, method: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ensure: Arc::clone(ensure),
            failing: Some(method.to_string()),
            injected: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn injected(&self, field: &str) -> Option<Injection> {
        self.injected.lock().unwrap().get(field).cloned()
    }
}

fn describe(properties: Option<&Properties>) -> String {
    match properties {
        Some(p) => p
            .get_str("name")
            .or_else(|| p.get_str("testkey"))
            .unwrap_or("set")
            .to_string(),
        None => "none".to_string(),
    }
}

impl ComponentInstance for Probe {
    fn invoke(&self, method: &str, invocation: &Invocation<'_>) -> Option<CallbackResult> {
        let detail = match *invocation {
            Invocation::Event(e) | Invocation::ComponentEvent(_, e) => format!(":{}", e.id()),
            Invocation::Swap(old, new) | Invocation::ComponentSwap(_, old, new) => {
                format!(":{}->{}", old.id(), new.id())
            }
            Invocation::Configuration(p) | Invocation::ComponentConfiguration(_, p) => {
                format!(":{}", describe(p))
            }
            Invocation::Component(_) | Invocation::Empty => String::new(),
        };
        self.ensure.step(format!("{}.{}{}", self.name, method, detail));
        if self.failing.as_deref() == Some(method) {
            return Some(Err(anyhow::anyhow!("{} refused {}", self.name, method)));
        }
        Some(Ok(()))
    }

    fn inject(&self, field: &str, injection: &Injection) -> bool {
        self.injected
            .lock()
            .unwrap()
            .insert(field.to_string(), injection.clone());
        true
    }
}

/// Counts instances handed out by a factory.
#[derive(Default)]
pub struct Counter(AtomicUsize);

impl Counter {
    pub fn next(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Hands out probes named `{prefix}1`, `{prefix}2`...
pub fn probe_factory(prefix: &str, ensure: &Arc<Ensure>, counter: &Arc<Counter>) -> InstanceFactory {
    let (prefix, ensure, counter) = (prefix.to_string(), Arc::clone(ensure), Arc::clone(counter));
    Arc::new(
        move |_component: &dyn Component| -> anyhow::Result<Arc<dyn ComponentInstance>> {
            Ok(Probe::new(&format!("{prefix}{}", counter.next()), &ensure))
        },
    )
}

// --- State recorder ---
#[derive(Default)]
pub struct States(Mutex<Vec<ComponentState>>);

impl States {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self) -> Vec<ComponentState> {
        self.0.lock().unwrap().clone()
    }
}

impl ComponentStateListener for States {
    fn changed(&self, _component: &dyn Component, state: ComponentState) {
        self.0.lock().unwrap().push(state);
    }
}

/// Polls `condition` until it holds or `TIMEOUT` elapses.
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
