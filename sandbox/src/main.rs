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

// Keystone Sandbox
// Wires a store, a logging aspect, a consumer and a configured cache factory.

use anyhow::Result;
use keystone_core::Properties;
use keystone_infra::Framework;
use keystone_runtime::{
    Binding, CallbackResult, Component, ComponentInstance, Dependency, DependencyGraph,
    DependencyManager, Injection, Invocation,
};
use std::sync::{Arc, Mutex, PoisonError};

/// The provider: an in-memory key store.
#[derive(Default)]
struct MemoryStore {
    entries: Mutex<Vec<String>>,
}

impl MemoryStore {
    fn put(&self, entry: &str) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).push(entry.to_string());
    }
}

impl ComponentInstance for MemoryStore {
    fn invoke(&self, method: &str, invocation: &Invocation<'_>) -> Option<CallbackResult> {
        match (method, invocation) {
            ("start", Invocation::Empty) => {
                log::info!("MemoryStore started.");
                Some(Ok(()))
            }
            ("stop", Invocation::Empty) => {
                let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner).len();
                log::info!("MemoryStore stopped with {} entries.", entries);
                Some(Ok(()))
            }
            _ => None,
        }
    }
}

/// An aspect logging every write before forwarding it.
#[derive(Default)]
struct LoggingStore {
    store: Mutex<Option<Arc<MemoryStore>>>,
}

impl LoggingStore {
    fn put(&self, entry: &str) {
        log::info!("put '{}'", entry);
        if let Some(store) = self.store.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            store.put(entry);
        }
    }
}

impl ComponentInstance for LoggingStore {
    fn inject(&self, field: &str, injection: &Injection) -> bool {
        if field != "store" {
            return false;
        }
        *self.store.lock().unwrap_or_else(PoisonError::into_inner) = injection.value_as::<MemoryStore>();
        true
    }
}

/// The consumer: writes through whatever store sits on top of the chain.
#[derive(Default)]
struct Writer {
    store: Mutex<Option<Injection>>,
}

impl ComponentInstance for Writer {
    fn inject(&self, field: &str, injection: &Injection) -> bool {
        if field != "store" {
            return false;
        }
        *self.store.lock().unwrap_or_else(PoisonError::into_inner) = Some(injection.clone());
        true
    }

    fn invoke(&self, method: &str, invocation: &Invocation<'_>) -> Option<CallbackResult> {
        if !matches!((method, invocation), ("start", Invocation::Empty)) {
            return None;
        }
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner).clone();
        match store {
            Some(injection) => match injection.value_as::<LoggingStore>() {
                Some(aspect) => aspect.put("hello"),
                None => {
                    if let Some(store) = injection.value_as::<MemoryStore>() {
                        store.put("hello");
                    }
                }
            },
            None => log::warn!("Writer started without a store."),
        }
        Some(Ok(()))
    }
}

/// One cache per factory configuration.
#[derive(Default)]
struct Cache {
    size: Mutex<i64>,
}

impl ComponentInstance for Cache {
    fn invoke(&self, method: &str, invocation: &Invocation<'_>) -> Option<CallbackResult> {
        match (method, invocation) {
            ("updated", Invocation::Configuration(Some(settings))) => {
                let size = settings
                    .get_int("size")
                    .ok_or_else(|| anyhow::anyhow!("missing 'size'"));
                Some(size.map(|size| {
                    *self.size.lock().unwrap_or_else(PoisonError::into_inner) = size;
                    log::info!("Cache sized to {}.", size);
                }))
            }
            _ => None,
        }
    }
}

fn wire(dm: &Arc<DependencyManager>) -> Result<()> {
    let store = dm.create_component();
    store.set_implementation(Arc::new(MemoryStore::default()))?;
    store.set_interfaces(&["Store"], Properties::new().with("backend", "memory"))?;

    let aspect = dm.create_aspect_service("Store", None, 10, Binding::field("store"))?;
    aspect.set_factory(Arc::new(|_: &dyn Component| -> Result<Arc<dyn ComponentInstance>> {
        Ok(Arc::new(LoggingStore::default()))
    }))?;

    let writer = dm.create_component();
    writer.set_implementation(Arc::new(Writer::default()))?;
    let dependency = dm.create_service_dependency(Some("Store"), None)?;
    dependency.set_required(true).set_auto_config(Some("store"))?;
    writer.add(dependency);

    let caches = dm.create_factory_configuration_adapter("sandbox.cache", "updated", true);
    caches.set_factory(Arc::new(|_: &dyn Component| -> Result<Arc<dyn ComponentInstance>> {
        Ok(Arc::new(Cache::default()))
    }))?;
    caches.set_interfaces(&["Cache"], Properties::new())?;

    dm.add(store);
    dm.add(aspect);
    dm.add(caches);
    dm.add(writer);
    Ok(())
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let framework = Framework::new();
    let context = framework.bundle_context("sandbox");
    let dm = DependencyManager::new(Arc::clone(&context));
    wire(&dm)?;

    let cache = context
        .configuration_admin()
        .create_factory_configuration("sandbox.cache");
    cache.update(Properties::new().with("size", 64))?;
    if let Err(e) = context
        .configuration_admin()
        .create_factory_configuration("sandbox.cache")
        .update(Properties::new())
    {
        log::warn!("Rejected as expected: {}", e);
    }

    let graph = DependencyGraph::of(&dm);
    for component in graph.unregistered_components() {
        log::warn!("Not registered: {} ({})", component.name, component.state);
    }
    println!("{}", graph.to_json()?);

    dm.clear();
    Ok(())
}
