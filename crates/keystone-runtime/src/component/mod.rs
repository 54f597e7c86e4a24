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

//! The component state machine.
//!
//! A [`ComponentImpl`] moves through the four [`ComponentState`]s as it is
//! started, stopped and as its dependencies come and go. Every mutation runs
//! as a task on the component's [`Executor`], so a component never races
//! with itself while different components proceed in parallel.
//!
//! The transition logic lives in `lifecycle`; the handling of dependency
//! events in `events`.

mod events;
mod lifecycle;

use crate::callback::{ComponentInstance, Injection};
use crate::context::{
    dependency_key, Component, ComponentContext, ComponentStateListener, Composition,
    DependencyContext, InstanceFactory, LifecycleCallbacks,
};
use crate::declaration::ComponentDeclaration;
use crate::error::ComponentError;
use keystone_core::{ComponentState, Event, EventSet, EventType, Executor, Properties};
use keystone_infra::{BundleContext, ServiceRegistration};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

#[derive(Clone, Default)]
enum Implementation {
    #[default]
    Unset,
    Instance(Arc<dyn ComponentInstance>),
    Factory(InstanceFactory),
}

/// The builder configuration, frozen once the component is started.
#[derive(Clone)]
struct Settings {
    implementation: Implementation,
    composition: Option<Composition>,
    interfaces: Vec<String>,
    service_properties: Properties,
    callbacks: LifecycleCallbacks,
    callback_instance: Option<Arc<dyn ComponentInstance>>,
    auto_config: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            implementation: Implementation::Unset,
            composition: None,
            interfaces: Vec::new(),
            service_properties: Properties::new(),
            callbacks: LifecycleCallbacks::default(),
            callback_instance: None,
            auto_config: true,
        }
    }
}

/// Runtime state, only mutated from tasks of the component's executor.
#[derive(Default)]
struct Machine {
    state: ComponentState,
    started: bool,
    start_called: bool,
    handling_change: usize,
    dependencies: Vec<Arc<dyn DependencyContext>>,
    events: HashMap<usize, EventSet>,
    instance: Option<Arc<dyn ComponentInstance>>,
    registration: Option<ServiceRegistration>,
    invoked: HashSet<(usize, u64, EventType)>,
}

/// The one concrete component implementation.
///
/// Created by [`DependencyManager::create_component`](crate::DependencyManager::create_component),
/// configured through the [`Component`] builder surface, and driven by
/// [`Component::start`] and [`Component::stop`].
pub struct ComponentImpl {
    id: u64,
    self_ref: Weak<ComponentImpl>,
    context: Arc<BundleContext>,
    executor: Arc<dyn Executor>,
    update_timeout: Duration,
    active: AtomicBool,
    settings: RwLock<Settings>,
    machine: Mutex<Machine>,
    listeners: RwLock<Vec<Arc<dyn ComponentStateListener>>>,
}

impl ComponentImpl {
    /// Creates an inactive component running its tasks on `executor`.
    pub fn new(
        id: u64,
        context: Arc<BundleContext>,
        executor: Arc<dyn Executor>,
        update_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id,
            self_ref: self_ref.clone(),
            context,
            executor,
            update_timeout,
            active: AtomicBool::new(false),
            settings: RwLock::new(Settings::default()),
            machine: Mutex::new(Machine::default()),
            listeners: RwLock::new(Vec::new()),
        })
    }

    fn machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settings(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ensure_not_active(&self) -> Result<(), ComponentError> {
        if self.active.load(Ordering::Acquire) {
            return Err(ComponentError::AlreadyActive(self.id));
        }
        Ok(())
    }

    fn configure(&self, f: impl FnOnce(&mut Settings)) -> Result<(), ComponentError> {
        self.ensure_not_active()?;
        f(&mut self.settings.write().unwrap_or_else(PoisonError::into_inner));
        Ok(())
    }

    /// Runs `task` on the component's executor.
    fn submit(&self, task: impl FnOnce(&ComponentImpl) + Send + 'static) {
        if let Some(me) = self.self_ref.upgrade() {
            self.executor.execute(Box::new(move || task(&me)));
        }
    }

    fn weak_context(&self) -> Weak<dyn ComponentContext> {
        self.self_ref.clone()
    }

    /// Whether `dependency` is the first one, which alone reaches decorator instances.
    fn is_first_dependency(&self, dependency: &dyn DependencyContext) -> bool {
        self.machine()
            .dependencies
            .first()
            .is_some_and(|first| dependency_key(first.as_ref()) == dependency_key(dependency))
    }

    fn do_add(&self, dependencies: Vec<Arc<dyn DependencyContext>>) {
        let mut instance_bound = Vec::new();
        for dependency in dependencies {
            if dependency.component_context().is_some() {
                log::error!(
                    "{} (cannot add it to '{}').",
                    ComponentError::DependencyOwned(dependency.name()),
                    self.name()
                );
                continue;
            }
            let inactive = {
                let mut machine = self.machine();
                machine
                    .events
                    .insert(dependency_key(dependency.as_ref()), EventSet::new());
                machine.dependencies.push(Arc::clone(&dependency));
                machine.state == ComponentState::Inactive
            };
            dependency.set_component_context(self.weak_context());
            if !inactive {
                dependency.set_instance_bound(true);
                instance_bound.push(dependency);
            }
        }
        self.start_dependencies(&instance_bound);
        self.handle_change();
    }

    fn do_remove(&self, dependency: Arc<dyn DependencyContext>) {
        let key = dependency_key(dependency.as_ref());
        let inactive = {
            let mut machine = self.machine();
            machine
                .dependencies
                .retain(|d| dependency_key(d.as_ref()) != key);
            machine.state == ComponentState::Inactive
        };
        // Stopping reports the remaining events as removed, which unbinds them.
        if !inactive {
            dependency.stop();
        }
        if let Some(mut events) = self.machine().events.remove(&key) {
            events.close_all();
        }
        self.handle_change();
    }

    fn do_set_service_properties(&self, properties: Properties) {
        let interfaces = {
            let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
            settings.service_properties = properties;
            settings.interfaces.clone()
        };
        let registration = self.machine().registration.clone();
        if let (Some(registration), false) = (registration, interfaces.is_empty()) {
            if let Err(e) = registration.set_properties(self.calculate_service_properties()) {
                log::warn!("Could not update the properties of '{}': {}", self.name(), e);
            }
        }
    }
}

impl Component for ComponentImpl {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> String {
        let settings = self.settings();
        if !settings.interfaces.is_empty() {
            return settings.interfaces.join(", ");
        }
        if let Some(instance) = self.instance() {
            return (*instance).type_name().to_string();
        }
        match settings.implementation {
            Implementation::Instance(instance) => (*instance).type_name().to_string(),
            _ => format!("component-{}", self.id),
        }
    }

    fn state(&self) -> ComponentState {
        self.machine().state
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn set_implementation(
        &self,
        instance: Arc<dyn ComponentInstance>,
    ) -> Result<(), ComponentError> {
        self.configure(|s| s.implementation = Implementation::Instance(instance))
    }

    fn set_factory(&self, factory: InstanceFactory) -> Result<(), ComponentError> {
        self.configure(|s| s.implementation = Implementation::Factory(factory))
    }

    fn set_composition(&self, composition: Composition) -> Result<(), ComponentError> {
        self.configure(|s| s.composition = Some(composition))
    }

    fn set_interfaces(&self, names: &[&str], properties: Properties) -> Result<(), ComponentError> {
        self.configure(|s| {
            s.interfaces = names.iter().map(|n| n.to_string()).collect();
            s.service_properties = properties;
        })
    }

    fn set_callbacks(&self, callbacks: LifecycleCallbacks) -> Result<(), ComponentError> {
        self.configure(|s| s.callbacks = callbacks)
    }

    fn set_callback_instance(
        &self,
        instance: Arc<dyn ComponentInstance>,
    ) -> Result<(), ComponentError> {
        self.configure(|s| s.callback_instance = Some(instance))
    }

    fn set_auto_config(&self, enabled: bool) -> Result<(), ComponentError> {
        self.configure(|s| s.auto_config = enabled)
    }

    fn set_service_properties(&self, properties: Properties) {
        self.submit(move |c| c.do_set_service_properties(properties));
    }

    fn service_properties(&self) -> Properties {
        self.settings().service_properties
    }

    fn interfaces(&self) -> Vec<String> {
        self.settings().interfaces
    }

    fn add_all(&self, dependencies: Vec<Arc<dyn DependencyContext>>) {
        self.submit(move |c| c.do_add(dependencies));
    }

    fn remove(&self, dependency: Arc<dyn DependencyContext>) {
        self.submit(move |c| c.do_remove(dependency));
    }

    fn dependencies(&self) -> Vec<Arc<dyn DependencyContext>> {
        self.machine().dependencies.clone()
    }

    fn add_state_listener(&self, listener: Arc<dyn ComponentStateListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn remove_state_listener(&self, listener: &Arc<dyn ComponentStateListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn state_listeners(&self) -> Vec<Arc<dyn ComponentStateListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn start(&self) {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.submit(|c| {
                c.machine().started = true;
                c.handle_change();
            });
        }
    }

    fn stop(&self) {
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let Some(me) = self.self_ref.upgrade() else {
            return;
        };
        let task = Box::new(move || {
            me.machine().started = false;
            me.handle_change();
        });
        // A stopping bundle must not see its context invalidated under a
        // component still being torn down on the pool.
        if self.context.is_stopping() && self.executor.is_dispatching() {
            self.executor.execute_with(task, false);
        } else {
            self.executor.execute(task);
        }
    }

    fn instance(&self) -> Option<Arc<dyn ComponentInstance>> {
        self.machine().instance.clone()
    }

    fn instances(&self) -> Vec<Arc<dyn ComponentInstance>> {
        let Some(instance) = self.instance() else {
            return Vec::new();
        };
        match self.settings().composition {
            Some(composition) => composition(&instance),
            None => vec![instance],
        }
    }

    fn bundle_context(&self) -> Arc<BundleContext> {
        Arc::clone(&self.context)
    }

    fn declaration(&self) -> ComponentDeclaration {
        ComponentDeclaration {
            id: self.id,
            name: self.name(),
            state: self.state(),
            services: self.interfaces(),
            properties: self.service_properties(),
            dependencies: self
                .dependencies()
                .iter()
                .map(|d| d.declaration())
                .collect(),
        }
    }
}

impl ComponentContext for ComponentImpl {
    fn executor(&self) -> Arc<dyn Executor> {
        Arc::clone(&self.executor)
    }

    fn handle_event(
        &self,
        dependency: Arc<dyn DependencyContext>,
        kind: EventType,
        events: Vec<Arc<Event>>,
    ) {
        let Some(me) = self.self_ref.upgrade() else {
            events.iter().for_each(|event| event.close());
            return;
        };
        let task = Box::new(move || {
            match (kind, events.as_slice()) {
                (EventType::Added, [event, ..]) => me.handle_added(&dependency, event),
                (EventType::Changed, [event, ..]) => me.handle_changed(&dependency, event),
                (EventType::Removed, [event, ..]) => {
                    me.handle_removed(&dependency, event);
                    event.close();
                }
                (EventType::Swapped, [old, new]) => {
                    me.handle_swapped(&dependency, old, new);
                    old.close();
                }
                _ => {
                    log::warn!(
                        "Ignoring malformed {} event of dependency '{}'.",
                        kind,
                        dependency.name()
                    );
                    events.iter().for_each(|event| event.close());
                }
            }
            me.clear_invoke_cache();
        });
        // Removals try to run on the caller so unbinds follow the unregistration order.
        if kind == EventType::Removed {
            self.executor.execute_with(task, false);
        } else {
            self.executor.execute(task);
        }
    }

    fn dependency_event(&self, dependency: &dyn DependencyContext) -> Option<Arc<Event>> {
        self.machine()
            .events
            .get(&dependency_key(dependency))
            .and_then(|events| events.best().cloned())
    }

    fn dependency_events(&self, dependency: &dyn DependencyContext) -> Vec<Arc<Event>> {
        self.machine()
            .events
            .get(&dependency_key(dependency))
            .map(EventSet::to_vec)
            .unwrap_or_default()
    }

    fn instantiate(&self) {
        self.instantiate_component();
    }

    fn update_timeout(&self) -> Duration {
        self.update_timeout
    }

    fn as_component(&self) -> &dyn Component {
        self
    }
}

impl fmt::Debug for ComponentImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentImpl")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for ComponentImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name(), self.id)
    }
}

/// The component handle injected into instances under the field `"component"`.
pub const COMPONENT_FIELD: &str = "component";

/// The bundle context injected into instances under the field `"bundle_context"`.
pub const BUNDLE_CONTEXT_FIELD: &str = "bundle_context";

fn component_injection(component: &Arc<ComponentImpl>) -> Injection {
    let weak: Weak<dyn Component> = Arc::downgrade(component) as Weak<dyn Component>;
    Injection::Component(weak)
}
