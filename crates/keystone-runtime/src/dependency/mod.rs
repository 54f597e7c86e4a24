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

//! The four dependency kinds and the state they share.

mod bundle;
mod configuration;
mod resource;
mod service;

pub use bundle::BundleDependency;
pub use configuration::ConfigurationDependency;
pub use resource::ResourceDependency;
pub use service::ServiceDependency;

use crate::callback::{invoke_callback, ComponentInstance, Invocation};
use crate::context::{ComponentContext, DependencyContext};
use crate::error::DependencyError;
use keystone_core::{Event, EventType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

#[derive(Clone, Default)]
struct CoreSettings {
    added: Option<String>,
    changed: Option<String>,
    removed: Option<String>,
    auto_config: Option<String>,
    callback_instance: Option<Arc<dyn ComponentInstance>>,
}

/// Flags, callback names and the owner link every dependency kind carries.
pub struct DependencyCore {
    self_ref: Weak<dyn DependencyContext>,
    component: RwLock<Option<Weak<dyn ComponentContext>>>,
    required: AtomicBool,
    available: AtomicBool,
    instance_bound: AtomicBool,
    started: AtomicBool,
    propagate: AtomicBool,
    settings: RwLock<CoreSettings>,
}

impl DependencyCore {
    pub(crate) fn new(self_ref: Weak<dyn DependencyContext>, required: bool) -> Self {
        Self {
            self_ref,
            component: RwLock::new(None),
            required: AtomicBool::new(required),
            available: AtomicBool::new(false),
            instance_bound: AtomicBool::new(false),
            started: AtomicBool::new(false),
            propagate: AtomicBool::new(false),
            settings: RwLock::new(CoreSettings::default()),
        }
    }

    /// A core with the configuration of `prototype` and fresh runtime state.
    pub(crate) fn copied(self_ref: Weak<dyn DependencyContext>, prototype: &DependencyCore) -> Self {
        let core = Self::new(self_ref, prototype.is_required());
        core.propagate
            .store(prototype.is_propagated(), Ordering::Release);
        *core.settings.write().unwrap_or_else(PoisonError::into_inner) = prototype.settings();
        core
    }

    fn settings(&self) -> CoreSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut CoreSettings)) -> Result<(), DependencyError> {
        self.ensure_not_started()?;
        f(&mut self.settings.write().unwrap_or_else(PoisonError::into_inner));
        Ok(())
    }

    pub(crate) fn ensure_not_started(&self) -> Result<(), DependencyError> {
        if self.is_started() {
            let name = self
                .self_ref
                .upgrade()
                .map_or_else(|| "?".to_string(), |d| d.name());
            return Err(DependencyError::AlreadyStarted(name));
        }
        Ok(())
    }

    /// Runs `start_tracking` unless already started.
    ///
    /// The started flag is raised after tracking began, so events reported
    /// while the tracker opens are seen as coming from a starting dependency.
    pub(crate) fn start_with(&self, start_tracking: impl FnOnce()) {
        if !self.is_started() {
            start_tracking();
            self.started.store(true, Ordering::Release);
        }
    }

    /// Runs `stop_tracking` if started.
    pub(crate) fn stop_with(&self, stop_tracking: impl FnOnce()) {
        if self.is_started() {
            stop_tracking();
            self.started.store(false, Ordering::Release);
        }
    }

    /// Returns `true` once started.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Whether the owning component needs this dependency.
    pub fn is_required(&self) -> bool {
        self.required.load(Ordering::Acquire)
    }

    pub(crate) fn set_required(&self, required: bool) {
        self.required.store(required, Ordering::Release);
    }

    /// Whether at least one event is recorded.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Whether the dependency was added to an already active component.
    pub fn is_instance_bound(&self) -> bool {
        self.instance_bound.load(Ordering::Acquire)
    }

    pub(crate) fn set_instance_bound(&self, instance_bound: bool) {
        self.instance_bound.store(instance_bound, Ordering::Release);
    }

    /// Whether the properties feed the owner's published properties.
    pub fn is_propagated(&self) -> bool {
        self.propagate.load(Ordering::Acquire)
    }

    /// The injection field, if auto-configuration is on.
    pub fn auto_config_name(&self) -> Option<String> {
        self.settings().auto_config
    }

    pub(crate) fn set_added(&self, method: Option<&str>) {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .added = method.map(str::to_string);
    }

    /// The added, changed and removed callback names.
    pub fn callbacks(&self) -> (Option<String>, Option<String>, Option<String>) {
        let s = self.settings();
        (s.added, s.changed, s.removed)
    }

    /// The owning component, if it is still alive.
    pub fn component(&self) -> Option<Arc<dyn ComponentContext>> {
        self.component
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub(crate) fn set_component(&self, component: Weak<dyn ComponentContext>) {
        *self.component.write().unwrap_or_else(PoisonError::into_inner) = Some(component);
    }

    /// The instances callbacks go to: the callback instance, or the component's.
    pub fn instances(&self, component: &dyn ComponentContext) -> Vec<Arc<dyn ComponentInstance>> {
        match self.settings().callback_instance {
            Some(instance) => vec![instance],
            None => component.instances(),
        }
    }

    /// Whether a callback instance replaces the component instances.
    pub fn has_callback_instance(&self) -> bool {
        self.settings().callback_instance.is_some()
    }

    /// Offers `method` to the callback targets and reports a missing method.
    pub fn dispatch(
        &self,
        component: &dyn ComponentContext,
        method: &str,
        shapes: &[Invocation<'_>],
    ) -> bool {
        let instances = self.instances(component);
        let found = invoke_callback(&instances, method, shapes);
        if !found && component.decorator_role().is_none() {
            log::error!(
                "Callback '{}' not found on any instance of component '{}'.",
                method,
                component.name()
            );
        }
        found
    }

    /// Invokes the callback registered for `kind` with the standard event shapes.
    pub(crate) fn invoke_event(&self, kind: EventType, event: &Event) {
        let (added, changed, removed) = self.callbacks();
        let method = match kind {
            EventType::Added => added,
            EventType::Changed => changed,
            EventType::Removed => removed,
            EventType::Swapped => None,
        };
        let (Some(method), Some(component)) = (method, self.component()) else {
            return;
        };
        let c = component.as_component();
        self.dispatch(
            &*component,
            &method,
            &[
                Invocation::ComponentEvent(c, event),
                Invocation::Event(event),
                Invocation::Component(c),
                Invocation::Empty,
            ],
        );
    }

    /// Hands an event to the owning component.
    pub(crate) fn deliver(&self, kind: EventType, events: Vec<Arc<Event>>) {
        match (self.component(), self.self_ref.upgrade()) {
            (Some(component), Some(me)) => component.handle_event(me, kind, events),
            _ => {
                log::warn!("Dropping {} event of a dependency without component.", kind);
                events.iter().for_each(|event| event.close());
            }
        }
    }

    /// The best event the owner currently records for this dependency.
    pub(crate) fn current_event(&self) -> Option<Arc<Event>> {
        let component = self.component()?;
        let me = self.self_ref.upgrade()?;
        component.dependency_event(me.as_ref())
    }
}

/// Builder methods shared by every dependency kind.
pub trait Dependency: DependencyContext + Sized {
    /// Makes the dependency required or optional.
    fn set_required(&self, required: bool) -> &Self {
        self.core().set_required(required);
        self
    }

    /// Sets the added, changed and removed callback names.
    fn set_callbacks(
        &self,
        added: Option<&str>,
        changed: Option<&str>,
        removed: Option<&str>,
    ) -> Result<&Self, DependencyError> {
        self.core().update(|s| {
            s.added = added.map(str::to_string);
            s.changed = changed.map(str::to_string);
            s.removed = removed.map(str::to_string);
        })?;
        Ok(self)
    }

    /// Sends callbacks to `instance` instead of the component instances.
    fn set_callback_instance(
        &self,
        instance: Arc<dyn ComponentInstance>,
    ) -> Result<&Self, DependencyError> {
        self.core()
            .update(|s| s.callback_instance = Some(instance))?;
        Ok(self)
    }

    /// Injects the current value into `field`; `None` disables injection.
    fn set_auto_config(&self, field: Option<&str>) -> Result<&Self, DependencyError> {
        self.core()
            .update(|s| s.auto_config = field.map(str::to_string))?;
        Ok(self)
    }

    /// Feeds the dependency's properties into the owner's published properties.
    fn set_propagate(&self, propagate: bool) -> Result<&Self, DependencyError> {
        self.core().ensure_not_started()?;
        self.core().propagate.store(propagate, Ordering::Release);
        Ok(self)
    }
}

impl<T: DependencyContext> Dependency for T {}
