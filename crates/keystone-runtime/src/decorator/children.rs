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

//! The instance of a decorator's internal component, owning the children.

use super::{DecoratorKind, Source, Template, ADDED, CHANGED, CLOSE, OPEN, REMOVED, SWAPPED};
use crate::callback::{CallbackResult, ComponentInstance, DecoratorRole, Invocation};
use crate::component::ComponentImpl;
use crate::context::{dependency_key, Component, DependencyContext};
use crate::manager::DependencyManager;
use keystone_core::{Event, Properties};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

/// A child component and what it was built from.
pub(crate) struct Child {
    pub(crate) component: Arc<ComponentImpl>,
    pub(crate) source: Source,
    /// `(key of the filter component's dependency, the child's copy of it)`.
    copies: Vec<(usize, Arc<dyn DependencyContext>)>,
}

pub(crate) struct Decorator {
    self_ref: Weak<Decorator>,
    kind: Arc<dyn DecoratorKind>,
    template: Arc<RwLock<Template>>,
    manager: Weak<DependencyManager>,
    internal: Weak<ComponentImpl>,
    children: Mutex<HashMap<String, Child>>,
}

impl Decorator {
    pub(crate) fn new(
        kind: Arc<dyn DecoratorKind>,
        template: Arc<RwLock<Template>>,
        manager: Weak<DependencyManager>,
        internal: Weak<ComponentImpl>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            kind,
            template,
            manager,
            internal,
            children: Mutex::new(HashMap::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Child>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn template(&self) -> Template {
        self.template
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn describe(&self) -> String {
        self.kind.describe()
    }

    /// The internal component this decorator is the instance of.
    pub(crate) fn internal(&self) -> Option<Arc<ComponentImpl>> {
        self.internal.upgrade()
    }

    pub(crate) fn children(&self) -> Vec<Arc<ComponentImpl>> {
        self.lock()
            .values()
            .map(|c| Arc::clone(&c.component))
            .collect()
    }

    pub(crate) fn child(&self, key: &str) -> Option<Arc<ComponentImpl>> {
        self.lock().get(key).map(|c| Arc::clone(&c.component))
    }

    /// The internal component's dependencies, minus the one on the sources.
    fn extra_dependencies(&self) -> Vec<Arc<dyn DependencyContext>> {
        let Some(internal) = self.internal() else {
            return Vec::new();
        };
        let source = self
            .kind
            .source_dependency()
            .map(|d| dependency_key(d.as_ref()));
        internal
            .dependencies()
            .into_iter()
            .filter(|d| Some(dependency_key(d.as_ref())) != source)
            .collect()
    }

    /// Builds an inactive child for `source` from the template.
    pub(crate) fn spawn(&self, source: Source) -> anyhow::Result<Child> {
        let manager = self
            .manager
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("the dependency manager is gone"))?;
        let template = self.template();
        let child = manager.create_component();
        if let Some(instance) = template.instance {
            child.set_implementation(instance)?;
        }
        if let Some(factory) = template.factory {
            child.set_factory(factory)?;
        }
        if let Some(composition) = template.composition {
            child.set_composition(composition)?;
        }
        child.set_callbacks(template.callbacks)?;
        if let Some(callback_instance) = template.callback_instance {
            child.set_callback_instance(callback_instance)?;
        }
        child.set_auto_config(template.auto_config)?;

        let interfaces = self.kind.child_interfaces(&template.interfaces);
        if !interfaces.is_empty() {
            let names: Vec<&str> = interfaces.iter().map(String::as_str).collect();
            let properties = self
                .kind
                .child_properties(&template.service_properties, &source);
            child.set_interfaces(&names, properties)?;
        }

        let copies: Vec<(usize, Arc<dyn DependencyContext>)> = self
            .extra_dependencies()
            .iter()
            .map(|d| (dependency_key(d.as_ref()), d.create_copy()))
            .collect();
        let mut dependencies: Vec<Arc<dyn DependencyContext>> = self
            .kind
            .child_dependency(&child.bundle_context(), &source)?
            .into_iter()
            .collect();
        dependencies.extend(copies.iter().map(|(_, d)| Arc::clone(d)));
        child.add_all(dependencies);

        for listener in template.listeners {
            child.add_state_listener(listener);
        }
        log::debug!("{} created child {} for '{}'.", self.describe(), child.id(), source.key);
        Ok(Child {
            component: child,
            source,
            copies,
        })
    }

    /// Records `child` and starts it.
    pub(crate) fn adopt(&self, child: Child) {
        let component = Arc::clone(&child.component);
        let previous = self.lock().insert(child.source.key.clone(), child);
        if let Some(previous) = previous {
            self.discard(previous.component);
        }
        match self.manager.upgrade() {
            Some(manager) => manager.add(component),
            None => component.start(),
        }
    }

    /// Stops and forgets the child created for `key`.
    pub(crate) fn dismiss(&self, key: &str) {
        let child = self.lock().remove(key);
        if let Some(child) = child {
            log::debug!("{} removes child {} of '{}'.", self.describe(), child.component.id(), key);
            self.discard(child.component);
        }
    }

    fn discard(&self, component: Arc<ComponentImpl>) {
        match self.manager.upgrade() {
            Some(manager) => manager.remove(component.as_ref()),
            None => component.stop(),
        }
    }

    /// Replaces the source properties of `key` and re-publishes the child.
    pub(crate) fn update_source(&self, key: &str, properties: Properties) {
        let updated = {
            let mut children = self.lock();
            let Some(child) = children.get_mut(key) else {
                return;
            };
            child.source.properties = properties;
            (Arc::clone(&child.component), child.source.clone())
        };
        self.publish(&updated.0, &updated.1);
    }

    fn publish(&self, component: &ComponentImpl, source: &Source) {
        if component.interfaces().is_empty() {
            return;
        }
        let own = self
            .template
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .service_properties
            .clone();
        component.set_service_properties(self.kind.child_properties(&own, source));
    }

    /// Re-publishes every child after the template's properties changed.
    pub(crate) fn refresh_children(&self) {
        let children: Vec<_> = self
            .lock()
            .values()
            .map(|c| (Arc::clone(&c.component), c.source.clone()))
            .collect();
        for (component, source) in children {
            self.publish(&component, &source);
        }
    }

    /// Gives every child a copy of `dependencies`.
    pub(crate) fn add_dependencies(&self, dependencies: &[Arc<dyn DependencyContext>]) {
        let mut targets = Vec::new();
        for child in self.lock().values_mut() {
            let copies: Vec<(usize, Arc<dyn DependencyContext>)> = dependencies
                .iter()
                .map(|d| (dependency_key(d.as_ref()), d.create_copy()))
                .collect();
            let added: Vec<_> = copies.iter().map(|(_, c)| Arc::clone(c)).collect();
            child.copies.extend(copies);
            targets.push((Arc::clone(&child.component), added));
        }
        for (component, added) in targets {
            component.add_all(added);
        }
    }

    /// Removes the copies of `dependency` from every child.
    pub(crate) fn remove_dependency(&self, dependency: &dyn DependencyContext) {
        let key = dependency_key(dependency);
        let mut targets = Vec::new();
        for child in self.lock().values_mut() {
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut child.copies)
                .into_iter()
                .partition(|(k, _)| *k == key);
            child.copies = kept;
            targets.extend(
                removed
                    .into_iter()
                    .map(|(_, copy)| (Arc::clone(&child.component), copy)),
            );
        }
        for (component, copy) in targets {
            component.remove(copy);
        }
    }

    fn added(&self, event: &Event) {
        let source = Source::service(event);
        if self.lock().contains_key(&source.key) {
            log::debug!("{} already decorates '{}'.", self.describe(), source.key);
            return;
        }
        match self.spawn(source) {
            Ok(child) => self.adopt(child),
            Err(e) => log::error!("{} could not create a child: {:#}", self.describe(), e),
        }
    }

    fn changed(&self, event: &Event) {
        let source = Source::service(event);
        self.update_source(&source.key, source.properties);
    }

    fn removed(&self, event: &Event) {
        self.dismiss(&Source::service(event).key);
    }

    /// A rearranged aspect chain keeps the child, which follows through its own dependency.
    fn swapped(&self, old: &Event, new: &Event) {
        let (old, new) = (Source::service(old), Source::service(new));
        if old.key != new.key {
            let mut children = self.lock();
            if let Some(mut child) = children.remove(&old.key) {
                child.source.key = new.key.clone();
                children.insert(new.key.clone(), child);
            }
        }
        self.update_source(&new.key, new.properties);
    }

    fn open(&self) {
        if let Some(me) = self.self_ref.upgrade() {
            self.kind.opened(&me);
        }
    }

    fn close(&self) {
        self.kind.closed();
        let children: Vec<Child> = self.lock().drain().map(|(_, c)| c).collect();
        for child in children {
            self.discard(child.component);
        }
    }
}

impl ComponentInstance for Decorator {
    fn invoke(&self, method: &str, invocation: &Invocation<'_>) -> Option<CallbackResult> {
        match (method, *invocation) {
            (ADDED, Invocation::Event(e) | Invocation::ComponentEvent(_, e)) => self.added(e),
            (CHANGED, Invocation::Event(e) | Invocation::ComponentEvent(_, e)) => self.changed(e),
            (REMOVED, Invocation::Event(e) | Invocation::ComponentEvent(_, e)) => self.removed(e),
            (SWAPPED, Invocation::Swap(old, new) | Invocation::ComponentSwap(_, old, new)) => {
                self.swapped(old, new)
            }
            (OPEN, Invocation::Component(_)) => self.open(),
            (CLOSE, Invocation::Component(_)) => self.close(),
            _ => return None,
        }
        Some(Ok(()))
    }

    fn decorator(&self) -> Option<DecoratorRole> {
        Some(self.kind.role())
    }
}

impl fmt::Debug for Decorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decorator")
            .field("kind", &self.kind.describe())
            .field("children", &self.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}
