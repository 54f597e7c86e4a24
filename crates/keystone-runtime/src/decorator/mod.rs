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

//! Components that spawn one child component per discovered source.
//!
//! A [`FilterComponent`] wraps an internal [`ComponentImpl`] whose only
//! instance is a `Decorator`. The internal component tracks the decorated
//! sources (services for aspects and adapters, factory configurations for
//! factory adapters); the decorator turns each source into a child component
//! built from the template configured on the filter component.
//!
//! The filter component forwards the lifecycle to the internal component and
//! keeps every builder setter for the children.

mod adapter;
mod aspect;
mod children;
mod factory;

pub(crate) use adapter::AdapterKind;
pub(crate) use aspect::AspectKind;
pub(crate) use factory::FactoryConfigurationKind;

use crate::callback::{ComponentInstance, DecoratorRole};
use crate::component::ComponentImpl;
use crate::context::{
    Component, ComponentContext as _, ComponentStateListener, Composition, DependencyContext,
    InstanceFactory, LifecycleCallbacks,
};
use crate::declaration::ComponentDeclaration;
use crate::dependency::{Dependency, ServiceDependency};
use crate::error::{ComponentError, DependencyError};
use crate::manager::DependencyManager;
use children::Decorator;
use keystone_core::properties::{ASPECT, SERVICE_ID};
use keystone_core::{ComponentState, Event, FilterError, Properties};
use keystone_infra::BundleContext;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, Weak};

const ADDED: &str = "added";
const CHANGED: &str = "changed";
const REMOVED: &str = "removed";
const SWAPPED: &str = "swapped";
const OPEN: &str = "start";
const CLOSE: &str = "stop";

/// How a decorator child binds to the service it decorates.
///
/// Every field is optional; an empty binding only makes the child depend on
/// the decorated service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    /// The field the decorated service is injected into.
    pub auto_config: Option<String>,
    /// Called when the decorated service is bound.
    pub added: Option<String>,
    /// Called when the decorated service's properties change.
    pub changed: Option<String>,
    /// Called when the decorated service goes away.
    pub removed: Option<String>,
    /// Called when an aspect chain below the child is rearranged.
    pub swapped: Option<String>,
}

impl Binding {
    /// Injects the decorated service into `field`.
    pub fn field(field: &str) -> Self {
        Self {
            auto_config: Some(field.to_string()),
            ..Self::default()
        }
    }

    /// Reports the decorated service through callbacks.
    pub fn callbacks(added: Option<&str>, changed: Option<&str>, removed: Option<&str>) -> Self {
        Self {
            added: added.map(str::to_string),
            changed: changed.map(str::to_string),
            removed: removed.map(str::to_string),
            ..Self::default()
        }
    }

    /// Adds a swap callback.
    #[must_use]
    pub fn with_swap(mut self, swapped: &str) -> Self {
        self.swapped = Some(swapped.to_string());
        self
    }

    fn apply(&self, dependency: &ServiceDependency) -> Result<(), DependencyError> {
        dependency
            .set_required(true)
            .set_auto_config(self.auto_config.as_deref())?
            .set_callbacks(
                self.added.as_deref(),
                self.changed.as_deref(),
                self.removed.as_deref(),
            )?
            .set_swap_callback(self.swapped.as_deref())?;
        Ok(())
    }
}

/// What every child is built from.
#[derive(Clone)]
pub(crate) struct Template {
    pub(crate) instance: Option<Arc<dyn ComponentInstance>>,
    pub(crate) factory: Option<InstanceFactory>,
    pub(crate) composition: Option<Composition>,
    pub(crate) callbacks: LifecycleCallbacks,
    pub(crate) callback_instance: Option<Arc<dyn ComponentInstance>>,
    pub(crate) auto_config: bool,
    pub(crate) interfaces: Vec<String>,
    pub(crate) service_properties: Properties,
    pub(crate) listeners: Vec<Arc<dyn ComponentStateListener>>,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            instance: None,
            factory: None,
            composition: None,
            callbacks: LifecycleCallbacks::default(),
            callback_instance: None,
            auto_config: true,
            interfaces: Vec::new(),
            service_properties: Properties::new(),
            listeners: Vec::new(),
        }
    }
}

/// A discovered service or configuration a child is created for.
#[derive(Debug, Clone)]
pub(crate) struct Source {
    /// Children are keyed by this: the original service id, or the pid.
    pub(crate) key: String,
    /// For services, the id of the original service at the bottom of an aspect chain.
    pub(crate) origin: Option<u64>,
    pub(crate) properties: Properties,
}

impl Source {
    pub(crate) fn service(event: &Event) -> Self {
        let origin = event
            .properties()
            .get_int(ASPECT)
            .and_then(|id| u64::try_from(id).ok())
            .unwrap_or_else(|| event.id());
        Self {
            key: origin.to_string(),
            origin: Some(origin),
            properties: event.properties().clone(),
        }
    }

    pub(crate) fn configuration(pid: &str, properties: Properties) -> Self {
        Self {
            key: pid.to_string(),
            origin: None,
            properties,
        }
    }
}

/// The part that differs between aspects, adapters and factory adapters.
pub(crate) trait DecoratorKind: Send + Sync {
    fn role(&self) -> DecoratorRole;

    fn describe(&self) -> String;

    /// The dependency of the internal component on the decorated sources.
    fn source_dependency(&self) -> Option<Arc<dyn DependencyContext>>;

    /// The names a child publishes, given the configured ones.
    fn child_interfaces(&self, configured: &[String]) -> Vec<String> {
        configured.to_vec()
    }

    /// The properties a child publishes.
    fn child_properties(&self, own: &Properties, source: &Source) -> Properties;

    /// The dependency of a child on its source.
    fn child_dependency(
        &self,
        context: &Arc<BundleContext>,
        source: &Source,
    ) -> anyhow::Result<Option<Arc<dyn DependencyContext>>> {
        let _ = (context, source);
        Ok(None)
    }

    /// Called when the internal component starts.
    fn opened(&self, decorator: &Arc<Decorator>) {
        let _ = decorator;
    }

    /// Called when the internal component stops, before the children are removed.
    fn closed(&self) {}
}

/// A component that stands for a whole family of children.
///
/// Returned by the decorator factories of the
/// [`DependencyManager`](crate::DependencyManager). Setters configure the
/// children; dependencies added here are copied into every child.
pub struct FilterComponent {
    self_ref: Weak<FilterComponent>,
    component: Arc<ComponentImpl>,
    decorator: Arc<Decorator>,
    kind: Arc<dyn DecoratorKind>,
    template: Arc<RwLock<Template>>,
    initialized: Mutex<bool>,
    pending: Mutex<Vec<Arc<dyn DependencyContext>>>,
}

impl FilterComponent {
    pub(crate) fn new(manager: &Arc<DependencyManager>, kind: Arc<dyn DecoratorKind>) -> Arc<Self> {
        let component = manager.create_component();
        let template = Arc::new(RwLock::new(Template::default()));
        let decorator = Decorator::new(
            Arc::clone(&kind),
            Arc::clone(&template),
            Arc::downgrade(manager),
            Arc::downgrade(&component),
        );
        let configured = component
            .set_implementation(decorator.clone())
            .and_then(|()| {
                component.set_callbacks(LifecycleCallbacks::new(None, Some(OPEN), Some(CLOSE), None))
            })
            .and_then(|()| component.set_auto_config(false));
        if let Err(e) = configured {
            log::error!("Could not configure decorator '{}': {}", kind.describe(), e);
        }
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            component,
            decorator,
            kind,
            template,
            initialized: Mutex::new(false),
            pending: Mutex::new(Vec::new()),
        })
    }

    fn template(&self) -> RwLockReadGuard<'_, Template> {
        self.template.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn configure(&self, f: impl FnOnce(&mut Template)) -> Result<(), ComponentError> {
        if self.component.is_active() {
            return Err(ComponentError::AlreadyActive(self.component.id()));
        }
        f(&mut self.template.write().unwrap_or_else(PoisonError::into_inner));
        Ok(())
    }

    fn pending(&self) -> Vec<Arc<dyn DependencyContext>> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs `task` on the internal component's executor.
    fn submit(&self, task: impl FnOnce(&FilterComponent) + Send + 'static) {
        if let Some(me) = self.self_ref.upgrade() {
            self.component
                .executor()
                .execute(Box::new(move || task(&me)));
        }
    }

    /// Adds the source dependency and the buffered ones on the first start.
    fn initialize(&self) {
        {
            let mut initialized = self.initialized.lock().unwrap_or_else(PoisonError::into_inner);
            if *initialized {
                return;
            }
            *initialized = true;
        }
        let mut dependencies: Vec<_> = self.kind.source_dependency().into_iter().collect();
        dependencies.append(&mut self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        self.component.add_all(dependencies);
    }

    fn is_initialized(&self) -> bool {
        *self.initialized.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The number of children currently alive.
    pub fn child_count(&self) -> usize {
        self.decorator.children().len()
    }

    /// The children currently alive, in no particular order.
    pub fn children(&self) -> Vec<Arc<dyn Component>> {
        self.decorator
            .children()
            .into_iter()
            .map(|c| c as Arc<dyn Component>)
            .collect()
    }
}

impl Component for FilterComponent {
    fn id(&self) -> u64 {
        self.component.id()
    }

    fn name(&self) -> String {
        self.kind.describe()
    }

    fn state(&self) -> ComponentState {
        self.component.state()
    }

    fn is_active(&self) -> bool {
        self.component.is_active()
    }

    fn set_implementation(
        &self,
        instance: Arc<dyn ComponentInstance>,
    ) -> Result<(), ComponentError> {
        self.configure(|t| {
            t.instance = Some(instance);
            t.factory = None;
        })
    }

    fn set_factory(&self, factory: InstanceFactory) -> Result<(), ComponentError> {
        self.configure(|t| {
            t.factory = Some(factory);
            t.instance = None;
        })
    }

    fn set_composition(&self, composition: Composition) -> Result<(), ComponentError> {
        self.configure(|t| t.composition = Some(composition))
    }

    fn set_interfaces(&self, names: &[&str], properties: Properties) -> Result<(), ComponentError> {
        self.configure(|t| {
            t.interfaces = names.iter().map(|n| n.to_string()).collect();
            t.service_properties = properties;
        })
    }

    fn set_callbacks(&self, callbacks: LifecycleCallbacks) -> Result<(), ComponentError> {
        self.configure(|t| t.callbacks = callbacks)
    }

    fn set_callback_instance(
        &self,
        instance: Arc<dyn ComponentInstance>,
    ) -> Result<(), ComponentError> {
        self.configure(|t| t.callback_instance = Some(instance))
    }

    fn set_auto_config(&self, enabled: bool) -> Result<(), ComponentError> {
        self.configure(|t| t.auto_config = enabled)
    }

    fn set_service_properties(&self, properties: Properties) {
        self.template
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .service_properties = properties;
        self.decorator.refresh_children();
    }

    fn service_properties(&self) -> Properties {
        self.template().service_properties.clone()
    }

    fn interfaces(&self) -> Vec<String> {
        self.kind.child_interfaces(&self.template().interfaces)
    }

    fn add_all(&self, dependencies: Vec<Arc<dyn DependencyContext>>) {
        if !self.is_initialized() {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(dependencies);
            return;
        }
        self.submit(move |me| {
            me.component.add_all(dependencies.clone());
            me.decorator.add_dependencies(&dependencies);
        });
    }

    fn remove(&self, dependency: Arc<dyn DependencyContext>) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let before = pending.len();
            pending.retain(|d| !Arc::ptr_eq(d, &dependency));
            if pending.len() != before {
                return;
            }
        }
        self.submit(move |me| {
            me.component.remove(Arc::clone(&dependency));
            me.decorator.remove_dependency(dependency.as_ref());
        });
    }

    fn dependencies(&self) -> Vec<Arc<dyn DependencyContext>> {
        let mut dependencies = self.component.dependencies();
        dependencies.extend(self.pending());
        dependencies
    }

    fn add_state_listener(&self, listener: Arc<dyn ComponentStateListener>) {
        self.template
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .push(Arc::clone(&listener));
        for child in self.decorator.children() {
            child.add_state_listener(Arc::clone(&listener));
        }
    }

    fn remove_state_listener(&self, listener: &Arc<dyn ComponentStateListener>) {
        self.template
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .retain(|l| !Arc::ptr_eq(l, listener));
        for child in self.decorator.children() {
            child.remove_state_listener(listener);
        }
    }

    fn state_listeners(&self) -> Vec<Arc<dyn ComponentStateListener>> {
        self.template().listeners.clone()
    }

    fn start(&self) {
        self.submit(|me| {
            me.initialize();
            me.component.start();
        });
    }

    fn stop(&self) {
        self.component.stop();
    }

    fn instance(&self) -> Option<Arc<dyn ComponentInstance>> {
        self.component.instance()
    }

    fn instances(&self) -> Vec<Arc<dyn ComponentInstance>> {
        self.component.instances()
    }

    fn bundle_context(&self) -> Arc<BundleContext> {
        self.component.bundle_context()
    }

    fn declaration(&self) -> ComponentDeclaration {
        let mut declaration = self.component.declaration();
        declaration.name = self.name();
        declaration.services = self.interfaces();
        declaration.properties = self.service_properties();
        declaration
            .dependencies
            .extend(self.pending().iter().map(|d| d.declaration()));
        declaration
    }
}

impl fmt::Debug for FilterComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterComponent")
            .field("id", &self.component.id())
            .field("name", &self.kind.describe())
            .field("state", &self.component.state())
            .field("children", &self.child_count())
            .finish()
    }
}

/// `(|(service.id=N)(keystone.aspect=N))`: the original service `N` or any aspect of it.
pub(crate) fn origin_filter(origin: u64) -> String {
    format!("(|({SERVICE_ID}={origin})({ASPECT}={origin}))")
}

pub(crate) fn new_source_dependency(
    context: Arc<BundleContext>,
    service_name: &str,
    filter: Option<&str>,
) -> Result<Arc<ServiceDependency>, FilterError> {
    let dependency = ServiceDependency::new(context, Some(service_name), filter)?;
    let configured = dependency
        .set_callbacks(Some(ADDED), Some(CHANGED), Some(REMOVED))
        .and_then(|d| d.set_swap_callback(Some(SWAPPED)));
    if let Err(e) = configured {
        log::error!("Could not configure source dependency '{}': {}", service_name, e);
    }
    Ok(dependency)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_keys_on_original_service() {
        let original = Event::new(4, Properties::new().with(SERVICE_ID, 4_u64));
        let aspect = Event::new(9, Properties::new().with(SERVICE_ID, 9_u64).with(ASPECT, 4_u64));

        assert_eq!(Source::service(&original).key, "4");
        assert_eq!(Source::service(&aspect).key, "4");
        assert_eq!(Source::service(&aspect).origin, Some(4));
    }

    #[test]
    fn test_origin_filter_matches_chain() {
        let filter: keystone_core::Filter = origin_filter(4).parse().unwrap();
        assert!(filter.matches(&Properties::new().with(SERVICE_ID, 4_u64)));
        assert!(filter.matches(&Properties::new().with(SERVICE_ID, 12_u64).with(ASPECT, 4_u64)));
        assert!(!filter.matches(&Properties::new().with(SERVICE_ID, 5_u64)));
    }

    #[test]
    fn test_binding_builders() {
        let binding = Binding::callbacks(Some("add"), None, Some("remove")).with_swap("swap");
        assert_eq!(binding.added.as_deref(), Some("add"));
        assert_eq!(binding.changed, None);
        assert_eq!(binding.swapped.as_deref(), Some("swap"));
        assert_eq!(Binding::field("store").auto_config.as_deref(), Some("store"));
    }
}
