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

//! The contracts between components, dependencies and their users.
//!
//! [`Component`] is the public surface every component offers, whether it
//! is a plain [`ComponentImpl`](crate::ComponentImpl) or a decorator.
//! [`ComponentContext`] is the narrower surface a dependency talks to, and
//! [`DependencyContext`] is what a component expects from each dependency
//! kind.

use crate::callback::{ComponentInstance, DecoratorRole, Injection};
use crate::declaration::{ComponentDeclaration, DependencyDeclaration};
use crate::dependency::DependencyCore;
use crate::error::{ComponentError, DependencyError};
use keystone_core::{ComponentState, Event, EventType, Executor, Properties};
use keystone_infra::BundleContext;
use std::sync::Arc;
use std::time::Duration;

/// Creates the component instance on demand.
pub type InstanceFactory =
    Arc<dyn Fn(&dyn Component) -> anyhow::Result<Arc<dyn ComponentInstance>> + Send + Sync>;

/// Returns every instance that receives callbacks, given the main one.
pub type Composition =
    Arc<dyn Fn(&Arc<dyn ComponentInstance>) -> Vec<Arc<dyn ComponentInstance>> + Send + Sync>;

/// Names of the lifecycle callbacks; `None` disables one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleCallbacks {
    /// Called once the required dependencies are injected.
    pub init: Option<String>,
    /// Called when the component becomes fully available.
    pub start: Option<String>,
    /// Called when the component stops being available.
    pub stop: Option<String>,
    /// Called before the instance is released.
    pub destroy: Option<String>,
}

impl LifecycleCallbacks {
    /// Custom callback names.
    pub fn new(
        init: Option<&str>,
        start: Option<&str>,
        stop: Option<&str>,
        destroy: Option<&str>,
    ) -> Self {
        Self {
            init: init.map(str::to_string),
            start: start.map(str::to_string),
            stop: stop.map(str::to_string),
            destroy: destroy.map(str::to_string),
        }
    }

    /// No lifecycle callbacks at all.
    pub fn none() -> Self {
        Self::new(None, None, None, None)
    }
}

impl Default for LifecycleCallbacks {
    fn default() -> Self {
        Self::new(Some("init"), Some("start"), Some("stop"), Some("destroy"))
    }
}

/// Observes the committed transitions of a component.
pub trait ComponentStateListener: Send + Sync {
    /// Called synchronously, on the component's executor, after each transition.
    fn changed(&self, component: &dyn Component, state: ComponentState);
}

impl<F> ComponentStateListener for F
where
    F: Fn(&dyn Component, ComponentState) + Send + Sync,
{
    fn changed(&self, component: &dyn Component, state: ComponentState) {
        self(component, state)
    }
}

/// The public surface of a component.
///
/// Builder setters fail with [`ComponentError::AlreadyActive`] once the
/// component has been started. Lifecycle operations never fail: they are
/// queued on the component's executor and report problems through logs and
/// state listeners.
pub trait Component: Send + Sync {
    /// The id handed out by the owning manager.
    fn id(&self) -> u64;

    /// A human readable name: the published services, or the implementation type.
    fn name(&self) -> String;

    /// The current lifecycle state.
    fn state(&self) -> ComponentState;

    /// Returns `true` between [`Component::start`] and [`Component::stop`].
    fn is_active(&self) -> bool;

    /// Returns `true` while the component is fully started.
    fn is_available(&self) -> bool {
        self.state().is_available()
    }

    /// Uses a ready-made instance.
    fn set_implementation(&self, instance: Arc<dyn ComponentInstance>)
        -> Result<(), ComponentError>;

    /// Creates the instance with `factory` when the component gets instantiated.
    fn set_factory(&self, factory: InstanceFactory) -> Result<(), ComponentError>;

    /// Spreads callbacks and injections over several instances.
    fn set_composition(&self, composition: Composition) -> Result<(), ComponentError>;

    /// Publishes the instance under `names` while the component is available.
    fn set_interfaces(&self, names: &[&str], properties: Properties)
        -> Result<(), ComponentError>;

    /// Renames or disables the lifecycle callbacks.
    fn set_callbacks(&self, callbacks: LifecycleCallbacks) -> Result<(), ComponentError>;

    /// Sends lifecycle callbacks to `instance` instead of the component instances.
    fn set_callback_instance(&self, instance: Arc<dyn ComponentInstance>)
        -> Result<(), ComponentError>;

    /// Enables or disables injecting the component handle into its instances.
    fn set_auto_config(&self, enabled: bool) -> Result<(), ComponentError>;

    /// Replaces the published properties, updating a live registration.
    fn set_service_properties(&self, properties: Properties);

    /// The component's own service properties.
    fn service_properties(&self) -> Properties;

    /// The service names the component publishes.
    fn interfaces(&self) -> Vec<String>;

    /// Adds a dependency.
    fn add(&self, dependency: Arc<dyn DependencyContext>) {
        self.add_all(vec![dependency]);
    }

    /// Adds dependencies in one step.
    fn add_all(&self, dependencies: Vec<Arc<dyn DependencyContext>>);

    /// Removes a dependency; its remaining events are unbound.
    fn remove(&self, dependency: Arc<dyn DependencyContext>);

    /// The current dependencies.
    fn dependencies(&self) -> Vec<Arc<dyn DependencyContext>>;

    /// Adds a state listener.
    fn add_state_listener(&self, listener: Arc<dyn ComponentStateListener>);

    /// Removes a state listener.
    fn remove_state_listener(&self, listener: &Arc<dyn ComponentStateListener>);

    /// The state listeners.
    fn state_listeners(&self) -> Vec<Arc<dyn ComponentStateListener>>;

    /// Administratively enables the component.
    fn start(&self);

    /// Administratively disables the component.
    fn stop(&self);

    /// The main instance, while the component is constructed.
    fn instance(&self) -> Option<Arc<dyn ComponentInstance>>;

    /// Every instance receiving callbacks.
    fn instances(&self) -> Vec<Arc<dyn ComponentInstance>>;

    /// The bundle the component belongs to.
    fn bundle_context(&self) -> Arc<BundleContext>;

    /// A snapshot for diagnostics.
    fn declaration(&self) -> ComponentDeclaration;
}

/// What a dependency may ask from the component that owns it.
pub trait ComponentContext: Component {
    /// The executor serializing this component.
    fn executor(&self) -> Arc<dyn Executor>;

    /// Delivers dependency events; processed on the component's executor.
    ///
    /// `events` holds one event, or the old and the new one for
    /// [`EventType::Swapped`].
    fn handle_event(
        &self,
        dependency: Arc<dyn DependencyContext>,
        kind: EventType,
        events: Vec<Arc<Event>>,
    );

    /// The best event currently recorded for `dependency`.
    fn dependency_event(&self, dependency: &dyn DependencyContext) -> Option<Arc<Event>>;

    /// Every event currently recorded for `dependency`, best last.
    fn dependency_events(&self, dependency: &dyn DependencyContext) -> Vec<Arc<Event>>;

    /// Creates the instance now if it does not exist yet.
    fn instantiate(&self);

    /// The decorator role of the main instance, if it is an internal one.
    fn decorator_role(&self) -> Option<DecoratorRole> {
        self.instance().and_then(|i| i.decorator())
    }

    /// How long synchronous dependency work may wait for the executor.
    fn update_timeout(&self) -> Duration;

    /// Upcast to the public surface.
    fn as_component(&self) -> &dyn Component;
}

/// The contract every dependency kind fulfils towards its component.
pub trait DependencyContext: Send + Sync {
    /// The state shared by all dependency kinds.
    fn core(&self) -> &DependencyCore;

    /// Starts tracking the underlying source. Idempotent.
    fn start(&self);

    /// Stops tracking the underlying source. Idempotent.
    fn stop(&self);

    /// Dispatches an event to the configured callback.
    fn invoke_callback(&self, kind: EventType, events: &[Arc<Event>]);

    /// An independent copy with the same configuration and no runtime state.
    fn create_copy(&self) -> Arc<dyn DependencyContext>;

    /// `"service"`, `"configuration"`, `"bundle"` or `"resource"`.
    fn kind(&self) -> &'static str;

    /// A short name for diagnostics.
    fn name(&self) -> String;

    /// The filter this dependency selects with, if any.
    fn filter(&self) -> Option<String> {
        None
    }

    /// Whether the instance must exist before this dependency can start.
    fn needs_instance(&self) -> bool {
        false
    }

    /// The contribution to the owning component's published properties.
    fn properties(&self) -> Result<Properties, DependencyError> {
        Ok(Properties::new())
    }

    /// What to inject when no event is available.
    fn default_injection(&self, null_object: bool) -> Option<Injection> {
        let _ = null_object;
        None
    }

    /// Returns `true` once started.
    fn is_started(&self) -> bool {
        self.core().is_started()
    }

    /// Whether the owning component needs this dependency.
    fn is_required(&self) -> bool {
        self.core().is_required()
    }

    /// Whether at least one event is recorded.
    fn is_available(&self) -> bool {
        self.core().is_available()
    }

    /// Set by the owning component as events come and go.
    fn set_available(&self, available: bool) {
        self.core().set_available(available);
    }

    /// Whether the dependency was added after the component left `INACTIVE`.
    fn is_instance_bound(&self) -> bool {
        self.core().is_instance_bound()
    }

    /// Marks the dependency as added to an already active component.
    fn set_instance_bound(&self, instance_bound: bool) {
        self.core().set_instance_bound(instance_bound);
    }

    /// The field the current value is injected into, if any.
    fn auto_config_name(&self) -> Option<String> {
        self.core().auto_config_name()
    }

    /// Whether the properties feed the component's published properties.
    fn is_propagated(&self) -> bool {
        self.core().is_propagated()
    }

    /// The owning component, once added.
    fn component_context(&self) -> Option<Arc<dyn ComponentContext>> {
        self.core().component()
    }

    /// Attaches the dependency to its component.
    fn set_component_context(&self, component: std::sync::Weak<dyn ComponentContext>) {
        self.core().set_component(component);
    }

    /// A snapshot for diagnostics.
    fn declaration(&self) -> DependencyDeclaration {
        DependencyDeclaration {
            name: self.name(),
            kind: self.kind().to_string(),
            filter: self.filter(),
            required: self.is_required(),
            available: self.is_available(),
            instance_bound: self.is_instance_bound(),
        }
    }
}

/// A stable identity for a dependency, independent of the pointer's vtable.
pub(crate) fn dependency_key(dependency: &dyn DependencyContext) -> usize {
    dependency as *const dyn DependencyContext as *const () as usize
}
