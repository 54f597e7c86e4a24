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

//! State computation and the side effects of each transition.

use super::{component_injection, ComponentImpl, Implementation, BUNDLE_CONTEXT_FIELD, COMPONENT_FIELD};
use crate::callback::{invoke_callback, Injection, Invocation};
use crate::context::{Component, ComponentContext, DependencyContext};
use keystone_core::{ComponentState, EventType, Properties};
use keystone_infra::BundleState;
use std::sync::Arc;

use ComponentState::{
    Inactive, InstantiatedAndWaitingForRequired as Instantiated, TrackingOptional,
    WaitingForRequired,
};

/// Which dependencies a bulk callback pass covers.
#[derive(Clone, Copy)]
enum Scope {
    RequiredUnbound,
    RequiredBound,
    Optional,
    InstanceBound,
}

impl Scope {
    fn covers(self, dependency: &dyn DependencyContext) -> bool {
        let required = dependency.is_required();
        let bound = dependency.is_instance_bound();
        match self {
            Scope::RequiredUnbound => required && !bound,
            Scope::RequiredBound => required && bound,
            Scope::Optional => !required,
            Scope::InstanceBound => bound,
        }
    }
}

impl ComponentImpl {
    /// Runs the state machine until it reaches a fixed point.
    pub(super) fn handle_change(&self) {
        self.machine().handling_change += 1;
        loop {
            let (old, new) = {
                let mut machine = self.machine();
                let old = machine.state;
                let new = Self::calculate_new_state(old, machine.started, &machine.dependencies);
                machine.state = new;
                (old, new)
            };
            if old != new {
                log::debug!("Component '{}' [{}]: {} -> {}", self.name(), self.id, old, new);
            }
            if !self.perform_transition(old, new) {
                break;
            }
        }
        let mut machine = self.machine();
        machine.handling_change -= 1;
        if machine.handling_change == 0 {
            machine.invoked.clear();
        }
    }

    fn calculate_new_state(
        current: ComponentState,
        started: bool,
        dependencies: &[Arc<dyn DependencyContext>],
    ) -> ComponentState {
        let all_available = |scope: Scope| {
            dependencies
                .iter()
                .filter(|d| scope.covers(d.as_ref()))
                .all(|d| d.is_available())
        };
        match current {
            Inactive if started => WaitingForRequired,
            WaitingForRequired if !started => Inactive,
            WaitingForRequired if all_available(Scope::RequiredUnbound) => Instantiated,
            Instantiated if started && all_available(Scope::RequiredUnbound) => {
                if all_available(Scope::RequiredBound) {
                    TrackingOptional
                } else {
                    Instantiated
                }
            }
            Instantiated => WaitingForRequired,
            TrackingOptional
                if started
                    && all_available(Scope::RequiredUnbound)
                    && all_available(Scope::RequiredBound) =>
            {
                TrackingOptional
            }
            TrackingOptional => Instantiated,
            state => state,
        }
    }

    /// Applies the side effects of `old -> new`; returns `false` if nothing changed.
    fn perform_transition(&self, old: ComponentState, new: ComponentState) -> bool {
        match (old, new) {
            (Inactive, WaitingForRequired) => {
                let dependencies = self.dependencies();
                self.start_dependencies(&dependencies);
                self.notify_listeners(new);
            }
            (WaitingForRequired, Instantiated) => {
                self.instantiate_component();
                self.auto_config_dependencies(false);
                self.invoke_all(Scope::RequiredUnbound, EventType::Added);
                let before = self.state();
                self.invoke_lifecycle(self.settings().callbacks.init);
                // A nested transition from init already notified its own state.
                if self.state() == before {
                    self.notify_listeners(new);
                }
            }
            (Instantiated, TrackingOptional) => {
                self.auto_config_dependencies(true);
                self.invoke_all(Scope::RequiredBound, EventType::Added);
                self.invoke_lifecycle(self.settings().callbacks.start);
                self.machine().start_called = true;
                self.invoke_all(Scope::Optional, EventType::Added);
                self.register_service();
                self.notify_listeners(new);
            }
            (TrackingOptional, Instantiated) => {
                self.unregister_service();
                self.invoke_all(Scope::Optional, EventType::Removed);
                self.invoke_lifecycle(self.settings().callbacks.stop);
                self.machine().start_called = false;
                self.invoke_all(Scope::InstanceBound, EventType::Removed);
                self.notify_listeners(new);
            }
            (Instantiated, WaitingForRequired) => {
                self.invoke_lifecycle(self.settings().callbacks.destroy);
                self.remove_instance_bound_dependencies();
                self.invoke_all(Scope::RequiredUnbound, EventType::Removed);
                self.notify_listeners(new);
                if !self.some_dependencies_need_instance() {
                    self.destroy_component();
                }
            }
            (WaitingForRequired, Inactive) => {
                self.stop_dependencies();
                self.destroy_component();
                self.forget_events();
                self.notify_listeners(new);
            }
            _ => return false,
        }
        true
    }

    /// Starts optional dependencies first, then required ones.
    pub(super) fn start_dependencies(&self, dependencies: &[Arc<dyn DependencyContext>]) {
        let (required, optional): (Vec<_>, Vec<_>) =
            dependencies.iter().partition(|d| d.is_required());
        for dependency in optional.into_iter().chain(required) {
            if dependency.needs_instance() {
                self.instantiate_component();
            }
            dependency.start();
        }
    }

    fn stop_dependencies(&self) {
        for dependency in self.dependencies() {
            dependency.stop();
        }
    }

    /// Drops the events left over by stopped dependencies, so a restart begins clean.
    fn forget_events(&self) {
        let dependencies = {
            let mut machine = self.machine();
            for events in machine.events.values_mut() {
                events.close_all();
            }
            machine.dependencies.clone()
        };
        for dependency in dependencies {
            dependency.set_available(false);
        }
    }

    /// Stops and forgets the dependencies added after the component left `INACTIVE`.
    fn remove_instance_bound_dependencies(&self) {
        let removed = {
            let mut machine = self.machine();
            let (bound, kept): (Vec<Arc<dyn DependencyContext>>, Vec<_>) = std::mem::take(&mut machine.dependencies)
                .into_iter()
                .partition(|d| d.is_instance_bound());
            machine.dependencies = kept;
            bound
        };
        for dependency in removed {
            dependency.stop();
        }
    }

    fn some_dependencies_need_instance(&self) -> bool {
        self.dependencies().iter().any(|d| d.needs_instance())
    }

    fn invoke_all(&self, scope: Scope, kind: EventType) {
        for dependency in self.dependencies() {
            if scope.covers(dependency.as_ref()) {
                for event in self.dependency_events(dependency.as_ref()) {
                    self.invoke_callback_safe(dependency.as_ref(), kind, &event);
                }
            }
        }
    }

    /// Injects the current value of every auto-configured dependency, bound or not.
    fn auto_config_dependencies(&self, instance_bound: bool) {
        for dependency in self.dependencies() {
            if dependency.is_instance_bound() == instance_bound
                && dependency.auto_config_name().is_some()
            {
                self.inject_dependency(dependency.as_ref());
            }
        }
    }

    /// Creates the instance once per constructed period.
    pub(super) fn instantiate_component(&self) {
        if self.machine().instance.is_some() {
            return;
        }
        let settings = self.settings();
        let instance = match settings.implementation {
            Implementation::Instance(instance) => instance,
            Implementation::Factory(factory) => match factory(self) {
                Ok(instance) => instance,
                Err(e) => {
                    log::error!("Could not create the instance of '{}': {:#}", self.name(), e);
                    return;
                }
            },
            Implementation::Unset => {
                log::error!("Component '{}' has no implementation.", self.name());
                return;
            }
        };
        self.machine().instance = Some(instance);
        if !settings.auto_config {
            return;
        }
        let Some(me) = self.self_ref.upgrade() else {
            return;
        };
        let component = component_injection(&me);
        let context = Injection::BundleContext(Arc::clone(&self.context));
        for instance in self.instances() {
            instance.inject(COMPONENT_FIELD, &component);
            instance.inject(BUNDLE_CONTEXT_FIELD, &context);
        }
    }

    fn destroy_component(&self) {
        self.machine().instance = None;
    }

    fn invoke_lifecycle(&self, method: Option<String>) {
        let Some(method) = method else {
            return;
        };
        let instances = match self.settings().callback_instance {
            Some(instance) => vec![instance],
            None => self.instances(),
        };
        invoke_callback(
            &instances,
            &method,
            &[Invocation::Component(self), Invocation::Empty],
        );
    }

    fn notify_listeners(&self, state: ComponentState) {
        for listener in self.state_listeners() {
            listener.changed(self, state);
        }
    }

    /// Merges the propagated dependency properties, then the component's own.
    pub(super) fn calculate_service_properties(&self) -> Properties {
        let mut properties = Properties::new();
        for dependency in self.dependencies() {
            if dependency.is_propagated() && dependency.is_available() {
                match dependency.properties() {
                    Ok(propagated) => properties.merge(&propagated),
                    Err(e) => log::warn!("Not propagating '{}': {}", dependency.name(), e),
                }
            }
        }
        properties.merge(&self.settings().service_properties);
        properties
    }

    fn register_service(&self) {
        let interfaces = self.settings().interfaces;
        if interfaces.is_empty() {
            return;
        }
        let Some(instance) = self.instance() else {
            log::error!(
                "Could not register {} of '{}': no instance.",
                interfaces.join(", "),
                self.name()
            );
            return;
        };
        let names: Vec<&str> = interfaces.iter().map(String::as_str).collect();
        let properties = self.calculate_service_properties();
        let registration = self
            .context
            .register_service(&names, instance.service_object(), properties);
        self.machine().registration = Some(registration);
    }

    fn unregister_service(&self) {
        let Some(registration) = self.machine().registration.take() else {
            return;
        };
        let bundle_state = self.context.bundle().state();
        if bundle_state.intersects(BundleState::STARTING | BundleState::ACTIVE | BundleState::STOPPING) {
            if let Err(e) = registration.unregister() {
                log::debug!("Service of '{}' already gone: {}", self.name(), e);
            }
        }
    }
}
