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

//! Dependency event handling.
//!
//! The same event has different effects depending on the state: while
//! waiting it may only trigger a state recomputation, once instantiated it
//! reaches non instance-bound dependencies, and once tracking it reaches
//! every dependency.

use super::ComponentImpl;
use crate::callback::{DecoratorRole, Injection};
use crate::context::{dependency_key, Component, ComponentContext, DependencyContext};
use keystone_core::{ComponentState, Event, EventSet, EventType};
use std::sync::Arc;

impl ComponentImpl {
    /// Records `event` and returns the state to handle it in, or `None` to drop it.
    fn record(
        &self,
        dependency: &dyn DependencyContext,
        apply: impl FnOnce(&mut EventSet),
    ) -> Option<ComponentState> {
        let key = dependency_key(dependency);
        let mut machine = self.machine();
        if !machine.started {
            return None;
        }
        let state = machine.state;
        if let Some(events) = machine.events.get_mut(&key) {
            apply(events);
            return Some(state);
        }
        drop(machine);
        log::warn!(
            "Ignoring event of '{}', not a dependency of '{}'.",
            dependency.name(),
            self.name()
        );
        None
    }

    pub(super) fn handle_added(&self, dependency: &Arc<dyn DependencyContext>, event: &Arc<Event>) {
        let dc = dependency.as_ref();
        let Some(state) = self.record(dc, |events| replace(events, event)) else {
            event.close();
            return;
        };
        log::trace!("'{}' added {}", self.name(), event);
        dc.set_available(true);
        // A dependency still starting reports its initial events before the
        // state is recomputed once for all of them.
        match state {
            ComponentState::WaitingForRequired => {
                if dc.is_started() && dc.is_required() {
                    self.handle_change();
                }
            }
            ComponentState::InstantiatedAndWaitingForRequired => {
                if !dc.is_instance_bound() {
                    if dc.is_required() {
                        self.invoke_callback_safe(dc, EventType::Added, event);
                    }
                    self.update_instance(dc);
                } else if dc.is_started() && dc.is_required() {
                    self.handle_change();
                }
            }
            ComponentState::TrackingOptional => {
                self.invoke_callback_safe(dc, EventType::Added, event);
                self.update_instance(dc);
            }
            ComponentState::Inactive => {}
        }
    }

    pub(super) fn handle_changed(
        &self,
        dependency: &Arc<dyn DependencyContext>,
        event: &Arc<Event>,
    ) {
        let dc = dependency.as_ref();
        let Some(state) = self.record(dc, |events| replace(events, event)) else {
            event.close();
            return;
        };
        match state {
            ComponentState::TrackingOptional => {
                self.invoke_callback_safe(dc, EventType::Changed, event);
                self.update_instance(dc);
            }
            ComponentState::InstantiatedAndWaitingForRequired if !dc.is_instance_bound() => {
                self.invoke_callback_safe(dc, EventType::Changed, event);
                self.update_instance(dc);
            }
            _ => {}
        }
    }

    pub(super) fn handle_removed(
        &self,
        dependency: &Arc<dyn DependencyContext>,
        event: &Arc<Event>,
    ) {
        let dc = dependency.as_ref();
        let mut remaining = 0;
        if self
            .record(dc, |events| {
                remaining = events.len() - usize::from(events.contains(event));
            })
            .is_none()
        {
            return;
        }
        dc.set_available(remaining > 0);
        // The event stays recorded while the state unwinds, so removal
        // callbacks of the transition still see it.
        if remaining == 0 && dc.is_started() {
            self.handle_change();
        }
        let state = {
            let mut machine = self.machine();
            if let Some(recorded) = machine
                .events
                .get_mut(&dependency_key(dc))
                .and_then(|events| events.remove(event))
            {
                recorded.close();
            }
            machine.state
        };
        match state {
            ComponentState::InstantiatedAndWaitingForRequired => {
                if !dc.is_instance_bound() {
                    if dc.is_required() {
                        self.invoke_callback_safe(dc, EventType::Removed, event);
                    }
                    self.update_instance(dc);
                }
            }
            ComponentState::TrackingOptional => {
                self.invoke_callback_safe(dc, EventType::Removed, event);
                self.update_instance(dc);
            }
            _ => {}
        }
    }

    pub(super) fn handle_swapped(
        &self,
        dependency: &Arc<dyn DependencyContext>,
        old: &Arc<Event>,
        new: &Arc<Event>,
    ) {
        let dc = dependency.as_ref();
        let Some(state) = self.record(dc, |events| {
            if let Some(recorded) = events.remove(old) {
                recorded.close();
            }
            replace(events, new);
        }) else {
            new.close();
            return;
        };
        let swap = match state {
            ComponentState::InstantiatedAndWaitingForRequired => {
                !dc.is_instance_bound() && dc.is_required()
            }
            ComponentState::TrackingOptional => true,
            _ => false,
        };
        if swap {
            if self.may_invoke(dc, EventType::Swapped, new) {
                dc.invoke_callback(EventType::Swapped, &[Arc::clone(old), Arc::clone(new)]);
            }
            self.update_instance(dc);
        }
    }

    /// Invokes a dependency callback at most once per event and state-machine run.
    pub(super) fn invoke_callback_safe(
        &self,
        dependency: &dyn DependencyContext,
        kind: EventType,
        event: &Arc<Event>,
    ) {
        if self.may_invoke(dependency, kind, event) {
            dependency.invoke_callback(kind, &[Arc::clone(event)]);
        }
    }

    /// Whether a `kind` callback for `event` may reach the instances now.
    ///
    /// Optional callbacks wait for the start callback. Decorator instances
    /// only hear about their first dependency, and factory adapters about none.
    /// A granted callback is remembered until the state machine settles.
    fn may_invoke(
        &self,
        dependency: &dyn DependencyContext,
        kind: EventType,
        event: &Event,
    ) -> bool {
        {
            let mut machine = self.machine();
            if !dependency.is_required() && !machine.start_called {
                return false;
            }
            if !machine
                .invoked
                .insert((dependency_key(dependency), event.id(), kind))
            {
                return false;
            }
        }
        match self.decorator_role() {
            Some(DecoratorRole::FactoryConfiguration) => false,
            Some(_) => self.is_first_dependency(dependency),
            None => true,
        }
    }

    pub(super) fn clear_invoke_cache(&self) {
        let mut machine = self.machine();
        if machine.handling_change == 0 {
            machine.invoked.clear();
        }
    }

    /// Refreshes the injected value and the propagated properties.
    fn update_instance(&self, dependency: &dyn DependencyContext) {
        if dependency.auto_config_name().is_some() {
            self.inject_dependency(dependency);
        }
        if dependency.is_propagated() {
            let registration = self.machine().registration.clone();
            if let Some(registration) = registration {
                if let Err(e) = registration.set_properties(self.calculate_service_properties()) {
                    log::warn!("Could not propagate properties of '{}': {}", self.name(), e);
                }
            }
        }
    }

    /// Injects the best event's value, or the dependency's default, into its field.
    pub(super) fn inject_dependency(&self, dependency: &dyn DependencyContext) {
        let Some(field) = dependency.auto_config_name() else {
            return;
        };
        let injection = match self.dependency_event(dependency) {
            Some(event) => Some(match event.value() {
                Some(value) => Injection::Value(Arc::clone(value)),
                None => Injection::Value(Arc::new(event.properties().clone())),
            }),
            None => dependency.default_injection(true),
        };
        let Some(injection) = injection else {
            return;
        };
        let mut injected = false;
        for instance in self.instances() {
            injected |= instance.inject(&field, &injection);
        }
        if !injected && self.decorator_role().is_none() {
            log::error!(
                "Could not inject dependency '{}' into field '{}' of '{}'.",
                dependency.name(),
                field,
                self.name()
            );
        }
    }
}

/// Records `event`, closing the entry it replaces.
fn replace(events: &mut EventSet, event: &Arc<Event>) {
    if let Some(replaced) = events.insert(Arc::clone(event)) {
        if !Arc::ptr_eq(&replaced, event) {
            replaced.close();
        }
    }
}
