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

//! Dependencies on services of the registry.

use super::DependencyCore;
use crate::callback::{Injection, Invocation};
use crate::context::DependencyContext;
use crate::error::DependencyError;
use keystone_core::properties::{OBJECT_CLASS, SERVICE_ID, SERVICE_PID};
use keystone_core::{Event, EventType, Filter, FilterError, Properties, ServiceObject};
use keystone_infra::{BundleContext, ServiceReference, ServiceTracker, TrackerCustomizer};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

/// Computes the propagated properties from the current event.
pub type PropagateFn = Arc<dyn Fn(&Event) -> Properties + Send + Sync>;

#[derive(Clone, Default)]
struct ServiceSettings {
    swap: Option<String>,
    default_implementation: Option<ServiceObject>,
    propagate_with: Option<PropagateFn>,
}

/// Tracks the services matching a name and/or a filter.
///
/// Optional by default. Events carry the service object as their value and
/// the service properties; their id is the `service.id`.
pub struct ServiceDependency {
    core: DependencyCore,
    self_ref: Weak<ServiceDependency>,
    context: Arc<BundleContext>,
    service_name: Option<String>,
    user_filter: Option<String>,
    filter: Filter,
    settings: RwLock<ServiceSettings>,
    tracker: Mutex<Option<Arc<ServiceTracker>>>,
}

fn tracked_filter(service_name: Option<&str>, filter: Option<&str>) -> Result<Filter, FilterError> {
    let user = filter.map(str::parse::<Filter>).transpose()?;
    Ok(match (service_name, user) {
        (Some(name), Some(user)) => Filter::all(vec![Filter::object_class(name), user]),
        (Some(name), None) => Filter::object_class(name),
        (None, Some(user)) => user,
        (None, None) => Filter::Present {
            attr: OBJECT_CLASS.to_string(),
        },
    })
}

impl ServiceDependency {
    /// Creates an optional dependency on `service_name` services matching `filter`.
    ///
    /// # Errors
    ///
    /// [`FilterError`] if `filter` does not parse.
    pub fn new(
        context: Arc<BundleContext>,
        service_name: Option<&str>,
        filter: Option<&str>,
    ) -> Result<Arc<Self>, FilterError> {
        let tracked = tracked_filter(service_name, filter)?;
        Ok(Arc::new_cyclic(|self_ref: &Weak<ServiceDependency>| {
            let me: Weak<dyn DependencyContext> = self_ref.clone();
            Self {
                core: DependencyCore::new(me, false),
                self_ref: self_ref.clone(),
                context,
                service_name: service_name.map(str::to_string),
                user_filter: filter.map(str::to_string),
                filter: tracked,
                settings: RwLock::new(ServiceSettings::default()),
                tracker: Mutex::new(None),
            }
        }))
    }

    fn settings(&self) -> ServiceSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut ServiceSettings)) -> Result<&Self, DependencyError> {
        self.core.ensure_not_started()?;
        f(&mut self.settings.write().unwrap_or_else(PoisonError::into_inner));
        Ok(self)
    }

    /// The swap callback; without one a replacement is delivered as add then remove.
    pub fn set_swap_callback(&self, swap: Option<&str>) -> Result<&Self, DependencyError> {
        self.update(|s| s.swap = swap.map(str::to_string))
    }

    /// Injected instead of the null object while no service is available.
    pub fn set_default_implementation(
        &self,
        implementation: ServiceObject,
    ) -> Result<&Self, DependencyError> {
        self.update(|s| s.default_implementation = Some(implementation))
    }

    /// Computes the propagated properties with `f` instead of copying the service's.
    pub fn set_propagate_with(&self, f: PropagateFn) -> Result<&Self, DependencyError> {
        self.core.ensure_not_started()?;
        self.core
            .propagate
            .store(true, std::sync::atomic::Ordering::Release);
        self.update(|s| s.propagate_with = Some(f))
    }

    /// The service name, if one was given.
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// The complete filter the tracker selects with.
    pub fn tracked_filter(&self) -> &Filter {
        &self.filter
    }

    /// Each event holds a usage of the service, released when the event is closed.
    fn event_for(&self, reference: &ServiceReference) -> Arc<Event> {
        let held = reference.clone();
        Arc::new(
            Event::new(reference.id(), reference.properties())
                .with_value(reference.get_service())
                .with_label(reference.names().join(","))
                .on_close(move || {
                    held.unget_service();
                }),
        )
    }
}

impl TrackerCustomizer for ServiceDependency {
    fn added(&self, reference: &ServiceReference) {
        self.core.deliver(EventType::Added, vec![self.event_for(reference)]);
    }

    fn modified(&self, reference: &ServiceReference) {
        self.core
            .deliver(EventType::Changed, vec![self.event_for(reference)]);
    }

    fn removed(&self, reference: &ServiceReference) {
        self.core
            .deliver(EventType::Removed, vec![self.event_for(reference)]);
    }

    fn swapped(&self, old: &ServiceReference, new: &ServiceReference) {
        if self.settings().swap.is_some() {
            self.core.deliver(
                EventType::Swapped,
                vec![self.event_for(old), self.event_for(new)],
            );
        } else {
            self.added(new);
            self.removed(old);
        }
    }
}

impl DependencyContext for ServiceDependency {
    fn core(&self) -> &DependencyCore {
        &self.core
    }

    fn start(&self) {
        self.core.start_with(|| {
            let customizer: Weak<dyn TrackerCustomizer> = self.self_ref.clone();
            let tracker = self.context.create_tracker(self.filter.clone(), customizer);
            *self.tracker.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(Arc::clone(&tracker));
            tracker.open();
        });
    }

    fn stop(&self) {
        self.core.stop_with(|| {
            let tracker = self
                .tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(tracker) = tracker {
                tracker.close();
            }
        });
    }

    fn invoke_callback(&self, kind: EventType, events: &[Arc<Event>]) {
        match (kind, events) {
            (EventType::Swapped, [old, new]) => {
                let Some(swap) = self.settings().swap else {
                    return;
                };
                let Some(component) = self.core.component() else {
                    return;
                };
                let c = component.as_component();
                self.core.dispatch(
                    &*component,
                    &swap,
                    &[
                        Invocation::ComponentSwap(c, old, new),
                        Invocation::Swap(old, new),
                    ],
                );
            }
            (_, [event, ..]) => self.core.invoke_event(kind, event),
            _ => log::warn!("{} callback of '{}' without event.", kind, self.name()),
        }
    }

    fn create_copy(&self) -> Arc<dyn DependencyContext> {
        let settings = self.settings();
        Arc::new_cyclic(|self_ref: &Weak<ServiceDependency>| {
            let me: Weak<dyn DependencyContext> = self_ref.clone();
            Self {
                core: DependencyCore::copied(me, &self.core),
                self_ref: self_ref.clone(),
                context: Arc::clone(&self.context),
                service_name: self.service_name.clone(),
                user_filter: self.user_filter.clone(),
                filter: self.filter.clone(),
                settings: RwLock::new(settings),
                tracker: Mutex::new(None),
            }
        })
    }

    fn kind(&self) -> &'static str {
        "service"
    }

    fn name(&self) -> String {
        match (&self.service_name, &self.user_filter) {
            (Some(name), Some(filter)) => format!("{name} {filter}"),
            (Some(name), None) => name.clone(),
            (None, Some(filter)) => filter.clone(),
            (None, None) => "*".to_string(),
        }
    }

    fn filter(&self) -> Option<String> {
        self.user_filter.clone()
    }

    fn properties(&self) -> Result<Properties, DependencyError> {
        let event = self
            .core
            .current_event()
            .ok_or_else(|| DependencyError::NoEvent(self.name()))?;
        if let Some(propagate) = self.settings().propagate_with {
            return Ok(propagate(&event));
        }
        let mut properties = event.properties().clone();
        properties.remove(SERVICE_ID);
        properties.remove(SERVICE_PID);
        Ok(properties)
    }

    fn default_injection(&self, null_object: bool) -> Option<Injection> {
        self.core.auto_config_name()?;
        match self.settings().default_implementation {
            Some(default) => Some(Injection::Value(default)),
            None if null_object => Some(Injection::Null),
            None => None,
        }
    }
}

impl fmt::Debug for ServiceDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDependency")
            .field("name", &self.name())
            .field("required", &self.core.is_required())
            .field("available", &self.core.is_available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracked_filter_combines_name_and_filter() {
        let filter = tracked_filter(Some("Store"), Some("(tier=gold)")).unwrap();
        let gold = Properties::new()
            .with(OBJECT_CLASS, vec!["Store"])
            .with("tier", "gold");
        let silver = gold.clone().with("tier", "silver");
        assert!(filter.matches(&gold));
        assert!(!filter.matches(&silver));
    }

    #[test]
    fn test_no_name_no_filter_matches_any_service() {
        let filter = tracked_filter(None, None).unwrap();
        assert!(filter.matches(&Properties::new().with(OBJECT_CLASS, vec!["Anything"])));
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        assert!(tracked_filter(Some("Store"), Some("(tier=gold")).is_err());
    }
}
