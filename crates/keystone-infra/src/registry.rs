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

//! An in-memory service registry.
//!
//! Services are registered under one or more names with a property snapshot
//! and receive a registry-wide `service.id`. Listeners are notified
//! synchronously on the thread performing the change, after the registry's
//! own locks have been released.

use crate::error::RegistryError;
use keystone_core::properties::{OBJECT_CLASS, SERVICE_ID};
use keystone_core::{Filter, Properties, ServiceObject};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

struct ReferenceInner {
    id: u64,
    names: Vec<String>,
    object: ServiceObject,
    properties: RwLock<Properties>,
    registered: AtomicBool,
    usage: AtomicUsize,
}

/// A handle on a registered service, cheap to clone.
#[derive(Clone)]
pub struct ServiceReference {
    inner: Arc<ReferenceInner>,
}

impl ServiceReference {
    /// The registry-assigned id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The names the service was registered under.
    pub fn names(&self) -> &[String] {
        &self.inner.names
    }

    /// The service object.
    pub fn object(&self) -> ServiceObject {
        Arc::clone(&self.inner.object)
    }

    /// The service object, counted as one more usage until [`ServiceReference::unget_service`].
    pub fn get_service(&self) -> ServiceObject {
        self.inner.usage.fetch_add(1, Ordering::AcqRel);
        self.object()
    }

    /// Releases a usage taken by [`ServiceReference::get_service`].
    ///
    /// Returns `false` if no usage was held.
    pub fn unget_service(&self) -> bool {
        self.inner
            .usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Number of usages currently held.
    pub fn usage_count(&self) -> usize {
        self.inner.usage.load(Ordering::Acquire)
    }

    /// The service object downcast to a concrete type.
    pub fn service_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.object().downcast::<T>().ok()
    }

    /// A snapshot of the current properties.
    pub fn properties(&self) -> Properties {
        self.inner
            .properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The current `service.ranking`.
    pub fn ranking(&self) -> i64 {
        self.inner
            .properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ranking()
    }

    /// Returns `false` once the service has been unregistered.
    pub fn is_registered(&self) -> bool {
        self.inner.registered.load(Ordering::Acquire)
    }

    /// Returns `true` if `self` is preferred over `other` (higher ranking, then lower id).
    pub fn outranks(&self, other: &ServiceReference) -> bool {
        let (a, b) = (self.ranking(), other.ranking());
        a > b || (a == b && self.id() < other.id())
    }
}

impl PartialEq for ServiceReference {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ServiceReference {}

impl fmt::Debug for ServiceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReference")
            .field("id", &self.id())
            .field("names", &self.inner.names)
            .field("ranking", &self.ranking())
            .finish()
    }
}

/// A change in the registry.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// A service was registered.
    Registered(ServiceReference),
    /// The properties of a service changed.
    Modified(ServiceReference),
    /// A service is being unregistered.
    Unregistering(ServiceReference),
}

impl ServiceEvent {
    /// The service this event is about.
    pub fn reference(&self) -> &ServiceReference {
        match self {
            ServiceEvent::Registered(r)
            | ServiceEvent::Modified(r)
            | ServiceEvent::Unregistering(r) => r,
        }
    }
}

/// Receives every registry change.
pub trait ServiceListener: Send + Sync {
    /// Called synchronously on the thread that performed the change.
    fn service_changed(&self, event: &ServiceEvent);
}

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The registry of published services.
pub struct ServiceRegistry {
    next_service_id: AtomicU64,
    next_listener_id: AtomicU64,
    services: RwLock<BTreeMap<u64, ServiceReference>>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn ServiceListener>)>>,
    self_ref: Weak<ServiceRegistry>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            next_service_id: AtomicU64::new(1),
            next_listener_id: AtomicU64::new(1),
            services: RwLock::new(BTreeMap::new()),
            listeners: Mutex::new(Vec::new()),
            self_ref: self_ref.clone(),
        })
    }

    /// Publishes `object` under `names`.
    ///
    /// The stored properties receive `service.id` and `objectClass`.
    pub fn register(
        &self,
        names: &[&str],
        object: ServiceObject,
        properties: Properties,
    ) -> ServiceRegistration {
        let id = self.next_service_id.fetch_add(1, Ordering::Relaxed);
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let properties = properties
            .with(SERVICE_ID, id)
            .with(OBJECT_CLASS, names.clone());
        let reference = ServiceReference {
            inner: Arc::new(ReferenceInner {
                id,
                names,
                object,
                properties: RwLock::new(properties),
                registered: AtomicBool::new(true),
                usage: AtomicUsize::new(0),
            }),
        };
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, reference.clone());
        log::debug!("Registered service {:?}.", reference);
        self.fire(&ServiceEvent::Registered(reference.clone()));
        ServiceRegistration {
            registry: self.self_ref.clone(),
            reference,
        }
    }

    /// Registered services matching `filter`, best ranked first.
    pub fn references(&self, filter: Option<&Filter>) -> Vec<ServiceReference> {
        let mut refs: Vec<ServiceReference> = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.properties())))
            .cloned()
            .collect();
        refs.sort_by_cached_key(|r| (std::cmp::Reverse(r.ranking()), r.id()));
        refs
    }

    /// The best ranked service registered under `name`.
    pub fn reference(&self, name: &str) -> Option<ServiceReference> {
        self.references(Some(&Filter::object_class(name)))
            .into_iter()
            .next()
    }

    /// Parses `filter` and returns the matching services, best ranked first.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidFilter`] if the filter does not parse.
    pub fn find(&self, filter: &str) -> Result<Vec<ServiceReference>, RegistryError> {
        let filter: Filter = filter.parse()?;
        Ok(self.references(Some(&filter)))
    }

    /// Adds a listener for every subsequent change.
    pub fn add_listener(&self, listener: Arc<dyn ServiceListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Removes a listener; returns `false` if it was unknown.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(l, _)| *l != id);
        listeners.len() != before
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fire(&self, event: &ServiceEvent) {
        let listeners: Vec<Arc<dyn ServiceListener>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener.service_changed(event);
        }
    }

    fn set_properties(
        &self,
        reference: &ServiceReference,
        properties: Properties,
    ) -> Result<(), RegistryError> {
        if !reference.is_registered() {
            return Err(RegistryError::Unregistered(reference.id()));
        }
        let properties = properties
            .with(SERVICE_ID, reference.id())
            .with(OBJECT_CLASS, reference.inner.names.clone());
        *reference
            .inner
            .properties
            .write()
            .unwrap_or_else(PoisonError::into_inner) = properties;
        self.fire(&ServiceEvent::Modified(reference.clone()));
        Ok(())
    }

    fn unregister(&self, reference: &ServiceReference) -> Result<(), RegistryError> {
        if !reference.inner.registered.swap(false, Ordering::AcqRel) {
            return Err(RegistryError::Unregistered(reference.id()));
        }
        log::debug!("Unregistering service {:?}.", reference);
        self.fire(&ServiceEvent::Unregistering(reference.clone()));
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&reference.id());
        Ok(())
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.len())
            .finish()
    }
}

/// The publisher's handle on a registered service.
#[derive(Debug, Clone)]
pub struct ServiceRegistration {
    registry: Weak<ServiceRegistry>,
    reference: ServiceReference,
}

impl ServiceRegistration {
    /// The reference consumers see.
    pub fn reference(&self) -> &ServiceReference {
        &self.reference
    }

    /// Replaces the published properties and notifies listeners.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Unregistered`] if the service is gone.
    pub fn set_properties(&self, properties: Properties) -> Result<(), RegistryError> {
        match self.registry.upgrade() {
            Some(registry) => registry.set_properties(&self.reference, properties),
            None => Err(RegistryError::Unregistered(self.reference.id())),
        }
    }

    /// Withdraws the service and notifies listeners.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Unregistered`] if it was already withdrawn.
    pub fn unregister(&self) -> Result<(), RegistryError> {
        match self.registry.upgrade() {
            Some(registry) => registry.unregister(&self.reference),
            None => Err(RegistryError::Unregistered(self.reference.id())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::properties::SERVICE_RANKING;

    struct Recorder(Mutex<Vec<String>>);

    impl ServiceListener for Recorder {
        fn service_changed(&self, event: &ServiceEvent) {
            let tag = match event {
                ServiceEvent::Registered(_) => "registered",
                ServiceEvent::Modified(_) => "modified",
                ServiceEvent::Unregistering(_) => "unregistering",
            };
            self.0
                .lock()
                .unwrap()
                .push(format!("{tag}:{}", event.reference().id()));
        }
    }

    #[test]
    fn test_register_assigns_ids_and_object_class() {
        let registry = ServiceRegistry::new();
        let reg = registry.register(&["Store"], Arc::new(1u8), Properties::new());
        let props = reg.reference().properties();

        assert_eq!(props.service_id(), Some(reg.reference().id()));
        assert!(Filter::object_class("Store").matches(&props));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_references_are_sorted_by_ranking() {
        let registry = ServiceRegistry::new();
        let low = registry.register(&["S"], Arc::new(()), Properties::new());
        let high = registry.register(
            &["S"],
            Arc::new(()),
            Properties::new().with(SERVICE_RANKING, 10),
        );

        let refs = registry.references(Some(&Filter::object_class("S")));
        assert_eq!(refs[0], *high.reference());
        assert_eq!(refs[1], *low.reference());
        assert_eq!(registry.reference("S").as_ref(), Some(high.reference()));
    }

    #[test]
    fn test_listener_sees_full_lifecycle() {
        let registry = ServiceRegistry::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let id = registry.add_listener(recorder.clone());

        let reg = registry.register(&["S"], Arc::new(()), Properties::new());
        reg.set_properties(Properties::new().with("k", "v")).unwrap();
        reg.unregister().unwrap();
        assert!(reg.unregister().is_err());
        assert!(registry.remove_listener(id));

        let sid = reg.reference().id();
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                format!("registered:{sid}"),
                format!("modified:{sid}"),
                format!("unregistering:{sid}")
            ]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_usage_count_follows_get_and_unget() {
        let registry = ServiceRegistry::new();
        let reg = registry.register(&["S"], Arc::new(()), Properties::new());
        let reference = reg.reference().clone();

        let _object = reference.get_service();
        let _again = reference.get_service();
        assert_eq!(reference.usage_count(), 2);
        assert!(reference.unget_service());
        assert!(reference.unget_service());
        assert!(!reference.unget_service());
        assert_eq!(reference.usage_count(), 0);
    }

    #[test]
    fn test_find_rejects_bad_filter() {
        let registry = ServiceRegistry::new();
        assert!(matches!(
            registry.find("(broken"),
            Err(RegistryError::InvalidFilter(_))
        ));
    }
}
