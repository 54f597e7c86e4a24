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

//! An in-memory configuration admin.
//!
//! Configurations are keyed by pid. A [`ManagedService`] registered for a
//! pid receives every update of that configuration; a
//! [`ManagedServiceFactory`] registered for a factory pid receives the
//! updates and deletions of every configuration created from it. Delivery
//! is synchronous, so a rejection surfaces as the result of
//! [`Configuration::update`].

use crate::error::ConfigurationError;
use keystone_core::properties::{FACTORY_PID, SERVICE_PID};
use keystone_core::Properties;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Receives the settings of a single configuration.
pub trait ManagedService: Send + Sync {
    /// Called with the new settings, or `None` once the configuration is gone.
    fn updated(&self, properties: Option<Properties>) -> anyhow::Result<()>;
}

/// Receives the configurations created from a factory pid.
pub trait ManagedServiceFactory: Send + Sync {
    /// A configuration was created or updated.
    fn updated(&self, pid: &str, properties: Properties) -> anyhow::Result<()>;
    /// A configuration was deleted.
    fn deleted(&self, pid: &str);
}

struct Record {
    factory_pid: Option<String>,
    properties: Option<Properties>,
}

#[derive(Default)]
struct AdminState {
    records: BTreeMap<String, Record>,
    services: HashMap<String, (u64, Arc<dyn ManagedService>)>,
    factories: HashMap<String, (u64, Arc<dyn ManagedServiceFactory>)>,
}

/// Keeps a [`ConfigurationError`] raised by the target, wraps anything else.
fn rejected(pid: &str, source: anyhow::Error) -> ConfigurationError {
    match source.downcast::<ConfigurationError>() {
        Ok(error) => error,
        Err(source) => ConfigurationError::Rejected {
            pid: pid.to_string(),
            source,
        },
    }
}

/// Owns every configuration and the targets they are delivered to.
pub struct ConfigurationAdmin {
    next_id: AtomicU64,
    state: Mutex<AdminState>,
    self_ref: Weak<ConfigurationAdmin>,
}

enum Target {
    Service(Arc<dyn ManagedService>),
    Factory(Arc<dyn ManagedServiceFactory>),
    None,
}

impl ConfigurationAdmin {
    /// Creates an empty admin.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            next_id: AtomicU64::new(1),
            state: Mutex::new(AdminState::default()),
            self_ref: self_ref.clone(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AdminState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the configuration for `pid`, creating an empty one if needed.
    pub fn get_configuration(&self, pid: &str) -> Configuration {
        self.lock()
            .records
            .entry(pid.to_string())
            .or_insert_with(|| Record {
                factory_pid: None,
                properties: None,
            });
        self.handle(pid.to_string(), None)
    }

    /// Creates a new, empty configuration under `factory_pid`.
    pub fn create_factory_configuration(&self, factory_pid: &str) -> Configuration {
        let pid = format!(
            "{}.{}",
            factory_pid,
            self.next_id.fetch_add(1, Ordering::Relaxed)
        );
        self.lock().records.insert(
            pid.clone(),
            Record {
                factory_pid: Some(factory_pid.to_string()),
                properties: None,
            },
        );
        self.handle(pid, Some(factory_pid.to_string()))
    }

    /// Every configuration that currently holds settings.
    pub fn list_configurations(&self) -> Vec<Configuration> {
        let records: Vec<(String, Option<String>)> = self
            .lock()
            .records
            .iter()
            .filter(|(_, r)| r.properties.is_some())
            .map(|(pid, r)| (pid.clone(), r.factory_pid.clone()))
            .collect();
        records
            .into_iter()
            .map(|(pid, factory_pid)| self.handle(pid, factory_pid))
            .collect()
    }

    fn handle(&self, pid: String, factory_pid: Option<String>) -> Configuration {
        Configuration {
            admin: self.self_ref.clone(),
            pid,
            factory_pid,
        }
    }

    /// Registers the target of configuration `pid`.
    ///
    /// Returns the settings already stored for `pid`; delivering them is up
    /// to the caller.
    pub fn register_managed_service(
        &self,
        pid: &str,
        service: Arc<dyn ManagedService>,
    ) -> (ManagedServiceRegistration, Option<Properties>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        if state
            .services
            .insert(pid.to_string(), (id, service))
            .is_some()
        {
            log::warn!("Managed service for '{}' replaced.", pid);
        }
        let existing = state.records.get(pid).and_then(|r| r.properties.clone());
        log::debug!("Managed service registered for '{}'.", pid);
        (
            ManagedServiceRegistration {
                admin: self.self_ref.clone(),
                pid: pid.to_string(),
                id,
            },
            existing,
        )
    }

    /// Registers the target of every configuration created from `factory_pid`.
    ///
    /// Returns the configurations already stored under `factory_pid`.
    pub fn register_managed_service_factory(
        &self,
        factory_pid: &str,
        factory: Arc<dyn ManagedServiceFactory>,
    ) -> (ManagedServiceFactoryRegistration, Vec<(String, Properties)>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        if state
            .factories
            .insert(factory_pid.to_string(), (id, factory))
            .is_some()
        {
            log::warn!("Managed service factory for '{}' replaced.", factory_pid);
        }
        let existing = state
            .records
            .iter()
            .filter(|(_, r)| r.factory_pid.as_deref() == Some(factory_pid))
            .filter_map(|(pid, r)| r.properties.clone().map(|p| (pid.clone(), p)))
            .collect();
        log::debug!("Managed service factory registered for '{}'.", factory_pid);
        (
            ManagedServiceFactoryRegistration {
                admin: self.self_ref.clone(),
                factory_pid: factory_pid.to_string(),
                id,
            },
            existing,
        )
    }

    fn target(&self, state: &AdminState, pid: &str, factory_pid: Option<&str>) -> Target {
        match factory_pid {
            Some(fpid) => state
                .factories
                .get(fpid)
                .map_or(Target::None, |(_, f)| Target::Factory(Arc::clone(f))),
            None => state
                .services
                .get(pid)
                .map_or(Target::None, |(_, s)| Target::Service(Arc::clone(s))),
        }
    }

    fn update(
        &self,
        pid: &str,
        factory_pid: Option<&str>,
        properties: Properties,
    ) -> Result<(), ConfigurationError> {
        let mut properties = properties.with(SERVICE_PID, pid);
        if let Some(fpid) = factory_pid {
            properties.insert(FACTORY_PID, fpid);
        }
        let target = {
            let mut state = self.lock();
            let record = state.records.get_mut(pid).ok_or_else(|| {
                ConfigurationError::Deleted(pid.to_string())
            })?;
            record.properties = Some(properties.clone());
            self.target(&state, pid, factory_pid)
        };
        log::debug!("Configuration '{}' updated.", pid);
        let result = match target {
            Target::Service(service) => service.updated(Some(properties)),
            Target::Factory(factory) => factory.updated(pid, properties),
            Target::None => Ok(()),
        };
        result.map_err(|source| rejected(pid, source))
    }

    fn delete(&self, pid: &str, factory_pid: Option<&str>) -> Result<(), ConfigurationError> {
        let target = {
            let mut state = self.lock();
            state
                .records
                .remove(pid)
                .ok_or_else(|| ConfigurationError::Deleted(pid.to_string()))?;
            self.target(&state, pid, factory_pid)
        };
        log::debug!("Configuration '{}' deleted.", pid);
        match target {
            Target::Service(service) => service
                .updated(None)
                .map_err(|source| rejected(pid, source)),
            Target::Factory(factory) => {
                factory.deleted(pid);
                Ok(())
            }
            Target::None => Ok(()),
        }
    }

    fn properties(&self, pid: &str) -> Option<Properties> {
        self.lock()
            .records
            .get(pid)
            .and_then(|r| r.properties.clone())
    }
}

impl fmt::Debug for ConfigurationAdmin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ConfigurationAdmin")
            .field("configurations", &state.records.len())
            .field("services", &state.services.len())
            .field("factories", &state.factories.len())
            .finish()
    }
}

/// A handle on one configuration.
#[derive(Clone)]
pub struct Configuration {
    admin: Weak<ConfigurationAdmin>,
    pid: String,
    factory_pid: Option<String>,
}

impl Configuration {
    /// The configuration pid.
    pub fn pid(&self) -> &str {
        &self.pid
    }

    /// The factory pid this configuration was created from, if any.
    pub fn factory_pid(&self) -> Option<&str> {
        self.factory_pid.as_deref()
    }

    /// The stored settings, `None` until the first update.
    pub fn properties(&self) -> Option<Properties> {
        self.admin.upgrade()?.properties(&self.pid)
    }

    /// Stores `properties` and delivers them to the registered target.
    pub fn update(&self, properties: Properties) -> Result<(), ConfigurationError> {
        let admin = self
            .admin
            .upgrade()
            .ok_or_else(|| ConfigurationError::Deleted(self.pid.clone()))?;
        admin.update(&self.pid, self.factory_pid.as_deref(), properties)
    }

    /// Deletes the configuration and notifies the registered target.
    pub fn delete(&self) -> Result<(), ConfigurationError> {
        let admin = self
            .admin
            .upgrade()
            .ok_or_else(|| ConfigurationError::Deleted(self.pid.clone()))?;
        admin.delete(&self.pid, self.factory_pid.as_deref())
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("pid", &self.pid)
            .field("factory_pid", &self.factory_pid)
            .finish()
    }
}

/// Withdraws a [`ManagedService`].
#[derive(Debug)]
pub struct ManagedServiceRegistration {
    admin: Weak<ConfigurationAdmin>,
    pid: String,
    id: u64,
}

impl ManagedServiceRegistration {
    /// The pid this registration listens to.
    pub fn pid(&self) -> &str {
        &self.pid
    }

    /// Stops delivery; later updates of the pid are only stored.
    pub fn unregister(&self) {
        if let Some(admin) = self.admin.upgrade() {
            let mut state = admin.lock();
            if state.services.get(&self.pid).is_some_and(|(id, _)| *id == self.id) {
                state.services.remove(&self.pid);
            }
        }
    }
}

/// Withdraws a [`ManagedServiceFactory`].
#[derive(Debug)]
pub struct ManagedServiceFactoryRegistration {
    admin: Weak<ConfigurationAdmin>,
    factory_pid: String,
    id: u64,
}

impl ManagedServiceFactoryRegistration {
    /// The factory pid this registration listens to.
    pub fn factory_pid(&self) -> &str {
        &self.factory_pid
    }

    /// Stops delivery for the factory pid.
    pub fn unregister(&self) {
        if let Some(admin) = self.admin.upgrade() {
            let mut state = admin.lock();
            if state
                .factories
                .get(&self.factory_pid)
                .is_some_and(|(id, _)| *id == self.id)
            {
                state.factories.remove(&self.factory_pid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Option<Properties>>>);

    impl ManagedService for Recorder {
        fn updated(&self, properties: Option<Properties>) -> anyhow::Result<()> {
            if properties
                .as_ref()
                .and_then(|p| p.get_str("reject"))
                .is_some()
            {
                bail!("bad settings");
            }
            self.0.lock().unwrap().push(properties);
            Ok(())
        }
    }

    #[test]
    fn test_update_is_delivered_with_pid() {
        let admin = ConfigurationAdmin::new();
        let recorder = Arc::new(Recorder::default());
        let (_registration, initial) = admin.register_managed_service("demo", recorder.clone());
        assert!(initial.is_none());

        let config = admin.get_configuration("demo");
        config.update(Properties::new().with("a", 1)).unwrap();

        let seen = recorder.0.lock().unwrap();
        let props = seen[0].as_ref().unwrap();
        assert_eq!(props.get_int("a"), Some(1));
        assert_eq!(props.get_str(SERVICE_PID), Some("demo"));
    }

    #[test]
    fn test_rejection_surfaces_to_caller() {
        let admin = ConfigurationAdmin::new();
        let recorder = Arc::new(Recorder::default());
        let (_registration, _) = admin.register_managed_service("demo", recorder);

        let err = admin
            .get_configuration("demo")
            .update(Properties::new().with("reject", "yes"))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Rejected { .. }));
    }

    #[test]
    fn test_existing_settings_returned_on_register() {
        let admin = ConfigurationAdmin::new();
        admin
            .get_configuration("demo")
            .update(Properties::new().with("a", 1))
            .unwrap();

        let (_registration, initial) =
            admin.register_managed_service("demo", Arc::new(Recorder::default()));
        assert_eq!(initial.unwrap().get_int("a"), Some(1));
    }

    #[test]
    fn test_delete_delivers_none_then_fails_twice() {
        let admin = ConfigurationAdmin::new();
        let recorder = Arc::new(Recorder::default());
        let (_registration, _) = admin.register_managed_service("demo", recorder.clone());
        let config = admin.get_configuration("demo");
        config.update(Properties::new()).unwrap();

        config.delete().unwrap();
        assert!(recorder.0.lock().unwrap().last().unwrap().is_none());
        assert!(matches!(config.delete(), Err(ConfigurationError::Deleted(_))));
    }

    #[test]
    fn test_unregistered_service_no_longer_notified() {
        let admin = ConfigurationAdmin::new();
        let recorder = Arc::new(Recorder::default());
        let (registration, _) = admin.register_managed_service("demo", recorder.clone());
        registration.unregister();

        admin
            .get_configuration("demo")
            .update(Properties::new())
            .unwrap();
        assert!(recorder.0.lock().unwrap().is_empty());
    }
}
