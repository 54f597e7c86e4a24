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

//! Dependencies on a configuration of the configuration admin.

use super::DependencyCore;
use crate::callback::{try_invoke_callback, ComponentInstance, Invocation};
use crate::context::DependencyContext;
use crate::error::DependencyError;
use keystone_core::{execute_and_wait, Event, EventType, ExecutorError, Properties};
use keystone_infra::{BundleContext, ConfigurationError, ManagedService, ManagedServiceRegistration};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

/// The callback invoked when no other name is configured.
pub const DEFAULT_CALLBACK: &str = "updated";

/// Tracks the configuration stored under a pid.
///
/// Required by default. Every update is delivered synchronously to the
/// `updated` callback, and an error returned by that callback is handed
/// back to the configuration admin, which rejects the update.
pub struct ConfigurationDependency {
    core: DependencyCore,
    self_ref: Weak<ConfigurationDependency>,
    context: Arc<BundleContext>,
    pid: String,
    event_id: u64,
    needs_instance: RwLock<Option<bool>>,
    may_invoke: AtomicBool,
    settings: Mutex<Option<Properties>>,
    registration: Mutex<Option<ManagedServiceRegistration>>,
}

fn event_id(pid: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    pid.hash(&mut hasher);
    hasher.finish()
}

impl ConfigurationDependency {
    /// Creates a required dependency on configuration `pid`.
    pub fn new(context: Arc<BundleContext>, pid: &str) -> Arc<Self> {
        Arc::new_cyclic(|self_ref: &Weak<ConfigurationDependency>| {
            let me: Weak<dyn DependencyContext> = self_ref.clone();
            let dependency = Self {
                core: DependencyCore::new(me, true),
                self_ref: self_ref.clone(),
                context,
                pid: pid.to_string(),
                event_id: event_id(pid),
                needs_instance: RwLock::new(None),
                may_invoke: AtomicBool::new(true),
                settings: Mutex::new(None),
                registration: Mutex::new(None),
            };
            dependency.core.set_added(Some(DEFAULT_CALLBACK));
            dependency
        })
    }

    /// The configuration pid.
    pub fn pid(&self) -> &str {
        &self.pid
    }

    /// Renames the update callback.
    pub fn set_callback(&self, method: &str) -> Result<&Self, DependencyError> {
        self.core.ensure_not_started()?;
        self.core.set_added(Some(method));
        Ok(self)
    }

    /// Sends updates to `instance`; `needs_instance` forces the component
    /// instance to exist before the first update anyway.
    pub fn set_callback_with_instance(
        &self,
        instance: Arc<dyn ComponentInstance>,
        method: &str,
        needs_instance: bool,
    ) -> Result<&Self, DependencyError> {
        use super::Dependency;
        self.set_callback(method)?;
        self.set_callback_instance(instance)?;
        *self
            .needs_instance
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(needs_instance);
        Ok(self)
    }

    fn settings(&self) -> Option<Properties> {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn event_for(&self, properties: Properties) -> Arc<Event> {
        Arc::new(Event::new(self.event_id, properties).with_label(self.pid.clone()))
    }

    /// Applies new settings on the component executor.
    fn do_updated(&self, settings: Option<Properties>) -> anyhow::Result<()> {
        self.may_invoke.store(true, Ordering::Release);
        let old = self.settings();
        if !self.core.is_started() || (old.is_none() && settings.is_none()) {
            return Ok(());
        }
        self.invoke_updated(settings.as_ref())?;
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings.clone();
        match (old, settings) {
            (None, Some(new)) => self.core.deliver(EventType::Added, vec![self.event_for(new)]),
            (Some(_), Some(new)) => self
                .core
                .deliver(EventType::Changed, vec![self.event_for(new)]),
            (Some(old), None) => self
                .core
                .deliver(EventType::Removed, vec![self.event_for(old)]),
            (None, None) => {}
        }
        Ok(())
    }

    /// Calls the update callback once per delivered settings.
    fn invoke_updated(&self, settings: Option<&Properties>) -> anyhow::Result<()> {
        if !self.may_invoke.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(component) = self.core.component() else {
            return Ok(());
        };
        if component.decorator_role().is_some() {
            return Ok(());
        }
        let (Some(method), _, _) = self.core.callbacks() else {
            return Ok(());
        };
        let instances = self.core.instances(&*component);
        let c = component.as_component();
        let found = try_invoke_callback(
            &instances,
            &method,
            &[
                Invocation::Configuration(settings),
                Invocation::ComponentConfiguration(c, settings),
                Invocation::Empty,
            ],
        )?;
        if !found {
            log::error!(
                "Callback '{}' not found on any instance of component '{}'.",
                method,
                component.name()
            );
        }
        Ok(())
    }
}

impl ManagedService for ConfigurationDependency {
    fn updated(&self, properties: Option<Properties>) -> anyhow::Result<()> {
        let (Some(me), Some(component)) = (self.self_ref.upgrade(), self.core.component()) else {
            return Ok(());
        };
        let executor = component.executor();
        let outcome = execute_and_wait(
            executor.as_ref(),
            move || me.do_updated(properties),
            component.update_timeout(),
        );
        match outcome {
            Ok(result) => result,
            Err(ExecutorError::Timeout) => Err(ConfigurationError::Timeout(self.pid.clone()).into()),
            Err(ExecutorError::Disconnected) => {
                Err(ConfigurationError::Closed(self.pid.clone()).into())
            }
        }
    }
}

impl DependencyContext for ConfigurationDependency {
    fn core(&self) -> &DependencyCore {
        &self.core
    }

    fn start(&self) {
        self.core.start_with(|| {
            let Some(me) = self.self_ref.upgrade() else {
                return;
            };
            let target: Arc<dyn ManagedService> = me.clone();
            let (registration, existing) = self
                .context
                .configuration_admin()
                .register_managed_service(&self.pid, target);
            *self
                .registration
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(registration);
            let (Some(existing), Some(component)) = (existing, self.core.component()) else {
                return;
            };
            // Runs once the current task raised the started flag.
            let executor = component.executor();
            executor.schedule(Box::new(move || {
                if let Err(e) = me.do_updated(Some(existing)) {
                    log::error!("Initial configuration of '{}' rejected: {:#}", me.pid, e);
                }
            }));
            executor.run_pending();
        });
    }

    fn stop(&self) {
        self.core.stop_with(|| {
            let registration = self
                .registration
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(registration) = registration {
                registration.unregister();
            }
            *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = None;
        });
    }

    fn invoke_callback(&self, kind: EventType, events: &[Arc<Event>]) {
        match kind {
            EventType::Added => {
                let settings = events.first().map(|e| e.properties());
                if let Err(e) = self.invoke_updated(settings) {
                    log::error!(
                        "Got error while handling configuration update for pid '{}': {:#}",
                        self.pid,
                        e
                    );
                }
            }
            EventType::Removed => self.may_invoke.store(true, Ordering::Release),
            EventType::Changed | EventType::Swapped => {}
        }
    }

    fn create_copy(&self) -> Arc<dyn DependencyContext> {
        let needs_instance = *self
            .needs_instance
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::new_cyclic(|self_ref: &Weak<ConfigurationDependency>| {
            let me: Weak<dyn DependencyContext> = self_ref.clone();
            Self {
                core: DependencyCore::copied(me, &self.core),
                self_ref: self_ref.clone(),
                context: Arc::clone(&self.context),
                pid: self.pid.clone(),
                event_id: self.event_id,
                needs_instance: RwLock::new(needs_instance),
                may_invoke: AtomicBool::new(true),
                settings: Mutex::new(None),
                registration: Mutex::new(None),
            }
        })
    }

    fn kind(&self) -> &'static str {
        "configuration"
    }

    fn name(&self) -> String {
        self.pid.clone()
    }

    fn needs_instance(&self) -> bool {
        self.needs_instance
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or(!self.core.has_callback_instance())
    }

    fn properties(&self) -> Result<Properties, DependencyError> {
        self.settings()
            .map(|settings| settings.public())
            .ok_or_else(|| DependencyError::NoEvent(self.pid.clone()))
    }
}

impl fmt::Debug for ConfigurationDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationDependency")
            .field("pid", &self.pid)
            .field("required", &self.core.is_required())
            .field("available", &self.core.is_available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_infra::Framework;

    #[test]
    fn test_defaults() {
        let framework = Framework::new();
        let dependency = ConfigurationDependency::new(framework.bundle_context("test"), "P");
        assert!(dependency.is_required());
        assert!(dependency.needs_instance());
        assert_eq!(dependency.core.callbacks().0.as_deref(), Some(DEFAULT_CALLBACK));
        assert_eq!(dependency.kind(), "configuration");
    }

    #[test]
    fn test_properties_without_settings_is_an_error() {
        let framework = Framework::new();
        let dependency = ConfigurationDependency::new(framework.bundle_context("test"), "P");
        assert_eq!(
            dependency.properties(),
            Err(DependencyError::NoEvent("P".to_string()))
        );
    }

    #[test]
    fn test_event_id_is_stable_per_pid() {
        assert_eq!(event_id("P"), event_id("P"));
        assert_ne!(event_id("P"), event_id("Q"));
    }
}
