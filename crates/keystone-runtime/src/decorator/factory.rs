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

//! Factory configuration adapters: one component per factory configuration.
//!
//! The internal component registers a managed service factory while it is
//! started. A new configuration instance creates a child, instantiates it
//! and hands it the settings synchronously; an error raised by the update
//! callback is returned to the configuration admin and the child is dropped.

use super::children::Decorator;
use super::{DecoratorKind, Source};
use crate::callback::{try_invoke_callback, DecoratorRole, Invocation};
use crate::component::ComponentImpl;
use crate::context::{Component, ComponentContext, DependencyContext};
use crate::error::ComponentError;
use keystone_core::{execute_and_wait, ExecutorError, Properties};
use keystone_infra::{
    BundleContext, ConfigurationError, ManagedServiceFactory, ManagedServiceFactoryRegistration,
};
use std::sync::{Arc, Mutex, PoisonError, Weak};

pub(crate) struct FactoryConfigurationKind {
    context: Arc<BundleContext>,
    factory_pid: String,
    update: String,
    propagate: bool,
    registration: Mutex<Option<ManagedServiceFactoryRegistration>>,
}

impl FactoryConfigurationKind {
    pub(crate) fn new(
        context: Arc<BundleContext>,
        factory_pid: &str,
        update: &str,
        propagate: bool,
    ) -> Self {
        Self {
            context,
            factory_pid: factory_pid.to_string(),
            update: update.to_string(),
            propagate,
            registration: Mutex::new(None),
        }
    }
}

impl DecoratorKind for FactoryConfigurationKind {
    fn role(&self) -> DecoratorRole {
        DecoratorRole::FactoryConfiguration
    }

    fn describe(&self) -> String {
        format!("Adapter for factory pid {}", self.factory_pid)
    }

    fn source_dependency(&self) -> Option<Arc<dyn DependencyContext>> {
        None
    }

    /// The component's own properties, overridden by the public settings when propagating.
    fn child_properties(&self, own: &Properties, source: &Source) -> Properties {
        if self.propagate {
            own.merged(&source.properties.public())
        } else {
            own.clone()
        }
    }

    fn opened(&self, decorator: &Arc<Decorator>) {
        let target = Arc::new(FactoryTarget {
            decorator: Arc::downgrade(decorator),
            factory_pid: self.factory_pid.clone(),
            update: self.update.clone(),
        });
        let (registration, existing) = self
            .context
            .configuration_admin()
            .register_managed_service_factory(&self.factory_pid, target.clone());
        *self
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(registration);
        for (pid, properties) in existing {
            if let Err(e) = target.apply(decorator, &pid, properties) {
                log::error!("Configuration '{}' rejected by {}: {:#}", pid, decorator.describe(), e);
            }
        }
    }

    fn closed(&self) {
        let registration = self
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(registration) = registration {
            registration.unregister();
        }
    }
}

#[derive(Clone)]
struct FactoryTarget {
    decorator: Weak<Decorator>,
    factory_pid: String,
    update: String,
}

impl FactoryTarget {
    /// Creates or updates the child for `pid`; runs on the internal component's executor.
    fn apply(&self, decorator: &Decorator, pid: &str, properties: Properties) -> anyhow::Result<()> {
        if let Some(child) = decorator.child(pid) {
            self.invoke_update(&child, &properties)?;
            decorator.update_source(pid, properties);
            return Ok(());
        }
        let child = decorator.spawn(Source::configuration(pid, properties.clone()))?;
        child.component.instantiate();
        self.invoke_update(&child.component, &properties)?;
        decorator.adopt(child);
        Ok(())
    }

    fn invoke_update(&self, child: &ComponentImpl, properties: &Properties) -> anyhow::Result<()> {
        let instances = child.instances();
        if instances.is_empty() {
            return Err(ComponentError::NotInstantiated(child.id()).into());
        }
        let found = try_invoke_callback(
            &instances,
            &self.update,
            &[
                Invocation::Configuration(Some(properties)),
                Invocation::ComponentConfiguration(child as &dyn Component, Some(properties)),
                Invocation::Empty,
            ],
        )?;
        if !found {
            log::error!(
                "Callback '{}' not found on any instance of component '{}'.",
                self.update,
                child.name()
            );
        }
        Ok(())
    }

    fn on_executor<R, F>(&self, f: F) -> anyhow::Result<Option<R>>
    where
        R: Send + 'static,
        F: FnOnce(&Decorator) -> R + Send + 'static,
    {
        let Some(decorator) = self.decorator.upgrade() else {
            return Ok(None);
        };
        let Some(internal) = decorator.internal() else {
            return Ok(None);
        };
        let executor = internal.executor();
        match execute_and_wait(executor.as_ref(), move || f(&decorator), internal.update_timeout()) {
            Ok(result) => Ok(Some(result)),
            Err(ExecutorError::Timeout) => {
                Err(ConfigurationError::Timeout(self.factory_pid.clone()).into())
            }
            Err(ExecutorError::Disconnected) => {
                Err(ConfigurationError::Closed(self.factory_pid.clone()).into())
            }
        }
    }
}

impl ManagedServiceFactory for FactoryTarget {
    fn updated(&self, pid: &str, properties: Properties) -> anyhow::Result<()> {
        let target = self.clone();
        let pid = pid.to_string();
        self.on_executor(move |decorator| target.apply(decorator, &pid, properties))?
            .unwrap_or(Ok(()))
    }

    fn deleted(&self, pid: &str) {
        let pid = pid.to_string();
        if let Err(e) = self.on_executor(move |decorator| decorator.dismiss(&pid)) {
            log::warn!("Could not remove the component of a deleted configuration: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_infra::Framework;

    #[test]
    fn test_settings_override_own_properties_when_propagating() {
        let context = Framework::new().bundle_context("test");
        let kind = FactoryConfigurationKind::new(context, "cache.factory", "updated", true);
        let source = Source::configuration(
            "cache.factory.1",
            Properties::new().with("size", 10).with(".password", "x"),
        );
        let own = Properties::new().with("size", 1).with("tier", "memory");

        let properties = kind.child_properties(&own, &source);

        assert_eq!(properties.get_int("size"), Some(10));
        assert_eq!(properties.get_str("tier"), Some("memory"));
        assert!(properties.get(".password").is_none());
        assert_eq!(kind.describe(), "Adapter for factory pid cache.factory");
    }
}
