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

//! The entry point: creates components and dependencies, and owns the
//! components it was asked to manage.

use crate::component::ComponentImpl;
use crate::config::DependencyManagerConfig;
use crate::context::Component;
use crate::decorator::{
    AdapterKind, AspectKind, Binding, FactoryConfigurationKind, FilterComponent,
};
use crate::dependency::{
    BundleDependency, ConfigurationDependency, ResourceDependency, ServiceDependency,
};
use keystone_core::{DispatchExecutor, Executor, FilterError, SerialExecutor, ThreadPool};
use keystone_infra::{BundleContext, BundleState};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Creates and manages the components of one bundle.
///
/// Component ids come from a counter owned by the manager, so two managers
/// never influence each other.
pub struct DependencyManager {
    context: Arc<BundleContext>,
    config: DependencyManagerConfig,
    next_id: AtomicU64,
    pool: Option<Arc<ThreadPool>>,
    components: RwLock<Vec<Arc<dyn Component>>>,
}

impl DependencyManager {
    /// A manager with the default configuration: components run on the calling threads.
    pub fn new(context: Arc<BundleContext>) -> Arc<Self> {
        Self::assemble(context, DependencyManagerConfig::default(), None)
    }

    /// A manager with `config`; a parallel one starts its thread pool here.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if a pool worker cannot be spawned.
    pub fn with_config(
        context: Arc<BundleContext>,
        config: DependencyManagerConfig,
    ) -> io::Result<Arc<Self>> {
        let pool = if config.parallel {
            let name = format!("keystone-{}", context.bundle().symbolic_name());
            Some(Arc::new(ThreadPool::new(name, config.pool_size)?))
        } else {
            None
        };
        Ok(Self::assemble(context, config, pool))
    }

    fn assemble(
        context: Arc<BundleContext>,
        config: DependencyManagerConfig,
        pool: Option<Arc<ThreadPool>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            context,
            config,
            next_id: AtomicU64::new(1),
            pool,
            components: RwLock::new(Vec::new()),
        })
    }

    /// The bundle this manager works for.
    pub fn bundle_context(&self) -> &Arc<BundleContext> {
        &self.context
    }

    /// The settings in use.
    pub fn config(&self) -> &DependencyManagerConfig {
        &self.config
    }

    /// A new inactive component with its own executor.
    pub fn create_component(&self) -> Arc<ComponentImpl> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("component-{id}");
        let executor: Arc<dyn Executor> = match &self.pool {
            Some(pool) => DispatchExecutor::new(name, Arc::clone(pool)),
            None => Arc::new(SerialExecutor::new(name)),
        };
        ComponentImpl::new(
            id,
            Arc::clone(&self.context),
            executor,
            self.config.update_timeout(),
        )
    }

    /// A dependency on services registered under `service_name` and/or matching `filter`.
    ///
    /// # Errors
    ///
    /// [`FilterError`] if `filter` does not parse.
    pub fn create_service_dependency(
        &self,
        service_name: Option<&str>,
        filter: Option<&str>,
    ) -> Result<Arc<ServiceDependency>, FilterError> {
        ServiceDependency::new(Arc::clone(&self.context), service_name, filter)
    }

    /// A required dependency on the configuration `pid`.
    pub fn create_configuration_dependency(&self, pid: &str) -> Arc<ConfigurationDependency> {
        ConfigurationDependency::new(Arc::clone(&self.context), pid)
    }

    /// A dependency on bundles in one of the `mask` states whose headers match `filter`.
    ///
    /// # Errors
    ///
    /// [`FilterError`] if `filter` does not parse.
    pub fn create_bundle_dependency(
        &self,
        mask: BundleState,
        filter: Option<&str>,
    ) -> Result<Arc<BundleDependency>, FilterError> {
        BundleDependency::new(Arc::clone(&self.context), mask, filter)
    }

    /// A dependency on resources matching `filter`.
    ///
    /// # Errors
    ///
    /// [`FilterError`] if `filter` does not parse.
    pub fn create_resource_dependency(
        &self,
        filter: Option<&str>,
    ) -> Result<Arc<ResourceDependency>, FilterError> {
        ResourceDependency::new(Arc::clone(&self.context), filter)
    }

    /// An aspect decorating every `service_name` service matching `filter`.
    ///
    /// Each child publishes `service_name` with `ranking` and depends on the
    /// service it decorates as described by `binding`.
    ///
    /// # Errors
    ///
    /// [`FilterError`] if `filter` does not parse.
    pub fn create_aspect_service(
        self: &Arc<Self>,
        service_name: &str,
        filter: Option<&str>,
        ranking: i64,
        binding: Binding,
    ) -> Result<Arc<FilterComponent>, FilterError> {
        let kind = AspectKind::new(
            Arc::clone(&self.context),
            service_name,
            filter,
            ranking,
            binding,
        )?;
        Ok(FilterComponent::new(self, Arc::new(kind)))
    }

    /// An adapter creating one child per `adaptee` service matching `filter`.
    ///
    /// With `propagate`, children publish the adaptee's public properties
    /// overridden by their own.
    ///
    /// # Errors
    ///
    /// [`FilterError`] if `filter` does not parse.
    pub fn create_adapter_service(
        self: &Arc<Self>,
        adaptee: &str,
        filter: Option<&str>,
        binding: Binding,
        propagate: bool,
    ) -> Result<Arc<FilterComponent>, FilterError> {
        let kind = AdapterKind::new(
            Arc::clone(&self.context),
            adaptee,
            filter,
            binding,
            propagate,
        )?;
        Ok(FilterComponent::new(self, Arc::new(kind)))
    }

    /// A factory adapter creating one child per configuration of `factory_pid`.
    ///
    /// Each child receives its settings through `update` before it starts.
    /// With `propagate`, the public settings override the published properties.
    pub fn create_factory_configuration_adapter(
        self: &Arc<Self>,
        factory_pid: &str,
        update: &str,
        propagate: bool,
    ) -> Arc<FilterComponent> {
        let kind = Arc::new(FactoryConfigurationKind::new(
            Arc::clone(&self.context),
            factory_pid,
            update,
            propagate,
        ));
        FilterComponent::new(self, kind)
    }

    /// Records `component` and starts it.
    pub fn add(&self, component: Arc<dyn Component>) {
        log::debug!("Adding component {} '{}'.", component.id(), component.name());
        self.components
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&component));
        component.start();
    }

    /// Stops `component` and forgets it.
    pub fn remove(&self, component: &dyn Component) {
        let id = component.id();
        let removed = {
            let mut components = self.components.write().unwrap_or_else(PoisonError::into_inner);
            let before = components.len();
            components.retain(|c| c.id() != id);
            before != components.len()
        };
        if removed {
            log::debug!("Removing component {} '{}'.", id, component.name());
        }
        component.stop();
    }

    /// The managed components, in the order they were added.
    pub fn components(&self) -> Vec<Arc<dyn Component>> {
        self.components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Removes every component, the most recently added first.
    pub fn clear(&self) {
        let components: Vec<_> = self
            .components
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for component in components.into_iter().rev() {
            component.stop();
        }
    }
}

impl fmt::Debug for DependencyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyManager")
            .field("bundle", &self.context.bundle().symbolic_name())
            .field("parallel", &self.pool.is_some())
            .field("components", &self.components().len())
            .finish()
    }
}
