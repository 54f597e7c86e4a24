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

//! The framework that owns every collaborator, and the per-bundle view of it.

use crate::bundle::{Bundle, BundleRegistry, BundleState};
use crate::configuration::ConfigurationAdmin;
use crate::registry::{ServiceRegistration, ServiceRegistry};
use crate::resource::ResourceRepository;
use crate::tracker::{ServiceTracker, TrackerCustomizer};
use keystone_core::{Filter, Properties, ServiceObject};
use std::fmt;
use std::sync::{Arc, Weak};

/// Property naming the bundle that registered a service.
pub const SERVICE_BUNDLE_ID: &str = "service.bundleid";

/// Groups the service registry, configuration admin, bundles and resources.
pub struct Framework {
    registry: Arc<ServiceRegistry>,
    configuration_admin: Arc<ConfigurationAdmin>,
    bundles: Arc<BundleRegistry>,
    resources: Arc<ResourceRepository>,
}

impl Framework {
    /// Creates a framework with empty collaborators.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: ServiceRegistry::new(),
            configuration_admin: ConfigurationAdmin::new(),
            bundles: BundleRegistry::new(),
            resources: ResourceRepository::new(),
        })
    }

    /// Installs and activates a bundle, and returns its context.
    pub fn bundle_context(self: &Arc<Self>, symbolic_name: &str) -> Arc<BundleContext> {
        let bundle = self.bundles.install(symbolic_name, Properties::new());
        self.bundles.set_state(&bundle, BundleState::RESOLVED);
        self.bundles.set_state(&bundle, BundleState::ACTIVE);
        Arc::new(BundleContext {
            bundle,
            framework: Arc::clone(self),
        })
    }

    /// The service registry.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// The configuration admin.
    pub fn configuration_admin(&self) -> &Arc<ConfigurationAdmin> {
        &self.configuration_admin
    }

    /// The bundle registry.
    pub fn bundles(&self) -> &Arc<BundleRegistry> {
        &self.bundles
    }

    /// The resource repository.
    pub fn resources(&self) -> &Arc<ResourceRepository> {
        &self.resources
    }
}

impl fmt::Debug for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framework")
            .field("services", &self.registry.len())
            .field("bundles", &self.bundles)
            .field("resources", &self.resources)
            .finish()
    }
}

/// A bundle's view of the framework.
pub struct BundleContext {
    bundle: Arc<Bundle>,
    framework: Arc<Framework>,
}

impl BundleContext {
    /// The bundle this context belongs to.
    pub fn bundle(&self) -> &Arc<Bundle> {
        &self.bundle
    }

    /// Returns `true` while the owning bundle is being stopped.
    pub fn is_stopping(&self) -> bool {
        self.bundle.state() == BundleState::STOPPING
    }

    /// The framework.
    pub fn framework(&self) -> &Arc<Framework> {
        &self.framework
    }

    /// The service registry.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.framework.registry
    }

    /// The configuration admin.
    pub fn configuration_admin(&self) -> &Arc<ConfigurationAdmin> {
        &self.framework.configuration_admin
    }

    /// The bundle registry.
    pub fn bundles(&self) -> &Arc<BundleRegistry> {
        &self.framework.bundles
    }

    /// The resource repository.
    pub fn resources(&self) -> &Arc<ResourceRepository> {
        &self.framework.resources
    }

    /// Registers a service on behalf of this bundle.
    pub fn register_service(
        &self,
        names: &[&str],
        object: ServiceObject,
        properties: Properties,
    ) -> ServiceRegistration {
        let properties = properties.with(SERVICE_BUNDLE_ID, self.bundle.id());
        self.framework.registry.register(names, object, properties)
    }

    /// Creates a closed tracker over this framework's registry.
    pub fn create_tracker(
        &self,
        filter: Filter,
        customizer: Weak<dyn TrackerCustomizer>,
    ) -> Arc<ServiceTracker> {
        ServiceTracker::new(Arc::clone(&self.framework.registry), filter, customizer)
    }

    /// Moves the owning bundle to `state`.
    pub fn set_bundle_state(&self, state: BundleState) {
        self.framework.bundles.set_state(&self.bundle, state);
    }
}

impl fmt::Debug for BundleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleContext")
            .field("bundle", &self.bundle)
            .finish()
    }
}
