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

//! # Keystone Infra
//!
//! In-memory implementations of the collaborators a component runtime
//! consumes as black boxes: a service registry with trackers, a
//! configuration admin, a bundle registry and a resource repository, grouped
//! behind a [`Framework`] and handed to components as a [`BundleContext`].

pub mod bundle;
pub mod configuration;
pub mod error;
pub mod framework;
pub mod registry;
pub mod resource;
pub mod tracker;

pub use bundle::{
    Bundle, BundleCustomizer, BundleEvent, BundleListener, BundleRegistry, BundleState,
    BundleTracker,
};
pub use configuration::{
    Configuration, ConfigurationAdmin, ManagedService, ManagedServiceFactory,
    ManagedServiceFactoryRegistration, ManagedServiceRegistration,
};
pub use error::{ConfigurationError, RegistryError};
pub use framework::{BundleContext, Framework, SERVICE_BUNDLE_ID};
pub use registry::{
    ListenerId, ServiceEvent, ServiceListener, ServiceReference, ServiceRegistration,
    ServiceRegistry,
};
pub use resource::{Resource, ResourceHandler, ResourceRepository};
pub use tracker::{ServiceTracker, TrackerCustomizer};
