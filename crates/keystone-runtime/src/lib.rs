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

//! # Keystone Runtime
//!
//! The component lifecycle engine. A [`DependencyManager`] creates
//! components and their dependencies; each [`ComponentImpl`] tracks its
//! dependencies, creates its instance once the required ones are available,
//! injects them, calls the lifecycle callbacks and publishes its services.
//!
//! On top of the core sit the decorators ([`FilterComponent`]) that spawn a
//! child component per discovered service or configuration, and the
//! [`DependencyGraph`] diagnostics.

#![warn(missing_docs)]

pub mod callback;
pub mod component;
pub mod config;
pub mod context;
pub mod declaration;
pub mod decorator;
pub mod dependency;
pub mod diagnostics;
pub mod error;
pub mod manager;

pub use callback::{
    invoke_callback, try_invoke_callback, AsAny, CallbackResult, ComponentInstance,
    DecoratorRole, Injection, Invocation,
};
pub use component::{ComponentImpl, BUNDLE_CONTEXT_FIELD, COMPONENT_FIELD};
pub use config::DependencyManagerConfig;
pub use context::{
    Component, ComponentContext, ComponentStateListener, Composition, DependencyContext,
    InstanceFactory, LifecycleCallbacks,
};
pub use declaration::{ComponentDeclaration, DependencyDeclaration};
pub use decorator::{Binding, FilterComponent};
pub use dependency::{
    BundleDependency, ConfigurationDependency, Dependency, DependencyCore, ResourceDependency,
    ServiceDependency,
};
pub use diagnostics::{
    ComponentSelection, DependencyGraph, DependencySelection, MissingDependency,
};
pub use error::{ComponentError, DependencyError};
pub use manager::DependencyManager;
