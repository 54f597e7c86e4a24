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

//! Serializable snapshots of components and their dependencies.

use keystone_core::{ComponentState, Properties};
use serde::{Deserialize, Serialize};

/// A dependency as seen by diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDeclaration {
    /// Service name, pid, bundle or resource selector.
    pub name: String,
    /// `"service"`, `"configuration"`, `"bundle"` or `"resource"`.
    pub kind: String,
    /// The filter, if the dependency uses one.
    pub filter: Option<String>,
    /// Whether the owner needs it.
    pub required: bool,
    /// Whether an event is currently recorded.
    pub available: bool,
    /// Whether it was added after the owner left `INACTIVE`.
    pub instance_bound: bool,
}

impl DependencyDeclaration {
    /// `available + 2 * required`.
    pub fn state_code(&self) -> u8 {
        u8::from(self.available) + 2 * u8::from(self.required)
    }

    /// A readable form of [`DependencyDeclaration::state_code`].
    pub fn state_name(&self) -> &'static str {
        match self.state_code() {
            0 => "optional unavailable",
            1 => "optional available",
            2 => "required unavailable",
            _ => "required available",
        }
    }
}

/// A component as seen by diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDeclaration {
    /// The manager-assigned id.
    pub id: u64,
    /// The readable name.
    pub name: String,
    /// The lifecycle state at snapshot time.
    pub state: ComponentState,
    /// The service names it publishes.
    pub services: Vec<String>,
    /// Its own service properties.
    pub properties: Properties,
    /// Its dependencies, in declaration order.
    pub dependencies: Vec<DependencyDeclaration>,
}
