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

//! Dependency graph diagnostics.
//!
//! A [`DependencyGraph`] is a snapshot of the components of one or more
//! managers: every component becomes a node, every dependency an edge to the
//! components that provide it. From there it answers which components are
//! not registered, which dependencies nobody provides, and which components
//! wait on each other in a loop.

use crate::declaration::{ComponentDeclaration, DependencyDeclaration};
use crate::manager::DependencyManager;
use keystone_core::graph::find_cycles;
use keystone_core::properties::OBJECT_CLASS;
use keystone_core::{ComponentState, Filter};
use serde::{Deserialize, Serialize};

const SERVICE: &str = "service";

/// Which components enter the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ComponentSelection {
    /// Every component.
    #[default]
    All,
    /// Only the components that are not fully started.
    Unregistered,
}

/// Which dependencies enter the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DependencySelection {
    /// Every dependency.
    #[default]
    All,
    /// Only the unavailable ones, required or optional.
    Unavailable,
    /// Only the unavailable required ones.
    RequiredUnavailable,
}

/// A component in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentNode {
    /// The component's snapshot.
    pub declaration: ComponentDeclaration,
    /// Symbolic name of the bundle the component belongs to.
    pub bundle: String,
}

/// A dependency in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyNode {
    /// Index of the owning component in [`DependencyGraph::components`].
    pub owner: usize,
    /// The dependency's snapshot.
    pub declaration: DependencyDeclaration,
    /// Indices of the components able to provide it.
    pub providers: Vec<usize>,
}

/// A dependency nobody provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingDependency {
    /// The dependency's name.
    pub name: String,
    /// Its kind.
    pub kind: String,
    /// Name of the component waiting for it.
    pub component: String,
    /// Bundle of that component.
    pub bundle: String,
}

/// A snapshot of components and the dependencies between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// The selected components.
    pub components: Vec<ComponentNode>,
    /// The selected dependencies of those components.
    pub dependencies: Vec<DependencyNode>,
}

impl DependencyGraph {
    /// Builds the graph of every component of `managers`.
    pub fn build(
        managers: &[&DependencyManager],
        components: ComponentSelection,
        dependencies: DependencySelection,
    ) -> Self {
        let nodes: Vec<ComponentNode> = managers
            .iter()
            .flat_map(|dm| dm.components())
            .map(|c| ComponentNode {
                declaration: c.declaration(),
                bundle: c.bundle_context().bundle().symbolic_name().to_string(),
            })
            .filter(|node| components.selects(&node.declaration))
            .collect();

        let mut edges = Vec::new();
        for (owner, node) in nodes.iter().enumerate() {
            for declaration in &node.declaration.dependencies {
                if !dependencies.selects(declaration) {
                    continue;
                }
                let providers = providers_of(declaration, &nodes);
                edges.push(DependencyNode {
                    owner,
                    declaration: declaration.clone(),
                    providers,
                });
            }
        }
        log::debug!(
            "Dependency graph built with {} components and {} dependencies.",
            nodes.len(),
            edges.len()
        );
        Self {
            components: nodes,
            dependencies: edges,
        }
    }

    /// Builds the graph of one manager with every component and dependency.
    pub fn of(manager: &DependencyManager) -> Self {
        Self::build(&[manager], ComponentSelection::All, DependencySelection::All)
    }

    /// The components that are not fully started.
    pub fn unregistered_components(&self) -> Vec<&ComponentDeclaration> {
        self.components
            .iter()
            .map(|n| &n.declaration)
            .filter(|d| d.state != ComponentState::TrackingOptional)
            .collect()
    }

    /// The dependencies of the component with `id`.
    pub fn dependencies_of(&self, id: u64) -> Vec<&DependencyDeclaration> {
        self.dependencies
            .iter()
            .filter(|d| self.components[d.owner].declaration.id == id)
            .map(|d| &d.declaration)
            .collect()
    }

    /// The components able to provide `dependency`.
    pub fn providers(&self, dependency: &DependencyNode) -> Vec<&ComponentDeclaration> {
        dependency
            .providers
            .iter()
            .map(|&i| &self.components[i].declaration)
            .collect()
    }

    /// Unavailable dependencies with no provider, optionally of one `kind` only.
    pub fn missing_dependencies(&self, kind: Option<&str>) -> Vec<MissingDependency> {
        self.dependencies
            .iter()
            .filter(|d| !d.declaration.available && d.providers.is_empty())
            .filter(|d| kind.map_or(true, |k| d.declaration.kind == k))
            .map(|d| {
                let owner = &self.components[d.owner];
                MissingDependency {
                    name: d.declaration.name.clone(),
                    kind: d.declaration.kind.clone(),
                    component: owner.declaration.name.clone(),
                    bundle: owner.bundle.clone(),
                }
            })
            .collect()
    }

    /// Loops of components providing each other's dependencies, by component name.
    pub fn circular_dependencies(&self) -> Vec<Vec<String>> {
        let edges = self
            .dependencies
            .iter()
            .flat_map(|d| d.providers.iter().map(move |&p| (d.owner, p)));
        find_cycles(0..self.components.len(), edges)
            .into_iter()
            .map(|cycle| {
                cycle
                    .into_iter()
                    .map(|i| self.components[i].declaration.name.clone())
                    .collect()
            })
            .collect()
    }

    /// Serializes the graph as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns the serializer error, which only happens for non-finite floats.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl ComponentSelection {
    fn selects(self, declaration: &ComponentDeclaration) -> bool {
        match self {
            ComponentSelection::All => true,
            ComponentSelection::Unregistered => {
                declaration.state != ComponentState::TrackingOptional
            }
        }
    }
}

impl DependencySelection {
    fn selects(self, declaration: &DependencyDeclaration) -> bool {
        match self {
            DependencySelection::All => true,
            DependencySelection::Unavailable => !declaration.available,
            DependencySelection::RequiredUnavailable => {
                !declaration.available && declaration.required
            }
        }
    }
}

/// The service name of a service dependency: its name up to the filter.
fn service_name(declaration: &DependencyDeclaration) -> &str {
    let name = declaration.name.as_str();
    name.find('(').map_or(name, |cut| &name[..cut]).trim()
}

fn providers_of(declaration: &DependencyDeclaration, nodes: &[ComponentNode]) -> Vec<usize> {
    if declaration.kind != SERVICE {
        return Vec::new();
    }
    let wanted = service_name(declaration);
    let filter = match declaration.filter.as_deref().map(str::parse::<Filter>) {
        Some(Ok(filter)) => Some(filter),
        Some(Err(e)) => {
            log::warn!("Ignoring unparsable filter of '{}': {}", declaration.name, e);
            None
        }
        None => None,
    };
    nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| {
            let services = &node.declaration.services;
            if !wanted.is_empty() && wanted != "*" && !services.iter().any(|s| s == wanted) {
                return false;
            }
            if services.is_empty() {
                return false;
            }
            filter.as_ref().map_or(true, |f| {
                let published = node
                    .declaration
                    .properties
                    .clone()
                    .with(OBJECT_CLASS, services.clone());
                f.matches(&published)
            })
        })
        .map(|(i, _)| i)
        .collect()
}
