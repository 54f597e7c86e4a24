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

//! Adapters: one component per matching service, publishing another interface.

use super::{new_source_dependency, origin_filter, Binding, DecoratorKind, Source};
use crate::callback::DecoratorRole;
use crate::context::DependencyContext;
use crate::dependency::ServiceDependency;
use keystone_core::properties::ASPECT;
use keystone_core::{FilterError, Properties};
use keystone_infra::{BundleContext, SERVICE_BUNDLE_ID};
use std::sync::Arc;

pub(crate) struct AdapterKind {
    adaptee: String,
    filter: Option<String>,
    binding: Binding,
    propagate: bool,
    source: Arc<ServiceDependency>,
}

impl AdapterKind {
    pub(crate) fn new(
        context: Arc<BundleContext>,
        adaptee: &str,
        filter: Option<&str>,
        binding: Binding,
        propagate: bool,
    ) -> Result<Self, FilterError> {
        let source = new_source_dependency(context, adaptee, filter)?;
        Ok(Self {
            adaptee: adaptee.to_string(),
            filter: filter.map(str::to_string),
            binding,
            propagate,
            source,
        })
    }
}

impl DecoratorKind for AdapterKind {
    fn role(&self) -> DecoratorRole {
        DecoratorRole::Adapter
    }

    fn describe(&self) -> String {
        match &self.filter {
            Some(filter) => format!("Adapter for {} {}", self.adaptee, filter),
            None => format!("Adapter for {}", self.adaptee),
        }
    }

    fn source_dependency(&self) -> Option<Arc<dyn DependencyContext>> {
        Some(self.source.clone() as Arc<dyn DependencyContext>)
    }

    /// The adaptee's public properties when propagating, overridden by the adapter's own.
    fn child_properties(&self, own: &Properties, source: &Source) -> Properties {
        if !self.propagate {
            return own.clone();
        }
        let mut properties = source.properties.without_framework_keys().public();
        properties.remove(ASPECT);
        properties.remove(SERVICE_BUNDLE_ID);
        properties.merged(own)
    }

    fn child_dependency(
        &self,
        context: &Arc<BundleContext>,
        source: &Source,
    ) -> anyhow::Result<Option<Arc<dyn DependencyContext>>> {
        let Some(origin) = source.origin else {
            return Ok(None);
        };
        let dependency = ServiceDependency::new(
            Arc::clone(context),
            Some(&self.adaptee),
            Some(&origin_filter(origin)),
        )?;
        self.binding.apply(&dependency)?;
        Ok(Some(dependency as Arc<dyn DependencyContext>))
    }
}
