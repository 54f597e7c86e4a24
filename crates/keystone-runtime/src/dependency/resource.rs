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

//! Dependencies on resources of the resource repository.

use super::DependencyCore;
use crate::callback::Injection;
use crate::context::DependencyContext;
use crate::error::DependencyError;
use keystone_core::{Event, EventType, Filter, FilterError, Properties, ServiceObject};
use keystone_infra::{BundleContext, Resource, ResourceHandler};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Tracks the resources matching a filter, or the one at a given URL.
///
/// Optional by default. Events carry the [`Resource`] as their value and
/// its properties; resources with the same URL share an event id.
pub struct ResourceDependency {
    core: DependencyCore,
    context: Arc<BundleContext>,
    filter_text: Option<String>,
    filter: Option<Filter>,
    handler: Mutex<Option<u64>>,
    self_ref: Weak<ResourceDependency>,
}

fn url_id(url: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    hasher.finish()
}

impl ResourceDependency {
    /// Creates an optional dependency on the resources matching `filter`.
    ///
    /// # Errors
    ///
    /// [`FilterError`] if `filter` does not parse.
    pub fn new(context: Arc<BundleContext>, filter: Option<&str>) -> Result<Arc<Self>, FilterError> {
        let parsed = filter.map(str::parse::<Filter>).transpose()?;
        Ok(Self::assemble(context, filter.map(str::to_string), parsed))
    }

    /// Creates an optional dependency on the resource at `url`.
    pub fn for_url(context: Arc<BundleContext>, url: &str) -> Arc<Self> {
        let filter = Filter::Equal {
            attr: "url".to_string(),
            value: url.to_string(),
        };
        Self::assemble(context, Some(filter.to_string()), Some(filter))
    }

    fn assemble(
        context: Arc<BundleContext>,
        filter_text: Option<String>,
        filter: Option<Filter>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref: &Weak<ResourceDependency>| {
            let me: Weak<dyn DependencyContext> = self_ref.clone();
            Self {
                core: DependencyCore::new(me, false),
                context,
                filter_text,
                filter,
                handler: Mutex::new(None),
                self_ref: self_ref.clone(),
            }
        })
    }

    fn event_for(&self, resource: &Resource) -> Arc<Event> {
        Arc::new(
            Event::new(url_id(resource.url()), resource.properties().clone())
                .with_value(Arc::new(resource.clone()) as ServiceObject)
                .with_label(resource.url()),
        )
    }
}

/// Forwards repository notifications while the dependency is alive.
struct Handler(Weak<ResourceDependency>);

impl ResourceHandler for Handler {
    fn added(&self, resource: &Resource) {
        if let Some(dependency) = self.0.upgrade() {
            dependency
                .core
                .deliver(EventType::Added, vec![dependency.event_for(resource)]);
        }
    }

    fn changed(&self, resource: &Resource) {
        if let Some(dependency) = self.0.upgrade() {
            dependency
                .core
                .deliver(EventType::Changed, vec![dependency.event_for(resource)]);
        }
    }

    fn removed(&self, resource: &Resource) {
        if let Some(dependency) = self.0.upgrade() {
            dependency
                .core
                .deliver(EventType::Removed, vec![dependency.event_for(resource)]);
        }
    }
}

impl DependencyContext for ResourceDependency {
    fn core(&self) -> &DependencyCore {
        &self.core
    }

    fn start(&self) {
        self.core.start_with(|| {
            let handler = Arc::new(Handler(self.self_ref.clone()));
            let id = self
                .context
                .resources()
                .add_handler(self.filter.clone(), handler);
            *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
        });
    }

    fn stop(&self) {
        self.core.stop_with(|| {
            let id = self
                .handler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(id) = id {
                self.context.resources().remove_handler(id);
            }
        });
    }

    fn invoke_callback(&self, kind: EventType, events: &[Arc<Event>]) {
        if let Some(event) = events.first() {
            self.core.invoke_event(kind, event);
        }
    }

    fn create_copy(&self) -> Arc<dyn DependencyContext> {
        Arc::new_cyclic(|self_ref: &Weak<ResourceDependency>| {
            let me: Weak<dyn DependencyContext> = self_ref.clone();
            Self {
                core: DependencyCore::copied(me, &self.core),
                context: Arc::clone(&self.context),
                filter_text: self.filter_text.clone(),
                filter: self.filter.clone(),
                handler: Mutex::new(None),
                self_ref: self_ref.clone(),
            }
        })
    }

    fn kind(&self) -> &'static str {
        "resource"
    }

    fn name(&self) -> String {
        self.filter_text.clone().unwrap_or_else(|| "*".to_string())
    }

    fn filter(&self) -> Option<String> {
        self.filter_text.clone()
    }

    fn properties(&self) -> Result<Properties, DependencyError> {
        self.core
            .current_event()
            .map(|event| event.properties().clone())
            .ok_or_else(|| DependencyError::NoEvent(self.name()))
    }

    fn default_injection(&self, null_object: bool) -> Option<Injection> {
        self.core.auto_config_name()?;
        null_object.then_some(Injection::Null)
    }
}

impl fmt::Debug for ResourceDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDependency")
            .field("name", &self.name())
            .field("required", &self.core.is_required())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_infra::Framework;

    #[test]
    fn test_url_dependency_filters_on_url() {
        let framework = Framework::new();
        let dependency =
            ResourceDependency::for_url(framework.bundle_context("test"), "file:///a.txt");
        let a = Resource::new("file:///a.txt", Properties::new());
        let b = Resource::new("file:///b.txt", Properties::new());
        let filter = dependency.filter.as_ref().unwrap();
        assert!(filter.matches(a.properties()));
        assert!(!filter.matches(b.properties()));
    }

    #[test]
    fn test_same_url_same_event_id() {
        let framework = Framework::new();
        let dependency = ResourceDependency::new(framework.bundle_context("test"), None).unwrap();
        let first = dependency.event_for(&Resource::new("file:///a", Properties::new()));
        let second = dependency.event_for(
            &Resource::new("file:///a", Properties::new().with("version", 2)),
        );
        assert_eq!(first.id(), second.id());
    }
}
