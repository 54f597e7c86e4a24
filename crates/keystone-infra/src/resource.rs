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

//! A repository of addressable resources.
//!
//! Resources are identified by a URL of the form
//! `protocol://host[:port]/path`. The URL parts are exposed as the
//! properties `url`, `protocol`, `host`, `port` and `path`, next to any
//! properties the resource carries, so handlers can select resources with a
//! [`Filter`].

use keystone_core::{Filter, Properties};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// An addressable resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    url: String,
    properties: Properties,
}

impl Resource {
    /// Creates a resource; the URL parts are added to `properties`.
    pub fn new(url: impl Into<String>, properties: Properties) -> Self {
        let url = url.into();
        let mut all = properties;
        all.insert("url", url.as_str());
        let (protocol, rest) = url.split_once("://").unwrap_or(("", url.as_str()));
        let (authority, path) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<i64>().ok()),
            None => (authority, None),
        };
        if !protocol.is_empty() {
            all.insert("protocol", protocol);
        }
        if !host.is_empty() {
            all.insert("host", host);
        }
        if let Some(port) = port {
            all.insert("port", port);
        }
        if !path.is_empty() {
            all.insert("path", path);
        }
        Self {
            url,
            properties: all,
        }
    }

    /// The URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The resource properties, URL parts included.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Receives resource changes.
pub trait ResourceHandler: Send + Sync {
    /// A matching resource appeared.
    fn added(&self, resource: &Resource);
    /// A matching resource changed its properties.
    fn changed(&self, resource: &Resource);
    /// A matching resource went away.
    fn removed(&self, resource: &Resource);
}

struct HandlerEntry {
    id: u64,
    filter: Option<Filter>,
    handler: Arc<dyn ResourceHandler>,
}

impl HandlerEntry {
    fn accepts(&self, resource: &Resource) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |f| f.matches(resource.properties()))
    }
}

#[derive(Default)]
struct RepositoryState {
    resources: BTreeMap<String, Resource>,
    handlers: Vec<Arc<HandlerEntry>>,
}

/// Holds resources and dispatches their changes to handlers.
#[derive(Default)]
pub struct ResourceRepository {
    next_id: AtomicU64,
    state: Mutex<RepositoryState>,
}

impl ResourceRepository {
    /// Creates an empty repository.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn handlers_for(&self, resource: &Resource) -> Vec<Arc<HandlerEntry>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .iter()
            .filter(|h| h.accepts(resource))
            .cloned()
            .collect()
    }

    /// Adds a resource, or changes it if the URL is already known.
    pub fn add(&self, resource: Resource) {
        let previous = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resources
            .insert(resource.url.clone(), resource.clone());
        log::debug!("Resource '{}' added.", resource);
        let handlers: Vec<Arc<HandlerEntry>> = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .clone();
        for entry in handlers {
            let was = previous.as_ref().filter(|p| entry.accepts(p));
            match (was, entry.accepts(&resource)) {
                (None, true) => entry.handler.added(&resource),
                (Some(_), true) => entry.handler.changed(&resource),
                (Some(old), false) => entry.handler.removed(old),
                (None, false) => {}
            }
        }
    }

    /// Removes the resource at `url`; returns `false` if it was unknown.
    pub fn remove(&self, url: &str) -> bool {
        let removed = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resources
            .remove(url);
        let Some(resource) = removed else {
            return false;
        };
        log::debug!("Resource '{}' removed.", resource);
        for entry in self.handlers_for(&resource) {
            entry.handler.removed(&resource);
        }
        true
    }

    /// Every known resource.
    pub fn resources(&self) -> Vec<Resource> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resources
            .values()
            .cloned()
            .collect()
    }

    /// Adds a handler and reports the matching resources it missed.
    pub fn add_handler(&self, filter: Option<Filter>, handler: Arc<dyn ResourceHandler>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(HandlerEntry {
            id,
            filter,
            handler,
        });
        let existing: Vec<Resource> = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.handlers.push(Arc::clone(&entry));
            state
                .resources
                .values()
                .filter(|r| entry.accepts(r))
                .cloned()
                .collect()
        };
        for resource in &existing {
            entry.handler.added(resource);
        }
        id
    }

    /// Removes a handler.
    pub fn remove_handler(&self, id: u64) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .retain(|h| h.id != id);
    }
}

impl fmt::Debug for ResourceRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ResourceRepository")
            .field("resources", &state.resources.len())
            .field("handlers", &state.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ResourceHandler for Recorder {
        fn added(&self, resource: &Resource) {
            self.0.lock().unwrap().push(format!("added:{resource}"));
        }
        fn changed(&self, resource: &Resource) {
            self.0.lock().unwrap().push(format!("changed:{resource}"));
        }
        fn removed(&self, resource: &Resource) {
            self.0.lock().unwrap().push(format!("removed:{resource}"));
        }
    }

    #[test]
    fn test_url_parts_become_properties() {
        let resource = Resource::new("file://localhost:8080/data/a.txt", Properties::new());
        let props = resource.properties();
        assert_eq!(props.get_str("protocol"), Some("file"));
        assert_eq!(props.get_str("host"), Some("localhost"));
        assert_eq!(props.get_int("port"), Some(8080));
        assert_eq!(props.get_str("path"), Some("/data/a.txt"));
    }

    #[test]
    fn test_handler_sees_existing_and_new_matching_resources() {
        let repository = ResourceRepository::new();
        repository.add(Resource::new("file://host/a.txt", Properties::new()));
        repository.add(Resource::new("http://host/b.txt", Properties::new()));

        let recorder = Arc::new(Recorder::default());
        let id = repository.add_handler(
            Some("(protocol=file)".parse().unwrap()),
            recorder.clone(),
        );
        repository.add(Resource::new("file://host/c.txt", Properties::new()));
        repository.add(Resource::new("file://host/a.txt", Properties::new().with("v", 2)));
        repository.remove("file://host/c.txt");
        repository.remove_handler(id);
        repository.remove("file://host/a.txt");

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                "added:file://host/a.txt",
                "added:file://host/c.txt",
                "changed:file://host/a.txt",
                "removed:file://host/c.txt",
            ]
        );
    }
}
