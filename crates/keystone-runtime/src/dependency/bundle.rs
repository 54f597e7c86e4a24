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

//! Dependencies on bundles in a given state.

use super::DependencyCore;
use crate::callback::Injection;
use crate::context::DependencyContext;
use crate::error::DependencyError;
use keystone_core::{Event, EventType, Filter, FilterError, Properties};
use keystone_infra::{Bundle, BundleContext, BundleCustomizer, BundleState, BundleTracker};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Tracks the bundles whose state is in a mask and whose headers match a filter.
///
/// Optional by default. Events carry the [`Bundle`] as their value, its
/// headers as properties, and its id as their id.
pub struct BundleDependency {
    core: DependencyCore,
    self_ref: Weak<BundleDependency>,
    context: Arc<BundleContext>,
    mask: BundleState,
    filter_text: Option<String>,
    filter: Option<Filter>,
    bundle_id: Option<u64>,
    tracker: Mutex<Option<Arc<BundleTracker>>>,
}

impl BundleDependency {
    /// Creates an optional dependency on the bundles in `mask` matching `filter`.
    ///
    /// # Errors
    ///
    /// [`FilterError`] if `filter` does not parse.
    pub fn new(
        context: Arc<BundleContext>,
        mask: BundleState,
        filter: Option<&str>,
    ) -> Result<Arc<Self>, FilterError> {
        let parsed = filter.map(str::parse::<Filter>).transpose()?;
        Ok(Self::assemble(context, mask, filter, parsed, None))
    }

    /// Creates an optional dependency on the single bundle `bundle_id`.
    pub fn for_bundle(context: Arc<BundleContext>, mask: BundleState, bundle_id: u64) -> Arc<Self> {
        Self::assemble(context, mask, None, None, Some(bundle_id))
    }

    fn assemble(
        context: Arc<BundleContext>,
        mask: BundleState,
        filter_text: Option<&str>,
        filter: Option<Filter>,
        bundle_id: Option<u64>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref: &Weak<BundleDependency>| {
            let me: Weak<dyn DependencyContext> = self_ref.clone();
            Self {
                core: DependencyCore::new(me, false),
                self_ref: self_ref.clone(),
                context,
                mask,
                filter_text: filter_text.map(str::to_string),
                filter,
                bundle_id,
                tracker: Mutex::new(None),
            }
        })
    }

    /// The tracked state mask.
    pub fn mask(&self) -> BundleState {
        self.mask
    }

    /// The single tracked bundle, if restricted to one.
    pub fn bundle_id(&self) -> Option<u64> {
        self.bundle_id
    }

    fn concerns(&self, bundle: &Bundle) -> bool {
        self.bundle_id.map_or(true, |id| id == bundle.id())
    }

    fn event_for(&self, bundle: &Arc<Bundle>) -> Arc<Event> {
        Arc::new(
            Event::new(bundle.id(), bundle.headers().clone())
                .with_value(Arc::clone(bundle) as keystone_core::ServiceObject)
                .with_label(bundle.symbolic_name()),
        )
    }

    fn report(&self, kind: EventType, bundle: &Arc<Bundle>) {
        if self.concerns(bundle) {
            self.core.deliver(kind, vec![self.event_for(bundle)]);
        }
    }
}

impl BundleCustomizer for BundleDependency {
    fn added(&self, bundle: &Arc<Bundle>) {
        self.report(EventType::Added, bundle);
    }

    fn modified(&self, bundle: &Arc<Bundle>) {
        self.report(EventType::Changed, bundle);
    }

    fn removed(&self, bundle: &Arc<Bundle>) {
        self.report(EventType::Removed, bundle);
    }
}

impl DependencyContext for BundleDependency {
    fn core(&self) -> &DependencyCore {
        &self.core
    }

    fn start(&self) {
        self.core.start_with(|| {
            let customizer: Weak<dyn BundleCustomizer> = self.self_ref.clone();
            let tracker = BundleTracker::new(
                Arc::clone(self.context.bundles()),
                self.mask,
                self.filter.clone(),
                customizer,
            );
            *self.tracker.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(Arc::clone(&tracker));
            tracker.open();
        });
    }

    fn stop(&self) {
        self.core.stop_with(|| {
            let tracker = self
                .tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(tracker) = tracker {
                tracker.close();
            }
        });
    }

    fn invoke_callback(&self, kind: EventType, events: &[Arc<Event>]) {
        if let Some(event) = events.first() {
            self.core.invoke_event(kind, event);
        }
    }

    fn create_copy(&self) -> Arc<dyn DependencyContext> {
        Arc::new_cyclic(|self_ref: &Weak<BundleDependency>| {
            let me: Weak<dyn DependencyContext> = self_ref.clone();
            Self {
                core: DependencyCore::copied(me, &self.core),
                self_ref: self_ref.clone(),
                context: Arc::clone(&self.context),
                mask: self.mask,
                filter_text: self.filter_text.clone(),
                filter: self.filter.clone(),
                bundle_id: self.bundle_id,
                tracker: Mutex::new(None),
            }
        })
    }

    fn kind(&self) -> &'static str {
        "bundle"
    }

    fn name(&self) -> String {
        let mut name = String::new();
        if let Some(id) = self.bundle_id {
            name.push_str(&format!("{{bundle.id={id}}} "));
        }
        if let Some(filter) = &self.filter_text {
            name.push_str(filter);
            name.push(' ');
        }
        name.push_str(&self.mask.to_string());
        name
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

impl fmt::Debug for BundleDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleDependency")
            .field("name", &self.name())
            .field("required", &self.core.is_required())
            .field("available", &self.core.is_available())
            .finish()
    }
}
