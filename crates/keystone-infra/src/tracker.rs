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

//! Filter-based tracking of registry services.
//!
//! A [`ServiceTracker`] turns raw registry changes into added / modified /
//! removed / swapped notifications for the services matching its filter.
//! Notifications are serialized through the tracker's own executor, so a
//! customizer never sees two of them at once.
//!
//! Services carrying the `keystone.aspect` property form an aspect chain
//! with the original service they decorate. Only the highest-ranked member
//! of each chain is exposed; when it is replaced by another member, the
//! tracker reports a single swap instead of a removal followed by an addition.

use crate::registry::{ListenerId, ServiceEvent, ServiceListener, ServiceReference, ServiceRegistry};
use keystone_core::executor::{Executor, SerialExecutor};
use keystone_core::properties::ASPECT;
use keystone_core::Filter;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Receives the notifications of a [`ServiceTracker`].
pub trait TrackerCustomizer: Send + Sync {
    /// A matching service became visible.
    fn added(&self, reference: &ServiceReference);
    /// The properties of a visible service changed.
    fn modified(&self, reference: &ServiceReference);
    /// A visible service went away.
    fn removed(&self, reference: &ServiceReference);
    /// A visible service was replaced by another member of its aspect chain.
    fn swapped(&self, old: &ServiceReference, new: &ServiceReference);
}

enum Notification {
    Added(ServiceReference),
    Modified(ServiceReference),
    Removed(ServiceReference),
    Swapped(ServiceReference, ServiceReference),
}

#[derive(Default)]
struct TrackerState {
    open: bool,
    listener: Option<ListenerId>,
    /// Every matching service, keyed by service id.
    tracked: BTreeMap<u64, ServiceReference>,
    /// The exposed member of each aspect chain, keyed by the chain's origin id.
    exposed: HashMap<u64, ServiceReference>,
}

impl TrackerState {
    fn best_of_chain(&self, origin: u64) -> Option<ServiceReference> {
        self.tracked
            .values()
            .filter(|r| origin_of(r) == origin)
            .fold(None, |best: Option<ServiceReference>, r| match best {
                Some(b) if b.outranks(r) => Some(b),
                _ => Some(r.clone()),
            })
    }
}

fn origin_of(reference: &ServiceReference) -> u64 {
    reference
        .properties()
        .get_int(ASPECT)
        .and_then(|id| u64::try_from(id).ok())
        .unwrap_or_else(|| reference.id())
}

/// Tracks the services matching a filter.
pub struct ServiceTracker {
    registry: Arc<ServiceRegistry>,
    filter: Filter,
    customizer: Weak<dyn TrackerCustomizer>,
    executor: SerialExecutor,
    state: Mutex<TrackerState>,
    self_ref: Weak<ServiceTracker>,
}

struct TrackerListener {
    tracker: Weak<ServiceTracker>,
}

impl ServiceListener for TrackerListener {
    fn service_changed(&self, event: &ServiceEvent) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.submit(event.clone());
        }
    }
}

impl ServiceTracker {
    /// Creates a closed tracker; nothing is reported before [`ServiceTracker::open`].
    pub fn new(
        registry: Arc<ServiceRegistry>,
        filter: Filter,
        customizer: Weak<dyn TrackerCustomizer>,
    ) -> Arc<Self> {
        let name = format!("tracker {filter}");
        Arc::new_cyclic(|self_ref| Self {
            registry,
            filter,
            customizer,
            executor: SerialExecutor::new(name),
            state: Mutex::new(TrackerState::default()),
            self_ref: self_ref.clone(),
        })
    }

    /// The filter this tracker matches against.
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Starts listening and reports the currently registered matching services.
    pub fn open(&self) {
        {
            let mut state = self.lock_state();
            if state.open {
                return;
            }
            state.open = true;
            let listener = Arc::new(TrackerListener {
                tracker: self.self_ref.clone(),
            });
            state.listener = Some(self.registry.add_listener(listener));
        }
        let mut initial = self.registry.references(Some(&self.filter));
        // Lowest ranked first, so each chain settles without transient swaps.
        initial.reverse();
        for reference in initial {
            self.submit(ServiceEvent::Registered(reference));
        }
    }

    /// Stops listening and reports every visible service as removed.
    pub fn close(&self) {
        let listener = {
            let mut state = self.lock_state();
            if !state.open {
                return;
            }
            state.open = false;
            state.listener.take()
        };
        if let Some(id) = listener {
            self.registry.remove_listener(id);
        }
        let me = self.self_ref.clone();
        self.executor.execute(Box::new(move || {
            let Some(tracker) = me.upgrade() else {
                return;
            };
            let exposed: Vec<ServiceReference> = {
                let mut state = tracker.lock_state();
                state.tracked.clear();
                state.exposed.drain().map(|(_, r)| r).collect()
            };
            for reference in exposed {
                tracker.notify(Notification::Removed(reference));
            }
        }));
    }

    /// Returns `true` between [`ServiceTracker::open`] and [`ServiceTracker::close`].
    pub fn is_open(&self) -> bool {
        self.lock_state().open
    }

    /// The currently visible services, best ranked first.
    pub fn references(&self) -> Vec<ServiceReference> {
        let mut refs: Vec<ServiceReference> = self.lock_state().exposed.values().cloned().collect();
        refs.sort_by_cached_key(|r| (std::cmp::Reverse(r.ranking()), r.id()));
        refs
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(&self, event: ServiceEvent) {
        let me = self.self_ref.clone();
        self.executor.execute(Box::new(move || {
            if let Some(tracker) = me.upgrade() {
                tracker.process(event);
            }
        }));
    }

    fn process(&self, event: ServiceEvent) {
        let notifications = {
            let mut state = self.lock_state();
            if !state.open {
                return;
            }
            match event {
                ServiceEvent::Registered(reference) => {
                    if !self.filter.matches(&reference.properties()) {
                        return;
                    }
                    if !reference.is_registered() {
                        log::warn!(
                            "Ignoring service {} already unregistered before it could be tracked.",
                            reference.id()
                        );
                        return;
                    }
                    Self::track(&mut state, reference)
                }
                ServiceEvent::Modified(reference) => {
                    let matches = self.filter.matches(&reference.properties());
                    let tracked = state.tracked.contains_key(&reference.id());
                    match (matches, tracked) {
                        (true, true) => Self::modify(&mut state, reference),
                        (true, false) if reference.is_registered() => {
                            Self::track(&mut state, reference)
                        }
                        (false, true) => Self::untrack(&mut state, reference),
                        _ => Vec::new(),
                    }
                }
                ServiceEvent::Unregistering(reference) => {
                    if state.tracked.contains_key(&reference.id()) {
                        Self::untrack(&mut state, reference)
                    } else {
                        Vec::new()
                    }
                }
            }
        };
        for notification in notifications {
            self.notify(notification);
        }
    }

    fn track(state: &mut TrackerState, reference: ServiceReference) -> Vec<Notification> {
        if state.tracked.contains_key(&reference.id()) {
            return Vec::new();
        }
        let origin = origin_of(&reference);
        state.tracked.insert(reference.id(), reference);
        let Some(best) = state.best_of_chain(origin) else {
            return Vec::new();
        };
        match state.exposed.insert(origin, best.clone()) {
            None => vec![Notification::Added(best)],
            Some(previous) if previous != best => vec![Notification::Swapped(previous, best)],
            Some(_) => Vec::new(),
        }
    }

    fn modify(state: &mut TrackerState, reference: ServiceReference) -> Vec<Notification> {
        let origin = origin_of(&reference);
        let Some(best) = state.best_of_chain(origin) else {
            return Vec::new();
        };
        match state.exposed.insert(origin, best.clone()) {
            Some(previous) if previous != best => vec![Notification::Swapped(previous, best)],
            Some(previous) if previous == reference => vec![Notification::Modified(reference)],
            None => vec![Notification::Added(best)],
            Some(_) => Vec::new(),
        }
    }

    fn untrack(state: &mut TrackerState, reference: ServiceReference) -> Vec<Notification> {
        let origin = origin_of(&reference);
        state.tracked.remove(&reference.id());
        let exposed_here = state
            .exposed
            .get(&origin)
            .is_some_and(|exposed| *exposed == reference);
        if !exposed_here {
            return Vec::new();
        }
        match state.best_of_chain(origin) {
            Some(next) => {
                state.exposed.insert(origin, next.clone());
                vec![Notification::Swapped(reference, next)]
            }
            None => {
                state.exposed.remove(&origin);
                vec![Notification::Removed(reference)]
            }
        }
    }

    fn notify(&self, notification: Notification) {
        let Some(customizer) = self.customizer.upgrade() else {
            return;
        };
        match notification {
            Notification::Added(r) => customizer.added(&r),
            Notification::Modified(r) => customizer.modified(&r),
            Notification::Removed(r) => customizer.removed(&r),
            Notification::Swapped(old, new) => customizer.swapped(&old, &new),
        }
    }
}

impl fmt::Debug for ServiceTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceTracker")
            .field("filter", &self.filter.to_string())
            .field("open", &self.is_open())
            .finish()
    }
}
