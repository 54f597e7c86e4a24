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

//! Bundles: the deployment units components belong to.
//!
//! A [`BundleRegistry`] holds every installed [`Bundle`] and broadcasts state
//! changes to [`BundleListener`]s. A [`BundleTracker`] narrows that stream
//! to the bundles whose state is in a mask and whose headers match a filter.

use keystone_core::executor::{Executor, SerialExecutor};
use keystone_core::{Filter, Properties};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

/// Bundle lifecycle states, usable as a bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BundleState(u32);

impl BundleState {
    /// Gone for good.
    pub const UNINSTALLED: BundleState = BundleState(0x01);
    /// Installed but not resolved.
    pub const INSTALLED: BundleState = BundleState(0x02);
    /// Resolved and ready to start.
    pub const RESOLVED: BundleState = BundleState(0x04);
    /// Being started.
    pub const STARTING: BundleState = BundleState(0x08);
    /// Being stopped.
    pub const STOPPING: BundleState = BundleState(0x10);
    /// Running.
    pub const ACTIVE: BundleState = BundleState(0x20);

    /// Every state.
    pub const ANY: BundleState = BundleState(0x3f);

    /// The raw bits.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if `self` and `mask` share a bit.
    pub fn intersects(self, mask: BundleState) -> bool {
        self.0 & mask.0 != 0
    }
}

impl std::ops::BitOr for BundleState {
    type Output = BundleState;

    fn bitor(self, rhs: Self) -> Self::Output {
        BundleState(self.0 | rhs.0)
    }
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            BundleState::UNINSTALLED => "UNINSTALLED",
            BundleState::INSTALLED => "INSTALLED",
            BundleState::RESOLVED => "RESOLVED",
            BundleState::STARTING => "STARTING",
            BundleState::STOPPING => "STOPPING",
            BundleState::ACTIVE => "ACTIVE",
            _ => return write!(f, "{:#x}", self.0),
        };
        f.write_str(name)
    }
}

/// An installed bundle.
pub struct Bundle {
    id: u64,
    symbolic_name: String,
    headers: Properties,
    state: AtomicU32,
}

impl Bundle {
    /// The registry-assigned id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The symbolic name.
    pub fn symbolic_name(&self) -> &str {
        &self.symbolic_name
    }

    /// The manifest headers, matched by bundle filters.
    pub fn headers(&self) -> &Properties {
        &self.headers
    }

    /// The current state.
    pub fn state(&self) -> BundleState {
        BundleState(self.state.load(Ordering::Acquire))
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("id", &self.id)
            .field("symbolic_name", &self.symbolic_name)
            .field("state", &self.state().to_string())
            .finish()
    }
}

/// A bundle state change.
#[derive(Debug, Clone)]
pub struct BundleEvent {
    /// The bundle that changed.
    pub bundle: Arc<Bundle>,
    /// The state it left.
    pub previous: BundleState,
}

/// Receives every bundle state change.
pub trait BundleListener: Send + Sync {
    /// Called synchronously on the thread that changed the state.
    fn bundle_changed(&self, event: &BundleEvent);
}

/// All installed bundles.
pub struct BundleRegistry {
    next_id: AtomicU64,
    next_listener: AtomicU64,
    bundles: RwLock<BTreeMap<u64, Arc<Bundle>>>,
    listeners: Mutex<Vec<(u64, Arc<dyn BundleListener>)>>,
}

impl BundleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            next_listener: AtomicU64::new(1),
            bundles: RwLock::new(BTreeMap::new()),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Installs a bundle in the `INSTALLED` state.
    pub fn install(&self, symbolic_name: &str, headers: Properties) -> Arc<Bundle> {
        let bundle = Arc::new(Bundle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            symbolic_name: symbolic_name.to_string(),
            headers: headers.with("Bundle-SymbolicName", symbolic_name),
            state: AtomicU32::new(BundleState::INSTALLED.bits()),
        });
        self.bundles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(bundle.id, Arc::clone(&bundle));
        log::debug!("Installed bundle {:?}.", bundle);
        self.fire(&BundleEvent {
            bundle: Arc::clone(&bundle),
            previous: BundleState::UNINSTALLED,
        });
        bundle
    }

    /// Moves a bundle to `state` and notifies listeners.
    pub fn set_state(&self, bundle: &Arc<Bundle>, state: BundleState) {
        let previous = BundleState(bundle.state.swap(state.bits(), Ordering::AcqRel));
        if previous == state {
            return;
        }
        if state == BundleState::UNINSTALLED {
            self.bundles
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&bundle.id);
        }
        log::debug!(
            "Bundle '{}' {} -> {}.",
            bundle.symbolic_name,
            previous,
            state
        );
        self.fire(&BundleEvent {
            bundle: Arc::clone(bundle),
            previous,
        });
    }

    /// Looks a bundle up by id.
    pub fn bundle(&self, id: u64) -> Option<Arc<Bundle>> {
        self.bundles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Every installed bundle, by id.
    pub fn bundles(&self) -> Vec<Arc<Bundle>> {
        self.bundles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Adds a listener; returns its id.
    pub fn add_listener(&self, listener: Arc<dyn BundleListener>) -> u64 {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Removes a listener.
    pub fn remove_listener(&self, id: u64) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(l, _)| *l != id);
    }

    fn fire(&self, event: &BundleEvent) {
        let listeners: Vec<Arc<dyn BundleListener>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener.bundle_changed(event);
        }
    }
}

impl fmt::Debug for BundleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleRegistry")
            .field("bundles", &self.bundles().len())
            .finish()
    }
}

/// Receives the notifications of a [`BundleTracker`].
pub trait BundleCustomizer: Send + Sync {
    /// A bundle entered the tracked set.
    fn added(&self, bundle: &Arc<Bundle>);
    /// A tracked bundle changed state but stays tracked.
    fn modified(&self, bundle: &Arc<Bundle>);
    /// A bundle left the tracked set.
    fn removed(&self, bundle: &Arc<Bundle>);
}

/// Tracks the bundles whose state is in a mask and whose headers match a filter.
pub struct BundleTracker {
    registry: Arc<BundleRegistry>,
    mask: BundleState,
    filter: Option<Filter>,
    customizer: Weak<dyn BundleCustomizer>,
    executor: SerialExecutor,
    state: Mutex<(Option<u64>, BTreeMap<u64, Arc<Bundle>>)>,
    self_ref: Weak<BundleTracker>,
}

struct BundleTrackerListener {
    tracker: Weak<BundleTracker>,
}

impl BundleListener for BundleTrackerListener {
    fn bundle_changed(&self, event: &BundleEvent) {
        if let Some(tracker) = self.tracker.upgrade() {
            tracker.submit(Arc::clone(&event.bundle));
        }
    }
}

impl BundleTracker {
    /// Creates a closed tracker.
    pub fn new(
        registry: Arc<BundleRegistry>,
        mask: BundleState,
        filter: Option<Filter>,
        customizer: Weak<dyn BundleCustomizer>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            registry,
            mask,
            filter,
            customizer,
            executor: SerialExecutor::new("bundle tracker"),
            state: Mutex::new((None, BTreeMap::new())),
            self_ref: self_ref.clone(),
        })
    }

    /// Starts listening and reports the bundles already in range.
    pub fn open(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.0.is_some() {
                return;
            }
            let listener = Arc::new(BundleTrackerListener {
                tracker: self.self_ref.clone(),
            });
            state.0 = Some(self.registry.add_listener(listener));
        }
        for bundle in self.registry.bundles() {
            self.submit(bundle);
        }
    }

    /// Stops listening and reports every tracked bundle as removed.
    pub fn close(&self) {
        let (listener, tracked) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            (state.0.take(), std::mem::take(&mut state.1))
        };
        if let Some(id) = listener {
            self.registry.remove_listener(id);
        }
        if let Some(customizer) = self.customizer.upgrade() {
            for bundle in tracked.values() {
                customizer.removed(bundle);
            }
        }
    }

    fn submit(&self, bundle: Arc<Bundle>) {
        let me = self.self_ref.clone();
        self.executor.execute(Box::new(move || {
            if let Some(tracker) = me.upgrade() {
                tracker.process(bundle);
            }
        }));
    }

    fn process(&self, bundle: Arc<Bundle>) {
        let in_range = bundle.state().intersects(self.mask)
            && self
                .filter
                .as_ref()
                .map_or(true, |f| f.matches(bundle.headers()));
        let was_tracked = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.0.is_none() {
                return;
            }
            if in_range {
                state.1.insert(bundle.id(), Arc::clone(&bundle)).is_some()
            } else {
                state.1.remove(&bundle.id()).is_some()
            }
        };
        let Some(customizer) = self.customizer.upgrade() else {
            return;
        };
        match (in_range, was_tracked) {
            (true, false) => customizer.added(&bundle),
            (true, true) => customizer.modified(&bundle),
            (false, true) => customizer.removed(&bundle),
            (false, false) => {}
        }
    }
}
