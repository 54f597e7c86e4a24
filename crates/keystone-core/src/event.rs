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

//! Ranked dependency events.
//!
//! An [`Event`] is the realized value of a dependency at a point in time: a
//! bound service with its properties, a configuration dictionary, a bundle or
//! a resource. Events of the same dependency are ordered by ranking so that an
//! [`EventSet`] always exposes a well defined best entry, which is the last one.

use crate::properties::Properties;
use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError};

/// A type-erased, shareable value carried by an event (a service object, a bundle...).
pub type ServiceObject = Arc<dyn Any + Send + Sync>;

type Closer = Box<dyn FnOnce() + Send>;

/// The kind of change a dependency reports to its component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A new value became available.
    Added,
    /// The properties of a known value changed.
    Changed,
    /// A known value went away.
    Removed,
    /// A known value was atomically replaced by a higher-ranked one.
    Swapped,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Added => "ADDED",
            EventType::Changed => "CHANGED",
            EventType::Removed => "REMOVED",
            EventType::Swapped => "SWAPPED",
        };
        f.write_str(name)
    }
}

/// The realized value of a dependency.
///
/// Two events are equal when they originate from the same source (same
/// `id`); they are ordered by ranking, and for equal rankings the lower id
/// is considered the better one, so the best event sorts last.
pub struct Event {
    id: u64,
    ranking: i64,
    label: String,
    value: Option<ServiceObject>,
    properties: Properties,
    closer: Mutex<Option<Closer>>,
    closed: AtomicBool,
}

impl Event {
    /// Creates an event for the source `id`, ranked from the `service.ranking` property.
    pub fn new(id: u64, properties: Properties) -> Self {
        Self {
            id,
            ranking: properties.ranking(),
            label: String::new(),
            value: None,
            properties,
            closer: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Attaches the value carried by this event.
    #[must_use]
    pub fn with_value(mut self, value: ServiceObject) -> Self {
        self.value = Some(value);
        self
    }

    /// Overrides the ranking.
    #[must_use]
    pub fn with_ranking(mut self, ranking: i64) -> Self {
        self.ranking = ranking;
        self
    }

    /// Sets a human readable label (a pid, a bundle name, a URL...).
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Registers the action that releases the underlying handle on [`Event::close`].
    #[must_use]
    pub fn on_close(self, closer: impl FnOnce() + Send + 'static) -> Self {
        *self.closer.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(closer));
        self
    }

    /// The identity of the source of this event.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The ranking used to order events of one dependency.
    pub fn ranking(&self) -> i64 {
        self.ranking
    }

    /// The label given at construction, possibly empty.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The carried value, if any.
    pub fn value(&self) -> Option<&ServiceObject> {
        self.value.as_ref()
    }

    /// The carried value downcast to a concrete type.
    pub fn value_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value.clone().and_then(|v| v.downcast::<T>().ok())
    }

    /// The properties snapshot of this event.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Releases the underlying handle. Subsequent calls do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, AtomicOrdering::AcqRel) {
            return;
        }
        let closer = self
            .closer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(closer) = closer {
            closer();
        }
    }

    /// Returns `true` once [`Event::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::Acquire)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl std::hash::Hash for Event {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.id == other.id {
            return Ordering::Equal;
        }
        self.ranking
            .cmp(&other.ranking)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("ranking", &self.ranking)
            .field("label", &self.label)
            .field("properties", &self.properties)
            .finish()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.is_empty() {
            write!(f, "event#{}", self.id)
        } else {
            write!(f, "{}#{}", self.label, self.id)
        }
    }
}

/// The ordered set of events currently known for one dependency.
///
/// Entries are unique by source id and kept in ascending order, so the
/// best-ranked event is always [`EventSet::best`], the last entry.
#[derive(Debug, Default, Clone)]
pub struct EventSet {
    events: Vec<Arc<Event>>,
}

impl EventSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an event, replacing any entry from the same source.
    ///
    /// Returns the replaced entry.
    pub fn insert(&mut self, event: Arc<Event>) -> Option<Arc<Event>> {
        let replaced = self.remove(&event);
        let position = self
            .events
            .iter()
            .position(|e| e.as_ref() > event.as_ref())
            .unwrap_or(self.events.len());
        self.events.insert(position, event);
        replaced
    }

    /// Removes the entry from the same source as `event`.
    pub fn remove(&mut self, event: &Event) -> Option<Arc<Event>> {
        let index = self.events.iter().position(|e| e.id() == event.id())?;
        Some(self.events.remove(index))
    }

    /// Returns `true` if an entry from the same source is present.
    pub fn contains(&self, event: &Event) -> bool {
        self.events.iter().any(|e| e.id() == event.id())
    }

    /// The highest-ranked entry.
    pub fn best(&self) -> Option<&Arc<Event>> {
        self.events.last()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterates in ascending rank order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Event>> {
        self.events.iter()
    }

    /// Copies the entries out, in ascending rank order.
    pub fn to_vec(&self) -> Vec<Arc<Event>> {
        self.events.clone()
    }

    /// Removes every entry, closing each of them.
    pub fn close_all(&mut self) {
        for event in self.events.drain(..) {
            event.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::SERVICE_RANKING;
    use std::sync::atomic::AtomicUsize;

    fn ranked(id: u64, ranking: i64) -> Arc<Event> {
        Arc::new(Event::new(id, Properties::new().with(SERVICE_RANKING, ranking)))
    }

    #[test]
    fn test_best_is_highest_ranked() {
        let mut set = EventSet::new();
        set.insert(ranked(1, 0));
        set.insert(ranked(2, 10));
        set.insert(ranked(3, 5));

        assert_eq!(set.best().map(|e| e.id()), Some(2));
        let order: Vec<u64> = set.iter().map(|e| e.id()).collect();
        assert_eq!(order, vec![1, 3, 2]);
    }

    #[test]
    fn test_equal_ranking_prefers_lower_id() {
        let mut set = EventSet::new();
        set.insert(ranked(7, 0));
        set.insert(ranked(4, 0));
        assert_eq!(set.best().map(|e| e.id()), Some(4));
    }

    #[test]
    fn test_insert_replaces_same_source() {
        let mut set = EventSet::new();
        set.insert(ranked(1, 0));
        set.insert(ranked(2, 5));
        let replaced = set.insert(ranked(1, 9));

        assert!(replaced.is_some());
        assert_eq!(set.len(), 2);
        assert_eq!(set.best().map(|e| e.ranking()), Some(9));
    }

    #[test]
    fn test_close_runs_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let event = Event::new(1, Properties::new()).on_close(move || {
            c.fetch_add(1, AtomicOrdering::SeqCst);
        });

        event.close();
        event.close();

        assert!(event.is_closed());
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_value_downcast() {
        let event = Event::new(1, Properties::new()).with_value(Arc::new(42u32));
        assert_eq!(event.value_as::<u32>().as_deref(), Some(&42));
        assert!(event.value_as::<String>().is_none());
    }
}
