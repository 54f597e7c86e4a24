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

use anyhow::Result;
use keystone_core::properties::{ASPECT, SERVICE_RANKING};
use keystone_core::{Filter, Properties};
use keystone_infra::{Framework, ServiceReference, TrackerCustomizer};
use std::sync::{Arc, Mutex};

fn setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// --- Test Setup: a customizer that records what it is told ---
#[derive(Default)]
struct Journal(Mutex<Vec<String>>);

impl Journal {
    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl TrackerCustomizer for Journal {
    fn added(&self, reference: &ServiceReference) {
        self.0.lock().unwrap().push(format!("added:{}", reference.id()));
    }
    fn modified(&self, reference: &ServiceReference) {
        self.0.lock().unwrap().push(format!("modified:{}", reference.id()));
    }
    fn removed(&self, reference: &ServiceReference) {
        self.0.lock().unwrap().push(format!("removed:{}", reference.id()));
    }
    fn swapped(&self, old: &ServiceReference, new: &ServiceReference) {
        self.0
            .lock()
            .unwrap()
            .push(format!("swapped:{}->{}", old.id(), new.id()));
    }
}
// ---

#[test]
fn test_tracker_reports_initial_and_later_services() -> Result<()> {
    // --- 1. ARRANGE ---
    setup();
    let framework = Framework::new();
    let context = framework.bundle_context("test");
    let first = context.register_service(&["Store"], Arc::new(()), Properties::new());
    let journal: Arc<Journal> = Arc::new(Journal::default());
    let customizer: Arc<dyn TrackerCustomizer> = journal.clone();
    let tracker = context.create_tracker(Filter::object_class("Store"), Arc::downgrade(&customizer));

    // --- 2. ACT ---
    tracker.open();
    let second = context.register_service(&["Store"], Arc::new(()), Properties::new());
    second.set_properties(Properties::new().with("colour", "red"))?;
    first.unregister()?;
    tracker.close();

    // --- 3. ASSERT ---
    let (a, b) = (first.reference().id(), second.reference().id());
    assert_eq!(
        journal.entries(),
        vec![
            format!("added:{a}"),
            format!("added:{b}"),
            format!("modified:{b}"),
            format!("removed:{a}"),
            format!("removed:{b}"),
        ]
    );
    Ok(())
}

#[test]
fn test_aspect_replaces_original_with_a_swap() -> Result<()> {
    // --- 1. ARRANGE ---
    setup();
    let framework = Framework::new();
    let context = framework.bundle_context("test");
    let original = context.register_service(&["Store"], Arc::new(()), Properties::new());
    let origin = original.reference().id();
    let journal: Arc<Journal> = Arc::new(Journal::default());
    let customizer: Arc<dyn TrackerCustomizer> = journal.clone();
    let tracker = context.create_tracker(Filter::object_class("Store"), Arc::downgrade(&customizer));
    tracker.open();

    // --- 2. ACT ---
    let aspect = context.register_service(
        &["Store"],
        Arc::new(()),
        Properties::new()
            .with(SERVICE_RANKING, 10)
            .with(ASPECT, origin),
    );
    let visible = tracker.references();
    aspect.unregister()?;

    // --- 3. ASSERT ---
    let aspect_id = aspect.reference().id();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id(), aspect_id);
    assert_eq!(
        journal.entries(),
        vec![
            format!("added:{origin}"),
            format!("swapped:{origin}->{aspect_id}"),
            format!("swapped:{aspect_id}->{origin}"),
        ]
    );
    Ok(())
}

#[test]
fn test_modification_out_of_filter_removes() -> Result<()> {
    // --- 1. ARRANGE ---
    setup();
    let framework = Framework::new();
    let context = framework.bundle_context("test");
    let registration = context.register_service(
        &["Store"],
        Arc::new(()),
        Properties::new().with("tier", "gold"),
    );
    let journal: Arc<Journal> = Arc::new(Journal::default());
    let customizer: Arc<dyn TrackerCustomizer> = journal.clone();
    let tracker = context.create_tracker(
        "(&(objectClass=Store)(tier=gold))".parse()?,
        Arc::downgrade(&customizer),
    );
    tracker.open();

    // --- 2. ACT ---
    registration.set_properties(Properties::new().with("tier", "silver"))?;
    registration.set_properties(Properties::new().with("tier", "gold"))?;

    // --- 3. ASSERT ---
    let id = registration.reference().id();
    assert_eq!(
        journal.entries(),
        vec![format!("added:{id}"), format!("removed:{id}"), format!("added:{id}")]
    );
    Ok(())
}

#[test]
fn test_references_order_by_ranking_then_id() -> Result<()> {
    // --- 1. ARRANGE ---
    setup();
    let framework = Framework::new();
    let context = framework.bundle_context("test");
    let registrations: Vec<_> = (0..40)
        .map(|i| {
            context.register_service(
                &["Store"],
                Arc::new(()),
                Properties::new().with(SERVICE_RANKING, i % 3),
            )
        })
        .collect();
    let journal: Arc<Journal> = Arc::new(Journal::default());
    let customizer: Arc<dyn TrackerCustomizer> = journal.clone();
    let tracker = context.create_tracker(Filter::object_class("Store"), Arc::downgrade(&customizer));

    // --- 2. ACT ---
    tracker.open();
    let ordered: Vec<u64> = tracker.references().iter().map(|r| r.id()).collect();

    // --- 3. ASSERT ---
    let mut expected: Vec<(i64, u64)> = registrations
        .iter()
        .map(|r| (r.reference().ranking(), r.reference().id()))
        .collect();
    expected.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    assert_eq!(ordered, expected.into_iter().map(|(_, id)| id).collect::<Vec<_>>());
    assert_eq!(journal.entries().len(), 40);
    Ok(())
}
