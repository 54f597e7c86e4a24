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

mod common;

use anyhow::Result;
use common::{probe_factory, setup, Counter, Ensure, Probe, States};
use keystone_core::ComponentState::{
    Inactive, InstantiatedAndWaitingForRequired, TrackingOptional, WaitingForRequired,
};
use keystone_core::Properties;
use keystone_runtime::{
    Component, ComponentError, Dependency, DependencyContext, LifecycleCallbacks,
};
use std::sync::Arc;

#[test]
fn test_component_without_dependencies_runs_full_lifecycle() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, _context, dm) = setup();
    let ensure = Ensure::new();
    let states = States::new();
    let component = dm.create_component();
    component.set_implementation(Probe::new("c", &ensure))?;
    component.add_state_listener(states.clone());

    // --- 2. ACT ---
    dm.add(component.clone());
    let running = component.state();
    dm.remove(component.as_ref());

    // --- 3. ASSERT ---
    assert_eq!(running, TrackingOptional);
    assert_eq!(ensure.steps(), vec!["c.init", "c.start", "c.stop", "c.destroy"]);
    assert_eq!(
        states.get(),
        vec![
            WaitingForRequired,
            InstantiatedAndWaitingForRequired,
            TrackingOptional,
            InstantiatedAndWaitingForRequired,
            WaitingForRequired,
            Inactive,
        ]
    );
    Ok(())
}

#[test]
fn test_required_dependency_round_trip_recreates_instance() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let (ensure, counter) = (Ensure::new(), Arc::new(Counter::default()));
    let component = dm.create_component();
    component.set_factory(probe_factory("c", &ensure, &counter))?;
    let store = dm.create_service_dependency(Some("Store"), None)?;
    store
        .set_required(true)
        .set_callbacks(Some("bind"), None, Some("unbind"))?;
    component.add(store);
    dm.add(component.clone());
    assert_eq!(component.state(), WaitingForRequired);

    // --- 2. ACT ---
    let first = context.register_service(&["Store"], Arc::new(()), Properties::new());
    let satisfied = component.state();
    first.unregister()?;
    let lost = component.state();
    let second = context.register_service(&["Store"], Arc::new(()), Properties::new());

    // --- 3. ASSERT ---
    let (a, b) = (first.reference().id(), second.reference().id());
    assert_eq!(satisfied, TrackingOptional);
    assert_eq!(lost, WaitingForRequired);
    assert_eq!(component.state(), TrackingOptional);
    assert_eq!(counter.get(), 2);
    assert_eq!(
        ensure.steps(),
        vec![
            format!("c1.bind:{a}"),
            "c1.init".to_string(),
            "c1.start".to_string(),
            "c1.stop".to_string(),
            "c1.destroy".to_string(),
            format!("c1.unbind:{a}"),
            format!("c2.bind:{b}"),
            "c2.init".to_string(),
            "c2.start".to_string(),
        ]
    );
    Ok(())
}

#[test]
fn test_instance_bound_dependency_keeps_instance() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let (ensure, counter) = (Ensure::new(), Arc::new(Counter::default()));
    let component = dm.create_component();
    component.set_factory(probe_factory("c", &ensure, &counter))?;
    dm.add(component.clone());
    let store = dm.create_service_dependency(Some("Store"), None)?;
    store
        .set_required(true)
        .set_callbacks(Some("bind"), None, Some("unbind"))?;

    // --- 2. ACT ---
    component.add(store.clone());
    let waiting = component.state();
    let registration = context.register_service(&["Store"], Arc::new(()), Properties::new());
    let satisfied = component.state();
    registration.unregister()?;

    // --- 3. ASSERT ---
    let id = registration.reference().id();
    assert!(store.is_instance_bound());
    assert_eq!(waiting, InstantiatedAndWaitingForRequired);
    assert_eq!(satisfied, TrackingOptional);
    assert_eq!(component.state(), InstantiatedAndWaitingForRequired);
    assert_eq!(counter.get(), 1);
    assert_eq!(
        ensure.steps(),
        vec![
            "c1.init".to_string(),
            "c1.start".to_string(),
            "c1.stop".to_string(),
            format!("c1.bind:{id}"),
            "c1.start".to_string(),
            "c1.stop".to_string(),
            format!("c1.unbind:{id}"),
        ]
    );
    Ok(())
}

#[test]
fn test_start_and_stop_are_idempotent() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, _context, dm) = setup();
    let ensure = Ensure::new();
    let component = dm.create_component();
    component.set_implementation(Probe::new("c", &ensure))?;

    // --- 2. ACT ---
    component.start();
    component.start();
    component.stop();
    component.stop();

    // --- 3. ASSERT ---
    assert_eq!(ensure.steps(), vec!["c.init", "c.start", "c.stop", "c.destroy"]);
    assert_eq!(component.state(), Inactive);
    Ok(())
}

#[test]
fn test_never_tracking_without_required_events() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let ensure = Ensure::new();
    let component = dm.create_component();
    component.set_implementation(Probe::new("c", &ensure))?;
    let required: Vec<_> = ["A", "B"]
        .into_iter()
        .map(|name| {
            let dependency = dm.create_service_dependency(Some(name), None)?;
            dependency.set_required(true);
            Ok(dependency)
        })
        .collect::<Result<_>>()?;
    for dependency in &required {
        component.add(dependency.clone());
    }
    let states = States::new();
    component.add_state_listener(states.clone());
    dm.add(component.clone());

    // --- 2. ACT ---
    let a = context.register_service(&["A"], Arc::new(()), Properties::new());
    let with_a = component.state();
    let b = context.register_service(&["B"], Arc::new(()), Properties::new());
    let with_both = component.state();
    a.unregister()?;
    let without_a = component.state();
    b.unregister()?;

    // --- 3. ASSERT ---
    assert_eq!(with_a, WaitingForRequired);
    assert_eq!(with_both, TrackingOptional);
    assert_eq!(without_a, WaitingForRequired);
    assert_eq!(component.state(), WaitingForRequired);
    assert_eq!(states.get().iter().filter(|s| **s == TrackingOptional).count(), 1);
    assert!(required.iter().all(|d| !d.is_available()));
    Ok(())
}

#[test]
fn test_builder_setters_rejected_while_active() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, _context, dm) = setup();
    let ensure = Ensure::new();
    let component = dm.create_component();
    component.set_implementation(Probe::new("c", &ensure))?;
    dm.add(component.clone());

    // --- 2. ACT ---
    let while_active = component.set_callbacks(LifecycleCallbacks::none());
    dm.remove(component.as_ref());
    let after_stop = component.set_callbacks(LifecycleCallbacks::none());

    // --- 3. ASSERT ---
    assert_eq!(while_active, Err(ComponentError::AlreadyActive(component.id())));
    assert_eq!(after_stop, Ok(()));
    Ok(())
}

#[test]
fn test_service_published_while_tracking() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let ensure = Ensure::new();
    let component = dm.create_component();
    component.set_implementation(Probe::new("greeter", &ensure))?;
    component.set_interfaces(&["Greeter"], Properties::new().with("lang", "en"))?;
    let registry = context.registry();

    // --- 2. ACT ---
    let before = registry.reference("Greeter");
    dm.add(component.clone());
    let published = registry.reference("Greeter");
    component.set_service_properties(Properties::new().with("lang", "fr"));
    let updated = registry.reference("Greeter");
    dm.remove(component.as_ref());

    // --- 3. ASSERT ---
    assert!(before.is_none());
    let published = published.expect("service should be registered");
    assert!(published.service_as::<Probe>().is_some());
    let lang = updated.and_then(|r| r.properties().get_str("lang").map(str::to_string));
    assert_eq!(lang.as_deref(), Some("fr"));
    assert!(registry.reference("Greeter").is_none());
    assert!(!published.is_registered());
    Ok(())
}

#[test]
fn test_failing_callback_does_not_abort_transition() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, _context, dm) = setup();
    let ensure = Ensure::new();
    let component = dm.create_component();
    component.set_implementation(Probe::failing("c", &ensure, "init"))?;

    // --- 2. ACT ---
    dm.add(component.clone());

    // --- 3. ASSERT ---
    assert_eq!(component.state(), TrackingOptional);
    assert_eq!(ensure.steps(), vec!["c.init", "c.start"]);
    Ok(())
}

#[test]
fn test_renamed_and_disabled_callbacks() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, _context, dm) = setup();
    let ensure = Ensure::new();
    let component = dm.create_component();
    component.set_implementation(Probe::new("c", &ensure))?;
    component.set_callbacks(LifecycleCallbacks::new(None, Some("activate"), Some("deactivate"), None))?;

    // --- 2. ACT ---
    dm.add(component.clone());
    dm.remove(component.as_ref());

    // --- 3. ASSERT ---
    assert_eq!(ensure.steps(), vec!["c.activate", "c.deactivate"]);
    Ok(())
}

#[test]
fn test_callback_instance_receives_lifecycle() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, _context, dm) = setup();
    let ensure = Ensure::new();
    let component = dm.create_component();
    component.set_implementation(Probe::new("impl", &ensure))?;
    component.set_callback_instance(Probe::new("callbacks", &ensure))?;

    // --- 2. ACT ---
    dm.add(component.clone());

    // --- 3. ASSERT ---
    assert_eq!(ensure.steps(), vec!["callbacks.init", "callbacks.start"]);
    let dependencies: Vec<Arc<dyn DependencyContext>> = component.dependencies();
    assert!(dependencies.is_empty());
    Ok(())
}
