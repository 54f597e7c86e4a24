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
use common::{probe_factory, setup, Counter, Ensure, Probe};
use keystone_core::properties::{ASPECT, SERVICE_RANKING};
use keystone_core::ComponentState::{Inactive, TrackingOptional};
use keystone_core::Properties;
use keystone_infra::ConfigurationError;
use keystone_runtime::{
    Binding, Component, ComponentError, ComponentInstance, Dependency, LifecycleCallbacks,
};
use std::sync::Arc;

#[test]
fn test_aspect_interposes_in_front_of_service() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let (ensure, counter) = (Ensure::new(), Arc::new(Counter::default()));
    let original = context.register_service(&["Store"], Arc::new("original".to_string()), Properties::new());

    let consumer_probe = Probe::new("consumer", &ensure);
    let consumer = dm.create_component();
    consumer.set_implementation(consumer_probe.clone())?;
    let store = dm.create_service_dependency(Some("Store"), None)?;
    store.set_required(true).set_auto_config(Some("store"))?;
    consumer.add(store);
    dm.add(consumer.clone());

    let aspect = dm.create_aspect_service("Store", None, 10, Binding::field("store"))?;
    aspect.set_factory(probe_factory("a", &ensure, &counter))?;

    // --- 2. ACT ---
    dm.add(aspect.clone());

    // --- 3. ASSERT ---
    let origin = original.reference().id();
    assert_eq!(aspect.child_count(), 1);
    let published = context
        .registry()
        .find(&format!("(&(objectClass=Store)({ASPECT}={origin}))"))?;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].ranking(), 10);

    let seen = consumer_probe
        .injected("store")
        .and_then(|i| i.value_as::<Probe>())
        .ok_or_else(|| anyhow::anyhow!("consumer does not see the aspect"))?;
    assert_eq!(seen.name(), "a1");
    let decorated = seen.injected("store").and_then(|i| i.value_as::<String>());
    assert_eq!(decorated.as_deref().map(String::as_str), Some("original"));
    assert_eq!(consumer.state(), TrackingOptional);
    Ok(())
}

#[test]
fn test_aspect_child_follows_its_service() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let (ensure, counter) = (Ensure::new(), Arc::new(Counter::default()));
    let aspect = dm.create_aspect_service("Store", None, 10, Binding::field("store"))?;
    aspect.set_factory(probe_factory("a", &ensure, &counter))?;
    dm.add(aspect.clone());

    // --- 2. ACT ---
    let first = context.register_service(&["Store"], Arc::new(()), Properties::new());
    let second = context.register_service(&["Store"], Arc::new(()), Properties::new());
    let with_both = aspect.child_count();
    first.unregister()?;
    let with_second = aspect.child_count();
    second.unregister()?;

    // --- 3. ASSERT ---
    assert_eq!(with_both, 2);
    assert_eq!(with_second, 1);
    assert_eq!(aspect.child_count(), 0);
    assert!(context.registry().reference("Store").is_none());
    assert_eq!(counter.get(), 2);
    assert_eq!(ensure.count("a1.stop"), 1);
    assert_eq!(ensure.count("a2.stop"), 1);
    Ok(())
}

#[test]
fn test_adapter_creates_one_child_per_service() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let (ensure, counter) = (Ensure::new(), Arc::new(Counter::default()));
    let adapter = dm.create_adapter_service("Device", None, Binding::field("device"), true)?;
    adapter.set_factory(probe_factory("d", &ensure, &counter))?;
    adapter.set_interfaces(&["Driver"], Properties::new().with("kind", "driver"))?;
    dm.add(adapter.clone());

    // --- 2. ACT ---
    let first = context.register_service(
        &["Device"],
        Arc::new(()),
        Properties::new().with("serial", "A").with(".private", "x"),
    );
    let second = context.register_service(&["Device"], Arc::new(()), Properties::new().with("serial", "B"));
    let drivers = context.registry().find("(objectClass=Driver)")?;
    first.unregister()?;
    second.set_properties(Properties::new().with("serial", "B2"))?;

    // --- 3. ASSERT ---
    assert_eq!(drivers.len(), 2);
    let serial_a = drivers
        .iter()
        .find(|r| r.properties().get_str("serial") == Some("A"))
        .ok_or_else(|| anyhow::anyhow!("no driver for device A"))?
        .properties();
    assert_eq!(serial_a.get_str("kind"), Some("driver"));
    assert!(!serial_a.contains_key(".private"));
    assert!(!serial_a.contains_key(ASPECT));

    assert_eq!(adapter.child_count(), 1);
    assert_eq!(context.registry().find("(objectClass=Driver)")?.len(), 1);
    assert_eq!(context.registry().find("(&(objectClass=Driver)(serial=B2))")?.len(), 1);
    Ok(())
}

#[test]
fn test_extra_dependencies_are_copied_to_children() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let (ensure, counter) = (Ensure::new(), Arc::new(Counter::default()));
    let adapter = dm.create_adapter_service("Device", None, Binding::field("device"), false)?;
    adapter.set_factory(probe_factory("d", &ensure, &counter))?;
    let log = dm.create_service_dependency(Some("Log"), None)?;
    log.set_required(true)
        .set_callbacks(Some("bind"), None, None)?;
    adapter.add(log);
    let _device = context.register_service(&["Device"], Arc::new(()), Properties::new());
    dm.add(adapter.clone());
    let without_log = adapter.child_count();

    // --- 2. ACT ---
    let log_service = context.register_service(&["Log"], Arc::new(()), Properties::new());

    // --- 3. ASSERT ---
    assert_eq!(without_log, 0);
    assert_eq!(adapter.child_count(), 1);
    let child = adapter
        .children()
        .pop()
        .ok_or_else(|| anyhow::anyhow!("no child"))?;
    assert_eq!(child.state(), TrackingOptional);
    assert_eq!(child.dependencies().len(), 2);
    assert_eq!(ensure.count(&format!("d1.bind:{}", log_service.reference().id())), 1);
    Ok(())
}

#[test]
fn test_swap_on_extra_dependency_reaches_each_child_once() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let (ensure, counter) = (Ensure::new(), Arc::new(Counter::default()));
    let adapter = dm.create_adapter_service("Device", None, Binding::field("device"), false)?;
    adapter.set_factory(probe_factory("d", &ensure, &counter))?;
    let _device = context.register_service(&["Device"], Arc::new(()), Properties::new());
    dm.add(adapter.clone());

    let log = dm.create_service_dependency(Some("Log"), None)?;
    log.set_callbacks(Some("add"), None, Some("remove"))?
        .set_callback_instance(Probe::new("cb", &ensure))?;
    log.set_swap_callback(Some("swap"))?;
    adapter.add(log);
    let origin = context.register_service(&["Log"], Arc::new(()), Properties::new());

    // --- 2. ACT ---
    let replacement = context.register_service(
        &["Log"],
        Arc::new(()),
        Properties::new()
            .with(ASPECT, origin.reference().id())
            .with(SERVICE_RANKING, 10),
    );

    // --- 3. ASSERT ---
    let (old, new) = (origin.reference().id(), replacement.reference().id());
    assert_eq!(adapter.child_count(), 1);
    assert_eq!(ensure.count(&format!("cb.add:{old}")), 1);
    assert_eq!(ensure.count(&format!("cb.swap:{old}->{new}")), 1);
    Ok(())
}

#[test]
fn test_factory_configuration_adapter_lifecycle() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let (ensure, counter) = (Ensure::new(), Arc::new(Counter::default()));
    let adapter = dm.create_factory_configuration_adapter("cache.factory", "updated", true);
    adapter.set_factory(probe_factory("f", &ensure, &counter))?;
    adapter.set_interfaces(&["Cache"], Properties::new().with("tier", "memory"))?;
    dm.add(adapter.clone());
    let configuration = context
        .configuration_admin()
        .create_factory_configuration("cache.factory");

    // --- 2. ACT ---
    configuration.update(Properties::new().with("name", "one"))?;
    let created = context.registry().find("(&(objectClass=Cache)(name=one)(tier=memory))")?;
    configuration.update(Properties::new().with("name", "two"))?;
    let updated = context.registry().find("(&(objectClass=Cache)(name=two))")?;
    configuration.delete()?;

    // --- 3. ASSERT ---
    assert_eq!(created.len(), 1);
    assert_eq!(updated.len(), 1);
    assert_eq!(adapter.child_count(), 0);
    assert!(context.registry().reference("Cache").is_none());
    assert_eq!(counter.get(), 1);
    assert_eq!(
        ensure.steps(),
        vec![
            "f1.updated:one",
            "f1.init",
            "f1.start",
            "f1.updated:two",
            "f1.stop",
            "f1.destroy",
        ]
    );
    Ok(())
}

#[test]
fn test_factory_configuration_rejected_by_child() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let ensure = Ensure::new();
    let adapter = dm.create_factory_configuration_adapter("cache.factory", "updated", false);
    let failing = Arc::clone(&ensure);
    adapter.set_factory(Arc::new(
        move |_component: &dyn Component| -> Result<Arc<dyn ComponentInstance>> {
            Ok(Probe::failing("f", &failing, "updated"))
        },
    ))?;
    adapter.set_interfaces(&["Cache"], Properties::new())?;
    dm.add(adapter.clone());

    // --- 2. ACT ---
    let outcome = context
        .configuration_admin()
        .create_factory_configuration("cache.factory")
        .update(Properties::new().with("name", "bad"));

    // --- 3. ASSERT ---
    assert!(matches!(outcome, Err(ConfigurationError::Rejected { .. })));
    assert_eq!(adapter.child_count(), 0);
    assert!(context.registry().reference("Cache").is_none());
    assert_eq!(ensure.steps(), vec!["f.updated:bad"]);
    Ok(())
}

#[test]
fn test_filter_component_setters_follow_activity() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, _context, dm) = setup();
    let adapter = dm.create_adapter_service("Device", None, Binding::default(), false)?;

    // --- 2. ACT ---
    let before = adapter.set_callbacks(LifecycleCallbacks::none());
    dm.add(adapter.clone());
    let active = adapter.set_callbacks(LifecycleCallbacks::default());
    let state = adapter.state();
    dm.remove(adapter.as_ref());

    // --- 3. ASSERT ---
    assert_eq!(before, Ok(()));
    assert_eq!(active, Err(ComponentError::AlreadyActive(adapter.id())));
    assert_eq!(state, TrackingOptional);
    assert_eq!(adapter.state(), Inactive);
    assert_eq!(adapter.name(), "Adapter for Device");
    Ok(())
}
