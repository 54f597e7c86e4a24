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
use common::{setup, Ensure, Probe};
use keystone_core::ComponentState::{Inactive, TrackingOptional, WaitingForRequired};
use keystone_core::Properties;
use keystone_infra::ConfigurationError;
use keystone_runtime::{Component, Dependency};

#[test]
fn test_configuration_is_delivered_before_init() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let ensure = Ensure::new();
    let component = dm.create_component();
    component.set_implementation(Probe::new("c", &ensure))?;
    component.add(dm.create_configuration_dependency("test.pid"));
    dm.add(component.clone());
    let configuration = context.configuration_admin().get_configuration("test.pid");

    // --- 2. ACT ---
    let before = component.state();
    configuration.update(Properties::new().with("testkey", "testvalue"))?;
    let configured = component.state();
    configuration.delete()?;

    // --- 3. ASSERT ---
    assert_eq!(before, WaitingForRequired);
    assert_eq!(configured, TrackingOptional);
    assert_eq!(component.state(), WaitingForRequired);
    assert_eq!(
        ensure.steps(),
        vec![
            "c.updated:testvalue",
            "c.init",
            "c.start",
            "c.updated:none",
            "c.stop",
            "c.destroy",
        ]
    );
    Ok(())
}

#[test]
fn test_existing_configuration_applied_on_start() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let ensure = Ensure::new();
    context
        .configuration_admin()
        .get_configuration("test.pid")
        .update(Properties::new().with("testkey", "stored"))?;
    let component = dm.create_component();
    component.set_implementation(Probe::new("c", &ensure))?;
    component.add(dm.create_configuration_dependency("test.pid"));

    // --- 2. ACT ---
    dm.add(component.clone());

    // --- 3. ASSERT ---
    assert_eq!(component.state(), TrackingOptional);
    assert_eq!(ensure.steps(), vec!["c.updated:stored", "c.init", "c.start"]);
    Ok(())
}

#[test]
fn test_component_stop_does_not_report_lost_configuration() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let ensure = Ensure::new();
    let component = dm.create_component();
    component.set_implementation(Probe::new("c", &ensure))?;
    component.add(dm.create_configuration_dependency("test.pid"));
    dm.add(component.clone());
    context
        .configuration_admin()
        .get_configuration("test.pid")
        .update(Properties::new().with("testkey", "testvalue"))?;

    // --- 2. ACT ---
    dm.remove(component.as_ref());

    // --- 3. ASSERT ---
    assert_eq!(component.state(), Inactive);
    assert_eq!(ensure.count("c.updated:none"), 0);
    assert_eq!(
        ensure.steps(),
        vec!["c.updated:testvalue", "c.init", "c.start", "c.stop", "c.destroy"]
    );
    Ok(())
}

#[test]
fn test_changed_configuration_reaches_running_component() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let ensure = Ensure::new();
    let component = dm.create_component();
    component.set_implementation(Probe::new("c", &ensure))?;
    component.add(dm.create_configuration_dependency("test.pid"));
    dm.add(component.clone());
    let configuration = context.configuration_admin().get_configuration("test.pid");
    configuration.update(Properties::new().with("testkey", "first"))?;

    // --- 2. ACT ---
    configuration.update(Properties::new().with("testkey", "second"))?;

    // --- 3. ASSERT ---
    assert_eq!(
        ensure.steps(),
        vec!["c.updated:first", "c.init", "c.start", "c.updated:second"]
    );
    assert_eq!(component.state(), TrackingOptional);
    Ok(())
}

#[test]
fn test_rejected_update_is_reported_to_the_admin() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let ensure = Ensure::new();
    let component = dm.create_component();
    component.set_implementation(Probe::failing("c", &ensure, "updated"))?;
    component.add(dm.create_configuration_dependency("test.pid"));
    dm.add(component.clone());

    // --- 2. ACT ---
    let outcome = context
        .configuration_admin()
        .get_configuration("test.pid")
        .update(Properties::new().with("testkey", "bad"));

    // --- 3. ASSERT ---
    assert!(matches!(outcome, Err(ConfigurationError::Rejected { ref pid, .. }) if pid == "test.pid"));
    assert_eq!(component.state(), WaitingForRequired);
    assert_eq!(ensure.steps(), vec!["c.updated:bad"]);
    Ok(())
}

#[test]
fn test_renamed_callback_and_propagated_settings() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_framework, context, dm) = setup();
    let ensure = Ensure::new();
    let component = dm.create_component();
    component.set_implementation(Probe::new("c", &ensure))?;
    component.set_interfaces(&["Configured"], Properties::new().with("own", true))?;
    let dependency = dm.create_configuration_dependency("test.pid");
    dependency.set_callback("configure")?.set_propagate(true)?;
    component.add(dependency);
    dm.add(component.clone());

    // --- 2. ACT ---
    context
        .configuration_admin()
        .get_configuration("test.pid")
        .update(
            Properties::new()
                .with("name", "public")
                .with(".secret", "hidden"),
        )?;

    // --- 3. ASSERT ---
    assert_eq!(ensure.steps(), vec!["c.configure:public", "c.init", "c.start"]);
    let published = context
        .registry()
        .reference("Configured")
        .ok_or_else(|| anyhow::anyhow!("service not published"))?
        .properties();
    assert_eq!(published.get_str("name"), Some("public"));
    assert_eq!(published.get_str(".secret"), None);
    assert!(published.contains_key("own"));
    Ok(())
}
