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

//! Typed callback dispatch.
//!
//! A component instance is any type implementing [`ComponentInstance`].
//! Callbacks are looked up by method name and offered as a list of
//! [`Invocation`] shapes in priority order; the instance answers the first
//! shape it understands and returns `None` for the others. Dependencies
//! feed values into instances through [`ComponentInstance::inject`].

use crate::context::Component;
use keystone_core::{Event, Properties, ServiceObject};
use keystone_infra::BundleContext;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

/// The result of a user callback.
pub type CallbackResult = anyhow::Result<()>;

/// Access to the concrete type behind a trait object.
pub trait AsAny: Any + Send + Sync {
    /// Borrows `self` as [`Any`].
    fn as_any(&self) -> &dyn Any;
    /// Converts `self` into a shareable [`Any`], usable as a service object.
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    /// The name of the concrete type.
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// The kind of internal component an instance stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoratorRole {
    /// Creates one aspect per decorated service.
    Aspect,
    /// Creates one adapter per adapted service.
    Adapter,
    /// Creates one component per factory configuration.
    FactoryConfiguration,
}

/// One argument combination a callback may be invoked with.
#[derive(Clone, Copy)]
pub enum Invocation<'a> {
    /// No arguments.
    Empty,
    /// The owning component.
    Component(&'a dyn Component),
    /// A dependency event.
    Event(&'a Event),
    /// The owning component and a dependency event.
    ComponentEvent(&'a dyn Component, &'a Event),
    /// The replaced and the replacing event.
    Swap(&'a Event, &'a Event),
    /// The owning component, the replaced and the replacing event.
    ComponentSwap(&'a dyn Component, &'a Event, &'a Event),
    /// Configuration settings, `None` once the configuration is gone.
    Configuration(Option<&'a Properties>),
    /// The owning component and configuration settings.
    ComponentConfiguration(&'a dyn Component, Option<&'a Properties>),
}

impl Invocation<'_> {
    /// The event carried by this shape, if any. For swaps this is the new one.
    pub fn event(&self) -> Option<&Event> {
        match self {
            Invocation::Event(e) | Invocation::ComponentEvent(_, e) => Some(e),
            Invocation::Swap(_, e) | Invocation::ComponentSwap(_, _, e) => Some(e),
            _ => None,
        }
    }

    /// The component carried by this shape, if any.
    pub fn component(&self) -> Option<&dyn Component> {
        match *self {
            Invocation::Component(c)
            | Invocation::ComponentEvent(c, _)
            | Invocation::ComponentSwap(c, _, _)
            | Invocation::ComponentConfiguration(c, _) => Some(c),
            _ => None,
        }
    }
}

/// A value pushed into a component instance.
#[derive(Clone)]
pub enum Injection {
    /// The owning component, injected on instantiation under the field `"component"`.
    Component(Weak<dyn Component>),
    /// The owning bundle context, injected under the field `"bundle_context"`.
    BundleContext(Arc<BundleContext>),
    /// The current value of a dependency.
    Value(ServiceObject),
    /// The dependency is gone and has no default: fall back to a no-op.
    Null,
}

impl Injection {
    /// The injected dependency value downcast to `T`.
    pub fn value_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Injection::Value(v) => Arc::clone(v).downcast::<T>().ok(),
            _ => None,
        }
    }
}

/// A user object managed by a component.
///
/// Instances are shared across threads and receive `&self`, so mutable
/// state lives behind interior mutability.
pub trait ComponentInstance: AsAny {
    /// Invokes `method` if this instance supports it with the given shape.
    ///
    /// Returns `None` when the method or the shape is unknown, so the next
    /// shape can be tried.
    fn invoke(&self, method: &str, invocation: &Invocation<'_>) -> Option<CallbackResult> {
        let _ = (method, invocation);
        None
    }

    /// Stores an injected value into `field`; returns `false` if there is no such field.
    fn inject(&self, field: &str, injection: &Injection) -> bool {
        let _ = (field, injection);
        false
    }

    /// Set by the internal instances of aspects, adapters and factory adapters.
    fn decorator(&self) -> Option<DecoratorRole> {
        None
    }

    /// The object published in the service registry; the instance itself by default.
    ///
    /// Override it to publish a trait object, e.g. `Arc::new(self as Arc<dyn Store>)`,
    /// so consumers can look the service up by interface.
    fn service_object(self: Arc<Self>) -> ServiceObject {
        AsAny::into_any_arc(self)
    }
}

impl dyn ComponentInstance {
    /// Downcasts a shared instance to its concrete type.
    pub fn downcast_arc<T: ComponentInstance>(self: Arc<Self>) -> Option<Arc<T>> {
        self.into_any_arc().downcast::<T>().ok()
    }

    /// Borrows the concrete type.
    pub fn downcast_ref<T: ComponentInstance>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

fn try_shapes(
    instance: &Arc<dyn ComponentInstance>,
    method: &str,
    shapes: &[Invocation<'_>],
) -> Option<CallbackResult> {
    shapes.iter().find_map(|shape| {
        match catch_unwind(AssertUnwindSafe(|| instance.invoke(method, shape))) {
            Ok(outcome) => outcome,
            Err(panic) => Some(Err(anyhow::anyhow!(
                "panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    })
}

/// Offers `method` to every instance, logging failures.
///
/// Each instance runs the first shape it supports. A failing instance does
/// not keep the remaining ones from being called. Returns `true` if at
/// least one instance had the method.
pub fn invoke_callback(
    instances: &[Arc<dyn ComponentInstance>],
    method: &str,
    shapes: &[Invocation<'_>],
) -> bool {
    let mut found = false;
    for instance in instances {
        if let Some(result) = try_shapes(instance, method, shapes) {
            found = true;
            if let Err(e) = result {
                log::error!(
                    "Callback '{}' failed on {}: {:#}",
                    method,
                    (**instance).type_name(),
                    e
                );
            }
        }
    }
    found
}

/// Like [`invoke_callback`], but stops at and returns the first failure.
pub fn try_invoke_callback(
    instances: &[Arc<dyn ComponentInstance>],
    method: &str,
    shapes: &[Invocation<'_>],
) -> anyhow::Result<bool> {
    let mut found = false;
    for instance in instances {
        if let Some(result) = try_shapes(instance, method, shapes) {
            found = true;
            result?;
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Probe {
        calls: Mutex<Vec<String>>,
    }

    impl ComponentInstance for Probe {
        fn invoke(&self, method: &str, invocation: &Invocation<'_>) -> Option<CallbackResult> {
            match (method, invocation) {
                ("bind", Invocation::Event(e)) => {
                    self.calls.lock().unwrap().push(format!("bind:{}", e.id()));
                    Some(Ok(()))
                }
                ("fail", Invocation::Empty) => Some(Err(anyhow::anyhow!("boom"))),
                ("explode", Invocation::Empty) => panic!("kaboom"),
                ("reject", _) => Some(Err(anyhow::anyhow!("rejected"))),
                _ => None,
            }
        }
    }

    #[test]
    fn test_first_supported_shape_wins() {
        let probe = Arc::new(Probe::default());
        let instances: Vec<Arc<dyn ComponentInstance>> = vec![probe.clone()];
        let event = Event::new(7, Properties::new());

        let found = invoke_callback(
            &instances,
            "bind",
            &[Invocation::Swap(&event, &event), Invocation::Event(&event), Invocation::Empty],
        );

        assert!(found);
        assert_eq!(*probe.calls.lock().unwrap(), vec!["bind:7"]);
    }

    #[test]
    fn test_missing_method_reports_not_found() {
        let instances: Vec<Arc<dyn ComponentInstance>> = vec![Arc::new(Probe::default())];
        assert!(!invoke_callback(&instances, "unknown", &[Invocation::Empty]));
    }

    #[test]
    fn test_errors_and_panics_are_contained() {
        let instances: Vec<Arc<dyn ComponentInstance>> =
            vec![Arc::new(Probe::default()), Arc::new(Probe::default())];
        assert!(invoke_callback(&instances, "fail", &[Invocation::Empty]));
        assert!(invoke_callback(&instances, "explode", &[Invocation::Empty]));
    }

    #[test]
    fn test_try_invoke_propagates_error() {
        let instances: Vec<Arc<dyn ComponentInstance>> = vec![Arc::new(Probe::default())];
        let err = try_invoke_callback(&instances, "reject", &[Invocation::Empty]).unwrap_err();
        assert_eq!(err.to_string(), "rejected");
    }

    #[test]
    fn test_downcast_arc() {
        let instance: Arc<dyn ComponentInstance> = Arc::new(Probe::default());
        assert!(instance.clone().downcast_arc::<Probe>().is_some());
        assert!((*instance).type_name().ends_with("Probe"));
    }
}
