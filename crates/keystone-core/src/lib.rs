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

//! # Keystone Core
//!
//! Foundational crate containing the value types and concurrency primitives
//! shared by the component runtime and its external collaborators.
//!
//! Nothing in this crate knows about components: it provides property
//! snapshots, ranked dependency events, service filters, the serial and
//! dispatch executors, and the lifecycle state enumeration.

#![warn(missing_docs)]

pub mod error;
pub mod event;
pub mod executor;
pub mod filter;
pub mod graph;
pub mod properties;
pub mod state;

pub use error::{ExecutorError, FilterError};
pub use event::{Event, EventSet, EventType, ServiceObject};
pub use executor::{
    execute_and_wait, DispatchExecutor, Executor, SerialExecutor, Task, ThreadPool,
};
pub use filter::Filter;
pub use properties::{Properties, PropertyValue};
pub use state::ComponentState;
