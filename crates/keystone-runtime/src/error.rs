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

//! Errors raised by the component runtime.

use thiserror::Error;

/// Failures of the component builder surface.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComponentError {
    /// A builder setter was called after the component was started.
    #[error("component {0} cannot be modified while active")]
    AlreadyActive(u64),
    /// The dependency is already owned by a component.
    #[error("dependency '{0}' is already owned by a component")]
    DependencyOwned(String),
    /// The operation needs an instance that does not exist yet.
    #[error("component {0} has no instance")]
    NotInstantiated(u64),
}

/// Failures of a dependency.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DependencyError {
    /// The dependency has no current event to derive properties from.
    #[error("dependency '{0}' has no current event")]
    NoEvent(String),
    /// A setter was called after the dependency was started.
    #[error("dependency '{0}' cannot be modified while started")]
    AlreadyStarted(String),
}
