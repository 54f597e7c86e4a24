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

//! Errors reported by the in-memory collaborators.

use keystone_core::FilterError;
use thiserror::Error;

/// Failures of the service registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registration was already withdrawn.
    #[error("service {0} is no longer registered")]
    Unregistered(u64),
    /// A filter string could not be parsed.
    #[error(transparent)]
    InvalidFilter(#[from] FilterError),
}

/// Failures of a configuration update or deletion.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A managed service refused the new settings.
    #[error("configuration '{pid}' rejected: {source:#}")]
    Rejected {
        /// The configuration pid.
        pid: String,
        /// The error raised by the managed service.
        #[source]
        source: anyhow::Error,
    },
    /// The configuration has already been deleted.
    #[error("configuration '{0}' was deleted")]
    Deleted(String),
    /// The receiving component did not process the update in time.
    #[error("configuration '{0}' update timed out")]
    Timeout(String),
    /// The receiving component is gone.
    #[error("configuration '{0}' target is closed")]
    Closed(String),
}
