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

//! Settings of a [`DependencyManager`](crate::DependencyManager).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a dependency manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyManagerConfig {
    /// Run components on a shared thread pool instead of the calling threads.
    pub parallel: bool,
    /// Number of pool workers when `parallel` is set.
    pub pool_size: usize,
    /// How long a configuration update waits for the component to accept it.
    pub update_timeout_ms: u64,
}

impl Default for DependencyManagerConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            pool_size: 4,
            update_timeout_ms: 5_000,
        }
    }
}

impl DependencyManagerConfig {
    /// Parses a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// [`DependencyManagerConfig::update_timeout_ms`] as a duration.
    pub fn update_timeout(&self) -> Duration {
        Duration::from_millis(self.update_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = DependencyManagerConfig::from_json(r#"{ "parallel": true }"#).unwrap();
        assert!(config.parallel);
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.update_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_wrong_types() {
        assert!(DependencyManagerConfig::from_json(r#"{ "pool_size": "four" }"#).is_err());
    }
}
