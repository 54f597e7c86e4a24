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

//! The lifecycle states a component moves through.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of a component, in increasing order of readiness.
///
/// `Inactive` and `TrackingOptional` are the resting states; the two
/// intermediate states are held while required dependencies are missing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum ComponentState {
    /// Not started; no dependency is tracked.
    #[default]
    Inactive,
    /// Started, dependencies tracked, some required dependency missing.
    WaitingForRequired,
    /// The instance exists, but an instance-bound required dependency is missing.
    InstantiatedAndWaitingForRequired,
    /// Fully started: the service is published and optional dependencies are tracked.
    TrackingOptional,
}

impl ComponentState {
    /// Returns `true` when the component is fully started.
    pub fn is_available(self) -> bool {
        self == ComponentState::TrackingOptional
    }

    /// Returns `true` when the component instance is expected to exist.
    pub fn is_constructed(self) -> bool {
        matches!(
            self,
            ComponentState::InstantiatedAndWaitingForRequired | ComponentState::TrackingOptional
        )
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentState::Inactive => "INACTIVE",
            ComponentState::WaitingForRequired => "WAITING_FOR_REQUIRED",
            ComponentState::InstantiatedAndWaitingForRequired => {
                "INSTANTIATED_AND_WAITING_FOR_REQUIRED"
            }
            ComponentState::TrackingOptional => "TRACKING_OPTIONAL",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_are_ordered_by_readiness() {
        assert!(ComponentState::Inactive < ComponentState::WaitingForRequired);
        assert!(
            ComponentState::WaitingForRequired < ComponentState::InstantiatedAndWaitingForRequired
        );
        assert!(
            ComponentState::InstantiatedAndWaitingForRequired < ComponentState::TrackingOptional
        );
    }

    #[test]
    fn test_only_tracking_optional_is_available() {
        assert!(ComponentState::TrackingOptional.is_available());
        assert!(!ComponentState::InstantiatedAndWaitingForRequired.is_available());
        assert!(ComponentState::InstantiatedAndWaitingForRequired.is_constructed());
        assert!(!ComponentState::WaitingForRequired.is_constructed());
    }
}
