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

//! Aspects: services interposed in front of every service of a name.
//!
//! An aspect with ranking `r` decorates the highest member below `r` of each
//! aspect chain. Its children publish the same name with ranking `r` and the
//! original's id under `keystone.aspect`, so consumers see the top of the
//! chain and higher aspects stack on top of it.

use super::{new_source_dependency, origin_filter, Binding, DecoratorKind, Source};
use crate::callback::DecoratorRole;
use crate::context::DependencyContext;
use crate::dependency::ServiceDependency;
use keystone_core::properties::{ASPECT, SERVICE_RANKING};
use keystone_core::{FilterError, Properties};
use keystone_infra::BundleContext;
use std::sync::Arc;

pub(crate) struct AspectKind {
    service_name: String,
    filter: Option<String>,
    ranking: i64,
    binding: Binding,
    source: Arc<ServiceDependency>,
}

/// Services without a ranking, or ranked below `ranking`.
fn ranked_below(ranking: i64) -> String {
    format!(
        "(|(!({SERVICE_RANKING}=*))({SERVICE_RANKING}<={}))",
        ranking.saturating_sub(1)
    )
}

impl AspectKind {
    pub(crate) fn new(
        context: Arc<BundleContext>,
        service_name: &str,
        filter: Option<&str>,
        ranking: i64,
        binding: Binding,
    ) -> Result<Self, FilterError> {
        let below = ranked_below(ranking);
        let tracked = match filter {
            Some(filter) => format!("(&{below}{filter})"),
            None => below,
        };
        let source = new_source_dependency(context, service_name, Some(&tracked))?;
        Ok(Self {
            service_name: service_name.to_string(),
            filter: filter.map(str::to_string),
            ranking,
            binding,
            source,
        })
    }
}

impl DecoratorKind for AspectKind {
    fn role(&self) -> DecoratorRole {
        DecoratorRole::Aspect
    }

    fn describe(&self) -> String {
        match &self.filter {
            Some(filter) => format!(
                "Aspect for {} {} (ranking {})",
                self.service_name, filter, self.ranking
            ),
            None => format!("Aspect for {} (ranking {})", self.service_name, self.ranking),
        }
    }

    fn source_dependency(&self) -> Option<Arc<dyn DependencyContext>> {
        Some(self.source.clone() as Arc<dyn DependencyContext>)
    }

    fn child_interfaces(&self, _configured: &[String]) -> Vec<String> {
        vec![self.service_name.clone()]
    }

    fn child_properties(&self, own: &Properties, source: &Source) -> Properties {
        let properties = source.properties.without_framework_keys().merged(own);
        match source.origin {
            Some(origin) => properties
                .with(SERVICE_RANKING, self.ranking)
                .with(ASPECT, origin),
            None => properties.with(SERVICE_RANKING, self.ranking),
        }
    }

    fn child_dependency(
        &self,
        context: &Arc<BundleContext>,
        source: &Source,
    ) -> anyhow::Result<Option<Arc<dyn DependencyContext>>> {
        let Some(origin) = source.origin else {
            return Ok(None);
        };
        let filter = format!("(&{}{})", origin_filter(origin), ranked_below(self.ranking));
        let dependency =
            ServiceDependency::new(Arc::clone(context), Some(&self.service_name), Some(&filter))?;
        self.binding.apply(&dependency)?;
        Ok(Some(dependency as Arc<dyn DependencyContext>))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::properties::SERVICE_ID;
    use keystone_core::Filter;
    use keystone_infra::Framework;

    fn aspect(ranking: i64) -> AspectKind {
        let context = Framework::new().bundle_context("test");
        AspectKind::new(context, "Store", None, ranking, Binding::field("store")).unwrap()
    }

    #[test]
    fn test_ranked_below_excludes_own_ranking() {
        let filter: Filter = ranked_below(10).parse().unwrap();
        assert!(filter.matches(&Properties::new()));
        assert!(filter.matches(&Properties::new().with(SERVICE_RANKING, 9)));
        assert!(!filter.matches(&Properties::new().with(SERVICE_RANKING, 10)));
    }

    #[test]
    fn test_child_properties_point_at_original() {
        let source = Source {
            key: "3".into(),
            origin: Some(3),
            properties: Properties::new()
                .with(SERVICE_ID, 8_u64)
                .with(SERVICE_RANKING, 5)
                .with("tier", "gold"),
        };
        let own = Properties::new().with("cached", true);

        let properties = aspect(10).child_properties(&own, &source);

        assert_eq!(properties.get_int(SERVICE_RANKING), Some(10));
        assert_eq!(properties.get_int(ASPECT), Some(3));
        assert_eq!(properties.get_str("tier"), Some("gold"));
        assert!(properties.get(SERVICE_ID).is_none());
        assert!(properties.get("cached").is_some());
    }

    #[test]
    fn test_child_publishes_decorated_name() {
        let kind = aspect(1);
        assert_eq!(kind.child_interfaces(&["Ignored".to_string()]), vec!["Store"]);
        assert_eq!(kind.describe(), "Aspect for Store (ranking 1)");
    }
}
