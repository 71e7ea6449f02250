use std::sync::Arc;

use rampr_metrics::{Registry, TagSet};

/// Tag keys the harness sets itself; scenario-level tags cannot shadow them.
pub const RESERVED_TAG_KEYS: &[&str] = &["scenario", "status", "method", "name", "check", "error_kind"];

/// Per-scenario tagging: every sample recorded on behalf of a scenario carries `scenario=<name>`
/// plus the scenario's own tags.
#[derive(Debug, Clone)]
pub struct MetricsContext {
    scenario: Arc<str>,
    scenario_tags: Arc<[(String, String)]>,
    base: TagSet,
}

impl MetricsContext {
    #[must_use]
    pub fn new(metrics: &Registry, scenario: &str, tags: &[(String, String)]) -> Self {
        let scenario_tags: Vec<(String, String)> = tags
            .iter()
            .filter(|(k, _)| !RESERVED_TAG_KEYS.contains(&k.as_str()))
            .cloned()
            .collect();

        let mut pairs: Vec<(&str, &str)> = Vec::with_capacity(scenario_tags.len() + 1);
        pairs.push(("scenario", scenario));
        pairs.extend(scenario_tags.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        Self {
            scenario: Arc::from(scenario),
            base: metrics.resolve_tags(&pairs),
            scenario_tags: Arc::from(scenario_tags),
        }
    }

    #[must_use]
    pub fn scenario(&self) -> &str {
        self.scenario.as_ref()
    }

    #[must_use]
    pub fn scenario_tags(&self) -> &[(String, String)] {
        self.scenario_tags.as_ref()
    }

    /// `scenario` plus scenario-level tags, already interned.
    #[must_use]
    pub fn base_tags(&self) -> &TagSet {
        &self.base
    }

    /// Base tags plus `extra`. Base keys win on collision.
    #[must_use]
    pub fn tags_with(&self, metrics: &Registry, extra: &[(&str, &str)]) -> TagSet {
        metrics.merge_tags(&self.base, extra)
    }
}
