use crate::registry::MetricId;
use crate::tags::TagSet;
use std::time::Instant;

/// One measurement, consumed once by [`crate::Registry::record`].
#[derive(Debug, Clone)]
pub struct Sample {
    pub metric: MetricId,
    pub tags: TagSet,
    pub value: f64,
    pub at: Instant,
}

impl Sample {
    pub fn new(metric: MetricId, tags: TagSet, value: f64) -> Self {
        Self {
            metric,
            tags,
            value,
            at: Instant::now(),
        }
    }
}
