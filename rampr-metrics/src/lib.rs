//! Thread-safe metric sink for load runs.
//!
//! Writers record [`Sample`]s (or write through a cached [`MetricHandle`]); readers take
//! copy-out [`MetricState`] snapshots that never alias live storage.

pub mod key;
pub mod metrics;
pub mod registry;
pub mod sample;
pub mod tags;

pub use key::KeyId;
pub use metrics::{MetricHandle, MetricKind, MetricState, TrendState};
pub use registry::{MetricId, Registry, SeriesSnapshot};
pub use sample::Sample;
pub use tags::TagSet;
