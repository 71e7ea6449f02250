use dashmap::DashMap;
use parking_lot::RwLock;

use crate::key::{Interner, KeyId};
use crate::metrics::{MetricHandle, MetricKind, MetricState, MetricStorage};
use crate::sample::Sample;
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId(u32);

#[derive(Debug)]
struct MetricDef {
    name: KeyId,
    kind: MetricKind,
}

/// One `(metric, tag set)` series copied out of the registry.
#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    pub name: String,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
    pub state: MetricState,
}

/// The metric sink shared by every VU of a run.
///
/// Counters, gauges and rates are plain atomics; each trend series has its own mutex, so writers
/// only contend when they hit the very same metric and tag set.
#[derive(Debug, Default)]
pub struct Registry {
    interner: Interner,
    defs: RwLock<Vec<MetricDef>>,
    by_name: DashMap<KeyId, MetricId>,
    storage: DashMap<MetricId, DashMap<TagSet, MetricStorage>>,
}

impl Registry {
    /// Registers `name` (or returns the existing id). The first registration fixes the kind.
    ///
    /// Known names resolve through a sharded index; only the first registration of a name takes
    /// the `defs` write lock.
    pub fn register(&self, name: &str, kind: MetricKind) -> MetricId {
        let name_id = self.interner.get_or_intern(name);
        if let Some(id) = self.by_name.get(&name_id) {
            return *id;
        }

        let mut defs = self.defs.write();
        // Another writer may have registered it between the index probe and the lock.
        if let Some(id) = self.by_name.get(&name_id) {
            return *id;
        }

        let id = MetricId(u32::try_from(defs.len()).unwrap_or(u32::MAX));
        defs.push(MetricDef {
            name: name_id,
            kind,
        });
        self.storage.insert(id, DashMap::new());
        // Published last: an id found in the index always has its def and storage in place.
        self.by_name.insert(name_id, id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<MetricId> {
        let name_id = self.interner.get(name)?;
        self.by_name.get(&name_id).map(|id| *id)
    }

    pub fn kind(&self, metric: MetricId) -> Option<MetricKind> {
        self.defs.read().get(metric.0 as usize).map(|d| d.kind)
    }

    pub fn resolve_key(&self, key: &str) -> KeyId {
        self.interner.get_or_intern(key)
    }

    pub fn resolve_tags(&self, tags: &[(&str, &str)]) -> TagSet {
        TagSet::from_pairs(
            tags.iter()
                .map(|(k, v)| (self.resolve_key(k), self.resolve_key(v))),
        )
    }

    /// `base` plus `extra`; on a key collision the value from `base` is kept.
    pub fn merge_tags(&self, base: &TagSet, extra: &[(&str, &str)]) -> TagSet {
        if extra.is_empty() {
            return base.clone();
        }
        let extra = extra
            .iter()
            .map(|(k, v)| (self.resolve_key(k), self.resolve_key(v)));
        TagSet::from_pairs(base.iter().chain(extra))
    }

    /// Write handle for one series, creating the series on first use.
    pub fn handle(&self, metric: MetricId, tags: &TagSet) -> Option<MetricHandle> {
        // Resolve the kind before touching `storage`; `register` locks in the opposite order.
        let kind = self.kind(metric)?;
        let series_map = self.storage.get(&metric)?;

        if let Some(storage) = series_map.get(tags) {
            return Some(storage.handle());
        }

        let handle = series_map
            .entry(tags.clone())
            .or_insert_with(|| MetricStorage::new(kind))
            .handle();
        Some(handle)
    }

    pub fn record(&self, sample: &Sample) {
        if let Some(handle) = self.handle(sample.metric, &sample.tags) {
            handle.record(sample.value);
        }
    }

    /// Every series of `name` folded into one state.
    ///
    /// `None` when the metric is unknown or has no series yet, i.e. nothing was ever recorded.
    pub fn snapshot(&self, name: &str) -> Option<MetricState> {
        self.snapshot_filtered(name, &[])
    }

    /// Like [`Registry::snapshot`] but only series carrying every `(key, value)` of `filter`.
    pub fn snapshot_filtered(&self, name: &str, filter: &[(&str, &str)]) -> Option<MetricState> {
        let metric = self.lookup(name)?;
        let kind = self.kind(metric)?;

        let mut ids = Vec::with_capacity(filter.len());
        for (k, v) in filter {
            // An unknown tag string cannot be on any series.
            ids.push((self.interner.get(k)?, self.interner.get(v)?));
        }

        let series_map = self.storage.get(&metric)?;
        let mut out: Option<MetricState> = None;
        for series in series_map.iter() {
            if series.key().matches(&ids) {
                out.get_or_insert_with(|| MetricState::empty(kind))
                    .merge(&series.value().state());
            }
        }
        out
    }

    /// Registered metric names with their kinds, in registration order.
    pub fn metrics(&self) -> Vec<(String, MetricKind)> {
        self.defs
            .read()
            .iter()
            .map(|d| (self.resolve_string(d.name), d.kind))
            .collect()
    }

    /// Every series, sorted by metric name then tags.
    pub fn series(&self) -> Vec<SeriesSnapshot> {
        let defs: Vec<(MetricId, String, MetricKind)> = self
            .defs
            .read()
            .iter()
            .enumerate()
            .map(|(idx, d)| (MetricId(idx as u32), self.resolve_string(d.name), d.kind))
            .collect();

        let mut out = Vec::new();
        for (id, name, kind) in defs {
            let Some(series_map) = self.storage.get(&id) else {
                continue;
            };
            for series in series_map.iter() {
                let tags = series
                    .key()
                    .iter()
                    .map(|(k, v)| (self.resolve_string(k), self.resolve_string(v)))
                    .collect();
                out.push(SeriesSnapshot {
                    name: name.clone(),
                    kind,
                    tags,
                    state: series.value().state(),
                });
            }
        }

        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        out
    }

    fn resolve_string(&self, id: KeyId) -> String {
        self.interner
            .resolve(id)
            .map(|s| s.to_string())
            .unwrap_or_default()
    }
}
