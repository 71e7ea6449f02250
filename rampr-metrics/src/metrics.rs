use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Trend values are stored in the histogram in thousandths of their unit.
pub const TREND_SCALE: f64 = 1_000.0;

/// Highest value (in trend units) the histogram resolves; larger values saturate.
/// For millisecond trends this is one hour.
pub const TREND_MAX: f64 = 3_600_000.0;

const TREND_SIGFIG: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Trend,
}

pub(crate) fn new_trend_histogram() -> Histogram<u64> {
    let high = (TREND_MAX * TREND_SCALE) as u64;
    match Histogram::<u64>::new_with_bounds(1, high, TREND_SIGFIG) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

fn scale(value: f64) -> u64 {
    if !value.is_finite() || value <= 0.0 {
        return 1;
    }
    ((value * TREND_SCALE).round() as u64).max(1)
}

/// Aggregated trend data. Count/sum/min/max are exact; percentiles come from the histogram.
#[derive(Debug, Clone)]
pub struct TrendState {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    hist: Histogram<u64>,
}

impl Default for TrendState {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            hist: new_trend_histogram(),
        }
    }
}

impl TrendState {
    pub(crate) fn observe(&mut self, value: f64) {
        let value = if value.is_finite() { value.max(0.0) } else { 0.0 };
        self.count = self.count.saturating_add(1);
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.hist.saturating_record(scale(value));
    }

    pub fn merge(&mut self, other: &TrendState) {
        if other.count == 0 {
            return;
        }
        self.count = self.count.saturating_add(other.count);
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        // Same bounds on both sides, so the addition cannot go out of range.
        let _ = self.hist.add(&other.hist);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }

    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Nearest-rank percentile, `p` in `[0, 100]`.
    ///
    /// Relative error is bounded by the histogram precision (3 significant digits, i.e. ≤ 0.1%)
    /// for values in `[1 / TREND_SCALE, TREND_MAX]`. Results are clamped to the exact min/max.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.count == 0 || !(0.0..=100.0).contains(&p) {
            return None;
        }
        let raw = self.hist.value_at_quantile(p / 100.0) as f64 / TREND_SCALE;
        Some(raw.clamp(self.min, self.max))
    }

    pub fn stdev(&self) -> Option<f64> {
        (self.count > 0).then(|| self.hist.stdev() / TREND_SCALE)
    }
}

/// Copy-out view of one metric (one series, or several folded together).
#[derive(Debug, Clone)]
pub enum MetricState {
    Counter { total: u64 },
    Gauge { value: i64 },
    Rate { hits: u64, total: u64 },
    Trend(TrendState),
}

impl MetricState {
    pub fn empty(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter { total: 0 },
            MetricKind::Gauge => Self::Gauge { value: 0 },
            MetricKind::Rate => Self::Rate { hits: 0, total: 0 },
            MetricKind::Trend => Self::Trend(TrendState::default()),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter { .. } => MetricKind::Counter,
            Self::Gauge { .. } => MetricKind::Gauge,
            Self::Rate { .. } => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    /// Folds `other` into `self`. Gauges of several series add up.
    pub fn merge(&mut self, other: &MetricState) {
        match (self, other) {
            (Self::Counter { total }, Self::Counter { total: t }) => {
                *total = total.saturating_add(*t);
            }
            (Self::Gauge { value }, Self::Gauge { value: v }) => {
                *value = value.saturating_add(*v);
            }
            (Self::Rate { hits, total }, Self::Rate { hits: h, total: t }) => {
                *hits = hits.saturating_add(*h);
                *total = total.saturating_add(*t);
            }
            (Self::Trend(a), Self::Trend(b)) => a.merge(b),
            _ => {}
        }
    }

    /// Fraction of hits; `None` when nothing was recorded.
    pub fn rate(&self) -> Option<f64> {
        match self {
            Self::Rate { hits, total } if *total > 0 => Some(*hits as f64 / *total as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct RateCell {
    hits: AtomicU64,
    total: AtomicU64,
}

#[derive(Debug)]
pub(crate) enum MetricStorage {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Rate(Arc<RateCell>),
    Trend(Arc<Mutex<TrendState>>),
}

impl MetricStorage {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(Arc::new(AtomicU64::new(0))),
            MetricKind::Gauge => Self::Gauge(Arc::new(AtomicI64::new(0))),
            MetricKind::Rate => Self::Rate(Arc::new(RateCell::default())),
            MetricKind::Trend => Self::Trend(Arc::new(Mutex::new(TrendState::default()))),
        }
    }

    pub(crate) fn handle(&self) -> MetricHandle {
        match self {
            Self::Counter(a) => MetricHandle::Counter(a.clone()),
            Self::Gauge(a) => MetricHandle::Gauge(a.clone()),
            Self::Rate(a) => MetricHandle::Rate(a.clone()),
            Self::Trend(a) => MetricHandle::Trend(a.clone()),
        }
    }

    pub(crate) fn state(&self) -> MetricState {
        match self {
            Self::Counter(a) => MetricState::Counter {
                total: a.load(Ordering::Relaxed),
            },
            Self::Gauge(a) => MetricState::Gauge {
                value: a.load(Ordering::Relaxed),
            },
            Self::Rate(r) => {
                // Load `total` first: a concurrent writer bumps hits before total, so this order
                // can only ever under-report hits, never produce hits > total.
                let total = r.total.load(Ordering::Acquire);
                let hits = r.hits.load(Ordering::Acquire).min(total);
                MetricState::Rate { hits, total }
            }
            Self::Trend(t) => MetricState::Trend(t.lock().clone()),
        }
    }
}

/// Cached write handle for one series; cheap to clone.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Rate(Arc<RateCell>),
    Trend(Arc<Mutex<TrendState>>),
}

impl MetricHandle {
    /// Applies one sample value according to the series kind:
    /// counters add (rounded, negatives ignored), gauges store, rates count a hit for any
    /// non-zero value, trends observe.
    #[inline]
    pub fn record(&self, value: f64) {
        match self {
            Self::Counter(_) => self.increment(value.max(0.0).round() as u64),
            Self::Gauge(_) => self.set_gauge(value as i64),
            Self::Rate(_) => self.add_rate(value != 0.0),
            Self::Trend(_) => self.observe(value),
        }
    }

    #[inline]
    pub fn increment(&self, value: u64) {
        if let Self::Counter(c) = self {
            c.fetch_add(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn set_gauge(&self, value: i64) {
        if let Self::Gauge(g) = self {
            g.store(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_gauge(&self, delta: i64) -> i64 {
        match self {
            Self::Gauge(g) => g.fetch_add(delta, Ordering::Relaxed).saturating_add(delta),
            _ => 0,
        }
    }

    #[inline]
    pub fn max_gauge(&self, value: i64) {
        if let Self::Gauge(g) = self {
            g.fetch_max(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_rate(&self, hit: bool) {
        if let Self::Rate(r) = self {
            if hit {
                r.hits.fetch_add(1, Ordering::Release);
            }
            r.total.fetch_add(1, Ordering::Release);
        }
    }

    #[inline]
    pub fn observe(&self, value: f64) {
        if let Self::Trend(t) = self {
            t.lock().observe(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trend_of(values: impl IntoIterator<Item = f64>) -> TrendState {
        let mut t = TrendState::default();
        for v in values {
            t.observe(v);
        }
        t
    }

    #[test]
    fn empty_trend_has_no_stats() {
        let t = TrendState::default();
        assert_eq!(t.count(), 0);
        assert!(t.min().is_none());
        assert!(t.max().is_none());
        assert!(t.avg().is_none());
        assert!(t.percentile(95.0).is_none());
    }

    #[test]
    fn percentile_of_one_to_hundred_is_nearest_rank_within_bound() {
        let t = trend_of((1..=100).map(f64::from));

        for (p, expected) in [(50.0, 50.0), (90.0, 90.0), (95.0, 95.0), (99.0, 99.0)] {
            let got = t.percentile(p).unwrap_or_else(|| panic!("p({p}) missing"));
            assert!(
                (got - expected).abs() <= expected * 0.001,
                "p({p}) = {got}, expected {expected} ±0.1%"
            );
        }
        assert_eq!(t.percentile(100.0), Some(100.0));
        assert_eq!(t.min(), Some(1.0));
        assert_eq!(t.max(), Some(100.0));
        assert_eq!(t.avg(), Some(50.5));
    }

    #[test]
    fn percentile_rejects_out_of_range_requests() {
        let t = trend_of([1.0, 2.0]);
        assert!(t.percentile(-1.0).is_none());
        assert!(t.percentile(100.5).is_none());
    }

    #[test]
    fn merge_combines_exact_aggregates() {
        let mut a = trend_of([10.0, 20.0]);
        let b = trend_of([5.0, 40.0]);
        a.merge(&b);
        assert_eq!(a.count(), 4);
        assert_eq!(a.min(), Some(5.0));
        assert_eq!(a.max(), Some(40.0));
        assert_eq!(a.avg(), Some(18.75));
    }

    #[test]
    fn handle_record_dispatches_on_kind() {
        let counter = MetricStorage::new(MetricKind::Counter);
        counter.handle().record(2.0);
        counter.handle().record(-5.0);
        assert!(matches!(counter.state(), MetricState::Counter { total: 2 }));

        let gauge = MetricStorage::new(MetricKind::Gauge);
        gauge.handle().record(7.0);
        gauge.handle().max_gauge(3);
        assert!(matches!(gauge.state(), MetricState::Gauge { value: 7 }));

        let rate = MetricStorage::new(MetricKind::Rate);
        rate.handle().record(1.0);
        rate.handle().record(0.0);
        rate.handle().record(0.0);
        rate.handle().record(0.0);
        let state = rate.state();
        assert_eq!(state.rate(), Some(0.25));
    }

    #[test]
    fn rate_state_without_samples_has_no_rate() {
        assert_eq!(MetricState::empty(MetricKind::Rate).rate(), None);
    }
}
