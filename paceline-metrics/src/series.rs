use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    /// Boolean observations, exposed as the fraction that were `true`.
    Rate,
    /// Numeric samples, exposed as order statistics.
    Trend,
}

#[derive(Debug, Default)]
pub struct RateSeries {
    total: AtomicU64,
    hits: AtomicU64,
}

impl RateSeries {
    #[inline]
    pub fn add(&self, value: bool) {
        // `hits` first so a concurrent reader never sees hits > total.
        if value {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Release);
    }

    pub fn snapshot(&self) -> RateSnapshot {
        let total = self.total.load(Ordering::Acquire);
        let hits = self.hits.load(Ordering::Relaxed).min(total);
        RateSnapshot { total, hits }
    }
}

#[derive(Debug, Default)]
pub struct TrendSeries {
    // Append-only; the lock is held for a single push.
    samples: Mutex<Vec<f64>>,
}

impl TrendSeries {
    #[inline]
    pub fn add(&self, value: f64) {
        self.samples.lock().push(value);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> TrendSnapshot {
        let mut sorted = self.samples.lock().clone();
        sorted.sort_unstable_by(f64::total_cmp);
        TrendSnapshot::from_sorted(sorted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSnapshot {
    pub total: u64,
    pub hits: u64,
}

impl RateSnapshot {
    /// Fraction of `true` observations; `None` when nothing was observed.
    pub fn rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.hits as f64 / self.total as f64)
    }

    pub fn misses(&self) -> u64 {
        self.total.saturating_sub(self.hits)
    }
}

/// Immutable view of a Trend series at one point in time.
///
/// Percentiles use the nearest-rank method over the exact sample set:
/// `rank = ceil(p * n / 100)`, clamped to `1..=n`. `p(0)` is the minimum and `p(100)` the
/// maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendSnapshot {
    sorted: Arc<[f64]>,
    sum: f64,
}

impl TrendSnapshot {
    fn from_sorted(sorted: Vec<f64>) -> Self {
        let sum = sorted.iter().sum();
        Self {
            sorted: Arc::from(sorted),
            sum,
        }
    }

    pub fn count(&self) -> u64 {
        self.sorted.len() as u64
    }

    pub fn min(&self) -> Option<f64> {
        self.sorted.first().copied()
    }

    pub fn max(&self) -> Option<f64> {
        self.sorted.last().copied()
    }

    pub fn mean(&self) -> Option<f64> {
        (!self.sorted.is_empty()).then(|| self.sum / self.sorted.len() as f64)
    }

    pub fn median(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    pub fn percentile(&self, p: f64) -> Option<f64> {
        let n = self.sorted.len();
        if n == 0 || !(0.0..=100.0).contains(&p) {
            return None;
        }

        let idx = nearest_rank(p, n).clamp(1, n) - 1;
        self.sorted.get(idx).copied()
    }
}

/// `ceil(p * n / 100)` without floating-point noise turning an exact rank into the next one.
fn nearest_rank(p: f64, n: usize) -> usize {
    if p.fract() == 0.0 {
        let scaled = p as u64 * n as u64;
        return scaled.div_ceil(100) as usize;
    }

    let x = p * n as f64 / 100.0;
    let nearest = x.round();
    if (x - nearest).abs() <= 1e-9 * nearest.max(1.0) {
        nearest as usize
    } else {
        x.ceil() as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValues {
    Rate(RateSnapshot),
    Trend(TrendSnapshot),
}

impl SeriesValues {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    /// Number of observations appended to the series.
    pub fn count(&self) -> u64 {
        match self {
            Self::Rate(r) => r.total,
            Self::Trend(t) => t.count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub name: String,
    pub values: SeriesValues,
}

impl SeriesSnapshot {
    pub fn kind(&self) -> MetricKind {
        self.values.kind()
    }
}

#[derive(Debug)]
pub(crate) enum SeriesStorage {
    Rate(Arc<RateSeries>),
    Trend(Arc<TrendSeries>),
}

impl SeriesStorage {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Rate => Self::Rate(Arc::new(RateSeries::default())),
            MetricKind::Trend => Self::Trend(Arc::new(TrendSeries::default())),
        }
    }

    pub(crate) fn kind(&self) -> MetricKind {
        match self {
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    pub(crate) fn handle(&self) -> SeriesHandle {
        match self {
            Self::Rate(r) => SeriesHandle::Rate(r.clone()),
            Self::Trend(t) => SeriesHandle::Trend(t.clone()),
        }
    }

    pub(crate) fn snapshot(&self) -> SeriesValues {
        match self {
            Self::Rate(r) => SeriesValues::Rate(r.snapshot()),
            Self::Trend(t) => SeriesValues::Trend(t.snapshot()),
        }
    }
}

/// Write handle to a single series, cheap to clone and usable without touching the
/// collector's map again.
#[derive(Debug, Clone)]
pub enum SeriesHandle {
    Rate(Arc<RateSeries>),
    Trend(Arc<TrendSeries>),
}
