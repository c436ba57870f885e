use ahash::RandomState;
use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::series::{MetricKind, SeriesHandle, SeriesSnapshot, SeriesStorage};

/// Run-scoped store of named Rate and Trend series.
///
/// Series are created on first use and their kind is fixed from then on. Appends are safe
/// from any number of concurrent tasks; the map itself is only locked long enough to look a
/// series up (or insert it), never while a sample is being written.
#[derive(Debug, Default)]
pub struct Collector {
    series: DashMap<String, SeriesStorage, RandomState>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up (or create) the series `name` with the given kind.
    pub fn handle(&self, name: &str, kind: MetricKind) -> Result<SeriesHandle> {
        if let Some(existing) = self.series.get(name) {
            return checked_handle(name, existing.value(), kind);
        }

        let entry = self
            .series
            .entry(name.to_string())
            .or_insert_with(|| SeriesStorage::new(kind));
        checked_handle(name, entry.value(), kind)
    }

    pub fn record_rate(&self, name: &str, value: bool) -> Result<()> {
        if let SeriesHandle::Rate(r) = self.handle(name, MetricKind::Rate)? {
            r.add(value);
        }
        Ok(())
    }

    pub fn record_trend(&self, name: &str, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(Error::NonFiniteSample {
                name: name.to_string(),
                value,
            });
        }

        if let SeriesHandle::Trend(t) = self.handle(name, MetricKind::Trend)? {
            t.add(value);
        }
        Ok(())
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.series.get(name).map(|s| s.value().kind())
    }

    pub fn snapshot(&self, name: &str) -> Option<SeriesSnapshot> {
        self.series.get(name).map(|s| SeriesSnapshot {
            name: name.to_string(),
            values: s.value().snapshot(),
        })
    }

    /// Snapshot of every series, sorted by name.
    pub fn snapshot_all(&self) -> Vec<SeriesSnapshot> {
        let mut out: Vec<SeriesSnapshot> = self
            .series
            .iter()
            .map(|entry| SeriesSnapshot {
                name: entry.key().clone(),
                values: entry.value().snapshot(),
            })
            .collect();

        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

fn checked_handle(name: &str, storage: &SeriesStorage, wanted: MetricKind) -> Result<SeriesHandle> {
    let existing = storage.kind();
    if existing != wanted {
        return Err(Error::KindMismatch {
            name: name.to_string(),
            existing,
            requested: wanted,
        });
    }
    Ok(storage.handle())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::SeriesValues;
    use std::sync::Arc;

    #[test]
    fn series_created_lazily_with_fixed_kind() {
        let c = Collector::new();
        assert!(c.is_empty());

        c.record_rate("AddProduceOK", true)
            .unwrap_or_else(|e| panic!("record_rate: {e}"));
        assert_eq!(c.kind_of("AddProduceOK"), Some(MetricKind::Rate));

        let err = match c.record_trend("AddProduceOK", 1.0) {
            Ok(()) => panic!("expected kind mismatch"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            Error::KindMismatch {
                existing: MetricKind::Rate,
                requested: MetricKind::Trend,
                ..
            }
        ));
    }

    #[test]
    fn rate_on_a_trend_series_is_rejected_without_recording() {
        let c = Collector::new();
        c.record_trend("AddProduceTiming", 12.5)
            .unwrap_or_else(|e| panic!("record_trend: {e}"));

        let err = match c.record_rate("AddProduceTiming", true) {
            Ok(()) => panic!("expected kind mismatch"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            Error::KindMismatch {
                existing: MetricKind::Trend,
                requested: MetricKind::Rate,
                ..
            }
        ));
        match c.snapshot("AddProduceTiming").map(|s| s.values) {
            Some(SeriesValues::Trend(t)) => assert_eq!(t.count(), 1),
            other => panic!("unexpected snapshot: {other:?}"),
        }
    }

    #[test]
    fn non_finite_trend_samples_are_rejected() {
        let c = Collector::new();
        assert!(c.record_trend("t", f64::NAN).is_err());
        assert!(c.record_trend("t", f64::INFINITY).is_err());
        assert!(c.snapshot("t").is_none());
    }

    #[test]
    fn snapshot_is_idempotent() {
        let c = Collector::new();
        for v in [5.0, 1.0, 3.0] {
            c.record_trend("lat", v)
                .unwrap_or_else(|e| panic!("record_trend: {e}"));
        }
        c.record_rate("ok", false)
            .unwrap_or_else(|e| panic!("record_rate: {e}"));

        let first = c.snapshot_all();
        let second = c.snapshot_all();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].name, "lat");
        assert_eq!(first[1].name, "ok");
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        let c = Arc::new(Collector::new());
        let threads = 8;
        let per_thread = 2_000;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let c = c.clone();
                std::thread::spawn(move || {
                    for i in 0..per_thread {
                        let _ = c.record_rate("ok", (i + t) % 2 == 0);
                        let _ = c.record_trend("lat", i as f64);
                    }
                })
            })
            .collect();
        for h in handles {
            if h.join().is_err() {
                panic!("writer thread panicked");
            }
        }

        let expected = (threads * per_thread) as u64;
        match c.snapshot("ok").map(|s| s.values) {
            Some(SeriesValues::Rate(r)) => {
                assert_eq!(r.total, expected);
                assert_eq!(r.hits, expected / 2);
            }
            other => panic!("unexpected rate snapshot: {other:?}"),
        }
        match c.snapshot("lat").map(|s| s.values) {
            Some(SeriesValues::Trend(t)) => assert_eq!(t.count(), expected),
            other => panic!("unexpected trend snapshot: {other:?}"),
        }
    }
}
