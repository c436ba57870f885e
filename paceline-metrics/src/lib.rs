pub mod collector;
pub mod error;
pub mod series;

pub use collector::Collector;
pub use error::{Error, Result};
pub use series::{
    MetricKind, RateSeries, RateSnapshot, SeriesHandle, SeriesSnapshot, SeriesValues,
    TrendSeries, TrendSnapshot,
};
