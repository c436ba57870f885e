use crate::series::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("metric `{name}` is a {existing} series, cannot record a {requested} observation")]
    KindMismatch {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("metric `{name}`: trend samples must be finite (got {value})")]
    NonFiniteSample { name: String, value: f64 },
}
