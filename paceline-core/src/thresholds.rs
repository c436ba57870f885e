use paceline_metrics::MetricKind;

use crate::error::{Error, Result};

/// Raw threshold expressions for one metric, as written in a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdSet {
    pub metric: String,
    pub expressions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ThresholdOp {
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Gte,
    #[strum(serialize = "==")]
    Eq,
}

impl ThresholdOp {
    pub fn holds(self, observed: f64, bound: f64) -> bool {
        match self {
            Self::Lt => observed < bound,
            Self::Lte => observed <= bound,
            Self::Gt => observed > bound,
            Self::Gte => observed >= bound,
            Self::Eq => observed == bound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Rate,
    Count,
    Avg,
    Min,
    Max,
    Med,
    P(f64),
}

impl ThresholdAgg {
    /// Metric kind the aggregation applies to; `None` for kind-agnostic aggregations.
    pub fn required_kind(self) -> Option<MetricKind> {
        match self {
            Self::Rate => Some(MetricKind::Rate),
            Self::Count => None,
            Self::Avg | Self::Min | Self::Max | Self::Med | Self::P(_) => Some(MetricKind::Trend),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    /// Bound in the metric's native unit (milliseconds for durations).
    pub value: f64,
}

/// One parsed threshold bound to a metric, keeping its source text for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub source: String,
    pub expr: ThresholdExpr,
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("invalid threshold (missing operator): {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold: {raw}"));
    }

    let agg = parse_agg(left).ok_or_else(|| {
        format!("unknown aggregation `{left}` in threshold: {raw}")
    })??;

    let value = parse_bound(right, agg).map_err(|e| format!("{e} in threshold: {raw}"))?;

    Ok(ThresholdExpr { agg, op, value })
}

fn parse_agg(left: &str) -> Option<std::result::Result<ThresholdAgg, String>> {
    let lower = left.to_ascii_lowercase();
    let agg = match lower.as_str() {
        "rate" => ThresholdAgg::Rate,
        "count" => ThresholdAgg::Count,
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        _ => {
            let inner = lower.strip_prefix("p(")?.strip_suffix(')')?;
            let p: f64 = match inner.parse() {
                Ok(p) => p,
                Err(_) => return Some(Err(format!("invalid percentile `{inner}`"))),
            };
            if !(0.0..=100.0).contains(&p) {
                return Some(Err(format!("percentile {p} out of range")));
            }
            ThresholdAgg::P(p)
        }
    };
    Some(Ok(agg))
}

/// Parse the right-hand bound; duration suffixes are normalized to milliseconds.
fn parse_bound(right: &str, agg: ThresholdAgg) -> std::result::Result<f64, String> {
    let split = right
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(right.len());
    let (number, unit) = right.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid numeric value `{number}`"))?;
    if !value.is_finite() {
        return Err(format!("invalid numeric value `{number}`"));
    }

    if unit.is_empty() {
        return Ok(value);
    }
    if agg.required_kind() != Some(MetricKind::Trend) {
        return Err(format!("unit `{unit}` is only allowed for trend aggregations"));
    }

    match unit {
        "us" | "µs" => Ok(value / 1_000.0),
        "ms" => Ok(value),
        "s" => Ok(value * 1_000.0),
        "m" => Ok(value * 60_000.0),
        other => Err(format!("unknown unit `{other}`")),
    }
}

/// Parse every expression of every set; the first malformed one aborts the whole plan.
pub fn parse_thresholds(sets: &[ThresholdSet]) -> Result<Vec<Threshold>> {
    let mut out = Vec::new();
    for set in sets {
        if set.expressions.is_empty() {
            return Err(Error::EmptyThresholds {
                metric: set.metric.clone(),
            });
        }
        for raw in &set.expressions {
            let expr =
                parse_threshold_expr(raw).map_err(|error| Error::InvalidThresholdExpr {
                    metric: set.metric.clone(),
                    error,
                })?;
            out.push(Threshold {
                metric: set.metric.clone(),
                source: raw.trim().to_string(),
                expr,
            });
        }
    }
    Ok(out)
}
