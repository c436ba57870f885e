use std::time::Duration;

/// Single rounded component in one of us, ms, s, m.
pub(crate) fn format_duration(d: Duration) -> String {
    let total_us = d.as_micros();

    fn round_div(value: u128, unit: u128) -> u128 {
        (value + (unit / 2)) / unit
    }

    if total_us >= 60_000_000 && total_us % 60_000_000 == 0 {
        return format!("{}m", total_us / 60_000_000);
    }
    if total_us >= 1_000_000 {
        return format!("{}s", round_div(total_us, 1_000_000));
    }
    if total_us >= 1_000 {
        return format!("{}ms", round_div(total_us, 1_000));
    }
    format!("{total_us}us")
}

/// Trend values are milliseconds.
pub(crate) fn format_ms(v: Option<f64>) -> String {
    match v {
        Some(v) if v.is_finite() && v >= 1_000.0 => format!("{:.2}s", v / 1_000.0),
        Some(v) if v.is_finite() => format!("{v:.2}ms"),
        _ => "-".to_string(),
    }
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.0}")
    } else {
        "0".to_string()
    }
}

pub(crate) fn format_percent(v: Option<f64>) -> String {
    match v {
        Some(v) if v.is_finite() => format!("{:.2}%", v * 100.0),
        _ => "-".to_string(),
    }
}
