use crate::config::StdDevKind;

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Computes the standard deviation given a pre-computed mean.
///
/// Returns 0.0 for fewer than two values, for both population and sample
/// deviation, so a single observation never yields NaN.
pub fn stddev(values: &[f64], mean: f64, kind: StdDevKind) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let divisor = match kind {
        StdDevKind::Population => values.len() as f64,
        StdDevKind::Sample => (values.len() - 1) as f64,
    };
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / divisor;

    variance.sqrt()
}

/// Linearly interpolated percentile of already sorted values.
///
/// `rank` is in `[0, 100]`. Returns 0.0 for empty input.
pub fn percentile(sorted: &[f64], rank: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let position = (rank / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = position.floor() as usize;
            let upper = position.ceil() as usize;
            let weight = position - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

pub fn median(sorted: &[f64]) -> f64 {
    percentile(sorted, 50.0)
}
