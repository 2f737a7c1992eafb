/// Calculate the population standard deviation (divide by N).
///
/// Undefined for fewer than two samples.
pub fn calculate_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    Some(variance.sqrt())
}

/// Standard deviation of each sliding window of size `window`, one output
/// per valid window start.
pub fn rolling_std_dev(values: &[f64], window: usize) -> Vec<f64> {
    if window < 2 || values.len() < window {
        return Vec::new();
    }

    values
        .windows(window)
        .filter_map(calculate_std_dev)
        .collect()
}
