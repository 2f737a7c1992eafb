/// Pairwise relative change between consecutive values.
///
/// A zero previous value yields a zero return rather than dividing by zero.
pub fn calculate_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|pair| {
            if pair[0] == 0.0 {
                0.0
            } else {
                (pair[1] - pair[0]) / pair[0]
            }
        })
        .collect()
}

/// Percentage change over `lookback` steps back from the end of the series.
///
/// `None` when the series is too short or the reference value is zero.
pub fn calculate_momentum(values: &[f64], lookback: usize) -> Option<f64> {
    if lookback == 0 || values.len() < lookback + 1 {
        return None;
    }

    let last = values[values.len() - 1];
    let reference = values[values.len() - 1 - lookback];

    if reference == 0.0 {
        return None;
    }

    Some((last - reference) / reference * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns() {
        let returns = calculate_returns(&[100.0, 110.0, 99.0]);
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - 0.1).abs() < 1e-12);
        assert!((returns[1] - (-0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_returns_zero_previous_value() {
        let returns = calculate_returns(&[0.0, 5.0, 10.0]);
        assert_eq!(returns[0], 0.0);
        assert!((returns[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_returns_empty_and_single() {
        assert!(calculate_returns(&[]).is_empty());
        assert!(calculate_returns(&[1.0]).is_empty());
    }

    #[test]
    fn test_momentum() {
        let momentum = calculate_momentum(&[100.0, 105.0, 110.0], 2).unwrap();
        assert!((momentum - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_momentum_insufficient_length() {
        assert!(calculate_momentum(&[100.0, 110.0], 2).is_none());
    }

    #[test]
    fn test_momentum_zero_reference() {
        assert!(calculate_momentum(&[0.0, 100.0, 110.0], 2).is_none());
    }
}
