// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// Formula:
//   k       = 2 / (period + 1)
//   EMA_0   = value_0
//   EMA_t   = value_t * k + EMA_{t-1} * (1 - k)
//
// The series is seeded with the first input value rather than an SMA warm-up,
// so the output has exactly one element per input and early values lean
// toward the first price. Charts built on this feed depend on that seeding.
// =============================================================================

/// Compute the EMA series of `values` with look-back `period`.
///
/// The output has the same length as the input. A `period` of zero is treated
/// as one (identity series). Non-finite inputs propagate into the output.
pub fn calculate_ema(values: &[f64], period: usize) -> Vec<f64> {
    let Some((&first, rest)) = values.split_first() else {
        return Vec::new();
    };

    let k = smoothing_factor(period);

    let mut result = Vec::with_capacity(values.len());
    result.push(first);

    let mut prev = first;
    for &value in rest {
        let ema = value * k + prev * (1.0 - k);
        result.push(ema);
        prev = ema;
    }

    result
}

/// `2 / (period + 1)`, with `period` clamped to at least one.
pub fn smoothing_factor(period: usize) -> f64 {
    2.0 / (period.max(1) as f64 + 1.0)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_empty_input() {
        assert!(calculate_ema(&[], 5).is_empty());
    }

    #[test]
    fn ema_first_value_is_seed() {
        let ema = calculate_ema(&[42.0, 1.0, 2.0], 10);
        assert_eq!(ema.len(), 3);
        assert_eq!(ema[0], 42.0);
    }

    #[test]
    fn ema_period_one_is_identity() {
        let values = [3.0, 9.5, -1.0, 7.25, 100.0];
        assert_eq!(calculate_ema(&values, 1), values.to_vec());
    }

    #[test]
    fn ema_period_zero_behaves_like_one() {
        let values = [1.0, 5.0, 2.0];
        assert_eq!(calculate_ema(&values, 0), values.to_vec());
    }

    #[test]
    fn ema_known_values() {
        // period 3 => k = 0.5
        let ema = calculate_ema(&[10.0, 20.0, 30.0, 40.0], 3);
        let expected = [10.0, 15.0, 22.5, 31.25];
        for (a, b) in ema.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-12, "got {a}, expected {b}");
        }
    }

    #[test]
    fn ema_constant_series_is_constant() {
        let ema = calculate_ema(&[100.0; 50], 21);
        assert!(ema.iter().all(|v| (v - 100.0).abs() < 1e-9));
    }

    #[test]
    fn ema_nan_propagates() {
        let ema = calculate_ema(&[1.0, f64::NAN, 3.0], 3);
        assert_eq!(ema[0], 1.0);
        assert!(ema[1].is_nan());
        assert!(ema[2].is_nan());
    }

    #[test]
    fn smoothing_factor_values() {
        assert!((smoothing_factor(1) - 1.0).abs() < f64::EPSILON);
        assert!((smoothing_factor(3) - 0.5).abs() < f64::EPSILON);
        assert!((smoothing_factor(0) - 1.0).abs() < f64::EPSILON);
    }
}
