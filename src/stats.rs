//! Small numeric helpers shared by the engines.
//!
//! Each helper returns `None` when the statistic is undefined for its input
//! (empty slice, fewer than two values for a sample deviation), leaving the
//! caller to pick the substitution.

use ndarray::{aview1, Array1};
use ndarray_stats::interpolate::Linear;
use ndarray_stats::Quantile1dExt;
use noisy_float::types::{n64, N64};
use polars::prelude::{mode as polars_mode, NamedFrom, Series};

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> Option<f64> {
    aview1(values).mean()
}

/// Sample standard deviation (n - 1 denominator).
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    Some(aview1(values).std(1.0))
}

/// Quantile with linear interpolation between the closest ranks.
/// Undefined when any value is not finite.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if !(0.0..=1.0).contains(&q) {
        return None;
    }
    let finite: Option<Vec<N64>> = values
        .iter()
        .map(|&v| if v.is_finite() { Some(n64(v)) } else { None })
        .collect();
    let mut data = Array1::from(finite?);
    data.quantile_mut(n64(q), &Linear).ok().map(N64::raw)
}

/// Most frequent value; ties resolve to the lexicographically smallest.
pub fn mode<'a>(values: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let values: Vec<&str> = values.into_iter().collect();
    if values.is_empty() {
        return None;
    }
    let modes = polars_mode::mode(&Series::new("values", values)).ok()?;
    let modes = modes.str().ok()?;
    modes.into_iter().flatten().min().map(str::to_string)
}

/// Round half away from zero to `decimals` places. Negative zero becomes 0.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor + 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Option<f64>, b: f64) -> bool {
        a.map_or(false, |a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn test_mean_and_std() {
        assert_eq!(mean(&[]), None);
        assert!(close(mean(&[1.0, 2.0, 3.0]), 2.0));

        assert_eq!(sample_std(&[5.0]), None);
        let std = sample_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((std - 2.138_089_935).abs() < 1e-6);
        assert!(close(sample_std(&[3.0, 3.0, 3.0]), 0.0));
    }

    #[test]
    fn test_quantile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0];
        assert!(close(quantile(&values, 0.0), 1.0));
        assert!(close(quantile(&values, 1.0), 4.0));
        assert!(close(quantile(&values, 0.75), 3.25));
        assert!(close(quantile(&values, 0.25), 1.75));
        assert!(close(quantile(&values, 0.5), 2.5));
        assert_eq!(quantile(&[], 0.5), None);
        assert_eq!(quantile(&values, 1.5), None);
        assert_eq!(quantile(&[1.0, f64::INFINITY], 0.5), None);
    }

    #[test]
    fn test_mode_ties_pick_smallest() {
        assert_eq!(mode(["Tech", "Music", "Tech", "Music"]), Some("Music".to_string()));
        assert_eq!(mode(["Gaming", "Vlog", "Vlog"]), Some("Vlog".to_string()));
        assert_eq!(mode(["Solo"]), Some("Solo".to_string()));
        assert_eq!(mode(Vec::<&str>::new()), None);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(33.333_33, 1), 33.3);
        assert_eq!(round_to(2.675_1, 2), 2.68);
        assert_eq!(round_to(-12.25, 0), -12.0);
        assert!(round_to(-0.0, 2).is_sign_positive());
        assert!(round_to(-0.001, 2).is_sign_positive());
    }
}
