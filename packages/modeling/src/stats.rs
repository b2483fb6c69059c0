//! Descriptive statistics over `f64` slices, backed by `statrs`.
//!
//! Empty inputs produce `NaN` rather than an error: an empty bin is a
//! normal outcome of the aggregators.

use statrs::statistics::{Data, OrderStatistics as _, Statistics as _};

/// Arithmetic mean, or `NaN` for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    values.iter().mean()
}

/// Median, averaging the two middle values for even lengths. `NaN` for an
/// empty slice.
#[must_use]
pub fn median(values: &[f64]) -> f64 {
    quantile(values, 0.5)
}

/// Quantile with linear interpolation between order statistics (the
/// "type 7" definition pandas uses). `NaN` for an empty slice.
///
/// `statrs`' own `quantile` is the median-unbiased type 8 estimator, so
/// the interpolation is done here over its order statistics.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() || !(0.0..=1.0).contains(&q) {
        return f64::NAN;
    }

    let mut data = Data::new(values.to_vec());
    let pos = q * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;

    // order statistics are 1-based
    let lower = data.order_statistic(lo + 1);
    if hi == lo {
        return lower;
    }
    let upper = data.order_statistic(hi + 1);

    (pos - lo as f64).mul_add(upper - lower, lower)
}

/// Population standard deviation (zero degrees of freedom). `NaN` for an
/// empty slice.
#[must_use]
pub fn std_dev(values: &[f64]) -> f64 {
    values.iter().population_std_dev()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_odd_and_even() {
        assert!((median(&[3.0, 1.0, 2.0]) - 2.0).abs() < f64::EPSILON);
        assert!((median(&[4.0, 1.0, 2.0, 3.0]) - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_inputs_are_nan() {
        assert!(mean(&[]).is_nan());
        assert!(median(&[]).is_nan());
        assert!(std_dev(&[]).is_nan());
    }

    #[test]
    fn quantiles_interpolate() {
        let v = [5.0, 1.0, 4.0, 2.0, 3.0];
        assert!((quantile(&v, 0.25) - 2.0).abs() < f64::EPSILON);
        assert!((quantile(&[1.0, 2.0, 3.0, 4.0], 0.25) - 1.75).abs() < 1e-12);
        assert!((quantile(&v, 1.0) - 5.0).abs() < f64::EPSILON);
        assert!(quantile(&v, 1.5).is_nan());
    }

    #[test]
    fn single_value() {
        assert!((quantile(&[7.0], 0.75) - 7.0).abs() < f64::EPSILON);
        assert!(std_dev(&[7.0]).abs() < f64::EPSILON);
    }

    #[test]
    fn population_std() {
        assert!((std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-12);
    }
}
