//! Small numerical helpers shared by all analysis stages.
use kahan::KahanSummator;

use crate::error::{DfError, DfResult};
use nalgebra::DVector;

#[must_use]
pub const fn usize_to_f64(value: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let newval = value as f64;
    newval
}

#[must_use]
pub const fn f64_to_usize(value: f64) -> usize {
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    let newval = value as usize;
    newval
}

/// Creates a linearly spaced Vector from start to end with `num` points
///
/// # Errors
/// This function will return an error if `num` is smaller than 2 or if the borders are not finite.
pub fn linspace(start: f64, end: f64, num: usize) -> DfResult<DVector<f64>> {
    if num < 2 {
        return Err(DfError::Signal(
            "linspace needs at least two points".into(),
        ));
    }
    if !start.is_finite() || !end.is_finite() {
        return Err(DfError::Signal("linspace borders must be finite".into()));
    }
    let step = (end - start) / usize_to_f64(num - 1);
    Ok(DVector::from_fn(num, |i, _| {
        if i == num - 1 {
            end
        } else {
            usize_to_f64(i).mul_add(step, start)
        }
    }))
}

/// Compensated sum of the given values.
#[must_use]
pub fn kahan_sum(values: &[f64]) -> f64 {
    values.iter().kahan_sum().sum()
}

/// Arithmetic mean of the finite values. Returns `None` if there are no finite values.
#[must_use]
pub fn finite_mean(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        None
    } else {
        Some(kahan_sum(&finite) / usize_to_f64(finite.len()))
    }
}

/// Median of the finite values. Returns `None` if there are no finite values.
#[must_use]
pub fn finite_median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_unstable_by(f64::total_cmp);
    let mid = finite.len() / 2;
    if finite.len() % 2 == 0 {
        Some(0.5 * (finite[mid - 1] + finite[mid]))
    } else {
        Some(finite[mid])
    }
}

/// Trapezoidal integral of equally spaced samples with unit spacing.
#[must_use]
pub fn trapz(values: &[f64]) -> f64 {
    let pairs: Vec<f64> = values.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();
    kahan_sum(&pairs)
}

/// Index of the largest value. NaN values are ignored, the first index wins on ties.
#[must_use]
pub fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, v)| match best {
            Some((_, b)) if b >= *v => best,
            _ => Some((i, *v)),
        })
        .map(|(i, _)| i)
}

/// Index of the smallest value. NaN values are ignored, the first index wins on ties.
#[must_use]
pub fn argmin(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, v)| match best {
            Some((_, b)) if b <= *v => best,
            _ => Some((i, *v)),
        })
        .map(|(i, _)| i)
}

/// Index of the axis value closest to `value`.
///
/// Returns 0 for an empty axis.
#[must_use]
pub fn nearest_index(axis: &[f64], value: f64) -> usize {
    let distances: Vec<f64> = axis.iter().map(|x| (x - value).abs()).collect();
    argmin(&distances).unwrap_or_default()
}

/// One-dimensional linear interpolation on an ascending axis.
///
/// Values outside the axis are clamped to the first / last sample.
/// Returns NaN for empty input.
#[must_use]
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len().min(fp.len());
    if n == 0 {
        return f64::NAN;
    }
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }
    let upper = xp[..n].partition_point(|v| *v <= x);
    let lower = upper - 1;
    let dx = xp[upper] - xp[lower];
    if dx == 0.0 {
        return fp[lower];
    }
    let frac = (x - xp[lower]) / dx;
    frac.mul_add(fp[upper] - fp[lower], fp[lower])
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn usize_to_f64_test() {
        assert_eq!(usize_to_f64(0), 0.0);
        assert_eq!(usize_to_f64(42), 42.0);
    }
    #[test]
    fn f64_to_usize_test() {
        assert_eq!(f64_to_usize(2.9), 2);
        assert_eq!(f64_to_usize(-1.0), 0);
    }
    #[test]
    fn linspace_test() {
        assert!(linspace(0.0, 1.0, 1).is_err());
        assert!(linspace(f64::NAN, 1.0, 3).is_err());
        let l = linspace(-2.7, 2.7, 11).unwrap();
        assert_eq!(l.len(), 11);
        assert_abs_diff_eq!(l[0], -2.7);
        assert_abs_diff_eq!(l[5], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(l[10], 2.7);
    }
    #[test]
    fn mean_and_median() {
        assert_eq!(finite_mean(&[]), None);
        assert_eq!(finite_mean(&[f64::NAN]), None);
        assert_abs_diff_eq!(finite_mean(&[1.0, f64::NAN, 3.0]).unwrap(), 2.0);
        assert_abs_diff_eq!(finite_median(&[5.0, 1.0, 3.0]).unwrap(), 3.0);
        assert_abs_diff_eq!(finite_median(&[4.0, 1.0, 3.0, 2.0]).unwrap(), 2.5);
    }
    #[test]
    fn trapz_test() {
        assert_eq!(trapz(&[]), 0.0);
        assert_eq!(trapz(&[1.0]), 0.0);
        assert_abs_diff_eq!(trapz(&[0.0, 1.0, 2.0]), 2.0);
    }
    #[test]
    fn arg_extrema() {
        assert_eq!(argmax(&[]), None);
        assert_eq!(argmax(&[f64::NAN, 1.0, 3.0, 3.0, 2.0]), Some(2));
        assert_eq!(argmin(&[4.0, 1.0, f64::NAN, 1.0]), Some(1));
        assert_eq!(nearest_index(&[400.0, 401.0, 402.0], 401.4), 1);
        assert_eq!(nearest_index(&[], 401.4), 0);
    }
    #[test]
    fn interp_test() {
        let xp = [0.0, 1.0, 2.0];
        let fp = [0.0, 10.0, 30.0];
        assert_abs_diff_eq!(interp(-1.0, &xp, &fp), 0.0);
        assert_abs_diff_eq!(interp(0.5, &xp, &fp), 5.0);
        assert_abs_diff_eq!(interp(1.5, &xp, &fp), 20.0);
        assert_abs_diff_eq!(interp(3.0, &xp, &fp), 30.0);
        assert!(interp(1.0, &[], &[]).is_nan());
    }
}
