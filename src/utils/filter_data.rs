//! Functions for filtering and repairing data vectors.

use crate::error::{DfError, DfResult};
use crate::utils::math_utils::usize_to_f64;
use num::Float;

/// This method returns the minimum and maximum value of the provided values while ignoring non-finite values
///
/// # Returns
///
/// If successful, this method returns an Option containting the minimum and maximum value: Option<(min, max)>.
/// If `ax_vals` contains only non-finite values (inf, -inf, NaN), None is returned
#[must_use]
pub fn get_min_max_filter_nonfinite<T: Float>(ax_vals: &[T]) -> Option<(T, T)> {
    let (min, max) = ax_vals.iter().copied().filter(|x| x.is_finite()).fold(
        (T::infinity(), T::neg_infinity()),
        |(current_min, current_max), val| (current_min.min(val), current_max.max(val)),
    );
    if !min.is_finite() || !max.is_finite() {
        None
    } else {
        Some((min, max))
    }
}

/// Replaces all non-finite samples by linear interpolation between their finite neighbours.
///
/// Samples before the first (after the last) finite value take the value of the first (last)
/// finite sample.
///
/// # Errors
///
/// This function returns an error if the data does not contain a single finite value.
pub fn remove_nans(data: &[f64]) -> DfResult<Vec<f64>> {
    let finite_indices: Vec<usize> = data
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(i, _)| i)
        .collect();
    let (Some(first), Some(last)) = (finite_indices.first(), finite_indices.last()) else {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        return Err(DfError::Signal(
            "cannot interpolate data without finite values".into(),
        ));
    };
    let mut repaired = data.to_vec();
    for value in &mut repaired[..*first] {
        *value = data[*first];
    }
    for value in &mut repaired[*last + 1..] {
        *value = data[*last];
    }
    for pair in finite_indices.windows(2) {
        let (left, right) = (pair[0], pair[1]);
        if right - left < 2 {
            continue;
        }
        let span = usize_to_f64(right - left);
        for i in left + 1..right {
            let frac = usize_to_f64(i - left) / span;
            repaired[i] = frac.mul_add(data[right] - data[left], data[left]);
        }
    }
    Ok(repaired)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn min_max() {
        assert_eq!(get_min_max_filter_nonfinite::<f64>(&[]), None);
        assert_eq!(get_min_max_filter_nonfinite(&[f64::NAN]), None);
        assert_eq!(
            get_min_max_filter_nonfinite(&[3.0, f64::NEG_INFINITY, -1.0, 2.0]),
            Some((-1.0, 3.0))
        );
    }
    #[test]
    fn remove_nans_inner() {
        let repaired = remove_nans(&[0.0, f64::NAN, f64::NAN, 3.0, 4.0]).unwrap();
        assert_abs_diff_eq!(repaired[1], 1.0);
        assert_abs_diff_eq!(repaired[2], 2.0);
        assert_abs_diff_eq!(repaired[4], 4.0);
    }
    #[test]
    fn remove_nans_edges() {
        let repaired = remove_nans(&[f64::NAN, 2.0, f64::INFINITY, 4.0, f64::NAN]).unwrap();
        assert_eq!(repaired, vec![2.0, 2.0, 3.0, 4.0, 4.0]);
    }
    #[test]
    fn remove_nans_degenerate() {
        assert!(remove_nans(&[]).unwrap().is_empty());
        assert!(remove_nans(&[f64::NAN, f64::NAN]).is_err());
    }
}
