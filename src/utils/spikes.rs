//! Removal of cosmic-ray spikes from measured spectra.
use crate::error::{DfError, DfResult};
use crate::utils::{
    filter_data::{get_min_max_filter_nonfinite, remove_nans},
    math_utils::{argmax, finite_median},
    signal::cent_diff,
};

/// Maximum number of spikes removed from a single spectrum.
pub const MAX_SPIKE_ITERATIONS: usize = 20;
/// Half width of the neighbourhood used to estimate the local gradient level.
const NEIGHBOURHOOD: usize = 5;

/// Removes sharp spikes (cosmic rays) from a spectrum.
///
/// A spike is present if the reference-weighted gradient `|dy/dx| * sqrt(reference)` at some
/// point exceeds `factor` times the median weighted gradient of its neighbourhood. The points
/// around the spike are erased and replaced by a straight line. If a spike is found again close
/// to the previously erased one, the erased window is widened. At most
/// [`MAX_SPIKE_ITERATIONS`] spikes are removed.
///
/// `reference` is the white-light reference of the measurement. If it is empty or of different
/// length, a unit reference is used.
///
/// # Errors
///
/// This function will return an error if
///   - `x` and `y` differ in length
///   - the repaired spectrum is constant or contains no finite values
pub fn remove_spikes(x: &[f64], y: &[f64], reference: &[f64], factor: f64) -> DfResult<Vec<f64>> {
    if x.len() != y.len() {
        return Err(DfError::Signal(
            "wavelength axis and spectrum differ in length".into(),
        ));
    }
    let weights: Vec<f64> = if reference.len() == y.len() {
        reference.iter().map(|r| r.max(0.0).sqrt()).collect()
    } else {
        vec![1.0; y.len()]
    };
    let mut repaired = y.to_vec();
    let mut previous_spike: Option<usize> = None;
    let mut half_width = 1;
    for _ in 0..MAX_SPIKE_ITERATIONS {
        let gradient: Vec<f64> = cent_diff(x, &repaired)
            .iter()
            .zip(&weights)
            .map(|(d, w)| (d * w).abs())
            .collect();
        let scores = spike_scores(&gradient);
        let Some(spike) = argmax(&scores) else {
            break;
        };
        if scores[spike] <= factor {
            break;
        }
        half_width = match previous_spike {
            Some(previous) if previous.abs_diff(spike) < 5 => half_width + 1,
            _ => 1,
        };
        previous_spike = Some(spike);
        let begin = spike.saturating_sub(half_width + 1);
        let end = (spike + half_width + 1).min(repaired.len() - 1);
        for value in &mut repaired[begin..=end] {
            *value = f64::NAN;
        }
        repaired = remove_nans(&repaired)?;
    }
    match get_min_max_filter_nonfinite(&repaired) {
        Some((min, max)) if max > min => Ok(repaired),
        _ => Err(DfError::Signal("spike removal produced a constant spectrum".into())),
    }
}

/// Gradient of each point relative to the median gradient of its neighbourhood.
fn spike_scores(gradient: &[f64]) -> Vec<f64> {
    let n = gradient.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(NEIGHBOURHOOD);
            let hi = (i + NEIGHBOURHOOD + 1).min(n);
            let level = finite_median(&gradient[lo..hi]).unwrap_or(0.0);
            let value = gradient[i];
            if !value.is_finite() || value == 0.0 {
                0.0
            } else if level > 0.0 {
                value / level
            } else {
                f64::INFINITY
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn smooth_spectrum() -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (400..1000).map(f64::from).collect();
        let y = x
            .iter()
            .map(|l| 0.1 + (-((l - 700.0) / 60.0).powi(2)).exp())
            .collect();
        (x, y)
    }
    #[test]
    fn length_mismatch() {
        assert!(remove_spikes(&[1.0, 2.0], &[1.0], &[], 15.0).is_err());
    }
    #[test]
    fn smooth_data_untouched() {
        let (x, y) = smooth_spectrum();
        let repaired = remove_spikes(&x, &y, &[], 15.0).unwrap();
        assert_eq!(repaired, y);
    }
    #[test]
    fn single_spike() {
        let (x, mut y) = smooth_spectrum();
        let clean = y[250];
        y[250] += 5.0;
        let repaired = remove_spikes(&x, &y, &vec![400.0; x.len()], 15.0).unwrap();
        assert_abs_diff_eq!(repaired[250], clean, epsilon = 1e-2);
        assert_abs_diff_eq!(repaired[100], y[100]);
    }
    #[test]
    fn two_point_spike() {
        let (x, mut y) = smooth_spectrum();
        y[120] += 3.0;
        y[121] += 4.0;
        let repaired = remove_spikes(&x, &y, &[], 15.0).unwrap();
        assert!(repaired[120] < 1.0);
        assert!(repaired[121] < 1.0);
    }
    #[test]
    fn constant_spectrum_fails() {
        let x: Vec<f64> = (0..50).map(f64::from).collect();
        assert!(remove_spikes(&x, &vec![1.0; 50], &[], 15.0).is_err());
    }
}
