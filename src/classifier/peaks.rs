//! Extraction of coupled-mode and weird-peak parameters.
use crate::{
    config::{nm, window_nm, ClassifierConfig},
    error::{DfError, DfResult},
    spectrum::{MainPeaks, Peak},
    utils::{
        math_utils::{argmax, argmin, nearest_index},
        signal::{detect_maxima, detect_minima, truncate},
    },
};

/// Estimates position, height and FWHM of the largest peak of the given data.
///
/// The half-width on each side is taken from the sample closest to half maximum. For asymmetric
/// peaks the narrower half-width (times two) is used if the other one is more than `fwhm_factor`
/// wider. If the half-maximum sample of the narrower side is not below 55 % of the maximum, the
/// wider half-width is used.
///
/// # Errors
///
/// This function will return an error if less than three samples are given.
pub fn get_fwhm(x: &[f64], y: &[f64], fwhm_factor: f64) -> DfResult<Peak> {
    let n = x.len().min(y.len());
    if n < 3 {
        return Err(DfError::Classifier(
            "peak width estimation needs at least three samples".into(),
        ));
    }
    let max_index = argmax(&y[..n])
        .ok_or_else(|| DfError::Classifier("peak region contains no valid data".into()))?
        .clamp(1, n - 2);
    let y_max = y[max_index];
    let half = y_max / 2.0;
    let distance: Vec<f64> = y[..n].iter().map(|v| (v - half).abs()).collect();
    let left = argmin(&distance[..max_index]).unwrap_or(max_index);
    let right = argmin(&distance[max_index..]).map_or(max_index, |i| i + max_index);
    let hwhm_left = (x[max_index] - x[left]).abs();
    let hwhm_right = (x[right] - x[max_index]).abs();
    let ((hwhm_min, index_min), (hwhm_max, _)) = if hwhm_left <= hwhm_right {
        ((hwhm_left, left), (hwhm_right, right))
    } else {
        ((hwhm_right, right), (hwhm_left, left))
    };
    let fwhm = if y[index_min] < 0.55 * y_max {
        if hwhm_max > hwhm_min * fwhm_factor {
            2.0 * hwhm_min
        } else {
            hwhm_left + hwhm_right
        }
    } else {
        2.0 * hwhm_max
    };
    Ok(Peak {
        wavelength: x[max_index],
        intensity: y_max,
        fwhm: Some(fwhm),
    })
}

/// Checks for a sharp peak between transverse and coupled mode.
///
/// # Errors
///
/// This function will return an error if the smoothing settings are invalid.
pub fn test_if_weird(
    x: &[f64],
    y: &[f64],
    transverse_wavelength: f64,
    config: &ClassifierConfig,
) -> DfResult<bool> {
    let start = window_nm(config.peak_window).0;
    let (x, y) = truncate(x, y, start, nm(config.peak_find_midpoint));
    if x.len() < 3 {
        return Ok(false);
    }
    let smoothed = config.smoothing.apply(y)?;
    let transverse_height = smoothed[nearest_index(x, transverse_wavelength)];
    let Some(peak_height) = detect_maxima(&smoothed)
        .into_iter()
        .map(|m| smoothed[m])
        .reduce(f64::max)
    else {
        return Ok(false);
    };
    let peak_wavelength = argmax(&smoothed).map_or(f64::NAN, |i| x[i]);
    Ok(peak_height >= transverse_height * config.weird_factor
        && peak_wavelength > transverse_wavelength)
}

/// Extracts coupled mode and (optionally) weird peak from a spectrum.
///
/// The smoothed spectrum is split at the minimum closest to the peak-find midpoint. If the two
/// minima closest to the midpoint differ by more than 60 % of the maximum, the deeper one is used.
/// The coupled mode is the largest peak right of the split, the weird peak the largest one
/// between the first minimum and the split. `transverse_intensity` is the divisor of the intensity
/// ratio.
///
/// # Errors
///
/// This function will return an error if
///   - the smoothed spectrum shows no minimum within the peak window
///   - one of the peak regions is too short for a width estimation
pub fn find_main_peaks(
    x: &[f64],
    y: &[f64],
    has_weird: bool,
    transverse_intensity: f64,
    config: &ClassifierConfig,
) -> DfResult<MainPeaks> {
    let (start, end) = window_nm(config.peak_window);
    let (x, y) = truncate(x, y, start, end);
    if x.len() < 3 {
        return Err(DfError::Classifier(
            "peak window contains less than three samples".into(),
        ));
    }
    let smoothed = config.smoothing.apply(y)?;
    let minima = detect_minima(&smoothed);
    let Some(&first_min) = minima.first() else {
        return Err(DfError::Classifier(
            "no minimum found within the peak window".into(),
        ));
    };
    let midpoint = nm(config.peak_find_midpoint);
    let mut by_distance = minima.clone();
    by_distance.sort_by(|a, b| (x[*a] - midpoint).abs().total_cmp(&(x[*b] - midpoint).abs()));
    let y_max = smoothed.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let split = match by_distance.as_slice() {
        [nearest, second, ..] if (smoothed[*nearest] - smoothed[*second]).abs() > 0.6 * y_max => {
            if smoothed[*second] < smoothed[*nearest] {
                *second
            } else {
                *nearest
            }
        }
        [nearest, ..] => *nearest,
        [] => first_min,
    };
    let initial = if first_min == split { 0 } else { first_min };
    let weird = if has_weird {
        Some(get_fwhm(
            &x[initial..split],
            &smoothed[initial..split],
            config.fwhm_factor,
        )?)
    } else {
        None
    };
    let coupled = get_fwhm(&x[split..], &smoothed[split..], config.fwhm_factor)?;
    Ok(MainPeaks {
        coupled,
        weird,
        intensity_ratio: coupled.intensity / transverse_intensity,
    })
}
