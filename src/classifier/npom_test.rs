//! Tests deciding whether a spectrum belongs to a nanoparticle-on-mirror.
use crate::{
    config::{nm, window_nm, ClassifierConfig},
    error::DfResult,
    spectrum::Reason,
    utils::{
        math_utils::{kahan_sum, nearest_index},
        signal::{detect_maxima, detect_minima, truncate},
    },
};

/// Shape of the coupled-mode region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakShape {
    /// one dominant coupled mode
    Single,
    /// two distinguishable coupled-mode maxima
    Double,
    /// the global maximum lies below the lower coupled-mode limit (or there is no maximum at all)
    NoCoupledMode,
}

/// Performs the four NPoM trials on a spectrum.
///
/// Returns the reason of the first failed trial or `None` if the spectrum passed all of them.
///
/// # Errors
///
/// This function will return an error if the smoothing settings are invalid.
pub fn test_if_npom(x: &[f64], y: &[f64], config: &ClassifierConfig) -> DfResult<Option<Reason>> {
    let (start, end) = window_nm(config.npom_window);
    let (_, truncated) = truncate(x, y, start, end);
    if truncated.is_empty() {
        return Ok(Some(Reason::SignalTooLow));
    }
    let offset = truncated.iter().copied().fold(f64::INFINITY, f64::min);
    let shifted: Vec<f64> = truncated.iter().map(|v| v - offset).collect();
    let total = kahan_sum(&shifted);
    let minimum = y.iter().copied().fold(f64::INFINITY, f64::min);
    if total <= config.min_total_signal || minimum <= config.negative_floor {
        return Ok(Some(Reason::SignalTooLow));
    }
    let third = shifted.len() / 3;
    if kahan_sum(&shifted[..third]) >= kahan_sum(&shifted[third..]) * config.slope_factor {
        return Ok(Some(Reason::CmRegionTooWeak));
    }
    let upper = &y[nearest_index(x, end).min(y.len())..];
    if 3.0 * total <= kahan_sum(upper) / config.noise_factor {
        return Ok(Some(Reason::JustNoise));
    }
    if detect_maxima(&config.smoothing.apply(y)?).len() < config.min_peaks {
        return Ok(Some(Reason::TooFewPeaks));
    }
    Ok(None)
}

/// Checks whether the coupled-mode region carries two distinguishable maxima.
///
/// The two highest maxima above the lower coupled-mode limit are compared relative to the lowest
/// minimum between them.
///
/// # Errors
///
/// This function will return an error if the smoothing settings are invalid.
pub fn test_if_double(x: &[f64], y: &[f64], config: &ClassifierConfig) -> DfResult<PeakShape> {
    let (start, end) = window_nm(config.npom_window);
    let (x, truncated) = truncate(x, y, start, end);
    if truncated.len() < 3 {
        return Ok(PeakShape::NoCoupledMode);
    }
    let smoothed = config.smoothing.apply(truncated)?;
    let mut maxima = detect_maxima(&smoothed);
    maxima.sort_by(|a, b| smoothed[*b].total_cmp(&smoothed[*a]));
    let lower_limit = nm(config.cm_lower_limit);
    let Some(&first) = maxima.first() else {
        return Ok(PeakShape::NoCoupledMode);
    };
    if x[first] < lower_limit {
        return Ok(PeakShape::NoCoupledMode);
    }
    let Some(&second) = maxima[1..].iter().find(|m| x[**m] > lower_limit) else {
        return Ok(PeakShape::Single);
    };
    let (left, right) = (first.min(second), first.max(second));
    let trough = detect_minima(&smoothed)
        .into_iter()
        .filter(|m| (left + 1..right).contains(m))
        .map(|m| smoothed[m])
        .fold(f64::INFINITY, f64::min);
    if !trough.is_finite() {
        return Ok(PeakShape::Single);
    }
    let prominent = smoothed[second] - trough > (smoothed[first] - trough) / config.doubles_threshold;
    let separated = (x[first] - x[second]).abs() > nm(config.min_double_separation);
    Ok(if prominent && separated {
        PeakShape::Double
    } else {
        PeakShape::Single
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::test_fixtures::{
        axis, double_spectrum, noise_spectrum, npom_spectrum, weird_spectrum,
    };

    #[test]
    fn npom_accepted() {
        let x = axis();
        let config = ClassifierConfig::default();
        assert_eq!(test_if_npom(&x, &npom_spectrum(&x), &config).unwrap(), None);
        assert_eq!(test_if_npom(&x, &double_spectrum(&x), &config).unwrap(), None);
        assert_eq!(test_if_npom(&x, &weird_spectrum(&x), &config).unwrap(), None);
    }
    #[test]
    fn npom_rejections() {
        let x = axis();
        let config = ClassifierConfig::default();
        assert_eq!(
            test_if_npom(&x, &noise_spectrum(&x, 3), &config).unwrap(),
            Some(Reason::SignalTooLow)
        );
        let mut negative = npom_spectrum(&x);
        negative[10] = -0.5;
        assert_eq!(
            test_if_npom(&x, &negative, &config).unwrap(),
            Some(Reason::SignalTooLow)
        );
        // decaying spectrum without coupled mode
        let blue: Vec<f64> = x.iter().map(|l| (-(l - 450.0) / 30.0).exp()).collect();
        assert_eq!(
            test_if_npom(&x, &blue, &config).unwrap(),
            Some(Reason::CmRegionTooWeak)
        );
        // weak signal within the window but strong background above 900 nm
        let infrared: Vec<f64> = x
            .iter()
            .map(|l| if *l >= 900.0 { 10.0 } else { 0.01 + 0.001 * (l - 450.0) / 450.0 })
            .collect();
        assert_eq!(
            test_if_npom(&x, &infrared, &config).unwrap(),
            Some(Reason::JustNoise)
        );
        let single: Vec<f64> = x
            .iter()
            .map(|l| 0.5 + 0.5 * (l - 400.0) / 600.0)
            .collect();
        assert_eq!(
            test_if_npom(&x, &single, &config).unwrap(),
            Some(Reason::TooFewPeaks)
        );
        assert_eq!(
            test_if_npom(&[1.0, 2.0], &[1.0, 2.0], &config).unwrap(),
            Some(Reason::SignalTooLow)
        );
    }
    #[test]
    fn peak_shapes() {
        let x = axis();
        let config = ClassifierConfig::default();
        assert_eq!(
            test_if_double(&x, &npom_spectrum(&x), &config).unwrap(),
            PeakShape::Single
        );
        assert_eq!(
            test_if_double(&x, &double_spectrum(&x), &config).unwrap(),
            PeakShape::Double
        );
        // transverse mode dominates
        let blue: Vec<f64> = x
            .iter()
            .map(|l| 3.0 * (-((l - 533.0) / 30.0).powi(2)).exp() + (-((l - 700.0) / 50.0).powi(2)).exp())
            .collect();
        assert_eq!(
            test_if_double(&x, &blue, &config).unwrap(),
            PeakShape::NoCoupledMode
        );
        assert_eq!(
            test_if_double(&[1.0, 2.0], &[1.0, 2.0], &config).unwrap(),
            PeakShape::NoCoupledMode
        );
    }
}
