//! Location of the transverse mode and normalization of a spectrum to its height.
use log::debug;

use crate::{
    config::{nm, window_nm, ClassifierConfig},
    error::{DfError, DfResult},
    spectrum::TransverseMode,
    utils::{
        math_utils::nearest_index,
        signal::{cent_diff, detect_minima, truncate},
    },
};

/// A spectrum normalized to its transverse mode.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalised {
    /// the transverse mode of the raw spectrum
    pub mode: TransverseMode,
    /// raw spectrum divided by the transverse-mode height
    pub spectrum: Vec<f64>,
}

/// Locates the transverse mode and normalizes the spectrum to its smoothed height.
///
/// The transverse mode is the minimum of the second derivative of the smoothed spectrum which
/// lies closest to the expected wavelength. If the smoothed spectrum at the expected wavelength is
/// more than `transverse_ratio_limit` times higher than at the detected position, the expected
/// wavelength is used instead.
///
/// # Errors
///
/// This function will return an error if
///   - the transverse window contains less than three samples
///   - the transverse-mode height is not positive
pub fn normalise_to_transverse(
    x: &[f64],
    y: &[f64],
    config: &ClassifierConfig,
) -> DfResult<Normalised> {
    let (start, end) = window_nm(config.transverse_window);
    let (x_window, y_window) = truncate(x, y, start, end);
    if x_window.len() < 3 {
        return Err(DfError::Classifier(
            "transverse window contains less than three samples".into(),
        ));
    }
    let smoothed = config.smoothing.apply(y_window)?;
    let guess = nm(config.transverse_guess);
    let guess_index = nearest_index(x_window, guess);
    let second_derivative = cent_diff(x_window, &cent_diff(x_window, &smoothed));
    let detected = detect_minima(&second_derivative)
        .into_iter()
        .min_by(|a, b| (x_window[*a] - guess).abs().total_cmp(&(x_window[*b] - guess).abs()));
    let mut index = detected.unwrap_or(guess_index);
    if smoothed[guess_index] / smoothed[index] > config.transverse_ratio_limit {
        debug!(
            "transverse mode at {} nm too weak, using {} nm",
            x_window[index], x_window[guess_index]
        );
        index = guess_index;
    }
    let height = smoothed[index];
    if !height.is_finite() || height <= 0.0 {
        return Err(DfError::Classifier(format!(
            "transverse mode height {height} is not positive"
        )));
    }
    Ok(Normalised {
        mode: TransverseMode {
            wavelength: x_window[index],
            intensity: height,
        },
        spectrum: y.iter().map(|v| v / height).collect(),
    })
}
