#![warn(missing_docs)]
//! Classification of condensed darkfield spectra.
//!
//! A spectrum passes through the states of [`SpectrumState`]: it is tested for being an NPoM,
//! rejected with a [`Reason`] or classified as single / double and weird / non-weird peaker, and
//! finally its peaks are extracted.
pub mod npom_test;
pub mod peaks;
pub mod transverse;

use std::sync::Arc;

use log::{debug, warn};

pub use npom_test::{test_if_double, test_if_npom, PeakShape};
pub use peaks::{find_main_peaks, get_fwhm, test_if_weird};
pub use transverse::{normalise_to_transverse, Normalised};

use crate::{
    config::{nm, ClassifierConfig},
    error::{DfError, DfResult},
    spectrum::{Classification, DfSpectrum, MainPeaks, PeakRecord, Reason, SpectrumState},
};

/// Classifier and peak extractor for condensed spectra.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    config: ClassifierConfig,
}

fn advance(state: SpectrumState, next: SpectrumState) -> DfResult<SpectrumState> {
    state.advance(next).ok_or_else(|| {
        DfError::Classifier(format!("invalid state transition {state:?} -> {next:?}"))
    })
}

fn without_width(peaks: Option<MainPeaks>) -> Option<MainPeaks> {
    peaks.map(|mut p| {
        p.coupled.fwhm = None;
        p
    })
}

impl Classifier {
    /// Creates a new classifier.
    #[must_use]
    pub const fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }
    /// Returns the classifier settings.
    #[must_use]
    pub const fn config(&self) -> &ClassifierConfig {
        &self.config
    }
    /// Analyses a condensed spectrum.
    ///
    /// With `force_npom` the NPoM trials are skipped and the spectrum is always analysed as NPoM.
    /// This is used for averaged spectra.
    ///
    /// A failing peak extraction does not fail the analysis: the error message is stored in the
    /// [`PeakRecord`] and the peak values stay unavailable.
    ///
    /// # Errors
    ///
    /// This function will return an error if
    ///   - the spectrum does not match the wavelength axis
    ///   - the transverse mode cannot be determined
    ///   - the smoothing settings are invalid
    pub fn analyse(
        &self,
        index: usize,
        x: &Arc<Vec<f64>>,
        y: Vec<f64>,
        force_npom: bool,
    ) -> DfResult<DfSpectrum> {
        if x.len() != y.len() {
            return Err(DfError::Classifier(format!(
                "spectrum has {} samples but the wavelength axis {}",
                y.len(),
                x.len()
            )));
        }
        let mut state = SpectrumState::New;
        let reason = if force_npom {
            None
        } else {
            test_if_npom(x, &y, &self.config)?
        };
        state = advance(state, SpectrumState::TestedNpom)?;
        let shape = test_if_double(x, &y, &self.config)?;
        let reason = match (reason, shape) {
            (Some(reason), _) => Some(reason),
            (None, PeakShape::NoCoupledMode) if !force_npom => Some(Reason::MaximumBelowCmLimit(
                nm(self.config.cm_lower_limit),
            )),
            _ => None,
        };
        if let Some(reason) = reason {
            state = advance(state, SpectrumState::Rejected(reason))?;
            debug!("spectrum {index}: {state:?}");
            return Ok(DfSpectrum::new(
                index,
                x.clone(),
                y,
                Classification::NotNpom(reason),
                None,
                None,
            ));
        }
        let is_double = shape == PeakShape::Double;
        let normalised = normalise_to_transverse(x, &y, &self.config)?;
        let has_weird = test_if_weird(x, &y, normalised.mode.wavelength, &self.config)?;
        state = advance(state, SpectrumState::Classified)?;
        let class = Classification::Npom {
            is_double,
            has_weird,
        };
        let raw_peaks =
            find_main_peaks(x, &y, has_weird, normalised.mode.intensity, &self.config);
        let normalised_peaks =
            find_main_peaks(x, &normalised.spectrum, has_weird, 1.0, &self.config);
        let record = match (raw_peaks, normalised_peaks) {
            (Ok(raw), Ok(norm)) => PeakRecord {
                transverse: normalised.mode,
                raw: Some(raw),
                normalised: Some(norm),
                fit_error: None,
            },
            (Err(e), _) | (_, Err(e)) => {
                warn!("peak extraction of spectrum {index} failed: {e}");
                PeakRecord {
                    transverse: normalised.mode,
                    raw: None,
                    normalised: None,
                    fit_error: Some(e.to_string()),
                }
            }
        };
        let record = if is_double {
            PeakRecord {
                raw: without_width(record.raw),
                normalised: without_width(record.normalised),
                ..record
            }
        } else {
            record
        };
        state = advance(state, SpectrumState::PeaksFitted)?;
        debug!("spectrum {index}: {state:?} {class:?}");
        Ok(DfSpectrum::new(
            index,
            x.clone(),
            y,
            class,
            Some(normalised.spectrum),
            Some(record),
        ))
    }
}
