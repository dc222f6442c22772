#![warn(missing_docs)]
//! Data model of an analysed darkfield spectrum.
//!
//! A [`DfSpectrum`] carries the condensed spectrum of a single particle together with its
//! [`Classification`] and, for NPoMs, the extracted [`PeakRecord`].
use std::{fmt::Display, sync::Arc};

use serde::{Deserialize, Serialize};

/// Reason why a spectrum was rejected as NPoM.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Reason {
    /// not enough signal within the NPoM window or negative values
    SignalTooLow,
    /// the coupled-mode region carries too little signal compared to the transverse-mode region
    CmRegionTooWeak,
    /// the signal does not rise above the noise level of the near-infrared region
    JustNoise,
    /// the smoothed spectrum shows less than two maxima
    TooFewPeaks,
    /// the global maximum lies below the lowest accepted coupled-mode wavelength (nm)
    MaximumBelowCmLimit(f64),
}
impl Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SignalTooLow => write!(f, "Signal too low"),
            Self::CmRegionTooWeak => write!(f, "CM region too weak"),
            Self::JustNoise => write!(f, "Just Noise"),
            Self::TooFewPeaks => write!(f, "Too few peaks detected"),
            Self::MaximumBelowCmLimit(limit) => write!(
                f,
                "Spectral maximum < specified cm lower limit ({limit} nm)"
            ),
        }
    }
}

/// Classification of a spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Classification {
    /// the spectrum does not belong to a valid nanoparticle-on-mirror geometry
    NotNpom(Reason),
    /// valid nanoparticle-on-mirror
    Npom {
        /// the coupled-mode region shows two distinguishable maxima
        is_double: bool,
        /// a sharp peak between transverse and coupled mode is present
        has_weird: bool,
    },
}
impl Classification {
    /// Returns `true` if the spectrum is an NPoM.
    #[must_use]
    pub const fn is_npom(&self) -> bool {
        matches!(self, Self::Npom { .. })
    }
    /// Returns the rejection reason of a non-NPoM.
    #[must_use]
    pub const fn reason(&self) -> Option<Reason> {
        match self {
            Self::NotNpom(reason) => Some(*reason),
            Self::Npom { .. } => None,
        }
    }
    /// Returns `true` for an NPoM with a double coupled mode.
    #[must_use]
    pub const fn is_double(&self) -> bool {
        matches!(self, Self::Npom { is_double: true, .. })
    }
    /// Returns `true` for an NPoM with a weird peak.
    #[must_use]
    pub const fn has_weird(&self) -> bool {
        matches!(self, Self::Npom { has_weird: true, .. })
    }
    /// Returns `true` for an NPoM that is neither double nor weird.
    #[must_use]
    pub const fn is_ideal(&self) -> bool {
        matches!(
            self,
            Self::Npom {
                is_double: false,
                has_weird: false
            }
        )
    }
}

/// Processing state of a spectrum within the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SpectrumState {
    /// freshly condensed, not yet tested
    New,
    /// NPoM test performed
    TestedNpom,
    /// rejected as NPoM (terminal)
    Rejected(Reason),
    /// accepted as NPoM, peaks not yet extracted
    Classified,
    /// peak extraction attempted (terminal)
    PeaksFitted,
}
impl SpectrumState {
    /// Returns `true` if no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::PeaksFitted)
    }
    /// Performs a transition to `next`.
    ///
    /// Returns `None` if the transition is not allowed.
    #[must_use]
    pub const fn advance(self, next: Self) -> Option<Self> {
        match (self, next) {
            (Self::New, Self::TestedNpom)
            | (Self::TestedNpom, Self::Rejected(_) | Self::Classified)
            | (Self::Classified, Self::PeaksFitted) => Some(next),
            _ => None,
        }
    }
}

/// Position, height and width of a single peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// center wavelength (nm)
    pub wavelength: f64,
    /// height
    pub intensity: f64,
    /// full width at half maximum (nm). Not available for double peaks.
    pub fwhm: Option<f64>,
}

/// Transverse mode used for normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransverseMode {
    /// wavelength of the transverse mode (nm)
    pub wavelength: f64,
    /// smoothed height of the raw spectrum at the transverse mode
    pub intensity: f64,
}

/// Coupled mode and optional weird peak of one spectrum variant (raw or normalized).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MainPeaks {
    /// the coupled mode
    pub coupled: Peak,
    /// the weird peak, only present if the spectrum was classified as weird peaker
    pub weird: Option<Peak>,
    /// coupled-mode height divided by transverse-mode height
    pub intensity_ratio: f64,
}

/// Peak data of an NPoM spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakRecord {
    /// the transverse mode
    pub transverse: TransverseMode,
    /// peaks of the raw spectrum
    pub raw: Option<MainPeaks>,
    /// peaks of the normalized spectrum
    pub normalised: Option<MainPeaks>,
    /// message of a failed peak extraction
    pub fit_error: Option<String>,
}
impl PeakRecord {
    /// Coupled-mode wavelength if the peak extraction succeeded.
    #[must_use]
    pub fn coupled_wavelength(&self) -> Option<f64> {
        self.raw.map(|p| p.coupled.wavelength)
    }
    /// Intensity ratio of the normalized spectrum if the peak extraction succeeded.
    #[must_use]
    pub fn normalised_ratio(&self) -> Option<f64> {
        self.normalised.map(|p| p.intensity_ratio)
    }
}

/// Analysed darkfield spectrum of a single particle.
#[derive(Debug, Clone, PartialEq)]
pub struct DfSpectrum {
    index: usize,
    source: String,
    raw: Vec<f64>,
    normalized: Option<Vec<f64>>,
    x: Arc<Vec<f64>>,
    class: Classification,
    peaks: Option<PeakRecord>,
    aligned: bool,
    alignment_score: f64,
    z_profile: Vec<f64>,
}
impl DfSpectrum {
    /// Creates a new classified spectrum.
    ///
    /// The normalized spectrum and the peak record are dropped for non-NPoMs.
    #[must_use]
    pub fn new(
        index: usize,
        x: Arc<Vec<f64>>,
        raw: Vec<f64>,
        class: Classification,
        normalized: Option<Vec<f64>>,
        peaks: Option<PeakRecord>,
    ) -> Self {
        let (normalized, peaks) = if class.is_npom() {
            (normalized, peaks)
        } else {
            (None, None)
        };
        Self {
            index,
            source: String::new(),
            raw,
            normalized,
            x,
            class,
            peaks,
            aligned: false,
            alignment_score: f64::NAN,
            z_profile: Vec::new(),
        }
    }
    /// Attaches the alignment result of the z-stack condenser.
    #[must_use]
    pub fn with_alignment(mut self, aligned: bool, score: f64, z_profile: Vec<f64>) -> Self {
        self.aligned = aligned;
        self.alignment_score = score;
        self.z_profile = z_profile;
        self
    }
    /// Attaches the path of the particle the spectrum was measured on.
    #[must_use]
    pub fn with_source(mut self, source: &str) -> Self {
        source.clone_into(&mut self.source);
        self
    }
    /// Index of the particle within the batch.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
    /// Name of the spectrum within the summary archive.
    #[must_use]
    pub fn name(&self) -> String {
        format!("Spectrum {}", self.index)
    }
    /// Path of the source particle within the input archive.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
    /// The condensed (raw) spectrum.
    #[must_use]
    pub fn raw(&self) -> &[f64] {
        &self.raw
    }
    /// The spectrum normalized to the transverse mode (NPoMs only).
    #[must_use]
    pub fn normalized(&self) -> Option<&[f64]> {
        self.normalized.as_deref()
    }
    /// The wavelength axis (nm).
    #[must_use]
    pub fn x(&self) -> &[f64] {
        &self.x
    }
    /// The classification.
    #[must_use]
    pub const fn class(&self) -> &Classification {
        &self.class
    }
    /// The peak record (NPoMs only).
    #[must_use]
    pub const fn peaks(&self) -> Option<&PeakRecord> {
        self.peaks.as_ref()
    }
    /// Whether the particle passed the alignment check.
    #[must_use]
    pub const fn aligned(&self) -> bool {
        self.aligned
    }
    /// Alignment score of the z-stack.
    #[must_use]
    pub const fn alignment_score(&self) -> f64 {
        self.alignment_score
    }
    /// Focal height at each wavelength.
    #[must_use]
    pub fn z_profile(&self) -> &[f64] {
        &self.z_profile
    }
    /// Terminal processing state of the spectrum.
    #[must_use]
    pub const fn state(&self) -> SpectrumState {
        match self.class {
            Classification::NotNpom(reason) => SpectrumState::Rejected(reason),
            Classification::Npom { .. } => SpectrumState::PeaksFitted,
        }
    }
}
