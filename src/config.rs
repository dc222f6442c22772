#![warn(missing_docs)]
//! Configuration of the darkfield analysis.
//!
//! All tunable thresholds of the pipeline are collected in an [`AnalysisConfig`]. The
//! configuration can be read from a YAML file. Missing entries fall back to their defaults.
//! Wavelength-valued settings are stored as [`Length`]s and hence serialized in SI units (meter).
use std::{fmt::Display, fs, path::Path};

use serde::{Deserialize, Serialize};
use strum::EnumIter;
use uom::si::{f64::Length, length::nanometer};

use crate::{
    error::{DfError, DfResult},
    nanometer,
    utils::signal::LowPass,
};

/// Nominal diameter of the nanoparticles of a sample.
///
/// The diameter determines where the coupled mode is expected and hence where the classifier
/// splits a spectrum into its peak regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumIter)]
pub enum NpDiameter {
    /// 40 nm particles
    Nm40,
    /// 50 nm particles
    Nm50,
    /// 60 nm particles
    Nm60,
    /// 70 nm particles
    Nm70,
    /// 80 nm particles
    #[default]
    Nm80,
}
impl NpDiameter {
    /// Returns the diameter for the given size in nanometers.
    ///
    /// # Errors
    ///
    /// This function will return an error if no lookup data exists for the given size.
    pub fn from_nm(size: u32) -> DfResult<Self> {
        match size {
            40 => Ok(Self::Nm40),
            50 => Ok(Self::Nm50),
            60 => Ok(Self::Nm60),
            70 => Ok(Self::Nm70),
            80 => Ok(Self::Nm80),
            _ => Err(DfError::Config(format!(
                "unsupported particle diameter {size} nm, valid values are 40, 50, 60, 70, 80"
            ))),
        }
    }
    /// Returns the diameter in nanometers.
    #[must_use]
    pub const fn nm(self) -> u32 {
        match self {
            Self::Nm40 => 40,
            Self::Nm50 => 50,
            Self::Nm60 => 60,
            Self::Nm70 => 70,
            Self::Nm80 => 80,
        }
    }
    /// Wavelength around which the spectrum is split into weird-peak and coupled-mode region.
    #[must_use]
    pub fn peak_find_midpoint(self) -> Length {
        match self {
            Self::Nm40 => nanometer!(540.0),
            Self::Nm50 => nanometer!(550.0),
            Self::Nm60 => nanometer!(580.0),
            Self::Nm70 => nanometer!(630.0),
            Self::Nm80 => nanometer!(680.0),
        }
    }
    /// Lowest wavelength at which a coupled mode is accepted.
    #[must_use]
    pub fn cm_min_wl(self) -> Length {
        match self {
            Self::Nm40 => nanometer!(500.0),
            Self::Nm50 => nanometer!(520.0),
            Self::Nm60 => nanometer!(540.0),
            Self::Nm70 => nanometer!(560.0),
            Self::Nm80 => nanometer!(580.0),
        }
    }
}
impl Display for NpDiameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} nm", self.nm())
    }
}

/// Settings of the z-stack condenser and the alignment check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CondenserConfig {
    /// threshold subtracted from the normalized focal profiles before computing the centroid
    pub threshold: f64,
    /// smoothing of the chromatic aberration curve
    pub centroid_smoothing: LowPass,
    /// wavelength window used for the alignment check
    pub alignment_window: (Length, Length),
    /// smoothing of the per-wavelength totals of the alignment check
    pub alignment_smoothing: LowPass,
    /// maximum number of spectral maxima whose focal profiles are inspected
    pub alignment_columns: usize,
    /// number of neighbouring wavelengths inspected around each maximum (per side)
    pub alignment_neighbours: usize,
    /// half width of the common focal grid the focal profiles are interpolated onto
    pub focal_grid_half_width: f64,
    /// number of points of the common focal grid
    pub focal_grid_points: usize,
    /// number of grid points at either end regarded as outer focal region
    pub focal_edge_points: usize,
    /// particles with an alignment score below this value are regarded as mis-aligned
    pub alignment_threshold: f64,
    /// half span of the synthesized focus axis if the z-stack carries no usable one
    pub default_dz_span: f64,
    /// whether cosmic-ray spikes are removed from the condensed spectra
    pub remove_spikes: bool,
    /// gradient ratio above which a point is regarded as a spike
    pub spike_factor: f64,
}
impl Default for CondenserConfig {
    /// Create a default config for the condenser with the following parameters:
    ///   - threshold: `0.2`
    ///   - centroid smoothing: `900 / 80000`
    ///   - alignment window: `500 nm - 820 nm`
    ///   - alignment smoothing: `1500 / 50000`
    ///   - four columns with two neighbours each
    ///   - focal grid: `-3 ... 3` with `41` points, `10` edge points
    ///   - alignment threshold: `3.6`
    ///   - default dz span: `2.7`
    ///   - spike removal enabled with factor `15`
    fn default() -> Self {
        Self {
            threshold: 0.2,
            centroid_smoothing: LowPass::new(900.0, 80000.0),
            alignment_window: (nanometer!(500.0), nanometer!(820.0)),
            alignment_smoothing: LowPass::new(1500.0, 50000.0),
            alignment_columns: 4,
            alignment_neighbours: 2,
            focal_grid_half_width: 3.0,
            focal_grid_points: 41,
            focal_edge_points: 10,
            alignment_threshold: 3.6,
            default_dz_span: 2.7,
            remove_spikes: true,
            spike_factor: 15.0,
        }
    }
}
impl CondenserConfig {
    /// Checks the consistency of the settings.
    ///
    /// # Errors
    ///
    /// This function will return an error if one of the settings is out of range.
    pub fn validate(&self) -> DfResult<()> {
        if !(0.0..1.0).contains(&self.threshold) {
            return Err(DfError::Config(
                "centroid threshold must be within [0, 1)".into(),
            ));
        }
        check_window(self.alignment_window, "alignment window")?;
        if self.alignment_columns == 0 {
            return Err(DfError::Config(
                "at least one alignment column is needed".into(),
            ));
        }
        if self.focal_grid_points < 2 * self.focal_edge_points + 2 || self.focal_edge_points == 0 {
            return Err(DfError::Config(
                "focal grid must contain edge points on both sides and a central region".into(),
            ));
        }
        if !self.focal_grid_half_width.is_normal() || self.focal_grid_half_width < 0.0 {
            return Err(DfError::Config(
                "focal grid half width must be positive".into(),
            ));
        }
        if !self.default_dz_span.is_normal() || self.default_dz_span < 0.0 {
            return Err(DfError::Config("default dz span must be positive".into()));
        }
        if !self.spike_factor.is_finite() || self.spike_factor <= 1.0 {
            return Err(DfError::Config("spike factor must be larger than one".into()));
        }
        Ok(())
    }
}

/// Settings of the spectrum classifier and the peak extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// wavelength window of the NPoM test
    pub npom_window: (Length, Length),
    /// minimum summed signal of the truncated, offset-corrected spectrum
    pub min_total_signal: f64,
    /// lowest accepted value of the spectrum
    pub negative_floor: f64,
    /// the coupled-mode region must carry more than `1 / slope_factor` of the signal of the first third
    pub slope_factor: f64,
    /// the signal region must exceed the region above the NPoM window divided by this factor
    pub noise_factor: f64,
    /// minimum number of maxima of the smoothed spectrum
    pub min_peaks: usize,
    /// general smoothing of the classifier
    pub smoothing: LowPass,
    /// lowest accepted wavelength of the coupled mode
    pub cm_lower_limit: Length,
    /// the second maximum counts as double peak if its prominence exceeds the one of the first divided by this value
    pub doubles_threshold: f64,
    /// minimum separation of the maxima of a double peak
    pub min_double_separation: Length,
    /// a maximum between transverse and coupled mode which is higher than the transverse mode times this factor is a weird peak
    pub weird_factor: f64,
    /// expected wavelength of the transverse mode
    pub transverse_guess: Length,
    /// window in which the transverse mode is searched
    pub transverse_window: (Length, Length),
    /// the transverse-mode guess is used if it is higher than the detected mode times this factor
    pub transverse_ratio_limit: f64,
    /// wavelength separating the weird-peak region from the coupled-mode region
    pub peak_find_midpoint: Length,
    /// window of the peak extraction
    pub peak_window: (Length, Length),
    /// FWHM correction factor of the peak-width estimator
    pub fwhm_factor: f64,
}
impl Default for ClassifierConfig {
    /// Create a default config for 80 nm particles.
    fn default() -> Self {
        let diameter = NpDiameter::default();
        Self {
            npom_window: (nanometer!(450.0), nanometer!(900.0)),
            min_total_signal: 0.05,
            negative_floor: -0.1,
            slope_factor: 1.5,
            noise_factor: 1.5,
            min_peaks: 2,
            smoothing: LowPass::default(),
            cm_lower_limit: diameter.cm_min_wl(),
            doubles_threshold: 2.0,
            min_double_separation: nanometer!(30.0),
            weird_factor: 1.4,
            transverse_guess: nanometer!(533.0),
            transverse_window: (nanometer!(450.0), nanometer!(600.0)),
            transverse_ratio_limit: 2.0,
            peak_find_midpoint: diameter.peak_find_midpoint(),
            peak_window: (nanometer!(450.0), nanometer!(800.0)),
            fwhm_factor: 1.1,
        }
    }
}
impl ClassifierConfig {
    /// Applies the lookup values of the given particle diameter.
    pub fn set_diameter(&mut self, diameter: NpDiameter) {
        self.cm_lower_limit = diameter.cm_min_wl();
        self.peak_find_midpoint = diameter.peak_find_midpoint();
    }
    /// Checks the consistency of the settings.
    ///
    /// # Errors
    ///
    /// This function will return an error if one of the settings is out of range.
    pub fn validate(&self) -> DfResult<()> {
        check_window(self.npom_window, "NPoM window")?;
        check_window(self.transverse_window, "transverse window")?;
        check_window(self.peak_window, "peak window")?;
        for (value, name) in [
            (self.slope_factor, "slope factor"),
            (self.noise_factor, "noise factor"),
            (self.doubles_threshold, "doubles threshold"),
            (self.weird_factor, "weird factor"),
            (self.transverse_ratio_limit, "transverse ratio limit"),
            (self.fwhm_factor, "FWHM factor"),
        ] {
            if !value.is_normal() || value < 0.0 {
                return Err(DfError::Config(format!("{name} must be positive")));
            }
        }
        if !self.min_total_signal.is_finite() || !self.negative_floor.is_finite() {
            return Err(DfError::Config("signal thresholds must be finite".into()));
        }
        Ok(())
    }
}

/// Settings of the histogram aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramConfig {
    /// wavelength range covered by the bins
    pub range: (Length, Length),
    /// number of bins
    pub bins: usize,
    /// spectra with a larger intensity ratio (or a truncated normalized minimum below its negative) are excluded
    pub ratio_threshold: f64,
    /// bins with less than `max count / min_bin_factor` members are not plotted
    pub min_bin_factor: f64,
    /// maximum number of Gaussians fitted to the distribution
    pub max_gaussians: usize,
    /// fixed number of Gaussians. Inferred from the distribution if `None`.
    pub gaussians: Option<usize>,
    /// smoothing of the frequency curve used to infer the number of Gaussians
    pub frequency_smoothing: LowPass,
    /// iteration limit of the fit
    pub max_iterations: usize,
    /// NPoM groups that receive a histogram
    pub npom_types: Vec<String>,
}
impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            range: (nanometer!(450.0), nanometer!(900.0)),
            bins: 80,
            ratio_threshold: 8.0,
            min_bin_factor: 5.0,
            max_gaussians: 4,
            gaussians: None,
            frequency_smoothing: LowPass::new(4000.0, 20000.0),
            max_iterations: 200,
            npom_types: [
                "All NPoMs",
                "Non-Weird-Peakers",
                "Weird Peakers",
                "Ideal NPoMs",
                "Doubles",
                "Singles",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}
impl HistogramConfig {
    /// Checks the consistency of the settings.
    ///
    /// # Errors
    ///
    /// This function will return an error if one of the settings is out of range.
    pub fn validate(&self) -> DfResult<()> {
        check_window(self.range, "histogram range")?;
        if self.bins == 0 {
            return Err(DfError::Config("histogram needs at least one bin".into()));
        }
        if self.max_gaussians == 0 || self.gaussians == Some(0) {
            return Err(DfError::Config(
                "at least one Gaussian must be fitted".into(),
            ));
        }
        if !self.ratio_threshold.is_normal() || self.ratio_threshold < 0.0 {
            return Err(DfError::Config("ratio threshold must be positive".into()));
        }
        Ok(())
    }
}

/// Complete configuration of an analysis run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// nominal particle diameter
    pub diameter: NpDiameter,
    /// z-stack condenser settings
    pub condenser: CondenserConfig,
    /// classifier settings
    pub classifier: ClassifierConfig,
    /// histogram settings
    pub histogram: HistogramConfig,
}
impl AnalysisConfig {
    /// Creates a default configuration for the given particle diameter.
    #[must_use]
    pub fn for_diameter(diameter: NpDiameter) -> Self {
        let mut config = Self::default();
        config.set_diameter(diameter);
        config
    }
    /// Sets the particle diameter and the dependent classifier settings.
    pub fn set_diameter(&mut self, diameter: NpDiameter) {
        self.diameter = diameter;
        self.classifier.set_diameter(diameter);
    }
    /// Reads a configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// This function will return an error if the file cannot be read or parsed or if the
    /// configuration is inconsistent.
    pub fn from_yaml_file(path: &Path) -> DfResult<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            DfError::Config(format!("cannot read file {} : {}", path.display(), e))
        })?;
        Self::from_yaml(&contents)
    }
    /// Parses a configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// This function will return an error if the string cannot be parsed or if the configuration
    /// is inconsistent.
    pub fn from_yaml(contents: &str) -> DfResult<Self> {
        let config: Self = serde_yaml::from_str(contents)
            .map_err(|e| DfError::Config(format!("parsing of configuration failed: {e}")))?;
        config.validate()?;
        Ok(config)
    }
    /// Serializes the configuration into YAML.
    ///
    /// # Errors
    ///
    /// This function will return an error if the serialization fails.
    pub fn to_yaml(&self) -> DfResult<String> {
        serde_yaml::to_string(self)
            .map_err(|e| DfError::Config(format!("serialization of configuration failed: {e}")))
    }
    /// Checks the consistency of all settings.
    ///
    /// # Errors
    ///
    /// This function will return an error if one of the sub-configurations is invalid.
    pub fn validate(&self) -> DfResult<()> {
        self.condenser.validate()?;
        self.classifier.validate()?;
        self.histogram.validate()
    }
}

/// Value of a [`Length`] in nanometers, rounded to femtometers.
#[must_use]
pub fn nm(length: Length) -> f64 {
    (length.get::<nanometer>() * 1.0e6).round() / 1.0e6
}

/// Borders of a wavelength window in nanometers.
#[must_use]
pub fn window_nm(window: (Length, Length)) -> (f64, f64) {
    (nm(window.0), nm(window.1))
}

fn check_window(window: (Length, Length), name: &str) -> DfResult<()> {
    let (start, end) = window_nm(window);
    if !start.is_finite() || !end.is_finite() || start >= end {
        return Err(DfError::Config(format!(
            "{name} must be a finite, ascending wavelength range"
        )));
    }
    Ok(())
}
