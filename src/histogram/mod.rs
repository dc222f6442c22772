#![warn(missing_docs)]
//! Coupled-mode histograms of the NPoM groups.
//!
//! The coupled-mode wavelengths of a group are binned, the normalized spectra of every bin are
//! averaged and the frequency distribution is fitted with one or more Gaussians. Everything is
//! stored below `NPoMs/<group>/Histogram data` of the summary archive.
pub mod gauss_fit;

use std::{collections::BTreeMap, sync::Arc};

use hdf5::Group;
use itertools::Itertools;
use log::{debug, info, warn};

pub use gauss_fit::{fit_gaussians, GaussFit, GaussPeak, LmConfig};

use crate::{
    archive::attrs,
    classifier::Classifier,
    config::{window_nm, HistogramConfig},
    error::{DfError, DfResult},
    summary::{write_spectrum_attrs, NpomGroup, StoredSpectrum, SummaryWriter, PEAK_ATTRIBUTES, RAW},
    utils::{
        math_utils::{argmax, finite_mean},
        signal::{detect_maxima, truncate},
        f64_to_usize, usize_to_f64,
    },
};

/// Name of the histogram group below an NPoM group.
pub const HISTOGRAM_DATA: &str = "Histogram data";
/// Name of the group holding the populated bins.
pub const BINNED_DATA: &str = "Binned y data";
/// Link to the mean spectrum of the most populated bin.
pub const MODAL_REPRESENTATIVE: &str = "Modal representative spectrum";
/// Link to the mean spectrum of the bin containing a fitted resonance.
pub const AVERAGE_REPRESENTATIVE: &str = "Average representative spectrum";

/// Maxima of the smoothed distribution below this fraction of the largest one are ignored
/// when inferring the number of Gaussians.
const MIN_PEAK_FRACTION: f64 = 0.2;

/// A single histogram bin.
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    /// lower edge (nm)
    pub start: f64,
    /// upper edge (nm)
    pub end: f64,
    /// dataset names of the member spectra in particle order
    pub members: Vec<String>,
    /// mean normalized spectrum of the members
    pub mean: Option<Vec<f64>>,
    /// mean of the members' numerical peak attributes
    pub peak_means: BTreeMap<String, f64>,
}
impl Bin {
    /// Number of member spectra.
    #[must_use]
    pub fn count(&self) -> usize {
        self.members.len()
    }
    /// Returns `true` if `wavelength` lies within the bin.
    #[must_use]
    pub fn contains(&self, wavelength: f64) -> bool {
        (self.start..self.end).contains(&wavelength)
    }
}

/// Coupled-mode histogram of one NPoM group.
#[derive(Debug, Clone)]
pub struct Histogram {
    group: NpomGroup,
    x: Vec<f64>,
    bins: Vec<Bin>,
    fit: Option<GaussFit>,
}

/// Returns the coupled-mode wavelength of a spectrum if it takes part in the histogram.
///
/// Spectra without a coupled mode, outside of the histogram range, with an intensity ratio
/// above the threshold or with a normalized minimum below its negative are excluded.
fn histogram_wavelength(spectrum: &StoredSpectrum, x: &[f64], config: &HistogramConfig) -> Option<f64> {
    let wavelength = spectrum.attribute("Coupled mode wavelength")?;
    let (start, end) = window_nm(config.range);
    if !(start..=end).contains(&wavelength) || spectrum.y.len() != x.len() {
        return None;
    }
    let ratio = spectrum.attribute("Intensity ratio (normalised)")?;
    if ratio >= config.ratio_threshold {
        return None;
    }
    let (_, y) = truncate(x, &spectrum.y, start, end);
    let minimum = y.iter().copied().fold(f64::INFINITY, f64::min);
    (minimum > -config.ratio_threshold).then_some(wavelength)
}

fn mean_spectrum(spectra: &[&StoredSpectrum]) -> Option<Vec<f64>> {
    let first = spectra.first()?;
    let mut sum = vec![0.0; first.y.len()];
    for spectrum in spectra {
        for (s, v) in sum.iter_mut().zip(&spectrum.y) {
            *s += v;
        }
    }
    let n = usize_to_f64(spectra.len());
    Some(sum.into_iter().map(|s| s / n).collect())
}

fn peak_means(spectra: &[&StoredSpectrum]) -> BTreeMap<String, f64> {
    PEAK_ATTRIBUTES
        .iter()
        .filter_map(|name| {
            let values: Vec<f64> = spectra.iter().filter_map(|s| s.attribute(name)).collect();
            finite_mean(&values).map(|mean| ((*name).to_owned(), mean))
        })
        .collect()
}

/// Infers (centre, height) start values for the Gaussian fit.
///
/// The frequencies are smoothed and all maxima reaching [`MIN_PEAK_FRACTION`] of the largest one
/// are used, at most `max_gaussians` (or exactly the configured number of) of the highest ones.
///
/// # Errors
///
/// This function will return an error if the smoothing settings are invalid.
pub fn initial_peaks(
    centres: &[f64],
    frequencies: &[usize],
    config: &HistogramConfig,
) -> DfResult<Vec<(f64, f64)>> {
    let values: Vec<f64> = frequencies.iter().map(|f| usize_to_f64(*f)).collect();
    let smoothed = config.frequency_smoothing.apply(&values)?;
    let top = smoothed.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut maxima: Vec<usize> = detect_maxima(&smoothed)
        .into_iter()
        .filter(|i| smoothed[*i] >= top * MIN_PEAK_FRACTION)
        .collect();
    if maxima.is_empty() {
        maxima.extend(argmax(&values));
    }
    Ok(maxima
        .into_iter()
        .sorted_by(|a, b| smoothed[*b].total_cmp(&smoothed[*a]))
        .take(config.gaussians.unwrap_or(config.max_gaussians))
        .sorted_unstable()
        .map(|i| (centres[i], values[i]))
        .collect())
}

impl Histogram {
    /// Bins the given spectra by coupled-mode wavelength.
    ///
    /// The last bin is closed so that a wavelength equal to the upper range limit is counted.
    ///
    /// # Errors
    ///
    /// This function will return an error if the bin settings are invalid.
    pub fn build(
        group: NpomGroup,
        x: &[f64],
        spectra: &[StoredSpectrum],
        config: &HistogramConfig,
    ) -> DfResult<Self> {
        let (start, end) = window_nm(config.range);
        if config.bins == 0 || end <= start {
            return Err(DfError::Histogram(format!(
                "invalid binning: {} bins over {start} .. {end} nm",
                config.bins
            )));
        }
        let width = (end - start) / usize_to_f64(config.bins);
        let mut members: Vec<Vec<&StoredSpectrum>> = vec![Vec::new(); config.bins];
        for spectrum in spectra {
            if let Some(wavelength) = histogram_wavelength(spectrum, x, config) {
                let index = f64_to_usize(((wavelength - start) / width).floor()).min(config.bins - 1);
                members[index].push(spectrum);
            }
        }
        let bins = members
            .iter()
            .enumerate()
            .map(|(n, m)| Bin {
                start: usize_to_f64(n).mul_add(width, start),
                end: usize_to_f64(n + 1).mul_add(width, start),
                members: m.iter().map(|s| s.name.clone()).collect(),
                mean: mean_spectrum(m),
                peak_means: peak_means(m),
            })
            .collect();
        Ok(Self {
            group,
            x: x.to_vec(),
            bins,
            fit: None,
        })
    }
    /// The NPoM group of the histogram.
    #[must_use]
    pub const fn group(&self) -> NpomGroup {
        self.group
    }
    /// All bins in increasing wavelength order.
    #[must_use]
    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }
    /// Lower bin edges.
    #[must_use]
    pub fn left_edges(&self) -> Vec<f64> {
        self.bins.iter().map(|b| b.start).collect()
    }
    /// Bin centres.
    #[must_use]
    pub fn centres(&self) -> Vec<f64> {
        self.bins.iter().map(|b| (b.start + b.end) / 2.0).collect()
    }
    /// Number of members per bin.
    #[must_use]
    pub fn frequencies(&self) -> Vec<usize> {
        self.bins.iter().map(Bin::count).collect()
    }
    /// Number of binned spectra.
    #[must_use]
    pub fn total(&self) -> usize {
        self.bins.iter().map(Bin::count).sum()
    }
    /// Result of the Gaussian fit, if performed successfully.
    #[must_use]
    pub const fn fit(&self) -> Option<&GaussFit> {
        self.fit.as_ref()
    }
    /// Index of the most populated bin (the first one on ties).
    #[must_use]
    pub fn modal_bin(&self) -> Option<usize> {
        let frequencies = self.frequencies();
        let max = *frequencies.iter().max()?;
        (max > 0).then(|| frequencies.iter().position(|f| *f == max)).flatten()
    }
    /// Indices of the populated bins containing a fitted resonance, without duplicates.
    #[must_use]
    pub fn resonance_bins(&self) -> Vec<usize> {
        let Some(fit) = &self.fit else {
            return Vec::new();
        };
        let last = self.bins.len().saturating_sub(1);
        let mut indices: Vec<usize> = fit
            .peaks
            .iter()
            .filter_map(|p| {
                self.bins
                    .iter()
                    .position(|b| b.contains(p.center))
                    .or_else(|| (p.center == self.bins.get(last)?.end).then_some(last))
            })
            .filter(|i| self.bins[*i].count() > 0)
            .collect();
        indices.dedup();
        indices
    }
    /// Bins populated enough to be displayed (at least `max count / min_bin_factor` members).
    #[must_use]
    pub fn displayed_bins(&self, min_bin_factor: f64) -> Vec<usize> {
        let frequencies = self.frequencies();
        let max = usize_to_f64(frequencies.iter().copied().max().unwrap_or_default());
        let limit = if min_bin_factor > 0.0 {
            max / min_bin_factor
        } else {
            0.0
        };
        frequencies
            .iter()
            .enumerate()
            .filter(|(_, f)| **f > 0 && usize_to_f64(**f) >= limit)
            .map(|(i, _)| i)
            .collect()
    }
    /// Fits the frequency distribution with Gaussians at the bin centres.
    ///
    /// # Errors
    ///
    /// This function will return an error if the histogram is empty or the fit fails.
    pub fn fit_distribution(&mut self, config: &HistogramConfig) -> DfResult<&GaussFit> {
        self.fit = None;
        let frequencies = self.frequencies();
        if frequencies.iter().all(|f| *f == 0) {
            return Err(DfError::Histogram("histogram is empty".into()));
        }
        let centres = self.centres();
        let guesses = initial_peaks(&centres, &frequencies, config)?;
        let values: Vec<f64> = frequencies.iter().map(|f| usize_to_f64(*f)).collect();
        let width = self.bins.first().map_or(1.0, |b| b.end - b.start);
        let lm = LmConfig {
            max_iterations: config.max_iterations,
            ..LmConfig::default()
        };
        let fit = fit_gaussians(&centres, &values, &guesses, width, &lm)?;
        Ok(self.fit.insert(fit))
    }
    fn write_fit_attrs(&self, group: &Group) -> DfResult<()> {
        let peaks: &[GaussPeak] = self.fit.as_ref().map_or(&[][..], |f| f.peaks.as_slice());
        let collect = |f: fn(&GaussPeak) -> Option<f64>| -> Vec<Option<f64>> {
            if peaks.is_empty() {
                vec![None]
            } else {
                peaks.iter().map(f).collect()
            }
        };
        attrs::write_opt_f64_vec(group, "Average resonance", &collect(|p| Some(p.center)))?;
        attrs::write_opt_f64_vec(group, "Error", &collect(|p| p.center_stderr))?;
        attrs::write_opt_f64_vec(group, "FWHM", &collect(|p| Some(p.fwhm())))?;
        attrs::write_opt_f64_vec(group, "Standard deviation", &collect(|p| Some(p.sigma)))?;
        match &self.fit {
            Some(fit) => attrs::write_f64_vec(group, "Gaussian Fit", &fit.curve)?,
            None => attrs::write_str(group, "Gaussian Fit", attrs::NA)?,
        }
        attrs::write_f64_vec(group, "wavelengths", &self.x)
    }
    /// Writes the mean spectrum of a bin, analysed as NPoM.
    fn write_bin(
        &self,
        binned: &Group,
        index: usize,
        x: &Arc<Vec<f64>>,
        classifier: &Classifier,
    ) -> DfResult<()> {
        let bin = &self.bins[index];
        let Some(mean) = &bin.mean else {
            return Ok(());
        };
        let name = bin_name(index);
        let group = binned.create_group(&name)?;
        attrs::write_f64(&group, "Bin start (nm)", bin.start)?;
        attrs::write_f64(&group, "Bin end (nm)", bin.end)?;
        attrs::write_usize(&group, "Count", bin.count())?;
        for attribute in PEAK_ATTRIBUTES {
            attrs::write_opt_f64(&group, attribute, bin.peak_means.get(attribute).copied())?;
        }
        let sum = group
            .new_dataset::<f64>()
            .shape((mean.len(),))
            .create("Sum")?;
        sum.write_raw(mean)?;
        attrs::write_str(&sum, "Bin", &name)?;
        match classifier.analyse(index, x, mean.clone(), true) {
            Ok(spectrum) => write_spectrum_attrs(&sum, &spectrum)?,
            Err(e) => {
                warn!(
                    "{}: analysis of {name} failed: {e}",
                    self.group.name()
                );
                attrs::write_f64_vec(&sum, "wavelengths", x)?;
                attrs::write_str(&sum, "Analysis error", &e.to_string())?;
            }
        }
        let raw = format!("/{}/{RAW}", self.group.path());
        for member in &bin.members {
            group.link_hard(&format!("{raw}/{member}"), member)?;
        }
        Ok(())
    }
    /// Stores the histogram in the summary archive, replacing an existing one.
    ///
    /// # Errors
    ///
    /// This function will return an error if the histogram cannot be written.
    pub fn store(&self, writer: &SummaryWriter, classifier: &Classifier) -> DfResult<()> {
        let npom = writer.npom_group(self.group)?;
        if npom.link_exists(HISTOGRAM_DATA) {
            debug!("replacing histogram data of {}", self.group.name());
            npom.unlink(HISTOGRAM_DATA)?;
        }
        let group = npom.create_group(HISTOGRAM_DATA)?;
        self.write_fit_attrs(&group)?;
        let edges = self.left_edges();
        group
            .new_dataset::<f64>()
            .shape((edges.len(),))
            .create("Bins")?
            .write_raw(&edges)?;
        let frequencies: Vec<u64> = self
            .frequencies()
            .iter()
            .map(|f| u64::try_from(*f).unwrap_or(u64::MAX))
            .collect();
        let dataset = group
            .new_dataset::<u64>()
            .shape((frequencies.len(),))
            .create("Frequencies")?;
        dataset.write_raw(&frequencies)?;
        attrs::write_f64_vec(&dataset, "wavelengths", &edges)?;

        let binned = group.create_group(BINNED_DATA)?;
        let x = Arc::new(self.x.clone());
        for index in 0..self.bins.len() {
            self.write_bin(&binned, index, &x, classifier)?;
        }
        let sum_path = |index: usize| {
            format!(
                "/{}/{HISTOGRAM_DATA}/{BINNED_DATA}/{}/Sum",
                self.group.path(),
                bin_name(index)
            )
        };
        if let Some(modal) = self.modal_bin() {
            group.link_hard(&sum_path(modal), MODAL_REPRESENTATIVE)?;
        }
        let resonances = self.resonance_bins();
        for (n, index) in resonances.iter().enumerate() {
            let name = if resonances.len() == 1 {
                AVERAGE_REPRESENTATIVE.to_owned()
            } else {
                format!("{AVERAGE_REPRESENTATIVE} {n}")
            };
            group.link_hard(&sum_path(*index), &name)?;
        }
        Ok(())
    }
}

/// Name of a bin group.
#[must_use]
pub fn bin_name(index: usize) -> String {
    format!("Bin {index:02}")
}

/// Builds, fits and stores the histogram of one NPoM group.
///
/// Returns `None` if the group holds no spectra. A failing Gaussian fit is logged and the
/// histogram is stored without fit results.
///
/// # Errors
///
/// This function will return an error if the group cannot be read or the histogram cannot be
/// written.
pub fn analyse_group(
    writer: &SummaryWriter,
    group: NpomGroup,
    config: &HistogramConfig,
    classifier: &Classifier,
) -> DfResult<Option<Histogram>> {
    let spectra = writer.read_npom_group(group)?;
    if spectra.is_empty() {
        debug!("{}: no spectra, histogram skipped", group.name());
        return Ok(None);
    }
    let x = writer.wavelengths()?;
    let mut histogram = Histogram::build(group, &x, &spectra, config)?;
    let fitted = histogram
        .fit_distribution(config)
        .map(|fit| fit.peaks.iter().map(|p| format!("{:.2}", p.center)).collect::<Vec<_>>());
    match fitted {
        Ok(centres) => {
            info!(
                "{}: {} of {} spectra binned, resonance(s) at {} nm",
                group.name(),
                histogram.total(),
                spectra.len(),
                centres.join(", ")
            );
        }
        Err(e) => warn!("{}: histogram fit failed: {e}", group.name()),
    }
    histogram.store(writer, classifier)?;
    Ok(Some(histogram))
}
