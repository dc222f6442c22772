#![warn(missing_docs)]
//! Collaborators notified by the batch processor.
//!
//! Plotting or manual review of spectra is not part of the analysis itself. Such consumers
//! implement [`Observer`] and are handed to the batch; the batch never waits for them to decide
//! anything.
use log::{debug, info};

use crate::{histogram::Histogram, spectrum::DfSpectrum, summary::NpomGroup};

/// Receiver of intermediate results of a batch.
pub trait Observer: Send + Sync {
    /// Called for every classified spectrum in particle order.
    fn on_spectrum_classified(&self, _spectrum: &DfSpectrum) {}
    /// Called after the histogram of an NPoM group has been stored.
    fn on_histogram_ready(&self, _group: NpomGroup, _histogram: &Histogram) {}
}

/// Observer ignoring all results.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;
impl Observer for NullObserver {}

/// Observer writing results to the log.
///
/// Classifications are reported at `debug` level, histograms at `info` level.
#[derive(Debug, Clone, Copy)]
pub struct LogObserver {
    min_bin_factor: f64,
}
impl LogObserver {
    /// Creates a new [`LogObserver`]. Bins with less than `max count / min_bin_factor` members
    /// are not reported.
    #[must_use]
    pub const fn new(min_bin_factor: f64) -> Self {
        Self { min_bin_factor }
    }
}
impl Default for LogObserver {
    fn default() -> Self {
        Self::new(5.0)
    }
}
impl Observer for LogObserver {
    fn on_spectrum_classified(&self, spectrum: &DfSpectrum) {
        let class = spectrum.class();
        match class.reason() {
            Some(reason) => debug!("{}: not an NPoM ({reason})", spectrum.name()),
            None => debug!(
                "{}: NPoM, double: {}, weird peak: {}, aligned: {}, coupled mode: {}",
                spectrum.name(),
                class.is_double(),
                class.has_weird(),
                spectrum.aligned(),
                spectrum
                    .peaks()
                    .and_then(|p| p.coupled_wavelength())
                    .map_or_else(|| "N/A".to_owned(), |wl| format!("{wl:.1} nm"))
            ),
        }
    }
    fn on_histogram_ready(&self, group: NpomGroup, histogram: &Histogram) {
        let displayed = histogram.displayed_bins(self.min_bin_factor);
        let modal = histogram
            .modal_bin()
            .map(|i| &histogram.bins()[i])
            .map_or_else(String::new, |b| {
                format!(", modal bin {:.1} - {:.1} nm", b.start, b.end)
            });
        info!(
            "{}: {} spectra in {} displayed bins{modal}",
            group.name(),
            histogram.total(),
            displayed.len()
        );
    }
}
