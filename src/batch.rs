#![warn(missing_docs)]
//! Batch processing of a particle scan.
//!
//! The z-stacks are read on the calling thread, condensed and classified on the rayon thread
//! pool chunk by chunk and finally written to the summary archive in particle order. After all
//! particles the histograms of the selected NPoM groups are built from the summary archive.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use log::{error, info, warn};
use rayon::prelude::*;

use crate::{
    archive::{InputArchive, ParticleMetadata, ParticleRef, References, ZStack},
    classifier::Classifier,
    condenser::condense_particle,
    config::AnalysisConfig,
    error::{DfError, DfResult},
    histogram::analyse_group,
    observer::{NullObserver, Observer},
    spectrum::DfSpectrum,
    summary::{NpomGroup, SummaryWriter},
};

/// Cloneable flag to cancel a running batch from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);
impl CancelToken {
    /// Creates a new, not cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    /// Returns `true` if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Selection and behaviour of a batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// position of the first particle to analyse
    pub first: usize,
    /// position of the last particle to analyse (inclusive). `0` analyses all remaining particles.
    pub last: usize,
    /// abort on the first failing particle or histogram
    pub raise_exceptions: bool,
    /// NPoM groups receiving a histogram
    pub histogram_groups: Vec<NpomGroup>,
    /// number of particles condensed in parallel before their results are written
    pub chunk_size: usize,
}
impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            first: 0,
            last: 0,
            raise_exceptions: false,
            histogram_groups: vec![
                NpomGroup::All,
                NpomGroup::NonWeirdPeakers,
                NpomGroup::WeirdPeakers,
                NpomGroup::Ideal,
                NpomGroup::Doubles,
                NpomGroup::Singles,
            ],
            chunk_size: 64,
        }
    }
}
impl BatchOptions {
    /// Sets the histogram groups from their archive names.
    ///
    /// # Errors
    ///
    /// This function will return an error if one of the names is unknown.
    pub fn set_histogram_groups(&mut self, names: &[String]) -> DfResult<()> {
        self.histogram_groups = names
            .iter()
            .map(|n| NpomGroup::from_name(n))
            .collect::<DfResult<Vec<_>>>()?;
        Ok(())
    }
    fn select<'a>(&self, particles: &'a [ParticleRef]) -> &'a [ParticleRef] {
        let first = self.first.min(particles.len());
        let end = if self.last == 0 {
            particles.len()
        } else {
            (self.last + 1).clamp(first, particles.len())
        };
        &particles[first..end]
    }
}

/// Counters of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// spectra written to the summary archive
    pub processed: usize,
    /// spectra classified as NPoM
    pub npoms: usize,
    /// spectra rejected as NPoM
    pub non_npoms: usize,
    /// particles whose analysis failed
    pub failed: usize,
    /// particles which could not be read together with the reason
    pub skipped: Vec<(String, String)>,
    /// NPoM groups a histogram was stored for
    pub histograms: Vec<NpomGroup>,
    /// the batch was cancelled before completion
    pub cancelled: bool,
}

enum Outcome {
    Analysed(DfSpectrum, ParticleMetadata),
    Crashed {
        y: Option<Vec<f64>>,
        metadata: ParticleMetadata,
        error: DfError,
    },
}

/// Owned handles and settings of a batch run.
pub struct BatchContext {
    input: InputArchive,
    writer: Mutex<SummaryWriter>,
    config: AnalysisConfig,
    classifier: Classifier,
    observer: Box<dyn Observer>,
    cancel: CancelToken,
}
impl BatchContext {
    /// Creates a new batch context.
    ///
    /// # Errors
    ///
    /// This function will return an error if the configuration is invalid.
    pub fn new(input: InputArchive, writer: SummaryWriter, config: AnalysisConfig) -> DfResult<Self> {
        config.validate()?;
        Ok(Self {
            input,
            writer: Mutex::new(writer),
            classifier: Classifier::new(config.classifier.clone()),
            config,
            observer: Box::new(NullObserver),
            cancel: CancelToken::new(),
        })
    }
    /// Replaces the observer notified about classified spectra and histograms.
    #[must_use]
    pub fn with_observer(mut self, observer: Box<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }
    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
    /// Returns the summary writer.
    ///
    /// # Errors
    ///
    /// This function will return an error if the writer lock is poisoned.
    pub fn into_writer(self) -> DfResult<SummaryWriter> {
        self.writer
            .into_inner()
            .map_err(|_| DfError::Other("Mutex lock failed".to_string()))
    }
    fn lock_writer(&self) -> DfResult<MutexGuard<'_, SummaryWriter>> {
        self.writer
            .lock()
            .map_err(|_| DfError::Other("Mutex lock failed".to_string()))
    }
    fn analyse(&self, particle: &ParticleRef, stack: &ZStack, references: &References) -> Outcome {
        let metadata = stack.metadata.clone();
        let condensed = match condense_particle(stack, references, &self.config.condenser) {
            Ok(condensed) => condensed,
            Err(error) => {
                return Outcome::Crashed {
                    y: None,
                    metadata,
                    error,
                }
            }
        };
        match self
            .classifier
            .analyse(particle.number, references.wavelengths(), condensed.y.clone(), false)
        {
            Ok(spectrum) => Outcome::Analysed(
                spectrum
                    .with_alignment(condensed.aligned, condensed.alignment_score, condensed.z_profile)
                    .with_source(&particle.path),
                metadata,
            ),
            Err(error) => Outcome::Crashed {
                y: Some(condensed.y),
                metadata,
                error,
            },
        }
    }
    fn write(
        &self,
        particle: &ParticleRef,
        outcome: Outcome,
        references: &References,
        options: &BatchOptions,
        report: &mut BatchReport,
    ) -> DfResult<()> {
        let mut writer = self.lock_writer()?;
        match outcome {
            Outcome::Analysed(spectrum, metadata) => {
                writer.write_spectrum(&spectrum, &metadata)?;
                report.processed += 1;
                if spectrum.class().is_npom() {
                    report.npoms += 1;
                } else {
                    report.non_npoms += 1;
                }
                self.observer.on_spectrum_classified(&spectrum);
            }
            Outcome::Crashed { y, metadata, error } => {
                error!("analysis of {} failed: {error}", particle.path);
                report.failed += 1;
                if options.raise_exceptions {
                    return Err(error);
                }
                if let Some(y) = y {
                    writer.write_failed(
                        particle.number,
                        references.wavelengths(),
                        &y,
                        &particle.path,
                        &error.to_string(),
                    )?;
                    if let Some(date) = metadata.date() {
                        writer.set_date_measured(&date)?;
                    }
                }
            }
        }
        Ok(())
    }
    fn process_particles(
        &self,
        particles: &[ParticleRef],
        options: &BatchOptions,
        report: &mut BatchReport,
    ) -> DfResult<()> {
        let references = self.input.references(particles)?;
        for chunk in particles.chunks(options.chunk_size.max(1)) {
            let mut stacks = Vec::with_capacity(chunk.len());
            for particle in chunk {
                if self.cancel.is_cancelled() {
                    break;
                }
                match self.input.z_stack(particle, &references) {
                    Ok(stack) => stacks.push((particle, stack)),
                    Err(e) => {
                        warn!("skipping {}: {e}", particle.path);
                        report.skipped.push((particle.path.clone(), e.to_string()));
                    }
                }
            }
            let outcomes: Vec<Outcome> = stacks
                .par_iter()
                .map(|(particle, stack)| self.analyse(particle, stack, &references))
                .collect();
            for ((particle, _), outcome) in stacks.iter().zip(outcomes) {
                self.write(particle, outcome, &references, options, report)?;
            }
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
        }
        Ok(())
    }
    /// Analyses the selected particles and builds the histograms.
    ///
    /// Single particles never abort the batch unless `raise_exceptions` is set. A cancelled
    /// batch stops after the current particle, skips the histograms and returns a report flagged
    /// `cancelled`; the summary archive stays consistent.
    ///
    /// # Errors
    ///
    /// This function will return an error if
    ///   - the particle list or the references cannot be read
    ///   - writing the summary archive fails
    ///   - `raise_exceptions` is set and a particle or histogram fails
    pub fn run(&self, options: &BatchOptions) -> DfResult<BatchReport> {
        let mut report = BatchReport::default();
        let particles = self.input.particles()?;
        let selected = options.select(&particles);
        info!(
            "analysing {} of {} particles of {}",
            selected.len(),
            particles.len(),
            self.input.scan_name()
        );
        if self.cancel.is_cancelled() {
            report.cancelled = true;
        } else if !selected.is_empty() {
            self.process_particles(selected, options, &mut report)?;
        }
        if report.cancelled {
            info!("batch cancelled");
        } else {
            let writer = self.lock_writer()?;
            report.histograms = run_statistics(
                &writer,
                &self.config,
                &options.histogram_groups,
                self.observer.as_ref(),
                &self.cancel,
                options.raise_exceptions,
            )?;
            report.cancelled = self.cancel.is_cancelled();
        }
        self.lock_writer()?.file().flush()?;
        info!(
            "{} spectra processed: {} NPoMs, {} non-NPoMs, {} failed, {} skipped",
            report.processed,
            report.npoms,
            report.non_npoms,
            report.failed,
            report.skipped.len()
        );
        Ok(report)
    }
}

/// Builds and stores the histograms of the given NPoM groups.
///
/// Returns the groups a histogram was stored for. Cancellation is checked between groups.
///
/// # Errors
///
/// This function will return an error if `raise_exceptions` is set and a histogram fails.
pub fn run_statistics(
    writer: &SummaryWriter,
    config: &AnalysisConfig,
    groups: &[NpomGroup],
    observer: &dyn Observer,
    cancel: &CancelToken,
    raise_exceptions: bool,
) -> DfResult<Vec<NpomGroup>> {
    let classifier = Classifier::new(config.classifier.clone());
    let mut stored = Vec::new();
    for group in groups {
        if cancel.is_cancelled() {
            break;
        }
        match analyse_group(writer, *group, &config.histogram, &classifier) {
            Ok(Some(histogram)) => {
                observer.on_histogram_ready(*group, &histogram);
                stored.push(*group);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("histogram of {} failed: {e}", group.name());
                if raise_exceptions {
                    return Err(e);
                }
            }
        }
    }
    Ok(stored)
}
