#![warn(missing_docs)]
//! Reduction of a focal z-stack to a single spectrum.
//!
//! For every wavelength the focal plane with the strongest scattering signal is located. For
//! well-aligned particles this is the thresholded centroid of the focal profile, for mis-aligned
//! particles the brightest non-edge slice. The resulting chromatic-aberration curve is smoothed
//! and the spectrum is sampled along it by linear interpolation between neighbouring slices.
use log::{debug, warn};
use nalgebra::DMatrix;

use crate::{
    archive::{References, ZStack},
    config::{window_nm, CondenserConfig},
    error::{DfError, DfResult},
    utils::{
        filter_data::remove_nans,
        math_utils::{argmax, finite_mean, interp, kahan_sum, linspace, trapz},
        signal::{detect_maxima, truncation_range},
        spikes::remove_spikes,
        usize_to_f64,
    },
};

/// Result of condensing a z-stack.
#[derive(Debug, Clone, PartialEq)]
pub struct CondensedSpectrum {
    /// the condensed spectrum
    pub y: Vec<f64>,
    /// focal height at each wavelength
    pub z_profile: Vec<f64>,
    /// fractional focal index at each wavelength
    pub focus: Vec<f64>,
    /// whether the particle passed the alignment check
    pub aligned: bool,
    /// alignment score (NaN if it could not be determined)
    pub alignment_score: f64,
}

/// Applies background and white-reference correction `(Z - B) / (R - B)`.
///
/// Columns with `R == B` are divided by one.
#[must_use]
pub fn reference_correct(raw: &DMatrix<f64>, references: &References) -> DMatrix<f64> {
    let (background, reference) = (references.background(), references.reference());
    DMatrix::from_fn(raw.nrows(), raw.ncols(), |r, c| {
        let b = background.get(c).copied().unwrap_or(0.0);
        let span = reference.get(c).copied().unwrap_or(1.0) - b;
        let span = if span == 0.0 || !span.is_finite() {
            1.0
        } else {
            span
        };
        (raw[(r, c)] - b) / span
    })
}

/// Returns the focus offset of every slice.
///
/// A missing focus axis or one whose length does not match the number of slices is replaced by
/// a linear span `-default_dz_span ... default_dz_span`.
///
/// # Errors
///
/// This function will return an error if the default span is invalid.
pub fn focus_axis(dz: Option<&[f64]>, slices: usize, config: &CondenserConfig) -> DfResult<Vec<f64>> {
    if let Some(dz) = dz {
        if dz.len() == slices && dz.iter().all(|v| v.is_finite()) {
            return Ok(dz.to_vec());
        }
        debug!(
            "focus axis of length {} does not match {} slices, using linear span",
            dz.len(),
            slices
        );
    }
    match slices {
        0 => Ok(Vec::new()),
        1 => Ok(vec![0.0]),
        _ => Ok(linspace(-config.default_dz_span, config.default_dz_span, slices)?
            .iter()
            .copied()
            .collect()),
    }
}

fn column(z: &DMatrix<f64>, col: usize) -> Vec<f64> {
    z.column(col).iter().copied().collect()
}

/// Computes the alignment score of a z-stack.
///
/// The score compares the signal in the central part of the focal profile to the signal at both
/// ends for the strongest columns of the alignment window. A centred particle scatters most
/// strongly in the middle of the scan and hence reaches a large score.
///
/// # Errors
///
/// This function will return an error if
///   - the z-stack has less than three slices or does not match the wavelength axis
///   - no column yields a finite score
pub fn check_alignment(
    x: &[f64],
    z: &DMatrix<f64>,
    focus: &[f64],
    config: &CondenserConfig,
) -> DfResult<f64> {
    if z.nrows() < 3 {
        return Err(DfError::Condenser(
            "alignment check needs at least three focal slices".into(),
        ));
    }
    if z.ncols() != x.len() || focus.len() != z.nrows() {
        return Err(DfError::Condenser(
            "z-stack does not match wavelength or focus axis".into(),
        ));
    }
    let (start, end) = window_nm(config.alignment_window);
    let window = truncation_range(x, start, end);
    if window.is_empty() {
        return Err(DfError::Condenser(
            "alignment window outside of the wavelength axis".into(),
        ));
    }
    let totals: Vec<f64> = window
        .clone()
        .map(|c| kahan_sum(&column(z, c)))
        .collect();
    let smoothed = config.alignment_smoothing.apply(&totals)?;
    let mut maxima = detect_maxima(&smoothed);
    if maxima.is_empty() {
        maxima.extend(argmax(&smoothed));
    }
    maxima.sort_by(|a, b| smoothed[*b].total_cmp(&smoothed[*a]));
    maxima.truncate(config.alignment_columns);
    let mut columns: Vec<usize> = maxima
        .iter()
        .flat_map(|m| {
            m.saturating_sub(config.alignment_neighbours)
                ..=(m + config.alignment_neighbours).min(smoothed.len() - 1)
        })
        .map(|c| c + window.start)
        .collect();
    columns.sort_unstable();
    columns.dedup();

    let (focus, reversed) = if focus.first() > focus.last() {
        (focus.iter().rev().copied().collect::<Vec<f64>>(), true)
    } else {
        (focus.to_vec(), false)
    };
    let grid = linspace(
        -config.focal_grid_half_width,
        config.focal_grid_half_width,
        config.focal_grid_points,
    )?;
    let edge = config.focal_edge_points;
    let ratios: Vec<f64> = columns
        .iter()
        .map(|c| {
            let mut profile = column(z, *c);
            profile[0] = profile[1];
            if reversed {
                profile.reverse();
            }
            let min = profile.iter().copied().fold(f64::INFINITY, f64::min);
            let profile: Vec<f64> = profile.iter().map(|v| v - min).collect();
            let sampled: Vec<f64> = grid.iter().map(|g| interp(*g, &focus, &profile)).collect();
            let n = sampled.len();
            let mid = trapz(&sampled[edge..n - edge]);
            let outer = trapz(&sampled[..edge]) + trapz(&sampled[n - edge..]);
            mid / outer
        })
        .collect();
    finite_mean(&ratios).ok_or_else(|| {
        DfError::Condenser("no focal profile yields a finite alignment score".into())
    })
}

fn centroid(profile: &[f64], threshold: f64) -> f64 {
    let min = profile.iter().copied().fold(f64::INFINITY, f64::min);
    let max = profile.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    if !span.is_normal() {
        return f64::NAN;
    }
    let weights: Vec<f64> = profile
        .iter()
        .map(|v| ((v - min) / span - threshold).max(0.0))
        .collect();
    let weighted: Vec<f64> = weights
        .iter()
        .enumerate()
        .map(|(k, w)| usize_to_f64(k) * w)
        .collect();
    kahan_sum(&weighted) / kahan_sum(&weights)
}

fn brightest_inner_slice(profile: &[f64]) -> f64 {
    let n = profile.len();
    if n < 3 {
        return argmax(profile).map_or(f64::NAN, usize_to_f64);
    }
    argmax(&profile[1..n - 1]).map_or(f64::NAN, |k| usize_to_f64(k + 1))
}

/// Sample value at a fractional index by linear interpolation between neighbouring entries.
fn sample(values: &[f64], index: f64) -> f64 {
    let last = values.len() - 1;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lower = (index.floor().max(0.0) as usize).min(last);
    let upper = (lower + 1).min(last);
    let frac = index - usize_to_f64(lower);
    values[lower].mul_add(1.0 - frac, values[upper] * frac)
}

/// Condenses a reference-corrected z-stack (rows are focal slices) to a spectrum.
///
/// # Errors
///
/// This function will return an error if
///   - the z-stack is empty or does not match the wavelength axis
///   - the smoothing parameters are invalid
pub fn condense(
    x: &[f64],
    z: &DMatrix<f64>,
    dz: Option<&[f64]>,
    config: &CondenserConfig,
) -> DfResult<CondensedSpectrum> {
    let slices = z.nrows();
    if slices == 0 || z.ncols() == 0 {
        return Err(DfError::Condenser("empty z-stack".into()));
    }
    if z.ncols() != x.len() {
        return Err(DfError::Condenser(format!(
            "z-stack has {} columns but the wavelength axis {} entries",
            z.ncols(),
            x.len()
        )));
    }
    let focus_axis = focus_axis(dz, slices, config)?;
    if slices == 1 {
        return Ok(CondensedSpectrum {
            y: column_row(z, 0),
            z_profile: vec![focus_axis[0]; x.len()],
            focus: vec![0.0; x.len()],
            aligned: false,
            alignment_score: f64::NAN,
        });
    }
    let (aligned, alignment_score) = match check_alignment(x, z, &focus_axis, config) {
        Ok(score) => (score > config.alignment_threshold, score),
        Err(e) => {
            debug!("alignment check failed: {e}");
            (false, f64::NAN)
        }
    };
    let raw_focus: Vec<f64> = (0..z.ncols())
        .map(|c| {
            let profile = column(z, c);
            if aligned {
                centroid(&profile, config.threshold)
            } else {
                brightest_inner_slice(&profile)
            }
        })
        .collect();
    let raw_focus = remove_nans(&raw_focus)
        .unwrap_or_else(|_| vec![usize_to_f64(slices - 1) / 2.0; raw_focus.len()]);
    let last = usize_to_f64(slices - 1);
    let focus: Vec<f64> = config
        .centroid_smoothing
        .apply(&raw_focus)?
        .iter()
        .map(|c| c.clamp(0.0, last))
        .collect();
    let y: Vec<f64> = focus
        .iter()
        .enumerate()
        .map(|(c, f)| sample(&column(z, c), *f))
        .collect();
    let z_profile: Vec<f64> = focus.iter().map(|f| sample(&focus_axis, *f)).collect();
    Ok(CondensedSpectrum {
        y,
        z_profile,
        focus,
        aligned,
        alignment_score,
    })
}

fn column_row(z: &DMatrix<f64>, row: usize) -> Vec<f64> {
    z.row(row).iter().copied().collect()
}

/// Corrects, condenses and despikes the z-stack of a particle.
///
/// A failing spike removal keeps the condensed spectrum.
///
/// # Errors
///
/// This function will return an error if the z-stack cannot be condensed.
pub fn condense_particle(
    stack: &ZStack,
    references: &References,
    config: &CondenserConfig,
) -> DfResult<CondensedSpectrum> {
    let x = references.wavelengths();
    let corrected = reference_correct(&stack.z, references);
    let mut condensed = condense(x, &corrected, stack.dz.as_deref(), config)?;
    if config.remove_spikes {
        match remove_spikes(x, &condensed.y, references.reference(), config.spike_factor) {
            Ok(y) => condensed.y = y,
            Err(e) => warn!("spike removal failed, keeping spectrum: {e}"),
        }
    }
    if condensed.y.iter().any(|v| !v.is_finite()) {
        condensed.y = remove_nans(&condensed.y)?;
    }
    Ok(condensed)
}
