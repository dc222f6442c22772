//! Bounded Levenberg-Marquardt fit of a sum of Gaussians.
//!
//! Model: `f(x) = Σ h_k · exp(-(x - c_k)² / (2 σ_k²))` with three parameters per peak. Heights
//! are kept non-negative, centres inside their bounds and widths positive by projecting each
//! step back onto the feasible region.
use nalgebra::{DMatrix, DVector};

use crate::{
    error::{DfError, DfResult},
    utils::usize_to_f64,
};

/// Ratio between full width at half maximum and standard deviation of a Gaussian.
pub const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949;

const PARAMS_PER_PEAK: usize = 3;

/// Settings of the optimizer.
#[derive(Debug, Clone)]
pub struct LmConfig {
    /// maximum number of iterations
    pub max_iterations: usize,
    /// the fit has converged if no parameter changes by more than this value
    pub convergence_threshold: f64,
    /// initial damping
    pub initial_lambda: f64,
    /// damping factor after a rejected step
    pub lambda_up: f64,
    /// damping factor after an accepted step
    pub lambda_down: f64,
}
impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            convergence_threshold: 1e-8,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

/// A single fitted Gaussian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussPeak {
    /// peak height
    pub height: f64,
    /// centre
    pub center: f64,
    /// standard deviation
    pub sigma: f64,
    /// standard error of the centre, unavailable if the covariance cannot be estimated
    pub center_stderr: Option<f64>,
}
impl GaussPeak {
    /// Full width at half maximum.
    #[must_use]
    pub fn fwhm(&self) -> f64 {
        FWHM_PER_SIGMA * self.sigma
    }
}

/// Result of a fit.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussFit {
    /// fitted peaks ordered by increasing centre
    pub peaks: Vec<GaussPeak>,
    /// model evaluated at the fitted x values
    pub curve: Vec<f64>,
    /// sum of squared residuals
    pub chi2: f64,
    /// number of iterations performed
    pub iterations: usize,
    /// `true` if the parameter changes fell below the convergence threshold
    pub converged: bool,
}

struct GaussModel {
    lower: Vec<f64>,
    upper: Vec<f64>,
}
impl GaussModel {
    fn evaluate(x: f64, params: &[f64]) -> f64 {
        params
            .chunks_exact(PARAMS_PER_PEAK)
            .map(|p| p[0] * (-(x - p[1]).powi(2) / (2.0 * p[2] * p[2])).exp())
            .sum()
    }
    fn jacobian_row(x: f64, params: &[f64], row: &mut [f64]) {
        for (p, d) in params
            .chunks_exact(PARAMS_PER_PEAK)
            .zip(row.chunks_exact_mut(PARAMS_PER_PEAK))
        {
            let (height, center, sigma) = (p[0], p[1], p[2]);
            let dx = x - center;
            let e = (-dx * dx / (2.0 * sigma * sigma)).exp();
            d[0] = e;
            d[1] = height * e * dx / (sigma * sigma);
            d[2] = height * e * dx * dx / (sigma * sigma * sigma);
        }
    }
    fn constrain(&self, params: &mut [f64]) {
        for ((p, lo), hi) in params.iter_mut().zip(&self.lower).zip(&self.upper) {
            *p = p.clamp(*lo, *hi);
        }
    }
}

fn chi2(x: &[f64], y: &[f64], params: &[f64]) -> f64 {
    x.iter()
        .zip(y)
        .map(|(xi, yi)| (yi - GaussModel::evaluate(*xi, params)).powi(2))
        .sum()
}

fn jacobian(x: &[f64], params: &[f64]) -> DMatrix<f64> {
    let mut jacobian = DMatrix::zeros(x.len(), params.len());
    let mut row = vec![0.0; params.len()];
    for (i, xi) in x.iter().enumerate() {
        GaussModel::jacobian_row(*xi, params, &mut row);
        for (j, value) in row.iter().enumerate() {
            jacobian[(i, j)] = *value;
        }
    }
    jacobian
}

/// Initial parameters and bounds.
///
/// Centres are bounded by the midpoints to the neighbouring guesses (the axis limits for the
/// outer peaks). A single peak starts with the standard deviation of the distribution, multiple
/// peaks with half the distance to the closest bound.
fn initial_model(x: &[f64], y: &[f64], guesses: &[(f64, f64)], min_sigma: f64) -> (Vec<f64>, GaussModel) {
    let (first, last) = (x[0], x[x.len() - 1]);
    let k = guesses.len();
    let mut params = Vec::with_capacity(PARAMS_PER_PEAK * k);
    let mut lower = Vec::with_capacity(PARAMS_PER_PEAK * k);
    let mut upper = Vec::with_capacity(PARAMS_PER_PEAK * k);
    for (n, (center, height)) in guesses.iter().enumerate() {
        let c_min = if n == 0 {
            first
        } else {
            (guesses[n - 1].0 + center) / 2.0
        };
        let c_max = if n == k - 1 {
            last
        } else {
            (center + guesses[n + 1].0) / 2.0
        };
        let sigma = if k == 1 {
            let total: f64 = y.iter().sum();
            let mean = x.iter().zip(y).map(|(a, b)| a * b).sum::<f64>() / total;
            (x.iter().zip(y).map(|(a, b)| b * (a - mean).powi(2)).sum::<f64>() / total).sqrt()
        } else {
            let left = if n == 0 { f64::INFINITY } else { center - c_min };
            let right = if n == k - 1 { f64::INFINITY } else { c_max - center };
            left.min(right) / 2.0
        };
        params.extend([*height, *center, sigma.max(min_sigma)]);
        lower.extend([0.0, c_min, min_sigma / 4.0]);
        upper.extend([f64::INFINITY, c_max, last - first]);
    }
    let model = GaussModel { lower, upper };
    model.constrain(&mut params);
    (params, model)
}

/// Standard errors of all parameters from the covariance `(JᵀJ)⁻¹ · χ² / (n - p)`.
fn standard_errors(x: &[f64], params: &[f64], chi2: f64) -> Option<Vec<f64>> {
    let dof = x.len().checked_sub(params.len()).filter(|d| *d > 0)?;
    let j = jacobian(x, params);
    let covariance = (j.transpose() * &j).try_inverse()? * (chi2 / usize_to_f64(dof));
    let errors: Vec<f64> = covariance.diagonal().iter().map(|v| v.sqrt()).collect();
    errors.iter().all(|e| e.is_finite()).then_some(errors)
}

/// Fits a sum of Gaussians to the data.
///
/// `guesses` holds (centre, height) pairs ordered by increasing centre; their number defines the
/// number of fitted peaks. `min_sigma` is the smallest meaningful width (usually the bin width).
///
/// # Errors
///
/// This function will return an error if
///   - no guesses are given or the data is too short for the number of parameters
///   - the data contains no signal or non-finite values
///   - the fit diverges
pub fn fit_gaussians(
    x: &[f64],
    y: &[f64],
    guesses: &[(f64, f64)],
    min_sigma: f64,
    config: &LmConfig,
) -> DfResult<GaussFit> {
    let n_params = PARAMS_PER_PEAK * guesses.len();
    if guesses.is_empty() {
        return Err(DfError::Histogram("no initial peaks given".into()));
    }
    if x.len() != y.len() || x.len() <= n_params {
        return Err(DfError::Histogram(format!(
            "{} samples are not enough to fit {} Gaussians",
            x.len().min(y.len()),
            guesses.len()
        )));
    }
    if y.iter().chain(x).any(|v| !v.is_finite()) || y.iter().all(|v| *v <= 0.0) {
        return Err(DfError::Histogram("frequency distribution holds no signal".into()));
    }
    let (mut params, model) = initial_model(x, y, guesses, min_sigma);
    let mut lambda = config.initial_lambda;
    let mut current = chi2(x, y, &params);
    let mut converged = false;
    let mut iterations = 0;
    for iteration in 0..config.max_iterations {
        iterations = iteration + 1;
        let j = jacobian(x, &params);
        let residuals = DVector::from_iterator(
            x.len(),
            x.iter()
                .zip(y)
                .map(|(xi, yi)| yi - GaussModel::evaluate(*xi, &params)),
        );
        let jt = j.transpose();
        let mut damped = &jt * &j;
        let gradient = &jt * residuals;
        for i in 0..n_params {
            damped[(i, i)] *= 1.0 + lambda;
        }
        let Some(delta) = damped.lu().solve(&gradient) else {
            break;
        };
        let mut candidate: Vec<f64> = params.iter().zip(delta.iter()).map(|(p, d)| p + d).collect();
        model.constrain(&mut candidate);
        let next = chi2(x, y, &candidate);
        if next < current {
            params = candidate;
            current = next;
            lambda *= config.lambda_down;
            if delta.amax() < config.convergence_threshold {
                converged = true;
                break;
            }
        } else {
            lambda *= config.lambda_up;
            if lambda > 1e10 {
                break;
            }
        }
    }
    if !current.is_finite() || params.iter().any(|p| !p.is_finite()) {
        return Err(DfError::Histogram("Gaussian fit diverged".into()));
    }
    let errors = standard_errors(x, &params, current);
    let mut peaks: Vec<GaussPeak> = params
        .chunks_exact(PARAMS_PER_PEAK)
        .enumerate()
        .map(|(k, p)| GaussPeak {
            height: p[0],
            center: p[1],
            sigma: p[2],
            center_stderr: errors.as_ref().map(|e| e[PARAMS_PER_PEAK * k + 1]),
        })
        .collect();
    peaks.sort_by(|a, b| a.center.total_cmp(&b.center));
    Ok(GaussFit {
        curve: x.iter().map(|xi| GaussModel::evaluate(*xi, &params)).collect(),
        peaks,
        chi2: current,
        iterations,
        converged,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use assert_matches::assert_matches;

    fn axis() -> Vec<f64> {
        (0..80).map(|i| 452.8125 + 5.625 * usize_to_f64(i)).collect()
    }
    fn gaussian(x: &[f64], peaks: &[(f64, f64, f64)]) -> Vec<f64> {
        x.iter()
            .map(|xi| {
                peaks
                    .iter()
                    .map(|(h, c, s)| h * (-(xi - c).powi(2) / (2.0 * s * s)).exp())
                    .sum()
            })
            .collect()
    }
    #[test]
    fn single_peak() {
        let x = axis();
        let y = gaussian(&x, &[(20.0, 701.3, 12.0)]);
        let fit = fit_gaussians(&x, &y, &[(700.0, 18.0)], 5.625, &LmConfig::default()).unwrap();
        assert_eq!(fit.peaks.len(), 1);
        let peak = fit.peaks[0];
        assert_abs_diff_eq!(peak.center, 701.3, epsilon = 1e-3);
        assert_abs_diff_eq!(peak.height, 20.0, epsilon = 1e-3);
        assert_abs_diff_eq!(peak.fwhm(), 12.0 * FWHM_PER_SIGMA, epsilon = 1e-2);
        assert!(fit.chi2 < 1e-6);
        assert_eq!(fit.curve.len(), x.len());
    }
    #[test]
    fn two_peaks() {
        let x = axis();
        let y = gaussian(&x, &[(20.0, 680.0, 10.0), (15.0, 760.0, 14.0)]);
        let fit = fit_gaussians(
            &x,
            &y,
            &[(677.8, 19.0), (762.2, 16.0)],
            5.625,
            &LmConfig::default(),
        )
        .unwrap();
        assert_abs_diff_eq!(fit.peaks[0].center, 680.0, epsilon = 1e-2);
        assert_abs_diff_eq!(fit.peaks[1].center, 760.0, epsilon = 1e-2);
        assert_abs_diff_eq!(fit.peaks[1].sigma, 14.0, epsilon = 1e-2);
    }
    #[test]
    fn noisy_peak_has_stderr() {
        let x = axis();
        let mut y = gaussian(&x, &[(20.0, 700.0, 15.0)]);
        for (i, v) in y.iter_mut().enumerate() {
            *v += if i % 2 == 0 { 0.3 } else { -0.3 };
        }
        let fit = fit_gaussians(&x, &y, &[(700.0, 20.0)], 5.625, &LmConfig::default()).unwrap();
        let stderr = fit.peaks[0].center_stderr.unwrap();
        assert!(stderr > 0.0 && stderr < 1.0);
    }
    #[test]
    fn centre_bounds() {
        let x = axis();
        let y = gaussian(&x, &[(20.0, 700.0, 10.0)]);
        // the second peak may not leave the upper half of the axis
        let fit = fit_gaussians(
            &x,
            &y,
            &[(600.0, 5.0), (800.0, 5.0)],
            5.625,
            &LmConfig::default(),
        )
        .unwrap();
        assert!(fit.peaks[0].center <= 700.0 + 1e-9);
        assert!(fit.peaks[1].center >= 700.0 - 1e-9);
        assert!(fit.peaks.iter().all(|p| p.height >= 0.0));
    }
    #[test]
    fn invalid_input() {
        let x = axis();
        let config = LmConfig::default();
        assert_matches!(
            fit_gaussians(&x, &vec![0.0; 80], &[(700.0, 1.0)], 5.0, &config),
            Err(DfError::Histogram(_))
        );
        assert_matches!(
            fit_gaussians(&x, &vec![1.0; 80], &[], 5.0, &config),
            Err(DfError::Histogram(_))
        );
        assert_matches!(
            fit_gaussians(&x[..3], &[1.0, 2.0, 1.0], &[(460.0, 2.0)], 5.0, &config),
            Err(DfError::Histogram(_))
        );
        let mut y = vec![1.0; 80];
        y[3] = f64::NAN;
        assert_matches!(
            fit_gaussians(&x, &y, &[(700.0, 1.0)], 5.0, &config),
            Err(DfError::Histogram(_))
        );
    }
}
