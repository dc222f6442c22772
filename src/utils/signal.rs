//! Signal processing helpers: zero-phase Butterworth smoothing, extremum detection,
//! numerical derivatives and wavelength truncation.
use std::f64::consts::PI;
use std::ops::Range;

use nalgebra::{DMatrix, DVector};
use num::complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{DfError, DfResult};
use crate::utils::math_utils::{nearest_index, usize_to_f64};

/// Order of the low-pass filter used for all smoothing operations.
pub const SMOOTHING_ORDER: usize = 5;

/// Digital Butterworth low-pass filter in transfer function form.
#[derive(Debug, Clone, PartialEq)]
pub struct Butterworth {
    b: Vec<f64>,
    a: Vec<f64>,
}

impl Butterworth {
    /// Design a digital low-pass filter of the given `order`.
    ///
    /// The cutoff is given in the same (arbitrary) units as the `sampling_rate`, so the
    /// normalized cutoff is `cutoff / (sampling_rate / 2)`.
    ///
    /// # Errors
    ///
    /// This function will return an error if
    ///   - the order is zero
    ///   - the normalized cutoff is not within the open interval (0, 1)
    pub fn low_pass(order: usize, cutoff: f64, sampling_rate: f64) -> DfResult<Self> {
        if order == 0 {
            return Err(DfError::Signal("filter order must be at least 1".into()));
        }
        let wn = cutoff / (0.5 * sampling_rate);
        if !wn.is_finite() || wn <= 0.0 || wn >= 1.0 {
            return Err(DfError::Signal(format!(
                "normalized cutoff frequency must be in (0, 1), got {wn}"
            )));
        }
        let n = usize_to_f64(order);
        // pre-warped analog prototype, mapped by the bilinear transform (sampling rate 2)
        let warped = 4.0 * (PI * wn / 2.0).tan();
        let fs2 = Complex64::new(4.0, 0.0);
        let mut poles = Vec::with_capacity(order);
        let mut denominator = Complex64::new(1.0, 0.0);
        for i in 0..order {
            let m = 2.0f64.mul_add(usize_to_f64(i), 1.0 - n);
            let analog_pole = -Complex64::from_polar(1.0, PI * m / (2.0 * n)) * warped;
            denominator *= fs2 - analog_pole;
            poles.push((fs2 + analog_pole) / (fs2 - analog_pole));
        }
        let gain = warped.powf(n) / denominator.re;

        let mut a_coeffs = vec![Complex64::new(1.0, 0.0)];
        for pole in &poles {
            let mut next = a_coeffs.clone();
            next.push(Complex64::new(0.0, 0.0));
            for i in 1..next.len() {
                next[i] -= pole * a_coeffs[i - 1];
            }
            a_coeffs = next;
        }
        let a = a_coeffs.iter().map(|c| c.re).collect();
        let mut binomial = 1.0;
        let mut b = Vec::with_capacity(order + 1);
        for k in 0..=order {
            b.push(gain * binomial);
            binomial = binomial * usize_to_f64(order - k) / usize_to_f64(k + 1);
        }
        Ok(Self { b, a })
    }
    /// Returns the numerator coefficients.
    #[must_use]
    pub fn b(&self) -> &[f64] {
        &self.b
    }
    /// Returns the denominator coefficients (`a[0]` is always 1).
    #[must_use]
    pub fn a(&self) -> &[f64] {
        &self.a
    }
    /// Initial filter state for a step response in steady state (unit input).
    fn steady_state(&self) -> DfResult<Vec<f64>> {
        let dim = self.a.len() - 1;
        let system = DMatrix::from_fn(dim, dim, |r, c| {
            let companion_t = if c == 0 {
                -self.a[r + 1]
            } else if c == r + 1 {
                1.0
            } else {
                0.0
            };
            let identity = if r == c { 1.0 } else { 0.0 };
            identity - companion_t
        });
        let rhs = DVector::from_fn(dim, |r, _| self.b[r + 1] - self.a[r + 1] * self.b[0]);
        let zi = system
            .lu()
            .solve(&rhs)
            .ok_or_else(|| DfError::Signal("cannot compute filter steady state".into()))?;
        Ok(zi.iter().copied().collect())
    }
    /// Direct form II transposed filtering with initial state `zi`.
    fn lfilter(&self, data: &[f64], zi: &[f64]) -> Vec<f64> {
        let mut state = zi.to_vec();
        let last = state.len() - 1;
        data.iter()
            .map(|x| {
                let y = self.b[0].mul_add(*x, state[0]);
                for i in 0..last {
                    state[i] = self.b[i + 1].mul_add(*x, state[i + 1]) - self.a[i + 1] * y;
                }
                state[last] = self.b[last + 1].mul_add(*x, -self.a[last + 1] * y);
                y
            })
            .collect()
    }
    /// Zero-phase forward-backward filtering with odd extension at both ends.
    ///
    /// Signals shorter than the extension length are padded with their edge values before
    /// filtering. Non-finite input propagates into the output.
    ///
    /// # Errors
    ///
    /// This function will return an error if the filter steady state cannot be computed.
    pub fn filtfilt(&self, data: &[f64]) -> DfResult<Vec<f64>> {
        if data.len() < 2 {
            return Ok(data.to_vec());
        }
        let padlen = 3 * self.a.len().max(self.b.len());
        let (signal, offset) = if data.len() <= padlen {
            let pad = (padlen - data.len()) / 2 + 1;
            let mut padded = vec![data[0]; pad];
            padded.extend_from_slice(data);
            padded.extend(std::iter::repeat_n(data[data.len() - 1], pad));
            (padded, pad)
        } else {
            (data.to_vec(), 0)
        };
        let extended = odd_extension(&signal, padlen);
        let zi = self.steady_state()?;

        let start: Vec<f64> = zi.iter().map(|z| z * extended[0]).collect();
        let mut forward = self.lfilter(&extended, &start);
        forward.reverse();
        let start: Vec<f64> = zi.iter().map(|z| z * forward[0]).collect();
        let mut backward = self.lfilter(&forward, &start);
        backward.reverse();

        let begin = padlen + offset;
        Ok(backward[begin..begin + data.len()].to_vec())
    }
}

fn odd_extension(data: &[f64], padlen: usize) -> Vec<f64> {
    let n = data.len();
    let (first, last) = (data[0], data[n - 1]);
    let mut extended = Vec::with_capacity(n + 2 * padlen);
    extended.extend((1..=padlen).rev().map(|i| 2.0f64.mul_add(first, -data[i])));
    extended.extend_from_slice(data);
    extended.extend((1..=padlen).map(|i| 2.0f64.mul_add(last, -data[n - 1 - i])));
    extended
}

/// Zero-phase low-pass smoothing with the default filter order.
///
/// # Errors
///
/// This function will return an error if the filter parameters are invalid.
pub fn smooth(data: &[f64], cutoff: f64, sampling_rate: f64) -> DfResult<Vec<f64>> {
    Butterworth::low_pass(SMOOTHING_ORDER, cutoff, sampling_rate)?.filtfilt(data)
}

/// Parameters of a zero-phase low-pass smoothing operation.
///
/// The normalized cutoff of the filter is `cutoff / (sampling_rate / 2)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LowPass {
    /// cutoff frequency
    pub cutoff: f64,
    /// sampling rate in the same units as the cutoff
    pub sampling_rate: f64,
}
impl LowPass {
    /// Creates a new [`LowPass`] setting.
    #[must_use]
    pub const fn new(cutoff: f64, sampling_rate: f64) -> Self {
        Self {
            cutoff,
            sampling_rate,
        }
    }
    /// Smoothes the given data with a fifth-order Butterworth filter applied forwards and backwards.
    ///
    /// # Errors
    ///
    /// This function will return an error if the filter parameters are invalid.
    pub fn apply(&self, data: &[f64]) -> DfResult<Vec<f64>> {
        smooth(data, self.cutoff, self.sampling_rate)
    }
}
impl Default for LowPass {
    fn default() -> Self {
        Self::new(2000.0, 20000.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slope {
    Rising,
    Falling,
    Flat,
}

fn slope(previous: f64, current: f64) -> Slope {
    if current > previous {
        Slope::Rising
    } else if current < previous {
        Slope::Falling
    } else {
        Slope::Flat
    }
}

/// Returns the indices of all local minima.
///
/// A minimum is registered whenever a falling run turns into a rising one. For flat bottoms
/// the center of the plateau is returned.
#[must_use]
pub fn detect_minima(data: &[f64]) -> Vec<usize> {
    let mut minima = Vec::new();
    if data.len() < 3 {
        return minima;
    }
    let mut previous = slope(data[0], data[1]);
    let mut begin = 1;
    for i in 2..data.len() {
        let current = slope(data[i - 1], data[i]);
        if current != Slope::Flat {
            if previous == Slope::Falling && current == Slope::Rising {
                minima.push((begin + i - 1) / 2);
            }
            begin = i;
            previous = current;
        }
    }
    minima
}

/// Returns the indices of all local maxima.
#[must_use]
pub fn detect_maxima(data: &[f64]) -> Vec<usize> {
    let negated: Vec<f64> = data.iter().map(|v| -v).collect();
    detect_minima(&negated)
}

/// First derivative dy/dx by central differences (one-sided at both ends).
///
/// Zero steps of the x axis result in NaN entries.
#[must_use]
pub fn cent_diff(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len().min(y.len());
    if n < 2 {
        return vec![0.0; n];
    }
    (0..n)
        .map(|i| {
            let (lo, hi) = (i.saturating_sub(1), (i + 1).min(n - 1));
            let dx = x[hi] - x[lo];
            if dx == 0.0 {
                f64::NAN
            } else {
                (y[hi] - y[lo]) / dx
            }
        })
        .collect()
}

/// Index range of an ascending axis between the samples closest to `start` and `end`.
///
/// The sample closest to `end` is excluded. The range is empty if `end` lies before `start`.
#[must_use]
pub fn truncation_range(x: &[f64], start: f64, end: f64) -> Range<usize> {
    let first = nearest_index(x, start);
    let last = nearest_index(x, end);
    first..last.max(first)
}

/// Truncates a spectrum to the wavelength range [`start`, `end`).
#[must_use]
pub fn truncate<'a>(x: &'a [f64], y: &'a [f64], start: f64, end: f64) -> (&'a [f64], &'a [f64]) {
    let n = x.len().min(y.len());
    let range = truncation_range(&x[..n], start, end);
    (&x[range.clone()], &y[range])
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::math_utils::argmax;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn butterworth_invalid() {
        assert!(Butterworth::low_pass(0, 2000.0, 20000.0).is_err());
        assert!(Butterworth::low_pass(5, 0.0, 20000.0).is_err());
        assert!(Butterworth::low_pass(5, 20000.0, 20000.0).is_err());
        assert!(Butterworth::low_pass(5, f64::NAN, 20000.0).is_err());
    }
    #[test]
    fn butterworth_coefficients() {
        let filter = Butterworth::low_pass(5, 2000.0, 20000.0).unwrap();
        assert_eq!(filter.b().len(), 6);
        assert_eq!(filter.a().len(), 6);
        assert_abs_diff_eq!(filter.a()[0], 1.0);
        // unit gain at DC
        let dc_gain: f64 = filter.b().iter().sum::<f64>() / filter.a().iter().sum::<f64>();
        assert_relative_eq!(dc_gain, 1.0, epsilon = 1e-9);
        // binomial numerator
        assert_relative_eq!(filter.b()[1], 5.0 * filter.b()[0], epsilon = 1e-12);
        assert_relative_eq!(filter.b()[2], 10.0 * filter.b()[0], epsilon = 1e-12);
        assert_relative_eq!(filter.b()[0], 1.282_581e-3, max_relative = 1e-5);
        assert_relative_eq!(filter.a()[1], -2.975_422, max_relative = 1e-5);
    }
    #[test]
    fn filtfilt_constant() {
        let filter = Butterworth::low_pass(5, 2000.0, 20000.0).unwrap();
        let smoothed = filter.filtfilt(&[3.0; 100]).unwrap();
        for v in smoothed {
            assert_abs_diff_eq!(v, 3.0, epsilon = 1e-9);
        }
    }
    #[test]
    fn filtfilt_short_data() {
        let filter = Butterworth::low_pass(5, 2000.0, 20000.0).unwrap();
        assert!(filter.filtfilt(&[]).unwrap().is_empty());
        assert_eq!(filter.filtfilt(&[1.0]).unwrap(), vec![1.0]);
        let smoothed = filter.filtfilt(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(smoothed.len(), 5);
        assert!(smoothed.iter().all(|v| v.is_finite()));
    }
    #[test]
    fn filtfilt_zero_phase() {
        let data: Vec<f64> = (0..300)
            .map(|i| (-((f64::from(i) - 150.0) / 20.0).powi(2)).exp())
            .collect();
        let smoothed = smooth(&data, 2000.0, 20000.0).unwrap();
        assert_eq!(argmax(&smoothed), Some(150));
        assert_relative_eq!(smoothed[150], 1.0, max_relative = 1e-2);
    }
    #[test]
    fn filtfilt_removes_noise() {
        let data: Vec<f64> = (0..400)
            .map(|i| {
                let x = f64::from(i);
                (x / 40.0).sin() + 0.2 * if i % 2 == 0 { 1.0 } else { -1.0 }
            })
            .collect();
        let smoothed = smooth(&data, 2000.0, 20000.0).unwrap();
        for i in 50..350 {
            assert_abs_diff_eq!(smoothed[i], (i as f64 / 40.0).sin(), epsilon = 1e-2);
        }
    }
    #[test]
    fn low_pass_settings() {
        assert!(LowPass::new(0.0, 100.0).apply(&[1.0, 2.0, 3.0]).is_err());
        let smoothed = LowPass::default().apply(&[2.0; 40]).unwrap();
        assert_abs_diff_eq!(smoothed[20], 2.0, epsilon = 1e-9);
    }
    #[test]
    fn minima() {
        assert!(detect_minima(&[1.0, 0.0]).is_empty());
        assert_eq!(detect_minima(&[3.0, 2.0, 1.0, 2.0, 3.0]), vec![2]);
        assert_eq!(detect_minima(&[3.0, 1.0, 1.0, 1.0, 3.0]), vec![2]);
        assert_eq!(detect_minima(&[1.0, 2.0, 3.0]), Vec::<usize>::new());
        assert_eq!(
            detect_minima(&[2.0, 1.0, 2.0, 0.0, 5.0, 1.0, 5.0]),
            vec![1, 3, 5]
        );
    }
    #[test]
    fn maxima() {
        assert_eq!(detect_maxima(&[0.0, 1.0, 0.0, 2.0, 0.0]), vec![1, 3]);
        assert!(detect_maxima(&[0.0, 1.0, 2.0]).is_empty());
    }
    #[test]
    fn derivative() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [0.0, 2.0, 4.0, 6.0];
        assert_eq!(cent_diff(&x, &y), vec![2.0; 4]);
        let d = cent_diff(&[0.0, 0.0, 1.0], &[1.0, 2.0, 3.0]);
        assert!(d[0].is_nan());
        assert_eq!(cent_diff(&[1.0], &[1.0]), vec![0.0]);
    }
    #[test]
    fn truncation() {
        let x: Vec<f64> = (400..=1000).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| v * 2.0).collect();
        let (xt, yt) = truncate(&x, &y, 450.0, 900.0);
        assert_eq!(xt.len(), 450);
        assert_abs_diff_eq!(xt[0], 450.0);
        assert_abs_diff_eq!(xt[449], 899.0);
        assert_abs_diff_eq!(yt[0], 900.0);
        let (xt, _) = truncate(&x, &y, 900.0, 450.0);
        assert!(xt.is_empty());
        assert_eq!(truncation_range(&x, 0.0, 2000.0), 0..600);
    }
}
