//! Synthetic spectra and input archives for tests.
use std::path::Path;

use hdf5::{File, Group};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{archive::attrs, error::DfResult, utils::usize_to_f64};

/// Wavelength axis 400 nm ... 1000 nm with 1 nm steps.
pub fn axis() -> Vec<f64> {
    (0..=600).map(|i| 400.0 + usize_to_f64(i)).collect()
}

/// Gaussian of unit height with the given center and FWHM.
pub fn gauss(x: f64, center: f64, fwhm: f64) -> f64 {
    (-4.0 * 2.0f64.ln() * ((x - center) / fwhm).powi(2)).exp()
}

/// Transverse mode at 533 nm and a single coupled mode at `cm` nm.
pub fn cm_spectrum(x: &[f64], cm: f64) -> Vec<f64> {
    x.iter()
        .map(|l| 0.02 + 2.0 * gauss(*l, 533.0, 40.0) + 3.0 * gauss(*l, cm, 80.0))
        .collect()
}

/// Clean NPoM with its coupled mode at 720 nm.
pub fn npom_spectrum(x: &[f64]) -> Vec<f64> {
    cm_spectrum(x, 720.0)
}

/// NPoM with two coupled-mode maxima at 700 nm and 760 nm.
pub fn double_spectrum(x: &[f64]) -> Vec<f64> {
    x.iter()
        .map(|l| {
            0.02 + 2.0 * gauss(*l, 533.0, 40.0)
                + 3.0 * gauss(*l, 700.0, 30.0)
                + 2.8 * gauss(*l, 760.0, 30.0)
        })
        .collect()
}

/// NPoM with a sharp peak at 620 nm, 1.5 times higher than the transverse mode.
pub fn weird_spectrum(x: &[f64]) -> Vec<f64> {
    x.iter()
        .map(|l| {
            0.02 + 2.0 * gauss(*l, 533.0, 40.0)
                + 3.0 * gauss(*l, 620.0, 15.0)
                + 3.4 * gauss(*l, 740.0, 80.0)
        })
        .collect()
}

/// Flat, weak signal with uniform noise.
pub fn noise_spectrum(x: &[f64], seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    x.iter()
        .map(|_| 0.0005 + rng.random_range(-5.0e-5..5.0e-5))
        .collect()
}

/// Focal profile of a centred particle peaking in the middle slice.
pub fn focal_profile(slices: usize) -> Vec<f64> {
    let center = usize_to_f64(slices - 1) / 2.0;
    (0..slices)
        .map(|k| (-(usize_to_f64(k) - center).powi(2) / (2.0 * 1.5 * 1.5)).exp())
        .collect()
}

/// Focal profile of a mis-aligned particle, brightest at both ends of the scan.
pub fn misaligned_profile(slices: usize) -> Vec<f64> {
    let center = usize_to_f64(slices - 1) / 2.0;
    (0..slices)
        .map(|k| 0.8f64.mul_add(((usize_to_f64(k) - center) / center).powi(2), 0.2))
        .collect()
}

fn background(x: &[f64]) -> Vec<f64> {
    x.iter().map(|l| 100.0 + 0.01 * l).collect()
}

fn reference(x: &[f64]) -> Vec<f64> {
    background(x).iter().map(|b| b + 1000.0).collect()
}

/// Description of a synthetic particle.
#[derive(Debug, Clone)]
pub struct FixtureParticle {
    pub number: usize,
    pub spectrum: Vec<f64>,
    pub profile: Vec<f64>,
    pub dz: Option<Vec<f64>>,
    pub z_stack: bool,
    pub references: bool,
    pub image: bool,
}
impl FixtureParticle {
    pub fn with_spectrum(number: usize, spectrum: Vec<f64>) -> Self {
        let profile = focal_profile(11);
        let dz = (0..11).map(|k| 0.54f64.mul_add(usize_to_f64(k), -2.7)).collect();
        Self {
            number,
            spectrum,
            profile,
            dz: Some(dz),
            z_stack: true,
            references: true,
            image: true,
        }
    }
    pub fn npom(number: usize) -> Self {
        Self::with_spectrum(number, npom_spectrum(&axis()))
    }
    pub fn double(number: usize) -> Self {
        Self::with_spectrum(number, double_spectrum(&axis()))
    }
    pub fn weird(number: usize) -> Self {
        Self::with_spectrum(number, weird_spectrum(&axis()))
    }
    pub fn noise(number: usize) -> Self {
        Self::with_spectrum(number, noise_spectrum(&axis(), number as u64))
    }
    pub fn misaligned(number: usize) -> Self {
        let mut particle = Self::npom(number);
        particle.profile = misaligned_profile(11);
        particle
    }
    pub fn without_z_stack(mut self) -> Self {
        self.z_stack = false;
        self.image = false;
        self
    }
    pub fn without_references(mut self) -> Self {
        self.references = false;
        self
    }
    pub fn with_dz(mut self, dz: Option<Vec<f64>>) -> Self {
        self.dz = dz;
        self
    }
    /// Raw counts: `background + (reference - background) * spectrum * profile`.
    fn raw_stack(&self, x: &[f64], descending: bool) -> Vec<f64> {
        let (bg, rf) = (background(x), reference(x));
        let columns: Vec<usize> = if descending {
            (0..x.len()).rev().collect()
        } else {
            (0..x.len()).collect()
        };
        self.profile
            .iter()
            .flat_map(|p| {
                columns
                    .iter()
                    .map(|c| (rf[*c] - bg[*c]).mul_add(self.spectrum[*c] * p, bg[*c]))
                    .collect::<Vec<f64>>()
            })
            .collect()
    }
    fn write(&self, group: &Group, dataset_name: &str, descending: bool) -> DfResult<()> {
        if !self.z_stack {
            return Ok(());
        }
        let x = axis();
        let data = self.raw_stack(&x, descending);
        let dataset = group
            .new_dataset::<f64>()
            .shape((self.profile.len(), x.len()))
            .create(dataset_name)?;
        dataset.write_raw(&data)?;
        if self.references {
            let (mut wl, mut bg, mut rf) = (x.clone(), background(&x), reference(&x));
            if descending {
                wl.reverse();
                bg.reverse();
                rf.reverse();
            }
            attrs::write_f64_vec(&dataset, "wavelengths", &wl)?;
            attrs::write_f64_vec(&dataset, "background", &bg)?;
            attrs::write_f64_vec(&dataset, "reference", &rf)?;
        }
        if let Some(dz) = &self.dz {
            attrs::write_f64_vec(&dataset, "dz", dz)?;
        }
        attrs::write_str(&dataset, "creation_timestamp", "2019-04-01T12:00:00.000000")?;
        attrs::write_f64(&dataset, "laser_power", 0.5)?;
        attrs::write_f64(&dataset, "integration_time", 100.0)?;
        if self.image {
            let image: Vec<f64> = (0..8 * 6 * 3).map(usize_to_f64).collect();
            group
                .new_dataset::<f64>()
                .shape((8, 6, 3))
                .create("CWL.thumb_image_0")?
                .write_raw(&image)?;
        }
        Ok(())
    }
}

/// Writes an archive in the `nplab_log` layout. The particles are stored in
/// `ParticleScannerScan_1`, `ParticleScannerScan_0` stays empty.
pub fn write_current_archive(path: &Path, particles: &[FixtureParticle]) -> DfResult<()> {
    let file = File::create(path)?;
    let root = file.create_group("nplab_log")?;
    root.create_group("ParticleScannerScan_0")?;
    let scan = root.create_group("ParticleScannerScan_1")?;
    for particle in particles {
        let group = scan.create_group(&format!("Particle_{}", particle.number))?;
        particle.write(&group, "alinger.z_scan_0", false)?;
    }
    Ok(())
}

/// Writes an archive in the `particleScans` layout.
pub fn write_legacy_archive(
    path: &Path,
    particles: &[FixtureParticle],
    descending: bool,
) -> DfResult<()> {
    let file = File::create(path)?;
    let scan = file.create_group("particleScans")?.create_group("scan0")?;
    for particle in particles {
        let group = scan.create_group(&format!("z_scan_{}", particle.number))?;
        particle.write(&group, "z_scan", descending)?;
    }
    Ok(())
}
