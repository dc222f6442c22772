//! Reading of raw particle-tracking archives.
//!
//! Two generations of the input layout are supported:
//!   - legacy archives with a `particleScans` root group, scans `scan<N>`, particles `z_scan_<n>`
//!     and a `z_scan` dataset per particle
//!   - current archives with a `nplab_log` root group, scans `ParticleScannerScan_<N>`, particles
//!     `Particle_<n>` and z-stack datasets named `alinger.z_scan...` or `zScan...`
//!
//! Each z-stack dataset carries the wavelength axis and the background / white-reference
//! spectra as attributes.
pub mod attrs;
pub mod discovery;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use hdf5::{Dataset, File, Group};
use log::{debug, warn};
use nalgebra::DMatrix;

pub use discovery::{find_archive, latest_output, output_path, DATE_PATTERN};

use crate::error::{DfError, DfResult};

/// Name prefixes of z-stack datasets within a particle group.
pub const Z_STACK_PREFIXES: [&str; 3] = ["alinger.z_scan", "zScan", "z_scan"];
/// Name prefixes of overview images within a particle group.
pub const IMAGE_PREFIXES: [&str; 2] = ["CWL.thumb_image", "thumb_image"];

/// Generation of the input layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// `particleScans/scan<N>/z_scan_<n>/z_scan`
    Legacy,
    /// `nplab_log/ParticleScannerScan_<N>/Particle_<n>/<z-stack>`
    Current,
}
impl Schema {
    const fn root(self) -> &'static str {
        match self {
            Self::Legacy => "particleScans",
            Self::Current => "nplab_log",
        }
    }
    const fn scan_prefix(self) -> &'static str {
        match self {
            Self::Legacy => "scan",
            Self::Current => "ParticleScannerScan_",
        }
    }
    const fn particle_prefix(self) -> &'static str {
        match self {
            Self::Legacy => "z_scan_",
            Self::Current => "Particle_",
        }
    }
}

/// Returns the integer a name ends with, e.g. `12` for `Particle_12`.
#[must_use]
pub fn trailing_number(name: &str) -> Option<usize> {
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    name[name.len() - digits..].parse().ok()
}

fn numbered_members(group: &Group, prefix: &str) -> DfResult<Vec<(usize, String)>> {
    let mut members: Vec<(usize, String)> = group
        .member_names()?
        .into_iter()
        .filter(|name| name.starts_with(prefix))
        .filter_map(|name| {
            let suffix = &name[prefix.len()..];
            suffix.parse::<usize>().ok().map(|n| (n, name))
        })
        .collect();
    members.sort();
    Ok(members)
}

/// Reference to a single particle of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticleRef {
    /// numeric suffix of the particle group
    pub number: usize,
    /// name of the particle group
    pub name: String,
    /// absolute path of the particle group within the archive
    pub path: String,
}

/// Wavelength axis and reference spectra of a measurement.
///
/// The wavelength axis is always stored in ascending order. Archives with a descending axis are
/// flipped on reading.
#[derive(Debug, Clone, PartialEq)]
pub struct References {
    wavelengths: Arc<Vec<f64>>,
    background: Vec<f64>,
    reference: Vec<f64>,
    descending: bool,
}
impl References {
    /// Creates a new set of references.
    ///
    /// # Errors
    ///
    /// This function will return an error if
    ///   - the vectors differ in length or are empty
    ///   - the wavelength axis is not strictly monotonic
    pub fn new(wavelengths: Vec<f64>, background: Vec<f64>, reference: Vec<f64>) -> DfResult<Self> {
        if wavelengths.len() < 2 {
            return Err(DfError::Archive(
                "wavelength axis needs at least two entries".into(),
            ));
        }
        if background.len() != wavelengths.len() || reference.len() != wavelengths.len() {
            return Err(DfError::Archive(
                "background and reference must have the length of the wavelength axis".into(),
            ));
        }
        let ascending = wavelengths.windows(2).all(|w| w[1] > w[0]);
        let descending = wavelengths.windows(2).all(|w| w[1] < w[0]);
        if !ascending && !descending {
            return Err(DfError::Archive(
                "wavelength axis is not strictly monotonic".into(),
            ));
        }
        let (mut wavelengths, mut background, mut reference) = (wavelengths, background, reference);
        if descending {
            wavelengths.reverse();
            background.reverse();
            reference.reverse();
        }
        Ok(Self {
            wavelengths: Arc::new(wavelengths),
            background,
            reference,
            descending,
        })
    }
    /// The (ascending) wavelength axis in nm.
    #[must_use]
    pub const fn wavelengths(&self) -> &Arc<Vec<f64>> {
        &self.wavelengths
    }
    /// The background (dark) spectrum.
    #[must_use]
    pub fn background(&self) -> &[f64] {
        &self.background
    }
    /// The white-reference spectrum.
    #[must_use]
    pub fn reference(&self) -> &[f64] {
        &self.reference
    }
    /// Whether the archive stores its wavelength axis in descending order.
    #[must_use]
    pub const fn descending(&self) -> bool {
        self.descending
    }
}

/// Optional metadata of a particle measurement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParticleMetadata {
    /// creation time stamp of the z-stack
    pub creation_timestamp: Option<String>,
    /// laser power during the measurement
    pub laser_power: Option<f64>,
    /// integration time of the spectrometer
    pub integration_time: Option<f64>,
}
impl ParticleMetadata {
    /// The measurement date (`YYYY-MM-DD`) derived from the time stamp.
    #[must_use]
    pub fn date(&self) -> Option<String> {
        let stamp = self.creation_timestamp.as_deref()?;
        let date = stamp.get(..10)?;
        chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .ok()
            .map(|_| date.to_owned())
    }
}

/// Raw z-stack of a single particle.
#[derive(Debug, Clone, PartialEq)]
pub struct ZStack {
    /// intensities; rows are focal positions, columns follow the ascending wavelength axis
    pub z: DMatrix<f64>,
    /// focus offsets of the rows, if stored
    pub dz: Option<Vec<f64>>,
    /// measurement metadata
    pub metadata: ParticleMetadata,
}

/// An opened input archive with a selected particle scan.
#[derive(Debug)]
pub struct InputArchive {
    file: File,
    path: PathBuf,
    schema: Schema,
    scan: Group,
}
impl InputArchive {
    /// Opens an archive and selects the scan with the highest index.
    ///
    /// # Errors
    ///
    /// This function will return an error if the file cannot be opened or holds no particle scan.
    pub fn open(path: &Path) -> DfResult<Self> {
        Self::open_with_scan(path, None)
    }
    /// Opens an archive and selects the given scan (or the one with the highest index).
    ///
    /// # Errors
    ///
    /// This function will return an error if
    ///   - the file cannot be opened
    ///   - neither of the known root groups is present
    ///   - the requested scan does not exist
    pub fn open_with_scan(path: &Path, scan: Option<usize>) -> DfResult<Self> {
        let file = File::open(path).map_err(|e| {
            DfError::Archive(format!("cannot open archive {} : {}", path.display(), e))
        })?;
        let schema = if file.link_exists(Schema::Legacy.root()) {
            Schema::Legacy
        } else if file.link_exists(Schema::Current.root()) {
            Schema::Current
        } else {
            return Err(DfError::Archive(format!(
                "{} contains neither 'particleScans' nor 'nplab_log'",
                path.display()
            )));
        };
        let root = file.group(schema.root())?;
        let scans = numbered_members(&root, schema.scan_prefix())?;
        let scan_name = match scan {
            Some(n) => scans
                .iter()
                .find(|(number, _)| *number == n)
                .map(|(_, name)| name.clone())
                .ok_or_else(|| DfError::Archive(format!("scan {n} does not exist")))?,
            None => scans
                .last()
                .map(|(_, name)| name.clone())
                .ok_or_else(|| DfError::Archive("archive contains no particle scan".into()))?,
        };
        debug!("using scan '{scan_name}' of {}", path.display());
        let scan = root.group(&scan_name)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            schema,
            scan,
        })
    }
    /// Layout generation of the archive.
    #[must_use]
    pub const fn schema(&self) -> Schema {
        self.schema
    }
    /// File path of the archive.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
    /// Path of the selected scan group.
    #[must_use]
    pub fn scan_name(&self) -> String {
        self.scan.name()
    }
    /// Lists the particles of the selected scan sorted by their numeric suffix.
    ///
    /// # Errors
    ///
    /// This function will return an error if the scan group cannot be read.
    pub fn particles(&self) -> DfResult<Vec<ParticleRef>> {
        let scan_path = self.scan.name();
        Ok(numbered_members(&self.scan, self.schema.particle_prefix())?
            .into_iter()
            .map(|(number, name)| ParticleRef {
                number,
                path: format!("{scan_path}/{name}"),
                name,
            })
            .collect())
    }
    fn particle_group(&self, particle: &ParticleRef) -> DfResult<Group> {
        Ok(self.file.group(&particle.path)?)
    }
    fn find_dataset(group: &Group, prefixes: &[&str]) -> DfResult<Option<Dataset>> {
        let mut names = group.member_names()?;
        names.sort();
        for prefix in prefixes {
            for name in names.iter().filter(|n| n.starts_with(prefix)) {
                if let Ok(dataset) = group.dataset(name) {
                    return Ok(Some(dataset));
                }
            }
        }
        Ok(None)
    }
    fn z_stack_dataset(&self, particle: &ParticleRef) -> DfResult<Dataset> {
        let group = self.particle_group(particle)?;
        Self::find_dataset(&group, &Z_STACK_PREFIXES)?
            .filter(|ds| ds.ndim() == 2)
            .ok_or_else(|| DfError::Archive(format!("{} holds no z-stack", particle.name)))
    }
    /// Reads the wavelength axis and the reference spectra.
    ///
    /// The references are taken from the z-stack of the first particle that carries them.
    ///
    /// # Errors
    ///
    /// This function will return an error if none of the particles carries complete references.
    pub fn references(&self, particles: &[ParticleRef]) -> DfResult<References> {
        for particle in particles {
            let Ok(dataset) = self.z_stack_dataset(particle) else {
                continue;
            };
            let wavelengths = attrs::read_f64_vec(&dataset, "wavelengths")?;
            let background = attrs::read_f64_vec(&dataset, "background")?;
            let reference = attrs::read_f64_vec(&dataset, "reference")?;
            if let (Some(w), Some(b), Some(r)) = (wavelengths, background, reference) {
                return References::new(w, b, r);
            }
            warn!("z-stack of {} carries no complete references", particle.name);
        }
        Err(DfError::Archive(
            "no particle carries wavelengths, background and reference".into(),
        ))
    }
    /// Reads the z-stack of a particle and orients it along the ascending wavelength axis.
    ///
    /// # Errors
    ///
    /// This function will return an error if
    ///   - the particle holds no two-dimensional z-stack
    ///   - the z-stack does not match the wavelength axis
    pub fn z_stack(&self, particle: &ParticleRef, references: &References) -> DfResult<ZStack> {
        let dataset = self.z_stack_dataset(particle)?;
        let shape = dataset.shape();
        let raw = dataset.read_raw::<f64>()?;
        let n_wl = references.wavelengths().len();
        let mut z = if shape[1] == n_wl {
            DMatrix::from_row_slice(shape[0], shape[1], &raw)
        } else if shape[0] == n_wl {
            DMatrix::from_row_slice(shape[0], shape[1], &raw).transpose()
        } else {
            return Err(DfError::Archive(format!(
                "z-stack of {} has shape {:?}, expected {} wavelengths",
                particle.name, shape, n_wl
            )));
        };
        if references.descending() {
            let n_cols = z.ncols();
            z = DMatrix::from_fn(z.nrows(), n_cols, |r, c| z[(r, n_cols - 1 - c)]);
        }
        let group = self.particle_group(particle)?;
        let dz = attrs::read_f64_vec(&dataset, "dz").ok().flatten();
        let metadata = ParticleMetadata {
            creation_timestamp: attrs::read_str(&dataset, "creation_timestamp")
                .or_else(|| attrs::read_str(&group, "creation_timestamp")),
            laser_power: attrs::read_opt_f64(&dataset, "laser_power")
                .or_else(|| attrs::read_opt_f64(&group, "laser_power")),
            integration_time: attrs::read_opt_f64(&dataset, "integration_time")
                .or_else(|| attrs::read_opt_f64(&group, "integration_time")),
        };
        Ok(ZStack { z, dz, metadata })
    }
    /// Reads the overview image of a particle, if present.
    ///
    /// Colour images are averaged over their channel axis.
    ///
    /// # Errors
    ///
    /// This function will return an error if the image exists but cannot be read.
    pub fn overview_image(&self, particle: &ParticleRef) -> DfResult<Option<DMatrix<f64>>> {
        let group = self.particle_group(particle)?;
        let Some(dataset) = Self::find_dataset(&group, &IMAGE_PREFIXES)? else {
            return Ok(None);
        };
        let shape = dataset.shape();
        let raw = dataset.read_raw::<f64>()?;
        match shape.as_slice() {
            [rows, cols] => Ok(Some(DMatrix::from_row_slice(*rows, *cols, &raw))),
            [rows, cols, channels] if *channels > 0 => {
                let channels = *channels;
                #[allow(clippy::cast_precision_loss)]
                let scale = 1.0 / channels as f64;
                Ok(Some(DMatrix::from_fn(*rows, *cols, |r, c| {
                    let start = (r * cols + c) * channels;
                    raw[start..start + channels].iter().sum::<f64>() * scale
                })))
            }
            _ => Err(DfError::Archive(format!(
                "overview image of {} has unsupported shape {:?}",
                particle.name, shape
            ))),
        }
    }
}
