#![warn(missing_docs)]
//! Summary archive holding all analysed spectra.
//!
//! Every spectrum is stored exactly once below `All Spectra (Raw)`. The normalized variant of an
//! NPoM is stored once below `NPoMs/All NPoMs/Normalised`. All other groups contain hard links to
//! these canonical datasets so that attributes can never drift apart.
//!
//! ```text
//! All Spectra (Raw)/Spectrum <n>
//! Failed Spectra/Spectrum <n>
//! Non-NPoMs/Spectrum <n>
//! NPoMs/<group>/{Raw, Normalised}/Spectrum <n>
//! ```
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use hdf5::{Dataset, File, Group, Location};
use log::debug;
use strum::{EnumIter, IntoEnumIterator};

use crate::{
    archive::{attrs, trailing_number, ParticleMetadata},
    error::{DfError, DfResult},
    spectrum::{DfSpectrum, MainPeaks, PeakRecord},
};

/// Canonical group of all spectra.
pub const ALL_SPECTRA: &str = "All Spectra (Raw)";
/// Group of spectra whose analysis failed.
pub const FAILED_SPECTRA: &str = "Failed Spectra";
/// Group of rejected spectra.
pub const NON_NPOMS: &str = "Non-NPoMs";
/// Parent group of the NPoM subgroups.
pub const NPOMS: &str = "NPoMs";
/// Raw collection of an NPoM subgroup.
pub const RAW: &str = "Raw";
/// Normalized collection of an NPoM subgroup.
pub const NORMALISED: &str = "Normalised";

/// Numerical peak attributes stored with every spectrum.
pub const PEAK_ATTRIBUTES: [&str; 15] = [
    "Transverse mode wavelength",
    "Transverse mode intensity (raw)",
    "Transverse mode intensity (normalised)",
    "Coupled mode wavelength",
    "Coupled mode intensity (raw)",
    "Coupled mode intensity (normalised)",
    "Coupled mode FWHM",
    "Coupled mode FWHM (raw)",
    "Weird peak wavelength",
    "Weird peak intensity (raw)",
    "Weird peak intensity (normalised)",
    "Weird peak FWHM",
    "Weird peak FWHM (raw)",
    "Intensity ratio (raw)",
    "Intensity ratio (normalised)",
];

/// Subgroups of `NPoMs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum NpomGroup {
    /// every NPoM
    All,
    /// NPoMs which passed the alignment check
    Aligned,
    /// NPoMs with a double coupled mode
    Doubles,
    /// NPoMs with a single coupled mode
    Singles,
    /// NPoMs with a weird peak
    WeirdPeakers,
    /// NPoMs without a weird peak
    NonWeirdPeakers,
    /// NPoMs which are neither double nor weird
    Ideal,
    /// ideal and aligned NPoMs
    Perfect,
}
impl NpomGroup {
    /// Name of the group within the archive.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::All => "All NPoMs",
            Self::Aligned => "Aligned NPoMs",
            Self::Doubles => "Doubles",
            Self::Singles => "Singles",
            Self::WeirdPeakers => "Weird Peakers",
            Self::NonWeirdPeakers => "Non-Weird-Peakers",
            Self::Ideal => "Ideal NPoMs",
            Self::Perfect => "Perfect NPoMs",
        }
    }
    /// Looks up a group by its archive name.
    ///
    /// # Errors
    ///
    /// This function will return an error if no group of that name exists.
    pub fn from_name(name: &str) -> DfResult<Self> {
        Self::iter()
            .find(|g| g.name() == name.trim())
            .ok_or_else(|| DfError::Config(format!("unknown NPoM group '{name}'")))
    }
    /// Returns `true` if the spectrum belongs to this group.
    #[must_use]
    pub const fn contains(self, spectrum: &DfSpectrum) -> bool {
        let class = spectrum.class();
        if !class.is_npom() {
            return false;
        }
        match self {
            Self::All => true,
            Self::Aligned => spectrum.aligned(),
            Self::Doubles => class.is_double(),
            Self::Singles => !class.is_double(),
            Self::WeirdPeakers => class.has_weird(),
            Self::NonWeirdPeakers => !class.has_weird(),
            Self::Ideal => class.is_ideal(),
            Self::Perfect => class.is_ideal() && spectrum.aligned(),
        }
    }
    /// Archive path of the group.
    #[must_use]
    pub fn path(self) -> String {
        format!("{NPOMS}/{}", self.name())
    }
}

fn write_dataset(group: &Group, name: &str, data: &[f64]) -> DfResult<Dataset> {
    let dataset = group
        .new_dataset::<f64>()
        .shape((data.len(),))
        .create(name)?;
    dataset.write_raw(data)?;
    Ok(dataset)
}

fn link(group: &Group, target: &str, name: &str) -> DfResult<()> {
    group.link_hard(target, name).map_err(|e| {
        DfError::Archive(format!("cannot link {target} as {name}: {e}"))
    })
}

/// Writes the peak attributes of one variant (raw / normalized) of the main peaks.
fn write_main_peak_attrs(loc: &Location, peaks: Option<&MainPeaks>, suffix: &str) -> DfResult<()> {
    let coupled = peaks.map(|p| p.coupled);
    let weird = peaks.and_then(|p| p.weird);
    attrs::write_opt_f64(
        loc,
        &format!("Coupled mode intensity ({suffix})"),
        coupled.map(|p| p.intensity),
    )?;
    attrs::write_opt_f64(
        loc,
        &format!("Weird peak intensity ({suffix})"),
        weird.map(|p| p.intensity),
    )?;
    attrs::write_opt_f64(
        loc,
        &format!("Intensity ratio ({suffix})"),
        peaks.map(|p| p.intensity_ratio),
    )
}

/// Writes classification and peak attributes of a spectrum.
///
/// # Errors
///
/// This function will return an error if an attribute cannot be written.
pub fn write_spectrum_attrs(loc: &Location, spectrum: &DfSpectrum) -> DfResult<()> {
    let class = spectrum.class();
    let is_npom = class.is_npom();
    attrs::write_f64_vec(loc, "wavelengths", spectrum.x())?;
    attrs::write_bool(loc, "NPoM?", is_npom)?;
    attrs::write_str(
        loc,
        "Not NPoM because",
        &class
            .reason()
            .map_or_else(|| attrs::NA.to_owned(), |r| r.to_string()),
    )?;
    attrs::write_opt_bool(loc, "Double Peak?", is_npom.then(|| class.is_double()))?;
    attrs::write_opt_bool(loc, "Weird Peak?", is_npom.then(|| class.has_weird()))?;
    let record: Option<&PeakRecord> = spectrum.peaks();
    let transverse = record.map(|r| r.transverse);
    attrs::write_opt_f64(
        loc,
        "Transverse mode wavelength",
        transverse.map(|t| t.wavelength),
    )?;
    attrs::write_opt_f64(
        loc,
        "Transverse mode intensity (raw)",
        transverse.map(|t| t.intensity),
    )?;
    attrs::write_opt_f64(
        loc,
        "Transverse mode intensity (normalised)",
        transverse.map(|_| 1.0),
    )?;
    let raw = record.and_then(|r| r.raw.as_ref());
    let normalised = record.and_then(|r| r.normalised.as_ref());
    attrs::write_opt_f64(
        loc,
        "Coupled mode wavelength",
        raw.map(|p| p.coupled.wavelength),
    )?;
    attrs::write_opt_f64(
        loc,
        "Coupled mode FWHM",
        normalised.and_then(|p| p.coupled.fwhm),
    )?;
    attrs::write_opt_f64(loc, "Coupled mode FWHM (raw)", raw.and_then(|p| p.coupled.fwhm))?;
    attrs::write_opt_f64(
        loc,
        "Weird peak wavelength",
        raw.and_then(|p| p.weird).map(|w| w.wavelength),
    )?;
    attrs::write_opt_f64(
        loc,
        "Weird peak FWHM",
        normalised.and_then(|p| p.weird).and_then(|w| w.fwhm),
    )?;
    attrs::write_opt_f64(
        loc,
        "Weird peak FWHM (raw)",
        raw.and_then(|p| p.weird).and_then(|w| w.fwhm),
    )?;
    write_main_peak_attrs(loc, raw, "raw")?;
    write_main_peak_attrs(loc, normalised, "normalised")?;
    if let Some(error) = record.and_then(|r| r.fit_error.as_deref()) {
        attrs::write_str(loc, "Peak fit error", error)?;
    }
    Ok(())
}

/// A spectrum read back from the summary archive.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSpectrum {
    /// name of the dataset
    pub name: String,
    /// particle index
    pub index: usize,
    /// spectrum data
    pub y: Vec<f64>,
    /// numerical peak attributes (missing values are absent)
    pub attributes: BTreeMap<String, f64>,
}
impl StoredSpectrum {
    /// Returns a numerical attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<f64> {
        self.attributes.get(name).copied()
    }
}

/// Writer of the summary archive.
#[derive(Debug)]
pub struct SummaryWriter {
    file: File,
    path: PathBuf,
    wavelengths_written: bool,
    date_written: bool,
}
impl SummaryWriter {
    /// Creates a new summary archive with the empty group skeleton.
    ///
    /// # Errors
    ///
    /// This function will return an error if the file or one of its groups cannot be created.
    pub fn create(path: &Path) -> DfResult<Self> {
        let file = File::create_excl(path).map_err(|e| {
            DfError::Archive(format!("cannot create summary {} : {}", path.display(), e))
        })?;
        file.create_group(ALL_SPECTRA)?;
        file.create_group(FAILED_SPECTRA)?;
        file.create_group(NON_NPOMS)?;
        let npoms = file.create_group(NPOMS)?;
        for group in NpomGroup::iter() {
            let group = npoms.create_group(group.name())?;
            group.create_group(RAW)?;
            group.create_group(NORMALISED)?;
        }
        debug!("created summary archive {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
            wavelengths_written: false,
            date_written: false,
        })
    }
    /// Opens an existing summary archive for appending histogram data.
    ///
    /// # Errors
    ///
    /// This function will return an error if the file cannot be opened or is not a summary archive.
    pub fn open(path: &Path) -> DfResult<Self> {
        let file = File::open_rw(path).map_err(|e| {
            DfError::Archive(format!("cannot open summary {} : {}", path.display(), e))
        })?;
        if !file.link_exists(ALL_SPECTRA) || !file.link_exists(NPOMS) {
            return Err(DfError::Archive(format!(
                "{} is not a summary archive",
                path.display()
            )));
        }
        let wavelengths_written = attrs::has_attr(&*file.group(ALL_SPECTRA)?, "wavelengths");
        let date_written = attrs::has_attr(&*file.group(ALL_SPECTRA)?, "Date measured");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            wavelengths_written,
            date_written,
        })
    }
    /// File path of the archive.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
    /// The underlying archive.
    #[must_use]
    pub const fn file(&self) -> &File {
        &self.file
    }
    /// Returns the group of an NPoM subgroup.
    ///
    /// # Errors
    ///
    /// This function will return an error if the group does not exist.
    pub fn npom_group(&self, group: NpomGroup) -> DfResult<Group> {
        Ok(self.file.group(&group.path())?)
    }
    /// Stores the wavelength axis as attribute of all spectrum collections (only once).
    ///
    /// # Errors
    ///
    /// This function will return an error if an attribute cannot be written.
    pub fn set_wavelengths(&mut self, x: &[f64]) -> DfResult<()> {
        if self.wavelengths_written {
            return Ok(());
        }
        for name in [ALL_SPECTRA, FAILED_SPECTRA, NON_NPOMS] {
            attrs::write_f64_vec(&*self.file.group(name)?, "wavelengths", x)?;
        }
        for group in NpomGroup::iter() {
            let group = self.npom_group(group)?;
            for collection in [RAW, NORMALISED] {
                attrs::write_f64_vec(&*group.group(collection)?, "wavelengths", x)?;
            }
        }
        self.wavelengths_written = true;
        Ok(())
    }
    /// Stores the measurement date (only once).
    ///
    /// # Errors
    ///
    /// This function will return an error if the attribute cannot be written.
    pub fn set_date_measured(&mut self, date: &str) -> DfResult<()> {
        if self.date_written {
            return Ok(());
        }
        attrs::write_str(&*self.file.group(ALL_SPECTRA)?, "Date measured", date)?;
        self.date_written = true;
        Ok(())
    }
    fn write_metadata(dataset: &Dataset, spectrum: &DfSpectrum, metadata: &ParticleMetadata) -> DfResult<()> {
        attrs::write_bool(dataset, "Aligned?", spectrum.aligned())?;
        attrs::write_opt_f64(dataset, "Alignment score", Some(spectrum.alignment_score()))?;
        if !spectrum.z_profile().is_empty() {
            attrs::write_f64_vec(dataset, "Z Profile", spectrum.z_profile())?;
        }
        attrs::write_str(dataset, "Source", spectrum.source())?;
        attrs::write_opt_f64(dataset, "Laser power", metadata.laser_power)?;
        attrs::write_opt_f64(dataset, "Integration time", metadata.integration_time)?;
        if let Some(stamp) = &metadata.creation_timestamp {
            attrs::write_str(dataset, "creation_timestamp", stamp)?;
        }
        Ok(())
    }
    /// Writes an analysed spectrum and links it into all groups it belongs to.
    ///
    /// # Errors
    ///
    /// This function will return an error if a dataset, attribute or link cannot be written.
    pub fn write_spectrum(&mut self, spectrum: &DfSpectrum, metadata: &ParticleMetadata) -> DfResult<()> {
        self.set_wavelengths(spectrum.x())?;
        if let Some(date) = metadata.date() {
            self.set_date_measured(&date)?;
        }
        let name = spectrum.name();
        let raw = write_dataset(&self.file.group(ALL_SPECTRA)?, &name, spectrum.raw())?;
        write_spectrum_attrs(&raw, spectrum)?;
        Self::write_metadata(&raw, spectrum, metadata)?;
        let raw_path = format!("/{ALL_SPECTRA}/{name}");
        if !spectrum.class().is_npom() {
            return link(&self.file.group(NON_NPOMS)?, &raw_path, &name);
        }
        let normalised_data = spectrum.normalized().ok_or_else(|| {
            DfError::Archive(format!("NPoM {name} has no normalised spectrum"))
        })?;
        let all = self.npom_group(NpomGroup::All)?;
        let normalised = write_dataset(&all.group(NORMALISED)?, &name, normalised_data)?;
        write_spectrum_attrs(&normalised, spectrum)?;
        Self::write_metadata(&normalised, spectrum, metadata)?;
        let normalised_path = format!("/{}/{NORMALISED}/{name}", NpomGroup::All.path());
        for group in NpomGroup::iter().filter(|g| g.contains(spectrum)) {
            let group = self.npom_group(group)?;
            link(&group.group(RAW)?, &raw_path, &name)?;
            if !group.link_exists(&format!("{NORMALISED}/{name}")) {
                link(&group.group(NORMALISED)?, &normalised_path, &name)?;
            }
        }
        Ok(())
    }
    /// Writes a spectrum whose analysis failed and links it into `Failed Spectra`.
    ///
    /// # Errors
    ///
    /// This function will return an error if a dataset, attribute or link cannot be written.
    pub fn write_failed(
        &mut self,
        index: usize,
        x: &[f64],
        y: &[f64],
        source: &str,
        reason: &str,
    ) -> DfResult<()> {
        self.set_wavelengths(x)?;
        let name = format!("Spectrum {index}");
        let dataset = write_dataset(&self.file.group(ALL_SPECTRA)?, &name, y)?;
        attrs::write_f64_vec(&dataset, "wavelengths", x)?;
        attrs::write_str(&dataset, "Failure reason", reason)?;
        attrs::write_str(&dataset, "Source", source)?;
        link(
            &self.file.group(FAILED_SPECTRA)?,
            &format!("/{ALL_SPECTRA}/{name}"),
            &name,
        )
    }
    /// Reads the wavelength axis stored with the spectra.
    ///
    /// # Errors
    ///
    /// This function will return an error if the archive holds no wavelength axis.
    pub fn wavelengths(&self) -> DfResult<Vec<f64>> {
        attrs::read_f64_vec(&*self.file.group(ALL_SPECTRA)?, "wavelengths")?
            .ok_or_else(|| DfError::Archive("summary archive holds no wavelengths".into()))
    }
    /// Reads all spectra of a collection sorted by particle index.
    ///
    /// # Errors
    ///
    /// This function will return an error if the collection cannot be read.
    pub fn read_collection(&self, path: &str) -> DfResult<Vec<StoredSpectrum>> {
        let group = self.file.group(path)?;
        let mut spectra = Vec::new();
        for name in group.member_names()? {
            let Ok(dataset) = group.dataset(&name) else {
                continue;
            };
            let attributes = PEAK_ATTRIBUTES
                .iter()
                .filter_map(|a| attrs::read_opt_f64(&dataset, a).map(|v| ((*a).to_owned(), v)))
                .collect();
            spectra.push(StoredSpectrum {
                index: trailing_number(&name).unwrap_or_default(),
                y: dataset.read_raw::<f64>()?,
                name,
                attributes,
            });
        }
        spectra.sort_by_key(|s| s.index);
        Ok(spectra)
    }
    /// Reads the normalized spectra of an NPoM subgroup.
    ///
    /// # Errors
    ///
    /// This function will return an error if the collection cannot be read.
    pub fn read_npom_group(&self, group: NpomGroup) -> DfResult<Vec<StoredSpectrum>> {
        self.read_collection(&format!("{}/{NORMALISED}", group.path()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        classifier::Classifier,
        spectrum::{Classification, Reason},
        utils::test_fixtures::{axis, double_spectrum, noise_spectrum, npom_spectrum},
    };
    use approx::assert_abs_diff_eq;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn metadata() -> ParticleMetadata {
        ParticleMetadata {
            creation_timestamp: Some("2019-04-01T12:00:00".into()),
            laser_power: Some(0.5),
            integration_time: None,
        }
    }
    fn members(writer: &SummaryWriter, path: &str) -> Vec<String> {
        let mut names = writer.file().group(path).unwrap().member_names().unwrap();
        names.sort();
        names
    }
    #[test]
    fn group_names() {
        assert_eq!(NpomGroup::iter().count(), 8);
        assert_eq!(NpomGroup::from_name("Ideal NPoMs").unwrap(), NpomGroup::Ideal);
        assert_eq!(NpomGroup::from_name(" Doubles").unwrap(), NpomGroup::Doubles);
        assert_matches!(NpomGroup::from_name("Odd"), Err(DfError::Config(_)));
        assert_eq!(NpomGroup::Perfect.path(), "NPoMs/Perfect NPoMs");
    }
    #[test]
    fn skeleton() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.h5");
        let writer = SummaryWriter::create(&path).unwrap();
        for group in NpomGroup::iter() {
            assert!(writer.file().link_exists(&format!("{}/Raw", group.path())));
            assert!(writer.file().link_exists(&format!("{}/Normalised", group.path())));
        }
        assert!(writer.wavelengths().is_err());
        drop(writer);
        assert!(SummaryWriter::create(&path).is_err());
        assert!(SummaryWriter::open(&path).is_ok());
    }
    #[test]
    fn open_foreign_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.h5");
        File::create(&path).unwrap();
        assert_matches!(SummaryWriter::open(&path), Err(DfError::Archive(_)));
    }
    #[test]
    fn write_spectra() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SummaryWriter::create(&dir.path().join("summary.h5")).unwrap();
        let x = Arc::new(axis());
        let classifier = Classifier::default();
        let single = classifier
            .analyse(0, &x, npom_spectrum(&x), false)
            .unwrap()
            .with_alignment(true, 12.0, vec![0.0; x.len()]);
        let double = classifier
            .analyse(1, &x, double_spectrum(&x), false)
            .unwrap()
            .with_alignment(false, 1.0, vec![0.0; x.len()]);
        let noise = classifier.analyse(2, &x, noise_spectrum(&x, 2), false).unwrap();
        assert_eq!(noise.class(), &Classification::NotNpom(Reason::SignalTooLow));
        for spectrum in [&single, &double, &noise] {
            writer.write_spectrum(spectrum, &metadata()).unwrap();
        }
        writer
            .write_failed(3, &x, &npom_spectrum(&x), "/scan/Particle_3", "boom")
            .unwrap();

        assert_eq!(
            members(&writer, ALL_SPECTRA),
            vec!["Spectrum 0", "Spectrum 1", "Spectrum 2", "Spectrum 3"]
        );
        assert_eq!(members(&writer, NON_NPOMS), vec!["Spectrum 2"]);
        assert_eq!(members(&writer, FAILED_SPECTRA), vec!["Spectrum 3"]);
        assert_eq!(
            members(&writer, "NPoMs/All NPoMs/Raw"),
            vec!["Spectrum 0", "Spectrum 1"]
        );
        assert_eq!(members(&writer, "NPoMs/Perfect NPoMs/Raw"), vec!["Spectrum 0"]);
        assert_eq!(members(&writer, "NPoMs/Doubles/Normalised"), vec!["Spectrum 1"]);
        assert_eq!(members(&writer, "NPoMs/Singles/Raw"), vec!["Spectrum 0"]);
        assert!(members(&writer, "NPoMs/Weird Peakers/Raw").is_empty());

        let file = writer.file();
        let group = file.group(ALL_SPECTRA).unwrap();
        assert_eq!(
            attrs::read_str(&group, "Date measured").as_deref(),
            Some("2019-04-01")
        );
        assert_eq!(writer.wavelengths().unwrap().len(), x.len());
        // links share the canonical dataset including its attributes
        let linked = file.dataset("NPoMs/Doubles/Raw/Spectrum 1").unwrap();
        assert_eq!(attrs::read_opt_bool(&linked, "Double Peak?"), Some(true));
        assert_eq!(attrs::read_str(&linked, "Coupled mode FWHM").as_deref(), Some(attrs::NA));
        let rejected = file.dataset("Non-NPoMs/Spectrum 2").unwrap();
        assert_eq!(
            attrs::read_str(&rejected, "Not NPoM because").as_deref(),
            Some("Signal too low")
        );
        assert_eq!(attrs::read_str(&rejected, "Double Peak?").as_deref(), Some(attrs::NA));
        let failed = file.dataset("Failed Spectra/Spectrum 3").unwrap();
        assert_eq!(attrs::read_str(&failed, "Failure reason").as_deref(), Some("boom"));

        let stored = writer.read_npom_group(NpomGroup::All).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].index, 0);
        assert_abs_diff_eq!(
            stored[0].attribute("Coupled mode wavelength").unwrap(),
            720.0,
            epsilon = 2.0
        );
        assert_abs_diff_eq!(
            stored[0].attribute("Transverse mode intensity (normalised)").unwrap(),
            1.0
        );
        assert!(stored[1].attribute("Coupled mode FWHM").is_none());
        assert_eq!(stored[0].y.as_slice(), single.normalized().unwrap());
    }
}
