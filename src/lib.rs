//! This is the documentation for the **npom_df** package, a batch analysis of darkfield z-scan
//! spectra of nanoparticle-on-mirror (NPoM) constructs.
//!
//! A particle-tracking archive is read with [`archive::InputArchive`]. The focal z-stack of every
//! particle is condensed into a single spectrum ([`condenser`]), classified as NPoM or rejected
//! ([`classifier`]) and stored in a summary archive ([`summary::SummaryWriter`]). Finally the
//! coupled-mode wavelengths of the NPoM groups are aggregated into histograms ([`histogram`]).
//! [`batch::BatchContext`] ties these stages together.
pub mod archive;
pub mod batch;
pub mod classifier;
pub mod condenser;
pub mod config;
pub mod console;
pub mod error;
pub mod histogram;
pub mod observer;
pub mod spectrum;
pub mod summary;
pub mod utils;

/// Return the version information of the package.
///
/// This function returns a `String` containing the package version and the build profile.
#[must_use]
pub fn get_version() -> String {
    let profile = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };
    format!("{} ({profile})", env!("CARGO_PKG_VERSION"))
}
