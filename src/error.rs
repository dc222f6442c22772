#![warn(missing_docs)]
//! Error structures of the darkfield analysis
use std::{error::Error, fmt::Display};

/// Application specific Result type
pub type DfResult<T> = std::result::Result<T, DfError>;

/// Errors that can be returned by the various stages of the analysis.
#[derive(Debug, PartialEq, Eq)]
pub enum DfError {
    /// errors while reading or writing HDF5 archives, including unexpected layouts
    Archive(String),
    /// errors while condensing a z-stack into a single spectrum
    Condenser(String),
    /// errors while classifying a spectrum or extracting its peaks
    Classifier(String),
    /// errors while building or fitting histograms
    Histogram(String),
    /// errors of the numerical signal helpers (filters, interpolation, ...)
    Signal(String),
    /// invalid analysis configuration
    Config(String),
    /// errors console io
    Console(String),
    /// the batch was cancelled from outside
    Cancelled,
    /// errors not falling in one of the categories above
    Other(String),
}

impl Display for DfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Archive(m) => {
                write!(f, "Archive:{m}")
            }
            Self::Condenser(m) => {
                write!(f, "Condenser:{m}")
            }
            Self::Classifier(m) => {
                write!(f, "Classifier:{m}")
            }
            Self::Histogram(m) => {
                write!(f, "Histogram:{m}")
            }
            Self::Signal(m) => {
                write!(f, "Signal:{m}")
            }
            Self::Config(m) => {
                write!(f, "Config:{m}")
            }
            Self::Console(m) => {
                write!(f, "Console:{m}")
            }
            Self::Cancelled => write!(f, "Batch cancelled"),
            Self::Other(m) => write!(f, "DF Error:Other:{m}"),
        }
    }
}
impl Error for DfError {}

impl std::convert::From<String> for DfError {
    fn from(msg: String) -> Self {
        Self::Other(msg)
    }
}
impl std::convert::From<hdf5::Error> for DfError {
    fn from(e: hdf5::Error) -> Self {
        Self::Archive(e.to_string())
    }
}
#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn from() {
        let error = DfError::from("test".to_string());
        assert_eq!(error, DfError::Other("test".to_string()));
    }
    #[test]
    fn from_hdf5() {
        let error = DfError::from(hdf5::Error::from("broken link"));
        assert_eq!(error, DfError::Archive("broken link".to_string()));
    }
    #[test]
    fn display() {
        assert_eq!(
            format!("{}", DfError::Archive("test".to_string())),
            "Archive:test"
        );
        assert_eq!(
            format!("{}", DfError::Condenser("test".to_string())),
            "Condenser:test"
        );
        assert_eq!(
            format!("{}", DfError::Classifier("test".to_string())),
            "Classifier:test"
        );
        assert_eq!(
            format!("{}", DfError::Histogram("test".to_string())),
            "Histogram:test"
        );
        assert_eq!(
            format!("{}", DfError::Signal("test".to_string())),
            "Signal:test"
        );
        assert_eq!(
            format!("{}", DfError::Config("test".to_string())),
            "Config:test"
        );
        assert_eq!(
            format!("{}", DfError::Console("test".to_string())),
            "Console:test"
        );
        assert_eq!(format!("{}", DfError::Cancelled), "Batch cancelled");
        assert_eq!(
            format!("{}", DfError::Other("test".to_string())),
            "DF Error:Other:test"
        );
    }
    #[test]
    fn debug() {
        assert_eq!(
            format!("{:?}", DfError::Archive("test".to_string())),
            "Archive(\"test\")"
        );
    }
}
