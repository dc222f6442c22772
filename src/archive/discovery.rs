//! Locating input archives and choosing names for output archives.
use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use log::debug;
use regex::Regex;

use crate::error::{DfError, DfResult};

/// Pattern selecting files whose names start with an ISO date (`YYYY-MM-DD`).
pub const DATE_PATTERN: &str = "date";
/// Base name of the summary archive.
pub const OUTPUT_STEM: &str = "MultiPeakFitOutput";

fn is_hdf5(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("h5") || e.eq_ignore_ascii_case("hdf5"))
}

fn name_matcher(pattern: &str) -> DfResult<Regex> {
    let expr = if pattern == DATE_PATTERN {
        r"^\d{4}-[01]\d-[0-3]\d".to_owned()
    } else {
        format!("^{}", regex::escape(pattern))
    };
    Regex::new(&expr).map_err(|e| DfError::Archive(format!("invalid name pattern: {e}")))
}

/// Finds the most recent (or oldest) HDF5 archive in `root` whose name matches `pattern`.
///
/// `pattern` is a file name prefix. The special pattern [`DATE_PATTERN`] matches all files
/// starting with an ISO date. Summary archives written by this crate are never returned.
///
/// # Errors
///
/// This function will return an error if
///   - the directory cannot be read
///   - no matching archive exists
pub fn find_archive(root: &Path, pattern: &str, newest: bool) -> DfResult<PathBuf> {
    let matcher = name_matcher(pattern)?;
    let entries = fs::read_dir(root).map_err(|e| {
        DfError::Archive(format!("cannot read directory {} : {}", root.display(), e))
    })?;
    let mut candidates: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_hdf5(path))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| matcher.is_match(n) && !n.starts_with(OUTPUT_STEM))
        })
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();
    candidates.sort();
    let chosen = if newest {
        candidates.pop()
    } else {
        candidates.into_iter().next()
    };
    chosen.map(|(_, path)| path).ok_or_else(|| {
        DfError::Archive(format!(
            "no input archive matching '{pattern}' found in {}",
            root.display()
        ))
    })
}

/// Returns the first unused summary archive name in `root`.
///
/// `MultiPeakFitOutput.h5` is used if it does not exist, otherwise `MultiPeakFitOutput_0.h5`,
/// `MultiPeakFitOutput_1.h5`, ...
#[must_use]
pub fn output_path(root: &Path) -> PathBuf {
    let plain = root.join(format!("{OUTPUT_STEM}.h5"));
    if !plain.exists() {
        return plain;
    }
    let mut n = 0;
    loop {
        let candidate = root.join(format!("{OUTPUT_STEM}_{n}.h5"));
        if !candidate.exists() {
            debug!("{} exists, writing to {}", plain.display(), candidate.display());
            return candidate;
        }
        n += 1;
    }
}

/// Finds the most recent summary archive in `root`.
///
/// # Errors
///
/// This function will return an error if no summary archive exists.
pub fn latest_output(root: &Path) -> DfResult<PathBuf> {
    find_summary(root).ok_or_else(|| {
        DfError::Archive(format!("no summary archive found in {}", root.display()))
    })
}

fn find_summary(root: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            is_hdf5(path)
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(OUTPUT_STEM))
        })
        .max_by_key(|path| {
            fs::metadata(path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH)
        })
}
