//! Typed access to HDF5 attributes.
//!
//! Missing values are stored as the string [`NA`] so that downstream tools can tell an
//! unavailable quantity from a numerical zero.
use std::str::FromStr;

use hdf5::types::{VarLenAscii, VarLenUnicode};
use hdf5::Location;

use crate::error::{DfError, DfResult};

/// Sentinel stored for unavailable values.
pub const NA: &str = "N/A";

fn to_var_len_unicode(value: &str) -> DfResult<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| DfError::Archive(format!("invalid string attribute '{value}': {e}")))
}

/// Writes a string attribute.
///
/// # Errors
///
/// This function will return an error if the attribute cannot be created.
pub fn write_str(loc: &Location, name: &str, value: &str) -> DfResult<()> {
    let value = to_var_len_unicode(value)?;
    loc.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

/// Writes a scalar floating point attribute.
///
/// # Errors
///
/// This function will return an error if the attribute cannot be created.
pub fn write_f64(loc: &Location, name: &str, value: f64) -> DfResult<()> {
    loc.new_attr::<f64>().create(name)?.write_scalar(&value)?;
    Ok(())
}

/// Writes an unsigned integer attribute.
///
/// # Errors
///
/// This function will return an error if the attribute cannot be created.
pub fn write_usize(loc: &Location, name: &str, value: usize) -> DfResult<()> {
    let value = u64::try_from(value)
        .map_err(|_| DfError::Archive(format!("value of attribute '{name}' too large")))?;
    loc.new_attr::<u64>().create(name)?.write_scalar(&value)?;
    Ok(())
}

/// Writes a floating point attribute or [`NA`] if the value is missing or not finite.
///
/// # Errors
///
/// This function will return an error if the attribute cannot be created.
pub fn write_opt_f64(loc: &Location, name: &str, value: Option<f64>) -> DfResult<()> {
    match value {
        Some(v) if v.is_finite() => write_f64(loc, name, v),
        _ => write_str(loc, name, NA),
    }
}

/// Writes a boolean attribute.
///
/// # Errors
///
/// This function will return an error if the attribute cannot be created.
pub fn write_bool(loc: &Location, name: &str, value: bool) -> DfResult<()> {
    loc.new_attr::<bool>().create(name)?.write_scalar(&value)?;
    Ok(())
}

/// Writes a boolean attribute or [`NA`] if the value is missing.
///
/// # Errors
///
/// This function will return an error if the attribute cannot be created.
pub fn write_opt_bool(loc: &Location, name: &str, value: Option<bool>) -> DfResult<()> {
    value.map_or_else(
        || write_str(loc, name, NA),
        |v| write_bool(loc, name, v),
    )
}

/// Writes a one-dimensional floating point attribute.
///
/// # Errors
///
/// This function will return an error if the attribute cannot be created.
pub fn write_f64_vec(loc: &Location, name: &str, values: &[f64]) -> DfResult<()> {
    loc.new_attr::<f64>()
        .shape((values.len(),))
        .create(name)?
        .write_raw(values)?;
    Ok(())
}

/// Writes a one-dimensional floating point attribute where missing entries are stored as NaN.
///
/// An empty or completely missing vector is stored as [`NA`].
///
/// # Errors
///
/// This function will return an error if the attribute cannot be created.
pub fn write_opt_f64_vec(loc: &Location, name: &str, values: &[Option<f64>]) -> DfResult<()> {
    if values.iter().all(Option::is_none) {
        return write_str(loc, name, NA);
    }
    let values: Vec<f64> = values.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
    write_f64_vec(loc, name, &values)
}

/// Returns `true` if the attribute exists.
#[must_use]
pub fn has_attr(loc: &Location, name: &str) -> bool {
    loc.attr_names()
        .is_ok_and(|names| names.iter().any(|n| n == name))
}

/// Reads a string attribute. Returns `None` if the attribute is missing or not a string.
#[must_use]
pub fn read_str(loc: &Location, name: &str) -> Option<String> {
    let attr = loc.attr(name).ok()?;
    if let Ok(value) = attr.read_scalar::<VarLenUnicode>() {
        return Some(value.to_string());
    }
    attr.read_scalar::<VarLenAscii>()
        .ok()
        .map(|value| value.to_string())
}

/// Reads a floating point attribute.
///
/// Returns `None` if the attribute is missing, holds the [`NA`] sentinel or no numerical data.
/// For array attributes the first entry is returned.
#[must_use]
pub fn read_opt_f64(loc: &Location, name: &str) -> Option<f64> {
    let attr = loc.attr(name).ok()?;
    attr.read_raw::<f64>()
        .ok()
        .and_then(|values| values.first().copied())
        .filter(|v| v.is_finite())
}

/// Reads a boolean attribute. Returns `None` if the attribute is missing or holds [`NA`].
#[must_use]
pub fn read_opt_bool(loc: &Location, name: &str) -> Option<bool> {
    let attr = loc.attr(name).ok()?;
    attr.read_scalar::<bool>().ok()
}

/// Reads a one-dimensional floating point attribute.
///
/// # Errors
///
/// This function will return an error if the attribute exists but cannot be read as numbers.
pub fn read_f64_vec(loc: &Location, name: &str) -> DfResult<Option<Vec<f64>>> {
    if !has_attr(loc, name) {
        return Ok(None);
    }
    let values = loc.attr(name)?.read_raw::<f64>().map_err(|e| {
        DfError::Archive(format!("attribute '{name}' is not numerical: {e}"))
    })?;
    Ok(Some(values))
}
