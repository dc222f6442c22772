//! Module for additional computational capabilities
pub mod filter_data;
pub mod math_utils;
pub mod signal;
pub mod spikes;
pub mod test_helper;
#[cfg(test)]
pub mod test_fixtures;
pub mod uom_macros;
pub use math_utils::{f64_to_usize, usize_to_f64};
