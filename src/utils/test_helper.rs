//! various helper functions used to simplify unit tests.
//!
//! **Note**: This module is only compiled and used during testing. Hence, there might be no
//! further documentation show up.

#[cfg(test)]
pub mod test_helper {
    use log::Level;

    /// Checks that exactly the `expected` messages have been logged with the given `level`.
    pub fn check_logs(level: Level, expected: Vec<&str>) {
        testing_logger::validate(|captured_logs| {
            let captured_logs: Vec<_> = captured_logs
                .iter()
                .filter(|l| l.level == level)
                .collect();
            assert_eq!(captured_logs.len(), expected.len());
            for log in captured_logs.iter().zip(expected.clone()) {
                assert_eq!(log.0.body, log.1);
            }
        });
    }
    pub fn check_warnings(expected_warnings: Vec<&str>) {
        check_logs(Level::Warn, expected_warnings);
    }
}
