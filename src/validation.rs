//! Field-level checks used by [`crate::config::Settings::validate`].
use std::ops::RangeInclusive;

/// Log levels accepted by the `tracing` filter.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validates if a given string is a valid file path.
///
/// # Arguments
///
/// * `path` - The string to validate.
///
/// # Returns
///
/// * `Ok(())` if the file path is valid.
/// * `Err(&'static str)` if the file path is invalid.
pub fn is_valid_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("File path cannot be empty");
    }
    if path.contains('\0') {
        return Err("File path cannot contain null bytes");
    }
    Ok(())
}

/// Validates if a given value is within a specified numeric range.
///
/// # Arguments
///
/// * `value` - The value to validate.
/// * `range` - The inclusive range to validate against.
///
/// # Returns
///
/// * `Ok(())` if the value is within the range.
/// * `Err(&'static str)` if the value is outside the range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates that a duration in seconds is finite and strictly positive.
pub fn is_positive_seconds(value: f64) -> Result<(), &'static str> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err("Duration must be a positive number of seconds")
    }
}

/// Validates a log level name, case-insensitively.
pub fn is_valid_log_level(level: &str) -> Result<(), &'static str> {
    if LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        Err("Log level must be one of trace, debug, info, warn, error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path() {
        assert!(is_valid_path("snaps/").is_ok());
        assert!(is_valid_path("").is_err());
        assert!(is_valid_path("sn\0aps").is_err());
    }

    #[test]
    fn test_range() {
        assert!(is_in_range(12u8, 1..=16).is_ok());
        assert!(is_in_range(0u8, 1..=16).is_err());
        assert!(is_in_range(3.3f32, 0.1..=5.0).is_ok());
    }

    #[test]
    fn test_positive_seconds() {
        assert!(is_positive_seconds(2.5).is_ok());
        assert!(is_positive_seconds(0.0).is_err());
        assert!(is_positive_seconds(f64::NAN).is_err());
        assert!(is_positive_seconds(f64::INFINITY).is_err());
    }

    #[test]
    fn test_log_level() {
        assert!(is_valid_log_level("info").is_ok());
        assert!(is_valid_log_level("DEBUG").is_ok());
        assert!(is_valid_log_level("verbose").is_err());
    }
}
