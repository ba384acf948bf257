//! Input validation for attendance requests and settings
//!
//! Student ids double as directory names under the face-sample store, so they
//! are checked for path separators as well as length.

use anyhow::{anyhow, Result};
use chrono::{Local, NaiveDateTime, Timelike};

// ============================================================================
// CONSTANTS: Input Size Limits
// ============================================================================

/// Maximum length for student ids
pub const MAX_ID_LENGTH: usize = 128;

/// Maximum length for student names
pub const MAX_NAME_LENGTH: usize = 256;

/// Maximum number of images accepted in one registration
pub const MAX_REGISTRATION_IMAGES: usize = 32;

/// Upper bound for the acceptance threshold (the LBPH distance never exceeds 256)
pub const MAX_ACCEPTANCE_THRESHOLD: f64 = 10_000.0;

/// Upper bound for the duplicate window (one day)
pub const MAX_DUPLICATE_WINDOW_SECS: u64 = 86_400;

// ============================================================================
// Local Time
// ============================================================================

/// Current local wall-clock time truncated to whole seconds
pub fn local_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

// ============================================================================
// String Validation
// ============================================================================

/// Validate string length against a maximum
pub fn validate_length(value: &str, max_length: usize, field_name: &str) -> Result<()> {
    if value.len() > max_length {
        return Err(anyhow!(
            "{} exceeds maximum length of {} bytes (got {})",
            field_name,
            max_length,
            value.len()
        ));
    }
    Ok(())
}

/// Validate non-empty string
pub fn validate_non_empty(value: &str, field_name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} cannot be empty", field_name));
    }
    Ok(())
}

/// Validate a student id
pub fn validate_id(id: &str, field_name: &str) -> Result<()> {
    validate_non_empty(id, field_name)?;
    validate_length(id, MAX_ID_LENGTH, field_name)?;

    // Prevent path traversal in IDs
    if id.contains("..") || id.contains('/') || id.contains('\\') {
        return Err(anyhow!(
            "{} contains invalid characters (no path separators or '..' allowed)",
            field_name
        ));
    }

    if id.chars().any(char::is_control) {
        return Err(anyhow!("{} contains control characters", field_name));
    }

    Ok(())
}

/// Validate a student name
pub fn validate_name(name: &str, field_name: &str) -> Result<()> {
    validate_non_empty(name, field_name)?;
    validate_length(name, MAX_NAME_LENGTH, field_name)?;
    Ok(())
}

// ============================================================================
// Numeric Validation
// ============================================================================

/// Validate value is within range
pub fn validate_range<T: PartialOrd + std::fmt::Display>(
    value: T,
    min: T,
    max: T,
    field_name: &str,
) -> Result<()> {
    if value < min || value > max {
        return Err(anyhow!(
            "{} must be between {} and {}, got {}",
            field_name,
            min,
            max,
            value
        ));
    }
    Ok(())
}

/// Validate the acceptance threshold: finite and strictly positive
pub fn validate_threshold(value: f64, field_name: &str) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(anyhow!("{} must be a positive number, got {}", field_name, value));
    }
    validate_range(value, 0.0, MAX_ACCEPTANCE_THRESHOLD, field_name)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_now_has_no_subsecond_part() {
        assert_eq!(local_now().nanosecond(), 0);
    }

    #[test]
    fn test_validate_id() {
        // Valid IDs
        assert!(validate_id("1", "student_id").is_ok());
        assert!(validate_id("cs-2024_017", "student_id").is_ok());

        // Invalid IDs
        assert!(validate_id("", "id").is_err());
        assert!(validate_id("  ", "id").is_err());
        assert!(validate_id("../etc/passwd", "id").is_err());
        assert!(validate_id("path/to/something", "id").is_err());
        assert!(validate_id("tab\there", "id").is_err());
        assert!(validate_id(&"a".repeat(300), "id").is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Alice Example", "name").is_ok());
        assert!(validate_name("", "name").is_err());
        assert!(validate_name(&"n".repeat(MAX_NAME_LENGTH + 1), "name").is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range(50, 0, 100, "value").is_ok());
        assert!(validate_range(0, 0, 100, "value").is_ok());
        assert!(validate_range(100, 0, 100, "value").is_ok());
        assert!(validate_range(101, 0, 100, "value").is_err());
    }

    #[test]
    fn test_validate_threshold() {
        assert!(validate_threshold(100.0, "threshold").is_ok());
        assert!(validate_threshold(0.0, "threshold").is_err());
        assert!(validate_threshold(-5.0, "threshold").is_err());
        assert!(validate_threshold(f64::NAN, "threshold").is_err());
        assert!(validate_threshold(f64::INFINITY, "threshold").is_err());
    }
}
