//! Display name validation
//!
//! The display name is the original, user-supplied file name. It is stored
//! unsanitized for display, so it only has to be printable and bounded.

/// Maximum length for display names in bytes
pub const MAX_DISPLAY_NAME_LENGTH: usize = 255;

/// Validation error for display names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayNameError {
    /// Name is empty or whitespace-only
    Empty,
    /// Name exceeds maximum length
    TooLong,
    /// Name contains null bytes or other control characters
    InvalidCharacters,
}

impl std::fmt::Display for DisplayNameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "file name is empty"),
            Self::TooLong => write!(
                f,
                "file name exceeds {MAX_DISPLAY_NAME_LENGTH} bytes"
            ),
            Self::InvalidCharacters => write!(f, "file name contains control characters"),
        }
    }
}

impl std::error::Error for DisplayNameError {}

/// Validate a user-supplied file name
///
/// Checks:
/// - Not empty or whitespace-only
/// - At most 255 bytes
/// - No control characters (including null)
///
/// # Errors
///
/// Returns a `DisplayNameError` variant describing the validation failure.
pub fn validate_display_name(name: &str) -> Result<(), DisplayNameError> {
    if name.trim().is_empty() {
        return Err(DisplayNameError::Empty);
    }
    if name.len() > MAX_DISPLAY_NAME_LENGTH {
        return Err(DisplayNameError::TooLong);
    }
    if name.chars().any(char::is_control) {
        return Err(DisplayNameError::InvalidCharacters);
    }
    Ok(())
}
