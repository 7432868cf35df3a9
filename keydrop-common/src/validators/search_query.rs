//! Name search query validation
//!
//! Search is a plain case-insensitive substring match over display names,
//! so the query only has to be non-empty, bounded, and printable.

/// Maximum length for search queries in bytes
pub const MAX_SEARCH_QUERY_LENGTH: usize = 256;

/// Validation error for search queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQueryError {
    /// Query is empty or contains only whitespace
    Empty,
    /// Query exceeds maximum length
    TooLong,
    /// Query contains control characters
    InvalidCharacters,
}

impl std::fmt::Display for SearchQueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "search query is empty"),
            Self::TooLong => write!(f, "search query exceeds {MAX_SEARCH_QUERY_LENGTH} bytes"),
            Self::InvalidCharacters => write!(f, "search query contains control characters"),
        }
    }
}

impl std::error::Error for SearchQueryError {}

/// Validate a name search query
///
/// # Errors
///
/// Returns a `SearchQueryError` variant describing the validation failure.
pub fn validate_search_query(query: &str) -> Result<(), SearchQueryError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(SearchQueryError::Empty);
    }
    if trimmed.len() > MAX_SEARCH_QUERY_LENGTH {
        return Err(SearchQueryError::TooLong);
    }
    if trimmed.chars().any(char::is_control) {
        return Err(SearchQueryError::InvalidCharacters);
    }
    Ok(())
}
