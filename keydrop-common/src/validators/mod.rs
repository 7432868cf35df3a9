//! Input validation functions
//!
//! Shared between client and server: clients can pre-validate, the server
//! enforces.

mod display_name;
mod search_query;

pub use display_name::{DisplayNameError, MAX_DISPLAY_NAME_LENGTH, validate_display_name};
pub use search_query::{MAX_SEARCH_QUERY_LENGTH, SearchQueryError, validate_search_query};
