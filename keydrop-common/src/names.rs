//! Storage name derivation
//!
//! Turns a user-supplied file name into something safe to put on disk. The
//! result is deterministic and NOT collision-free: the server prefixes a
//! disambiguator before using it as a physical file name.

/// Separator used between slug words
const SLUG_SEPARATOR: char = '-';

/// Slug used when nothing of the base name survives sanitizing
const EMPTY_SLUG: &str = "file";

/// Split a file name into `(base, extension)`
///
/// The extension includes the leading dot and is taken from the last dot in
/// the name, so `"archive.tar.gz"` splits into `("archive.tar", ".gz")`.
/// A name without a dot has an empty extension.
#[must_use]
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) => name.split_at(idx),
        None => (name, ""),
    }
}

/// Derive a filesystem-safe storage name from a user-supplied file name
///
/// Steps:
/// - split off the extension at the last dot
/// - lower-case the base, replace every run of characters outside
///   `[a-z0-9]` with a single `-`, trim leading/trailing `-`
/// - re-append the extension unchanged, as long as it is itself safe
///
/// The output never contains path separators or control characters. An
/// extension containing anything outside `[A-Za-z0-9]` after the dot is
/// dropped, since keeping it "unchanged" would let separators through.
#[must_use]
pub fn sanitize_file_name(original: &str) -> String {
    let (base, extension) = split_extension(original);

    let mut slug = String::with_capacity(base.len());
    let mut pending_separator = false;
    for ch in base.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_separator && !slug.is_empty() {
                slug.push(SLUG_SEPARATOR);
            }
            pending_separator = false;
            slug.push(ch);
        } else {
            pending_separator = true;
        }
    }

    if slug.is_empty() {
        slug.push_str(EMPTY_SLUG);
    }

    if is_safe_extension(extension) {
        slug.push_str(extension);
    }

    slug
}

/// Extension must be a dot followed by one or more ASCII alphanumerics
fn is_safe_extension(extension: &str) -> bool {
    extension
        .strip_prefix('.')
        .is_some_and(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
}
