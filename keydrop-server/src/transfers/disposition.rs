//! Content-Disposition rendering for downloads

use std::fmt::Write;

/// Render `attachment; filename="..."; filename*=UTF-8''...` for `name`
///
/// The quoted form is an ASCII fallback: quotes and backslashes are
/// escaped, control and non-ASCII characters become `_`. The extended form
/// carries the exact name, percent-encoded.
pub fn content_disposition(name: &str) -> String {
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        quoted_fallback(name),
        percent_encode(name)
    )
}

fn quoted_fallback(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '"' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('_'),
        }
    }
    out
}

/// Percent-encode everything outside the `attr-char` set
fn percent_encode(name: &str) -> String {
    let mut out = String::with_capacity(name.len() * 3);
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            out.push(char::from(byte));
        } else {
            // Writing to a String cannot fail
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}
