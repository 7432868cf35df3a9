//! MIME type selection for stored objects

use keydrop_common::{DEFAULT_MIME_TYPE, split_extension};

/// Longest declared MIME type we accept
const MAX_MIME_TYPE_LENGTH: usize = 127;

/// Pick the MIME type recorded for a new object
///
/// A well-formed client-declared type wins. Otherwise the content head is
/// sniffed, then the file extension is consulted, and finally
/// `application/octet-stream` is used.
pub fn detect_mime_type(declared: Option<&str>, head: &[u8], name: &str) -> String {
    if let Some(declared) = declared.map(str::trim).filter(|m| is_valid_mime_type(m)) {
        return declared.to_ascii_lowercase();
    }

    if let Some(kind) = infer::get(head) {
        return kind.mime_type().to_string();
    }

    mime_from_extension(name)
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string()
}

/// `type/subtype` with an optional parameter list, printable ASCII only
fn is_valid_mime_type(mime: &str) -> bool {
    if mime.is_empty() || mime.len() > MAX_MIME_TYPE_LENGTH {
        return false;
    }
    if !mime.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
        return false;
    }

    let essence = mime.split(';').next().unwrap_or_default().trim();
    let Some((kind, subtype)) = essence.split_once('/') else {
        return false;
    };
    let token = |s: &str| {
        !s.is_empty()
            && s
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"!#$&-^_.+".contains(&b))
    };
    token(kind) && token(subtype)
}

/// Extension table for formats that have no magic bytes
fn mime_from_extension(name: &str) -> Option<&'static str> {
    let (_, extension) = split_extension(name);
    let extension = extension.strip_prefix('.')?.to_ascii_lowercase();

    let mime = match extension.as_str() {
        "txt" | "log" | "nfo" | "ini" | "cfg" | "conf" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "xml" => "application/xml",
        "json" => "application/json",
        "yaml" | "yml" => "application/x-yaml",
        "toml" => "application/toml",
        "js" | "mjs" => "text/javascript",
        "ts" => "text/typescript",
        "rs" => "text/x-rust",
        "py" => "text/x-python",
        "c" | "h" => "text/x-c",
        "cpp" | "hpp" | "cc" => "text/x-c++",
        "java" => "text/x-java",
        "go" => "text/x-go",
        "sh" | "bash" => "text/x-shellscript",
        "sql" => "text/x-sql",
        "svg" => "image/svg+xml",
        "ics" => "text/calendar",
        "vcf" => "text/vcard",
        _ => return None,
    };
    Some(mime)
}
