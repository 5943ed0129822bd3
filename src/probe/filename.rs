//! Suggested download filenames for cached response bodies.
//!
//! Derivation order, first applicable wins:
//! 1. `Content-Disposition` filename parameter;
//! 2. last non-numeric URL path segment;
//! 3. a query parameter that looks like a resource name;
//! 4. first host label plus timestamp;
//! 5. `response_<timestamp>`.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::transport::ResponseHeaders;

/// Path segments that name API endpoints rather than files.
const API_ENDPOINT_NAMES: &[&str] = &[
    "GetChannelsList",
    "GetChannelList",
    "GetPrograms",
    "GetEPG",
    "getLiveSource",
    "getConfig",
    "getToken",
    "getPlaylist",
];

/// Query keys whose values usually name the requested resource.
const RESOURCE_QUERY_KEYS: &[&str] = &["action", "method", "type", "resource", "endpoint", "api"];

#[allow(clippy::expect_used)]
static ENDPOINT_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z][a-zA-Z]+$").expect("endpoint regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static RESOURCE_KEYWORD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(list|data|info|config|source|token|auth|channel|program|epg)$")
        .expect("keyword regex is valid") // Static pattern, safe to panic
});

/// Derives a filename for a response fetched from `url`.
///
/// `timestamp` (Unix seconds) is used by the fallbacks.
#[must_use]
pub fn suggest_filename(url: &Url, headers: &ResponseHeaders, timestamp: u64) -> String {
    let content_type = headers
        .get("content-type")
        .map(String::as_str)
        .unwrap_or_default();
    let extension = extension_from_content_type(content_type);

    if let Some(name) = headers
        .get("content-disposition")
        .and_then(|value| parse_content_disposition(value))
        .map(|name| sanitize_filename(&name))
        .filter(|name| name != "_")
    {
        return ensure_extension(name, extension);
    }

    if let Some(name) = from_path(url, extension) {
        return name;
    }

    if let Some(name) = from_query(url, extension) {
        return name;
    }

    if let Some(label) = url
        .host_str()
        .and_then(|host| host.split('.').next())
        .map(sanitize_filename_component)
        .filter(|label| !label.is_empty())
    {
        return format!("{label}_{timestamp}{extension}");
    }

    format!("response_{timestamp}{extension}")
}

fn from_path(url: &Url, extension: &str) -> Option<String> {
    let segment = url
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| urlencoding::decode(segment).ok().map(|s| s.into_owned()))
        .filter(|segment| !segment.chars().all(|c| c.is_ascii_digit()))
        .next_back()?;
    let name = sanitize_filename(&segment);
    if name == "_" {
        return None;
    }
    if API_ENDPOINT_NAMES.contains(&name.as_str()) || ENDPOINT_NAME_PATTERN.is_match(&name) {
        return Some(format!("{name}{extension}"));
    }
    Some(ensure_extension(name, extension))
}

fn from_query(url: &Url, extension: &str) -> Option<String> {
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

    let by_key = pairs.iter().find(|(key, value)| {
        RESOURCE_QUERY_KEYS.contains(&key.as_str())
            && !value.is_empty()
            && value.len() < 50
            && !value.contains('=')
    });
    if let Some((_, value)) = by_key {
        let name = sanitize_filename_component(value);
        if !name.is_empty() {
            return Some(format!("{name}{extension}"));
        }
    }

    pairs
        .iter()
        .filter(|(key, value)| {
            !value.is_empty()
                && value.len() < 30
                && (RESOURCE_KEYWORD_PATTERN.is_match(key) || RESOURCE_KEYWORD_PATTERN.is_match(value))
        })
        .map(|(_, value)| sanitize_filename_component(value))
        .find(|name| !name.is_empty())
        .map(|name| format!("{name}{extension}"))
}

fn ensure_extension(name: String, extension: &str) -> String {
    if name.contains('.') {
        name
    } else {
        format!("{name}{extension}")
    }
}

/// Guesses a file extension from a Content-Type header value.
#[must_use]
pub fn extension_from_content_type(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    match mime.as_str() {
        "application/json" | "text/json" => ".json",
        "application/javascript" | "text/javascript" => ".js",
        "application/xml" | "text/xml" => ".xml",
        "text/html" => ".html",
        "text/plain" => ".txt",
        "text/css" => ".css",
        "application/pdf" => ".pdf",
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/svg+xml" => ".svg",
        "application/x-mpegurl" | "application/vnd.apple.mpegurl" | "audio/x-mpegurl" => ".m3u8",
        "video/mp4" => ".mp4",
        "video/mpeg" => ".mpeg",
        "video/quicktime" => ".mov",
        "video/x-msvideo" => ".avi",
        "video/x-flv" => ".flv",
        "video/x-matroska" => ".mkv",
        "video/webm" => ".webm",
        "video/mp2t" => ".ts",
        "audio/mpeg" => ".mp3",
        "audio/ogg" => ".ogg",
        "audio/wav" => ".wav",
        "audio/webm" => ".weba",
        "audio/aac" | "audio/x-aac" => ".aac",
        "audio/flac" => ".flac",
        "application/zip" => ".zip",
        "application/gzip" | "application/x-gzip" => ".gz",
        "application/x-tar" => ".tar",
        "application/x-rar-compressed" => ".rar",
        "application/x-7z-compressed" => ".7z",
        _ => ".bin",
    }
}

/// Parses Content-Disposition header to extract filename.
///
/// Handles both:
/// - `attachment; filename="example.m3u8"`
/// - `attachment; filename=example.m3u8`
/// - `attachment; filename*=UTF-8''example.m3u8` (RFC 5987)
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            if let Ok(decoded) = urlencoding::decode(encoded[..end].trim()) {
                return Some(decoded.into_owned());
            }
        }
    }

    if let Some(pos) = header.find("filename=") {
        let value = header[pos + 9..].trim();
        if let Some(stripped) = value.strip_prefix('"') {
            if let Some(end) = stripped.find('"') {
                return Some(stripped[..end].to_string());
            }
        } else {
            let end = value.find(';').unwrap_or(value.len());
            let filename = value[..end].trim();
            if !filename.is_empty() {
                return Some(filename.to_string());
            }
        }
    }

    None
}

/// Replaces characters that are unsafe in a filename or a quoted header value.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let sanitized = sanitized.trim_start_matches('.').to_string();
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

/// Collapses anything outside `[alnum - _ .]` into single underscores.
pub(crate) fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = if ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            ch
        } else {
            '_'
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    out.trim_matches('_').to_string()
}
