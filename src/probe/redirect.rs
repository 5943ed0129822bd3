//! `Location` resolution for the manual redirect loop.

use url::Url;

/// Resolves a `Location` header value against the current hop URL.
///
/// - `http://` / `https://` values are used as-is;
/// - `//host/path` takes the current scheme;
/// - `/path` is root-relative to the current authority;
/// - anything else is relative to the current path's directory.
#[must_use]
pub fn next_location(current: &Url, location: &str) -> String {
    let location = location.trim();
    if is_absolute_http(location) {
        return location.to_string();
    }

    let scheme = current.scheme();
    if location.starts_with("//") {
        return format!("{scheme}:{location}");
    }

    let mut authority = format!("{scheme}://{}", current.host_str().unwrap_or_default());
    if let Some(port) = current.port() {
        authority.push(':');
        authority.push_str(&port.to_string());
    }

    if location.starts_with('/') {
        return format!("{authority}{location}");
    }

    let path = current.path();
    let directory = path.rfind('/').map_or("/", |idx| &path[..=idx]);
    format!("{authority}{directory}{location}")
}

fn is_absolute_http(location: &str) -> bool {
    let lower = location.get(..8).unwrap_or(location).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
