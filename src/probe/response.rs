//! Classification of the final response body.

use serde::Serialize;
use url::Url;

use super::constants::{
    INLINE_BODY_LIMIT, MEDIA_SUFFIXES, OVERSIZED_BODY_BYTES, PLAYLIST_CONTENT_TYPES,
    PLAYLIST_MARKER, PLAYLIST_SUFFIXES,
};
use super::profile::has_suffix;
use super::transport::ResponseHeaders;

/// Why a body was not returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Media,
    LargeFile,
}

impl FileKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Media => "media",
            Self::LargeFile => "large_file",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Media => "media file",
            Self::LargeFile => "large file",
        }
    }
}

/// Detected traits of a final response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseTraits {
    pub is_media: bool,
    pub is_playlist: bool,
    pub is_oversized: bool,
}

/// What to do with the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyDecision {
    /// Drop the body and report a summary instead.
    Skip(FileKind),
    /// Return the whole playlist inline, caching it when over the inline limit.
    KeepWhole { cache: bool },
    /// Return the first [`INLINE_BODY_LIMIT`] bytes and cache the full body.
    Truncate,
    /// Return the body as-is.
    Inline,
}

/// Inspects a final response.
#[must_use]
pub fn inspect(
    original_url: &Url,
    final_url: &Url,
    headers: &ResponseHeaders,
    body: &[u8],
    body_limited: bool,
) -> ResponseTraits {
    let content_type = content_type(headers);
    let is_playlist = has_suffix(final_url, PLAYLIST_SUFFIXES)
        || has_suffix(original_url, PLAYLIST_SUFFIXES)
        || is_playlist_content_type(&content_type)
        || starts_with_playlist_marker(body);
    let is_media = ((content_type.starts_with("video/") || content_type.starts_with("audio/"))
        && !is_playlist_content_type(&content_type))
        || has_suffix(original_url, MEDIA_SUFFIXES)
        || has_suffix(final_url, MEDIA_SUFFIXES);
    let is_oversized = body_limited
        || match declared_length(headers) {
            Some(length) => length > OVERSIZED_BODY_BYTES,
            None => u64::try_from(body.len()).unwrap_or(u64::MAX) > OVERSIZED_BODY_BYTES,
        };

    ResponseTraits {
        is_media,
        is_playlist,
        is_oversized,
    }
}

/// Decides how the body is returned. Playlists are never skipped.
#[must_use]
pub fn decide(traits: ResponseTraits, body_len: usize) -> BodyDecision {
    if (traits.is_media || traits.is_oversized) && !traits.is_playlist {
        let kind = if traits.is_media {
            FileKind::Media
        } else {
            FileKind::LargeFile
        };
        return BodyDecision::Skip(kind);
    }
    let over_limit = body_len > INLINE_BODY_LIMIT;
    if traits.is_playlist {
        BodyDecision::KeepWhole { cache: over_limit }
    } else if over_limit {
        BodyDecision::Truncate
    } else {
        BodyDecision::Inline
    }
}

/// Lower-cased MIME type without parameters, or empty.
#[must_use]
pub fn content_type(headers: &ResponseHeaders) -> String {
    headers
        .get("content-type")
        .and_then(|value| value.split(';').next())
        .map(|mime| mime.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Declared `Content-Length`, if present and numeric.
#[must_use]
pub fn declared_length(headers: &ResponseHeaders) -> Option<u64> {
    headers
        .get("content-length")
        .and_then(|value| value.trim().parse::<u64>().ok())
}

#[must_use]
pub fn is_playlist_content_type(mime: &str) -> bool {
    PLAYLIST_CONTENT_TYPES.contains(&mime)
}

/// True if the body, ignoring a BOM and leading whitespace, starts with `#EXTM3U`.
#[must_use]
pub fn starts_with_playlist_marker(body: &[u8]) -> bool {
    let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    body[start..].starts_with(PLAYLIST_MARKER.as_bytes())
}

/// Cuts `text` to at most `limit` bytes on a character boundary.
#[must_use]
pub fn truncate_on_char_boundary(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Body size as far as the probe could tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedSize {
    /// Declared by `Content-Length` or read to the end.
    Exact(u64),
    /// Reading stopped at a cap before the body ended.
    AtLeast(u64),
}

impl ObservedSize {
    fn describe(self) -> String {
        match self {
            Self::Exact(bytes) => format_bytes(bytes),
            Self::AtLeast(bytes) => format!("at least {}", format_bytes(bytes)),
        }
    }
}

/// Human-readable replacement for a skipped body.
#[must_use]
pub fn skipped_summary(
    kind: FileKind,
    content_type: &str,
    size: ObservedSize,
    final_url: &str,
) -> String {
    let content_type = if content_type.is_empty() {
        "unknown"
    } else {
        content_type
    };
    let reason = match kind {
        FileKind::Media => "streaming media is not downloaded during a probe",
        FileKind::LargeFile => "the body exceeds the 2 MB display limit",
    };
    format!(
        "[{}]\nContent-Type: {content_type}\nSize: {}\nFinal URL: {final_url}\n\nBody not shown: {reason}.",
        kind.describe(),
        size.describe()
    )
}

/// Formats a byte count with binary units and two decimals.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn headers(pairs: &[(&str, &str)]) -> ResponseHeaders {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_video_content_type_is_media() {
        let u = url("http://a.example/watch");
        let traits = inspect(&u, &u, &headers(&[("content-type", "video/mp4")]), b"tiny", false);
        assert!(traits.is_media);
        assert!(!traits.is_playlist);
        assert_eq!(decide(traits, 4), BodyDecision::Skip(FileKind::Media));
    }

    #[test]
    fn test_playlist_mime_is_not_media() {
        let u = url("http://a.example/live");
        let traits = inspect(
            &u,
            &u,
            &headers(&[("content-type", "audio/x-mpegurl")]),
            b"#EXTM3U\n",
            false,
        );
        assert!(!traits.is_media);
        assert!(traits.is_playlist);
    }

    #[test]
    fn test_playlist_wins_over_media_suffix_and_size() {
        let u = url("http://a.example/live.ts");
        let traits = ResponseTraits {
            is_media: true,
            is_playlist: true,
            is_oversized: true,
        };
        assert_eq!(decide(traits, 50_000), BodyDecision::KeepWhole { cache: true });
        assert!(inspect(&u, &u, &ResponseHeaders::new(), b"\xEF\xBB\xBF  #EXTM3U\n", false).is_playlist);
    }

    #[test]
    fn test_oversize_uses_declared_length_first() {
        let u = url("http://a.example/data.json");
        let declared = headers(&[("content-length", "3000000")]);
        assert!(inspect(&u, &u, &declared, b"{}", false).is_oversized);

        let small = headers(&[("content-length", "10")]);
        assert!(!inspect(&u, &u, &small, &vec![b'a'; 3_000_000], false).is_oversized);

        let undeclared = ResponseHeaders::new();
        assert!(inspect(&u, &u, &undeclared, &vec![b'a'; 2 * 1024 * 1024 + 1], false).is_oversized);
        assert!(inspect(&u, &u, &undeclared, b"x", true).is_oversized);
    }

    #[test]
    fn test_inline_threshold_is_inclusive() {
        let traits = ResponseTraits::default();
        assert_eq!(decide(traits, INLINE_BODY_LIMIT), BodyDecision::Inline);
        assert_eq!(decide(traits, INLINE_BODY_LIMIT + 1), BodyDecision::Truncate);
        let playlist = ResponseTraits {
            is_playlist: true,
            ..ResponseTraits::default()
        };
        assert_eq!(decide(playlist, INLINE_BODY_LIMIT), BodyDecision::KeepWhole { cache: false });
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_on_char_boundary("abcdef", 3), "abc");
        assert_eq!(truncate_on_char_boundary("ab", 3), "ab");
        assert_eq!(truncate_on_char_boundary("aé", 2), "a");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_skipped_summary_mentions_type_and_url() {
        let summary = skipped_summary(
            FileKind::Media,
            "video/mp4",
            ObservedSize::Exact(2048),
            "http://a.example/v.mp4",
        );
        assert!(summary.contains("media file"), "Expected kind in: {summary}");
        assert!(summary.contains("video/mp4"), "Expected content type in: {summary}");
        assert!(summary.contains("2.00 KB"), "Expected size in: {summary}");
        assert!(summary.contains("http://a.example/v.mp4"), "Expected URL in: {summary}");
    }

    #[test]
    fn test_skipped_summary_marks_capped_size_as_lower_bound() {
        let summary = skipped_summary(
            FileKind::LargeFile,
            "",
            ObservedSize::AtLeast(OVERSIZED_BODY_BYTES + 1),
            "http://a.example/dump",
        );
        assert!(summary.contains("Size: at least 2.00 MB"), "Expected lower bound in: {summary}");
        assert!(summary.contains("Content-Type: unknown"), "Expected fallback type in: {summary}");
    }
}
