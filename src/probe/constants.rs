//! Thresholds, suffix lists and fixed strings used by the probe engine.

use std::time::Duration;

/// Bodies longer than this many bytes are truncated inline and cached in full.
pub const INLINE_BODY_LIMIT: usize = 2000;

/// Declared or actual body size above which a response counts as oversized (2 MiB).
pub const OVERSIZED_BODY_BYTES: u64 = 2 * 1024 * 1024;

/// A 504 answered faster than this is reported as a fast origin rejection.
pub const FAST_504_THRESHOLD: Duration = Duration::from_secs(2);

/// Marker an upstream gateway embeds in its 502 page when SOCKS5 auth fails.
pub const SOCKS5_AUTH_FAILED_MARKER: &str = "SOCKS5 authentication failed";

/// Appended to a truncated body when the full body was cached for download.
pub const TRUNCATION_NOTICE: &str = "\n\n... (response body exceeds 2000 characters, showing the first 2000; download the file to see the rest) ...";

/// Appended to a truncated body when caching the full body failed.
pub const TRUNCATION_NOTICE_NO_DOWNLOAD: &str =
    "\n\n... (response body exceeds 2000 characters, showing the first 2000; full body unavailable) ...";

/// URL suffixes probed with HEAD only. The body is never fetched for these.
pub const PROBE_ONLY_SUFFIXES: &[&str] = &[
    ".flv", ".mp4", ".ts", ".avi", ".mkv", ".mov", ".wmv", ".webm",
];

/// URL suffixes treated as media when classifying a finished response.
pub const MEDIA_SUFFIXES: &[&str] = &[
    ".flv", ".mp4", ".m4v", ".mov", ".avi", ".wmv", ".mkv", ".webm", ".ts", ".mts", ".m2ts",
    ".3gp", ".3g2", ".f4v", ".vob", ".ogv", ".divx", ".mp3", ".wav", ".ogg", ".flac", ".aac",
    ".m4a", ".wma", ".mpd",
];

/// URL suffixes that identify an M3U/M3U8 playlist.
pub const PLAYLIST_SUFFIXES: &[&str] = &[".m3u8", ".m3u"];

/// Content types that identify an M3U/M3U8 playlist.
pub const PLAYLIST_CONTENT_TYPES: &[&str] = &[
    "application/x-mpegurl",
    "application/vnd.apple.mpegurl",
    "audio/x-mpegurl",
];

/// First line of every extended M3U playlist.
pub const PLAYLIST_MARKER: &str = "#EXTM3U";

/// User-Agent sent when the caller does not supply one (diagnostics profile).
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// User-Agent sent by the batch scan profile, matching common IPTV players.
pub const SCAN_USER_AGENT: &str = "Okhttp/3.15";
