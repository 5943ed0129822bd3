//! M3U/M3U8 playlist validation and summary.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

#[allow(clippy::expect_used)]
static EXTINF_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#EXTINF:\s*([\d.]+)").expect("EXTINF regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static BANDWIDTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"BANDWIDTH=(\d+)").expect("BANDWIDTH regex is valid") // Static pattern, safe to panic
});

/// Segment URI suffixes counted by [`analyze`].
const SEGMENT_MARKERS: &[&str] = &[".ts", ".m4s", ".mp4"];

/// Returns true if `body` is a usable extended M3U playlist.
///
/// The first non-blank line must start with `#EXTM3U` and at least one line
/// must be a media entry (`#EXTINF:`) or a variant entry (`#EXT-X-STREAM-INF`).
#[must_use]
pub fn validate(body: &str) -> bool {
    let mut lines = body.trim().lines().map(str::trim);
    if !lines.next().is_some_and(|first| first.starts_with("#EXTM3U")) {
        return false;
    }
    body.lines().map(str::trim).any(|line| {
        line.starts_with("#EXTINF:") || line.starts_with("#EXT-X-STREAM-INF")
    })
}

/// Summary statistics of a playlist.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaylistSummary {
    pub total_lines: usize,
    pub extinf_count: usize,
    pub segment_count: usize,
    /// Sum of `#EXTINF` durations in seconds.
    pub total_duration: f64,
    /// Mean `#EXTINF` duration rounded to two decimals.
    pub average_duration: f64,
    pub has_endlist: bool,
    /// Master playlist (has `#EXT-X-STREAM-INF` variants).
    pub is_master: bool,
    pub max_bandwidth: u64,
    pub max_bandwidth_label: String,
}

/// Computes a [`PlaylistSummary`] for `body`.
#[must_use]
pub fn analyze(body: &str) -> PlaylistSummary {
    let trimmed = body.trim();
    let mut summary = PlaylistSummary {
        total_lines: trimmed.split('\n').count(),
        ..PlaylistSummary::default()
    };

    for line in trimmed.lines().map(str::trim) {
        if line.starts_with("#EXTINF:") {
            summary.extinf_count += 1;
            if let Some(duration) = EXTINF_DURATION
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok())
            {
                summary.total_duration += duration;
            }
        } else if line.starts_with("#EXT-X-ENDLIST") {
            summary.has_endlist = true;
        } else if line.starts_with("#EXT-X-STREAM-INF") {
            summary.is_master = true;
            if let Some(bandwidth) = BANDWIDTH
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok())
            {
                summary.max_bandwidth = summary.max_bandwidth.max(bandwidth);
            }
        } else if !line.starts_with('#') && SEGMENT_MARKERS.iter().any(|m| line.contains(m)) {
            summary.segment_count += 1;
        }
    }

    if summary.extinf_count > 0 {
        #[allow(clippy::cast_precision_loss)]
        let mean = summary.total_duration / summary.extinf_count as f64;
        summary.average_duration = (mean * 100.0).round() / 100.0;
    }
    summary.max_bandwidth_label = bandwidth_label(summary.max_bandwidth);
    summary
}

#[allow(clippy::cast_precision_loss)]
fn bandwidth_label(bits_per_sec: u64) -> String {
    match bits_per_sec {
        0 => "unknown".to_string(),
        b if b >= 1_000_000 => format!("{:.2} Mbps", b as f64 / 1_000_000.0),
        b => format!("{:.2} Kbps", b as f64 / 1_000.0),
    }
}
