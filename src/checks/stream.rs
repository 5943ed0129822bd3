use serde::Serialize;
use tracing::instrument;

use super::millis;
use crate::playlist::{self, PlaylistSummary};
use crate::probe::response::content_type;
use crate::probe::{
    ErrorTaxonomy, PLAYLIST_CONTENT_TYPES, PLAYLIST_MARKER, ProbeEngine, ProbeProfile, RedirectHop,
    RequestSpec, ResponseHeaders,
};

/// Extra MIME types that servers commonly send with playlists.
const LOOSE_PLAYLIST_CONTENT_TYPES: &[&str] = &["application/mpegurl", "application/octet-stream"];

/// How far into the body the playlist marker is searched for.
const MARKER_WINDOW: usize = 100;

/// Result of a stream check.
#[derive(Debug, Clone, Serialize)]
pub struct StreamCheckReport {
    pub success: bool,
    pub url: String,
    pub final_url: String,
    pub proxy: Option<String>,
    /// Milliseconds.
    pub response_time: u64,
    pub status_code: u16,
    pub headers: ResponseHeaders,
    pub body: String,
    pub size: u64,
    pub test_type: &'static str,
    pub proxy_used: bool,
    pub status: &'static str,
    pub is_m3u8: bool,
    pub is_valid_m3u8: bool,
    pub content_type: String,
    pub redirect_count: u32,
    pub redirects: Vec<RedirectHop>,
    pub details: String,
    pub dns_resolved: bool,
    pub resolved_ip: Option<String>,
    pub playlist: Option<PlaylistSummary>,
    pub error: Option<String>,
    pub error_type: Option<ErrorTaxonomy>,
}

/// True when the URL, MIME type or opening bytes indicate an M3U playlist.
#[must_use]
pub fn looks_like_m3u8(url: &str, content_type: &str, body: &str) -> bool {
    let url = url.to_lowercase();
    if url.contains(".m3u8") || url.contains(".m3u") {
        return true;
    }
    if PLAYLIST_CONTENT_TYPES.contains(&content_type)
        || LOOSE_PLAYLIST_CONTENT_TYPES.contains(&content_type)
    {
        return true;
    }
    let head: String = body.trim().chars().take(MARKER_WINDOW).collect();
    head.contains(PLAYLIST_MARKER)
}

/// Follows `spec` to its final response and validates it as a playlist.
///
/// The engine's collaborators are reused with the stream-check profile.
/// With `check_m3u8`, playlist responses over the cap abort the transfer.
#[instrument(skip(engine, spec), fields(url = %spec.url()))]
pub async fn check_stream(
    engine: &ProbeEngine,
    spec: &RequestSpec,
    check_m3u8: bool,
) -> StreamCheckReport {
    let engine = engine.with_profile(ProbeProfile::stream_check(check_m3u8));
    let report = engine.execute(spec).await;

    let mut result = StreamCheckReport {
        success: false,
        url: report.original_url.clone(),
        final_url: report.final_url.clone(),
        proxy: spec.proxy().map(|p| p.address().to_string()),
        response_time: millis(report.elapsed),
        status_code: report.status(),
        headers: report.headers().clone(),
        body: String::new(),
        size: 0,
        test_type: "stream_test",
        proxy_used: report.proxy_used,
        status: "failed",
        is_m3u8: false,
        is_valid_m3u8: false,
        content_type: content_type(report.headers()),
        redirect_count: report.redirect_count,
        redirects: report.hops.clone(),
        details: String::new(),
        dns_resolved: report.dns_resolved,
        resolved_ip: report.resolved_ip.map(|ip| ip.to_string()),
        playlist: None,
        error: None,
        error_type: None,
    };

    if let Some(failure) = report.failure() {
        result.details = format!("stream request failed: {}", failure.detail);
        result.error = Some(failure.detail.clone());
        result.error_type = Some(failure.taxonomy);
        return result;
    }

    let body = report.body_text().to_string();
    result.size = report.success().map_or(0, |s| s.size);
    result.success = matches!(result.status_code, 200 | 206);
    result.status = if result.success { "success" } else { "failed" };
    result.is_m3u8 = looks_like_m3u8(&result.final_url, &result.content_type, &body)
        || looks_like_m3u8(&result.url, "", "");
    if result.is_m3u8 {
        result.is_valid_m3u8 = playlist::validate(&body);
        if result.is_valid_m3u8 {
            result.playlist = Some(playlist::analyze(&body));
        }
    }

    result.details = match (result.success, result.is_m3u8, result.is_valid_m3u8) {
        (false, _, _) => format!("stream returned HTTP {}", result.status_code),
        (true, true, true) => "valid M3U8 playlist".to_string(),
        (true, true, false) => "response looks like M3U8 but is not a valid playlist".to_string(),
        (true, false, _) => "stream reachable; response is not an M3U8 playlist".to_string(),
    };
    result.body = body;
    result
}
