//! Per-entry-point engine configuration.
//!
//! The diagnostics, scan, proxy-check and stream-check entry points share one
//! engine and differ only in the values held here.

use std::time::Duration;

use url::Url;

use super::constants::{
    DEFAULT_USER_AGENT, OVERSIZED_BODY_BYTES, PLAYLIST_SUFFIXES, PROBE_ONLY_SUFFIXES,
    SCAN_USER_AGENT,
};
use super::transport::{BodyLimit, LimitAction};

/// Inclusive numeric bounds with a default for absent input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: u64,
    pub max: u64,
    pub default: u64,
}

impl Bounds {
    #[must_use]
    pub const fn new(min: u64, max: u64, default: u64) -> Self {
        Self { min, max, default }
    }

    /// Clamps a requested value; `None` yields the default.
    #[must_use]
    pub fn clamp(self, requested: Option<i64>) -> u64 {
        match requested {
            None => self.default,
            Some(value) if value < 0 => self.min,
            Some(value) => u64::try_from(value)
                .unwrap_or(u64::MAX)
                .clamp(self.min, self.max),
        }
    }
}

/// How the final response body is shaped before it reaches the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShaping {
    /// Media / oversize / playlist detection with truncation and caching.
    Classify,
    /// Body returned as fetched, subject only to the playlist cap.
    Raw,
}

/// Size policy for playlist URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaylistCap {
    /// Abort the transfer once the body grows past this many bytes.
    pub abort_above: u64,
    /// Keep at most this many bytes inline.
    pub keep_inline: Option<usize>,
    /// Lower bound applied to the timeout for playlist URLs.
    pub min_timeout: Option<Duration>,
}

/// Engine configuration for one entry point.
#[derive(Debug, Clone)]
pub struct ProbeProfile {
    /// Short label used in logs.
    pub name: &'static str,
    pub timeout_secs: Bounds,
    pub max_redirects: Bounds,
    /// Overrides the caller's follow-redirects flag when set.
    pub force_follow: Option<bool>,
    /// Connect timeout for direct connections, capped at the request timeout.
    pub connect_timeout: Duration,
    /// Connect timeout when dialing the proxy, capped at the request timeout.
    pub proxy_connect_timeout: Duration,
    /// URL suffixes fetched with HEAD only.
    pub probe_only_suffixes: &'static [&'static str],
    pub playlist_cap: Option<PlaylistCap>,
    pub shaping: ResponseShaping,
    /// User-Agent used when the caller sends none.
    pub user_agent: &'static str,
}

impl ProbeProfile {
    /// Full single-URL diagnostics.
    #[must_use]
    pub fn diagnostics() -> Self {
        Self {
            name: "diagnostics",
            timeout_secs: Bounds::new(1, 120, 30),
            max_redirects: Bounds::new(0, 50, 10),
            force_follow: None,
            connect_timeout: Duration::from_secs(16),
            proxy_connect_timeout: Duration::from_secs(10),
            probe_only_suffixes: PROBE_ONLY_SUFFIXES,
            playlist_cap: None,
            shaping: ResponseShaping::Classify,
            user_agent: DEFAULT_USER_AGENT,
        }
    }

    /// Fast batch scanning.
    #[must_use]
    pub fn scan() -> Self {
        Self {
            name: "scan",
            timeout_secs: Bounds::new(1, 30, 5),
            max_redirects: Bounds::new(0, 10, 5),
            force_follow: None,
            connect_timeout: Duration::from_secs(5),
            proxy_connect_timeout: Duration::from_secs(3),
            probe_only_suffixes: &[],
            playlist_cap: Some(PlaylistCap {
                abort_above: 10 * 1024,
                keep_inline: Some(2048),
                min_timeout: Some(Duration::from_secs(10)),
            }),
            shaping: ResponseShaping::Raw,
            user_agent: SCAN_USER_AGENT,
        }
    }

    /// Proxy connectivity and anonymity check against an IP-echo endpoint.
    #[must_use]
    pub fn proxy_check() -> Self {
        Self {
            name: "proxy_check",
            timeout_secs: Bounds::new(1, 30, 5),
            max_redirects: Bounds::new(0, 0, 0),
            force_follow: Some(false),
            connect_timeout: Duration::from_secs(5),
            proxy_connect_timeout: Duration::from_secs(5),
            probe_only_suffixes: &[],
            playlist_cap: None,
            shaping: ResponseShaping::Raw,
            user_agent: DEFAULT_USER_AGENT,
        }
    }

    /// Redirect-following stream validation through a proxy.
    ///
    /// With `cap_playlists`, playlist URLs abort past 50 KiB.
    #[must_use]
    pub fn stream_check(cap_playlists: bool) -> Self {
        Self {
            name: "stream_check",
            timeout_secs: Bounds::new(1, 30, 8),
            max_redirects: Bounds::new(5, 5, 5),
            force_follow: Some(true),
            connect_timeout: Duration::from_secs(5),
            proxy_connect_timeout: Duration::from_secs(5),
            probe_only_suffixes: &[],
            playlist_cap: cap_playlists.then_some(PlaylistCap {
                abort_above: 50 * 1024,
                keep_inline: None,
                min_timeout: None,
            }),
            shaping: ResponseShaping::Raw,
            user_agent: DEFAULT_USER_AGENT,
        }
    }

    /// Returns the playlist cap if `url` names a playlist.
    #[must_use]
    pub fn playlist_cap_for(&self, url: &Url) -> Option<PlaylistCap> {
        self.playlist_cap.filter(|_| has_suffix(url, PLAYLIST_SUFFIXES))
    }

    /// Body read policy for a hop to `url`.
    ///
    /// Classified playlists are read in full; other classified bodies stop
    /// one byte past the oversize threshold.
    #[must_use]
    pub fn body_limit_for(&self, url: &Url) -> Option<BodyLimit> {
        if let Some(cap) = self.playlist_cap_for(url) {
            return Some(BodyLimit {
                max_bytes: cap.abort_above,
                on_exceed: LimitAction::Abort,
            });
        }
        match self.shaping {
            ResponseShaping::Classify if has_suffix(url, PLAYLIST_SUFFIXES) => None,
            ResponseShaping::Classify => Some(BodyLimit {
                max_bytes: OVERSIZED_BODY_BYTES + 1,
                on_exceed: LimitAction::Stop,
            }),
            ResponseShaping::Raw => None,
        }
    }

    /// Effective per-hop timeout for `url`.
    #[must_use]
    pub fn hop_timeout(&self, url: &Url, requested: Duration) -> Duration {
        match self.playlist_cap_for(url).and_then(|cap| cap.min_timeout) {
            Some(floor) => requested.max(floor),
            None => requested,
        }
    }
}

/// Returns true if the URL path ends with one of `suffixes`, ignoring case.
#[must_use]
pub fn has_suffix(url: &Url, suffixes: &[&str]) -> bool {
    let path = url.path().to_ascii_lowercase();
    suffixes.iter().any(|suffix| path.ends_with(suffix))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_clamp() {
        let bounds = Bounds::new(1, 120, 30);
        assert_eq!(bounds.clamp(None), 30);
        assert_eq!(bounds.clamp(Some(0)), 1);
        assert_eq!(bounds.clamp(Some(-5)), 1);
        assert_eq!(bounds.clamp(Some(45)), 45);
        assert_eq!(bounds.clamp(Some(9999)), 120);
    }

    #[test]
    fn test_scan_profile_caps_playlists_only() {
        let profile = ProbeProfile::scan();
        let playlist = Url::parse("http://a.b/live/index.M3U8").unwrap();
        let page = Url::parse("http://a.b/live/index.html").unwrap();

        let limit = profile.body_limit_for(&playlist).unwrap();
        assert_eq!(limit.max_bytes, 10 * 1024);
        assert_eq!(limit.on_exceed, LimitAction::Abort);
        assert!(profile.body_limit_for(&page).is_none());

        assert_eq!(
            profile.hop_timeout(&playlist, Duration::from_secs(5)),
            Duration::from_secs(10)
        );
        assert_eq!(
            profile.hop_timeout(&page, Duration::from_secs(5)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_diagnostics_profile_stops_after_oversize_threshold() {
        let profile = ProbeProfile::diagnostics();
        let url = Url::parse("https://a.b/data.json").unwrap();
        let limit = profile.body_limit_for(&url).unwrap();
        assert_eq!(limit.max_bytes, OVERSIZED_BODY_BYTES + 1);
        assert_eq!(limit.on_exceed, LimitAction::Stop);
    }

    #[test]
    fn test_diagnostics_profile_reads_playlists_in_full() {
        let profile = ProbeProfile::diagnostics();
        let channels = Url::parse("http://a.b/lists/channels.M3U").unwrap();
        let hls = Url::parse("http://a.b/live/index.m3u8?token=1").unwrap();
        assert!(profile.body_limit_for(&channels).is_none());
        assert!(profile.body_limit_for(&hls).is_none());
    }

    #[test]
    fn test_stream_check_profile_always_follows() {
        let profile = ProbeProfile::stream_check(true);
        assert_eq!(profile.force_follow, Some(true));
        assert_eq!(profile.max_redirects.clamp(Some(50)), 5);
        assert!(ProbeProfile::stream_check(false).playlist_cap.is_none());
    }
}
