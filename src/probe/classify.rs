//! Failure taxonomy and the rules mapping transport outcomes onto it.
//!
//! Rules are evaluated in order and the first match wins. Two checks run
//! after the transport rules and can override them: a 502 carrying the
//! SOCKS5 authentication marker, and a 504 that came back suspiciously fast.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::constants::{FAST_504_THRESHOLD, SOCKS5_AUTH_FAILED_MARKER};
use super::transport::{Timing, TransportErrorKind, TransportFailure};

/// Maximum characters of a stripped error page used as detail text.
const DETAIL_PREVIEW_CHARS: usize = 200;

#[allow(clippy::expect_used)]
static PARAGRAPH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<p(?:\s[^>]*)?>(.*?)</p>").expect("paragraph regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex is valid")); // Static pattern, safe to panic

/// Exhaustive failure taxonomy reported in `error_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTaxonomy {
    /// Malformed URL, rejected before any network call.
    UrlInvalid,
    ProxyTimeout,
    ProxyAuthFailed,
    UrlTimeout,
    /// Body exceeded a scan-mode size cap.
    CallbackAborted,
    /// Origin answered 504 faster than a real timeout could.
    ServerFast504,
    GeneralError,
}

impl ErrorTaxonomy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UrlInvalid => "url_invalid",
            Self::ProxyTimeout => "proxy_timeout",
            Self::ProxyAuthFailed => "proxy_auth_failed",
            Self::UrlTimeout => "url_timeout",
            Self::CallbackAborted => "callback_aborted",
            Self::ServerFast504 => "server_fast_504",
            Self::GeneralError => "general_error",
        }
    }

    /// Returns true if re-running the probe could plausibly succeed.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::ProxyTimeout | Self::UrlTimeout | Self::ServerFast504 | Self::GeneralError
        )
    }
}

impl fmt::Display for ErrorTaxonomy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to [`classify`] for one hop.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierInput<'a> {
    pub failure: Option<&'a TransportFailure>,
    /// Proxy address, `None` or empty for direct connections.
    pub proxy: Option<&'a str>,
    pub timing: Timing,
    pub timeout: Duration,
    /// HTTP status, 0 when none arrived.
    pub status: u16,
    pub body: &'a [u8],
}

impl ClassifierInput<'_> {
    fn proxy_address(&self) -> Option<&str> {
        self.proxy.filter(|p| !p.is_empty())
    }
}

/// Result of classifying one hop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub taxonomy: Option<ErrorTaxonomy>,
    pub proxy_error: bool,
    pub proxy_auth_failed: bool,
    pub detail: Option<String>,
}

impl Classification {
    fn tagged(taxonomy: ErrorTaxonomy, proxy_error: bool, detail: String) -> Self {
        Self {
            taxonomy: Some(taxonomy),
            proxy_error,
            proxy_auth_failed: false,
            detail: Some(detail),
        }
    }

    /// True when nothing went wrong on this hop.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.taxonomy.is_none()
    }
}

/// Classifies one hop.
#[must_use]
pub fn classify(input: &ClassifierInput<'_>) -> Classification {
    let mut result = input
        .failure
        .map(|failure| classify_failure(input, failure))
        .unwrap_or_default();

    if input.status == 502 && contains_marker(input.body) {
        let detail = extract_error_detail(input.body);
        return Classification {
            taxonomy: Some(ErrorTaxonomy::ProxyAuthFailed),
            proxy_error: true,
            proxy_auth_failed: true,
            detail: Some(format!("SOCKS5 proxy authentication failed: {detail}")),
        };
    }

    if result.taxonomy.is_none() && input.status == 504 && input.timing.total < FAST_504_THRESHOLD {
        result = Classification::tagged(
            ErrorTaxonomy::ServerFast504,
            false,
            format!(
                "origin returned 504 after {:.2}s; the server rejected the request rather than timing out",
                input.timing.total.as_secs_f64()
            ),
        );
    }

    result
}

fn classify_failure(input: &ClassifierInput<'_>, failure: &TransportFailure) -> Classification {
    let proxy = input.proxy_address();
    let timeout_secs = input.timeout.as_secs();
    let message = &failure.message;

    let proxy_or_target = |proxy_detail: String, target_detail: String| match proxy {
        Some(_) => Classification::tagged(ErrorTaxonomy::ProxyTimeout, true, proxy_detail),
        None => Classification::tagged(ErrorTaxonomy::UrlTimeout, false, target_detail),
    };

    match failure.kind {
        TransportErrorKind::CouldNotConnect | TransportErrorKind::CouldNotResolveProxy => proxy_or_target(
            format!(
                "could not connect to SOCKS5 proxy {}: {message}",
                proxy.unwrap_or_default()
            ),
            format!("could not connect to target server: {message}"),
        ),
        TransportErrorKind::OperationTimedOut => {
            let timing = input.timing;
            if let Some(proxy) = proxy
                && !timing.connect.is_zero()
                && timing.pretransfer.is_zero()
            {
                Classification::tagged(
                    ErrorTaxonomy::ProxyTimeout,
                    true,
                    format!(
                        "SOCKS5 proxy {proxy} accepted the connection but the upstream did not answer within {timeout_secs}s"
                    ),
                )
            } else if input.status == 0 && timing.total >= input.timeout {
                proxy_or_target(
                    format!(
                        "request through SOCKS5 proxy {} timed out after {timeout_secs}s",
                        proxy.unwrap_or_default()
                    ),
                    format!("target server did not respond within {timeout_secs}s"),
                )
            } else {
                Classification::tagged(
                    ErrorTaxonomy::UrlTimeout,
                    false,
                    format!("request timed out: {message}"),
                )
            }
        }
        TransportErrorKind::GotNothing => proxy_or_target(
            format!(
                "SOCKS5 proxy {} closed the connection without a response",
                proxy.unwrap_or_default()
            ),
            "server closed the connection without a response".to_string(),
        ),
        TransportErrorKind::AbortedByCallback => Classification::tagged(
            ErrorTaxonomy::CallbackAborted,
            false,
            format!("transfer stopped: {message}"),
        ),
        TransportErrorKind::CouldNotResolveHost | TransportErrorKind::Other => {
            let lower = message.to_ascii_lowercase();
            if proxy.is_some() && (lower.contains("proxy") || lower.contains("socks")) {
                Classification::tagged(
                    ErrorTaxonomy::ProxyTimeout,
                    true,
                    format!("SOCKS5 proxy error: {message}"),
                )
            } else {
                Classification::tagged(
                    ErrorTaxonomy::GeneralError,
                    false,
                    format!("request failed: {message}"),
                )
            }
        }
    }
}

fn contains_marker(body: &[u8]) -> bool {
    let marker = SOCKS5_AUTH_FAILED_MARKER.as_bytes();
    body.windows(marker.len()).any(|window| window == marker)
}

/// Extracts a readable detail from an HTML error page.
///
/// Uses the first `<p>` element when present, otherwise the tag-stripped
/// body cut to 200 characters.
#[must_use]
pub fn extract_error_detail(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if let Some(captures) = PARAGRAPH_PATTERN.captures(&text)
        && let Some(inner) = captures.get(1)
    {
        let inner = TAG_PATTERN.replace_all(inner.as_str(), "");
        let inner = decode_entities(inner.trim());
        if !inner.is_empty() {
            return inner;
        }
    }

    let stripped = TAG_PATTERN.replace_all(&text, "");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > DETAIL_PREVIEW_CHARS {
        let preview: String = collapsed.chars().take(DETAIL_PREVIEW_CHARS).collect();
        format!("{preview}...")
    } else {
        collapsed
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn failure(kind: TransportErrorKind) -> TransportFailure {
        TransportFailure::new(kind, "boom")
    }

    fn input<'a>(failure: Option<&'a TransportFailure>, proxy: Option<&'a str>) -> ClassifierInput<'a> {
        ClassifierInput {
            failure,
            proxy,
            timing: Timing::default(),
            timeout: Duration::from_secs(10),
            status: 0,
            body: b"",
        }
    }

    #[test]
    fn test_could_not_connect_depends_on_proxy_presence() {
        let f = failure(TransportErrorKind::CouldNotConnect);
        let proxied = classify(&input(Some(&f), Some("10.0.0.1:1080")));
        assert_eq!(proxied.taxonomy, Some(ErrorTaxonomy::ProxyTimeout));
        assert!(proxied.proxy_error);

        let direct = classify(&input(Some(&f), None));
        assert_eq!(direct.taxonomy, Some(ErrorTaxonomy::UrlTimeout));
        assert!(!direct.proxy_error);

        let empty_proxy = classify(&input(Some(&f), Some("")));
        assert_eq!(empty_proxy.taxonomy, Some(ErrorTaxonomy::UrlTimeout));
    }

    #[test]
    fn test_could_not_resolve_proxy_is_proxy_timeout() {
        let f = failure(TransportErrorKind::CouldNotResolveProxy);
        let result = classify(&input(Some(&f), Some("bad.proxy:1080")));
        assert_eq!(result.taxonomy, Some(ErrorTaxonomy::ProxyTimeout));
        let detail = result.detail.unwrap();
        assert!(detail.contains("bad.proxy:1080"), "Expected proxy in: {detail}");
    }

    #[test]
    fn test_timeout_after_proxy_connect_is_proxy_timeout() {
        let f = failure(TransportErrorKind::OperationTimedOut);
        let mut i = input(Some(&f), Some("10.0.0.1:1080"));
        i.timing = Timing {
            connect: Duration::from_millis(300),
            pretransfer: Duration::ZERO,
            total: Duration::from_secs(4),
        };
        assert_eq!(classify(&i).taxonomy, Some(ErrorTaxonomy::ProxyTimeout));
    }

    #[test]
    fn test_timeout_at_deadline_without_status() {
        let f = failure(TransportErrorKind::OperationTimedOut);
        let mut i = input(Some(&f), None);
        i.timing.total = Duration::from_secs(10);
        assert_eq!(classify(&i).taxonomy, Some(ErrorTaxonomy::UrlTimeout));
    }

    #[test]
    fn test_body_timeout_after_headers_is_url_timeout() {
        let f = failure(TransportErrorKind::OperationTimedOut);
        let mut i = input(Some(&f), Some("10.0.0.1:1080"));
        i.status = 200;
        i.timing = Timing {
            connect: Duration::from_millis(100),
            pretransfer: Duration::from_millis(100),
            total: Duration::from_secs(10),
        };
        let result = classify(&i);
        assert_eq!(result.taxonomy, Some(ErrorTaxonomy::UrlTimeout));
        assert!(!result.proxy_error);
    }

    #[test]
    fn test_got_nothing_and_callback_abort() {
        let f = failure(TransportErrorKind::GotNothing);
        assert_eq!(
            classify(&input(Some(&f), Some("p:1"))).taxonomy,
            Some(ErrorTaxonomy::ProxyTimeout)
        );

        let f = failure(TransportErrorKind::AbortedByCallback);
        let result = classify(&input(Some(&f), Some("p:1")));
        assert_eq!(result.taxonomy, Some(ErrorTaxonomy::CallbackAborted));
        assert!(!result.proxy_error);
    }

    #[test]
    fn test_other_error_upgrades_on_proxy_wording() {
        let f = TransportFailure::new(TransportErrorKind::Other, "socks connect error: general failure");
        assert_eq!(
            classify(&input(Some(&f), Some("p:1"))).taxonomy,
            Some(ErrorTaxonomy::ProxyTimeout)
        );
        assert_eq!(
            classify(&input(Some(&f), None)).taxonomy,
            Some(ErrorTaxonomy::GeneralError)
        );
    }

    #[test]
    fn test_auth_marker_overrides_transport_rule() {
        let f = failure(TransportErrorKind::Other);
        let mut i = input(Some(&f), None);
        i.status = 502;
        i.body = b"<html><body><h1>502</h1><p>SOCKS5 authentication failed for user bob</p></body></html>";
        let result = classify(&i);
        assert_eq!(result.taxonomy, Some(ErrorTaxonomy::ProxyAuthFailed));
        assert!(result.proxy_error);
        assert!(result.proxy_auth_failed);
        let detail = result.detail.unwrap();
        assert!(detail.ends_with("SOCKS5 authentication failed for user bob"), "Unexpected detail: {detail}");
    }

    #[test]
    fn test_fast_504_is_tagged_only_when_fast() {
        let mut i = input(None, None);
        i.status = 504;
        i.timing.total = Duration::from_millis(400);
        assert_eq!(classify(&i).taxonomy, Some(ErrorTaxonomy::ServerFast504));

        i.timing.total = Duration::from_secs(3);
        assert!(classify(&i).is_clean());
    }

    #[test]
    fn test_clean_response_has_no_tag() {
        let mut i = input(None, Some("p:1"));
        i.status = 200;
        let result = classify(&i);
        assert!(result.is_clean());
        assert!(!result.proxy_error);
    }

    #[test]
    fn test_extract_error_detail_falls_back_to_stripped_preview() {
        let body = format!("<html><b>{}</b></html>", "x".repeat(300));
        let detail = extract_error_detail(body.as_bytes());
        assert_eq!(detail.len(), 203);
        assert!(detail.ends_with("..."));

        assert_eq!(extract_error_detail(b"<h1>Bad &amp; gateway</h1>"), "Bad &amp; gateway");
        assert_eq!(extract_error_detail(b"<p>a &amp; b</p>"), "a & b");
    }
}
