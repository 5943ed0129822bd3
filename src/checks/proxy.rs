use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use super::millis;
use crate::geo::IpLocator;
use crate::probe::{
    ErrorTaxonomy, ProbeEngine, ProbeProfile, ProxyDescriptor, RequestSpec, ResponseHeaders,
    TransportErrorKind,
};

/// IP-echo endpoint fetched through the proxy.
pub const DEFAULT_ECHO_URL: &str = "http://httpbin.org/ip";

/// Result of a proxy check.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyCheckReport {
    pub success: bool,
    pub proxy: String,
    /// Milliseconds.
    pub response_time: u64,
    pub status_code: u16,
    pub headers: ResponseHeaders,
    pub body: String,
    pub size: u64,
    pub is_anonymous: bool,
    pub real_ip: Option<String>,
    pub ip_location: String,
    pub real_ip_location: Option<String>,
    pub test_type: &'static str,
    pub proxy_used: bool,
    pub status: &'static str,
    pub details: Option<String>,
    pub error: Option<String>,
    pub error_type: Option<ErrorTaxonomy>,
    pub proxy_error: bool,
    pub transport_error_code: Option<&'static str>,
    pub transport_error_message: Option<String>,
}

/// Checks a SOCKS5 proxy by fetching an IP-echo endpoint through it.
#[derive(Clone)]
pub struct ProxyChecker {
    engine: ProbeEngine,
    locator: Arc<dyn IpLocator>,
    echo_url: String,
}

impl std::fmt::Debug for ProxyChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyChecker")
            .field("echo_url", &self.echo_url)
            .finish_non_exhaustive()
    }
}

impl ProxyChecker {
    /// Creates a checker. The engine's collaborators are reused with the
    /// proxy-check profile.
    #[must_use]
    pub fn new(engine: &ProbeEngine, locator: Arc<dyn IpLocator>) -> Self {
        Self {
            engine: engine.with_profile(ProbeProfile::proxy_check()),
            locator,
            echo_url: DEFAULT_ECHO_URL.to_string(),
        }
    }

    /// Overrides the IP-echo endpoint.
    #[must_use]
    pub fn with_echo_url(mut self, url: impl Into<String>) -> Self {
        self.echo_url = url.into();
        self
    }

    /// Runs the check.
    ///
    /// With `test_anonymity`, the echoed `origin` is compared against the
    /// proxy host and located.
    #[instrument(skip(self), fields(proxy = %proxy.address()))]
    pub async fn check(
        &self,
        proxy: &ProxyDescriptor,
        timeout_secs: Option<i64>,
        test_anonymity: bool,
    ) -> ProxyCheckReport {
        let mut builder = RequestSpec::builder(&self.echo_url)
            .proxy(Some(proxy.clone()))
            .follow_redirects(false);
        if let Some(secs) = timeout_secs {
            builder = builder.timeout_secs(secs);
        }
        let spec = builder.build(self.engine.profile());

        let proxy_ip = self.proxy_ip(proxy).await;
        let ip_location = match &proxy_ip {
            Some(ip) => self.locator.locate(&ip.to_string()).await.display(),
            None => "unknown".to_string(),
        };

        let report = self.engine.execute(&spec).await;
        let mut result = ProxyCheckReport {
            success: false,
            proxy: proxy.address().to_string(),
            response_time: millis(report.elapsed),
            status_code: report.status(),
            headers: report.headers().clone(),
            body: String::new(),
            size: 0,
            is_anonymous: false,
            real_ip: None,
            ip_location,
            real_ip_location: None,
            test_type: "proxy_connectivity",
            proxy_used: true,
            status: "failed",
            details: None,
            error: None,
            error_type: None,
            proxy_error: false,
            transport_error_code: None,
            transport_error_message: None,
        };

        if let Some(failure) = report.failure() {
            let message = match failure.transport.as_ref().map(|t| t.kind) {
                Some(TransportErrorKind::CouldNotConnect | TransportErrorKind::CouldNotResolveProxy) => {
                    "could not connect to SOCKS5 proxy".to_string()
                }
                Some(TransportErrorKind::OperationTimedOut) => "proxy connection timed out".to_string(),
                _ => format!("proxy connection failed: {}", failure.detail),
            };
            result.error = Some(message);
            result.error_type = Some(failure.taxonomy);
            result.proxy_error = true;
            result.transport_error_code = failure.transport.as_ref().map(|t| t.kind.code());
            result.transport_error_message = failure.transport.as_ref().map(|t| t.message.clone());
            return result;
        }

        let body = report.body_text().to_string();
        result.success = true;
        result.status = "success";
        result.size = u64::try_from(body.len()).unwrap_or(u64::MAX);
        result.is_anonymous = true;

        if test_anonymity && let Some(origin) = echoed_origin(&body) {
            result.is_anonymous = proxy_ip.is_none_or(|ip| ip.to_string() != origin)
                && origin != proxy.host();
            result.real_ip_location = Some(self.locator.locate(&origin).await.display());
            result.real_ip = Some(origin);
        }
        debug!(anonymous = result.is_anonymous, "Proxy check succeeded");

        let suffix = match (test_anonymity, result.is_anonymous) {
            (false, _) => "",
            (true, true) => " (anonymous proxy)",
            (true, false) => " (proxy may not be anonymous)",
        };
        result.details = Some(format!("proxy connectivity check succeeded{suffix}"));
        result.body = body;
        result
    }

    async fn proxy_ip(&self, proxy: &ProxyDescriptor) -> Option<IpAddr> {
        let host = proxy.host();
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(ip);
        }
        tokio::net::lookup_host((host, 0))
            .await
            .ok()?
            .map(|addr| addr.ip())
            .find(IpAddr::is_ipv4)
    }
}

/// Extracts the first address from an IP-echo body such as `{"origin": "1.2.3.4"}`.
///
/// Some echo services report `"a, b"` when forwarding headers are present.
fn echoed_origin(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let origin = value.get("origin")?.as_str()?;
    let first = origin.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}
