//! Single-hop HTTP transport.
//!
//! One call issues exactly one request, direct or through a SOCKS5 proxy,
//! and reports status, lower-cased headers, body bytes, timing and a
//! transport error kind. Redirects are never followed here.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONNECTION, HOST, HeaderMap};
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy};
use tracing::{debug, instrument};
use url::Url;

use super::profile::has_suffix;
use super::request::{ProbeMethod, ProxyDescriptor, RequestHeaders};
use super::resolver::{ResolvedTarget, TargetSource};

/// Response headers keyed by lower-cased name; the last occurrence wins.
pub type ResponseHeaders = BTreeMap<String, String>;

/// What to do when a body grows past its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitAction {
    /// Keep the first `max_bytes` and finish normally.
    Stop,
    /// Abandon the transfer with [`TransportErrorKind::AbortedByCallback`].
    Abort,
}

/// Upper bound on the number of body bytes read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyLimit {
    pub max_bytes: u64,
    pub on_exceed: LimitAction,
}

/// Timing breakdown of one hop.
///
/// `connect` is zero when the connection was never established; `pretransfer`
/// is zero when no response started arriving.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timing {
    pub connect: Duration,
    pub pretransfer: Duration,
    pub total: Duration,
}

/// Low-level transport failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    CouldNotConnect,
    CouldNotResolveProxy,
    CouldNotResolveHost,
    OperationTimedOut,
    GotNothing,
    AbortedByCallback,
    Other,
}

impl TransportErrorKind {
    /// Stable snake_case code used on the wire.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::CouldNotConnect => "could_not_connect",
            Self::CouldNotResolveProxy => "could_not_resolve_proxy",
            Self::CouldNotResolveHost => "could_not_resolve_host",
            Self::OperationTimedOut => "operation_timed_out",
            Self::GotNothing => "got_nothing",
            Self::AbortedByCallback => "aborted_by_callback",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A failed transport call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportFailure {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Everything observed during one hop.
///
/// `status` is 0 when no response line arrived. `error` is set when the call
/// failed, possibly after headers were received.
#[derive(Debug, Clone, Default)]
pub struct RawOutcome {
    pub status: u16,
    pub headers: ResponseHeaders,
    pub body: Vec<u8>,
    /// The body was cut at a [`LimitAction::Stop`] limit.
    pub body_limited: bool,
    /// Sent as HEAD because the URL looks like streaming media.
    pub probe_only: bool,
    pub timing: Timing,
    pub error: Option<TransportFailure>,
}

impl RawOutcome {
    /// Outcome for a call that failed before any response arrived.
    #[must_use]
    pub fn failed(error: TransportFailure, timing: Timing, probe_only: bool) -> Self {
        Self {
            probe_only,
            timing,
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Input for one hop.
#[derive(Debug, Clone)]
pub struct TransportRequest<'a> {
    /// URL of this hop, carrying the original hostname.
    pub url: &'a Url,
    /// First URL of the chain; checked for probe-only suffixes too.
    pub original_url: &'a Url,
    pub method: ProbeMethod,
    pub headers: &'a RequestHeaders,
    pub user_agent: &'a str,
    pub target: Option<ResolvedTarget>,
    pub proxy: Option<&'a ProxyDescriptor>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub proxy_connect_timeout: Duration,
    pub probe_only_suffixes: &'a [&'a str],
    pub body_limit: Option<BodyLimit>,
}

/// Issues one HTTP request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs the hop. Never fails: errors are reported in [`RawOutcome::error`].
    async fn invoke(&self, request: &TransportRequest<'_>) -> RawOutcome;
}

/// Literal connection parameters derived from a [`TransportRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPlan {
    /// URL actually dialed, with the resolved address substituted when applicable.
    pub url: Url,
    /// `Host` header carrying the original authority after substitution.
    pub host_header: Option<String>,
    /// Hostname pinned to an address at connect time, keeping the URL untouched.
    pub pinned: Option<(String, SocketAddr)>,
    /// `socks5://` when an address is supplied, `socks5h://` otherwise.
    pub proxy_url: Option<String>,
    pub method: ProbeMethod,
    pub probe_only: bool,
}

impl ConnectPlan {
    /// Derives the connect plan for `request`.
    ///
    /// Override targets on direct connections are pinned so TLS still sees the
    /// hostname; every other resolved target is substituted into the URL with
    /// the original authority carried in `Host`.
    #[must_use]
    pub fn for_request(request: &TransportRequest<'_>) -> Self {
        let probe_only = has_suffix(request.original_url, request.probe_only_suffixes)
            || has_suffix(request.url, request.probe_only_suffixes);
        let method = if probe_only {
            ProbeMethod::Head
        } else {
            request.method
        };
        let host = request.url.host_str().unwrap_or_default().to_string();

        let mut url = request.url.clone();
        let mut host_header = None;
        let mut pinned = None;
        match request.target {
            Some(target) if target.source == TargetSource::Override && request.proxy.is_none() => {
                let port = request.url.port_or_known_default().unwrap_or(80);
                pinned = Some((host, SocketAddr::new(target.addr, port)));
            }
            Some(target) => {
                if url.set_ip_host(target.addr).is_ok() {
                    host_header = Some(match request.url.port() {
                        Some(port) => format!("{host}:{port}"),
                        None => host,
                    });
                } else {
                    url = request.url.clone();
                }
            }
            None => {}
        }

        let proxy_url = request
            .proxy
            .map(|proxy| proxy.proxy_url(request.target.is_none()));

        Self {
            url,
            host_header,
            pinned,
            proxy_url,
            method,
            probe_only,
        }
    }

    fn connect_timeout(&self, request: &TransportRequest<'_>) -> Duration {
        let timeout = if self.proxy_url.is_some() {
            request.proxy_connect_timeout
        } else {
            request.connect_timeout
        };
        timeout.min(request.timeout)
    }
}

/// reqwest-backed transport. A fresh client is built per hop because proxy,
/// pinning and timeouts vary from hop to hop.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReqwestTransport;

impl ReqwestTransport {
    fn build_client(plan: &ConnectPlan, request: &TransportRequest<'_>) -> Result<Client, reqwest::Error> {
        let mut builder = Client::builder()
            .user_agent(request.user_agent)
            .redirect(Policy::none())
            .timeout(request.timeout)
            .connect_timeout(plan.connect_timeout(request))
            .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .danger_accept_invalid_certs(true)
            .gzip(true)
            .pool_max_idle_per_host(0);

        builder = match &plan.proxy_url {
            Some(proxy_url) => builder.proxy(Proxy::all(proxy_url.as_str())?),
            None => builder.no_proxy(),
        };
        if let Some((host, addr)) = &plan.pinned {
            builder = builder.resolve(host, *addr);
        }
        builder.build()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self, request), fields(url = %request.url, proxied = request.proxy.is_some()))]
    async fn invoke(&self, request: &TransportRequest<'_>) -> RawOutcome {
        let plan = ConnectPlan::for_request(request);
        let proxied = plan.proxy_url.is_some();
        let started = Instant::now();

        let client = match Self::build_client(&plan, request) {
            Ok(client) => client,
            Err(e) => {
                let failure = TransportFailure::new(TransportErrorKind::Other, error_chain(&e));
                return RawOutcome::failed(failure, Timing::default(), plan.probe_only);
            }
        };

        debug!(
            connect_url = %plan.url,
            method = plan.method.as_str(),
            probe_only = plan.probe_only,
            pinned = plan.pinned.is_some(),
            "Sending request"
        );

        let method = match plan.method {
            ProbeMethod::Get => reqwest::Method::GET,
            ProbeMethod::Head => reqwest::Method::HEAD,
        };
        let mut builder = client
            .request(method, plan.url.clone())
            .header(CONNECTION, "close");
        if let Some(host) = &plan.host_header {
            builder = builder.header(HOST, host.as_str());
        }
        for (name, value) in request.headers.forwardable() {
            builder = builder.header(name, value);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let total = started.elapsed();
                let failure = classify_reqwest_error(&e, proxied);
                debug!(kind = %failure.kind, error = %failure.message, "Transport failed");
                return RawOutcome::failed(failure, failure_timing(&e, total), plan.probe_only);
            }
        };

        let headers_at = started.elapsed();
        let mut outcome = RawOutcome {
            status: response.status().as_u16(),
            headers: collect_headers(response.headers()),
            probe_only: plan.probe_only,
            ..RawOutcome::default()
        };

        if plan.method == ProbeMethod::Get {
            match read_body(response, request.body_limit).await {
                Ok((body, limited)) => {
                    outcome.body = body;
                    outcome.body_limited = limited;
                }
                Err(failure) => {
                    debug!(kind = %failure.kind, error = %failure.message, "Body read failed");
                    outcome.error = Some(failure);
                }
            }
        }

        outcome.timing = Timing {
            connect: headers_at,
            pretransfer: headers_at,
            total: started.elapsed(),
        };
        outcome
    }
}

fn collect_headers(headers: &HeaderMap) -> ResponseHeaders {
    let mut collected = ResponseHeaders::new();
    for (name, value) in headers {
        collected.insert(
            name.as_str().to_ascii_lowercase(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    collected
}

async fn read_body(
    response: reqwest::Response,
    limit: Option<BodyLimit>,
) -> Result<(Vec<u8>, bool), TransportFailure> {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            let kind = if e.is_timeout() {
                TransportErrorKind::OperationTimedOut
            } else {
                TransportErrorKind::Other
            };
            TransportFailure::new(kind, error_chain(&e))
        })?;
        body.extend_from_slice(&chunk);

        if let Some(limit) = limit
            && u64::try_from(body.len()).unwrap_or(u64::MAX) > limit.max_bytes
        {
            match limit.on_exceed {
                LimitAction::Stop => {
                    body.truncate(usize::try_from(limit.max_bytes).unwrap_or(usize::MAX));
                    return Ok((body, true));
                }
                LimitAction::Abort => {
                    return Err(TransportFailure::new(
                        TransportErrorKind::AbortedByCallback,
                        format!("response body exceeded {} bytes", limit.max_bytes),
                    ));
                }
            }
        }
    }
    Ok((body, false))
}

/// Maps a reqwest error onto the transport error kinds.
fn classify_reqwest_error(error: &reqwest::Error, proxied: bool) -> TransportFailure {
    let message = error_chain(error);
    let lower = message.to_ascii_lowercase();
    let kind = if lower.contains("connection closed before message completed")
        || lower.contains("incomplete message")
    {
        TransportErrorKind::GotNothing
    } else if error.is_connect() {
        if looks_like_dns_failure(&lower) {
            if proxied {
                TransportErrorKind::CouldNotResolveProxy
            } else {
                TransportErrorKind::CouldNotResolveHost
            }
        } else {
            TransportErrorKind::CouldNotConnect
        }
    } else if error.is_timeout() {
        TransportErrorKind::OperationTimedOut
    } else {
        TransportErrorKind::Other
    };
    TransportFailure::new(kind, message)
}

fn failure_timing(error: &reqwest::Error, total: Duration) -> Timing {
    if error.is_connect() {
        Timing {
            total,
            ..Timing::default()
        }
    } else if error.is_timeout() {
        Timing {
            connect: total,
            pretransfer: Duration::ZERO,
            total,
        }
    } else {
        Timing {
            connect: total,
            pretransfer: total,
            total,
        }
    }
}

fn looks_like_dns_failure(lower: &str) -> bool {
    ["dns error", "failed to lookup address", "name or service not known", "no such host"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Flattens an error and its sources into one line.
pub(crate) fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
