//! Immutable request description handed to the probe engine.

use std::fmt;
use std::time::Duration;

use super::hosts::HostsOverrideMap;
use super::profile::ProbeProfile;

/// HTTP method used for a probe.
///
/// Only header-style probing is supported: `GET` fetches the body, `HEAD` does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMethod {
    /// Fetch headers and body.
    #[default]
    Get,
    /// Fetch headers only.
    Head,
}

impl ProbeMethod {
    /// Parses a method token case-insensitively. Empty input means `GET`.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.is_empty() || token.eq_ignore_ascii_case("GET") {
            Some(Self::Get)
        } else if token.eq_ignore_ascii_case("HEAD") {
            Some(Self::Head)
        } else {
            None
        }
    }

    /// Returns the method as sent on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
        }
    }
}

/// Caller-supplied request headers with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    entries: Vec<(String, String)>,
}

impl RequestHeaders {
    /// Creates an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a header, replacing any existing value with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            slot.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    /// Looks up a header value by name, ignoring ASCII case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Iterates headers the transport may forward.
    ///
    /// `Host` and `Connection` are owned by the engine and never forwarded.
    pub fn forwardable(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter(|(name, _)| {
                !name.eq_ignore_ascii_case("host") && !name.eq_ignore_ascii_case("connection")
            })
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Returns the number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no headers are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// A single SOCKS5 proxy hop.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyDescriptor {
    address: String,
    credentials: Option<(String, String)>,
}

impl ProxyDescriptor {
    /// Creates a descriptor for `host:port` without credentials.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into().trim().to_string(),
            credentials: None,
        }
    }

    /// Attaches credentials. They are kept only when both parts are non-empty.
    #[must_use]
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = (!username.is_empty() && !password.is_empty())
            .then(|| (username.to_string(), password.to_string()));
        self
    }

    /// Returns the `host:port` address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the host part of the address.
    #[must_use]
    pub fn host(&self) -> &str {
        split_host_port(&self.address).map_or(self.address.as_str(), |(host, _)| host)
    }

    /// Returns true if the address has the `host:port` form with a numeric port.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        split_host_port(&self.address).is_some_and(|(host, _)| !host.is_empty())
    }

    /// Returns `(username, password)` when both were supplied.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(user, pass)| (user.as_str(), pass.as_str()))
    }

    /// Builds the proxy URL for the transport.
    ///
    /// `remote_dns` selects `socks5h://` (the proxy resolves the target name)
    /// instead of `socks5://` (the caller supplies an address).
    #[must_use]
    pub fn proxy_url(&self, remote_dns: bool) -> String {
        let scheme = if remote_dns { "socks5h" } else { "socks5" };
        match self.credentials() {
            Some((user, pass)) => format!(
                "{scheme}://{}:{}@{}",
                urlencoding::encode(user),
                urlencoding::encode(pass),
                self.address
            ),
            None => format!("{scheme}://{}", self.address),
        }
    }
}

impl fmt::Debug for ProxyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyDescriptor")
            .field("address", &self.address)
            .field("username", &self.credentials.as_ref().map(|(user, _)| user))
            .field("password", &self.credentials.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn split_host_port(address: &str) -> Option<(&str, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    Some((host.trim_start_matches('[').trim_end_matches(']'), port))
}

/// Everything the engine needs to run one probe. Immutable once built.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    url: String,
    method: ProbeMethod,
    headers: RequestHeaders,
    timeout: Duration,
    proxy: Option<ProxyDescriptor>,
    follow_redirects: bool,
    max_redirects: u32,
    hosts: HostsOverrideMap,
}

impl RequestSpec {
    /// Starts building a spec for `url`.
    #[must_use]
    pub fn builder(url: impl Into<String>) -> RequestSpecBuilder {
        RequestSpecBuilder {
            url: url.into(),
            method: ProbeMethod::Get,
            headers: RequestHeaders::new(),
            timeout_secs: None,
            proxy: None,
            follow_redirects: true,
            max_redirects: None,
            hosts: HostsOverrideMap::default(),
        }
    }

    /// Target URL as supplied by the caller.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Requested method.
    #[must_use]
    pub fn method(&self) -> ProbeMethod {
        self.method
    }

    /// Caller headers.
    #[must_use]
    pub fn headers(&self) -> &RequestHeaders {
        &self.headers
    }

    /// Per-hop timeout after clamping.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Proxy to dial through, if any.
    #[must_use]
    pub fn proxy(&self) -> Option<&ProxyDescriptor> {
        self.proxy.as_ref()
    }

    /// Whether redirects are followed.
    #[must_use]
    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    /// Redirect budget after clamping.
    #[must_use]
    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    /// Hostname overrides applied to every hop.
    #[must_use]
    pub fn hosts(&self) -> &HostsOverrideMap {
        &self.hosts
    }
}

/// Builder for [`RequestSpec`]. Numeric limits are clamped by the profile at build time.
#[derive(Debug, Clone)]
pub struct RequestSpecBuilder {
    url: String,
    method: ProbeMethod,
    headers: RequestHeaders,
    timeout_secs: Option<i64>,
    proxy: Option<ProxyDescriptor>,
    follow_redirects: bool,
    max_redirects: Option<i64>,
    hosts: HostsOverrideMap,
}

impl RequestSpecBuilder {
    #[must_use]
    pub fn method(mut self, method: ProbeMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: RequestHeaders) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Requested timeout in seconds; out-of-range values are clamped.
    #[must_use]
    pub fn timeout_secs(mut self, secs: i64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn proxy(mut self, proxy: Option<ProxyDescriptor>) -> Self {
        self.proxy = proxy.filter(|p| !p.address().is_empty());
        self
    }

    #[must_use]
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Requested redirect budget; out-of-range values are clamped.
    #[must_use]
    pub fn max_redirects(mut self, max: i64) -> Self {
        self.max_redirects = Some(max);
        self
    }

    #[must_use]
    pub fn hosts(mut self, hosts: HostsOverrideMap) -> Self {
        self.hosts = hosts;
        self
    }

    /// Builds the request, clamping limits to `profile`.
    #[must_use]
    pub fn build(self, profile: &ProbeProfile) -> RequestSpec {
        let follow_redirects = profile.force_follow.unwrap_or(self.follow_redirects);
        RequestSpec {
            url: self.url.trim().to_string(),
            method: self.method,
            headers: self.headers,
            timeout: Duration::from_secs(profile.timeout_secs.clamp(self.timeout_secs)),
            proxy: self.proxy,
            follow_redirects,
            max_redirects: u32::try_from(profile.max_redirects.clamp(self.max_redirects))
                .unwrap_or(u32::MAX),
            hosts: self.hosts,
        }
    }
}
