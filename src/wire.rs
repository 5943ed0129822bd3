//! JSON request and response shapes of the HTTP service.
//!
//! Request bodies are parsed leniently: numeric fields accept numbers or
//! numeric strings, flags accept anything with a sensible truth value. The
//! response envelope ([`ResultRecord`]) always carries every field, including
//! for rejected requests.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::playlist::PlaylistSummary;
use crate::probe::{
    ErrorTaxonomy, HostsOverrideMap, ProbeBody, ProbeMethod, ProbeOutcome, ProbeProfile,
    ProbeReport, ProxyDescriptor, RedirectHop, RequestHeaders, RequestSpec, ResponseHeaders,
    serialize_secs,
};

/// Path prefix of the cached-body retrieval route.
pub const DOWNLOAD_PATH_PREFIX: &str = "/api/download/";

/// A request rejected before the engine runs.
///
/// No From impls: each variant is raised at a specific validation step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("request body is empty")]
    EmptyBody,

    #[error("request body is not a JSON object: {reason}")]
    MalformedJson { reason: String },

    #[error("missing required field: url")]
    MissingUrl,

    #[error("missing required field: proxy")]
    MissingProxy,

    #[error("invalid proxy address '{address}': expected host:port")]
    InvalidProxyAddress { address: String },

    #[error("unsupported request method '{method}'")]
    UnsupportedMethod { method: String },

    #[error("unknown test_type '{test_type}'")]
    UnknownTestType { test_type: String },

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("cached response not found or expired")]
    NotFound,

    #[error("no route for {path}")]
    RouteNotFound { path: String },
}

impl WireError {
    /// Creates a [`WireError::MalformedJson`] from a parse failure.
    pub fn malformed(reason: impl std::fmt::Display) -> Self {
        Self::MalformedJson {
            reason: reason.to_string(),
        }
    }

    /// HTTP status returned for this rejection.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::MethodNotAllowed => 405,
            Self::NotFound | Self::RouteNotFound { .. } => 404,
            _ => 400,
        }
    }

    /// Taxonomy tag placed in the envelope.
    #[must_use]
    pub fn taxonomy(&self) -> ErrorTaxonomy {
        ErrorTaxonomy::GeneralError
    }
}

/// Body of `POST /api/probe`, `/api/scan` and `/api/proxy-check`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProbeRequestBody {
    pub url: Option<Value>,
    pub method: Option<Value>,
    pub timeout: Option<Value>,
    pub proxy: Option<Value>,
    pub proxy_username: Option<Value>,
    pub proxy_password: Option<Value>,
    pub follow_redirects: Option<Value>,
    pub max_redirects: Option<Value>,
    pub headers: Option<Value>,
    /// Newline-delimited `ip host` overrides.
    pub host: Option<Value>,
    /// `proxy` or `stream`, for the proxy-check route.
    pub test_type: Option<Value>,
    pub test_anonymity: Option<Value>,
    pub check_m3u8: Option<Value>,
}

impl ProbeRequestBody {
    /// Parses a raw request body.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::EmptyBody`] for blank input and
    /// [`WireError::MalformedJson`] for anything but a JSON object.
    pub fn parse(raw: &[u8]) -> Result<Self, WireError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(WireError::EmptyBody);
        }
        let value: Value = serde_json::from_slice(raw).map_err(WireError::malformed)?;
        if !value.is_object() {
            return Err(WireError::malformed("top-level value must be an object"));
        }
        serde_json::from_value(value).map_err(WireError::malformed)
    }

    /// The target URL, trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::MissingUrl`] when absent or blank.
    pub fn url(&self) -> Result<String, WireError> {
        loose_string(self.url.as_ref())
            .filter(|url| !url.is_empty())
            .ok_or(WireError::MissingUrl)
    }

    /// The requested method; blank means GET.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::UnsupportedMethod`] for anything but GET or HEAD.
    pub fn method(&self) -> Result<ProbeMethod, WireError> {
        let raw = loose_string(self.method.as_ref()).unwrap_or_default();
        ProbeMethod::parse(&raw).ok_or(WireError::UnsupportedMethod { method: raw })
    }

    /// The proxy, if an address was given.
    #[must_use]
    pub fn proxy(&self) -> Option<ProxyDescriptor> {
        let address = loose_string(self.proxy.as_ref()).filter(|a| !a.is_empty())?;
        let username = loose_string(self.proxy_username.as_ref()).unwrap_or_default();
        let password = loose_string(self.proxy_password.as_ref()).unwrap_or_default();
        Some(ProxyDescriptor::new(address).with_credentials(&username, &password))
    }

    /// The proxy, required and well-formed.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::MissingProxy`] or [`WireError::InvalidProxyAddress`].
    pub fn required_proxy(&self) -> Result<ProxyDescriptor, WireError> {
        let proxy = self.proxy().ok_or(WireError::MissingProxy)?;
        if !proxy.is_well_formed() {
            return Err(WireError::InvalidProxyAddress {
                address: proxy.address().to_string(),
            });
        }
        Ok(proxy)
    }

    /// Request headers from the `headers` object. Non-scalar values are skipped.
    #[must_use]
    pub fn headers(&self) -> RequestHeaders {
        let Some(Value::Object(map)) = &self.headers else {
            return RequestHeaders::new();
        };
        map.iter()
            .filter_map(|(name, value)| {
                loose_string(Some(value)).map(|value| (name.clone(), value))
            })
            .collect()
    }

    #[must_use]
    pub fn hosts(&self) -> HostsOverrideMap {
        loose_string(self.host.as_ref())
            .map(|text| HostsOverrideMap::parse(&text))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn test_type(&self) -> String {
        loose_string(self.test_type.as_ref())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "proxy".to_string())
    }

    #[must_use]
    pub fn test_anonymity(&self) -> bool {
        self.test_anonymity.as_ref().is_some_and(truthy)
    }

    /// Defaults to true when absent.
    #[must_use]
    pub fn check_m3u8(&self) -> bool {
        self.check_m3u8.as_ref().is_none_or(truthy)
    }

    /// The `timeout` field as whole seconds, if given.
    #[must_use]
    pub fn timeout_secs(&self) -> Option<i64> {
        self.timeout.as_ref().and_then(loose_int)
    }

    /// Builds an engine request clamped by `profile`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::MissingUrl`] or [`WireError::UnsupportedMethod`].
    pub fn to_spec(&self, profile: &ProbeProfile) -> Result<RequestSpec, WireError> {
        let mut builder = RequestSpec::builder(self.url()?)
            .method(self.method()?)
            .headers(self.headers())
            .proxy(self.proxy())
            .hosts(self.hosts());
        if let Some(secs) = self.timeout_secs() {
            builder = builder.timeout_secs(secs);
        }
        if let Some(follow) = &self.follow_redirects {
            builder = builder.follow_redirects(truthy(follow));
        }
        if let Some(max) = self.max_redirects.as_ref().and_then(loose_int) {
            builder = builder.max_redirects(max);
        }
        Ok(builder.build(profile))
    }
}

fn loose_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn loose_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !matches!(s.trim(), "" | "0" | "false"),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

/// The JSON envelope returned for every probe, success or not.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultRecord {
    pub url: String,
    pub final_url: String,
    pub status_code: u16,
    pub headers: ResponseHeaders,
    pub body: String,
    pub size: u64,
    #[serde(serialize_with = "serialize_secs")]
    pub time: Duration,
    pub redirect_count: u32,
    pub redirects: Vec<RedirectHop>,
    pub download_url: Option<String>,
    pub truncated: bool,
    pub download_available: bool,
    pub skip_body: bool,
    /// `media`, `large_file` or empty.
    pub file_type: String,
    pub body_summary: Option<String>,
    pub is_m3u8: bool,
    pub playlist: Option<PlaylistSummary>,
    /// Set only for requests rejected before the engine ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub error_type: Option<ErrorTaxonomy>,
    pub proxy_error: bool,
    pub proxy_auth_failed: bool,
    pub error_details: Option<String>,
    pub transport_error_code: Option<&'static str>,
    pub transport_error_message: Option<String>,
    pub proxy_used: bool,
    pub suggested_filename: String,
    pub dns_resolved: bool,
    pub resolved_ip: Option<String>,
}

impl ResultRecord {
    /// Envelope for a request rejected before the engine ran.
    #[must_use]
    pub fn rejected(error: &WireError) -> Self {
        let message = error.to_string();
        Self {
            status_code: error.status(),
            error: Some(message.clone()),
            error_type: Some(error.taxonomy()),
            error_details: Some(message),
            ..Self::default()
        }
    }
}

impl From<&ProbeReport> for ResultRecord {
    fn from(report: &ProbeReport) -> Self {
        let mut record = Self {
            url: report.original_url.clone(),
            final_url: report.final_url.clone(),
            status_code: report.status(),
            headers: report.headers().clone(),
            body: report.body_text().to_string(),
            time: report.elapsed,
            redirect_count: report.redirect_count,
            redirects: report.hops.clone(),
            proxy_used: report.proxy_used,
            dns_resolved: report.dns_resolved,
            resolved_ip: report.resolved_ip.map(|ip| ip.to_string()),
            ..Self::default()
        };

        match &report.outcome {
            ProbeOutcome::Success(success) => {
                record.size = success.size;
                record.suggested_filename.clone_from(&success.suggested_filename);
                record.download_url = success
                    .download_id
                    .as_ref()
                    .map(|id| format!("{DOWNLOAD_PATH_PREFIX}{id}"));
                record.download_available = success.download_id.is_some();
                record.is_m3u8 = success.is_playlist;
                record.playlist.clone_from(&success.playlist);
                match &success.body {
                    ProbeBody::Full(_) => {}
                    ProbeBody::Truncated { .. } => record.truncated = true,
                    ProbeBody::Skipped { kind, summary } => {
                        record.skip_body = true;
                        record.file_type = kind.as_str().to_string();
                        record.body_summary = Some(summary.clone());
                    }
                }
                if let Some(advisory) = &success.advisory {
                    record.error_type = Some(advisory.taxonomy);
                    record.error_details = Some(advisory.detail.clone());
                }
            }
            ProbeOutcome::Failure(failure) => {
                record.error_type = Some(failure.taxonomy);
                record.error_details = Some(failure.detail.clone());
                record.proxy_error = failure.proxy_error;
                record.proxy_auth_failed = failure.proxy_auth_failed;
                record.transport_error_code = failure.transport.as_ref().map(|t| t.kind.code());
                record.transport_error_message =
                    failure.transport.as_ref().map(|t| t.message.clone());
            }
        }
        record
    }
}
