//! Engine output: the hop chain and a tagged success/failure outcome.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Serialize, Serializer};
use url::Url;

use super::classify::{Classification, ErrorTaxonomy};
use super::error::ProbeError;
use super::request::RequestSpec;
use super::resolver::{ResolvedTarget, TargetSource};
use super::response::FileKind;
use super::transport::{RawOutcome, ResponseHeaders, TransportFailure};
use crate::playlist::PlaylistSummary;

/// Status reported when a hop failed without any HTTP response.
pub const TRANSPORT_FAILURE_STATUS: u16 = 504;

/// Status reported for URLs rejected before any hop.
pub const INVALID_URL_STATUS: u16 = 400;

pub(crate) fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64((value.as_secs_f64() * 1000.0).round() / 1000.0)
}

/// One request/response pair of a redirect chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedirectHop {
    pub url: String,
    #[serde(rename = "status_code")]
    pub status: u16,
    pub headers: ResponseHeaders,
    #[serde(rename = "time", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub error: Option<String>,
    pub error_code: Option<&'static str>,
    pub error_type: Option<ErrorTaxonomy>,
    pub proxy_error: bool,
    pub proxy_auth_failed: bool,
    pub dns_resolved: bool,
    pub resolved_ip: Option<String>,
}

impl RedirectHop {
    pub(crate) fn record(
        url: &Url,
        raw: &RawOutcome,
        classification: &Classification,
        target: Option<ResolvedTarget>,
    ) -> Self {
        Self {
            url: url.to_string(),
            status: raw.status,
            headers: raw.headers.clone(),
            elapsed: raw.timing.total,
            error: raw.error.as_ref().map(|e| e.message.clone()),
            error_code: raw.error.as_ref().map(|e| e.kind.code()),
            error_type: classification.taxonomy,
            proxy_error: classification.proxy_error,
            proxy_auth_failed: classification.proxy_auth_failed,
            dns_resolved: target.is_some_and(|t| t.source == TargetSource::Dns),
            resolved_ip: target.map(|t| t.addr.to_string()),
        }
    }
}

/// Final body as presented to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeBody {
    /// Complete body text.
    Full(String),
    /// First part of the body plus a notice.
    Truncated {
        text: String,
        download_available: bool,
    },
    /// Body dropped; `summary` describes what was there.
    Skipped { kind: FileKind, summary: String },
}

impl ProbeBody {
    /// Text placed in the record's `body` field. Empty for skipped bodies.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Full(text) | Self::Truncated { text, .. } => text,
            Self::Skipped { .. } => "",
        }
    }
}

/// Non-fatal tag attached to an otherwise complete probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advisory {
    pub taxonomy: ErrorTaxonomy,
    pub detail: String,
}

/// Terminal response reached.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSuccess {
    pub status: u16,
    pub headers: ResponseHeaders,
    pub body: ProbeBody,
    /// Bytes received for the final body. Only a lower bound when a
    /// non-playlist body stopped at the oversize read cap.
    pub size: u64,
    pub suggested_filename: String,
    pub download_id: Option<String>,
    pub is_playlist: bool,
    pub playlist: Option<PlaylistSummary>,
    pub advisory: Option<Advisory>,
}

/// Probe ended in a failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeFailure {
    pub taxonomy: ErrorTaxonomy,
    pub detail: String,
    pub status: u16,
    pub headers: ResponseHeaders,
    pub proxy_error: bool,
    pub proxy_auth_failed: bool,
    pub transport: Option<TransportFailure>,
}

/// Tagged outcome of a probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Success(Box<ProbeSuccess>),
    Failure(Box<ProbeFailure>),
}

/// Everything the engine learned while running one [`RequestSpec`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub original_url: String,
    pub final_url: String,
    pub hops: Vec<RedirectHop>,
    pub redirect_count: u32,
    pub proxy_used: bool,
    /// Address of the last hop came from a forced DNS lookup.
    pub dns_resolved: bool,
    pub resolved_ip: Option<IpAddr>,
    pub elapsed: Duration,
    pub outcome: ProbeOutcome,
}

impl ProbeReport {
    /// Report for a URL that failed to parse before any hop.
    #[must_use]
    pub fn invalid_url(spec: &RequestSpec, error: &ProbeError) -> Self {
        Self {
            original_url: spec.url().to_string(),
            final_url: spec.url().to_string(),
            hops: Vec::new(),
            redirect_count: 0,
            proxy_used: spec.proxy().is_some(),
            dns_resolved: false,
            resolved_ip: None,
            elapsed: Duration::ZERO,
            outcome: ProbeOutcome::Failure(Box::new(ProbeFailure {
                taxonomy: ErrorTaxonomy::UrlInvalid,
                detail: error.to_string(),
                status: INVALID_URL_STATUS,
                headers: ResponseHeaders::new(),
                proxy_error: false,
                proxy_auth_failed: false,
                transport: None,
            })),
        }
    }

    /// Final HTTP status as reported.
    #[must_use]
    pub fn status(&self) -> u16 {
        match &self.outcome {
            ProbeOutcome::Success(success) => success.status,
            ProbeOutcome::Failure(failure) => failure.status,
        }
    }

    /// Taxonomy tag, including advisory tags on completed probes.
    #[must_use]
    pub fn taxonomy(&self) -> Option<ErrorTaxonomy> {
        match &self.outcome {
            ProbeOutcome::Success(success) => success.advisory.as_ref().map(|a| a.taxonomy),
            ProbeOutcome::Failure(failure) => Some(failure.taxonomy),
        }
    }

    /// Final headers.
    #[must_use]
    pub fn headers(&self) -> &ResponseHeaders {
        match &self.outcome {
            ProbeOutcome::Success(success) => &success.headers,
            ProbeOutcome::Failure(failure) => &failure.headers,
        }
    }

    /// Body text placed in the record: response text on success, the
    /// explanation on failure.
    #[must_use]
    pub fn body_text(&self) -> &str {
        match &self.outcome {
            ProbeOutcome::Success(success) => success.body.text(),
            ProbeOutcome::Failure(failure) => &failure.detail,
        }
    }

    /// True for an untagged response with a 2xx or 3xx status.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(&self.outcome, ProbeOutcome::Success(success)
            if success.advisory.is_none() && (200..400).contains(&success.status))
    }

    #[must_use]
    pub fn success(&self) -> Option<&ProbeSuccess> {
        match &self.outcome {
            ProbeOutcome::Success(success) => Some(success),
            ProbeOutcome::Failure(_) => None,
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<&ProbeFailure> {
        match &self.outcome {
            ProbeOutcome::Success(_) => None,
            ProbeOutcome::Failure(failure) => Some(failure),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::probe::ProbeProfile;

    #[test]
    fn test_invalid_url_report_is_fully_populated() {
        let spec = RequestSpec::builder("not a url").build(&ProbeProfile::diagnostics());
        let report = ProbeReport::invalid_url(&spec, &ProbeError::invalid_url("not a url", "bad"));
        assert_eq!(report.status(), INVALID_URL_STATUS);
        assert_eq!(report.taxonomy(), Some(ErrorTaxonomy::UrlInvalid));
        assert!(report.hops.is_empty());
        assert!(!report.is_success());
        assert!(report.body_text().contains("not a url"));
    }

    #[test]
    fn test_skipped_body_has_empty_text() {
        let body = ProbeBody::Skipped {
            kind: FileKind::Media,
            summary: "[media file]".into(),
        };
        assert_eq!(body.text(), "");
    }

    #[test]
    fn test_hop_serializes_time_as_seconds() {
        let hop = RedirectHop {
            url: "http://a.example/".into(),
            status: 302,
            headers: ResponseHeaders::new(),
            elapsed: Duration::from_millis(1250),
            error: None,
            error_code: None,
            error_type: None,
            proxy_error: false,
            proxy_auth_failed: false,
            dns_resolved: false,
            resolved_ip: None,
        };
        let json = serde_json::to_value(&hop).unwrap();
        assert_eq!(json["time"], 1.25);
        assert_eq!(json["status_code"], 302);
    }
}
