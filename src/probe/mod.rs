//! Request execution engine.
//!
//! One [`ProbeEngine`] runs a [`RequestSpec`] through hostname resolution,
//! a proxy-aware transport, a manual redirect loop, failure classification
//! and response shaping, and returns a [`ProbeReport`]. The engine never
//! returns an error: every path ends in a fully populated report.
//!
//! # Architecture
//!
//! - [`resolve_target`] / [`HostResolver`] - override map, then forced IPv4 lookup when proxied
//! - [`Transport`] / [`ReqwestTransport`] - one hop, direct or SOCKS5, no redirects
//! - [`next_location`] - `Location` resolution for the redirect loop
//! - [`classify`] - transport outcome to [`ErrorTaxonomy`]
//! - [`response`] - media / oversize / playlist detection and the body decision
//! - [`suggest_filename`] - download filename heuristics
//! - [`ProbeProfile`] - numeric policy for each entry point
//!
//! # Example
//!
//! ```no_run
//! use streamprobe_core::probe::{ProbeEngine, ProbeProfile, RequestSpec};
//!
//! # async fn example() {
//! let profile = ProbeProfile::diagnostics();
//! let engine = ProbeEngine::with_defaults(profile.clone());
//! let spec = RequestSpec::builder("http://example.com/live/index.m3u8")
//!     .timeout_secs(10)
//!     .build(&profile);
//! let report = engine.execute(&spec).await;
//! println!("{} after {} redirects", report.status(), report.redirect_count);
//! # }
//! ```

mod classify;
mod constants;
mod engine;
mod error;
mod filename;
mod hosts;
mod profile;
mod redirect;
mod report;
mod request;
mod resolver;
pub mod response;
mod transport;

pub use classify::{
    Classification, ClassifierInput, ErrorTaxonomy, classify, extract_error_detail,
};
pub use constants::{
    DEFAULT_USER_AGENT, FAST_504_THRESHOLD, INLINE_BODY_LIMIT, MEDIA_SUFFIXES,
    OVERSIZED_BODY_BYTES, PLAYLIST_CONTENT_TYPES, PLAYLIST_MARKER, PLAYLIST_SUFFIXES,
    PROBE_ONLY_SUFFIXES, SCAN_USER_AGENT,
    SOCKS5_AUTH_FAILED_MARKER, TRUNCATION_NOTICE, TRUNCATION_NOTICE_NO_DOWNLOAD,
};
pub use engine::{ProbeEngine, parse_probe_url};
pub use error::ProbeError;
pub use filename::{extension_from_content_type, suggest_filename};
pub(crate) use filename::sanitize_filename;
pub use hosts::HostsOverrideMap;
pub use profile::{Bounds, PlaylistCap, ProbeProfile, ResponseShaping, has_suffix};
pub use redirect::next_location;
pub use report::{
    Advisory, INVALID_URL_STATUS, ProbeBody, ProbeFailure, ProbeOutcome, ProbeReport,
    ProbeSuccess, RedirectHop, TRANSPORT_FAILURE_STATUS,
};
pub(crate) use report::serialize_secs;
pub use request::{ProbeMethod, ProxyDescriptor, RequestHeaders, RequestSpec, RequestSpecBuilder};
pub use resolver::{DnsResolver, HostResolver, ResolvedTarget, TargetSource, resolve_target};
pub use response::FileKind;
pub use transport::{
    BodyLimit, ConnectPlan, LimitAction, RawOutcome, ReqwestTransport, ResponseHeaders, Timing,
    Transport, TransportErrorKind, TransportFailure, TransportRequest,
};
