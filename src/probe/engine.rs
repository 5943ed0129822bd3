//! The request execution engine: resolution, transport, redirect loop,
//! classification and body shaping for one [`RequestSpec`].

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::classify::{ClassifierInput, Classification, ErrorTaxonomy, classify};
use super::constants::{INLINE_BODY_LIMIT, TRUNCATION_NOTICE, TRUNCATION_NOTICE_NO_DOWNLOAD};
use super::error::ProbeError;
use super::filename::suggest_filename;
use super::profile::{ProbeProfile, ResponseShaping};
use super::redirect::next_location;
use super::report::{
    Advisory, ProbeBody, ProbeFailure, ProbeOutcome, ProbeReport, ProbeSuccess, RedirectHop,
    TRANSPORT_FAILURE_STATUS,
};
use super::request::{ProxyDescriptor, RequestSpec};
use super::resolver::{DnsResolver, HostResolver, ResolvedTarget, TargetSource, resolve_target};
use super::response::{self, BodyDecision};
use super::transport::{RawOutcome, ReqwestTransport, ResponseHeaders, Transport, TransportRequest};
use crate::cache::ArtifactCache;
use crate::clock::{Clock, SystemClock};
use crate::playlist;

/// Parses a probe target, accepting only http(s) URLs with a host.
///
/// # Errors
///
/// Returns [`ProbeError`] when the URL is malformed, hostless or not http(s).
pub fn parse_probe_url(raw: &str) -> Result<Url, ProbeError> {
    let url = Url::parse(raw.trim()).map_err(|e| ProbeError::invalid_url(raw, e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProbeError::unsupported_scheme(raw, url.scheme()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ProbeError::invalid_url(raw, "missing host"));
    }
    Ok(url)
}

/// Stateless probe engine.
///
/// Collaborators are injected so tests can replace DNS, the network and time.
#[derive(Clone)]
pub struct ProbeEngine {
    profile: ProbeProfile,
    resolver: Arc<dyn HostResolver>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    cache: Option<ArtifactCache>,
}

impl std::fmt::Debug for ProbeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeEngine")
            .field("profile", &self.profile.name)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Mutable state of one redirect chain.
struct Chain {
    original: Url,
    hops: Vec<RedirectHop>,
    redirect_count: u32,
    target: Option<ResolvedTarget>,
    started: Instant,
}

impl Chain {
    fn into_report(self, spec: &RequestSpec, final_url: String, outcome: ProbeOutcome) -> ProbeReport {
        ProbeReport {
            original_url: spec.url().to_string(),
            final_url,
            hops: self.hops,
            redirect_count: self.redirect_count,
            proxy_used: spec.proxy().is_some(),
            dns_resolved: self.target.is_some_and(|t| t.source == TargetSource::Dns),
            resolved_ip: self.target.map(|t| t.addr),
            elapsed: self.started.elapsed(),
            outcome,
        }
    }
}

impl ProbeEngine {
    /// Creates an engine from explicit collaborators.
    #[must_use]
    pub fn new(
        profile: ProbeProfile,
        resolver: Arc<dyn HostResolver>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            profile,
            resolver,
            transport,
            clock,
            cache: None,
        }
    }

    /// Creates an engine with hickory DNS, reqwest and the system clock.
    #[must_use]
    pub fn with_defaults(profile: ProbeProfile) -> Self {
        Self::new(
            profile,
            Arc::new(DnsResolver::new()),
            Arc::new(ReqwestTransport),
            Arc::new(SystemClock),
        )
    }

    /// Enables caching of bodies over the inline limit.
    #[must_use]
    pub fn with_cache(mut self, cache: ArtifactCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Returns a copy of this engine sharing its collaborators but using `profile`.
    #[must_use]
    pub fn with_profile(&self, profile: ProbeProfile) -> Self {
        Self {
            profile,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn profile(&self) -> &ProbeProfile {
        &self.profile
    }

    #[must_use]
    pub fn cache(&self) -> Option<&ArtifactCache> {
        self.cache.as_ref()
    }

    /// Runs one probe to completion.
    pub async fn execute(&self, spec: &RequestSpec) -> ProbeReport {
        self.execute_until(spec, &CancellationToken::new()).await
    }

    /// Runs one probe, declining further redirects once `cancel` fires.
    ///
    /// An in-flight hop is never interrupted; it ends at its own timeout. When
    /// cancelled mid-chain the last fetched response becomes final.
    #[instrument(
        skip(self, spec, cancel),
        fields(profile = self.profile.name, url = %spec.url(), proxied = spec.proxy().is_some())
    )]
    pub async fn execute_until(&self, spec: &RequestSpec, cancel: &CancellationToken) -> ProbeReport {
        let original = match parse_probe_url(spec.url()) {
            Ok(url) => url,
            Err(e) => {
                info!(error = %e, "Rejected invalid URL");
                return ProbeReport::invalid_url(spec, &e);
            }
        };

        let proxy_address = spec.proxy().map(ProxyDescriptor::address);
        let mut current = original.clone();
        let mut chain = Chain {
            original,
            hops: Vec::new(),
            redirect_count: 0,
            target: None,
            started: Instant::now(),
        };

        loop {
            let host = current.host_str().unwrap_or_default().to_string();
            chain.target = resolve_target(
                self.resolver.as_ref(),
                &host,
                spec.hosts(),
                spec.proxy().is_some(),
            )
            .await;

            let timeout = self.profile.hop_timeout(&current, spec.timeout());
            let request = TransportRequest {
                url: &current,
                original_url: &chain.original,
                method: spec.method(),
                headers: spec.headers(),
                user_agent: self.profile.user_agent,
                target: chain.target,
                proxy: spec.proxy(),
                timeout,
                connect_timeout: self.profile.connect_timeout,
                proxy_connect_timeout: self.profile.proxy_connect_timeout,
                probe_only_suffixes: self.profile.probe_only_suffixes,
                body_limit: self.profile.body_limit_for(&current),
            };
            let mut raw = self.transport.invoke(&request).await;
            if raw.body_limited
                && response::inspect(&chain.original, &current, &raw.headers, &raw.body, true)
                    .is_playlist
            {
                debug!(hop_url = %current, read = raw.body.len(), "Playlist hit the read cap; fetching in full");
                raw = self
                    .transport
                    .invoke(&TransportRequest {
                        body_limit: None,
                        ..request
                    })
                    .await;
            }
            let classification = classify(&ClassifierInput {
                failure: raw.error.as_ref(),
                proxy: proxy_address,
                timing: raw.timing,
                timeout,
                status: raw.status,
                body: &raw.body,
            });
            chain
                .hops
                .push(RedirectHop::record(&current, &raw, &classification, chain.target));
            debug!(
                hop = chain.hops.len(),
                hop_url = %current,
                status = raw.status,
                resolved = ?chain.target.map(|t| t.addr),
                elapsed_ms = raw.timing.total.as_millis(),
                error_type = ?classification.taxonomy,
                "Hop finished"
            );

            if raw.error.is_some() || classification.proxy_auth_failed {
                return Self::finish(chain.into_report(
                    spec,
                    current.to_string(),
                    Self::failure_outcome(raw, classification),
                ));
            }

            let wants_redirect = spec.follow_redirects()
                && (300..400).contains(&raw.status)
                && chain.redirect_count < spec.max_redirects()
                && !cancel.is_cancelled();
            if wants_redirect
                && let Some(location) = raw.headers.get("location").filter(|l| !l.trim().is_empty())
            {
                let next = next_location(&current, location);
                chain.redirect_count += 1;
                match parse_probe_url(&next) {
                    Ok(url) => {
                        current = url;
                        continue;
                    }
                    Err(e) => {
                        let failure = ProbeFailure {
                            taxonomy: ErrorTaxonomy::UrlInvalid,
                            detail: format!("redirect target rejected: {e}"),
                            status: raw.status,
                            headers: raw.headers,
                            proxy_error: false,
                            proxy_auth_failed: false,
                            transport: None,
                        };
                        return Self::finish(chain.into_report(
                            spec,
                            next,
                            ProbeOutcome::Failure(Box::new(failure)),
                        ));
                    }
                }
            }

            let success = self.success_outcome(&chain, &current, raw, classification).await;
            return Self::finish(chain.into_report(
                spec,
                current.to_string(),
                ProbeOutcome::Success(Box::new(success)),
            ));
        }
    }

    fn finish(report: ProbeReport) -> ProbeReport {
        info!(
            status = report.status(),
            error_type = ?report.taxonomy(),
            redirects = report.redirect_count,
            elapsed_ms = report.elapsed.as_millis(),
            "Probe finished"
        );
        report
    }

    fn failure_outcome(raw: RawOutcome, classification: Classification) -> ProbeOutcome {
        let taxonomy = classification
            .taxonomy
            .unwrap_or(ErrorTaxonomy::GeneralError);
        let detail = classification.detail.unwrap_or_else(|| {
            raw.error
                .as_ref()
                .map_or_else(|| taxonomy.to_string(), ToString::to_string)
        });
        let status = if raw.status == 0 {
            TRANSPORT_FAILURE_STATUS
        } else {
            raw.status
        };
        ProbeOutcome::Failure(Box::new(ProbeFailure {
            taxonomy,
            detail,
            status,
            headers: raw.headers,
            proxy_error: classification.proxy_error,
            proxy_auth_failed: classification.proxy_auth_failed,
            transport: raw.error,
        }))
    }

    async fn success_outcome(
        &self,
        chain: &Chain,
        final_url: &Url,
        raw: RawOutcome,
        classification: Classification,
    ) -> ProbeSuccess {
        let body_limited = raw.body_limited;
        let headers = raw.headers;
        let size = u64::try_from(raw.body.len()).unwrap_or(u64::MAX);
        let suggested_filename = suggest_filename(final_url, &headers, self.clock.unix_secs());
        let traits = response::inspect(
            &chain.original,
            final_url,
            &headers,
            &raw.body,
            body_limited,
        );
        let advisory = classification.taxonomy.map(|taxonomy| Advisory {
            taxonomy,
            detail: classification.detail.unwrap_or_default(),
        });

        let mut success = ProbeSuccess {
            status: raw.status,
            headers,
            body: ProbeBody::Full(String::new()),
            size,
            suggested_filename,
            download_id: None,
            is_playlist: traits.is_playlist,
            playlist: None,
            advisory,
        };

        match self.profile.shaping {
            ResponseShaping::Raw => {
                let text = String::from_utf8_lossy(&raw.body);
                let text = match self.profile.playlist_cap_for(final_url).and_then(|c| c.keep_inline) {
                    Some(keep) => response::truncate_on_char_boundary(&text, keep).to_string(),
                    None => text.into_owned(),
                };
                success.body = ProbeBody::Full(text);
            }
            ResponseShaping::Classify => {
                match response::decide(traits, raw.body.len()) {
                    BodyDecision::Skip(kind) => {
                        let mime = response::content_type(&success.headers);
                        let declared = response::declared_length(&success.headers);
                        let observed = match declared {
                            Some(length) => response::ObservedSize::Exact(length),
                            None if body_limited => response::ObservedSize::AtLeast(size),
                            None => response::ObservedSize::Exact(size),
                        };
                        success.body = ProbeBody::Skipped {
                            kind,
                            summary: response::skipped_summary(kind, &mime, observed, final_url.as_str()),
                        };
                    }
                    BodyDecision::KeepWhole { cache } => {
                        let text = String::from_utf8_lossy(&raw.body).into_owned();
                        if cache {
                            success.download_id = self.store(&raw.body, &success, chain).await;
                        }
                        success.playlist = Some(playlist::analyze(&text));
                        success.body = ProbeBody::Full(text);
                    }
                    BodyDecision::Truncate => {
                        success.download_id = self.store(&raw.body, &success, chain).await;
                        let text = String::from_utf8_lossy(&raw.body);
                        let notice = if success.download_id.is_some() {
                            TRUNCATION_NOTICE
                        } else {
                            TRUNCATION_NOTICE_NO_DOWNLOAD
                        };
                        success.body = ProbeBody::Truncated {
                            text: format!(
                                "{}{notice}",
                                response::truncate_on_char_boundary(&text, INLINE_BODY_LIMIT)
                            ),
                            download_available: success.download_id.is_some(),
                        };
                    }
                    BodyDecision::Inline => {
                        let text = String::from_utf8_lossy(&raw.body).into_owned();
                        if traits.is_playlist {
                            success.playlist = Some(playlist::analyze(&text));
                        }
                        success.body = ProbeBody::Full(text);
                    }
                }
            }
        }
        success
    }

    async fn store(&self, body: &[u8], success: &ProbeSuccess, chain: &Chain) -> Option<String> {
        let cache = self.cache.as_ref()?;
        let headers: &ResponseHeaders = &success.headers;
        match cache
            .put(body, headers, &success.suggested_filename, chain.original.as_str())
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "Failed to cache response body");
                None
            }
        }
    }
}
